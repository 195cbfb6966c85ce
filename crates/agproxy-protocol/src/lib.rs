pub mod claude;
pub mod gemini;
pub mod sse;
