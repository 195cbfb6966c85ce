pub mod claude2gemini;
pub mod gemini_internal;
