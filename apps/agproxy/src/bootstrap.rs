use std::path::Path;

use anyhow::Context;
use tokio::io::AsyncReadExt;

use agproxy_common::{ForwardConfig, ForwardConfigPatch};
use agproxy_core::Account;

use crate::cli::Cli;

pub(crate) struct Bootstrap {
    pub(crate) config: ForwardConfig,
    pub(crate) account: Account,
    pub(crate) body: Vec<u8>,
}

pub(crate) async fn bootstrap(cli: &Cli) -> anyhow::Result<Bootstrap> {
    // 1) file layer, then CLI/ENV on top.
    let mut merged = match cli.config.as_deref() {
        Some(path) => load_config_patch(path).await?,
        None => ForwardConfigPatch::default(),
    };
    merged.overlay(cli.config_patch()?);
    let config = merged
        .into_config()
        .context("finalize merged forward config")?;

    // 2) account, with the CLI proxy taking precedence.
    let mut account = load_account(&cli.account).await?;
    if let Some(proxy) = cli.proxy() {
        account.proxy_url = Some(proxy);
    }

    // 3) request body.
    let body = read_request(&cli.request).await?;

    Ok(Bootstrap {
        config,
        account,
        body,
    })
}

async fn load_config_patch(path: &Path) -> anyhow::Result<ForwardConfigPatch> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse config {}", path.display()))
}

async fn load_account(path: &Path) -> anyhow::Result<Account> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("read account {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse account {}", path.display()))
}

async fn read_request(source: &str) -> anyhow::Result<Vec<u8>> {
    if source == "-" {
        let mut body = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut body)
            .await
            .context("read request from stdin")?;
        return Ok(body);
    }
    tokio::fs::read(source)
        .await
        .with_context(|| format!("read request {source}"))
}
