//! Per-subaccount broker credential resolution.
//!
//! Each subaccount alias resolves to its own Alpaca key pair and base URL
//! through environment variable suffixes: `ALPACA_KEY_ID__swing` beats
//! `ALPACA_KEY_ID` for alias `swing`. When no base URL is configured,
//! `USE_PAPER[__alias]` picks between the paper and live endpoints
//! (defaulting to paper).

use anyhow::{Result, bail};
use std::env;

pub const DEFAULT_ALIAS: &str = "default";

const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";

/// Resolved credentials for one subaccount alias.
#[derive(Debug, Clone)]
pub struct AlpacaCredentials {
    pub key_id: String,
    pub secret_key: String,
    pub base_url: String,
    pub data_url: String,
    pub paper: bool,
}

/// Stateless resolver; reads the environment at call time so aliases do not
/// need to be enumerated up front.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialResolver;

impl CredentialResolver {
    /// Resolve credentials for `alias` with precedence
    /// `VAR__<alias>` > `VAR`.
    pub fn resolve(&self, alias: &str) -> Result<AlpacaCredentials> {
        let Some(key_id) = scoped_var("ALPACA_KEY_ID", alias) else {
            bail!("no ALPACA_KEY_ID configured for alias '{}'", alias);
        };
        let Some(secret_key) = scoped_var("ALPACA_SECRET_KEY", alias) else {
            bail!("no ALPACA_SECRET_KEY configured for alias '{}'", alias);
        };

        let base_url = match scoped_var("ALPACA_BASE_URL", alias) {
            Some(url) => normalize_base_url(&url),
            None => {
                let use_paper = scoped_var("USE_PAPER", alias)
                    .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(true);
                if use_paper { PAPER_BASE_URL } else { LIVE_BASE_URL }.to_string()
            }
        };

        let paper = base_url.contains("paper-api");

        Ok(AlpacaCredentials {
            key_id,
            secret_key,
            base_url,
            data_url: scoped_var("ALPACA_DATA_URL", alias)
                .unwrap_or_else(|| DEFAULT_DATA_URL.to_string()),
            paper,
        })
    }
}

fn scoped_var(name: &str, alias: &str) -> Option<String> {
    env::var(format!("{}__{}", name, alias))
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| env::var(name).ok().filter(|v| !v.trim().is_empty()))
}

/// Trim a trailing slash and a trailing `/v2` so path joins stay uniform.
fn normalize_base_url(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/');
    if let Some(stripped) = base.strip_suffix("/v2") {
        base = stripped;
    }
    base.trim_end_matches('/').to_string()
}
