use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use santa_core::MIN_CODE_LENGTH;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub persist_path: Option<PathBuf>,
    pub admin_password: String,
    /// Whether an already assigned game may be drawn again.
    pub allow_redraw: bool,
    pub code_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            persist_path: None,
            admin_password: "changeme".to_string(),
            allow_redraw: true,
            code_length: 8,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: std::env::var("SANTA_BIND").unwrap_or(defaults.bind_addr),
            persist_path: std::env::var("PERSIST_PATH").ok().map(PathBuf::from),
            admin_password: std::env::var("ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
            allow_redraw: match std::env::var("SANTA_ALLOW_REDRAW") {
                Ok(raw) => raw
                    .parse()
                    .context("SANTA_ALLOW_REDRAW must be true or false")?,
                Err(_) => defaults.allow_redraw,
            },
            code_length: match std::env::var("SANTA_CODE_LENGTH") {
                Ok(raw) => parse_code_length(&raw).context("Invalid SANTA_CODE_LENGTH")?,
                Err(_) => defaults.code_length,
            },
        })
    }
}

fn parse_code_length(raw: &str) -> Result<usize> {
    let len: usize = raw.trim().parse().context("not a number")?;
    ensure!(
        len >= MIN_CODE_LENGTH,
        "join codes need at least {MIN_CODE_LENGTH} characters, got {len}"
    );
    Ok(len)
}
