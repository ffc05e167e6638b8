//! Run configuration: CLI surface and the credential file.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::model::Pair;

/// API credentials for one venue. Loaded once at start, never mutated.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueCredentials {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Credential file: a JSON document keyed by venue identifier.
pub type CredentialsFile = HashMap<String, VenueCredentials>;

pub fn load_credentials(path: &Path) -> Result<CredentialsFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading credential file {}", path.display()))?;
    let creds: CredentialsFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing credential file {}", path.display()))?;
    if creds.is_empty() {
        bail!("credential file {} has no venue entries", path.display());
    }
    Ok(creds)
}

/// Cross-venue maker/taker arbitrage engine for a single spot pair.
#[derive(Debug, Parser)]
#[command(name = "crossbot", version, about)]
pub struct Cli {
    /// Trading pair in BASE/QUOTE form, e.g. REP/USD.
    #[arg(long)]
    pub pair: String,

    /// Exactly two venue names, ordered, e.g. --venues coinbase,binance.
    #[arg(long, value_delimiter = ',')]
    pub venues: Vec<String>,

    /// Credential file keyed by venue name.
    #[arg(long, env = "CROSSBOT_AUTH_FILE", default_value = "auth.json")]
    pub auth_file: PathBuf,

    /// Override the starting base balance on every venue instead of
    /// querying wallets over REST.
    #[arg(long)]
    pub base_balance: Option<Decimal>,

    /// Override the starting quote balance on every venue.
    #[arg(long)]
    pub quote_balance: Option<Decimal>,

    /// Append-only trade log path.
    #[arg(long, default_value = "trades.log")]
    pub trade_log: PathBuf,
}

impl Cli {
    pub fn parsed_pair(&self) -> Result<Pair> {
        Pair::parse(&self.pair)
            .with_context(|| format!("invalid pair {:?}, expected BASE/QUOTE", self.pair))
    }

    pub fn validate(&self) -> Result<()> {
        if self.venues.len() != 2 {
            bail!(
                "exactly two venues are required, got {}: {:?}",
                self.venues.len(),
                self.venues
            );
        }
        if self.venues[0] == self.venues[1] {
            bail!("venues must differ, got {:?} twice", self.venues[0]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn credentials_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "coinbase": {{"api_key": "k", "api_secret": "s", "passphrase": "p"}},
                "binance": {{"api_key": "k2", "api_secret": "s2"}}
            }}"#
        )
        .unwrap();

        let creds = load_credentials(file.path()).unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds["coinbase"].passphrase.as_deref(), Some("p"));
        assert!(creds["binance"].passphrase.is_none());
    }

    #[test]
    fn empty_credentials_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        assert!(load_credentials(file.path()).is_err());
    }

    #[test]
    fn cli_requires_two_distinct_venues() {
        let cli = Cli::parse_from([
            "crossbot",
            "--pair",
            "REP/USD",
            "--venues",
            "coinbase,coinbase",
        ]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from([
            "crossbot",
            "--pair",
            "REP/USD",
            "--venues",
            "coinbase,binance",
        ]);
        assert!(cli.validate().is_ok());
        assert_eq!(cli.parsed_pair().unwrap().to_string(), "REP/USD");
    }
}
