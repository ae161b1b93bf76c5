use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{LedgerError, Result};
use crate::services::flow::DEFAULT_FLOW_TIMEOUT;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Party the daemon acts as when a request names none.
    pub local_party: String,
    /// Network map. The notary is listed separately.
    pub parties: Vec<String>,
    pub notary: Option<String>,
    pub flow_timeout_secs: Option<u64>,
    pub strict_reply_signer: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub token: Option<String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| LedgerError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Four parties and a notary, all hosted in one process.
    pub fn default_local() -> Self {
        Self {
            local_party: "O=PartyA, L=Berlin, C=DE".to_string(),
            parties: ["PartyA", "PartyB", "PartyC", "PartyD"]
                .iter()
                .map(|name| format!("O={name}, L=Berlin, C=DE"))
                .collect(),
            notary: Some("O=Notary, L=London, C=GB".to_string()),
            flow_timeout_secs: None,
            strict_reply_signer: None,
            host: None,
            port: None,
            token: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.parties.is_empty() {
            return Err(LedgerError::Config("no parties configured".to_string()));
        }
        if self.local_party.trim().is_empty() {
            return Err(LedgerError::Config("local_party is empty".to_string()));
        }
        if let Some(notary) = &self.notary {
            if self.parties.contains(notary) {
                return Err(LedgerError::Config(format!(
                    "notary {notary} cannot also be a party"
                )));
            }
        }
        if self.flow_timeout_secs == Some(0) {
            return Err(LedgerError::Config(
                "flow_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flow_timeout(&self) -> Duration {
        self.flow_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_FLOW_TIMEOUT)
    }

    pub fn strict_reply_signer(&self) -> bool {
        self.strict_reply_signer.unwrap_or(false)
    }
}
