//! Runtime configuration
//!
//! Layered the usual way: built-in defaults, then an optional TOML file, then
//! environment variable overrides. Raw fields stay as strings/integers so the
//! file format is friendly; typed views (`Duration`, `U256`, the quarantine
//! policy) are derived through accessor methods.

use alloy_primitives::{Address, U256};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::quarantine::{QuarantineCode, QuarantinePolicy};

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ========== Network Settings ==========
    /// RPC URL of a node that supports `eth_simulateV1`
    pub rpc_url: String,

    /// Chain ID (1 = Ethereum Mainnet)
    pub chain_id: u64,

    // ========== Simulation Settings ==========
    /// Upper bound on one batched simulation round trip, in milliseconds
    pub call_timeout_ms: u64,

    /// Start sessions with rich-mode funding enabled
    pub rich_mode: bool,

    /// ETH granted per rich-mode funding transaction
    pub rich_mode_amount_eth: u64,

    // ========== Quarantine Settings ==========
    /// Spender addresses (hex) the user vouches for
    pub trusted_spenders: Vec<String>,

    /// Quarantine codes to switch off, by config key
    /// (e.g. "unlimited-approval")
    pub disabled_quarantine_codes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://eth.llamarpc.com".to_string(),
            chain_id: 1,
            call_timeout_ms: 20_000,
            rich_mode: false,
            rich_mode_amount_eth: 200,
            trusted_spenders: vec![],
            disabled_quarantine_codes: vec![],
        }
    }
}

impl Config {
    /// Defaults, optional TOML file, then environment overrides
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path)?,
            Some(path) => {
                warn!(path = %path.as_ref().display(), "config file not found; using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("RPC_URL") {
            self.rpc_url = url;
        }
        if let Ok(id) = env::var("CHAIN_ID") {
            self.chain_id = id.parse().unwrap_or(self.chain_id);
        }
        if let Ok(ms) = env::var("CALL_TIMEOUT_MS") {
            self.call_timeout_ms = ms.parse().unwrap_or(self.call_timeout_ms);
        }
        if let Ok(on) = env::var("RICH_MODE") {
            self.rich_mode = on.parse().unwrap_or(self.rich_mode);
        }
        if let Ok(amount) = env::var("RICH_MODE_AMOUNT_ETH") {
            self.rich_mode_amount_eth = amount.parse().unwrap_or(self.rich_mode_amount_eth);
        }
        if let Ok(list) = env::var("TRUSTED_SPENDERS") {
            self.trusted_spenders = list.split(',').map(String::from).collect();
        }
        if let Ok(list) = env::var("DISABLED_QUARANTINE_CODES") {
            self.disabled_quarantine_codes = list.split(',').map(String::from).collect();
        }
    }

    /// Reject configurations that cannot produce a working session
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre!("invalid RPC_URL - set a node URL that supports eth_simulateV1"));
        }
        if self.call_timeout_ms < 1_000 {
            return Err(eyre!(
                "CALL_TIMEOUT_MS below 1000ms will abort almost every simulation (currently {}ms)",
                self.call_timeout_ms
            ));
        }
        if self.rich_mode_amount_eth == 0 {
            return Err(eyre!("RICH_MODE_AMOUNT_ETH must be positive"));
        }
        for raw in &self.trusted_spenders {
            Address::from_str(raw)
                .map_err(|_| eyre!("invalid trusted spender address '{raw}'"))?;
        }
        for raw in &self.disabled_quarantine_codes {
            raw.parse::<QuarantineCode>().map_err(|e| eyre!(e))?;
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Rich-mode grant in wei
    pub fn donor_amount(&self) -> U256 {
        U256::from(self.rich_mode_amount_eth) * U256::from(10u8).pow(U256::from(18))
    }

    /// Quarantine policy derived from the raw string fields. Unparseable
    /// entries are skipped with a warning; `validate()` catches them upfront
    /// for callers that want hard failure instead.
    pub fn policy(&self) -> QuarantinePolicy {
        let trusted_spenders: HashSet<Address> = self
            .trusted_spenders
            .iter()
            .filter_map(|raw| match Address::from_str(raw) {
                Ok(address) => Some(address),
                Err(_) => {
                    warn!(%raw, "skipping unparseable trusted spender");
                    None
                }
            })
            .collect();
        let disabled: HashSet<QuarantineCode> = self
            .disabled_quarantine_codes
            .iter()
            .filter_map(|raw| match raw.parse() {
                Ok(code) => Some(code),
                Err(_) => {
                    warn!(%raw, "skipping unknown quarantine code");
                    None
                }
            })
            .collect();
        QuarantinePolicy { trusted_spenders, disabled, ..Default::default() }
    }
}

// ============================================
// TESTS
// ============================================
