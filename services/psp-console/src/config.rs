use anyhow::{Context, Result};
use pc_chain_client::{DEFAULT_RPC_URL, PSP_COIN_ADDRESS};
use pc_wallet_session::DEFAULT_DAPP_NAME;
use std::env;
use std::net::SocketAddr;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_ARTIFACTS: &str = ".";
const DEFAULT_KEYRING: &str = "Alice=//Alice,Bob=//Bob";

#[derive(Debug, Clone)]
pub(crate) struct ConsoleConfig {
    pub(crate) bind: SocketAddr,
    pub(crate) rpc_url: String,
    pub(crate) contract: String,
    /// RocksDB directory for the remembered wallet; in-memory when unset.
    pub(crate) db_path: Option<String>,
    /// Directory or `http(s)://` base the deploy artifact is loaded from.
    pub(crate) artifacts: String,
    pub(crate) dapp_name: String,
    pub(crate) keyring: String,
}

impl ConsoleConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str, default: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        let bind = value("PSP_CONSOLE_BIND", DEFAULT_BIND);
        let bind = bind
            .parse::<SocketAddr>()
            .with_context(|| format!("PSP_CONSOLE_BIND is not a socket address: {bind}"))?;

        Ok(Self {
            bind,
            rpc_url: value("PSP_CONSOLE_RPC_URL", DEFAULT_RPC_URL),
            contract: value("PSP_CONSOLE_CONTRACT", PSP_COIN_ADDRESS),
            db_path: lookup("PSP_CONSOLE_DB_PATH")
                .map(|path| path.trim().to_owned())
                .filter(|path| !path.is_empty()),
            artifacts: value("PSP_CONSOLE_ARTIFACTS", DEFAULT_ARTIFACTS),
            dapp_name: value("PSP_CONSOLE_DAPP_NAME", DEFAULT_DAPP_NAME),
            keyring: value("PSP_CONSOLE_KEYRING", DEFAULT_KEYRING),
        })
    }
}
