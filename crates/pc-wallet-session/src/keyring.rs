//! Wallet extension backed by locally held ed25519 keys.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use pc_api_types::{ExtensionInfo, WalletAccount};
use pc_crypto::{Ed25519Signer, Signer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use zeroize::Zeroizing;

use crate::WalletExtension;

pub const KEYRING_EXTENSION_NAME: &str = "psp-console-keyring";

struct KeyringEntry {
    name: String,
    address: String,
    signer: Arc<Ed25519Signer>,
}

pub struct LocalKeyring {
    info: ExtensionInfo,
    entries: Vec<KeyringEntry>,
    enabled: AtomicBool,
    locked: AtomicBool,
}

impl Default for LocalKeyring {
    fn default() -> Self {
        Self::new(KEYRING_EXTENSION_NAME, "Local Keyring")
    }
}

impl LocalKeyring {
    pub fn new(extension_name: &str, title: &str) -> Self {
        Self {
            info: ExtensionInfo {
                extension_name: extension_name.to_owned(),
                title: title.to_owned(),
                icon_url: None,
            },
            entries: Vec::new(),
            enabled: AtomicBool::new(false),
            locked: AtomicBool::new(false),
        }
    }

    pub fn with_account(mut self, name: &str, signer: Ed25519Signer) -> Self {
        self.entries.push(KeyringEntry {
            name: name.to_owned(),
            address: signer.ss58_address(),
            signer: Arc::new(signer),
        });
        self
    }

    /// Parses `Name=//seed` pairs separated by commas, e.g. `Alice=//Alice,Bob=//Bob`.
    pub fn with_dev_accounts(mut self, accounts: &str) -> Result<Self> {
        for pair in accounts.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let (name, phrase) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("keyring entry '{pair}' must look like Name=//seed"))?;
            let name = name.trim();
            if name.is_empty() {
                bail!("keyring entry '{pair}' has no account name");
            }
            let phrase = Zeroizing::new(phrase.trim().to_owned());
            self = self.with_account(name, Ed25519Signer::from_seed_phrase(&phrase)?);
        }
        Ok(self)
    }

    /// A locked keyring refuses to be enabled, like an extension whose user
    /// dismissed the authorization popup.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
        if locked {
            self.enabled.store(false, Ordering::SeqCst);
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.address.clone()).collect()
    }
}

#[async_trait]
impl WalletExtension for LocalKeyring {
    fn info(&self) -> ExtensionInfo {
        self.info.clone()
    }

    async fn enable(&self, dapp_name: &str) -> Result<()> {
        if self.locked.load(Ordering::SeqCst) {
            bail!("{} rejected the request from {dapp_name}", self.info.title);
        }
        self.enabled.store(true, Ordering::SeqCst);
        info!(extension = %self.info.extension_name, dapp = dapp_name, "keyring enabled");
        Ok(())
    }

    async fn get_accounts(&self) -> Result<Vec<WalletAccount>> {
        if !self.enabled.load(Ordering::SeqCst) {
            bail!("{} has not been enabled", self.info.title);
        }

        Ok(self
            .entries
            .iter()
            .map(|entry| WalletAccount {
                address: entry.address.clone(),
                name: Some(entry.name.clone()),
                extension_name: self.info.extension_name.clone(),
            })
            .collect())
    }

    async fn signer(&self, address: &str) -> Option<Arc<dyn Signer>> {
        if !self.enabled.load(Ordering::SeqCst) {
            return None;
        }

        self.entries
            .iter()
            .find(|entry| entry.address == address)
            .map(|entry| {
                let signer: Arc<dyn Signer> = entry.signer.clone();
                signer
            })
    }
}
