//! Wallet session: which extension is active, the accounts it exposes and
//! the account the user picked.
//!
//! A `WalletSession` is an owned object; the HTTP layer keeps one in its
//! state and every mutation goes through it. The state lock is never held
//! while an extension call is awaited, so `connecting` is observable while
//! an extension shows its authorization prompt.
//!
//! The in-flight marker lives outside the state lock and is cleared by a
//! drop guard, so a connect whose future is dropped mid-prompt does not
//! wedge the session. A disconnect issued while a connect is pending bumps
//! the session generation and the pending connect discards its result.

pub mod keyring;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use pc_api_types::{ExtensionInfo, SessionState, WalletAccount};
use pc_crypto::Signer;
use pc_storage::{SessionStore, StoredExtension};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use keyring::{KEYRING_EXTENSION_NAME, LocalKeyring};

pub const DEFAULT_DAPP_NAME: &str = "psp-console";

#[async_trait]
pub trait WalletExtension: Send + Sync {
    fn info(&self) -> ExtensionInfo;
    async fn enable(&self, dapp_name: &str) -> Result<()>;
    async fn get_accounts(&self) -> Result<Vec<WalletAccount>>;
    async fn signer(&self, address: &str) -> Option<Arc<dyn Signer>>;
}

/// Resolves the signing capability for an account.
#[async_trait]
pub trait SignerSource: Send + Sync {
    async fn signer_for(&self, account: &WalletAccount) -> Option<Arc<dyn Signer>>;
}

#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn WalletExtension>>,
}

impl ExtensionRegistry {
    pub fn register(&mut self, extension: Arc<dyn WalletExtension>) {
        let name = extension.info().extension_name;
        self.extensions.retain(|existing| existing.info().extension_name != name);
        self.extensions.push(extension);
    }

    pub fn list(&self) -> Vec<ExtensionInfo> {
        self.extensions.iter().map(|extension| extension.info()).collect()
    }

    pub fn find(&self, extension_name: &str) -> Option<Arc<dyn WalletExtension>> {
        self.extensions
            .iter()
            .find(|extension| extension.info().extension_name == extension_name)
            .cloned()
    }
}

#[async_trait]
impl SignerSource for ExtensionRegistry {
    async fn signer_for(&self, account: &WalletAccount) -> Option<Arc<dyn Signer>> {
        let extension = self.find(&account.extension_name)?;
        extension.signer(&account.address).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { accounts: usize },
    AlreadyConnecting,
    Failed { reason: String },
}

impl ConnectOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::AlreadyConnecting => "already_connecting",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Clears the in-flight marker when the owning connect finishes or is dropped.
struct ConnectingGuard<'a> {
    slot: &'a Mutex<Option<String>>,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct WalletSession<S> {
    dapp_name: String,
    registry: Arc<ExtensionRegistry>,
    store: S,
    state: RwLock<SessionState>,
    connecting: Mutex<Option<String>>,
    generation: AtomicU64,
}

impl<S> WalletSession<S>
where
    S: SessionStore,
{
    pub fn new(dapp_name: &str, registry: Arc<ExtensionRegistry>, store: S) -> Self {
        Self {
            dapp_name: dapp_name.to_owned(),
            registry,
            store,
            state: RwLock::new(SessionState::default()),
            connecting: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> Arc<ExtensionRegistry> {
        self.registry.clone()
    }

    pub fn list_extensions(&self) -> Vec<ExtensionInfo> {
        self.registry.list()
    }

    pub async fn snapshot(&self) -> SessionState {
        let mut state = self.state.read().await.clone();
        state.connecting = self.in_flight();
        state
    }

    fn in_flight(&self) -> Option<String> {
        self.connecting.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn selected_account(&self) -> Option<WalletAccount> {
        self.state.read().await.selected_account.clone()
    }

    /// Enables `extension_name`, loads its accounts and selects the first one.
    ///
    /// Failures are logged and leave the session disconnected; they are
    /// reported through the outcome, never as an error.
    pub async fn connect(&self, extension_name: &str) -> ConnectOutcome {
        let _in_flight = {
            let mut slot = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return ConnectOutcome::AlreadyConnecting;
            }
            *slot = Some(extension_name.to_owned());
            ConnectingGuard { slot: &self.connecting }
        };
        let generation = self.generation.load(Ordering::SeqCst);

        match self.try_connect(extension_name, generation).await {
            Ok(accounts) => ConnectOutcome::Connected { accounts },
            Err(err) => {
                warn!(extension = extension_name, "error connecting to wallet: {err:#}");
                self.reset().await;
                ConnectOutcome::Failed {
                    reason: format!("{err:#}"),
                }
            }
        }
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.generation.load(Ordering::SeqCst) != generation {
            bail!("connect superseded by disconnect");
        }
        Ok(())
    }

    async fn try_connect(&self, extension_name: &str, generation: u64) -> Result<usize> {
        let extension = self
            .registry
            .find(extension_name)
            .ok_or_else(|| anyhow!("wallet extension '{extension_name}' is not installed"))?;

        extension
            .enable(&self.dapp_name)
            .await
            .with_context(|| format!("enable {extension_name}"))?;
        let accounts = extension
            .get_accounts()
            .await
            .with_context(|| format!("list accounts of {extension_name}"))?;

        let info = extension.info();
        let count = accounts.len();
        {
            let mut guard = self.state.write().await;
            self.ensure_current(generation)?;
            guard.selected_account = accounts.first().cloned();
            guard.accounts = accounts;
            guard.active_extension = Some(info.clone());
        }

        let record = StoredExtension {
            extension_name: info.extension_name.clone(),
            title: info.title.clone(),
        };
        if let Err(err) = self.store.save_active_extension(&record).await {
            warn!(extension = extension_name, "failed to persist active wallet: {err:#}");
        }
        self.ensure_current(generation)?;

        info!(extension = extension_name, accounts = count, "wallet connected");
        Ok(count)
    }

    /// Also abandons a connect that is still waiting on its extension.
    pub async fn disconnect(&self) {
        if self.state.read().await.active_extension.is_none() && self.in_flight().is_none() {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.reset().await;
        info!("wallet disconnected");
    }

    async fn reset(&self) {
        {
            let mut guard = self.state.write().await;
            guard.active_extension = None;
            guard.accounts.clear();
            guard.selected_account = None;
        }
        if let Err(err) = self.store.clear_active_extension().await {
            warn!("failed to clear persisted wallet: {err:#}");
        }
    }

    /// Selects one of the accounts exposed by the active extension.
    pub async fn switch_account(&self, address: &str) -> Result<WalletAccount> {
        let mut guard = self.state.write().await;
        let Some(account) = guard.accounts.iter().find(|account| account.address == address).cloned() else {
            bail!("account {address} is not exposed by the active wallet");
        };
        guard.selected_account = Some(account.clone());
        Ok(account)
    }

    /// Reconnects the extension remembered from a previous run.
    ///
    /// Returns `None` when there was nothing to restore.
    pub async fn rehydrate(&self) -> Option<ConnectOutcome> {
        let stored = match self.store.load_active_extension().await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(err) => {
                warn!("failed to read persisted wallet: {err:#}");
                return None;
            }
        };

        if self.state.read().await.active_extension.is_some() {
            return None;
        }

        if self.registry.find(&stored.extension_name).is_none() {
            info!(extension = %stored.extension_name, "persisted wallet no longer installed");
            if let Err(err) = self.store.clear_active_extension().await {
                warn!("failed to clear persisted wallet: {err:#}");
            }
            return None;
        }

        Some(self.connect(&stored.extension_name).await)
    }
}
