//! Client for the PSP22 token contract the console is built around.
//!
//! `TokenClient` owns the lazily created chain connection and turns
//! high-level token operations into contract queries and signed calls.
//! Reads return `anyhow::Result`; writes always return a `TxStatus` so the
//! caller can report what happened without treating rejections as errors.

pub mod artifact;
pub mod tracked;

use anyhow::{Result, anyhow, bail};
use pc_api_types::WalletAccount;
use pc_chain_client::{
    CallOutcome, ContractRuntime, ContractValue, InstantiateRequest, Psp22Constructor, Psp22Message, QUERY_ORIGIN,
    RuntimeConnector, SubmitCallRequest,
};
use pc_crypto::{Signer, contract_address, decode_u256_words, h160_hex};
use pc_wallet_session::SignerSource;
use primitive_types::{H160, U256};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub use artifact::{ArtifactSource, FsArtifactSource, HttpArtifactSource, artifact_source_for};
pub use tracked::{RefreshTicket, Tracked};

pub const DEPLOY_ARTIFACT_PATH: &str = "deployments/psp/psp_coin.polkavm";
pub const DEPLOY_INITIAL_SUPPLY: u64 = 15_653_200;

#[derive(Debug, Clone)]
pub struct TokenClientConfig {
    pub endpoint: String,
    pub contract: H160,
    pub query_origin: String,
    pub artifact_path: String,
}

impl TokenClientConfig {
    pub fn new(endpoint: &str, contract: &str) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.to_owned(),
            contract: contract_address(contract)?,
            query_origin: QUERY_ORIGIN.to_owned(),
            artifact_path: DEPLOY_ARTIFACT_PATH.to_owned(),
        })
    }
}

/// Result of reading one metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldResult<T> {
    Value(T),
    /// The contract answered but has no value for the field.
    Missing,
    Failed(String),
}

impl<T> FieldResult<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: FieldResult<String>,
    pub symbol: FieldResult<String>,
    pub decimals: FieldResult<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub metadata: TokenMetadata,
    pub total_supply: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Submitted { tx_hash: String },
    Failed { tx_hash: Option<String>, reason: String },
    /// No signer could be found for the account; nothing was sent.
    NoSigner,
    /// Advisory client-side check; nothing was sent.
    InsufficientAllowance { allowance: U256, requested: U256 },
    Instantiated { tx_hash: String, contract: H160 },
}

impl TxStatus {
    fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            tx_hash: None,
            reason: reason.into(),
        }
    }
}

pub struct TokenClient {
    config: TokenClientConfig,
    connector: Arc<dyn RuntimeConnector>,
    signers: Arc<dyn SignerSource>,
    artifacts: Arc<dyn ArtifactSource>,
    connection: OnceCell<Arc<dyn ContractRuntime>>,
}

impl TokenClient {
    pub fn new(
        config: TokenClientConfig,
        connector: Arc<dyn RuntimeConnector>,
        signers: Arc<dyn SignerSource>,
        artifacts: Arc<dyn ArtifactSource>,
    ) -> Self {
        Self {
            config,
            connector,
            signers,
            artifacts,
            connection: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &TokenClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Returns the shared connection, creating it on first use.
    ///
    /// Concurrent first callers wait on one initialization. A failed attempt
    /// is not remembered, so the next call tries again.
    pub async fn ensure_connection(&self) -> Result<Arc<dyn ContractRuntime>> {
        let runtime = self
            .connection
            .get_or_try_init(|| async {
                info!(endpoint = %self.config.endpoint, "opening contract connection");
                self.connector.connect(&self.config.endpoint).await
            })
            .await?;
        Ok(runtime.clone())
    }

    async fn query(&self, origin: &str, message: &Psp22Message) -> Result<CallOutcome> {
        let runtime = self.ensure_connection().await?;
        runtime.query(origin, &self.config.contract, message).await
    }

    pub async fn fetch_token_metadata(&self, account: &WalletAccount) -> Result<TokenMetadata> {
        let runtime = self.ensure_connection().await?;
        let origin = account.address.as_str();
        let contract = &self.config.contract;

        let (name, symbol, decimals) = tokio::join!(
            runtime.query(origin, contract, &Psp22Message::Name),
            runtime.query(origin, contract, &Psp22Message::Symbol),
            runtime.query(origin, contract, &Psp22Message::Decimals),
        );

        Ok(TokenMetadata {
            name: text_field("name", name),
            symbol: text_field("symbol", symbol),
            decimals: byte_field("decimals", decimals),
        })
    }

    /// `Ok(None)` when the contract reverted the query.
    pub async fn fetch_token_supply(&self) -> Result<Option<U256>> {
        match self.query(&self.config.query_origin, &Psp22Message::TotalSupply).await? {
            CallOutcome::Success(value) => Ok(Some(words(value)?)),
            CallOutcome::Reverted { reason } => {
                debug!(%reason, "total_supply query reverted");
                Ok(None)
            }
        }
    }

    /// Allowance `owner` granted to `spender`. A reverted query is an error,
    /// never a zero allowance.
    pub async fn fetch_allowance(&self, owner: H160, spender: H160, account: &WalletAccount) -> Result<U256> {
        match self
            .query(&account.address, &Psp22Message::Allowance { owner, spender })
            .await?
        {
            CallOutcome::Success(value) => words(value),
            CallOutcome::Reverted { reason } => Err(anyhow!("allowance query reverted: {reason}")),
        }
    }

    pub async fn fetch_balance(&self, owner: H160, account: &WalletAccount) -> Result<U256> {
        match self.query(&account.address, &Psp22Message::BalanceOf { owner }).await? {
            CallOutcome::Success(value) => words(value),
            CallOutcome::Reverted { reason } => Err(anyhow!("balance query reverted: {reason}")),
        }
    }

    pub async fn transfer_token(&self, to: H160, amount: U256, account: &WalletAccount) -> TxStatus {
        let Some(signer) = self.signers.signer_for(account).await else {
            warn!(account = %account.address, "no signer for account; transfer skipped");
            return TxStatus::NoSigner;
        };

        let message = Psp22Message::Transfer {
            to,
            value: amount,
            data: Vec::new(),
        };
        self.send(account, signer.as_ref(), message).await
    }

    /// Moves `amount` from `owner` to `receiver` using the allowance `owner`
    /// granted to the account.
    pub async fn transfer_from(&self, owner: H160, receiver: H160, amount: U256, account: &WalletAccount) -> TxStatus {
        let Some(signer) = self.signers.signer_for(account).await else {
            warn!(account = %account.address, "no signer for account; transfer_from skipped");
            return TxStatus::NoSigner;
        };

        let spender = match contract_address(&account.address) {
            Ok(spender) => spender,
            Err(err) => return TxStatus::failed(format!("{err:#}")),
        };

        let allowance = match self.fetch_allowance(owner, spender, account).await {
            Ok(allowance) => allowance,
            Err(err) => {
                warn!("allowance check failed: {err:#}");
                return TxStatus::failed(format!("{err:#}"));
            }
        };
        if allowance < amount {
            return TxStatus::InsufficientAllowance {
                allowance,
                requested: amount,
            };
        }

        let message = Psp22Message::TransferFrom {
            from: owner,
            to: receiver,
            value: amount,
            data: Vec::new(),
        };
        self.send(account, signer.as_ref(), message).await
    }

    pub async fn approve(&self, spender: H160, amount: U256, account: &WalletAccount) -> TxStatus {
        let Some(signer) = self.signers.signer_for(account).await else {
            warn!(account = %account.address, "no signer for account; approve skipped");
            return TxStatus::NoSigner;
        };

        let message = Psp22Message::Approve { spender, value: amount };
        self.send(account, signer.as_ref(), message).await
    }

    async fn send(&self, account: &WalletAccount, signer: &dyn Signer, message: Psp22Message) -> TxStatus {
        let runtime = match self.ensure_connection().await {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!("contract connection unavailable: {err:#}");
                return TxStatus::failed(format!("{err:#}"));
            }
        };

        let label = message.label();
        let request = SubmitCallRequest {
            origin: account.address.clone(),
            contract: self.config.contract,
            message,
        };

        match runtime.submit(request, signer).await {
            Ok(result) if result.accepted => {
                info!(call = label, tx_hash = %result.tx_hash, "call successful");
                TxStatus::Submitted {
                    tx_hash: result.tx_hash,
                }
            }
            Ok(result) => {
                let reason = result
                    .dispatch_error
                    .unwrap_or_else(|| "call was not accepted".to_owned());
                warn!(call = label, tx_hash = %result.tx_hash, %reason, "call failed");
                TxStatus::Failed {
                    tx_hash: Some(result.tx_hash),
                    reason,
                }
            }
            Err(err) => {
                warn!(call = label, "call failed: {err:#}");
                TxStatus::failed(format!("{err:#}"))
            }
        }
    }

    /// Instantiates a fresh copy of the token owned by `account`.
    pub async fn deploy_new_token(&self, account: &WalletAccount) -> TxStatus {
        let Some(signer) = self.signers.signer_for(account).await else {
            warn!(account = %account.address, "no signer for account; deploy skipped");
            return TxStatus::NoSigner;
        };

        match self.try_deploy(account, signer.as_ref()).await {
            Ok(status) => status,
            Err(err) => {
                warn!("error deploying contract: {err:#}");
                TxStatus::failed(format!("{err:#}"))
            }
        }
    }

    async fn try_deploy(&self, account: &WalletAccount, signer: &dyn Signer) -> Result<TxStatus> {
        let code = self.artifacts.load(&self.config.artifact_path).await?;
        let owner = contract_address(&account.address)?;
        let runtime = self.ensure_connection().await?;

        let request = InstantiateRequest {
            origin: account.address.clone(),
            code,
            constructor: Psp22Constructor::NewWithSupply {
                owner,
                total_supply: U256::from(DEPLOY_INITIAL_SUPPLY),
            },
            salt: None,
        };
        let result = runtime.instantiate(request, signer).await?;

        match (result.contract, result.dispatch_error) {
            (Some(contract), None) => {
                info!(contract = %h160_hex(&contract), tx_hash = %result.tx_hash, "deployed contract");
                Ok(TxStatus::Instantiated {
                    tx_hash: result.tx_hash,
                    contract,
                })
            }
            (_, reason) => {
                let reason = reason.unwrap_or_else(|| "instantiation returned no address".to_owned());
                warn!(tx_hash = %result.tx_hash, %reason, "deploy failed");
                Ok(TxStatus::Failed {
                    tx_hash: Some(result.tx_hash),
                    reason,
                })
            }
        }
    }
}

/// Token and allowance panels for the selected account.
#[derive(Default)]
pub struct TokenView {
    token: Tracked<String, TokenSnapshot>,
    allowance: Tracked<(H160, H160), U256>,
}

impl TokenView {
    /// Reloads metadata and supply for `account`. `Ok(None)` means a newer
    /// refresh started meanwhile and this result was dropped.
    pub async fn refresh_token(&self, client: &TokenClient, account: &WalletAccount) -> Result<Option<TokenSnapshot>> {
        let ticket = self.token.begin(account.address.clone()).await;
        let metadata = client.fetch_token_metadata(account).await?;
        let total_supply = client.fetch_token_supply().await?;
        let snapshot = TokenSnapshot { metadata, total_supply };

        if self.token.apply(ticket, snapshot.clone()).await {
            Ok(Some(snapshot))
        } else {
            debug!(account = %account.address, "discarding superseded token refresh");
            Ok(None)
        }
    }

    pub async fn refresh_allowance(
        &self,
        client: &TokenClient,
        owner: H160,
        account: &WalletAccount,
    ) -> Result<Option<U256>> {
        let spender = contract_address(&account.address)?;
        let ticket = self.allowance.begin((owner, spender)).await;
        let allowance = client.fetch_allowance(owner, spender, account).await?;

        if self.allowance.apply(ticket, allowance).await {
            Ok(Some(allowance))
        } else {
            debug!(owner = %h160_hex(&owner), "discarding superseded allowance refresh");
            Ok(None)
        }
    }

    pub async fn token(&self) -> Option<(String, TokenSnapshot)> {
        self.token.current().await
    }

    pub async fn allowance(&self) -> Option<((H160, H160), U256)> {
        self.allowance.current().await
    }

    pub async fn clear(&self) {
        self.token.clear().await;
        self.allowance.clear().await;
    }
}

fn words(value: ContractValue) -> Result<U256> {
    match value {
        ContractValue::Words(words) => Ok(decode_u256_words(words)),
        other => bail!("expected a U256 return value, got {other:?}"),
    }
}

fn text_field(field: &str, result: Result<CallOutcome>) -> FieldResult<String> {
    match result {
        Ok(CallOutcome::Success(ContractValue::OptionalText(Some(text)))) => FieldResult::Value(text),
        Ok(CallOutcome::Success(ContractValue::OptionalText(None))) => FieldResult::Missing,
        Ok(CallOutcome::Success(other)) => FieldResult::Failed(format!("unexpected {field} value {other:?}")),
        Ok(CallOutcome::Reverted { reason }) => {
            debug!(field, %reason, "metadata query reverted");
            FieldResult::Failed(reason)
        }
        Err(err) => {
            debug!(field, "metadata query failed: {err:#}");
            FieldResult::Failed(format!("{err:#}"))
        }
    }
}

fn byte_field(field: &str, result: Result<CallOutcome>) -> FieldResult<u8> {
    match result {
        Ok(CallOutcome::Success(ContractValue::Byte(byte))) => FieldResult::Value(byte),
        Ok(CallOutcome::Success(other)) => FieldResult::Failed(format!("unexpected {field} value {other:?}")),
        Ok(CallOutcome::Reverted { reason }) => {
            debug!(field, %reason, "metadata query reverted");
            FieldResult::Failed(reason)
        }
        Err(err) => {
            debug!(field, "metadata query failed: {err:#}");
            FieldResult::Failed(format!("{err:#}"))
        }
    }
}
