use anyhow::Result;
use async_trait::async_trait;
use pc_crypto::{Signer, h160_hex, keccak256};
use primitive_types::{H160, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_RPC_URL: &str = "wss://testnet-passet-hub.polkadot.io";
pub const PSP_COIN_ADDRESS: &str = "0xC139114BB0199171a12b39ba4a0A818eF637F840";

/// Origin used for read-only calls whose result does not depend on the caller.
pub const QUERY_ORIGIN: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum Psp22Message {
    TotalSupply,
    BalanceOf { owner: H160 },
    Allowance { owner: H160, spender: H160 },
    Transfer { to: H160, value: U256, data: Vec<u8> },
    TransferFrom { from: H160, to: H160, value: U256, data: Vec<u8> },
    Approve { spender: H160, value: U256 },
    IncreaseAllowance { spender: H160, delta_value: U256 },
    DecreaseAllowance { spender: H160, delta_value: U256 },
    /// Credits `value` to the caller.
    Mint { value: U256 },
    /// Destroys `value` of the caller's balance.
    Burn { value: U256 },
    Name,
    Symbol,
    Decimals,
}

impl Psp22Message {
    pub fn label(&self) -> &'static str {
        match self {
            Self::TotalSupply => "PSP22::total_supply",
            Self::BalanceOf { .. } => "PSP22::balance_of",
            Self::Allowance { .. } => "PSP22::allowance",
            Self::Transfer { .. } => "PSP22::transfer",
            Self::TransferFrom { .. } => "PSP22::transfer_from",
            Self::Approve { .. } => "PSP22::approve",
            Self::IncreaseAllowance { .. } => "PSP22::increase_allowance",
            Self::DecreaseAllowance { .. } => "PSP22::decrease_allowance",
            Self::Mint { .. } => "PSP22Mintable::mint",
            Self::Burn { .. } => "PSP22Burnable::burn",
            Self::Name => "PSP22Metadata::name",
            Self::Symbol => "PSP22Metadata::symbol",
            Self::Decimals => "PSP22Metadata::decimals",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Transfer { .. }
                | Self::TransferFrom { .. }
                | Self::Approve { .. }
                | Self::IncreaseAllowance { .. }
                | Self::DecreaseAllowance { .. }
                | Self::Mint { .. }
                | Self::Burn { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "constructor", rename_all = "snake_case")]
pub enum Psp22Constructor {
    New,
    NewWithSupply { owner: H160, total_supply: U256 },
}

impl Psp22Constructor {
    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::NewWithSupply { .. } => "new_with_supply",
        }
    }
}

/// Errors a PSP22 contract returns from its messages.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Psp22Error {
    #[error("{0}")]
    Custom(String),
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("insufficient allowance")]
    InsufficientAllowance,
    #[error("zero recipient address")]
    ZeroRecipientAddress,
    #[error("zero sender address")]
    ZeroSenderAddress,
    #[error("safe transfer check failed: {0}")]
    SafeTransferCheckFailed(String),
}

/// A decoded message return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractValue {
    /// U256 in the contract's four-word little-endian layout.
    Words([u64; 4]),
    OptionalText(Option<String>),
    Byte(u8),
    Unit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(ContractValue),
    Reverted { reason: String },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone)]
pub struct SubmitCallRequest {
    pub origin: String,
    pub contract: H160,
    pub message: Psp22Message,
}

#[derive(Serialize)]
struct CallPayload<'a> {
    origin: &'a str,
    contract: String,
    call: &'a Psp22Message,
}

impl SubmitCallRequest {
    /// Bytes the origin's signer commits to.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&CallPayload {
            origin: &self.origin,
            contract: h160_hex(&self.contract),
            call: &self.message,
        })?)
    }
}

#[derive(Debug, Clone)]
pub struct SubmitTxResult {
    pub tx_hash: String,
    pub accepted: bool,
    pub dispatch_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InstantiateRequest {
    pub origin: String,
    pub code: Vec<u8>,
    pub constructor: Psp22Constructor,
    pub salt: Option<[u8; 32]>,
}

#[derive(Serialize)]
struct InstantiatePayload<'a> {
    origin: &'a str,
    code_hash: String,
    constructor: &'a Psp22Constructor,
    salt: Option<String>,
}

impl InstantiateRequest {
    pub fn code_hash(&self) -> [u8; 32] {
        keccak256(&self.code)
    }

    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&InstantiatePayload {
            origin: &self.origin,
            code_hash: format!("0x{}", hex::encode(self.code_hash())),
            constructor: &self.constructor,
            salt: self.salt.map(|salt| format!("0x{}", hex::encode(salt))),
        })?)
    }
}

#[derive(Debug, Clone)]
pub struct InstantiateResult {
    pub tx_hash: String,
    pub contract: Option<H160>,
    pub dispatch_error: Option<String>,
}

/// A live connection to a chain that hosts contracts.
#[async_trait]
pub trait ContractRuntime: Send + Sync {
    fn endpoint(&self) -> &str;
    async fn query(&self, origin: &str, contract: &H160, message: &Psp22Message) -> Result<CallOutcome>;
    async fn submit(&self, req: SubmitCallRequest, signer: &dyn Signer) -> Result<SubmitTxResult>;
    async fn instantiate(&self, req: InstantiateRequest, signer: &dyn Signer) -> Result<InstantiateResult>;
}

#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ContractRuntime>>;
}
