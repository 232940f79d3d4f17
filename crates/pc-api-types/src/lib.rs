use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub extension_name: String,
    pub title: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

/// An account exposed by a wallet extension. `address` is SS58 text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletAccount {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    pub extension_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    pub active_extension: Option<ExtensionInfo>,
    pub accounts: Vec<WalletAccount>,
    pub selected_account: Option<WalletAccount>,
    /// Name of the extension a connect is in flight for.
    pub connecting: Option<String>,
}

impl SessionState {
    pub fn is_disconnected(&self) -> bool {
        self.active_extension.is_none() && self.accounts.is_empty() && self.selected_account.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletListResponse {
    pub wallets: Vec<ExtensionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub extension_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub outcome: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub session: SessionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchAccountRequest {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfoResponse {
    pub contract: String,
    pub account: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<String>,
    pub total_supply: Option<String>,
    /// Per-field read failures, e.g. `("symbol", "contract reverted")`.
    #[serde(default)]
    pub field_errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowanceResponse {
    pub owner: String,
    pub spender: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalanceResponse {
    pub owner: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub to: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFromRequest {
    pub owner: String,
    pub to: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub spender: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Submitted,
    Failed,
    NoSigner,
    InsufficientAllowance,
    Instantiated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxStatusResponse {
    pub status: TxState,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
}
