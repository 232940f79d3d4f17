use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use pc_api_types::{
    AllowanceResponse, ApproveRequest, FieldError, TokenBalanceResponse, TokenInfoResponse, TransferFromRequest,
    TransferRequest, TxState, TxStatusResponse, WalletAccount,
};
use pc_crypto::{contract_address, h160_hex};
use pc_token_client::{FieldResult, TokenSnapshot, TxStatus};
use primitive_types::{H160, U256};
use serde::Deserialize;
use std::sync::Arc;

use crate::{ApiResult, AppState, ErrorResponse, bad_request, conflict, internal_error};

#[derive(Debug, Deserialize)]
pub(crate) struct OwnerQuery {
    owner: Option<String>,
}

async fn require_account(state: &AppState) -> Result<WalletAccount, (StatusCode, Json<ErrorResponse>)> {
    state
        .session
        .selected_account()
        .await
        .ok_or_else(|| conflict("connect a wallet and select an account first"))
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, (StatusCode, Json<ErrorResponse>)> {
    let value = value.trim();
    if value.is_empty() {
        return Err(bad_request(&format!("{field} is required")));
    }
    Ok(value)
}

fn parse_address(field: &str, value: &str) -> Result<H160, (StatusCode, Json<ErrorResponse>)> {
    let value = required(field, value)?;
    contract_address(value).map_err(|err| bad_request(&format!("{field} is not a valid address: {err}")))
}

fn parse_amount(value: &str) -> Result<U256, (StatusCode, Json<ErrorResponse>)> {
    let value = required("amount", value)?;
    U256::from_dec_str(value).map_err(|_| bad_request("amount must be a non-negative decimal integer"))
}

fn field_value<T: ToString>(field: &str, result: &FieldResult<T>, errors: &mut Vec<FieldError>) -> Option<String> {
    if let Some(error) = result.error() {
        errors.push(FieldError {
            field: field.to_owned(),
            error: error.to_owned(),
        });
    }
    result.value().map(ToString::to_string)
}

fn token_response(contract: &H160, account: &WalletAccount, snapshot: TokenSnapshot) -> TokenInfoResponse {
    let mut field_errors = Vec::new();
    let metadata = &snapshot.metadata;
    let name = field_value("name", &metadata.name, &mut field_errors);
    let symbol = field_value("symbol", &metadata.symbol, &mut field_errors);
    let decimals = field_value("decimals", &metadata.decimals, &mut field_errors);

    TokenInfoResponse {
        contract: h160_hex(contract),
        account: account.address.clone(),
        name,
        symbol,
        decimals,
        total_supply: snapshot.total_supply.map(|supply| supply.to_string()),
        field_errors,
    }
}

fn tx_response(status: TxStatus) -> TxStatusResponse {
    let blank = |status| TxStatusResponse {
        status,
        tx_hash: None,
        reason: None,
        contract_address: None,
    };

    match status {
        TxStatus::Submitted { tx_hash } => TxStatusResponse {
            tx_hash: Some(tx_hash),
            ..blank(TxState::Submitted)
        },
        TxStatus::Failed { tx_hash, reason } => TxStatusResponse {
            tx_hash,
            reason: Some(reason),
            ..blank(TxState::Failed)
        },
        TxStatus::NoSigner => TxStatusResponse {
            reason: Some("no signer available for the selected account".to_owned()),
            ..blank(TxState::NoSigner)
        },
        TxStatus::InsufficientAllowance { allowance, requested } => TxStatusResponse {
            reason: Some(format!("allowance {allowance} is below the requested {requested}")),
            ..blank(TxState::InsufficientAllowance)
        },
        TxStatus::Instantiated { tx_hash, contract } => TxStatusResponse {
            tx_hash: Some(tx_hash),
            contract_address: Some(h160_hex(&contract)),
            ..blank(TxState::Instantiated)
        },
    }
}

pub(crate) async fn token_info(State(state): State<Arc<AppState>>) -> ApiResult<TokenInfoResponse> {
    let account = require_account(&state).await?;

    let snapshot = state
        .view
        .refresh_token(&state.client, &account)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| conflict("token refresh was superseded by a newer request"))?;

    Ok(Json(token_response(&state.client.config().contract, &account, snapshot)))
}

/// Allowance `owner` granted to the selected account.
pub(crate) async fn allowance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<AllowanceResponse> {
    let owner = parse_address("owner", query.owner.as_deref().unwrap_or_default())?;
    let account = require_account(&state).await?;
    let spender = contract_address(&account.address).map_err(internal_error)?;

    let amount = state
        .view
        .refresh_allowance(&state.client, owner, &account)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| conflict("allowance refresh was superseded by a newer request"))?;

    Ok(Json(AllowanceResponse {
        owner: h160_hex(&owner),
        spender: h160_hex(&spender),
        amount: amount.to_string(),
    }))
}

/// Defaults to the selected account's own balance.
pub(crate) async fn balance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<TokenBalanceResponse> {
    let account = require_account(&state).await?;
    let owner = match query.owner.as_deref().map(str::trim).filter(|owner| !owner.is_empty()) {
        Some(owner) => parse_address("owner", owner)?,
        None => contract_address(&account.address).map_err(internal_error)?,
    };

    let amount = state
        .client
        .fetch_balance(owner, &account)
        .await
        .map_err(internal_error)?;

    Ok(Json(TokenBalanceResponse {
        owner: h160_hex(&owner),
        amount: amount.to_string(),
    }))
}

pub(crate) async fn transfer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<TxStatusResponse> {
    let to = parse_address("to", &request.to)?;
    let amount = parse_amount(&request.amount)?;
    let account = require_account(&state).await?;

    let status = state.client.transfer_token(to, amount, &account).await;
    Ok(Json(tx_response(status)))
}

pub(crate) async fn transfer_from(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TransferFromRequest>,
) -> ApiResult<TxStatusResponse> {
    let owner = parse_address("owner", &request.owner)?;
    let to = parse_address("to", &request.to)?;
    let amount = parse_amount(&request.amount)?;
    let account = require_account(&state).await?;

    let status = state.client.transfer_from(owner, to, amount, &account).await;
    Ok(Json(tx_response(status)))
}

pub(crate) async fn approve(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<TxStatusResponse> {
    let spender = parse_address("spender", &request.spender)?;
    let amount = parse_amount(&request.amount)?;
    let account = require_account(&state).await?;

    let status = state.client.approve(spender, amount, &account).await;
    Ok(Json(tx_response(status)))
}

pub(crate) async fn deploy(State(state): State<Arc<AppState>>) -> ApiResult<TxStatusResponse> {
    let account = require_account(&state).await?;
    let status = state.client.deploy_new_token(&account).await;
    Ok(Json(tx_response(status)))
}
