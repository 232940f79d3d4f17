use axum::{Json, extract::State};
use pc_api_types::{ConnectRequest, ConnectResponse, SessionState, SwitchAccountRequest, WalletListResponse};
use pc_wallet_session::ConnectOutcome;
use std::sync::Arc;

use crate::{ApiResult, AppState, bad_request};

pub(crate) async fn list_wallets(State(state): State<Arc<AppState>>) -> Json<WalletListResponse> {
    Json(WalletListResponse {
        wallets: state.session.list_extensions(),
    })
}

pub(crate) async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionState> {
    Json(state.session.snapshot().await)
}

/// Connect failures are reported in the body with 200; only a malformed
/// request is a client error.
pub(crate) async fn connect(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<ConnectResponse> {
    let extension_name = request.extension_name.trim();
    if extension_name.is_empty() {
        return Err(bad_request("extension_name is required"));
    }

    let outcome = state.session.connect(extension_name).await;
    if matches!(outcome, ConnectOutcome::Connected { .. }) {
        state.view.clear().await;
    }

    let reason = match &outcome {
        ConnectOutcome::Failed { reason } => Some(reason.clone()),
        _ => None,
    };

    Ok(Json(ConnectResponse {
        outcome: outcome.as_str().to_owned(),
        reason,
        session: state.session.snapshot().await,
    }))
}

pub(crate) async fn disconnect(State(state): State<Arc<AppState>>) -> Json<SessionState> {
    state.session.disconnect().await;
    state.view.clear().await;
    Json(state.session.snapshot().await)
}

pub(crate) async fn switch_account(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SwitchAccountRequest>,
) -> ApiResult<SessionState> {
    let address = request.address.trim();
    if address.is_empty() {
        return Err(bad_request("address is required"));
    }

    state
        .session
        .switch_account(address)
        .await
        .map_err(|err| bad_request(&err.to_string()))?;

    Ok(Json(state.session.snapshot().await))
}
