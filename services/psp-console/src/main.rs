mod config;
mod session;
mod token;

use anyhow::Context;
use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use config::ConsoleConfig;
use pc_chain_devnet::{DevnetConnector, DevnetRuntime, TokenSeed};
use pc_crypto::{contract_address, h160_hex};
use pc_storage::{InMemorySessionStore, RocksDbSessionStore, SessionStore};
use pc_token_client::{DEPLOY_INITIAL_SUPPLY, TokenClient, TokenClientConfig, TokenView, artifact_source_for};
use pc_wallet_session::{ExtensionRegistry, LocalKeyring, WalletSession};
use primitive_types::{H160, U256};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

pub(crate) type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub(crate) struct AppState {
    pub(crate) session: WalletSession<Arc<dyn SessionStore>>,
    pub(crate) client: TokenClient,
    pub(crate) view: TokenView,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ConsoleConfig::from_env()?;
    let state = Arc::new(build_state(&config).await?);

    if let Some(outcome) = state.session.rehydrate().await {
        info!(outcome = outcome.as_str(), "restored remembered wallet");
    }

    let app = build_router(state).layer(CorsLayer::permissive());

    info!("psp-console listening on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wires the session, the keyring and the token client against the
/// in-process devnet, with the configured contract seeded at genesis.
pub(crate) async fn build_state(config: &ConsoleConfig) -> anyhow::Result<AppState> {
    let keyring = LocalKeyring::default()
        .with_dev_accounts(&config.keyring)
        .context("parse PSP_CONSOLE_KEYRING")?;

    let owner = match keyring.addresses().first() {
        Some(address) => contract_address(address)?,
        None => {
            warn!("keyring has no accounts; seeding token supply to the zero address");
            H160::zero()
        }
    };

    let client_config =
        TokenClientConfig::new(&config.rpc_url, &config.contract).context("parse PSP_CONSOLE_CONTRACT")?;

    let devnet = Arc::new(DevnetRuntime::new(config.rpc_url.clone()));
    devnet
        .register_token(
            client_config.contract,
            TokenSeed {
                name: "PspCoin".to_owned(),
                symbol: "PSP".to_owned(),
                decimals: 10,
                owner,
                total_supply: U256::from(DEPLOY_INITIAL_SUPPLY),
            },
        )
        .await;
    info!(
        contract = %h160_hex(&client_config.contract),
        endpoint = %config.rpc_url,
        "serving contract calls from the in-process devnet"
    );

    let mut registry = ExtensionRegistry::default();
    registry.register(Arc::new(keyring));
    let registry = Arc::new(registry);

    let store: Arc<dyn SessionStore> = match &config.db_path {
        Some(path) => Arc::new(RocksDbSessionStore::open_default(path)?),
        None => Arc::new(InMemorySessionStore::default()),
    };

    let session = WalletSession::new(&config.dapp_name, registry.clone(), store);
    let client = TokenClient::new(
        client_config,
        Arc::new(DevnetConnector::new(devnet)),
        registry,
        artifact_source_for(&config.artifacts),
    );

    Ok(AppState {
        session,
        client,
        view: TokenView::default(),
    })
}

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/wallets", get(session::list_wallets))
        .route("/session", get(session::get_session))
        .route("/session/connect", post(session::connect))
        .route("/session/disconnect", post(session::disconnect))
        .route("/session/account", post(session::switch_account))
        .route("/token", get(token::token_info))
        .route("/token/allowance", get(token::allowance))
        .route("/token/balance", get(token::balance))
        .route("/token/transfer", post(token::transfer))
        .route("/token/transfer-from", post(token::transfer_from))
        .route("/token/approve", post(token::approve))
        .route("/token/deploy", post(token::deploy))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "psp-console",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "psp-console",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn conflict(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn internal_error(err: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use pc_api_types::{ConnectResponse, SessionState, TokenInfoResponse, TxState, TxStatusResponse};
    use pc_token_client::DEPLOY_ARTIFACT_PATH;
    use pc_wallet_session::KEYRING_EXTENSION_NAME;
    use serde::de::DeserializeOwned;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct Console {
        router: Router,
        _artifacts: tempfile::TempDir,
    }

    impl Console {
        async fn start() -> anyhow::Result<Self> {
            let artifacts = tempfile::tempdir()?;
            std::fs::create_dir_all(artifacts.path().join("deployments/psp"))?;
            std::fs::write(artifacts.path().join(DEPLOY_ARTIFACT_PATH), b"PVM\0psp_coin")?;

            let mut config = ConsoleConfig::from_lookup(|_| None)?;
            config.artifacts = artifacts.path().display().to_string();

            let state = Arc::new(build_state(&config).await?);
            Ok(Self {
                router: build_router(state),
                _artifacts: artifacts,
            })
        }

        async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> anyhow::Result<(StatusCode, Value)> {
            let request = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => request
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body)?))?,
                None => request.body(Body::empty())?,
            };

            let response = self.router.clone().oneshot(request).await?;
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await?;
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes)?
            };
            Ok((status, value))
        }

        async fn ok<T: DeserializeOwned>(&self, method: Method, uri: &str, body: Option<Value>) -> anyhow::Result<T> {
            let (status, value) = self.call(method, uri, body).await?;
            assert_eq!(status, StatusCode::OK, "{uri}: {value}");
            Ok(serde_json::from_value(value)?)
        }

        async fn connect(&self) -> anyhow::Result<SessionState> {
            let response: ConnectResponse = self
                .ok(
                    Method::POST,
                    "/session/connect",
                    Some(json!({ "extension_name": KEYRING_EXTENSION_NAME })),
                )
                .await?;
            assert_eq!(response.outcome, "connected");
            Ok(response.session)
        }
    }

    fn h160_of(address: &str) -> String {
        contract_address(address).map(|h160| h160_hex(&h160)).expect("keyring address")
    }

    #[tokio::test]
    async fn health_and_wallet_listing() -> anyhow::Result<()> {
        let console = Console::start().await?;

        let health: Value = console.ok(Method::GET, "/health", None).await?;
        assert_eq!(health["status"], "ok");

        let wallets: Value = console.ok(Method::GET, "/wallets", None).await?;
        assert_eq!(wallets["wallets"][0]["extension_name"], KEYRING_EXTENSION_NAME);

        let session: SessionState = console.ok(Method::GET, "/session", None).await?;
        assert!(session.is_disconnected());
        Ok(())
    }

    #[tokio::test]
    async fn token_routes_need_a_selected_account() -> anyhow::Result<()> {
        let console = Console::start().await?;

        let (status, _) = console.call(Method::GET, "/token", None).await?;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = console.call(Method::POST, "/token/deploy", None).await?;
        assert_eq!(status, StatusCode::CONFLICT);
        Ok(())
    }

    #[tokio::test]
    async fn connect_failure_is_reported_in_body() -> anyhow::Result<()> {
        let console = Console::start().await?;

        let response: ConnectResponse = console
            .ok(
                Method::POST,
                "/session/connect",
                Some(json!({ "extension_name": "talisman" })),
            )
            .await?;
        assert_eq!(response.outcome, "failed");
        assert!(response.reason.is_some());
        assert!(response.session.is_disconnected());

        let (status, _) = console
            .call(Method::POST, "/session/connect", Some(json!({ "extension_name": " " })))
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn connected_account_reads_token_info() -> anyhow::Result<()> {
        let console = Console::start().await?;
        let session = console.connect().await?;
        assert_eq!(session.accounts.len(), 2);
        assert_eq!(session.selected_account, session.accounts.first().cloned());

        let info: TokenInfoResponse = console.ok(Method::GET, "/token", None).await?;
        assert_eq!(info.contract, "0xc139114bb0199171a12b39ba4a0a818ef637f840");
        assert_eq!(info.name.as_deref(), Some("PspCoin"));
        assert_eq!(info.symbol.as_deref(), Some("PSP"));
        assert_eq!(info.decimals.as_deref(), Some("10"));
        assert_eq!(info.total_supply.as_deref(), Some("15653200"));
        assert!(info.field_errors.is_empty());

        let balance: Value = console.ok(Method::GET, "/token/balance", None).await?;
        assert_eq!(balance["amount"], "15653200");
        Ok(())
    }

    #[tokio::test]
    async fn switch_account_rejects_unlisted_address() -> anyhow::Result<()> {
        let console = Console::start().await?;
        let session = console.connect().await?;
        let bob = session.accounts[1].address.clone();

        let switched: SessionState = console
            .ok(Method::POST, "/session/account", Some(json!({ "address": bob })))
            .await?;
        assert_eq!(switched.selected_account.map(|a| a.address), Some(bob));

        let (status, _) = console
            .call(
                Method::POST,
                "/session/account",
                Some(json!({ "address": "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY" })),
            )
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let session: SessionState = console.ok(Method::POST, "/session/disconnect", None).await?;
        assert_eq!(session, SessionState::default());
        Ok(())
    }

    #[tokio::test]
    async fn transfer_validates_form_then_submits() -> anyhow::Result<()> {
        let console = Console::start().await?;
        let session = console.connect().await?;
        let bob = session.accounts[1].address.clone();

        for body in [
            json!({ "to": "", "amount": "10" }),
            json!({ "to": bob, "amount": "" }),
            json!({ "to": "not-an-address", "amount": "10" }),
            json!({ "to": bob, "amount": "-3" }),
            json!({ "to": bob, "amount": "1.5" }),
        ] {
            let (status, value) = console.call(Method::POST, "/token/transfer", Some(body)).await?;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{value}");
        }

        let status: TxStatusResponse = console
            .ok(
                Method::POST,
                "/token/transfer",
                Some(json!({ "to": bob, "amount": "250" })),
            )
            .await?;
        assert_eq!(status.status, TxState::Submitted);
        assert!(status.tx_hash.is_some());

        let balance: Value = console
            .ok(Method::GET, &format!("/token/balance?owner={bob}"), None)
            .await?;
        assert_eq!(balance["owner"], h160_of(&bob));
        assert_eq!(balance["amount"], "250");
        Ok(())
    }

    #[tokio::test]
    async fn allowance_flow_through_routes() -> anyhow::Result<()> {
        let console = Console::start().await?;
        let session = console.connect().await?;
        let alice = session.accounts[0].address.clone();
        let bob = session.accounts[1].address.clone();

        let approved: TxStatusResponse = console
            .ok(
                Method::POST,
                "/token/approve",
                Some(json!({ "spender": bob, "amount": "40" })),
            )
            .await?;
        assert_eq!(approved.status, TxState::Submitted);

        let _: SessionState = console
            .ok(Method::POST, "/session/account", Some(json!({ "address": bob })))
            .await?;

        let allowance: Value = console
            .ok(Method::GET, &format!("/token/allowance?owner={alice}"), None)
            .await?;
        assert_eq!(allowance["spender"], h160_of(&bob));
        assert_eq!(allowance["amount"], "40");

        let gated: TxStatusResponse = console
            .ok(
                Method::POST,
                "/token/transfer-from",
                Some(json!({ "owner": alice, "to": bob, "amount": "41" })),
            )
            .await?;
        assert_eq!(gated.status, TxState::InsufficientAllowance);
        assert_eq!(gated.tx_hash, None);

        let moved: TxStatusResponse = console
            .ok(
                Method::POST,
                "/token/transfer-from",
                Some(json!({ "owner": alice, "to": bob, "amount": "40" })),
            )
            .await?;
        assert_eq!(moved.status, TxState::Submitted);

        let (status, _) = console.call(Method::GET, "/token/allowance", None).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn deploy_returns_new_contract_address() -> anyhow::Result<()> {
        let console = Console::start().await?;
        console.connect().await?;

        let deployed: TxStatusResponse = console.ok(Method::POST, "/token/deploy", None).await?;
        assert_eq!(deployed.status, TxState::Instantiated);
        let contract = deployed.contract_address.expect("contract address");
        assert!(contract.starts_with("0x"));
        assert_eq!(contract.len(), 42);
        Ok(())
    }
}
