//! In-process chain that executes PSP22 token semantics.
//!
//! Implements the same `ContractRuntime` seam a live SDK binding would, so the
//! console and its tests can run without a node. Submissions are signature
//! checked against the origin's public key before they touch state.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use pc_chain_client::{
    CallOutcome, ContractRuntime, ContractValue, InstantiateRequest, InstantiateResult, Psp22Constructor,
    Psp22Error, Psp22Message, RuntimeConnector, SubmitCallRequest, SubmitTxResult,
};
use pc_crypto::{
    Signer, account_to_contract_address, encode_u256_words, h160_hex, keccak256, ss58_decode, verify_signature,
};
use primitive_types::{H160, U256};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEVNET_ENDPOINT: &str = "ws://127.0.0.1:9944";

/// Initial state of a token registered at a fixed address.
#[derive(Debug, Clone)]
pub struct TokenSeed {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub owner: H160,
    pub total_supply: U256,
}

#[derive(Debug, Clone, Default)]
struct Psp22Ledger {
    total_supply: U256,
    balances: HashMap<H160, U256>,
    allowances: HashMap<(H160, H160), U256>,
    name: Option<String>,
    symbol: Option<String>,
    decimals: u8,
}

impl Psp22Ledger {
    fn from_seed(seed: TokenSeed) -> Self {
        let mut ledger = Self {
            name: Some(seed.name),
            symbol: Some(seed.symbol),
            decimals: seed.decimals,
            ..Self::default()
        };
        ledger.credit_genesis(seed.owner, seed.total_supply);
        ledger
    }

    fn from_constructor(constructor: &Psp22Constructor) -> Self {
        let mut ledger = Self {
            name: Some(String::new()),
            symbol: Some(String::new()),
            ..Self::default()
        };
        if let Psp22Constructor::NewWithSupply { owner, total_supply } = constructor {
            ledger.credit_genesis(*owner, *total_supply);
        }
        ledger
    }

    fn balance_of(&self, owner: &H160) -> U256 {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: &H160, spender: &H160) -> U256 {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or_default()
    }

    fn credit_genesis(&mut self, owner: H160, supply: U256) {
        self.total_supply = supply;
        if !supply.is_zero() {
            self.balances.insert(owner, supply);
        }
    }

    fn mint(&mut self, to: H160, value: U256) -> Result<(), Psp22Error> {
        if value.is_zero() {
            return Ok(());
        }

        self.total_supply = self.total_supply.checked_add(value).ok_or_else(|| {
            Psp22Error::Custom("Max PSP22 supply exceeded. Max supply limited to 2^256-1.".to_owned())
        })?;
        let balance = self.balance_of(&to).saturating_add(value);
        self.balances.insert(to, balance);
        Ok(())
    }

    fn burn(&mut self, from: H160, value: U256) -> Result<(), Psp22Error> {
        if value.is_zero() {
            return Ok(());
        }

        let balance = self.balance_of(&from);
        if balance < value {
            return Err(Psp22Error::InsufficientBalance);
        }
        self.balances.insert(from, balance - value);
        self.total_supply = self.total_supply.saturating_sub(value);
        Ok(())
    }

    fn transfer(&mut self, caller: H160, to: H160, value: U256) -> Result<(), Psp22Error> {
        if caller == to || value.is_zero() {
            return Ok(());
        }

        let caller_balance = self.balance_of(&caller);
        if caller_balance < value {
            return Err(Psp22Error::InsufficientBalance);
        }

        let to_balance = self.balance_of(&to);
        self.balances.insert(to, to_balance.saturating_add(value));
        self.balances.insert(caller, caller_balance.saturating_sub(value));
        Ok(())
    }

    fn transfer_from(&mut self, caller: H160, from: H160, to: H160, value: U256) -> Result<(), Psp22Error> {
        if from == to || value.is_zero() {
            return Ok(());
        }
        if caller == from {
            return self.transfer(caller, to, value);
        }

        let allowance = self.allowance(&from, &caller);
        if allowance < value {
            return Err(Psp22Error::InsufficientAllowance);
        }

        let from_balance = self.balance_of(&from);
        if from_balance < value {
            return Err(Psp22Error::InsufficientBalance);
        }

        self.allowances.insert((from, caller), allowance.saturating_sub(value));
        self.balances.insert(from, from_balance.saturating_sub(value));
        let to_balance = self.balance_of(&to);
        self.balances.insert(to, to_balance.saturating_add(value));
        Ok(())
    }

    fn approve(&mut self, caller: H160, spender: H160, value: U256) {
        if caller == spender {
            return;
        }
        if value.is_zero() {
            self.allowances.remove(&(caller, spender));
        } else {
            self.allowances.insert((caller, spender), value);
        }
    }

    fn increase_allowance(&mut self, caller: H160, spender: H160, delta: U256) {
        if caller == spender {
            return;
        }
        let allowance = self.allowance(&caller, &spender);
        self.allowances.insert((caller, spender), allowance.saturating_add(delta));
    }

    fn decrease_allowance(&mut self, caller: H160, spender: H160, delta: U256) {
        if caller == spender {
            return;
        }
        let allowance = self.allowance(&caller, &spender);
        if allowance <= delta {
            self.allowances.remove(&(caller, spender));
        } else {
            self.allowances.insert((caller, spender), allowance - delta);
        }
    }

    fn execute(&mut self, caller: H160, message: &Psp22Message) -> Result<ContractValue, Psp22Error> {
        use ContractValue::{Byte, OptionalText, Unit, Words};

        match message {
            Psp22Message::TotalSupply => Ok(Words(encode_u256_words(self.total_supply))),
            Psp22Message::BalanceOf { owner } => Ok(Words(encode_u256_words(self.balance_of(owner)))),
            Psp22Message::Allowance { owner, spender } => {
                Ok(Words(encode_u256_words(self.allowance(owner, spender))))
            }
            Psp22Message::Transfer { to, value, .. } => self.transfer(caller, *to, *value).map(|_| Unit),
            Psp22Message::TransferFrom { from, to, value, .. } => {
                self.transfer_from(caller, *from, *to, *value).map(|_| Unit)
            }
            Psp22Message::Approve { spender, value } => {
                self.approve(caller, *spender, *value);
                Ok(Unit)
            }
            Psp22Message::IncreaseAllowance { spender, delta_value } => {
                self.increase_allowance(caller, *spender, *delta_value);
                Ok(Unit)
            }
            Psp22Message::DecreaseAllowance { spender, delta_value } => {
                self.decrease_allowance(caller, *spender, *delta_value);
                Ok(Unit)
            }
            Psp22Message::Mint { value } => self.mint(caller, *value).map(|_| Unit),
            Psp22Message::Burn { value } => self.burn(caller, *value).map(|_| Unit),
            Psp22Message::Name => Ok(OptionalText(self.name.clone())),
            Psp22Message::Symbol => Ok(OptionalText(self.symbol.clone())),
            Psp22Message::Decimals => Ok(Byte(self.decimals)),
        }
    }
}

#[derive(Default)]
struct ChainState {
    contracts: HashMap<H160, Psp22Ledger>,
    nonces: HashMap<H160, u64>,
}

impl ChainState {
    fn next_nonce(&mut self, origin: H160) -> u64 {
        let nonce = self.nonces.entry(origin).or_default();
        *nonce += 1;
        *nonce
    }
}

pub struct DevnetRuntime {
    endpoint: String,
    state: RwLock<ChainState>,
}

impl Default for DevnetRuntime {
    fn default() -> Self {
        Self::new(DEVNET_ENDPOINT)
    }
}

impl DevnetRuntime {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: RwLock::new(ChainState::default()),
        }
    }

    /// Places a token at `address` as if it had been deployed at genesis.
    pub async fn register_token(&self, address: H160, seed: TokenSeed) {
        info!(contract = %h160_hex(&address), symbol = %seed.symbol, "registering devnet token");
        let mut guard = self.state.write().await;
        guard.contracts.insert(address, Psp22Ledger::from_seed(seed));
    }

    pub async fn balance_of(&self, contract: &H160, owner: &H160) -> Option<U256> {
        let guard = self.state.read().await;
        guard.contracts.get(contract).map(|ledger| ledger.balance_of(owner))
    }

    pub async fn allowance(&self, contract: &H160, owner: &H160, spender: &H160) -> Option<U256> {
        let guard = self.state.read().await;
        guard.contracts.get(contract).map(|ledger| ledger.allowance(owner, spender))
    }
}

/// Signs `payload` with `signer` and checks the key belongs to `origin`.
fn authorize(origin: &str, payload: &[u8], signer: &dyn Signer) -> Result<(H160, Vec<u8>)> {
    let (_, public_key) = ss58_decode(origin).with_context(|| format!("invalid origin {origin}"))?;
    let signature = signer.sign(payload)?;
    verify_signature(&public_key, payload, &signature)
        .map_err(|err| anyhow!("transaction rejected: {err}"))?;
    Ok((account_to_contract_address(&public_key), signature))
}

fn tx_hash(payload: &[u8], signature: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(signature);
    format!("0x{}", hex::encode(hasher.finalize()))
}

fn derive_contract_address(deployer: &H160, nonce: u64, code_hash: &[u8; 32], salt: Option<&[u8; 32]>) -> H160 {
    let mut input = Vec::with_capacity(20 + 32 + 32);
    input.extend_from_slice(deployer.as_bytes());
    match salt {
        Some(salt) => {
            input.extend_from_slice(code_hash);
            input.extend_from_slice(salt);
        }
        None => input.extend_from_slice(&nonce.to_le_bytes()),
    }
    H160::from_slice(&keccak256(&input)[12..])
}

#[async_trait]
impl ContractRuntime for DevnetRuntime {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, origin: &str, contract: &H160, message: &Psp22Message) -> Result<CallOutcome> {
        let caller = pc_crypto::contract_address(origin).with_context(|| format!("invalid origin {origin}"))?;
        let guard = self.state.read().await;
        let Some(ledger) = guard.contracts.get(contract) else {
            return Ok(CallOutcome::Reverted {
                reason: format!("no contract at {}", h160_hex(contract)),
            });
        };

        // Queries run against a scratch copy so mutating messages act as dry runs.
        let mut scratch = ledger.clone();
        let outcome = match scratch.execute(caller, message) {
            Ok(value) => CallOutcome::Success(value),
            Err(err) => CallOutcome::Reverted { reason: err.to_string() },
        };
        debug!(call = message.label(), success = outcome.is_success(), "devnet query");
        Ok(outcome)
    }

    async fn submit(&self, req: SubmitCallRequest, signer: &dyn Signer) -> Result<SubmitTxResult> {
        let payload = req.signing_payload()?;
        let (caller, signature) = authorize(&req.origin, &payload, signer)?;
        let tx_hash = tx_hash(&payload, &signature);

        let mut guard = self.state.write().await;
        guard.next_nonce(caller);
        let Some(ledger) = guard.contracts.get_mut(&req.contract) else {
            return Ok(SubmitTxResult {
                tx_hash,
                accepted: false,
                dispatch_error: Some(format!("no contract at {}", h160_hex(&req.contract))),
            });
        };

        // Mirror contract atomicity: a failed message leaves storage untouched.
        let mut next = ledger.clone();
        match next.execute(caller, &req.message) {
            Ok(_) => {
                *ledger = next;
                info!(call = req.message.label(), %tx_hash, "devnet call included");
                Ok(SubmitTxResult {
                    tx_hash,
                    accepted: true,
                    dispatch_error: None,
                })
            }
            Err(err) => {
                warn!(call = req.message.label(), %tx_hash, error = %err, "devnet call reverted");
                Ok(SubmitTxResult {
                    tx_hash,
                    accepted: false,
                    dispatch_error: Some(err.to_string()),
                })
            }
        }
    }

    async fn instantiate(&self, req: InstantiateRequest, signer: &dyn Signer) -> Result<InstantiateResult> {
        let payload = req.signing_payload()?;
        let (deployer, signature) = authorize(&req.origin, &payload, signer)?;
        let tx_hash = tx_hash(&payload, &signature);

        if req.code.is_empty() {
            return Ok(InstantiateResult {
                tx_hash,
                contract: None,
                dispatch_error: Some("code blob is empty".to_owned()),
            });
        }

        let mut guard = self.state.write().await;
        let nonce = guard.next_nonce(deployer);
        let address = derive_contract_address(&deployer, nonce, &req.code_hash(), req.salt.as_ref());
        if guard.contracts.contains_key(&address) {
            return Ok(InstantiateResult {
                tx_hash,
                contract: None,
                dispatch_error: Some("duplicate contract".to_owned()),
            });
        }

        guard
            .contracts
            .insert(address, Psp22Ledger::from_constructor(&req.constructor));
        info!(
            contract = %h160_hex(&address),
            constructor = req.constructor.label(),
            "devnet contract instantiated"
        );

        Ok(InstantiateResult {
            tx_hash,
            contract: Some(address),
            dispatch_error: None,
        })
    }
}

/// Hands out connections to one shared `DevnetRuntime`.
pub struct DevnetConnector {
    runtime: Arc<DevnetRuntime>,
    connect_delay: Option<Duration>,
    connects: AtomicUsize,
}

impl DevnetConnector {
    pub fn new(runtime: Arc<DevnetRuntime>) -> Self {
        Self {
            runtime,
            connect_delay: None,
            connects: AtomicUsize::new(0),
        }
    }

    /// Simulated handshake latency.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeConnector for DevnetConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ContractRuntime>> {
        if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
            bail!("unsupported rpc endpoint {endpoint}; expected ws:// or wss://");
        }

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        info!(endpoint, "connected to devnet runtime");
        let runtime: Arc<dyn ContractRuntime> = self.runtime.clone();
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pc_crypto::{Ed25519Signer, decode_u256_words};

    struct Account {
        signer: Ed25519Signer,
        h160: H160,
    }

    impl Account {
        fn dev(phrase: &str) -> Self {
            let signer = Ed25519Signer::from_seed_phrase(phrase).expect("dev seed");
            let h160 = account_to_contract_address(&signer.public_key_bytes());
            Self { signer, h160 }
        }

        fn address(&self) -> String {
            self.signer.ss58_address()
        }
    }

    const TOKEN: H160 = H160([0xc1; 20]);

    async fn runtime_with_token(owner: &Account, supply: u64) -> DevnetRuntime {
        let runtime = DevnetRuntime::default();
        runtime
            .register_token(
                TOKEN,
                TokenSeed {
                    name: "PspCoin".to_owned(),
                    symbol: "PSP".to_owned(),
                    decimals: 10,
                    owner: owner.h160,
                    total_supply: U256::from(supply),
                },
            )
            .await;
        runtime
    }

    async fn send(runtime: &DevnetRuntime, from: &Account, message: Psp22Message) -> Result<SubmitTxResult> {
        runtime
            .submit(
                SubmitCallRequest {
                    origin: from.address(),
                    contract: TOKEN,
                    message,
                },
                &from.signer,
            )
            .await
    }

    #[tokio::test]
    async fn transfer_from_requires_allowance() -> Result<()> {
        let alice = Account::dev("//Alice");
        let bob = Account::dev("//Bob");
        let eve = Account::dev("//Eve");
        let runtime = runtime_with_token(&alice, 1_000).await;

        let pull = Psp22Message::TransferFrom {
            from: alice.h160,
            to: eve.h160,
            value: U256::from(10_u64),
            data: vec![],
        };

        let denied = send(&runtime, &bob, pull.clone()).await?;
        assert!(!denied.accepted);
        assert_eq!(denied.dispatch_error.as_deref(), Some("insufficient allowance"));

        let approved = send(
            &runtime,
            &alice,
            Psp22Message::Approve {
                spender: bob.h160,
                value: U256::from(30_u64),
            },
        )
        .await?;
        assert!(approved.accepted);

        let pulled = send(&runtime, &bob, pull).await?;
        assert!(pulled.accepted);
        assert_eq!(runtime.balance_of(&TOKEN, &eve.h160).await, Some(U256::from(10_u64)));
        assert_eq!(runtime.balance_of(&TOKEN, &alice.h160).await, Some(U256::from(990_u64)));
        assert_eq!(
            runtime.allowance(&TOKEN, &alice.h160, &bob.h160).await,
            Some(U256::from(20_u64))
        );
        Ok(())
    }

    #[tokio::test]
    async fn overdrawn_transfer_leaves_balances_untouched() -> Result<()> {
        let alice = Account::dev("//Alice");
        let bob = Account::dev("//Bob");
        let runtime = runtime_with_token(&alice, 5).await;

        let result = send(
            &runtime,
            &alice,
            Psp22Message::Transfer {
                to: bob.h160,
                value: U256::from(6_u64),
                data: vec![],
            },
        )
        .await?;

        assert!(!result.accepted);
        assert_eq!(result.dispatch_error.as_deref(), Some("insufficient balance"));
        assert_eq!(runtime.balance_of(&TOKEN, &alice.h160).await, Some(U256::from(5_u64)));
        assert_eq!(runtime.balance_of(&TOKEN, &bob.h160).await, Some(U256::zero()));
        Ok(())
    }

    #[tokio::test]
    async fn mint_credits_caller_until_supply_overflows() -> Result<()> {
        let alice = Account::dev("//Alice");
        let bob = Account::dev("//Bob");
        let runtime = runtime_with_token(&alice, 100).await;

        let minted = send(&runtime, &bob, Psp22Message::Mint { value: U256::from(25_u64) }).await?;
        assert!(minted.accepted);
        assert_eq!(runtime.balance_of(&TOKEN, &bob.h160).await, Some(U256::from(25_u64)));

        let overflow = send(&runtime, &bob, Psp22Message::Mint { value: U256::MAX }).await?;
        assert!(!overflow.accepted);
        assert!(
            overflow
                .dispatch_error
                .as_deref()
                .is_some_and(|reason| reason.starts_with("Max PSP22 supply exceeded"))
        );
        assert_eq!(runtime.balance_of(&TOKEN, &bob.h160).await, Some(U256::from(25_u64)));

        let supply = runtime.query(&bob.address(), &TOKEN, &Psp22Message::TotalSupply).await?;
        assert_eq!(supply, CallOutcome::Success(ContractValue::Words(encode_u256_words(U256::from(125_u64)))));
        Ok(())
    }

    #[tokio::test]
    async fn burn_lowers_supply_and_rejects_overdraw() -> Result<()> {
        let alice = Account::dev("//Alice");
        let runtime = runtime_with_token(&alice, 100).await;

        let denied = send(&runtime, &alice, Psp22Message::Burn { value: U256::from(101_u64) }).await?;
        assert!(!denied.accepted);
        assert_eq!(denied.dispatch_error.as_deref(), Some("insufficient balance"));

        let burned = send(&runtime, &alice, Psp22Message::Burn { value: U256::from(40_u64) }).await?;
        assert!(burned.accepted);
        assert_eq!(runtime.balance_of(&TOKEN, &alice.h160).await, Some(U256::from(60_u64)));

        let supply = runtime.query(&alice.address(), &TOKEN, &Psp22Message::TotalSupply).await?;
        assert_eq!(supply, CallOutcome::Success(ContractValue::Words(encode_u256_words(U256::from(60_u64)))));
        Ok(())
    }

    #[tokio::test]
    async fn submission_signed_by_another_key_is_rejected() -> Result<()> {
        let alice = Account::dev("//Alice");
        let mallory = Account::dev("//Mallory");
        let runtime = runtime_with_token(&alice, 100).await;

        let result = runtime
            .submit(
                SubmitCallRequest {
                    origin: alice.address(),
                    contract: TOKEN,
                    message: Psp22Message::Transfer {
                        to: mallory.h160,
                        value: U256::from(100_u64),
                        data: vec![],
                    },
                },
                &mallory.signer,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(runtime.balance_of(&TOKEN, &alice.h160).await, Some(U256::from(100_u64)));
        Ok(())
    }

    #[tokio::test]
    async fn queries_decode_words_and_dry_run_writes() -> Result<()> {
        let alice = Account::dev("//Alice");
        let bob = Account::dev("//Bob");
        let runtime = runtime_with_token(&alice, 42).await;

        let supply = runtime.query(&alice.address(), &TOKEN, &Psp22Message::TotalSupply).await?;
        let CallOutcome::Success(ContractValue::Words(words)) = supply else {
            panic!("unexpected supply outcome: {supply:?}");
        };
        assert_eq!(decode_u256_words(words), U256::from(42_u64));

        let dry_run = runtime
            .query(
                &alice.address(),
                &TOKEN,
                &Psp22Message::Transfer {
                    to: bob.h160,
                    value: U256::from(2_u64),
                    data: vec![],
                },
            )
            .await?;
        assert_eq!(dry_run, CallOutcome::Success(ContractValue::Unit));
        assert_eq!(runtime.balance_of(&TOKEN, &bob.h160).await, Some(U256::zero()));

        let missing = runtime.query(&alice.address(), &H160::zero(), &Psp22Message::Name).await?;
        assert!(!missing.is_success());
        Ok(())
    }

    #[tokio::test]
    async fn instantiate_credits_owner_at_fresh_addresses() -> Result<()> {
        let alice = Account::dev("//Alice");
        let runtime = DevnetRuntime::default();
        let request = InstantiateRequest {
            origin: alice.address(),
            code: b"\0polkavm".to_vec(),
            constructor: Psp22Constructor::NewWithSupply {
                owner: alice.h160,
                total_supply: U256::from(15_653_200_u64),
            },
            salt: None,
        };

        let first = runtime.instantiate(request.clone(), &alice.signer).await?;
        let second = runtime.instantiate(request, &alice.signer).await?;
        let first_address = first.contract.expect("first deployment address");
        let second_address = second.contract.expect("second deployment address");

        assert_ne!(first_address, second_address);
        assert_eq!(
            runtime.balance_of(&first_address, &alice.h160).await,
            Some(U256::from(15_653_200_u64))
        );
        Ok(())
    }

    #[tokio::test]
    async fn instantiate_rejects_empty_code() -> Result<()> {
        let alice = Account::dev("//Alice");
        let runtime = DevnetRuntime::default();
        let result = runtime
            .instantiate(
                InstantiateRequest {
                    origin: alice.address(),
                    code: Vec::new(),
                    constructor: Psp22Constructor::New,
                    salt: None,
                },
                &alice.signer,
            )
            .await?;

        assert!(result.contract.is_none());
        assert!(result.dispatch_error.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn connector_requires_websocket_endpoint() -> Result<()> {
        let connector = DevnetConnector::new(Arc::new(DevnetRuntime::default()));
        assert!(connector.connect("http://127.0.0.1:9944").await.is_err());

        let runtime = connector.connect(DEVNET_ENDPOINT).await?;
        assert_eq!(runtime.endpoint(), DEVNET_ENDPOINT);
        assert_eq!(connector.connect_count(), 1);
        Ok(())
    }
}
