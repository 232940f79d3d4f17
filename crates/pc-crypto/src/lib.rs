use anyhow::{Context, Result, anyhow, bail};
use blake2::Blake2b512;
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier, VerifyingKey};
use primitive_types::{H160, U256};
use rand::rngs::OsRng;
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

/// Generic Substrate address format.
pub const SS58_GENERIC_PREFIX: u16 = 42;

const SS58_CHECKSUM_SALT: &[u8] = b"SS58PRE";
const SS58_CHECKSUM_LEN: usize = 2;
const SIGNING_DOMAIN_TAG: &[u8] = b"psp-console:v1:extrinsic:";

pub trait Signer: Send + Sync {
    fn public_key(&self) -> [u8; 32];
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn new_random() -> Self {
        let mut rng = OsRng;
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    pub fn from_secret_key_bytes(secret_key: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret_key),
        }
    }

    /// Deterministic key for development accounts such as `//Alice`.
    pub fn from_seed_phrase(phrase: &str) -> Result<Self> {
        if phrase.trim().is_empty() {
            return Err(anyhow!("seed phrase cannot be empty"));
        }

        let mut secret = Zeroizing::new([0_u8; 32]);
        secret.copy_from_slice(&Sha256::digest(phrase.trim().as_bytes()));
        Ok(Self::from_secret_key_bytes(*secret))
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn ss58_address(&self) -> String {
        ss58_encode(&self.public_key_bytes(), SS58_GENERIC_PREFIX)
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> [u8; 32] {
        self.public_key_bytes()
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.is_empty() {
            return Err(anyhow!("payload cannot be empty"));
        }

        let signature: Signature = self.signing_key.sign(&signing_input(payload));
        Ok(signature.to_bytes().to_vec())
    }
}

fn signing_input(payload: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(SIGNING_DOMAIN_TAG.len() + payload.len());
    input.extend_from_slice(SIGNING_DOMAIN_TAG);
    input.extend_from_slice(payload);
    input
}

pub fn verify_signature(public_key: &[u8; 32], payload: &[u8], signature: &[u8]) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key).context("invalid ed25519 public key")?;
    let signature = Signature::from_slice(signature).context("invalid ed25519 signature encoding")?;
    key.verify(&signing_input(payload), &signature)
        .map_err(|_| anyhow!("signature does not match origin"))
}

// ── SS58 ─────────────────────────────────────────────────────────────

fn ss58_checksum(body: &[u8]) -> [u8; SS58_CHECKSUM_LEN] {
    let mut hasher = Blake2b512::new();
    hasher.update(SS58_CHECKSUM_SALT);
    hasher.update(body);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

/// Decodes an SS58 address into its network prefix and 32-byte public key.
pub fn ss58_decode(address: &str) -> Result<(u16, [u8; 32])> {
    let data = bs58::decode(address.trim())
        .into_vec()
        .map_err(|err| anyhow!("invalid base58 in address: {err}"))?;

    let (prefix, prefix_len) = match data.first() {
        Some(&first) if first < 64 => (u16::from(first), 1),
        Some(&first) if first < 128 => {
            let second = *data.get(1).ok_or_else(|| anyhow!("truncated ss58 prefix"))?;
            let lower = (first << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            (u16::from(lower) | (u16::from(upper) << 8), 2)
        }
        Some(_) => bail!("reserved ss58 prefix"),
        None => bail!("address cannot be empty"),
    };

    if data.len() != prefix_len + 32 + SS58_CHECKSUM_LEN {
        bail!("unexpected ss58 address length {}", data.len());
    }

    let body_len = prefix_len + 32;
    if ss58_checksum(&data[..body_len]) != data[body_len..] {
        bail!("ss58 checksum mismatch");
    }

    let mut public_key = [0_u8; 32];
    public_key.copy_from_slice(&data[prefix_len..body_len]);
    Ok((prefix, public_key))
}

pub fn ss58_encode(public_key: &[u8; 32], prefix: u16) -> String {
    let mut body = Vec::with_capacity(2 + 32 + SS58_CHECKSUM_LEN);
    match prefix {
        0..=63 => body.push(prefix as u8),
        _ => {
            let prefix = prefix & 0b0011_1111_1111_1111;
            body.push((((prefix & 0b1111_1100) >> 2) as u8) | 0b0100_0000);
            body.push(((prefix >> 8) as u8) | (((prefix & 0b11) as u8) << 6));
        }
    }
    body.extend_from_slice(public_key);
    let checksum = ss58_checksum(&body);
    body.extend_from_slice(&checksum);
    bs58::encode(body).into_string()
}

// ── Contract-facing addresses ────────────────────────────────────────

pub fn keccak256(input: &[u8]) -> [u8; 32] {
    Keccak256::digest(input).into()
}

/// Keccak-256 of the public key, last 20 bytes.
pub fn account_to_contract_address(public_key: &[u8; 32]) -> H160 {
    H160::from_slice(&keccak256(public_key)[12..])
}

/// Resolves an address typed by a user into the H160 a contract expects.
///
/// `0x`-prefixed input is taken as an H160 as is; anything else is decoded
/// as SS58 and hashed.
pub fn contract_address(input: &str) -> Result<H160> {
    let trimmed = input.trim();
    if let Some(hex_part) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        let bytes = hex::decode(hex_part).context("invalid hex address")?;
        if bytes.len() != 20 {
            bail!("hex address must be 20 bytes, got {}", bytes.len());
        }
        return Ok(H160::from_slice(&bytes));
    }

    let (_, public_key) = ss58_decode(trimmed)?;
    Ok(account_to_contract_address(&public_key))
}

pub fn contract_address_hex(input: &str) -> Result<String> {
    contract_address(input).map(|address| h160_hex(&address))
}

pub fn h160_hex(address: &H160) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

// ── 256-bit words ────────────────────────────────────────────────────

/// Contract encoding of a U256: four u64 words, least significant first.
pub fn decode_u256_words(words: [u64; 4]) -> U256 {
    U256(words)
}

pub fn encode_u256_words(value: U256) -> [u64; 4] {
    value.0
}
