//! Answering HTTP 402 challenges with an x402 "exact" EVM payment.
//!
//! A challenge lists acceptable payment requirements. x402 v2 servers send it base64-encoded
//! in the `PAYMENT-REQUIRED` response header and expect the proof in `PAYMENT-SIGNATURE`;
//! v1 servers send it as the response body and expect `X-PAYMENT`. [`ExactEvmPayer`] picks
//! the first `exact` requirement on a network it knows, signs an ERC-3009
//! `TransferWithAuthorization` for it, and answers in the version the challenge used.

use crate::errors::PaytollError;
use crate::wallet::WalletIdentity;
use alloy::primitives::{Address, FixedBytes, U256};
use alloy::signers::SignerSync as _;
use alloy::sol_types::{eip712_domain, SolStruct as _};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr as _;
use std::time::{SystemTime, UNIX_EPOCH};

pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";
pub const LEGACY_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Authorizations become valid slightly in the past to absorb clock skew.
const VALID_AFTER_SKEW_SECS: u64 = 600;
const DEFAULT_MAX_TIMEOUT_SECS: u64 = 60;

alloy::sol! {
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentHeader {
    pub name: &'static str,
    pub value: String,
}

/// A 402 challenge, tagged with the protocol version it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentChallenge {
    /// Body of a v1 402 response.
    V1(Value),
    /// Decoded `PAYMENT-REQUIRED` header (or a body declaring `x402Version: 2`).
    V2(Value),
}

impl PaymentChallenge {
    /// The header wins when it decodes to a JSON object; otherwise the body is used.
    pub fn from_response(header: Option<&str>, body: Value) -> Self {
        if let Some(doc) = header.and_then(decode_required_header) {
            return Self::V2(doc);
        }
        if body.get("x402Version").and_then(Value::as_u64) == Some(2) {
            return Self::V2(body);
        }
        Self::V1(body)
    }

    pub const fn document(&self) -> &Value {
        match self {
            Self::V1(v) | Self::V2(v) => v,
        }
    }
}

fn decode_required_header(raw: &str) -> Option<Value> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .ok()?;
    let doc: Value = serde_json::from_slice(&bytes).ok()?;
    doc.is_object().then_some(doc)
}

/// Produces the proof-of-payment header for a 402 challenge.
#[async_trait]
pub trait PaymentSigner: Send + Sync {
    async fn payment_header(
        &self,
        challenge: &PaymentChallenge,
    ) -> Result<PaymentHeader, PaytollError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Requirements {
    scheme: String,
    network: String,
    #[serde(alias = "amount")]
    max_amount_required: String,
    pay_to: String,
    asset: String,
    #[serde(default)]
    max_timeout_seconds: Option<u64>,
    #[serde(default)]
    extra: Option<Eip712Extra>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Eip712Extra {
    name: String,
    version: String,
}

/// EVM chain id for an x402 network name (`base`) or CAIP-2 id (`eip155:8453`).
pub fn chain_id_for_network(network: &str) -> Option<u64> {
    if let Some(reference) = network.strip_prefix("eip155:") {
        return reference.parse().ok();
    }
    let id = match network {
        "ethereum" | "mainnet" => 1,
        "sepolia" => 11_155_111,
        "base" => 8453,
        "base-sepolia" => 84_532,
        "polygon" => 137,
        "polygon-amoy" => 80_002,
        "arbitrum" => 42_161,
        "optimism" => 10,
        "avalanche" => 43_114,
        "avalanche-fuji" => 43_113,
        _ => return None,
    };
    Some(id)
}

/// First usable option, with its raw JSON (echoed back as `accepted` in v2) and chain id.
fn pick_requirements(challenge: &Value) -> Option<(Requirements, &Value, u64)> {
    challenge
        .get("accepts")?
        .as_array()?
        .iter()
        .filter_map(|raw| {
            serde_json::from_value::<Requirements>(raw.clone())
                .ok()
                .map(|r| (r, raw))
        })
        .filter(|(r, _)| r.scheme == "exact")
        .find_map(|(r, raw)| chain_id_for_network(&r.network).map(|id| (r, raw, id)))
}

fn payment_err(msg: impl Into<String>) -> PaytollError {
    PaytollError::Payment(msg.into())
}

pub struct ExactEvmPayer {
    wallet: WalletIdentity,
}

impl ExactEvmPayer {
    pub const fn new(wallet: WalletIdentity) -> Self {
        Self { wallet }
    }

    /// Signed `{signature, authorization}` object shared by both protocol versions.
    fn sign(&self, req: &Requirements, chain_id: u64, now: u64) -> Result<Value, PaytollError> {
        let asset = Address::from_str(&req.asset)
            .map_err(|e| payment_err(format!("invalid asset address: {e}")))?;
        let pay_to = Address::from_str(&req.pay_to)
            .map_err(|e| payment_err(format!("invalid payTo address: {e}")))?;
        let amount = U256::from_str(&req.max_amount_required)
            .map_err(|e| payment_err(format!("invalid amount: {e}")))?;
        let extra = req.extra.clone().unwrap_or_default();

        let domain = eip712_domain! {
            name: extra.name,
            version: extra.version,
            chain_id: chain_id,
            verifying_contract: asset,
        };

        let valid_after = now.saturating_sub(VALID_AFTER_SKEW_SECS);
        let valid_before =
            now.saturating_add(req.max_timeout_seconds.unwrap_or(DEFAULT_MAX_TIMEOUT_SECS));
        let nonce = FixedBytes(rand::random::<[u8; 32]>());
        let from = self.wallet.address();

        let message = TransferWithAuthorization {
            from,
            to: pay_to,
            value: amount,
            validAfter: U256::from(valid_after),
            validBefore: U256::from(valid_before),
            nonce,
        };
        let hash = message.eip712_signing_hash(&domain);
        let signature = self
            .wallet
            .signer()
            .sign_hash_sync(&hash)
            .map_err(|e| payment_err(format!("sign payment authorization: {e}")))?;

        Ok(json!({
            "signature": format!("0x{}", hex::encode(signature.as_bytes())),
            "authorization": {
                "from": from.to_string(),
                "to": pay_to.to_string(),
                "value": amount.to_string(),
                "validAfter": valid_after.to_string(),
                "validBefore": valid_before.to_string(),
                "nonce": nonce.to_string(),
            }
        }))
    }
}

fn v1_payload(req: &Requirements, signed: &Value) -> Value {
    json!({
        "x402Version": 1,
        "scheme": "exact",
        "network": req.network,
        "payload": signed,
    })
}

fn v2_payload(challenge: &Value, accepted: &Value, signed: &Value) -> Value {
    let mut payload = json!({
        "x402Version": 2,
        "accepted": accepted,
        "payload": signed,
    });
    if let (Some(obj), Some(resource)) = (payload.as_object_mut(), challenge.get("resource")) {
        obj.insert("resource".to_owned(), resource.clone());
    }
    payload
}

#[async_trait]
impl PaymentSigner for ExactEvmPayer {
    async fn payment_header(
        &self,
        challenge: &PaymentChallenge,
    ) -> Result<PaymentHeader, PaytollError> {
        let doc = challenge.document();
        let (req, accepted, chain_id) = pick_requirements(doc)
            .ok_or_else(|| payment_err("no supported `exact` EVM payment option offered"))?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| payment_err(format!("system clock before unix epoch: {e}")))?
            .as_secs();
        let signed = self.sign(&req, chain_id, now)?;
        let (name, payload, version) = match challenge {
            PaymentChallenge::V1(_) => (LEGACY_PAYMENT_HEADER, v1_payload(&req, &signed), 1),
            PaymentChallenge::V2(_) => (
                PAYMENT_SIGNATURE_HEADER,
                v2_payload(doc, accepted, &signed),
                2,
            ),
        };
        let bytes =
            serde_json::to_vec(&payload).map_err(|e| payment_err(format!("encode payload: {e}")))?;
        tracing::info!(
            x402_version = version,
            network = %req.network,
            amount = %req.max_amount_required,
            pay_to = %req.pay_to,
            "signed payment authorization"
        );
        Ok(PaymentHeader {
            name,
            value: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::test_support::test_wallet;

    const USDC_BASE: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
    const PAY_TO: &str = "0x00000000000000000000000000000000000000bb";

    fn challenge() -> Value {
        json!({
            "x402Version": 1,
            "error": "X-PAYMENT header is required",
            "accepts": [
                { "scheme": "upto", "network": "base", "maxAmountRequired": "1", "payTo": PAY_TO, "asset": USDC_BASE },
                { "scheme": "exact", "network": "solana", "maxAmountRequired": "1", "payTo": PAY_TO, "asset": USDC_BASE },
                {
                    "scheme": "exact", "network": "base", "maxAmountRequired": "5000",
                    "payTo": PAY_TO, "asset": USDC_BASE, "maxTimeoutSeconds": 120,
                    "extra": { "name": "USD Coin", "version": "2" }
                }
            ]
        })
    }

    #[test]
    fn network_names_and_caip2_ids_resolve() {
        assert_eq!(chain_id_for_network("base"), Some(8453));
        assert_eq!(chain_id_for_network("eip155:137"), Some(137));
        assert_eq!(chain_id_for_network("solana"), None);
        assert_eq!(chain_id_for_network("eip155:abc"), None);
    }

    #[test]
    fn picks_first_exact_option_on_known_network() {
        let doc = challenge();
        let picked = pick_requirements(&doc);
        assert!(matches!(picked, Some((ref r, _, 8453)) if r.max_amount_required == "5000"));
        assert!(pick_requirements(&json!({ "accepts": [] })).is_none());
        assert!(pick_requirements(&json!({ "error": "nope" })).is_none());
    }

    #[tokio::test]
    async fn header_carries_signed_authorization() -> eyre::Result<()> {
        let wallet = test_wallet()?;
        let address = wallet.address();
        let payer = ExactEvmPayer::new(wallet);

        let header = payer
            .payment_header(&PaymentChallenge::V1(challenge()))
            .await?;
        assert_eq!(header.name, "X-PAYMENT");

        let decoded = base64::engine::general_purpose::STANDARD.decode(&header.value)?;
        let payload: Value = serde_json::from_slice(&decoded)?;
        assert_eq!(payload.get("x402Version"), Some(&json!(1)));
        assert_eq!(payload.get("network"), Some(&json!("base")));

        let auth = payload
            .pointer("/payload/authorization")
            .ok_or_else(|| eyre::eyre!("missing authorization"))?;
        assert_eq!(auth.get("from"), Some(&json!(address.to_string())));
        assert_eq!(auth.get("value"), Some(&json!("5000")));

        let signature = payload
            .pointer("/payload/signature")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre::eyre!("missing signature"))?;
        assert_eq!(signature.len(), 2 + 65 * 2);
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_challenge_is_payment_error() -> eyre::Result<()> {
        let payer = ExactEvmPayer::new(test_wallet()?);
        let res = payer
            .payment_header(&PaymentChallenge::V1(
                json!({ "accepts": [{ "scheme": "exact", "network": "solana" }] }),
            ))
            .await;
        assert!(matches!(res, Err(PaytollError::Payment(_))));
        Ok(())
    }

    fn v2_required() -> Value {
        json!({
            "x402Version": 2,
            "error": "payment required",
            "resource": { "url": "https://api.example.com/v1/crypto/price", "description": "Token price" },
            "accepts": [{
                "scheme": "exact", "network": "eip155:8453", "amount": "5000",
                "asset": USDC_BASE, "payTo": PAY_TO, "maxTimeoutSeconds": 300,
                "extra": { "name": "USD Coin", "version": "2" }
            }]
        })
    }

    #[test]
    fn header_challenge_takes_precedence_over_body() -> eyre::Result<()> {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(&v2_required())?);
        let from_header = PaymentChallenge::from_response(Some(&encoded), json!({}));
        assert_eq!(from_header, PaymentChallenge::V2(v2_required()));

        let from_body = PaymentChallenge::from_response(None, v2_required());
        assert!(matches!(from_body, PaymentChallenge::V2(_)));

        let garbled = PaymentChallenge::from_response(Some("not base64!"), challenge());
        assert_eq!(garbled, PaymentChallenge::V1(challenge()));
        Ok(())
    }

    #[tokio::test]
    async fn v2_challenge_is_answered_in_payment_signature() -> eyre::Result<()> {
        let wallet = test_wallet()?;
        let address = wallet.address();
        let payer = ExactEvmPayer::new(wallet);

        let header = payer
            .payment_header(&PaymentChallenge::V2(v2_required()))
            .await?;
        assert_eq!(header.name, "PAYMENT-SIGNATURE");

        let decoded = base64::engine::general_purpose::STANDARD.decode(&header.value)?;
        let payload: Value = serde_json::from_slice(&decoded)?;
        assert_eq!(payload.get("x402Version"), Some(&json!(2)));
        assert_eq!(payload.pointer("/accepted/network"), Some(&json!("eip155:8453")));
        assert_eq!(payload.pointer("/accepted/amount"), Some(&json!("5000")));
        assert_eq!(
            payload.pointer("/resource/url"),
            Some(&json!("https://api.example.com/v1/crypto/price"))
        );
        assert_eq!(
            payload.pointer("/payload/authorization/from"),
            Some(&json!(address.to_string()))
        );
        assert!(payload.get("scheme").is_none());
        Ok(())
    }
}
