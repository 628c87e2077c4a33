use super::{ConfirmedTx, ReceiptSummary, SupportedChain, TransactionSender, TransactionSpec};
use crate::retry::{try_all_with_backoff, BackoffPolicy};
use crate::wallet::WalletIdentity;
use alloy::{
    consensus::{SignableTransaction as _, TxEip1559, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718 as _,
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, TxKind, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionReceipt, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync as _},
};
use async_trait::async_trait;
use eyre::{Context as _, ContextCompat as _};
use serde_json::Value;
use std::{str::FromStr as _, time::Duration};
use tokio::time::{sleep, Instant};

const RPC_TIMEOUT: Duration = Duration::from_secs(20);
const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Priority fee floor: 1.5 gwei.
const MIN_PRIORITY_FEE: u128 = 1_500_000_000;

/// `(max_fee_per_gas, max_priority_fee_per_gas)` for an EIP-1559 chain.
pub fn compute_eip1559_fees(base_fee: u128, gas_price: u128) -> (u128, u128) {
    let priority = MIN_PRIORITY_FEE.max(gas_price / 10);
    let max_fee = base_fee
        .saturating_mul(2)
        .saturating_add(priority)
        .max(base_fee.saturating_add(priority));
    (max_fee, priority)
}

/// EIP-1559 pricing when the chain reports a base fee, legacy gas price otherwise.
/// Explicit fee fields on `tx` are left alone.
pub fn apply_fee_policy(
    mut tx: TransactionRequest,
    base_fee: Option<u128>,
    gas_price: u128,
) -> TransactionRequest {
    if tx.max_fee_per_gas.is_some()
        || tx.max_priority_fee_per_gas.is_some()
        || tx.gas_price.is_some()
    {
        return tx;
    }
    if let Some(base_fee) = base_fee {
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        tx.max_fee_per_gas = Some(max_fee);
        tx.max_priority_fee_per_gas = Some(priority);
    } else {
        tx.gas_price = Some(gas_price);
    }
    tx
}

/// Parse the API's `value` field: absent is zero; strings may be decimal or `0x` hex.
pub fn parse_value(v: Option<&Value>) -> eyre::Result<U256> {
    match v {
        None => Ok(U256::ZERO),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(U256::ZERO),
        Some(Value::String(s)) => {
            U256::from_str(s.trim()).with_context(|| format!("invalid transaction value: {s}"))
        }
        Some(Value::Number(n)) => {
            let s = n.to_string();
            U256::from_str(&s).with_context(|| format!("invalid transaction value: {s}"))
        }
        Some(other) => eyre::bail!("invalid transaction value: {other}"),
    }
}

/// Unsigned request with recipient, calldata, value and chain id filled in.
pub fn request_from_spec(
    spec: &TransactionSpec,
    from: Address,
    chain_id: u64,
) -> eyre::Result<TransactionRequest> {
    let to = Address::from_str(spec.to.trim())
        .with_context(|| format!("invalid transaction recipient: {}", spec.to))?;
    let data = Bytes::from_str(spec.data.trim()).context("invalid transaction data")?;
    let value = parse_value(spec.value.as_ref())?;
    Ok(TransactionRequest::default()
        .with_from(from)
        .with_to(to)
        .with_input(data)
        .with_value(value)
        .with_chain_id(chain_id))
}

fn broadcast_err_is_ok(err: &eyre::Report) -> bool {
    let s = format!("{err:#}").to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

fn sign_tx(signer: &PrivateKeySigner, tx: &TransactionRequest) -> eyre::Result<(TxEnvelope, B256)> {
    let to = tx.to.unwrap_or(TxKind::Create);
    let value = tx.value.unwrap_or(U256::ZERO);
    let input = tx.input.clone().into_input().unwrap_or_default();
    let nonce = tx.nonce.context("nonce not set")?;
    let gas_limit = tx.gas.context("gas limit not set")?;
    let chain_id = tx.chain_id.context("chain id not set")?;

    if let Some(max_fee_per_gas) = tx.max_fee_per_gas {
        let unsigned = TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.unwrap_or(0),
            to,
            value,
            input,
            access_list: tx.access_list.clone().unwrap_or_default(),
        };
        let sig = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .context("sign eip1559 tx")?;
        let signed = unsigned.into_signed(sig);
        let hash = *signed.hash();
        Ok((TxEnvelope::Eip1559(signed), hash))
    } else {
        let unsigned = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price: tx.gas_price.context("gas price not set")?,
            gas_limit,
            to,
            value,
            input,
        };
        let sig = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .context("sign legacy tx")?;
        let signed = unsigned.into_signed(sig);
        let hash = *signed.hash();
        Ok((TxEnvelope::Legacy(signed), hash))
    }
}

fn summarize_receipt(r: &TransactionReceipt) -> ReceiptSummary {
    ReceiptSummary {
        status: if r.status() { "success" } else { "reverted" }.to_owned(),
        block_number: r.block_number.unwrap_or_default().to_string(),
        gas_used: r.gas_used.to_string(),
    }
}

/// Local signing plus JSON-RPC broadcast over alloy's HTTP transport.
pub struct EvmSender {
    http: reqwest::Client,
    backoff: BackoffPolicy,
}

impl EvmSender {
    pub fn new() -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .connect_timeout(RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        Ok(Self {
            http,
            backoff: BackoffPolicy::default(),
        })
    }

    fn provider_for_url(&self, url: &str) -> eyre::Result<RootProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let transport = alloy::transports::http::Http::with_client(self.http.clone(), u);
        let client = alloy::rpc::client::RpcClient::new(transport, false);
        Ok(RootProvider::new(client))
    }

    async fn fill(
        &self,
        chain: &SupportedChain,
        mut tx: TransactionRequest,
        from: Address,
    ) -> eyre::Result<TransactionRequest> {
        let urls = chain.all_rpc_urls();
        let tx_ref = &tx;
        let (base_fee, gas_price, nonce, gas) = try_all_with_backoff(
            &urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                async move {
                    let p = self.provider_for_url(&u)?;
                    let base_fee = p
                        .get_block_by_number(BlockNumberOrTag::Pending)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|b| b.header.base_fee_per_gas.map(u128::from));
                    let gas_price = p.get_gas_price().await.context("get gas price")?;
                    let nonce = p
                        .get_transaction_count(from)
                        .pending()
                        .await
                        .context("get nonce")?;
                    let gas = p
                        .estimate_gas(tx_ref.clone())
                        .await
                        .context("estimate gas")?;
                    Ok((base_fee, gas_price, nonce, gas))
                }
            },
            "prepare transaction",
        )
        .await?;

        tx = apply_fee_policy(tx, base_fee, gas_price);
        tx.nonce = Some(nonce);
        // Headroom for estimators that undershoot.
        tx.gas = Some(gas.saturating_mul(120) / 100);
        Ok(tx)
    }

    async fn broadcast(&self, chain: &SupportedChain, raw: &[u8]) -> eyre::Result<()> {
        let urls = chain.all_rpc_urls();
        try_all_with_backoff(
            &urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                async move {
                    let p = self.provider_for_url(&u)?;
                    match p.send_raw_transaction(raw).await {
                        Ok(_pending) => Ok(()),
                        Err(e) => {
                            let report: eyre::Report = e.into();
                            if broadcast_err_is_ok(&report) {
                                Ok(())
                            } else {
                                Err(report).context("broadcast raw tx")
                            }
                        }
                    }
                }
            },
            "send transaction",
        )
        .await
    }

    async fn get_receipt(
        &self,
        chain: &SupportedChain,
        hash: B256,
    ) -> eyre::Result<Option<TransactionReceipt>> {
        let urls = chain.all_rpc_urls();
        try_all_with_backoff(
            &urls,
            &BackoffPolicy::immediate(1),
            |u| {
                let u = u.clone();
                async move {
                    let p = self.provider_for_url(&u)?;
                    p.get_transaction_receipt(hash)
                        .await
                        .context("get transaction receipt")
                }
            },
            "get tx receipt",
        )
        .await
    }

    /// Poll until the receipt shows up. Transient RPC errors are retried until `timeout`.
    async fn wait_for_receipt(
        &self,
        chain: &SupportedChain,
        hash: B256,
        timeout: Duration,
    ) -> eyre::Result<TransactionReceipt> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.get_receipt(chain, hash).await {
                Ok(Some(r)) => return Ok(r),
                Ok(None) => {}
                Err(e) => tracing::debug!(tx_hash = %hash, error = %e, "receipt poll failed"),
            }
            if Instant::now() >= deadline {
                eyre::bail!("timed out after {timeout:?} waiting for receipt of {hash}");
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl TransactionSender for EvmSender {
    async fn send_and_confirm(
        &self,
        wallet: &WalletIdentity,
        chain: &SupportedChain,
        spec: &TransactionSpec,
        timeout: Duration,
    ) -> eyre::Result<ConfirmedTx> {
        let from = wallet.address();
        let tx = request_from_spec(spec, from, chain.chain_id)?;
        let tx = self.fill(chain, tx, from).await?;

        let (envelope, hash) = sign_tx(wallet.signer(), &tx).context("sign tx")?;
        let raw = envelope.encoded_2718();
        self.broadcast(chain, &raw).await?;
        tracing::info!(chain_id = chain.chain_id, tx_hash = %hash, "transaction broadcast");

        let receipt = self.wait_for_receipt(chain, hash, timeout).await?;
        let summary = summarize_receipt(&receipt);
        tracing::info!(
            chain_id = chain.chain_id,
            tx_hash = %hash,
            status = %summary.status,
            block = %summary.block_number,
            "transaction confirmed"
        );
        Ok(ConfirmedTx {
            tx_hash: hash.to_string(),
            receipt: summary,
        })
    }
}
