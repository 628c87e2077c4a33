//! Supported chains and the seam to the signing/broadcast layer.

pub mod evm;

use crate::config::RpcConfig;
use crate::wallet::WalletIdentity;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::time::Duration;

/// One unsigned call requested by the API.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSpec {
    pub to: String,
    pub from: Option<String>,
    pub data: String,
    /// Absent means zero. May be a decimal/hex string or a JSON number.
    pub value: Option<Value>,
    pub chain_id: Number,
}

impl TransactionSpec {
    /// Well-formed iff `to` and `data` are strings and `chainId` is a number.
    pub fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let to = obj.get("to")?.as_str()?.to_owned();
        let data = obj.get("data")?.as_str()?.to_owned();
        let Value::Number(chain_id) = obj.get("chainId")? else {
            return None;
        };
        Some(Self {
            to,
            from: obj.get("from").and_then(Value::as_str).map(str::to_owned),
            data,
            value: obj.get("value").filter(|v| !v.is_null()).cloned(),
            chain_id: chain_id.clone(),
        })
    }

    pub fn from_map(obj: &Map<String, Value>, key: &str) -> Option<Self> {
        obj.get(key).and_then(Self::from_value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedChain {
    pub name: &'static str,
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
}

impl SupportedChain {
    /// Primary first, then fallbacks, trimmed and de-duplicated.
    pub fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::with_capacity(1 + self.fallback_rpc_urls.len());
        for u in std::iter::once(&self.rpc_url).chain(&self.fallback_rpc_urls) {
            let t = u.trim();
            if t.is_empty() || urls.iter().any(|x| x == t) {
                continue;
            }
            urls.push(t.to_owned());
        }
        urls
    }
}

struct ChainDef {
    name: &'static str,
    chain_id: u64,
    rpc_url: &'static str,
    fallbacks: &'static [&'static str],
}

const CHAINS: &[ChainDef] = &[
    ChainDef {
        name: "ethereum",
        chain_id: 1,
        rpc_url: "https://eth.llamarpc.com",
        fallbacks: &[
            "https://ethereum-rpc.publicnode.com",
            "https://cloudflare-eth.com",
        ],
    },
    ChainDef {
        name: "polygon",
        chain_id: 137,
        rpc_url: "https://polygon-rpc.com",
        fallbacks: &["https://polygon-bor-rpc.publicnode.com"],
    },
    ChainDef {
        name: "arbitrum",
        chain_id: 42161,
        rpc_url: "https://arb1.arbitrum.io/rpc",
        fallbacks: &["https://arbitrum-rpc.publicnode.com"],
    },
    ChainDef {
        name: "optimism",
        chain_id: 10,
        rpc_url: "https://mainnet.optimism.io",
        fallbacks: &["https://optimism-rpc.publicnode.com"],
    },
    ChainDef {
        name: "base",
        chain_id: 8453,
        rpc_url: "https://mainnet.base.org",
        fallbacks: &["https://base-rpc.publicnode.com"],
    },
    ChainDef {
        name: "avalanche",
        chain_id: 43114,
        rpc_url: "https://api.avax.network/ext/bc/C/rpc",
        fallbacks: &["https://avalanche-c-chain-rpc.publicnode.com"],
    },
];

/// Fixed set of chains transactions may be executed on.
#[derive(Debug, Clone)]
pub struct ChainTable {
    chains: Vec<SupportedChain>,
}

impl ChainTable {
    /// Built-in chains; `rpc.urls` entries replace the primary URL for that chain id.
    pub fn new(rpc: &RpcConfig) -> Self {
        let chains = CHAINS
            .iter()
            .map(|def| {
                let rpc_url = rpc
                    .urls
                    .get(&def.chain_id.to_string())
                    .cloned()
                    .unwrap_or_else(|| def.rpc_url.to_owned());
                SupportedChain {
                    name: def.name,
                    chain_id: def.chain_id,
                    rpc_url,
                    fallback_rpc_urls: def.fallbacks.iter().map(|&s| s.to_owned()).collect(),
                }
            })
            .collect();
        Self { chains }
    }

    pub fn get(&self, chain_id: &Number) -> Option<&SupportedChain> {
        let id = integral_chain_id(chain_id)?;
        self.chains.iter().find(|c| c.chain_id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.chains.iter().map(|c| c.chain_id)
    }
}

/// `1` and `1.0` name the same chain; fractional or negative ids name none.
fn integral_chain_id(n: &Number) -> Option<u64> {
    n.as_u64()
        .or_else(|| n.to_string().strip_suffix(".0")?.parse().ok())
}

impl Default for ChainTable {
    fn default() -> Self {
        Self::new(&RpcConfig::default())
    }
}

/// Receipt fields surfaced to the agent; numbers are decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub status: String,
    pub block_number: String,
    pub gas_used: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTx {
    pub tx_hash: String,
    pub receipt: ReceiptSummary,
}

/// Signs, submits and waits for one transaction.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    async fn send_and_confirm(
        &self,
        wallet: &WalletIdentity,
        chain: &SupportedChain,
        tx: &TransactionSpec,
        timeout: Duration,
    ) -> eyre::Result<ConfirmedTx>;
}
