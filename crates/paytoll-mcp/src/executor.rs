//! Post-processing of API results that ask the caller to act on-chain.
//!
//! [`ExecutableResult::classify`] is total: every JSON value lands in exactly one variant.
//! [`TxExecutor::execute`] never fails; whatever happens is reported in an `execution`
//! field next to the original payload.

use crate::chains::{ChainTable, ConfirmedTx, ReceiptSummary, TransactionSender, TransactionSpec};
use crate::wallet::WalletIdentity;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub const MISSING_WALLET_ERROR: &str =
    "Missing PRIVATE_KEY: transaction execution requires a configured wallet.";

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutableResult {
    /// Anything that is not an on-chain action request; passed through untouched.
    Plain(Value),
    InsufficientBalance(Map<String, Value>),
    Ready {
        body: Map<String, Value>,
        transaction: TransactionSpec,
    },
    ApprovalRequired {
        body: Map<String, Value>,
        approval: TransactionSpec,
        transaction: TransactionSpec,
    },
}

impl ExecutableResult {
    pub fn classify(raw: Value) -> Self {
        let Value::Object(body) = raw else {
            return Self::Plain(raw);
        };
        let tag = body.get("type").and_then(Value::as_str);
        match tag {
            Some("ready") => {
                if let Some(transaction) = TransactionSpec::from_map(&body, "transaction") {
                    return Self::Ready { body, transaction };
                }
            }
            Some("approval_required") => {
                if let (Some(approval), Some(transaction)) = (
                    TransactionSpec::from_map(&body, "approval"),
                    TransactionSpec::from_map(&body, "transaction"),
                ) {
                    return Self::ApprovalRequired {
                        body,
                        approval,
                        transaction,
                    };
                }
            }
            Some("insufficient_balance") => return Self::InsufficientBalance(body),
            _ => {}
        }
        Self::Plain(Value::Object(body))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Main,
    /// Either leg of the two-step flow; the failing leg is not distinguished.
    ApprovalOrMain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ReceiptSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_receipt: Option<ReceiptSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl ExecutionOutcome {
    fn not_executed(error: impl Into<String>, stage: Option<Stage>) -> Self {
        Self {
            executed: false,
            error: Some(error.into()),
            stage,
            ..Self::default()
        }
    }

    fn confirmed(main: ConfirmedTx, approval: Option<ConfirmedTx>) -> Self {
        let (approval_tx_hash, approval_receipt) =
            approval.map_or((None, None), |a| (Some(a.tx_hash), Some(a.receipt)));
        Self {
            executed: true,
            tx_hash: Some(main.tx_hash),
            receipt: Some(main.receipt),
            approval_tx_hash,
            approval_receipt,
            ..Self::default()
        }
    }
}

fn with_execution(mut body: Map<String, Value>, outcome: &ExecutionOutcome) -> Value {
    let execution = serde_json::to_value(outcome).unwrap_or(Value::Null);
    body.insert("execution".to_owned(), execution);
    Value::Object(body)
}

pub struct TxExecutor {
    sender: Arc<dyn TransactionSender>,
    chains: ChainTable,
    confirmation_timeout: Duration,
}

impl TxExecutor {
    pub fn new(
        sender: Arc<dyn TransactionSender>,
        chains: ChainTable,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            sender,
            chains,
            confirmation_timeout,
        }
    }

    /// The original result, plus an `execution` field when an on-chain action was requested.
    pub async fn execute(&self, raw: Value, wallet: Option<&WalletIdentity>) -> Value {
        let (body, approval, transaction) = match ExecutableResult::classify(raw) {
            ExecutableResult::Plain(v) => return v,
            ExecutableResult::InsufficientBalance(body) => return Value::Object(body),
            ExecutableResult::Ready { body, transaction } => (body, None, transaction),
            ExecutableResult::ApprovalRequired {
                body,
                approval,
                transaction,
            } => (body, Some(approval), transaction),
        };

        let Some(wallet) = wallet else {
            return with_execution(body, &ExecutionOutcome::not_executed(MISSING_WALLET_ERROR, None));
        };
        let Some(chain) = self.chains.get(&transaction.chain_id) else {
            let msg = format!("Unsupported chain ID: {}", transaction.chain_id);
            return with_execution(body, &ExecutionOutcome::not_executed(msg, None));
        };

        let stage = if approval.is_some() {
            Stage::ApprovalOrMain
        } else {
            Stage::Main
        };
        tracing::info!(chain = chain.name, chain_id = chain.chain_id, ?stage, "executing on-chain transaction");

        let run = async {
            let approval_done = match &approval {
                Some(a) => {
                    let done = self
                        .sender
                        .send_and_confirm(wallet, chain, a, self.confirmation_timeout)
                        .await?;
                    tracing::info!(tx_hash = %done.tx_hash, "approval confirmed");
                    Some(done)
                }
                None => None,
            };
            let main = self
                .sender
                .send_and_confirm(wallet, chain, &transaction, self.confirmation_timeout)
                .await?;
            tracing::info!(tx_hash = %main.tx_hash, "transaction confirmed");
            Ok::<_, eyre::Report>(ExecutionOutcome::confirmed(main, approval_done))
        };

        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(?stage, error = %format!("{e:#}"), "transaction execution failed");
                ExecutionOutcome::not_executed(format!("{e:#}"), Some(stage))
            }
        };
        with_execution(body, &outcome)
    }
}
