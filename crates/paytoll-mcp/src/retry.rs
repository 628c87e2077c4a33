use std::future::Future;
use std::time::Duration;

/// Bounded retry across a list of equivalent endpoints (e.g. RPC URLs for one chain).
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Passes over the whole endpoint list.
    pub rounds: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

impl BackoffPolicy {
    /// No sleeping between rounds.
    pub const fn immediate(rounds: u32) -> Self {
        Self {
            rounds,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_max_ms: 0,
        }
    }

    /// Sleep after a failed `round` (0-based): `base * 2^round`, capped, plus jitter.
    pub fn delay_after(&self, round: u32) -> Duration {
        let doubled = self
            .base_delay
            .checked_mul(1_u32.checked_shl(round.min(16)).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay);
        let capped = doubled.min(self.max_delay);
        if self.jitter_max_ms == 0 {
            return capped;
        }
        let jitter = rand::random::<u64>() % self.jitter_max_ms.saturating_add(1);
        capped.saturating_add(Duration::from_millis(jitter))
    }
}

/// Run `op` against each endpoint in order until one succeeds. After a full failed
/// round, back off and start over; the last error is returned with `label` as context.
pub async fn try_all_with_backoff<E, T, Fut>(
    endpoints: &[E],
    policy: &BackoffPolicy,
    mut op: impl FnMut(&E) -> Fut + Send,
    label: &'static str,
) -> eyre::Result<T>
where
    E: Sync,
    Fut: Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("{label}: no endpoints configured");
    }
    let mut last_err = None;
    for round in 0..policy.rounds.max(1) {
        if round > 0 {
            tokio::time::sleep(policy.delay_after(round - 1)).await;
        }
        for endpoint in endpoints {
            match op(endpoint).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::debug!(round, error = %e, "{label}: endpoint failed");
                    last_err = Some(e);
                }
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("no attempt made"))
        .wrap_err(label))
}
