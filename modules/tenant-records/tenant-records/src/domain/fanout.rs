//! Bounded concurrent fan-out of per-tenant calls.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tenant_records_sdk::ConnectorError;

/// Limits applied to every fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutPolicy {
    pub max_in_flight: usize,
    pub call_timeout: Duration,
}

impl Default for FanoutPolicy {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Run `call` for every item with at most `max_in_flight` calls outstanding.
///
/// Each call is bounded by `call_timeout`; an expired call yields
/// [`ConnectorError::Timeout`]. Results come back in input order regardless
/// of completion order, so callers merge them deterministically on a single
/// owner.
pub async fn fan_out<I, T, F, Fut>(
    policy: FanoutPolicy,
    items: Vec<I>,
    call: F,
) -> Vec<(I, Result<T, ConnectorError>)>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let timeout = policy.call_timeout;
    let mut completed: Vec<(usize, I, Result<T, ConnectorError>)> =
        stream::iter(items.into_iter().enumerate().map(|(index, item)| {
            let pending = call(item.clone());
            async move {
                let result = match tokio::time::timeout(timeout, pending).await {
                    Ok(result) => result,
                    Err(_) => Err(ConnectorError::Timeout(timeout)),
                };
                (index, item, result)
            }
        }))
        .buffer_unordered(policy.max_in_flight.max(1))
        .collect()
        .await;

    completed.sort_by_key(|(index, _, _)| *index);
    completed
        .into_iter()
        .map(|(_, item, result)| (item, result))
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(max_in_flight: usize, timeout_ms: u64) -> FanoutPolicy {
        FanoutPolicy {
            max_in_flight,
            call_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_input_order() {
        let items = vec![30_u64, 10, 20];
        let results = fan_out(policy(3, 1_000), items, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, ConnectorError>(delay * 2)
        })
        .await;

        let values: Vec<(u64, u64)> = results
            .into_iter()
            .map(|(item, result)| (item, result.unwrap()))
            .collect();
        assert_eq!(values, [(30, 60), (10, 20), (20, 40)]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_without_blocking_others() {
        let results = fan_out(policy(2, 50), vec![10_u64, 500], |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, ConnectorError>(())
        })
        .await;

        assert!(results[0].1.is_ok());
        assert_eq!(
            results[1].1,
            Err(ConnectorError::Timeout(Duration::from_millis(50)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = fan_out(policy(2, 1_000), (0..6).collect(), |_: u32| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ConnectorError>(())
            }
        })
        .await;

        assert_eq!(results.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_stay_with_their_item() {
        let results = fan_out(policy(4, 1_000), vec!["a", "b"], |item| async move {
            if item == "b" {
                Err(ConnectorError::Fault("locked".to_owned()))
            } else {
                Ok(item.len())
            }
        })
        .await;

        assert_eq!(results[0], ("a", Ok(1)));
        assert_eq!(results[1], ("b", Err(ConnectorError::Fault("locked".to_owned()))));
    }
}
