//! Offline-tolerant reads.

use std::fmt::Display;
use std::future::Future;

use log::warn;

use crate::network::NetworkMonitor;

/// Reads through the remote store when online, degrading to local data.
///
/// - offline: `local_op`, else `fallback`
/// - online: `remote_op`, else `local_op`, else `fallback`
///
/// Never fails. `remote_op` is not invoked while offline.
pub async fn with_fallback<T, R, RFut, RErr, L, LFut, LErr>(
    network: &NetworkMonitor,
    remote_op: R,
    local_op: L,
    fallback: T,
) -> T
where
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<T, RErr>>,
    RErr: Display,
    L: FnOnce() -> LFut,
    LFut: Future<Output = Result<T, LErr>>,
    LErr: Display,
{
    if network.is_online() {
        match remote_op().await {
            Ok(value) => return value,
            Err(e) => warn!("Remote read failed, falling back to local cache: {e}"),
        }
    }

    match local_op().await {
        Ok(value) => value,
        Err(e) => {
            warn!("Local read failed, using fallback value: {e}");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn offline_never_calls_remote() {
        let network = NetworkMonitor::new(false);
        let remote_calls = AtomicUsize::new(0);

        let value = with_fallback(
            &network,
            || async {
                remote_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(1)
            },
            || async { Ok::<_, String>(2) },
            0,
        )
        .await;

        assert_eq!(value, 2);
        assert_eq!(remote_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn online_remote_failure_degrades_to_local() {
        let network = NetworkMonitor::new(true);
        let value = with_fallback(
            &network,
            || async { Err::<i32, _>("timeout") },
            || async { Ok::<_, String>(2) },
            0,
        )
        .await;
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn every_failure_ends_in_fallback() {
        let online = NetworkMonitor::new(true);
        let value = with_fallback(
            &online,
            || async { Err::<Vec<i32>, _>("remote down") },
            || async { Err::<Vec<i32>, _>("disk gone") },
            vec![7],
        )
        .await;
        assert_eq!(value, vec![7]);

        let offline = NetworkMonitor::new(false);
        let value = with_fallback(
            &offline,
            || async { Ok::<_, String>(1) },
            || async { Err::<i32, _>("disk gone") },
            -1,
        )
        .await;
        assert_eq!(value, -1);
    }

    #[tokio::test]
    async fn online_prefers_remote() {
        let network = NetworkMonitor::new(true);
        let value = with_fallback(
            &network,
            || async { Ok::<_, String>("remote") },
            || async { Ok::<_, String>("local") },
            "none",
        )
        .await;
        assert_eq!(value, "remote");
    }
}
