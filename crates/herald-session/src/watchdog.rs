//! Resident memory watchdog.
//!
//! Polls the process's resident set size and hands a `ResourceExhausted`
//! error to the exit hook the first time it crosses the limit. The hook is
//! expected to end the process on the spot; nothing is flushed first.

use std::time::Duration;

use herald_shared::HeraldError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

const PROC_STATUS: &str = "/proc/self/status";

/// Source of the current resident memory figure.
pub trait MemoryProbe: Send + Sync {
    fn resident_mb(&self) -> std::io::Result<u64>;
}

/// Reads `VmRSS` from `/proc/self/status`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStatusProbe;

impl MemoryProbe for ProcStatusProbe {
    fn resident_mb(&self) -> std::io::Result<u64> {
        let status = std::fs::read_to_string(PROC_STATUS)?;
        parse_vm_rss_kb(&status)
            .map(|kb| kb / 1024)
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "no VmRSS line")
            })
    }
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

pub struct MemoryWatchdog {
    probe: Box<dyn MemoryProbe>,
    limit_mb: u64,
    interval: Duration,
}

impl MemoryWatchdog {
    pub fn new(probe: Box<dyn MemoryProbe>, limit_mb: u64, interval: Duration) -> Self {
        Self {
            probe,
            limit_mb,
            interval,
        }
    }

    /// One probe. Probe failures are not fatal and read as `Ok`.
    pub fn check(&self) -> Result<u64, HeraldError> {
        let used_mb = match self.probe.resident_mb() {
            Ok(mb) => mb,
            Err(e) => {
                debug!(error = %e, "memory probe unavailable");
                return Ok(0);
            }
        };

        if used_mb > self.limit_mb {
            return Err(HeraldError::ResourceExhausted {
                used_mb,
                limit_mb: self.limit_mb,
            });
        }
        Ok(used_mb)
    }

    /// Probe every interval until the limit trips, then call `on_exceeded`
    /// once and stop.
    pub fn spawn<F>(self, on_exceeded: F) -> JoinHandle<()>
    where
        F: FnOnce(HeraldError) + Send + 'static,
    {
        tokio::spawn(async move {
            if self.probe.resident_mb().is_err() {
                warn!("resident memory cannot be measured on this platform, watchdog idle");
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.check() {
                    error!(error = %e, "memory limit exceeded, exiting");
                    on_exceeded(e);
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_shared::ErrorKind;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct FixedProbe(Arc<AtomicU64>);

    impl MemoryProbe for FixedProbe {
        fn resident_mb(&self) -> std::io::Result<u64> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\therald\nVmPeak:\t  900000 kB\nVmRSS:\t  430080 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss_kb(status), Some(430080));
        assert_eq!(parse_vm_rss_kb("Name:\tx\n"), None);
    }

    #[test]
    fn test_check_against_limit() {
        let used = Arc::new(AtomicU64::new(120));
        let watchdog = MemoryWatchdog::new(
            Box::new(FixedProbe(Arc::clone(&used))),
            400,
            Duration::from_secs(30),
        );
        assert_eq!(watchdog.check().unwrap(), 120);

        used.store(420, Ordering::SeqCst);
        let err = watchdog.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(err.exit_code(), Some(2));
    }

    #[tokio::test]
    async fn test_trip_calls_exit_hook_without_flushing() {
        let dir = tempfile::tempdir().unwrap();
        let store = herald_store::Store::open_at(dir.path().join("store.json")).await;
        store
            .put(herald_store::StoreRecord::new(
                "1@s.whatsapp.net".parse().unwrap(),
                "M1",
                serde_json::json!("pending"),
            ))
            .await;

        let used = Arc::new(AtomicU64::new(420));
        let watchdog = MemoryWatchdog::new(
            Box::new(FixedProbe(used)),
            400,
            Duration::from_millis(5),
        );

        let (tx, rx) = tokio::sync::oneshot::channel();
        let task = watchdog.spawn(move |err| {
            let _ = tx.send(err.exit_code());
        });

        assert_eq!(rx.await.unwrap(), Some(2));
        task.await.unwrap();
        assert!(store.is_dirty().await, "the watchdog must not flush");
    }
}
