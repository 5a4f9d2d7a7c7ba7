//! Background API key renewal.
//!
//! One worker per process calls [`KeyLifecycle::renew_if_needed`] on a fixed
//! interval, starting immediately. Registration goes through a process-wide
//! flag so a second call to [`try_register`] (e.g. from a test harness that
//! builds the app twice) does not start a second worker. The flag does not
//! coordinate separate processes or hosts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use meshconsole_core::error::LifecycleError;
use meshconsole_core::lifecycle::{KeyLifecycle, RenewalOutcome};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

static REGISTERED: AtomicBool = AtomicBool::new(false);

/// Failed ticks in a row after which failures are logged as errors.
const ESCALATE_AFTER: u32 = 3;

/// Claim the renewal worker slot for this process.
///
/// Returns `true` exactly once.
pub fn try_register() -> bool {
    REGISTERED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Renew the stored key every `interval` until `shutdown` fires.
pub async fn renewal_worker(
    lifecycle: Arc<KeyLifecycle>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut consecutive_failures: u32 = 0;
    info!(interval_secs = interval.as_secs(), "key renewal worker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if tick(&lifecycle).await {
                    consecutive_failures = 0;
                } else {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if consecutive_failures >= ESCALATE_AFTER {
                        error!(consecutive_failures, "API key renewal persistently failing");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("key renewal worker shutting down");
                return;
            }
        }
    }
}

/// One renewal attempt. Returns `false` if it failed.
async fn tick(lifecycle: &KeyLifecycle) -> bool {
    match lifecycle.renew_if_needed().await {
        Ok(RenewalOutcome::NotNeeded(info)) => {
            debug!(prefix = %info.prefix, "API key does not need renewal");
            true
        }
        Ok(RenewalOutcome::Renewed(info)) => {
            info!(prefix = %info.prefix, expiration = ?info.expiration, "API key renewed by scheduler");
            true
        }
        Ok(RenewalOutcome::Failed) => {
            warn!("minted API key failed verification, will retry next tick");
            false
        }
        Err(LifecycleError::Unconfigured) => {
            debug!("no API key saved, skipping renewal");
            true
        }
        Err(e) => {
            warn!(error = %e, "API key renewal failed");
            false
        }
    }
}
