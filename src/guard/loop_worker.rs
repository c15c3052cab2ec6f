use chrono::Utc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::LimitGuard;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const EVALUATION_TIMEOUT_SECS: u64 = 30;

/// Periodic daily-limit sweep. The cadence comes from the settings store at
/// spawn time; the cap and countdown values are re-read on every evaluation,
/// so those reload without restarting the loop.
pub async fn limit_guard_loop(guard: LimitGuard, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(guard.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fut = guard.evaluate_all(Utc::now());

                match tokio::time::timeout(Duration::from_secs(EVALUATION_TIMEOUT_SECS), fut).await {
                    Ok(Ok(())) => {},
                    Ok(Err(err)) => log_error!("daily limit evaluation failed: {err:?}"),
                    Err(_) => log_warn!("daily limit evaluation timeout (> {}s)", EVALUATION_TIMEOUT_SECS),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("limit guard loop shutting down");
                break;
            }
        }
    }
}
