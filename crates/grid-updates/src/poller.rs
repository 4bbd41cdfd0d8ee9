use core::future::Future;
use grid_core::{PollingConfig, Result as CoreResult};
use tokio::time::sleep;

/// How a bounded poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// The check returned `true` on attempt number `attempts`.
    Confirmed { attempts: u32 },
    /// Every attempt ran without confirmation.
    Exhausted { attempts: u32 },
}

/// Wait, check, repeat until `check` returns `true` or the attempts run out.
///
/// Each iteration sleeps before checking. A check that errors is logged and
/// counts as one consumed attempt, the same as a check that returns `false`.
pub(crate) async fn poll_until_confirmed<F, Fut>(
    config: &PollingConfig,
    mut check: F,
) -> PollOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CoreResult<bool>>,
{
    let mut interval = config.initial_interval();

    for attempt in 1..=config.max_attempts {
        sleep(interval).await;

        match check(attempt).await {
            Ok(true) => return PollOutcome::Confirmed { attempts: attempt },
            Ok(false) => {
                tracing::trace!("Attempt {attempt}/{} not yet confirmed", config.max_attempts);
            }
            Err(error) => tracing::debug!(
                "Attempt {attempt}/{} failed transiently: {error}",
                config.max_attempts
            ),
        }

        interval = config.next_interval(interval);
    }

    PollOutcome::Exhausted {
        attempts: config.max_attempts,
    }
}
