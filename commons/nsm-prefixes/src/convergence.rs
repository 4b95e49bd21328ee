use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};

use crate::{Normalization, PrefixError, PrefixSet, Result};

/// Union of the layers in the order given (cluster, env, user). The first
/// occurrence of a prefix decides its position; empty layers add nothing.
pub fn compute_expected<'a, I>(layers: I) -> PrefixSet
where
    I: IntoIterator<Item = &'a PrefixSet>,
{
    let mut expected = PrefixSet::new();
    for layer in layers {
        expected.extend(layer.iter());
    }
    expected
}

pub fn normalize(set: &PrefixSet, mode: Normalization) -> Result<PrefixSet> {
    match mode {
        Normalization::Coalesce => set.coalesce(),
        Normalization::Verbatim => Ok(set.clone()),
    }
}

/// Poll `observe` until it yields a set equal to `expected`.
///
/// Retryable observation errors are logged and polled again; any other error
/// ends the wait. The last poll happens at the deadline. An attempt may run
/// until the deadline or one poll interval past its start, whichever is later.
/// The timeout error carries the last set actually seen, if any.
pub async fn wait_for_convergence<F, Fut>(
    expected: &PrefixSet,
    mut observe: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<PrefixSet>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PrefixSet>>,
{
    let deadline = Instant::now() + timeout;
    let mut last_observed = None;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let cutoff = deadline.max(Instant::now() + poll_interval);
        match timeout_at(cutoff, observe()).await {
            Ok(Ok(observed)) => {
                if &observed == expected {
                    info!(%observed, attempts, "prefixes converged");
                    return Ok(observed);
                }
                debug!(%observed, %expected, "prefixes differ");
                last_observed = Some(observed);
            }
            Ok(Err(e)) if e.is_retryable() => {
                debug!(error = %e, "observation failed, retrying");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => debug!("observation timed out"),
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(%expected, attempts, "prefixes did not converge");
            return Err(PrefixError::ConvergenceTimeout {
                timeout,
                expected: expected.clone(),
                last_observed,
            });
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Check that `check` never reports ready during `window`.
///
/// Retryable errors are polled again, others end the check. At least one
/// readiness query has to succeed, otherwise the check proves nothing and fails
/// with [`PrefixError::ReadinessUnknown`].
pub async fn expect_never_ready<F, Fut>(
    what: &str,
    mut check: F,
    window: Duration,
    poll_interval: Duration,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + window;
    let mut observed = 0u32;
    let mut last_error = None;
    loop {
        let cutoff = deadline.max(Instant::now() + poll_interval);
        match timeout_at(cutoff, check()).await {
            Ok(Ok(true)) => {
                return Err(PrefixError::UnexpectedReady(what.to_string()));
            }
            Ok(Ok(false)) => observed += 1,
            Ok(Err(e)) if e.is_retryable() => {
                debug!(error = %e, "readiness query failed");
                last_error = Some(e.to_string());
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => last_error = Some("readiness query timed out".to_string()),
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
    if observed == 0 {
        return Err(PrefixError::ReadinessUnknown {
            what: what.to_string(),
            window,
            last_error: last_error.unwrap_or_else(|| "no readiness query ran".to_string()),
        });
    }
    debug!(what, observed, "stayed unready");
    Ok(())
}
