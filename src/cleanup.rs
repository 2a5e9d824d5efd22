//! Background sweep of expired auth state.
//!
//! The memory backend never expires entries on its own, so this job
//! periodically evicts challenges and sessions past their TTL along with
//! closed rate-limit windows. Redis-backed stores expire natively and report
//! nothing removed.

use crate::auth::Authenticator;
use crate::storage::RateLimitStore;
use std::sync::Arc;
use std::time::Duration;

/// Rate-limit window used by every limiter in the HTTP layer.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Run the sweep loop.
///
/// Sweeps every `interval`. A failed sweep is logged and retried on the
/// next tick.
pub async fn run_sweep_loop(
    auth: Arc<Authenticator>,
    rate_limits: Arc<dyn RateLimitStore>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        sweep_once(&auth, rate_limits.as_ref()).await;
    }
}

/// One sweep pass over every store.
pub async fn sweep_once(auth: &Authenticator, rate_limits: &dyn RateLimitStore) {
    match auth.sweep().await {
        Ok(report) if report.total() > 0 => {
            tracing::info!(
                challenges = report.challenges,
                admin_challenges = report.admin_challenges,
                sessions = report.sessions,
                trust_sessions = report.trust_sessions,
                "Sweep completed"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Sweep failed"),
    }

    if let Err(e) = rate_limits
        .sweep(RATE_LIMIT_WINDOW_SECS, auth.now())
        .await
    {
        tracing::error!(error = %e, "Rate limit sweep failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::orchestrator::AuthSettings;
    use crate::auth::verify::SignatureVerifier;
    use crate::storage::Stores;

    #[tokio::test]
    async fn test_sweep_once_evicts_expired_challenges() {
        let clock = ManualClock::new(1_000);
        let stores = Stores::memory();
        let rate_limits = stores.rate_limits.clone();
        let auth = Authenticator::new(
            AuthSettings::default(),
            stores,
            SignatureVerifier::default(),
            Arc::new(clock.clone()),
        );

        auth.issue_challenge("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23")
            .await
            .unwrap();
        rate_limits.hit("auth:127.0.0.1", 60, 1_000).await.unwrap();

        clock.advance(301);
        sweep_once(&auth, rate_limits.as_ref()).await;

        assert_eq!(auth.audit().recent(1)[0].event, "sweep_completed");
        // The closed window was dropped, so counting starts over.
        assert_eq!(rate_limits.hit("auth:127.0.0.1", 60, 1_301).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_ticks() {
        let clock = ManualClock::new(1_000);
        let stores = Stores::memory();
        let rate_limits = stores.rate_limits.clone();
        let auth = Arc::new(Authenticator::new(
            AuthSettings::default(),
            stores,
            SignatureVerifier::default(),
            Arc::new(clock.clone()),
        ));

        auth.issue_challenge("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23")
            .await
            .unwrap();
        clock.advance(301);

        let handle = tokio::spawn(run_sweep_loop(
            auth.clone(),
            rate_limits,
            Duration::from_secs(60),
        ));
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.abort();

        assert!(auth
            .audit()
            .recent(10)
            .iter()
            .any(|e| e.event == "sweep_completed"));
    }
}
