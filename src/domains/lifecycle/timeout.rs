use std::future::Future;
use std::time::Duration;

use crate::errors::CellyardError;

/// Races `fut` against `budget`.
///
/// On expiry the future is dropped, so a late result is never observed, and
/// the error wraps `CellyardError::StepTimeout` naming `step`.
pub async fn run_with_timeout<T, F>(step: &str, budget: Duration, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(CellyardError::step_timeout(step, budget).into()),
    }
}

pub fn is_timeout(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<CellyardError>()
        .is_some_and(CellyardError::is_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn returns_result_when_action_finishes_first() {
        let value = run_with_timeout("fast", Duration::from_secs(1), async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn propagates_action_error_unchanged() {
        let err = run_with_timeout::<(), _>("failing", Duration::from_secs(1), async {
            Err(anyhow::anyhow!("boom"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!is_timeout(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_is_never_observed() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let err = run_with_timeout("stop_services", Duration::from_millis(50), async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            flag.store(true, Ordering::SeqCst);
            Ok("late")
        })
        .await
        .unwrap_err();

        assert!(is_timeout(&err));
        assert_eq!(
            err.downcast_ref::<CellyardError>(),
            Some(&CellyardError::StepTimeout {
                step: "stop_services".into(),
                budget_ms: 50
            })
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
