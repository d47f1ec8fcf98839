use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Invoke `check` until it returns true or `attempts` are exhausted, with a
/// fixed `delay` between attempts. Returns whether the predicate ever
/// succeeded; "not yet ready" is never an error.
pub async fn until<F, Fut>(attempts: u32, delay: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    until_some(attempts, delay, || {
        let fut = check();
        async move { fut.await.then_some(()) }
    })
    .await
    .is_some()
}

/// Same budget/delay contract, for predicates that produce a value when
/// ready.
pub async fn until_some<T, F, Fut>(attempts: u32, delay: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=attempts {
        if let Some(value) = check().await {
            return Some(value);
        }
        if attempt < attempts {
            sleep(delay).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let calls = Cell::new(0u32);
        let ok = until(5, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            let ready = calls.get() == 3;
            async move { ready }
        })
        .await;
        assert!(ok);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn exhausts_the_budget_and_reports_failure() {
        let calls = Cell::new(0u32);
        let ok = until(4, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            async { false }
        })
        .await;
        assert!(!ok);
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn zero_attempts_never_invokes_the_predicate() {
        let calls = Cell::new(0u32);
        let ok = until(0, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            async { true }
        })
        .await;
        assert!(!ok);
        assert_eq!(calls.get(), 0);
    }
}
