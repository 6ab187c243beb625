//! Fan-out helpers: launch independent units of work in parallel, join them all, and keep
//! every error instead of only the first.

use std::{future::Future, pin::Pin};

use tokio::task::JoinError;

use crate::error::{AggregateError, TaskError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Spawn every unit and wait for all of them. Results keep the input order.
///
/// A unit that panics yields [`TaskError::Panicked`]; its siblings are not affected.
pub async fn fan_out<T>(units: Vec<BoxFuture<Result<T, TaskError>>>) -> Vec<Result<T, TaskError>>
where
    T: Send + 'static,
{
    let handles: Vec<_> = units.into_iter().map(tokio::spawn).collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap_or_else(|e| Err(joined(e))));
    }
    results
}

/// Split fan-out results into the successful values and the aggregate of the failures.
pub fn partition<T>(results: Vec<Result<T, TaskError>>) -> (Vec<T>, AggregateError) {
    let mut values = Vec::with_capacity(results.len());
    let mut errors = AggregateError::new();
    for r in results {
        match r {
            Ok(v) => values.push(v),
            Err(e) => errors.push(e),
        }
    }
    (values, errors)
}

/// Run every unit concurrently; fail with all collected errors if any unit failed.
pub async fn run_concurrently(units: Vec<BoxFuture<Result<(), TaskError>>>) -> Result<(), TaskError> {
    let (_, errors) = partition(fan_out(units).await);
    errors.into_result()
}

fn joined(err: JoinError) -> TaskError {
    TaskError::Panicked(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn every_unit_runs_despite_failures() {
        let ran = Arc::new(AtomicUsize::new(0));
        let units: Vec<BoxFuture<Result<(), TaskError>>> = (0..4)
            .map(|i| {
                let ran = Arc::clone(&ran);
                Box::pin(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if i % 2 == 0 {
                        Err(TaskError::failed(format!("unit {i}")))
                    } else {
                        Ok(())
                    }
                }) as BoxFuture<_>
            })
            .collect();

        let err = run_concurrently(units).await.unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert_eq!(err.to_string(), "unit 0; unit 2");
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let units: Vec<BoxFuture<Result<u8, TaskError>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async { panic!("boom") }),
        ];
        let results = fan_out(units).await;
        assert!(matches!(results[0], Ok(1)));
        assert!(matches!(results[1], Err(TaskError::Panicked(_))));
    }
}
