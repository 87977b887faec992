use std::future::Future;

use futures::stream::{self, StreamExt};

/// Run every task with at most `limit` in flight at once.
///
/// A finished task immediately frees its slot for the next queued one. Errors
/// are just values here, so one failing task never stops the others. Results
/// come back in the order the tasks were given, whatever order they finished in.
/// A `limit` of zero is treated as one.
pub async fn run_bounded<F, Fut, T>(tasks: Vec<F>, limit: usize) -> Vec<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let limit = limit.max(1);
    let total = tasks.len();

    let mut finished: Vec<(usize, T)> = stream::iter(tasks.into_iter().enumerate())
        .map(|(idx, task)| async move { (idx, task().await) })
        .buffer_unordered(limit)
        .collect()
        .await;

    debug_assert_eq!(finished.len(), total);
    finished.sort_by_key(|(idx, _)| *idx);
    finished.into_iter().map(|(_, out)| out).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit_and_runs_everything() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10u64)
            .map(|i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Uneven durations so completion order differs from start order.
                    tokio::time::sleep(Duration::from_millis(5 + (i * 7) % 20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    if i % 3 == 0 {
                        Err(format!("upload {i} failed"))
                    } else {
                        Ok(i)
                    }
                }
            })
            .collect();

        let results = run_bounded(tasks, 3).await;

        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 4);
        assert_eq!(results[1], Ok(1));
        assert_eq!(results[9], Err("upload 9 failed".to_string()));
    }

    #[tokio::test]
    async fn zero_limit_still_makes_progress() {
        let tasks: Vec<_> = (0..3).map(|i| move || async move { i * 2 }).collect();
        assert_eq!(run_bounded(tasks, 0).await, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn empty_task_list_resolves_immediately() {
        let tasks: Vec<fn() -> std::future::Ready<()>> = Vec::new();
        assert!(run_bounded(tasks, 4).await.is_empty());
    }
}
