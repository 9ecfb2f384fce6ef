//! Bounded cooperative fan-out over a fixed item list.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    /// A ceiling of zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `worker` once per item with at most `concurrency` in flight. Results come
    /// back in input order; one item's error never stops the others.
    pub async fn run<I, T, E, F, Fut>(&self, items: &[I], worker: F) -> Vec<Result<T, E>>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cursor = AtomicUsize::new(0);
        let cursor = &cursor;
        let worker = &worker;

        let runners = (0..self.concurrency).map(move |_| async move {
            let mut finished = Vec::new();
            loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(index) else {
                    break;
                };
                finished.push((index, worker(item.clone()).await));
            }
            finished
        });

        let mut slots: Vec<Option<Result<T, E>>> = items.iter().map(|_| None).collect();
        for (index, result) in join_all(runners).await.into_iter().flatten() {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn results_follow_input_order_not_completion_order() {
        let items: Vec<u32> = (0..8).collect();
        let results = WorkerPool::new(3)
            .run(&items, |n| async move {
                for _ in 0..(8 - n) {
                    tokio::task::yield_now().await;
                }
                Ok::<_, String>(n * 10)
            })
            .await;

        let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn every_item_runs_once_and_failures_stay_isolated() {
        let items: Vec<u32> = (0..20).collect();
        let seen = Mutex::new(Vec::new());
        let results = WorkerPool::new(4)
            .run(&items, |n| {
                seen.lock().unwrap().push(n);
                async move {
                    tokio::task::yield_now().await;
                    if n % 3 == 0 {
                        Err(format!("item {n} failed"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, items);
        assert_eq!(results.len(), 20);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 7);
        assert_eq!(results[3], Err("item 3 failed".to_string()));
        assert_eq!(results[4], Ok(4));
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_the_ceiling() {
        let items: Vec<u32> = (0..12).collect();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let (in_flight, peak) = (&in_flight, &peak);
        WorkerPool::new(3)
            .run(&items, |_| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            })
            .await;

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {peak}");
        assert!(peak > 1, "runners should overlap, peak {peak}");
    }

    #[tokio::test]
    async fn zero_concurrency_still_processes_everything() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.concurrency(), 1);
        let results = pool
            .run(&["a", "b"][..], |s| async move { Ok::<_, ()>(s.len()) })
            .await;
        assert_eq!(results, vec![Ok(1), Ok(1)]);

        let empty: Vec<u8> = Vec::new();
        assert!(pool.run(&empty, |b| async move { Ok::<_, ()>(b) }).await.is_empty());
    }
}
