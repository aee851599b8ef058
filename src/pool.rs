use std::sync::mpsc;

/// Bounded pool of `rayon` worker threads for one phase of a run.
///
/// Results are handed back to the calling thread in completion order, so
/// callers that need a deterministic order sort afterwards.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` over every item; `on_done` observes each result on the
    /// calling thread as it arrives.
    pub fn run<T, R, F, D>(&self, items: Vec<T>, job: F, mut on_done: D) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
        D: FnMut(&R),
    {
        if items.is_empty() {
            return Vec::new();
        }
        let total = items.len();
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.min(total))
            .thread_name(|index| format!("encode-fetch-{index}"))
            .build()
        {
            Ok(pool) => pool,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build worker pool, running serially");
                return items
                    .into_iter()
                    .map(|item| {
                        let result = job(item);
                        on_done(&result);
                        result
                    })
                    .collect();
            }
        };

        let (tx, rx) = mpsc::channel();
        let job = &job;
        let mut results = Vec::with_capacity(total);
        pool.in_place_scope(|scope| {
            for item in items {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    // The receiver outlives every job in this scope.
                    let _ = tx.send(job(item));
                });
            }
            drop(tx);

            for result in rx {
                on_done(&result);
                results.push(result);
            }
        });
        results
    }
}
