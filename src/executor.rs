// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Background job execution
//!
//! Load jobs and streaming tasks share one worker pool. Jobs never block on
//! other jobs, so a small pool cannot deadlock; callers of the blocking
//! waits (`wait_for_loaded`, `cancel_streaming_tasks`) must not run on a
//! pool thread.

use crate::error::Result;
use std::sync::Arc;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskExecutor: Send + Sync {
    fn spawn(&self, job: Job);

    fn worker_count(&self) -> usize;
}

/// Runs every job on the calling thread before `spawn` returns
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn spawn(&self, job: Job) {
        job();
    }

    fn worker_count(&self) -> usize {
        0
    }
}

/// rayon work-stealing pool
#[cfg(feature = "parallel")]
pub struct ThreadPoolExecutor {
    pool: rayon::ThreadPool,
}

#[cfg(feature = "parallel")]
impl ThreadPoolExecutor {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("asset-worker-{index}"))
            .build()
            .map_err(|e| crate::error::AssetError::Config(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[cfg(feature = "parallel")]
impl TaskExecutor for ThreadPoolExecutor {
    fn spawn(&self, job: Job) {
        self.pool.spawn(job);
    }

    fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Pool of `threads` workers, or the inline executor without the
/// `parallel` feature
pub fn default_executor(threads: usize) -> Result<Arc<dyn TaskExecutor>> {
    #[cfg(feature = "parallel")]
    {
        Ok(Arc::new(ThreadPoolExecutor::new(threads)?))
    }
    #[cfg(not(feature = "parallel"))]
    {
        let _ = threads;
        Ok(Arc::new(InlineExecutor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_inline_executor_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        InlineExecutor.spawn(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_pool_executor_runs_jobs() {
        let executor = ThreadPoolExecutor::new(2).unwrap();
        assert_eq!(executor.worker_count(), 2);
        let (tx, rx) = crossbeam::channel::unbounded();
        for i in 0..8 {
            let tx = tx.clone();
            executor.spawn(Box::new(move || {
                tx.send(i).unwrap();
            }));
        }
        let mut seen: Vec<i32> = (0..8).map(|_| rx.recv().unwrap()).collect();
        seen.sort();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }
}
