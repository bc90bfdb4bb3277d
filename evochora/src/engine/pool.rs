// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The tick worker pool.
//!
//! A fixed set of threads is created once at engine construction and
//! parked between dispatches; per-tick dispatch costs one scoped handoff
//! per chunk rather than a new task graph. The dispatching thread runs
//! the first chunk itself. Worker panics are caught into a first-wins
//! cell and resumed on the dispatching thread after the barrier.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use yastl::{Pool, ThreadConfig};

pub(crate) struct TickPool {
    pool: Pool,
    threads: usize,
}

impl TickPool {
    pub fn new(threads: usize) -> TickPool {
        debug_assert!(threads >= 2);
        TickPool {
            // The dispatching thread takes the first chunk, so the pool
            // itself needs one thread fewer than the configured
            // parallelism.
            pool: Pool::with_config(threads - 1, ThreadConfig::new().prefix("evochora-tick")),
            threads,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `task` over every item, chunks beyond the first on pool
    /// threads, the first on the calling thread. Returns after all items
    /// complete (the phase barrier); the first captured panic is resumed
    /// here.
    pub fn execute<T, F>(&self, items: &mut [T], task: F)
    where
        T: Send,
        F: Fn(&mut T) + Sync,
    {
        let first_panic: Mutex<Option<Box<dyn std::any::Any + Send>>> = Mutex::new(None);
        let task = &task;
        let capture = |item: &mut T| {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task(item))) {
                let mut slot = first_panic.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(payload);
                }
            }
        };

        self.pool.scoped(|scope| {
            let mut iter = items.iter_mut();
            let own = iter.next();
            for item in iter {
                scope.execute(|| capture(item));
            }
            if let Some(item) = own {
                capture(item);
            }
        });

        if let Some(payload) = first_panic.into_inner().unwrap() {
            resume_unwind(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn runs_every_chunk_exactly_once() {
        let pool = TickPool::new(4);
        let counter = AtomicUsize::new(0);
        let mut items: Vec<usize> = (0..16).collect();
        pool.execute(&mut items, |item| {
            *item += 1;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert!(items.iter().enumerate().all(|(i, v)| *v == i + 1));
    }

    #[test]
    fn panics_resume_on_the_dispatching_thread() {
        let pool = TickPool::new(2);
        let mut items: Vec<usize> = (0..4).collect();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            pool.execute(&mut items, |item| {
                if *item == 2 {
                    panic!("worker fault");
                }
            });
        }));
        assert!(result.is_err());
    }
}
