//! Cooperative task table. Each entry owns an interval and a last-run stamp;
//! a cycle asks which entries are due and runs them in table order.

use std::time::Duration;

#[derive(Debug, Clone)]
struct Task<K> {
    kind: K,
    interval_ms: u64,
    last_run: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Scheduler<K> {
    tasks: Vec<Task<K>>,
}

impl<K: Copy + PartialEq> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + PartialEq> Scheduler<K> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Register `kind` to run every `interval`. A zero interval runs every
    /// cycle.
    pub fn every(mut self, kind: K, interval: Duration) -> Self {
        self.tasks.push(Task {
            kind,
            interval_ms: interval.as_millis() as u64,
            last_run: None,
        });
        self
    }

    /// Kinds due at `now_ms`, in registration order, marked as run. A task
    /// that has never run is due immediately.
    pub fn due(&mut self, now_ms: u64) -> Vec<K> {
        self.tasks
            .iter_mut()
            .filter(|t| match t.last_run {
                None => true,
                Some(last) => now_ms.saturating_sub(last) >= t.interval_ms,
            })
            .map(|t| {
                t.last_run = Some(now_ms);
                t.kind
            })
            .collect()
    }

    /// Record that `kind` ran at `now_ms` outside its normal slot.
    pub fn mark_run(&mut self, kind: K, now_ms: u64) {
        if let Some(t) = self.tasks.iter_mut().find(|t| t.kind == kind) {
            t.last_run = Some(now_ms);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
