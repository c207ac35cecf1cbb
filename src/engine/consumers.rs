//! Which swarms each execution context is in the middle of consuming
//!
//! A swarm counts as being consumed from the moment the caller pulls its
//! first outcome until it is exhausted or dropped. A swarm opened while
//! another one is being consumed from the same context nests below the
//! deepest of them, whether the caller uses [`Swarm::consume`] or a plain
//! `while let` loop.
//!
//! [`Swarm::consume`]: super::Swarm::consume

use crate::request::SwarmId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tokio::task;

/// The task, or for code outside any task the thread, doing the consuming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ContextKey {
    Task(task::Id),
    Thread(ThreadId),
}

impl ContextKey {
    pub(crate) fn current() -> Self {
        match task::try_id() {
            Some(id) => Self::Task(id),
            None => Self::Thread(thread::current().id()),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Consumers {
    active: Mutex<HashMap<ContextKey, Vec<(SwarmId, u32)>>>,
}

impl Consumers {
    fn lock(&self) -> MutexGuard<'_, HashMap<ContextKey, Vec<(SwarmId, u32)>>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records that `context` is consuming `swarm`
    pub(crate) fn enter(&self, context: ContextKey, swarm: SwarmId, depth: u32) {
        let mut active = self.lock();
        let swarms = active.entry(context).or_default();
        if !swarms.iter().any(|(id, _)| *id == swarm) {
            swarms.push((swarm, depth));
        }
    }

    pub(crate) fn leave(&self, context: ContextKey, swarm: SwarmId) {
        let mut active = self.lock();
        if let Some(swarms) = active.get_mut(&context) {
            swarms.retain(|(id, _)| *id != swarm);
            if swarms.is_empty() {
                active.remove(&context);
            }
        }
    }

    /// Depth of the deepest swarm `context` is consuming
    pub(crate) fn deepest(&self, context: ContextKey) -> Option<u32> {
        self.lock()
            .get(&context)
            .and_then(|swarms| swarms.iter().map(|(_, depth)| *depth).max())
    }
}
