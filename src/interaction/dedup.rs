//! Suppression of redelivered Slack events.

use std::{
    collections::{HashSet, VecDeque},
    sync::Mutex,
};

/// A bounded FIFO set of recently seen event ids.
///
/// Once full, inserting a new id evicts the oldest one.
pub struct RecentEvents {
    capacity: usize,
    seen: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Remember `id`, returning `false` if it was already known.
    pub fn insert(&self, id: &str) -> bool {
        // Both collections are updated together, so a poisoned set is still consistent.
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if seen.ids.contains(id) {
            return false;
        }

        if seen.order.len() >= self.capacity
            && let Some(oldest) = seen.order.pop_front()
        {
            seen.ids.remove(&oldest);
        }

        seen.order.push_back(id.to_string());
        seen.ids.insert(id.to_string());

        true
    }
}

// Tests.
