use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct EventLedger {
    inner: Arc<Mutex<HashMap<String, VecDeque<(String, DateTime<Utc>)>>>>,
    per_user: usize,
}

impl Default for EventLedger {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventLedger {
    pub fn new(per_user: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            per_user: per_user.max(1),
        }
    }

    pub fn record(
        &self,
        user_id: &str,
        event_id: &str,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> bool {
        let mut guard = self.inner.lock();
        let queue = guard.entry(user_id.to_string()).or_default();

        queue.retain(|(_, seen_at)| *seen_at >= not_before);
        if queue.iter().any(|(seen, _)| seen == event_id) {
            return false;
        }

        queue.push_back((event_id.to_string(), now));
        while queue.len() > self.per_user {
            queue.pop_front();
        }
        true
    }

    pub fn forget_before(&self, cutoff: DateTime<Utc>) -> u64 {
        let mut removed = 0_u64;
        self.inner.lock().retain(|_, queue| {
            let before = queue.len();
            queue.retain(|(_, seen_at)| *seen_at >= cutoff);
            removed += (before - queue.len()) as u64;
            !queue.is_empty()
        });
        removed
    }
}
