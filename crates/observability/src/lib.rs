use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    events_total: AtomicU64,
    skipped_total: AtomicU64,
    duplicates_total: AtomicU64,
    dialogue_turns_total: AtomicU64,
    lookups_total: AtomicU64,
    assistant_calls_total: AtomicU64,
    fallback_total: AtomicU64,
    deliveries_total: AtomicU64,
    delivery_failures_total: AtomicU64,
    risk_alerts_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub events_total: u64,
    pub skipped_total: u64,
    pub duplicates_total: u64,
    pub dialogue_turns_total: u64,
    pub lookups_total: u64,
    pub assistant_calls_total: u64,
    pub fallback_total: u64,
    pub deliveries_total: u64,
    pub delivery_failures_total: u64,
    pub risk_alerts_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_event(&self) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicate(&self) {
        self.duplicates_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dialogue_turn(&self) {
        self.dialogue_turns_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lookup(&self) {
        self.lookups_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_assistant_call(&self) {
        self.assistant_calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback(&self) {
        self.fallback_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivery(&self) {
        self.deliveries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivery_failure(&self) {
        self.delivery_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_risk_alert(&self) {
        self.risk_alerts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let routed = self
            .events_total
            .load(Ordering::Relaxed)
            .saturating_sub(self.skipped_total.load(Ordering::Relaxed))
            .saturating_sub(self.duplicates_total.load(Ordering::Relaxed));
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            events_total: self.events_total.load(Ordering::Relaxed),
            skipped_total: self.skipped_total.load(Ordering::Relaxed),
            duplicates_total: self.duplicates_total.load(Ordering::Relaxed),
            dialogue_turns_total: self.dialogue_turns_total.load(Ordering::Relaxed),
            lookups_total: self.lookups_total.load(Ordering::Relaxed),
            assistant_calls_total: self.assistant_calls_total.load(Ordering::Relaxed),
            fallback_total: self.fallback_total.load(Ordering::Relaxed),
            deliveries_total: self.deliveries_total.load(Ordering::Relaxed),
            delivery_failures_total: self.delivery_failures_total.load(Ordering::Relaxed),
            risk_alerts_total: self.risk_alerts_total.load(Ordering::Relaxed),
            avg_latency_millis: if routed == 0 {
                0.0
            } else {
                latency as f64 / routed as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,relay_api=info,relay_dispatcher=info,relay_storage=info,tower_http=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
