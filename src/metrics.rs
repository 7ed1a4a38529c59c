//! Prometheus metrics and tracing span helpers.
//!
//! Metrics live behind the `metrics` feature, spans behind `tracing`.

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::{UpkeepMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram, MeterProvider as _},
    };
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<UpkeepMetrics> = Lazy::new(UpkeepMetrics::init);

    pub struct UpkeepMetrics {
        registry: Registry,
        pub query_duration: Histogram<f64>,
        pub query_errors_total: Counter<u64>,
        pub completions_total: Counter<u64>,
        pub completion_replays_total: Counter<u64>,
        pub stock_conflicts_total: Counter<u64>,
        pub stock_restorations_total: Counter<u64>,
        pub notification_failures_total: Counter<u64>,
    }

    impl UpkeepMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let meter = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => {
                    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
                    let meter = provider.meter("upkeep");
                    global::set_meter_provider(provider);
                    meter
                }
                Err(e) => {
                    log::warn!("prometheus exporter unavailable, metrics are not exported: {e}");
                    global::meter("upkeep")
                }
            };

            Self {
                registry,
                query_duration: meter
                    .f64_histogram("upkeep_query_duration_seconds")
                    .with_description("Duration of storage queries")
                    .build(),
                query_errors_total: meter
                    .u64_counter("upkeep_query_errors_total")
                    .with_description("Storage queries that failed")
                    .build(),
                completions_total: meter
                    .u64_counter("upkeep_schedule_completions_total")
                    .with_description("Schedule completions committed")
                    .build(),
                completion_replays_total: meter
                    .u64_counter("upkeep_completion_replays_total")
                    .with_description("Finalize calls resolved through an existing idempotency key")
                    .build(),
                stock_conflicts_total: meter
                    .u64_counter("upkeep_stock_conflicts_total")
                    .with_description("Parts consumptions rejected for insufficient stock")
                    .build(),
                stock_restorations_total: meter
                    .u64_counter("upkeep_stock_restorations_total")
                    .with_description("Usage records restored to stock on work-order deletion")
                    .build(),
                notification_failures_total: meter
                    .u64_counter("upkeep_notification_failures_total")
                    .with_description("Notifications that could not be queued or delivered")
                    .build(),
            }
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_completion(&self, replayed: bool) {
            if replayed {
                self.completion_replays_total.add(1, &[]);
            } else {
                self.completions_total.add(1, &[]);
            }
        }

        pub fn record_stock_conflict(&self) {
            self.stock_conflicts_total.add(1, &[]);
        }

        pub fn record_stock_restorations(&self, records: usize) {
            self.stock_restorations_total.add(records as u64, &[]);
        }

        pub fn record_notification_failure(&self) {
            self.notification_failures_total.add(1, &[]);
        }

        /// Render the registry in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            let mut buf = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
                log::warn!("failed to encode metrics: {e}");
            }
            String::from_utf8_lossy(&buf).into_owned()
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};
    use uuid::Uuid;

    pub fn execute_query_span(query: &str) -> Span {
        // Keep the span label bounded; statements can be long.
        let statement: String = query.trim().chars().take(120).collect();
        info_span!("upkeep.query", db.statement = %statement)
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("upkeep.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("upkeep.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("upkeep.transaction.rollback")
    }

    pub fn finalize_completion_span(schedule_id: Uuid, idempotency_key: Uuid) -> Span {
        info_span!(
            "upkeep.lifecycle.finalize",
            schedule.id = %schedule_id,
            idempotency.key = %idempotency_key
        )
    }

    pub fn delete_work_order_span(work_order_id: Uuid) -> Span {
        info_span!("upkeep.work_order.delete", work_order.id = %work_order_id)
    }
}
