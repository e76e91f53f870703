//! Logging setup and periodic statistics

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::audio::buffer::{BufferStats, SharedJitterBuffer};
use crate::config::LoggingConfig;
use crate::network::receiver::ReceiverStats;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Render one buffer statistics line
pub fn buffer_stats_line(level: usize, stats: &BufferStats) -> String {
    format!(
        "Buffer stats - Level: {}, Underflows: {}, Overflows: {}, Silence: {}, Total: {}, Shed: {}",
        level,
        stats.underflows,
        stats.overflows,
        stats.silence_inserted,
        stats.total_received,
        stats.backlog_discarded
    )
}

/// Logs jitter buffer and ingestion counters on a fixed interval
pub struct StatsReporter {
    buffer: SharedJitterBuffer,
    receiver: Option<Arc<ReceiverStats>>,
}

impl StatsReporter {
    pub fn new(buffer: SharedJitterBuffer) -> Self {
        Self {
            buffer,
            receiver: None,
        }
    }

    pub fn with_receiver(mut self, stats: Arc<ReceiverStats>) -> Self {
        self.receiver = Some(stats);
        self
    }

    /// Log one report. Buffer stats are only logged once an anomaly
    /// counter is non-zero; returns whether they were.
    pub fn report(&self) -> bool {
        if let Some(receiver) = &self.receiver {
            let snapshot = receiver.snapshot();
            tracing::debug!(
                "Receiver stats: {} packets, {} bytes, {} invalid, {} legacy, {} stale, {} errors",
                snapshot.packets_received,
                snapshot.bytes_received,
                snapshot.invalid_packets,
                snapshot.legacy_packets,
                snapshot.stale_purged,
                snapshot.receive_errors
            );
        }

        let stats = self.buffer.stats();
        if !stats.has_anomalies() {
            return false;
        }
        tracing::info!("{}", buffer_stats_line(self.buffer.occupancy(), &stats));
        true
    }

    /// Report every `period` on the current tokio runtime
    pub fn spawn(self, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.report();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_buffer, JitterThresholds};
    use bytes::Bytes;

    #[test]
    fn test_stats_line_format() {
        let stats = BufferStats {
            underflows: 1,
            overflows: 2,
            silence_inserted: 3,
            total_received: 40,
            backlog_discarded: 5,
        };
        assert_eq!(
            buffer_stats_line(7, &stats),
            "Buffer stats - Level: 7, Underflows: 1, Overflows: 2, Silence: 3, Total: 40, Shed: 5"
        );
    }

    #[test]
    fn test_report_only_with_anomalies() {
        let buffer = create_shared_buffer(JitterThresholds::default(), 4).unwrap();
        let reporter = StatsReporter::new(buffer.clone()).with_receiver(Arc::new(ReceiverStats::default()));

        buffer.enqueue(Bytes::from_static(&[0; 4]));
        assert!(!reporter.report());

        buffer.dequeue();
        buffer.dequeue();
        assert!(reporter.report());
    }

    #[tokio::test]
    async fn test_spawned_reporter_can_be_aborted() {
        let buffer = create_shared_buffer(JitterThresholds::default(), 4).unwrap();
        let handle = StatsReporter::new(buffer).spawn(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
