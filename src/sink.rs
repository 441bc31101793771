use std::future::Future;

use anyhow::Result;
use thiserror::Error;
use tracing::error;

use crate::{
    influx::InfluxSink,
    midea::{Record, filter_reportable},
    mqtt::{BrokerSink, MqttPublisher},
    retry::{RetryPolicy, retry},
};

/// A telemetry destination that accepts a batch of records.
pub trait Sink {
    fn name(&self) -> &'static str;

    fn deliver(&mut self, records: &[Record]) -> impl Future<Output = Result<()>>;
}

/// The sinks a run can be configured with; each is independently optional.
#[derive(Debug)]
pub enum ConfiguredSink {
    TimeSeries(InfluxSink),
    Broker(BrokerSink<MqttPublisher>),
}

impl Sink for ConfiguredSink {
    fn name(&self) -> &'static str {
        match self {
            ConfiguredSink::TimeSeries(s) => s.name(),
            ConfiguredSink::Broker(s) => s.name(),
        }
    }

    async fn deliver(&mut self, records: &[Record]) -> Result<()> {
        match self {
            ConfiguredSink::TimeSeries(s) => s.deliver(records).await,
            ConfiguredSink::Broker(s) => s.deliver(records).await,
        }
    }
}

impl ConfiguredSink {
    /// Releases the sink's connection, if it holds one.
    pub async fn close(self) {
        match self {
            ConfiguredSink::TimeSeries(_) => {}
            ConfiguredSink::Broker(s) => s.into_publisher().disconnect().await,
        }
    }
}

#[derive(Debug)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub result: Result<()>,
}

impl SinkOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no devices with data to report found")]
pub struct NothingToReport;

pub const EXIT_FAILURE: u8 = 1;

pub const EXIT_NO_DEVICES: u8 = 11;

/// `EX_CONFIG` from sysexits.h.
pub const EXIT_NOT_CONFIGURED: u8 = 78;

/// How a run ended, which decides the exit code and whether the heartbeat is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Delivered,
    NothingToReport,
    /// Names of the sinks that exhausted their retries.
    SinkFailed(Vec<&'static str>),
    NotConfigured,
    /// A precondition failed before any delivery was attempted.
    Failed,
}

impl RunStatus {
    pub fn from_report(result: &Result<Vec<SinkOutcome>, NothingToReport>) -> Self {
        let outcomes = match result {
            Ok(o) => o,
            Err(NothingToReport) => return RunStatus::NothingToReport,
        };

        let failed: Vec<&'static str> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.sink)
            .collect();
        if failed.is_empty() {
            RunStatus::Delivered
        } else {
            RunStatus::SinkFailed(failed)
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Delivered => 0,
            RunStatus::NothingToReport => EXIT_NO_DEVICES,
            RunStatus::SinkFailed(_) | RunStatus::Failed => EXIT_FAILURE,
            RunStatus::NotConfigured => EXIT_NOT_CONFIGURED,
        }
    }

    /// Only a run that delivered to every sink counts as alive.
    pub fn sends_heartbeat(&self) -> bool {
        matches!(self, RunStatus::Delivered)
    }
}

/// Filters `records` and delivers the survivors to every sink in turn.
///
/// Each sink gets its own retry budget; a sink that exhausts it is reported in
/// its [`SinkOutcome`] and the remaining sinks are still attempted. Sinks are
/// never called when no record survives filtering.
pub async fn report<S: Sink>(
    records: Vec<Record>,
    sinks: &mut [S],
    policy: RetryPolicy,
) -> Result<Vec<SinkOutcome>, NothingToReport> {
    let records = filter_reportable(records);
    if records.is_empty() {
        return Err(NothingToReport);
    }

    Ok(dispatch(&records, sinks, policy).await)
}

pub async fn dispatch<S: Sink>(
    records: &[Record],
    sinks: &mut [S],
    policy: RetryPolicy,
) -> Vec<SinkOutcome> {
    let mut outcomes = Vec::with_capacity(sinks.len());

    for sink in sinks.iter_mut() {
        let name = sink.name();
        let result = retry(policy, &format!("delivery to {name}"), async || {
            sink.deliver(records).await
        })
        .await;
        if let Err(err) = &result {
            error!(
                "Failed to deliver {} records to {name}: {err:#}",
                records.len()
            );
        }
        outcomes.push(SinkOutcome { sink: name, result });
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::bail;
    use chrono::{DateTime, Utc};

    use super::*;

    #[derive(Debug)]
    struct FakeSink {
        name: &'static str,
        failures_left: usize,
        calls: usize,
        delivered: Vec<String>,
    }

    impl FakeSink {
        fn new(name: &'static str, failures: usize) -> Self {
            Self {
                name,
                failures_left: failures,
                calls: 0,
                delivered: Vec::new(),
            }
        }
    }

    impl Sink for FakeSink {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn deliver(&mut self, records: &[Record]) -> Result<()> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                bail!("{} unavailable", self.name);
            }
            self.delivered = records.iter().map(|r| r.device_id.clone()).collect();
            Ok(())
        }
    }

    const POLICY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1));

    fn record(device_id: &str, online: bool) -> Record {
        let mut r = Record::new("midea_dehumidifier", device_id, DateTime::<Utc>::UNIX_EPOCH);
        r.add_field("online", online);
        r.add_field("temp_c", 21.0);
        r
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_to_report_skips_sinks() {
        let mut sinks = [FakeSink::new("a", 0), FakeSink::new("b", 0)];

        let result = report(vec![record("A", false)], &mut sinks, POLICY).await;

        assert_eq!(result.unwrap_err(), NothingToReport);
        assert!(sinks.iter().all(|s| s.calls == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_filtered_records_to_every_sink() {
        let mut sinks = [FakeSink::new("a", 0), FakeSink::new("b", 0)];

        let outcomes = report(
            vec![record("A", true), record("B", false), record("C", true)],
            &mut sinks,
            POLICY,
        )
        .await
        .unwrap();

        assert!(outcomes.iter().all(SinkOutcome::is_success));
        for sink in &sinks {
            assert_eq!(sink.delivered, ["A", "C"]);
        }
    }

    #[test]
    fn run_status_exit_codes() {
        assert_eq!(RunStatus::Delivered.exit_code(), 0);
        assert_eq!(RunStatus::NothingToReport.exit_code(), 11);
        assert_eq!(RunStatus::SinkFailed(vec!["MQTT"]).exit_code(), 1);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::NotConfigured.exit_code(), 78);
    }

    #[test]
    fn heartbeat_only_after_full_delivery() {
        assert!(RunStatus::Delivered.sends_heartbeat());
        assert!(!RunStatus::NothingToReport.sends_heartbeat());
        assert!(!RunStatus::SinkFailed(vec!["InfluxDB"]).sends_heartbeat());
        assert!(!RunStatus::NotConfigured.sends_heartbeat());
        assert!(!RunStatus::Failed.sends_heartbeat());
    }

    #[tokio::test(start_paused = true)]
    async fn status_from_nothing_to_report() {
        let mut sinks = [FakeSink::new("a", 0)];

        let result = report(vec![record("A", false)], &mut sinks, POLICY).await;

        assert_eq!(RunStatus::from_report(&result), RunStatus::NothingToReport);
    }

    #[tokio::test(start_paused = true)]
    async fn status_names_every_failed_sink() {
        let mut sinks = [
            FakeSink::new("a", 3),
            FakeSink::new("b", 0),
            FakeSink::new("c", 5),
        ];

        let result = report(vec![record("A", true)], &mut sinks, POLICY).await;

        assert_eq!(
            RunStatus::from_report(&result),
            RunStatus::SinkFailed(vec!["a", "c"])
        );
        assert_eq!(sinks[1].delivered, ["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn status_delivered_after_retry() {
        let mut sinks = [FakeSink::new("a", 2), FakeSink::new("b", 0)];

        let result = report(vec![record("A", true)], &mut sinks, POLICY).await;

        assert_eq!(RunStatus::from_report(&result), RunStatus::Delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sink_does_not_block_the_next() {
        let mut sinks = [FakeSink::new("a", 5), FakeSink::new("b", 1)];

        let outcomes = dispatch(&[record("A", true)], &mut sinks, POLICY).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].sink, "a");
        assert!(!outcomes[0].is_success());
        assert_eq!(sinks[0].calls, 3);
        assert!(outcomes[1].is_success());
        assert_eq!(sinks[1].calls, 2);
        assert_eq!(sinks[1].delivered, ["A"]);
    }
}
