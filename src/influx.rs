//! InfluxDB v2 sink.
//!
//! Records are written as one Line Protocol batch:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```

use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use reqwest::{Client, header::AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    config::InfluxSettings,
    midea::{FieldValue, Record},
    sink::Sink,
};

pub const INFLUX_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: Client,
    server: String,
    org: String,
    bucket: String,
    auth: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Health {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl InfluxSink {
    pub fn new(client: Client, settings: &InfluxSettings) -> Self {
        Self {
            client,
            server: settings.server.trim_end_matches('/').to_string(),
            org: settings.org.clone().unwrap_or_default(),
            bucket: settings.bucket.clone(),
            auth: settings.auth_token(),
            timeout: INFLUX_TIMEOUT,
        }
    }

    /// Builds the sink and, unless disabled, checks that the server reports healthy.
    pub async fn connect(client: Client, settings: &InfluxSettings) -> Result<Self> {
        let sink = Self::new(client, settings);
        if !settings.health_check_disabled {
            sink.check_health()
                .await
                .context("failed to check InfluxDB health")?;
            debug!("InfluxDB passed health check");
        }
        Ok(sink)
    }

    pub async fn check_health(&self) -> Result<()> {
        let health: Health = self
            .client
            .get(format!("{}/health", self.server))
            .timeout(self.timeout)
            .send()
            .await
            .context("failed to send health request")?
            .json()
            .await
            .context("failed to decode health response")?;

        if health.status != "pass" {
            bail!(
                "InfluxDB did not pass health check: status {}; message '{}'",
                health.status,
                health.message.unwrap_or_default()
            );
        }

        Ok(())
    }

    /// Writes `records` as one batch and returns the number of points sent.
    pub async fn write_records(&self, records: &[Record]) -> Result<usize> {
        let lines = line_protocol_lines(records);
        if lines.is_empty() {
            debug!("no records with fields to write to InfluxDB");
            return Ok(0);
        }
        let count = lines.len();
        let body = lines.join("\n");

        let mut request = self
            .client
            .post(format!("{}/api/v2/write", self.server))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .timeout(self.timeout)
            .body(body);
        if let Some(auth) = &self.auth {
            request = request.header(AUTHORIZATION, format!("Token {auth}"));
        }

        let response = request.send().await.context("failed to send write request")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("InfluxDB write returned {status}: {text}");
        }

        Ok(count)
    }
}

impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "InfluxDB"
    }

    async fn deliver(&mut self, records: &[Record]) -> Result<()> {
        match self.write_records(records).await? {
            0 => info!("Nothing to write to Influx"),
            count => info!("Wrote {count} points to Influx"),
        }
        Ok(())
    }
}

/// Serializes records as newline-separated Line Protocol. Records without
/// fields are skipped since InfluxDB rejects field-less points.
pub fn to_line_protocol(records: &[Record]) -> String {
    line_protocol_lines(records).join("\n")
}

fn line_protocol_lines(records: &[Record]) -> Vec<String> {
    records.iter().filter_map(record_line).collect()
}

fn record_line(record: &Record) -> Option<String> {
    // InfluxDB has no encoding for NaN or infinities.
    let fields: Vec<_> = record
        .fields
        .iter()
        .filter(|(key, value)| {
            let finite = value.as_f64().is_none_or(f64::is_finite);
            if !finite {
                debug!(device = %record.device_id, "skipping non-finite field {key}={value}");
            }
            finite
        })
        .collect();
    if fields.is_empty() {
        debug!(device = %record.device_id, "skipping point without fields");
        return None;
    }

    let mut line = escape_measurement(&record.measurement);

    // Sorted by key for canonical form
    let mut tags: Vec<_> = record.tags.iter().filter(|(_, v)| !v.is_empty()).collect();
    tags.sort_by_key(|(k, _)| k.as_str());
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');
    for (i, (key, value)) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&field_value(value));
    }

    if let Some(ns) = record.measured_at.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&ns.to_string());
    }

    Some(line)
}

fn field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Boolean(v) => v.to_string(),
        // Float literals without a decimal point are still floats in Line Protocol.
        FieldValue::Float(v) => v.to_string(),
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys share the same escaping rules.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(device_id: &str) -> Record {
        Record::new(
            "midea_dehumidifier",
            device_id,
            DateTime::<Utc>::from_timestamp(1, 0).unwrap(),
        )
    }

    #[test]
    fn line_with_sorted_tags_and_ordered_fields() {
        let mut r = record("DEV1");
        r.add_tag("id", "DEV1");
        r.add_tag("addr", "1.2.3.4");
        r.add_field("online", true);
        r.add_field("temp_c", 20.0);
        r.add_field("temp_f", 68.0);
        r.add_field("humidity_pct", 40.5);

        assert_eq!(
            to_line_protocol(&[r]),
            "midea_dehumidifier,addr=1.2.3.4,id=DEV1 online=true,temp_c=20,temp_f=68,humidity_pct=40.5 1000000000"
        );
    }

    #[test]
    fn escapes_special_characters() {
        let mut r = record("DEV1");
        r.measurement = "my measurement".to_string();
        r.add_tag("name", "Base ment,1=a");
        r.add_field("fan", 3.0);

        assert_eq!(
            to_line_protocol(&[r]),
            "my\\ measurement,name=Base\\ ment\\,1\\=a fan=3 1000000000"
        );
    }

    #[test]
    fn skips_empty_tags_and_fieldless_records() {
        let mut a = record("A");
        a.add_tag("name", "");
        a.add_field("sleep", false);
        let b = record("B");

        assert_eq!(to_line_protocol(&[a, b]), "midea_dehumidifier sleep=false 1000000000");
    }

    #[test]
    fn skips_non_finite_fields() {
        let mut a = record("A");
        a.add_field("online", true);
        a.add_field("temp_c", f64::NAN);
        a.add_field("humidity_pct", f64::INFINITY);
        let mut b = record("B");
        b.add_field("fan", f64::NEG_INFINITY);

        assert_eq!(to_line_protocol(&[a, b]), "midea_dehumidifier online=true 1000000000");
    }

    #[test]
    fn one_line_per_record() {
        let mut a = record("A");
        a.add_field("fan", 1.0);
        let mut b = record("B");
        b.add_field("fan", 2.0);

        assert_eq!(to_line_protocol(&[a, b]).lines().count(), 2);
    }
}
