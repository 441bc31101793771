use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::{
    conv::{parse_bool, parse_reading},
    midea::Record,
};

const DEVICE_MARKER_PREFIX: &str = "id ";

/// Parses the text printed by `midea-beautiful-air-cli discover` into one
/// [`Record`] per device, in report order.
///
/// Malformed lines and unparseable values are skipped; parsing itself never
/// fails.
pub fn parse_report(report: &str, measurement: &str, measured_at: DateTime<Utc>) -> Vec<Record> {
    let mut parser = ReportParser::new(measurement, measured_at);
    for line in report.split('\n') {
        parser.feed_line(line);
    }
    parser.finish()
}

#[derive(Debug)]
struct ReportParser<'a> {
    measurement: &'a str,
    measured_at: DateTime<Utc>,
    records: Vec<Record>,
    current: Option<usize>,
}

impl<'a> ReportParser<'a> {
    fn new(measurement: &'a str, measured_at: DateTime<Utc>) -> Self {
        Self {
            measurement,
            measured_at,
            records: Vec::new(),
            current: None,
        }
    }

    fn feed_line(&mut self, raw: &str) {
        if let Some(device_id) = device_marker(raw) {
            let record = Record::new(self.measurement, device_id, self.measured_at);
            self.records.push(record);
            self.current = Some(self.records.len() - 1);
            return;
        }

        let line = raw.trim();
        if line.is_empty() {
            return;
        }

        let Some((key, value)) = line.split_once('=') else {
            debug!("ignoring line of unknown format: '{line}'");
            return;
        };
        let (key, value) = (key.trim(), value.trim());

        let Some(record) = self.current.and_then(|i| self.records.get_mut(i)) else {
            debug!("ignoring '{key} = {value}' before any device line");
            return;
        };

        apply_entry(record, key, value);
    }

    fn finish(self) -> Vec<Record> {
        self.records
    }
}

/// Returns the device ID when `raw` is a device-start line such as
/// `id 192.168.1.20/12345678`.
fn device_marker(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix(DEVICE_MARKER_PREFIX)?.trim();
    if rest.starts_with('=') {
        return None;
    }
    let (_, device_id) = rest.split_once('/')?;
    Some(device_id.trim())
}

fn apply_entry(record: &mut Record, key: &str, value: &str) {
    match key {
        "id" | "addr" | "name" | "version" => record.add_tag(key, value),
        "s/n" => record.add_tag("sn", value),
        "online" | "running" | "sleep" => add_bool_field(record, key, key, value),
        "tank" => add_bool_field(record, key, "tank_full", value),
        "filter" => add_bool_field(record, key, "filter_needs_cleaning", value),
        "humid%" => add_float_field(record, key, "humidity_pct", value),
        "target%" => add_float_field(record, key, "target_humidity_pct", value),
        "fan" => add_float_field(record, key, "fan", value),
        "temp" => match parse_reading(value) {
            Ok(celsius) => {
                record.add_field("temp_c", celsius);
                record.add_field("temp_f", celsius_to_fahrenheit(celsius));
            }
            Err(err) => {
                debug!(device = %record.device_id, "failed to convert 'temp' to float: {err}")
            }
        },
        "error" => {
            if value != "0" {
                warn!("device {} reports error {value}", record.device_id);
            }
        }
        _ => trace!(device = %record.device_id, "ignoring unknown key '{key}'"),
    }
}

fn add_bool_field(record: &mut Record, key: &str, field: &str, value: &str) {
    match parse_bool(value) {
        Ok(v) => record.add_field(field, v),
        Err(err) => {
            debug!(device = %record.device_id, "failed to convert '{key}' to bool: {err}")
        }
    }
}

fn add_float_field(record: &mut Record, key: &str, field: &str, value: &str) {
    match parse_reading(value) {
        Ok(v) => record.add_field(field, v),
        Err(err) => {
            debug!(device = %record.device_id, "failed to convert '{key}' to float: {err}")
        }
    }
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}
