use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::debug;

use crate::midea::FieldValue;

pub const TAG_ID: &str = "id";

pub const FIELD_ONLINE: &str = "online";

pub const FIELD_TEMP_C: &str = "temp_c";

/// One discovered dehumidifier's snapshot, as reported by a single discovery run.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub measurement: String,

    /// ID taken from the device-start line of the report.
    pub device_id: String,

    pub measured_at: DateTime<Utc>,

    pub tags: IndexMap<String, String>,

    pub fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new(measurement: &str, device_id: &str, measured_at: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.to_string(),
            device_id: device_id.to_string(),
            measured_at,
            tags: IndexMap::new(),
            fields: IndexMap::new(),
        }
    }

    /// Sets a tag unless it is already present; tags never change once set.
    pub fn add_tag(&mut self, key: &str, value: &str) {
        if let Some(existing) = self.tags.get(key) {
            debug!(
                device = %self.device_id,
                "ignoring repeated tag {key}={value}, keeping {existing}"
            );
            return;
        }
        self.tags.insert(key.to_string(), value.to_string());
    }

    pub fn add_field(&mut self, key: &str, value: impl Into<FieldValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields.get(key).copied()
    }

    /// The device ID used for topic construction: the `id` tag, or the
    /// device-start ID when the report carried no `id` line.
    pub fn topic_id(&self) -> &str {
        self.tag(TAG_ID).unwrap_or(&self.device_id)
    }
}
