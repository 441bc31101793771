use crate::midea::{FIELD_ONLINE, FIELD_TEMP_C, Record};

/// Drops records that carry no usable reading: devices reported offline, and
/// devices whose temperature reads exactly zero.
pub fn filter_reportable(records: Vec<Record>) -> Vec<Record> {
    records.into_iter().filter(is_reportable).collect()
}

pub fn is_reportable(record: &Record) -> bool {
    if record.field(FIELD_ONLINE).and_then(|v| v.as_bool()) == Some(false) {
        return false;
    }

    // A zero reading means the device never reported a temperature.
    if let Some(celsius) = record.field(FIELD_TEMP_C).and_then(|v| v.as_f64())
        && celsius == 0.0
    {
        return false;
    }

    true
}
