use chrono::{DateTime, SecondsFormat, Utc};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use tracing::warn;

pub const RETRY_HEADER: &str = "x-retry";
pub const FAILURE_REASON_HEADER: &str = "x-failure-reason";
pub const FAILED_AT_HEADER: &str = "x-failed-at";

/// Reads the `x-retry` counter. Absent, negative or unreadable values count as 0.
pub fn retry_count(headers: Option<&FieldTable>) -> u32 {
    let Some(value) = headers.and_then(|table| header(table, RETRY_HEADER)) else {
        return 0;
    };

    let count = match value {
        AMQPValue::ShortShortInt(n) => Some(i64::from(*n)),
        AMQPValue::ShortShortUInt(n) => Some(i64::from(*n)),
        AMQPValue::ShortInt(n) => Some(i64::from(*n)),
        AMQPValue::ShortUInt(n) => Some(i64::from(*n)),
        AMQPValue::LongInt(n) => Some(i64::from(*n)),
        AMQPValue::LongUInt(n) => Some(i64::from(*n)),
        AMQPValue::LongLongInt(n) => Some(*n),
        AMQPValue::ShortString(s) => s.as_str().trim().parse().ok(),
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).trim().parse().ok(),
        _ => None,
    };

    match count {
        Some(count) => count.clamp(0, i64::from(u32::MAX)) as u32,
        None => {
            warn!(header = RETRY_HEADER, value = ?value, "Unreadable retry header, counting from 0");
            0
        }
    }
}

pub fn header<'a>(table: &'a FieldTable, name: &str) -> Option<&'a AMQPValue> {
    table
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .map(|(_, value)| value)
}

pub fn header_str(table: &FieldTable, name: &str) -> Option<String> {
    match header(table, name)? {
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        _ => None,
    }
}

pub fn retry_headers(retry_count: u32) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(RETRY_HEADER),
        AMQPValue::LongLongInt(i64::from(retry_count)),
    );
    headers
}

/// Informational headers for a dead-lettered copy. The body is published
/// untouched; operators read the cause from here.
pub fn dead_letter_headers(retry_count: u32, reason: &str, failed_at: DateTime<Utc>) -> FieldTable {
    let mut headers = retry_headers(retry_count);
    headers.insert(
        ShortString::from(FAILURE_REASON_HEADER),
        AMQPValue::LongString(LongString::from(reason.to_string())),
    );
    headers.insert(
        ShortString::from(FAILED_AT_HEADER),
        AMQPValue::LongString(LongString::from(
            failed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )),
    );
    headers
}
