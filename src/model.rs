use chrono::{DateTime, Local};
use serde::Deserialize;

/// Width every record line is padded to before the bracketed wall-clock
/// suffix. Keeps the suffix column-aligned and is part of the on-disk
/// format, so files written by older installations stay compatible.
pub const RECORD_PAD_WIDTH: usize = 55;

/// One line of the ping log: a unix timestamp in seconds and the free-form
/// tag text the user answered the ping with.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct LogEntry {
    pub timestamp: i64,
    pub tags: String,
}

impl LogEntry {
    /// Parses a log line back into an entry. Lines that don't start with a
    /// digit run followed by a space are not records (corrupted writes,
    /// manual notes) and yield [None].
    pub fn parse(line: &str) -> Option<LogEntry> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (timestamp, rest) = line.split_once(' ')?;
        if timestamp.is_empty() || !timestamp.bytes().all(|v| v.is_ascii_digit()) {
            return None;
        }
        let timestamp = timestamp.parse().ok()?;
        // Drop the human-readable suffix and the alignment padding.
        let tags = match rest.rfind('[') {
            Some(bracket) => &rest[..bracket],
            None => rest,
        };
        Some(LogEntry {
            timestamp,
            tags: tags.trim_end().to_string(),
        })
    }

    /// Extracts just the leading timestamp, for scans that don't care about
    /// the tag text.
    pub fn parse_timestamp(line: &str) -> Option<i64> {
        LogEntry::parse(line).map(|v| v.timestamp)
    }
}

/// Renders a record line: `"<timestamp> <data>"` padded with spaces to
/// [RECORD_PAD_WIDTH] (one trailing space if already wider), then the
/// wall-clock time in brackets and a newline.
pub fn format_record(timestamp: i64, data: &str, wall_clock: DateTime<Local>) -> String {
    let mut line = format!("{timestamp} {data}");
    if line.len() < RECORD_PAD_WIDTH {
        let padding = RECORD_PAD_WIDTH - line.len();
        line.extend(std::iter::repeat(' ').take(padding));
    } else {
        line.push(' ');
    }
    line.push('[');
    line.push_str(&wall_clock.format("%Y-%m-%d %H:%M:%S").to_string());
    line.push_str("]\n");
    line
}

/// A data point on a remote goal. Doubles as the locally computed projection
/// of log entries, in which case `id` is absent until the service assigns
/// one on creation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataPoint {
    #[serde(default)]
    pub id: Option<String>,
    pub timestamp: i64,
    #[serde(rename = "value")]
    pub hours: f64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub comment: String,
}

impl DataPoint {
    pub fn new(timestamp: i64, hours: f64, comment: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp,
            hours,
            comment: comment.into(),
        }
    }
}

/// The service reports `comment: null` for points created without one.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Some endpoints answer with a single JSON object, others with an array of
/// them, and the goal endpoint has changed shape across API revisions. The
/// two cases are made explicit here and flattened right at the client
/// boundary so nothing downstream has to care.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Payload<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Payload<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Payload::Many(values) => values,
            Payload::One(value) => vec![value],
        }
    }
}
