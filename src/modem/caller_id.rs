use std::fmt::{Display, Formatter};
use std::mem::take;
use std::sync::Arc;
use chrono::NaiveDateTime;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// A complete caller ID report for one incoming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerRecord {
    /// MMDD
    pub date: String,
    /// HHMM
    pub time: String,
    pub name: String,
    pub number: String
}
impl Display for CallerRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) at {} {}", self.number, self.name, self.date, self.time)
    }
}

/// Receives each completed caller record on the ingester task. Must not block.
pub type CallerHandler = Arc<dyn Fn(CallerRecord) + Send + Sync>;

/// A handler that queues every record on `tx` for processing elsewhere.
pub fn channel_handler(tx: UnboundedSender<CallerRecord>) -> CallerHandler {
    Arc::new(move |record| {
        if tx.send(record).is_err() {
            warn!("Caller queue is closed, dropping caller");
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerIdField {
    Date,
    Time,
    Name,
    Number
}
impl CallerIdField {
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_uppercase().as_str() {
            "DATE" => Some(CallerIdField::Date),
            "TIME" => Some(CallerIdField::Time),
            "NAME" => Some(CallerIdField::Name),
            "NMBR" => Some(CallerIdField::Number),
            _ => None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdLine {
    Ring,
    Field(CallerIdField, String),
    Other
}

/// Classifies one decoded modem line. Field lines are `KEY=value`, optionally
/// with spaces around the `=`.
pub fn classify_line(line: &str) -> CallerIdLine {
    if let Some((key, value)) = line.split_once('=') {
        if let Some(field) = CallerIdField::from_key(key) {
            return CallerIdLine::Field(field, value.trim().to_string());
        }
    }
    if line.contains("RING") {
        return CallerIdLine::Ring;
    }
    CallerIdLine::Other
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialCallerRecord {
    pub date: Option<String>,
    pub time: Option<String>,
    pub name: Option<String>,
    pub number: Option<String>
}
impl PartialCallerRecord {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.time.is_none() && self.name.is_none() && self.number.is_none()
    }

    pub fn set(&mut self, field: CallerIdField, value: String) {
        if value.is_empty() {
            return;
        }
        let slot = match field {
            CallerIdField::Date => &mut self.date,
            CallerIdField::Time => &mut self.time,
            CallerIdField::Name => &mut self.name,
            CallerIdField::Number => &mut self.number
        };
        *slot = Some(value);
    }

    pub fn complete(&self) -> Option<CallerRecord> {
        Some(CallerRecord {
            date: self.date.clone()?,
            time: self.time.clone()?,
            name: self.name.clone()?,
            number: self.number.clone()?
        })
    }
}

/// Decides what happens to a partial record when the line goes quiet or the
/// next RING arrives. Some telcos never send every field.
pub trait PartialCallerPolicy: Send + Sync {

    /// Returns the record to keep, with whatever defaults apply, or `None` to discard it.
    fn resolve(&self, partial: PartialCallerRecord, now: NaiveDateTime) -> Option<PartialCallerRecord>;
}

/// Keeps any record that has a number, stamping missing date and time with the
/// wall clock and a missing name with `default_name`.
#[derive(Debug, Clone)]
pub struct DefaultCallerPolicy {
    pub default_name: String
}
impl Default for DefaultCallerPolicy {
    fn default() -> Self {
        Self { default_name: "Unknown".to_string() }
    }
}
impl PartialCallerPolicy for DefaultCallerPolicy {
    fn resolve(&self, mut partial: PartialCallerRecord, now: NaiveDateTime) -> Option<PartialCallerRecord> {
        partial.number.as_ref()?;
        partial.date.get_or_insert_with(|| now.format("%m%d").to_string());
        partial.time.get_or_insert_with(|| now.format("%H%M").to_string());
        partial.name.get_or_insert_with(|| self.default_name.clone());
        Some(partial)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub ring: bool,
    pub record: Option<CallerRecord>
}

/// Builds caller records out of unsolicited modem lines, one line (or read timeout) at a time.
pub struct CallerIdAccumulator {
    partial: PartialCallerRecord,
    policy: Arc<dyn PartialCallerPolicy>
}
impl CallerIdAccumulator {
    pub fn new(policy: Arc<dyn PartialCallerPolicy>) -> Self {
        Self {
            partial: PartialCallerRecord::default(),
            policy
        }
    }

    pub fn is_accumulating(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Feeds one decoded line, or `None` when the read timed out.
    pub fn process(&mut self, line: Option<&str>, now: NaiveDateTime) -> IngestOutcome {
        let classified = line.map(classify_line);
        let ring = matches!(classified, Some(CallerIdLine::Ring));

        if (line.is_none() || ring) && self.is_accumulating() {
            self.partial = self.policy
                .resolve(take(&mut self.partial), now)
                .unwrap_or_default();
        }

        if let Some(CallerIdLine::Field(field, value)) = classified {
            self.partial.set(field, value);
        }

        let record = self.partial.complete();
        if record.is_some() {
            self.partial = PartialCallerRecord::default();
        }

        IngestOutcome { ring, record }
    }
}
