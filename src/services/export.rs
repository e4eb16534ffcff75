//! Training event buckets and file export
//!
//! Events are appended to one of a fixed set of categories and written out on
//! demand, either as a single JSON document or as one CSV file per non-empty
//! category. Exports never clear the buckets and never overwrite a file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{PhaseGateError, Result};
use crate::persistence::{pretty_json, write_new_files, NewFile};

/// Fixed set of event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    MetricsHistory,
    PhaseTransitions,
    OptimizationPaths,
    CoherencePeaks,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::MetricsHistory,
        EventCategory::PhaseTransitions,
        EventCategory::OptimizationPaths,
        EventCategory::CoherencePeaks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::MetricsHistory => "metrics_history",
            EventCategory::PhaseTransitions => "phase_transitions",
            EventCategory::OptimizationPaths => "optimization_paths",
            EventCategory::CoherencePeaks => "coherence_peaks",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self> {
        EventCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| PhaseGateError::Configuration(format!("unknown event category: {s}")))
    }
}

/// Event fields a payload may not reuse
const RESERVED_KEYS: [&str; 2] = ["timestamp", "type"];

/// One appended event; the payload fields sit next to `timestamp` and `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub category: EventCategory,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Export file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = PhaseGateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(PhaseGateError::Configuration(format!(
                "unknown export format: {other}"
            ))),
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub dir: String,
    pub format: ExportFormat,
    /// Write a final export when the coordinator stops
    pub on_shutdown: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: "exports".to_string(),
            format: ExportFormat::Json,
            on_shutdown: true,
        }
    }
}

/// Per-category append-only event store with file export
#[derive(Debug)]
pub struct MetricsExporter {
    dir: PathBuf,
    buckets: BTreeMap<EventCategory, Vec<LoggedEvent>>,
}

impl MetricsExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let buckets = EventCategory::ALL
            .into_iter()
            .map(|category| (category, Vec::new()))
            .collect();
        Self {
            dir: dir.into(),
            buckets,
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(&config.dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append an event to a category given by name
    pub fn log_training_event(
        &mut self,
        category: &str,
        payload: Value,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let category = category.parse::<EventCategory>()?;
        self.record(category, payload, at)
    }

    /// Append an event; the payload must be a JSON object
    pub fn record(&mut self, category: EventCategory, payload: Value, at: DateTime<Utc>) -> Result<()> {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                return Err(PhaseGateError::Configuration(format!(
                    "{category} payload must be an object, got {other}"
                )))
            }
        };
        // Flattened next to the event's own fields on export
        if let Some(key) = RESERVED_KEYS.iter().find(|key| payload.contains_key(**key)) {
            return Err(PhaseGateError::Configuration(format!(
                "{category} payload must not contain reserved key {key:?}"
            )));
        }

        self.buckets.entry(category).or_default().push(LoggedEvent {
            timestamp: at,
            category,
            payload,
        });
        Ok(())
    }

    pub fn events(&self, category: EventCategory) -> &[LoggedEvent] {
        self.buckets
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn last_event(&self, category: EventCategory) -> Option<&LoggedEvent> {
        self.events(category).last()
    }

    pub fn counts(&self) -> BTreeMap<EventCategory, usize> {
        self.buckets.iter().map(|(c, events)| (*c, events.len())).collect()
    }

    /// Write the buckets to disk and return the files created
    pub async fn export(&self, format: ExportFormat, at: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        let files = match format {
            ExportFormat::Json => vec![NewFile {
                stem: "training".to_string(),
                ext: "json",
                contents: pretty_json(&self.buckets)?,
            }],
            ExportFormat::Csv => self.csv_files()?,
        };
        let paths = write_new_files(self.dir.clone(), at, files).await?;

        info!(
            format = %format,
            files = paths.len(),
            dir = %self.dir.display(),
            "Training data exported"
        );
        Ok(paths)
    }

    fn csv_files(&self) -> Result<Vec<NewFile>> {
        let mut files = Vec::new();
        for (category, events) in &self.buckets {
            if events.is_empty() {
                debug!(category = %category, "Skipping empty category");
                continue;
            }

            let mut contents = Vec::new();
            write_csv(&mut contents, events)?;
            files.push(NewFile {
                stem: category.as_str().to_string(),
                ext: "csv",
                contents,
            });
        }
        Ok(files)
    }
}

/// `timestamp,type,<flattened payload columns...>` with one row per event
fn write_csv<W: Write>(out: &mut W, events: &[LoggedEvent]) -> Result<()> {
    let rows: Vec<BTreeMap<String, String>> = events
        .iter()
        .map(|event| {
            let mut row = BTreeMap::new();
            for (key, value) in &event.payload {
                flatten_into(&mut row, key, value);
            }
            row
        })
        .collect();

    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    let header: Vec<&str> = ["timestamp", "type"]
        .into_iter()
        .chain(columns.iter().copied())
        .collect();
    writeln!(out, "{}", header.iter().map(|h| csv_field(h)).collect::<Vec<_>>().join(","))?;

    for (event, row) in events.iter().zip(&rows) {
        let mut fields = vec![
            csv_field(&event.timestamp.to_rfc3339()),
            csv_field(event.category.as_str()),
        ];
        fields.extend(
            columns
                .iter()
                .map(|col| csv_field(row.get(*col).map(String::as_str).unwrap_or(""))),
        );
        writeln!(out, "{}", fields.join(","))?;
    }
    Ok(())
}

/// Nested objects become dotted keys; arrays are kept as JSON text
fn flatten_into(row: &mut BTreeMap<String, String>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(row, &format!("{prefix}.{key}"), nested);
            }
        }
        Value::Null => {
            row.insert(prefix.to_string(), String::new());
        }
        Value::String(s) => {
            row.insert(prefix.to_string(), s.clone());
        }
        other => {
            row.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
