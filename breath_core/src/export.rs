//! Exporting statistics and session history.
//!
//! JSON exports carry the aggregate statistics; CSV exports flatten session
//! records into one row each for spreadsheets.

use crate::{Result, SessionRecord, SessionStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, Serialize)]
struct CsvRow {
    date: String,
    technique: String,
    duration_ms: u64,
    breath_count: u32,
    goal_type: String,
    goal_value: u32,
    completed: bool,
}

impl From<&SessionRecord> for CsvRow {
    fn from(record: &SessionRecord) -> Self {
        CsvRow {
            date: record.date.to_rfc3339(),
            technique: record.technique.clone(),
            duration_ms: record.duration,
            breath_count: record.breath_count,
            goal_type: record.goal_type.to_string(),
            goal_value: record.goal_value,
            completed: record.completed,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsExport<'a> {
    export_date: DateTime<Utc>,
    statistics: &'a SessionStats,
}

/// Pretty JSON document `{exportDate, statistics}`
pub fn stats_to_json(stats: &SessionStats, exported_at: DateTime<Utc>) -> Result<String> {
    let export = StatsExport {
        export_date: exported_at,
        statistics: stats,
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

/// Write records as CSV (with headers) to any writer
///
/// Returns the number of rows written.
pub fn write_csv<W: Write>(records: &[SessionRecord], writer: W) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(writer);

    for record in records {
        writer.serialize(CsvRow::from(record))?;
    }

    writer.flush()?;
    Ok(records.len())
}

/// Write records to a CSV file, replacing it
pub fn export_csv(records: &[SessionRecord], csv_path: &Path) -> Result<usize> {
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(csv_path)?;

    let count = write_csv(records, &file)?;
    file.sync_all()?;

    tracing::info!("Exported {} sessions to {:?}", count, csv_path);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GoalType;

    fn create_test_record(technique: &str) -> SessionRecord {
        SessionRecord {
            date: Utc::now(),
            technique: technique.into(),
            duration: 48_000,
            breath_count: 3,
            goal_type: GoalType::Breaths,
            goal_value: 3,
            completed: true,
        }
    }

    #[test]
    fn test_csv_export_has_header_and_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("out").join("sessions.csv");

        let records = vec![create_test_record("box"), create_test_record("478")];
        let count = export_csv(&records, &csv_path).unwrap();
        assert_eq!(count, 2);

        let content = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "date,technique,duration_ms,breath_count,goal_type,goal_value,completed"
        );
        assert!(lines[2].contains(",478,48000,3,breaths,3,true"));
    }

    #[test]
    fn test_csv_export_replaces_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("sessions.csv");

        export_csv(&[create_test_record("box"), create_test_record("box")], &csv_path).unwrap();
        export_csv(&[create_test_record("coherent")], &csv_path).unwrap();

        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_json_export_shape() {
        let mut stats = SessionStats::default();
        stats.record(&create_test_record("box"));

        let json = stats_to_json(&stats, Utc::now()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(value["exportDate"].is_string());
        assert_eq!(value["statistics"]["totalSessions"], 1);
        assert_eq!(value["statistics"]["sessionHistory"][0]["technique"], "box");
    }
}
