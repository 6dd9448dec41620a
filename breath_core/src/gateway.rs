//! Persistence gateway the engine hands finished sessions to.

use crate::journal::Journal;
use crate::{Error, Result, SessionRecord, SessionStats};
use chrono::{TimeDelta, Utc};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Receives completed-session records and serves aggregate statistics
pub trait SessionGateway {
    fn record_session(&mut self, record: &SessionRecord) -> Result<()>;

    fn stats(&self) -> Result<SessionStats>;
}

/// Statistics file plus the append-only journal under one data directory
#[derive(Clone, Debug)]
pub struct FileGateway {
    stats_path: PathBuf,
    journal: Journal,
}

impl FileGateway {
    pub const STATS_FILE: &'static str = "stats.json";
    pub const JOURNAL_FILE: &'static str = "sessions.jsonl";

    pub fn new(data_dir: &Path) -> Self {
        Self {
            stats_path: data_dir.join(Self::STATS_FILE),
            journal: Journal::new(data_dir.join(Self::JOURNAL_FILE)),
        }
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Clear all statistics; the journal is kept
    pub fn reset(&self) -> Result<()> {
        SessionStats::update(&self.stats_path, |stats| {
            *stats = SessionStats::default();
            Ok(())
        })?;
        tracing::info!("Statistics reset");
        Ok(())
    }

    /// Drop history entries older than `days` days
    ///
    /// `days` must be positive and small enough to name a representable
    /// date.
    pub fn prune_older_than_days(&self, days: i64) -> Result<usize> {
        if days < 1 {
            return Err(Error::Config(format!(
                "prune age must be at least 1 day, got {}",
                days
            )));
        }
        let cutoff = TimeDelta::try_days(days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| Error::Config(format!("prune age of {} days is out of range", days)))?;
        let mut removed = 0;
        SessionStats::update(&self.stats_path, |stats| {
            removed = stats.prune_older_than(cutoff);
            Ok(())
        })?;
        Ok(removed)
    }
}

impl SessionGateway for FileGateway {
    fn record_session(&mut self, record: &SessionRecord) -> Result<()> {
        SessionStats::update(&self.stats_path, |stats| {
            stats.record(record);
            Ok(())
        })?;
        self.journal.append(record)
    }

    fn stats(&self) -> Result<SessionStats> {
        SessionStats::load(&self.stats_path)
    }
}

/// In-memory gateway; clones share the same statistics
#[derive(Clone, Debug, Default)]
pub struct MemoryGateway {
    stats: Rc<RefCell<SessionStats>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record received so far (bounded by the history window)
    pub fn records(&self) -> Vec<SessionRecord> {
        self.stats.borrow().session_history.clone()
    }
}

impl SessionGateway for MemoryGateway {
    fn record_session(&mut self, record: &SessionRecord) -> Result<()> {
        self.stats.borrow_mut().record(record);
        Ok(())
    }

    fn stats(&self) -> Result<SessionStats> {
        Ok(self.stats.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GoalType;

    fn create_test_record() -> SessionRecord {
        SessionRecord {
            date: Utc::now(),
            technique: "478".into(),
            duration: 60_000,
            breath_count: 3,
            goal_type: GoalType::Duration,
            goal_value: 1,
            completed: true,
        }
    }

    #[test]
    fn test_file_gateway_records_stats_and_journal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut gateway = FileGateway::new(temp_dir.path());

        gateway.record_session(&create_test_record()).unwrap();
        gateway.record_session(&create_test_record()).unwrap();

        let stats = gateway.stats().unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_breaths, 6);
        assert_eq!(stats.total_time, 120_000);
        assert_eq!(stats.current_streak, 1);
        assert_eq!(gateway.journal().read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_reset_clears_stats_but_keeps_journal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut gateway = FileGateway::new(temp_dir.path());
        gateway.record_session(&create_test_record()).unwrap();

        gateway.reset().unwrap();

        assert_eq!(gateway.stats().unwrap(), SessionStats::default());
        assert_eq!(gateway.journal().read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_prune_by_days() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut gateway = FileGateway::new(temp_dir.path());

        let mut old = create_test_record();
        old.date = Utc::now() - chrono::Duration::days(120);
        gateway.record_session(&old).unwrap();
        gateway.record_session(&create_test_record()).unwrap();

        assert_eq!(gateway.prune_older_than_days(90).unwrap(), 1);
        assert_eq!(gateway.stats().unwrap().session_history.len(), 1);
    }

    #[test]
    fn test_prune_rejects_unusable_ages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut gateway = FileGateway::new(temp_dir.path());
        gateway.record_session(&create_test_record()).unwrap();

        for days in [0, -5, 1_000_000_000, 999_999_999_999, i64::MAX] {
            assert!(
                matches!(gateway.prune_older_than_days(days), Err(Error::Config(_))),
                "days = {}",
                days
            );
        }
        assert_eq!(gateway.stats().unwrap().session_history.len(), 1);
    }

    #[test]
    fn test_parallel_recorders_keep_stats_in_step_with_journal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_dir = temp_dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let data_dir = data_dir.clone();
                std::thread::spawn(move || {
                    let mut gateway = FileGateway::new(&data_dir);
                    for _ in 0..10 {
                        gateway.record_session(&create_test_record()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let gateway = FileGateway::new(&data_dir);
        let journaled = gateway.journal().read_all().unwrap().len();
        assert_eq!(journaled, 80);
        assert_eq!(gateway.stats().unwrap().total_sessions, 80);
    }

    #[test]
    fn test_memory_gateway_clones_share_state() {
        let gateway = MemoryGateway::new();
        let mut handle = gateway.clone();

        handle.record_session(&create_test_record()).unwrap();

        assert_eq!(gateway.records().len(), 1);
        assert_eq!(gateway.stats().unwrap().total_sessions, 1);
    }
}
