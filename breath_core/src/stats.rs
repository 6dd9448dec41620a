//! Aggregate session statistics and their file persistence.
//!
//! Statistics live in a single JSON file guarded by file locks. Every
//! recorded session bumps the totals, updates the daily streak and is kept
//! in a history window of the newest [`HISTORY_LIMIT`] entries.
//!
//! Writers serialize on a sidecar `<stats>.lock` file for the whole
//! load-modify-save cycle, since the stats file itself is replaced by rename.

use crate::{Error, Result, SessionRecord, SessionStats};
use chrono::{DateTime, Local, NaiveDate, Utc};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Number of sessions kept in `session_history`
pub const HISTORY_LIMIT: usize = 100;

/// Streak after a session on `today`, given the day of the previous session
///
/// Same day keeps the streak, the following day extends it, anything else
/// (including the very first session) starts over at 1.
pub fn next_streak(last_day: Option<NaiveDate>, today: NaiveDate, current: u32) -> u32 {
    match last_day {
        Some(last) if last == today => current,
        Some(last) if last.succ_opt() == Some(today) => current + 1,
        _ => 1,
    }
}

/// Sidecar file writers lock around a read-modify-write
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn local_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

impl SessionStats {
    /// Fold one session into the statistics
    ///
    /// Days are compared in local time.
    pub fn record(&mut self, record: &SessionRecord) {
        let today = local_day(record.date);
        let last_day = self.last_session_date.map(local_day);

        self.current_streak = next_streak(last_day, today, self.current_streak);
        self.total_sessions += 1;
        self.total_breaths += u64::from(record.breath_count);
        self.total_time += record.duration;
        self.last_session_date = Some(record.date);

        self.session_history.push(record.clone());
        if self.session_history.len() > HISTORY_LIMIT {
            let excess = self.session_history.len() - HISTORY_LIMIT;
            self.session_history.drain(..excess);
        }

        tracing::debug!(
            "Recorded {} session: streak {}, {} total",
            record.technique,
            self.current_streak,
            self.total_sessions
        );
    }

    /// Drop history entries older than `cutoff`, returning how many went
    ///
    /// Totals and streak are left alone.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.session_history.len();
        self.session_history.retain(|r| r.date > cutoff);
        let removed = before - self.session_history.len();
        if removed > 0 {
            tracing::info!("Pruned {} sessions older than {}", removed, cutoff);
        }
        removed
    }

    /// Load statistics from a file with shared locking
    ///
    /// Returns empty statistics if the file doesn't exist.
    /// If the file is corrupted, logs a warning and returns empty statistics.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No stats file found, starting fresh");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open stats file {:?}: {}. Using defaults.", path, e);
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock stats file {:?}: {}. Using defaults.", path, e);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read stats file {:?}: {}. Using defaults.", path, e);
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<SessionStats>(&contents) {
            Ok(stats) => {
                tracing::debug!("Loaded stats from {:?}", path);
                Ok(stats)
            }
            Err(e) => {
                tracing::warn!("Failed to parse stats file {:?}: {}. Using defaults.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Save statistics with exclusive locking and an atomic rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Store(format!("stats path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved stats to {:?}", path);
        Ok(())
    }

    /// Load statistics, modify them, and save them back
    ///
    /// Holds an exclusive lock on [`lock_path`] throughout, so concurrent
    /// updates from other threads or processes apply one after another.
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(&mut SessionStats) -> Result<()>,
    {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Store(format!("stats path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path(path))?;
        lock.lock_exclusive()?;

        let result = Self::load(path).and_then(|mut stats| {
            f(&mut stats)?;
            stats.save(path)?;
            Ok(stats)
        });

        if let Err(e) = lock.unlock() {
            tracing::warn!("Failed to unlock {:?}: {}", lock_path(path), e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GoalType;
    use chrono::TimeZone;

    fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record_at(date: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            date,
            technique: "box".into(),
            duration: 32_000,
            breath_count: 2,
            goal_type: GoalType::Breaths,
            goal_value: 2,
            completed: true,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_next_streak_rules() {
        let today = day(2026, 10, 17);
        assert_eq!(next_streak(None, today, 0), 1);
        assert_eq!(next_streak(Some(today), today, 4), 4);
        assert_eq!(next_streak(Some(day(2026, 10, 16)), today, 4), 5);
        assert_eq!(next_streak(Some(day(2026, 10, 14)), today, 4), 1);
        assert_eq!(next_streak(Some(day(2026, 9, 30)), day(2026, 10, 1), 2), 3);
    }

    #[test]
    fn test_record_updates_totals_and_streak() {
        let mut stats = SessionStats::default();

        stats.record(&record_at(local(2026, 10, 15, 9)));
        stats.record(&record_at(local(2026, 10, 15, 21)));
        assert_eq!(stats.current_streak, 1);

        stats.record(&record_at(local(2026, 10, 16, 8)));
        assert_eq!(stats.current_streak, 2);

        stats.record(&record_at(local(2026, 10, 19, 8)));
        assert_eq!(stats.current_streak, 1);

        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.total_breaths, 8);
        assert_eq!(stats.total_time, 128_000);
        assert_eq!(stats.last_session_date, Some(local(2026, 10, 19, 8)));
    }

    #[test]
    fn test_history_trimmed_to_newest_hundred() {
        let mut stats = SessionStats::default();
        let start = local(2026, 1, 1, 12);

        for i in 0..105 {
            let mut record = record_at(start + chrono::Duration::minutes(i));
            record.breath_count = i as u32;
            stats.record(&record);
        }

        assert_eq!(stats.session_history.len(), HISTORY_LIMIT);
        assert_eq!(stats.session_history[0].breath_count, 5);
        assert_eq!(stats.session_history[99].breath_count, 104);
        assert_eq!(stats.total_sessions, 105);
    }

    #[test]
    fn test_prune_keeps_recent_entries() {
        let mut stats = SessionStats::default();
        stats.record(&record_at(local(2026, 5, 1, 12)));
        stats.record(&record_at(local(2026, 10, 1, 12)));

        let removed = stats.prune_older_than(local(2026, 7, 17, 12));

        assert_eq!(removed, 1);
        assert_eq!(stats.session_history.len(), 1);
        assert_eq!(stats.total_sessions, 2);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stats.json");

        let mut stats = SessionStats::default();
        stats.record(&record_at(local(2026, 10, 17, 7)));
        stats.save(&path).unwrap();

        let loaded = SessionStats::load(&path).unwrap();
        assert_eq!(loaded, stats);
    }

    #[test]
    fn test_persisted_shape_uses_camel_case() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stats.json");

        let mut stats = SessionStats::default();
        stats.record(&record_at(local(2026, 10, 17, 7)));
        stats.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["totalSessions"], 1);
        let entry = &raw["sessionHistory"][0];
        assert_eq!(entry["breathCount"], 2);
        assert_eq!(entry["goalType"], "breaths");
        assert_eq!(entry["duration"], 32_000);
        assert!(entry["date"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let stats = SessionStats::load(&temp_dir.path().join("missing.json")).unwrap();
        assert_eq!(stats, SessionStats::default());
    }

    #[test]
    fn test_corrupted_stats_returns_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stats.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let stats = SessionStats::load(&path).unwrap();
        assert_eq!(stats.total_sessions, 0);
    }

    #[test]
    fn test_update_pattern() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("stats.json");

        SessionStats::update(&path, |stats| {
            stats.record(&record_at(local(2026, 10, 17, 7)));
            Ok(())
        })
        .unwrap();

        let loaded = SessionStats::load(&path).unwrap();
        assert_eq!(loaded.total_sessions, 1);
        assert_eq!(loaded.current_streak, 1);
        assert!(lock_path(&path).exists());
    }

    #[test]
    fn test_parallel_updates_are_not_lost() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stats.json");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        SessionStats::update(&path, |stats| {
                            stats.record(&record_at(Utc::now()));
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = SessionStats::load(&path).unwrap();
        assert_eq!(loaded.total_sessions, 80);
        assert_eq!(loaded.total_breaths, 160);
    }

    #[test]
    fn test_failed_update_leaves_file_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stats.json");
        let mut stats = SessionStats::default();
        stats.record(&record_at(local(2026, 10, 17, 7)));
        stats.save(&path).unwrap();

        let result = SessionStats::update(&path, |stats| {
            stats.total_sessions = 99;
            Err(Error::Store("rejected".into()))
        });

        assert!(result.is_err());
        assert_eq!(SessionStats::load(&path).unwrap().total_sessions, 1);
        // The lock was released
        SessionStats::update(&path, |_| Ok(())).unwrap();
    }
}
