//! Core domain types for the Breathwork system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Techniques and their phase timing bounds
//! - Session configuration and partial updates
//! - Engine snapshots and phase notifications
//! - Session records and aggregate statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Phase name → number (seconds, or a breath count for counted phases)
pub type TimingMap = BTreeMap<String, f64>;

// ============================================================================
// Technique Types
// ============================================================================

/// Sub-protocol used to advance the phases of a special technique
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseProtocol {
    /// One fixed-duration timer per phase
    Timed,
    /// Counted power breaths, then timed retention and recovery
    WimHof,
    /// Rapid breathing for a fixed duration
    Bellows,
    /// Timed phases with nostril cues
    AlternateNostril,
}

/// A breathing technique definition (e.g., "Box Breathing")
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Technique {
    pub id: String,
    pub name: String,
    pub description: String,
    pub benefits: String,
    pub phases: Vec<String>,
    pub default_timing: TimingMap,
    pub min_timing: TimingMap,
    pub max_timing: TimingMap,
    pub instructions: BTreeMap<String, String>,
    pub special: bool,
    pub protocol: PhaseProtocol,
}

impl Technique {
    /// Entry phase of the cycle
    pub fn first_phase(&self) -> &str {
        self.phases.first().map(String::as_str).unwrap_or("inhale")
    }

    /// Position of `phase` within the cycle
    pub fn phase_index(&self, phase: &str) -> Option<usize> {
        self.phases.iter().position(|p| p == phase)
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Session termination condition
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GoalType {
    /// Stop after `goal_value` completed breath cycles
    #[default]
    Breaths,
    /// Stop after `goal_value` minutes
    Duration,
}

impl fmt::Display for GoalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalType::Breaths => write!(f, "breaths"),
            GoalType::Duration => write!(f, "duration"),
        }
    }
}

impl FromStr for GoalType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "breaths" => Ok(GoalType::Breaths),
            "duration" => Ok(GoalType::Duration),
            other => Err(crate::Error::Config(format!("Unknown goal type: {}", other))),
        }
    }
}

/// Configuration for one session, owned by the caller
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_technique")]
    pub technique: String,

    #[serde(default)]
    pub goal_type: GoalType,

    #[serde(default = "default_goal_value")]
    pub goal_value: u32,

    #[serde(default)]
    pub custom_timing: TimingMap,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            technique: default_technique(),
            goal_type: GoalType::default(),
            goal_value: default_goal_value(),
            custom_timing: TimingMap::new(),
        }
    }
}

fn default_technique() -> String {
    crate::catalog::DEFAULT_TECHNIQUE.into()
}

fn default_goal_value() -> u32 {
    10
}

/// Partial configuration change applied to a live engine
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigUpdate {
    pub technique: Option<String>,
    pub goal_type: Option<GoalType>,
    pub goal_value: Option<u32>,
    pub custom_timing: Option<TimingMap>,
}

// ============================================================================
// Engine State and Notifications
// ============================================================================

/// Lifecycle state of the session engine
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Completed,
}

/// Point-in-time view of the engine's session state
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub running: bool,
    pub paused: bool,
    pub technique: String,
    pub phase: String,
    pub breath_count: u32,
    pub session_duration_ms: u64,
    pub goal_type: GoalType,
    pub goal_value: u32,
    pub progress: f64,
    pub phase_duration_ms: u64,
}

/// What triggered a phase notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseEventKind {
    /// A new phase was entered
    Started,
    /// Periodic progress sample within the phase
    Progress,
    /// One counted repetition of a power-breath style phase
    Repetition { current: u32, total: u32 },
}

/// Payload of a phase-change notification
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseUpdate {
    pub kind: PhaseEventKind,
    pub phase: String,
    pub progress: f64,
    pub duration_secs: f64,
    pub instruction: String,
    pub breath_count: u32,
}

// ============================================================================
// Records and Statistics
// ============================================================================

/// Summary of one finished session, handed to persistence
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub date: DateTime<Utc>,
    pub technique: String,
    /// Milliseconds
    pub duration: u64,
    pub breath_count: u32,
    pub goal_type: GoalType,
    pub goal_value: u32,
    pub completed: bool,
}

/// Aggregate statistics returned by the persistence gateway
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_breaths: u64,
    /// Milliseconds
    #[serde(default)]
    pub total_time: u64,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub last_session_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_history: Vec<SessionRecord>,
}
