#![forbid(unsafe_code)]

//! Core domain model and session engine for the Breathwork system.
//!
//! This crate provides:
//! - Domain types (techniques, session configuration, records, statistics)
//! - The technique catalog and timing validation
//! - The breathing session engine and its timer scheduler
//! - Persistence (statistics file, session journal, exports)
//! - Ambient sound volume control

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod timing;
pub mod clock;
pub mod scheduler;
pub mod engine;
pub mod stats;
pub mod journal;
pub mod gateway;
pub mod export;
pub mod sound;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog, Catalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{BreathingEngine, Callbacks};
pub use gateway::{FileGateway, MemoryGateway, SessionGateway};
pub use journal::Journal;
pub use sound::{AmbientSound, SoundController, SoundKind};
pub use timing::validate_timing;
