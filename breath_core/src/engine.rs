//! Breathing session engine.
//!
//! The engine is a single-threaded state machine. It never sleeps or spawns:
//! it keeps up to three timers in [`TimerSlots`] and the host calls
//! [`BreathingEngine::run_due`] whenever [`BreathingEngine::next_deadline`]
//! has passed. Each timer is evaluated at its own deadline, so a host that
//! wakes up late still sees the exact phase boundaries.
//!
//! ## Phase advancement
//!
//! 1. Entering a phase resolves its length from the validated timing and
//!    arms the advance timer and the progress sampler.
//! 2. Counted phases (Wim Hof power breaths) re-arm the advance timer every
//!    [`POWER_BREATH_INTERVAL_MS`] and only move on after the last count.
//! 3. Leaving the last phase of the cycle counts a breath and checks the
//!    breath goal; the duration goal is checked by the session tick.

use crate::catalog::{self, Catalog};
use crate::clock::{Clock, SystemClock};
use crate::gateway::SessionGateway;
use crate::scheduler::{Fired, TimerKind, TimerSlots};
use crate::sound::SoundController;
use crate::timing::{phase_seconds, validate_timing};
use crate::types::*;
use chrono::{DateTime, Duration, Utc};

/// Session tick interval (elapsed-time notifications and duration goal)
pub const TICK_INTERVAL_MS: u64 = 100;

/// Progress sampler interval
pub const SAMPLER_INTERVAL_MS: u64 = 50;

/// Time per counted power breath
pub const POWER_BREATH_INTERVAL_MS: u64 = 2_000;

/// Phase driven by counted repetitions instead of a single timer
pub const COUNTED_PHASE: &str = "power-breath";

type PhaseHandler = Box<dyn FnMut(&PhaseUpdate)>;
type BreathHandler = Box<dyn FnMut(u32)>;
type CompleteHandler = Box<dyn FnMut(&SessionRecord)>;
type TimerHandler = Box<dyn FnMut(u64)>;

/// Event handlers, at most one per event kind
#[derive(Default)]
pub struct Callbacks {
    on_phase_change: Option<PhaseHandler>,
    on_breath_complete: Option<BreathHandler>,
    on_session_complete: Option<CompleteHandler>,
    on_timer: Option<TimerHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase entered, progress sample, or counted repetition
    pub fn on_phase_change(mut self, f: impl FnMut(&PhaseUpdate) + 'static) -> Self {
        self.on_phase_change = Some(Box::new(f));
        self
    }

    /// A full cycle finished; receives the new breath count
    pub fn on_breath_complete(mut self, f: impl FnMut(u32) + 'static) -> Self {
        self.on_breath_complete = Some(Box::new(f));
        self
    }

    pub fn on_session_complete(mut self, f: impl FnMut(&SessionRecord) + 'static) -> Self {
        self.on_session_complete = Some(Box::new(f));
        self
    }

    /// Elapsed session time in milliseconds
    pub fn on_timer(mut self, f: impl FnMut(u64) + 'static) -> Self {
        self.on_timer = Some(Box::new(f));
        self
    }
}

/// How the current phase is being advanced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PhaseDriver {
    Timer,
    Counted { current: u32, total: u32 },
}

/// Bookkeeping captured when a session is paused
#[derive(Clone, Copy, Debug)]
struct PauseMark {
    at: u64,
    advance_left: Option<u64>,
    tick_left: Option<u64>,
}

/// Drives one breathing session at a time
pub struct BreathingEngine<C: Clock = SystemClock> {
    clock: C,
    catalog: &'static Catalog,
    callbacks: Callbacks,
    gateway: Option<Box<dyn SessionGateway>>,
    sound: Option<Box<dyn SoundController>>,

    status: SessionStatus,
    technique_id: String,
    goal_type: GoalType,
    goal_value: u32,
    custom_timing: TimingMap,

    current_phase: String,
    breath_count: u32,
    session_start: u64,
    session_duration: u64,
    phase_start: u64,
    phase_duration: u64,
    phase_progress: f64,
    driver: PhaseDriver,
    pause: Option<PauseMark>,

    epoch: u64,
    timers: TimerSlots,
}

impl BreathingEngine<SystemClock> {
    /// Engine on the real clock with default settings
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for BreathingEngine<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> BreathingEngine<C> {
    pub fn with_clock(clock: C) -> Self {
        Self::with_defaults(clock, SessionConfig::default())
    }

    /// Engine whose idle configuration comes from `defaults`
    ///
    /// Fields a later `start_session` leaves empty fall back to these.
    pub fn with_defaults(clock: C, defaults: SessionConfig) -> Self {
        let catalog = catalog::get_default_catalog();
        let technique = catalog.lookup(&defaults.technique);
        let goal_value = if defaults.goal_value > 0 {
            defaults.goal_value
        } else {
            SessionConfig::default().goal_value
        };

        Self {
            clock,
            catalog,
            callbacks: Callbacks::default(),
            gateway: None,
            sound: None,
            status: SessionStatus::Idle,
            technique_id: technique.id.clone(),
            goal_type: defaults.goal_type,
            goal_value,
            custom_timing: defaults.custom_timing,
            current_phase: technique.first_phase().to_string(),
            breath_count: 0,
            session_start: 0,
            session_duration: 0,
            phase_start: 0,
            phase_duration: 0,
            phase_progress: 0.0,
            driver: PhaseDriver::Timer,
            pause: None,
            epoch: 0,
            timers: TimerSlots::new(),
        }
    }

    /// Use a different technique catalog
    pub fn with_catalog(mut self, catalog: &'static Catalog) -> Self {
        self.catalog = catalog;
        let technique = catalog.lookup(&self.technique_id);
        self.technique_id = technique.id.clone();
        self.current_phase = technique.first_phase().to_string();
        self
    }

    /// Attach the gateway completed sessions are forwarded to
    pub fn with_gateway(mut self, gateway: impl SessionGateway + 'static) -> Self {
        self.set_gateway(gateway);
        self
    }

    pub fn set_gateway(&mut self, gateway: impl SessionGateway + 'static) {
        self.gateway = Some(Box::new(gateway));
    }

    /// Attach the sound controller that follows phase progress
    pub fn with_sound(mut self, sound: impl SoundController + 'static) -> Self {
        self.set_sound(sound);
        self
    }

    pub fn set_sound(&mut self, sound: impl SoundController + 'static) {
        self.sound = Some(Box::new(sound));
    }

    /// Replace every registered handler
    pub fn set_callbacks(&mut self, callbacks: Callbacks) {
        self.callbacks = callbacks;
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Start a session, stopping any session already in progress
    ///
    /// An empty technique id or a zero goal value keeps the engine's current
    /// setting; unknown technique ids resolve to the default technique.
    pub fn start_session(&mut self, config: SessionConfig) {
        if self.is_running() {
            self.stop_session();
        }

        if !config.technique.is_empty() {
            self.technique_id = self.catalog.lookup(&config.technique).id.clone();
        }
        self.goal_type = config.goal_type;
        if config.goal_value > 0 {
            self.goal_value = config.goal_value;
        }
        self.custom_timing = config.custom_timing;

        let now = self.clock.now_ms();
        self.epoch += 1;
        self.breath_count = 0;
        self.session_start = now;
        self.session_duration = 0;
        self.pause = None;
        self.current_phase = self.technique().first_phase().to_string();
        self.status = SessionStatus::Running;

        self.timers.cancel_all();
        self.timers
            .arm(TimerKind::Tick, now + TICK_INTERVAL_MS, self.epoch);

        tracing::info!(
            "Starting {} session with goal: {} {}",
            self.technique_id,
            self.goal_value,
            self.goal_type
        );

        self.start_phase(now);
    }

    /// Pause the running session, keeping all elapsed time
    pub fn pause_session(&mut self) {
        if self.status != SessionStatus::Running {
            return;
        }

        let now = self.clock.now_ms();
        self.pause = Some(PauseMark {
            at: now,
            advance_left: self
                .timers
                .deadline(TimerKind::Advance)
                .map(|d| d.saturating_sub(now)),
            tick_left: self
                .timers
                .deadline(TimerKind::Tick)
                .map(|d| d.saturating_sub(now)),
        });
        self.timers.cancel_all();
        self.session_duration = now.saturating_sub(self.session_start);
        self.status = SessionStatus::Paused;

        tracing::info!("Session paused");
    }

    /// Resume a paused session where it left off
    ///
    /// Time spent paused is excluded from both phase and session elapsed
    /// time.
    pub fn resume_session(&mut self) {
        if self.status != SessionStatus::Paused {
            return;
        }

        let now = self.clock.now_ms();
        let mark = self.pause.take().unwrap_or(PauseMark {
            at: now,
            advance_left: None,
            tick_left: None,
        });
        let paused_for = now.saturating_sub(mark.at);
        self.phase_start += paused_for;
        self.session_start += paused_for;
        self.status = SessionStatus::Running;

        let tick_left = mark.tick_left.unwrap_or(TICK_INTERVAL_MS);
        self.timers.arm(TimerKind::Tick, now + tick_left, self.epoch);
        if self.phase_progress < 1.0 {
            self.timers
                .arm(TimerKind::Sampler, now + SAMPLER_INTERVAL_MS, self.epoch);
        }

        tracing::info!("Session resumed");

        match self.driver {
            PhaseDriver::Counted { .. } => {
                let left = mark.advance_left.unwrap_or(POWER_BREATH_INTERVAL_MS);
                self.timers.arm(TimerKind::Advance, now + left, self.epoch);
            }
            PhaseDriver::Timer => {
                let elapsed = now.saturating_sub(self.phase_start);
                let remaining = self.phase_duration.saturating_sub(elapsed);
                if remaining == 0 {
                    self.next_phase(now);
                } else {
                    self.timers
                        .arm(TimerKind::Advance, now + remaining, self.epoch);
                }
            }
        }
    }

    /// Stop the session without recording it
    ///
    /// Also returns a completed engine to idle.
    pub fn stop_session(&mut self) {
        let was_active = self.is_running();
        self.timers.cancel_all();
        self.pause = None;
        self.driver = PhaseDriver::Timer;
        if was_active {
            self.session_duration = self.clock.now_ms().saturating_sub(self.session_start);
            tracing::info!("Session stopped");
        }
        self.status = SessionStatus::Idle;
    }

    /// Finish the session now, recording it as completed
    ///
    /// No-op unless a session is running or paused.
    pub fn complete_session(&mut self) {
        let now = match self.pause {
            Some(mark) => mark.at,
            None => self.clock.now_ms(),
        };
        self.complete_at(now);
    }

    /// Apply a partial configuration change
    ///
    /// Switching technique moves to the new technique's first phase. Mid
    /// session the pending advance keeps the old phase's deadline.
    /// Custom timing applies from the next phase entered.
    pub fn update_configuration(&mut self, update: ConfigUpdate) {
        if let Some(technique) = update.technique.filter(|t| !t.is_empty()) {
            let resolved = self.catalog.lookup(&technique).id.clone();
            if resolved != self.technique_id {
                self.technique_id = resolved;
                self.current_phase = self.technique().first_phase().to_string();
                self.driver = PhaseDriver::Timer;
                tracing::info!("Technique changed to {}", self.technique_id);
            }
        }

        if let Some(goal_type) = update.goal_type {
            self.goal_type = goal_type;
        }
        if let Some(goal_value) = update.goal_value.filter(|v| *v > 0) {
            self.goal_value = goal_value;
        }
        if let Some(custom_timing) = update.custom_timing {
            self.custom_timing = custom_timing;
        }
    }

    /// Snapshot of the current session state
    pub fn session_state(&self) -> SessionSnapshot {
        let session_duration_ms = match (self.status, self.pause) {
            (SessionStatus::Running, _) => {
                self.clock.now_ms().saturating_sub(self.session_start)
            }
            (SessionStatus::Paused, Some(mark)) => mark.at.saturating_sub(self.session_start),
            _ => self.session_duration,
        };

        SessionSnapshot {
            status: self.status,
            running: self.is_running(),
            paused: self.status == SessionStatus::Paused,
            technique: self.technique_id.clone(),
            phase: self.current_phase.clone(),
            breath_count: self.breath_count,
            session_duration_ms,
            goal_type: self.goal_type,
            goal_value: self.goal_value,
            progress: self.phase_progress,
            phase_duration_ms: self.phase_duration,
        }
    }

    /// Running or paused
    pub fn is_running(&self) -> bool {
        matches!(self.status, SessionStatus::Running | SessionStatus::Paused)
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// When the host should next call [`run_due`](Self::run_due)
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at the clock's current time
    ///
    /// Returns how many timers fired.
    pub fn run_due(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut fired = 0;
        while let Some(timer) = self.timers.pop_due(now) {
            self.fire(timer);
            fired += 1;
        }
        fired
    }

    /// Timing in effect for the current technique and custom overrides
    pub fn effective_timing(&self) -> TimingMap {
        validate_timing(self.technique(), &self.custom_timing)
    }

    pub fn technique(&self) -> &'static Technique {
        self.catalog.lookup(&self.technique_id)
    }

    // ========================================================================
    // Timer handling
    // ========================================================================

    fn fire(&mut self, timer: Fired) {
        if timer.epoch != self.epoch || self.status != SessionStatus::Running {
            tracing::debug!("Ignoring stale {:?} timer", timer.kind);
            return;
        }

        match timer.kind {
            TimerKind::Sampler => self.sample_progress(timer.deadline),
            TimerKind::Advance => self.advance_due(timer.deadline),
            TimerKind::Tick => self.session_tick(timer.deadline),
        }
    }

    fn session_tick(&mut self, now: u64) {
        self.session_duration = now.saturating_sub(self.session_start);
        if let Some(on_timer) = self.callbacks.on_timer.as_mut() {
            on_timer(self.session_duration);
        }

        if self.goal_type == GoalType::Duration
            && self.session_duration >= u64::from(self.goal_value) * 60_000
        {
            self.complete_at(now);
            return;
        }

        self.timers
            .arm(TimerKind::Tick, now + TICK_INTERVAL_MS, self.epoch);
    }

    fn sample_progress(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.phase_start);
        self.phase_progress = (elapsed as f64 / self.phase_duration.max(1) as f64).min(1.0);

        let update = self.phase_update(PhaseEventKind::Progress, self.phase_progress);
        self.emit_phase(&update);
        self.notify_sound();

        if self.phase_progress < 1.0 {
            self.timers
                .arm(TimerKind::Sampler, now + SAMPLER_INTERVAL_MS, self.epoch);
        }
    }

    fn advance_due(&mut self, now: u64) {
        let PhaseDriver::Counted { current, total } = self.driver else {
            self.next_phase(now);
            return;
        };

        let current = current + 1;
        self.driver = PhaseDriver::Counted { current, total };

        let progress = f64::from(current) / f64::from(total.max(1));
        let mut update = self.phase_update(PhaseEventKind::Repetition { current, total }, progress);
        update.instruction = format!("Power breath {}/{}", current, total);
        self.emit_phase(&update);

        if current >= total {
            self.driver = PhaseDriver::Timer;
            self.next_phase(now);
        } else {
            self.timers
                .arm(TimerKind::Advance, now + POWER_BREATH_INTERVAL_MS, self.epoch);
        }
    }

    // ========================================================================
    // Phase machine
    // ========================================================================

    fn start_phase(&mut self, now: u64) {
        if self.status != SessionStatus::Running {
            return;
        }

        let technique = self.technique();
        let seconds = phase_seconds(&self.effective_timing(), &self.current_phase);

        self.driver = phase_driver(technique, &self.current_phase, seconds);
        self.phase_duration = match self.driver {
            PhaseDriver::Counted { total, .. } => u64::from(total) * POWER_BREATH_INTERVAL_MS,
            PhaseDriver::Timer => ((seconds * 1000.0).round() as u64).max(1),
        };
        self.phase_start = now;
        self.phase_progress = 0.0;

        let advance_in = match self.driver {
            PhaseDriver::Counted { .. } => POWER_BREATH_INTERVAL_MS,
            PhaseDriver::Timer => self.phase_duration,
        };
        self.timers
            .arm(TimerKind::Advance, now + advance_in, self.epoch);
        self.timers
            .arm(TimerKind::Sampler, now + SAMPLER_INTERVAL_MS, self.epoch);

        tracing::debug!(
            "Starting phase: {} for {}ms",
            self.current_phase,
            self.phase_duration
        );

        let update = self.phase_update(PhaseEventKind::Started, 0.0);
        self.emit_phase(&update);
        self.notify_sound();
    }

    fn next_phase(&mut self, now: u64) {
        if self.status != SessionStatus::Running {
            return;
        }

        let technique = self.technique();
        let index = technique.phase_index(&self.current_phase);
        let is_last = index.is_some_and(|idx| idx + 1 == technique.phases.len());

        if is_last {
            self.breath_count += 1;
            if let Some(on_breath) = self.callbacks.on_breath_complete.as_mut() {
                on_breath(self.breath_count);
            }

            if self.goal_type == GoalType::Breaths && self.breath_count >= self.goal_value {
                self.complete_at(now);
                return;
            }
        }

        self.current_phase = catalog::next_phase(technique, &self.current_phase).to_string();
        self.start_phase(now);
    }

    fn complete_at(&mut self, now: u64) {
        if !self.is_running() {
            return;
        }

        let duration = now.saturating_sub(self.session_start);
        let record = SessionRecord {
            date: self.wall_at(now),
            technique: self.technique_id.clone(),
            duration,
            breath_count: self.breath_count,
            goal_type: self.goal_type,
            goal_value: self.goal_value,
            completed: true,
        };

        self.timers.cancel_all();
        self.pause = None;
        self.driver = PhaseDriver::Timer;
        self.session_duration = duration;
        self.status = SessionStatus::Completed;

        if let Some(on_complete) = self.callbacks.on_session_complete.as_mut() {
            on_complete(&record);
        }

        if let Some(gateway) = self.gateway.as_mut() {
            if let Err(e) = gateway.record_session(&record) {
                tracing::warn!("Failed to record session: {}", e);
            }
        }

        tracing::info!(
            "Session completed: {} breaths in {}s",
            record.breath_count,
            duration / 1000
        );
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn phase_update(&self, kind: PhaseEventKind, progress: f64) -> PhaseUpdate {
        PhaseUpdate {
            kind,
            phase: self.current_phase.clone(),
            progress,
            duration_secs: self.phase_duration as f64 / 1000.0,
            instruction: catalog::phase_instruction(self.technique(), &self.current_phase),
            breath_count: self.breath_count,
        }
    }

    fn emit_phase(&mut self, update: &PhaseUpdate) {
        if let Some(on_phase) = self.callbacks.on_phase_change.as_mut() {
            on_phase(update);
        }
    }

    fn notify_sound(&mut self) {
        if let Some(sound) = self.sound.as_mut() {
            sound.notify_phase(&self.current_phase, self.phase_progress);
        }
    }

    /// Wall-clock time corresponding to monotonic instant `at`
    fn wall_at(&self, at: u64) -> DateTime<Utc> {
        let behind = self.clock.now_ms().saturating_sub(at);
        self.clock.wall() - Duration::milliseconds(behind as i64)
    }
}

/// Pick the sub-protocol for a phase
///
/// Among the special techniques only Wim Hof's power breaths are counted;
/// the others advance on the plain timer.
fn phase_driver(technique: &Technique, phase: &str, seconds: f64) -> PhaseDriver {
    if !technique.special {
        return PhaseDriver::Timer;
    }

    match technique.protocol {
        PhaseProtocol::WimHof if phase == COUNTED_PHASE => PhaseDriver::Counted {
            current: 0,
            total: (seconds.round() as u32).max(1),
        },
        PhaseProtocol::WimHof
        | PhaseProtocol::Bellows
        | PhaseProtocol::AlternateNostril
        | PhaseProtocol::Timed => PhaseDriver::Timer,
    }
}
