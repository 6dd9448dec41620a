use breath_core::engine::COUNTED_PHASE;
use breath_core::export::{export_csv, stats_to_json, write_csv};
use breath_core::*;
use chrono::{Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "breathe")]
#[command(about = "Guided breathing sessions with phase timing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Show debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available breathing techniques
    Techniques,

    /// Run a breathing session (default)
    Start {
        /// Technique id (box, 478, coherent, ...)
        #[arg(long)]
        technique: Option<String>,

        /// Stop after this many breath cycles
        #[arg(long, conflicts_with = "minutes")]
        breaths: Option<u32>,

        /// Stop after this many minutes
        #[arg(long)]
        minutes: Option<u32>,

        /// Phase timing override, e.g. --timing inhale=6
        #[arg(long, value_parser = parse_timing)]
        timing: Vec<(String, f64)>,

        /// Ambient sound (none, rain, ocean, forest, pink-noise, brown-noise, white-noise)
        #[arg(long)]
        sound: Option<String>,

        /// Run on a simulated clock instead of waiting in real time
        #[arg(long)]
        simulate: bool,

        /// Don't record the session in statistics
        #[arg(long)]
        no_record: bool,
    },

    /// Show aggregate statistics
    Stats,

    /// Show recent sessions, newest first
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Export statistics (json) or session history (csv)
    Export {
        #[arg(long, value_enum)]
        format: ExportFormat,

        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Drop history entries older than a number of days
    Prune {
        #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(i64).range(1..))]
        days: i64,
    },

    /// Clear all statistics (the session journal is kept)
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "warn" };
    breath_core::logging::init_with_level(level);

    // Determine data directory
    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    tracing::debug!("Using data directory {:?}", data_dir);

    match cli.command {
        Some(Commands::Techniques) => cmd_techniques(),
        Some(Commands::Start {
            technique,
            breaths,
            minutes,
            timing,
            sound,
            simulate,
            no_record,
        }) => {
            let options = StartOptions {
                technique,
                breaths,
                minutes,
                timing,
                sound,
                simulate,
                no_record,
            };
            cmd_start(&data_dir, options, &config)
        }
        Some(Commands::Stats) => cmd_stats(&data_dir),
        Some(Commands::History { limit }) => cmd_history(&data_dir, limit),
        Some(Commands::Export { format, output }) => cmd_export(&data_dir, format, output),
        Some(Commands::Prune { days }) => cmd_prune(&data_dir, days),
        Some(Commands::Reset) => cmd_reset(&data_dir),
        None => {
            // Default to "start" with configured settings
            cmd_start(&data_dir, StartOptions::default(), &config)
        }
    }
}

fn parse_timing(s: &str) -> std::result::Result<(String, f64), String> {
    let (phase, secs) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PHASE=SECONDS, got '{}'", s))?;
    let secs: f64 = secs
        .trim()
        .parse()
        .map_err(|_| format!("invalid seconds '{}'", secs))?;
    Ok((phase.trim().to_string(), secs))
}

#[derive(Default)]
struct StartOptions {
    technique: Option<String>,
    breaths: Option<u32>,
    minutes: Option<u32>,
    timing: Vec<(String, f64)>,
    sound: Option<String>,
    simulate: bool,
    no_record: bool,
}

fn cmd_techniques() -> Result<()> {
    for technique in catalog::list_all() {
        let marker = if technique.special { " *" } else { "" };
        println!("{:<10} {}{}", technique.id, technique.name, marker);
        println!("{:<10} {}", "", technique.description);
        println!("{:<10} Benefits: {}", "", technique.benefits);

        let phases: Vec<String> = technique
            .phases
            .iter()
            .map(|phase| {
                let value = technique.default_timing.get(phase).copied().unwrap_or(0.0);
                if technique.protocol == PhaseProtocol::WimHof && phase == COUNTED_PHASE {
                    format!("{} x{}", phase, value)
                } else {
                    format!("{} {}s", phase, value)
                }
            })
            .collect();
        println!("{:<10} {}", "", phases.join(" → "));
        println!();
    }

    println!("* guided protocol");
    Ok(())
}

fn cmd_start(data_dir: &Path, options: StartOptions, config: &Config) -> Result<()> {
    let catalog = get_default_catalog();
    let errors = catalog.validate();
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::Other("Invalid catalog".into()));
    }

    // Session settings: config defaults, then command-line overrides
    let mut session = config.session.clone();
    if let Some(technique) = options.technique {
        if catalog.get(&technique).is_none() {
            eprintln!(
                "Unknown technique: {}. Using {}.",
                technique,
                catalog::DEFAULT_TECHNIQUE
            );
        }
        session.technique = technique;
    }
    if let Some(breaths) = options.breaths {
        session.goal_type = GoalType::Breaths;
        session.goal_value = breaths;
    } else if let Some(minutes) = options.minutes {
        session.goal_type = GoalType::Duration;
        session.goal_value = minutes;
    }
    session.custom_timing.extend(options.timing);

    let sound_kind = match options.sound {
        Some(name) => name.parse::<SoundKind>()?,
        None if config.sound.auto_start => config.sound.kind(),
        None => SoundKind::None,
    };
    let sound = Rc::new(RefCell::new(AmbientSound::new(
        config.sound.volume_fraction(),
    )));
    sound.borrow_mut().play(sound_kind);

    let completed = Rc::new(RefCell::new(None));
    let callbacks = session_callbacks(completed.clone(), config.display.show_instructions);

    let technique = catalog.lookup(&session.technique);
    display_header(technique, &session, sound_kind);

    let final_state = if options.simulate {
        let mut engine =
            BreathingEngine::with_defaults(ManualClock::default(), config.session.clone());
        prepare_engine(&mut engine, callbacks, &sound, data_dir, options.no_record)?;
        engine.start_session(session);
        drive_simulated(&mut engine);
        engine.session_state()
    } else {
        let mut engine =
            BreathingEngine::with_defaults(SystemClock::new(), config.session.clone());
        prepare_engine(&mut engine, callbacks, &sound, data_dir, options.no_record)?;
        println!("  {}", CONTROLS_HELP);
        println!();
        let controls = spawn_stdin_reader();
        engine.start_session(session);
        drive_realtime(&mut engine, controls);
        engine.session_state()
    };

    sound.borrow_mut().stop();

    match completed.borrow().as_ref() {
        Some(record) => {
            println!();
            println!(
                "✓ Session complete: {} breaths in {}",
                record.breath_count,
                format_duration(record.duration)
            );
            if options.no_record {
                println!("  [Not recorded]");
            } else {
                println!("  Recorded to {}", data_dir.display());
            }
        }
        None => {
            println!();
            println!("Session ended after {} breaths", final_state.breath_count);
        }
    }

    Ok(())
}

fn prepare_engine<C: Clock>(
    engine: &mut BreathingEngine<C>,
    callbacks: Callbacks,
    sound: &Rc<RefCell<AmbientSound>>,
    data_dir: &Path,
    no_record: bool,
) -> Result<()> {
    engine.set_callbacks(callbacks);
    engine.set_sound(sound.clone());
    if !no_record {
        std::fs::create_dir_all(data_dir)?;
        engine.set_gateway(FileGateway::new(data_dir));
    }
    Ok(())
}

/// Jump the simulated clock from deadline to deadline until no timers remain
fn drive_simulated(engine: &mut BreathingEngine<ManualClock>) {
    while let Some(deadline) = engine.next_deadline() {
        engine.clock().set(deadline);
        engine.run_due();
    }
}

const CONTROLS_HELP: &str = "Controls: p pause, r resume, f finish, q stop, t <technique>";

/// Keyboard command typed during a real-time session
#[derive(Clone, Debug, PartialEq)]
enum Control {
    Pause,
    Resume,
    Stop,
    Finish,
    Technique(String),
}

impl Control {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        match words.next()? {
            "p" | "pause" => Some(Control::Pause),
            "r" | "resume" => Some(Control::Resume),
            "q" | "quit" | "stop" => Some(Control::Stop),
            "f" | "finish" => Some(Control::Finish),
            "t" | "technique" => words.next().map(|id| Control::Technique(id.to_string())),
            _ => None,
        }
    }
}

/// Forward stdin lines over a channel; it disconnects at end of input
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("Stopped reading stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// What ended a wait in the real-time loop
enum Wake {
    Deadline,
    Input(String),
    InputClosed,
}

/// Run the engine on the real clock, applying keyboard controls between timers
///
/// Returns once the session has completed or been stopped. A paused session
/// whose input has closed can never resume, so it is stopped.
fn drive_realtime(engine: &mut BreathingEngine<SystemClock>, controls: Receiver<String>) {
    let mut controls = Some(controls);

    loop {
        let deadline = engine.next_deadline();
        if deadline.is_none() && !engine.is_running() {
            break;
        }
        let wait = deadline
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(engine.clock().now_ms())));

        let wake = match (controls.as_ref(), wait) {
            (Some(rx), Some(wait)) => match rx.recv_timeout(wait) {
                Ok(line) => Wake::Input(line),
                Err(RecvTimeoutError::Timeout) => Wake::Deadline,
                Err(RecvTimeoutError::Disconnected) => Wake::InputClosed,
            },
            (Some(rx), None) => match rx.recv() {
                Ok(line) => Wake::Input(line),
                Err(_) => Wake::InputClosed,
            },
            (None, Some(wait)) => {
                std::thread::sleep(wait);
                Wake::Deadline
            }
            (None, None) => {
                engine.stop_session();
                Wake::Deadline
            }
        };

        match wake {
            Wake::Input(line) => apply_control(engine, &line),
            Wake::InputClosed => controls = None,
            Wake::Deadline => {}
        }
        engine.run_due();
    }
}

fn apply_control<C: Clock>(engine: &mut BreathingEngine<C>, line: &str) {
    let Some(control) = Control::parse(line) else {
        if !line.trim().is_empty() {
            println!("  {}", CONTROLS_HELP);
        }
        return;
    };
    tracing::debug!("Control: {:?}", control);

    match control {
        Control::Pause => {
            if engine.status() == SessionStatus::Running {
                engine.pause_session();
                println!("  ‖ Paused");
            }
        }
        Control::Resume => {
            if engine.status() == SessionStatus::Paused {
                engine.resume_session();
                println!("  ▶ Resumed");
            }
        }
        Control::Stop => engine.stop_session(),
        Control::Finish => engine.complete_session(),
        Control::Technique(id) => {
            engine.update_configuration(ConfigUpdate {
                technique: Some(id),
                ..Default::default()
            });
            println!("  → {}", engine.technique().name);
        }
    }
    let _ = io::stdout().flush();
}

fn session_callbacks(
    completed: Rc<RefCell<Option<SessionRecord>>>,
    show_instructions: bool,
) -> Callbacks {
    Callbacks::new()
        .on_phase_change(move |update| match update.kind {
            PhaseEventKind::Started => {
                let name = catalog::phase_display_name(&update.phase);
                if show_instructions {
                    println!(
                        "  {:<14} {:>5.1}s  {}",
                        name, update.duration_secs, update.instruction
                    );
                } else {
                    println!("  {:<14} {:>5.1}s", name, update.duration_secs);
                }
            }
            PhaseEventKind::Progress => {}
            PhaseEventKind::Repetition { .. } => {
                println!("    {}", update.instruction);
            }
        })
        .on_breath_complete(|count| {
            println!("  ✓ Breath {}", count);
            let _ = io::stdout().flush();
        })
        .on_session_complete(move |record| {
            *completed.borrow_mut() = Some(record.clone());
        })
}

fn display_header(technique: &Technique, session: &SessionConfig, sound: SoundKind) {
    let goal = match session.goal_type {
        GoalType::Breaths => format!("{} breaths", session.goal_value),
        GoalType::Duration => format!("{} min", session.goal_value),
    };

    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {}", technique.name.to_uppercase());
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  {}", technique.description);
    println!("  Goal: {}", goal);
    if sound != SoundKind::None {
        println!("  Sound: {}", sound.name());
    }
    println!();
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    let stats = FileGateway::new(data_dir).stats()?;

    if stats.total_sessions == 0 {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    println!("Sessions:    {}", stats.total_sessions);
    println!("Breaths:     {}", stats.total_breaths);
    println!("Total time:  {}", format_duration(stats.total_time));
    println!("Streak:      {} days", stats.current_streak);
    if let Some(last) = stats.last_session_date {
        println!(
            "Last:        {}",
            last.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

fn cmd_history(data_dir: &Path, limit: usize) -> Result<()> {
    let gateway = FileGateway::new(data_dir);
    let records = gateway.journal().read_all()?;

    if records.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    for record in records.iter().rev().take(limit) {
        let goal = match record.goal_type {
            GoalType::Breaths => format!("{} breaths", record.goal_value),
            GoalType::Duration => format!("{} min", record.goal_value),
        };
        println!(
            "{}  {:<10} {:>4} breaths  {:>6}  (goal {})",
            record.date.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            record.technique,
            record.breath_count,
            format_duration(record.duration),
            goal
        );
    }

    Ok(())
}

fn cmd_export(data_dir: &Path, format: ExportFormat, output: Option<PathBuf>) -> Result<()> {
    let gateway = FileGateway::new(data_dir);

    match format {
        ExportFormat::Json => {
            let json = stats_to_json(&gateway.stats()?, Utc::now())?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("✓ Exported statistics to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        ExportFormat::Csv => {
            let records = gateway.journal().read_all()?;
            match output {
                Some(path) => {
                    let count = export_csv(&records, &path)?;
                    println!("✓ Exported {} sessions to {}", count, path.display());
                }
                None => {
                    write_csv(&records, io::stdout().lock())?;
                }
            }
        }
    }

    Ok(())
}

fn cmd_prune(data_dir: &Path, days: i64) -> Result<()> {
    let removed = FileGateway::new(data_dir).prune_older_than_days(days)?;
    println!("✓ Removed {} sessions older than {} days", removed, days);
    Ok(())
}

fn cmd_reset(data_dir: &Path) -> Result<()> {
    FileGateway::new(data_dir).reset()?;
    println!("✓ Statistics reset");
    Ok(())
}

/// `m:ss` for a millisecond duration
fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}
