use std::fs;
use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use autotyper::controller::TypingController;
use autotyper::desktop::{find_window, open_desktop, DesktopBackend};
use autotyper::keyboard::find_first_unsupported_char;
use autotyper::model::{
    ClickPoint, Pacing, StrategyKind, TypingEvent, TypingJob, TypingMode, TypingState,
    WindowHandle,
};
use autotyper::planner::{plan_job, stats, PlanStats};
use autotyper::timing::{TimingConfig, TimingProfile};
use autotyper::trace::{job_console_trace, print_trace_line, TraceEvent};
use autotyper::typo::{TypoConfig, TypoProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Auto,
    X11,
    /// In-memory desktop with one editor window; nothing reaches the screen.
    Sim,
}

impl BackendArg {
    fn to_library(self) -> DesktopBackend {
        match self {
            BackendArg::Auto => DesktopBackend::Auto,
            BackendArg::X11 => DesktopBackend::X11,
            BackendArg::Sim => DesktopBackend::Sim,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Char,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProfileArg {
    Smooth,
    Natural,
    Slow,
}

impl ProfileArg {
    fn to_library(self) -> TimingProfile {
        match self {
            ProfileArg::Smooth => TimingProfile::Smooth,
            ProfileArg::Natural => TimingProfile::Natural,
            ProfileArg::Slow => TimingProfile::SlowDeliberate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TypoArg {
    Off,
    Subtle,
    Natural,
    Messy,
}

impl TypoArg {
    fn to_library(self) -> TypoProfile {
        match self {
            TypoArg::Off => TypoProfile::Off,
            TypoArg::Subtle => TypoProfile::Subtle,
            TypoArg::Natural => TypoProfile::Natural,
            TypoArg::Messy => TypoProfile::Messy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    /// Post keys to the window without taking focus.
    Background,
    /// Focus the window and inject real key events.
    Foreground,
}

#[derive(Debug, Args, Clone)]
struct JobArgs {
    /// Input text file, or '-' for stdin
    #[arg(long, value_name = "PATH", required_unless_present = "job")]
    input: Option<PathBuf>,

    /// Job file (JSON). Replaces the typing and delivery flags; `--seed` still applies.
    #[arg(long, value_name = "PATH", conflicts_with = "input")]
    job: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ModeArg::Char)]
    mode: ModeArg,

    /// Fixed delay after each character (ms)
    #[arg(long, default_value_t = 30)]
    char_delay: u64,

    /// Fixed delay after each line (ms)
    #[arg(long, default_value_t = 50)]
    line_delay: u64,

    /// Human-like timing (char mode only)
    #[arg(long)]
    human: bool,

    /// Timing profile used with `--human`.
    #[arg(long, value_enum, default_value_t = ProfileArg::Natural)]
    profile: ProfileArg,

    /// Typo simulation profile (char mode with `--human` only)
    #[arg(long, value_enum, default_value_t = TypoArg::Off)]
    typos: TypoArg,

    /// Override the profile's per-character typo probability (0.0-1.0)
    #[arg(long)]
    typo_rate: Option<f64>,

    /// Allow typos inside quotes, escapes and indentation.
    #[arg(long)]
    no_safe_mode: bool,

    /// Optional RNG seed (for debugging)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Parser)]
#[command(name = "autotyper")]
#[command(about = "Types text into a chosen window, at human or fixed pace", long_about = None)]
struct Cli {
    /// More diagnostics on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List windows that can be targeted
    Windows {
        #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
        backend: BackendArg,
    },

    /// Plan a job without typing it and write the schedule (JSON)
    Preview {
        #[command(flatten)]
        job: JobArgs,

        /// Output schedule file (defaults to stdout)
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Type a job into a window
    Run {
        /// Desktop backend.
        ///
        /// - auto: X11 when DISPLAY is set
        /// - x11: force X11 (XTEST and SendEvent)
        /// - sim: in-memory dry run
        #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
        backend: BackendArg,

        /// Target window: id (decimal or 0x-hex) or a unique title substring
        #[arg(long, value_name = "ID|TITLE")]
        window: String,

        #[command(flatten)]
        job: JobArgs,

        #[arg(long, value_enum, default_value_t = StrategyArg::Background)]
        strategy: StrategyArg,

        /// Click at screen coordinates before typing
        #[arg(long, value_name = "X,Y", value_parser = parse_click)]
        click: Option<ClickPoint>,

        /// Countdown seconds before typing starts
        #[arg(long, default_value_t = 3)]
        countdown: u64,

        /// Disable console typing trace output
        #[arg(long)]
        no_trace: bool,
    },
}

fn parse_click(s: &str) -> std::result::Result<ClickPoint, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let x = x.trim().parse().map_err(|err| format!("bad X: {err}"))?;
    let y = y.trim().parse().map_err(|err| format!("bad Y: {err}"))?;
    Ok(ClickPoint { x, y })
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == std::ffi::OsStr::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }

    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn reads_stdin(args: &JobArgs) -> bool {
    args.input
        .as_deref()
        .is_some_and(|p| p.as_os_str() == std::ffi::OsStr::new("-"))
}

fn build_job(args: &JobArgs) -> Result<TypingJob> {
    let mut job = if let Some(path) = &args.job {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str::<TypingJob>(&json).context("failed to parse job JSON")?
    } else {
        let input = args
            .input
            .as_deref()
            .ok_or_else(|| anyhow!("either --input or --job is required"))?;
        let mut job = TypingJob::new(read_input(input)?, WindowHandle(0));
        job.mode = match args.mode {
            ModeArg::Char => TypingMode::CharByChar,
            ModeArg::Line => TypingMode::LineByLine,
        };
        job.timing = if args.human {
            TimingConfig {
                char_delay_ms: args.char_delay,
                line_delay_ms: args.line_delay,
                ..TimingConfig::human(args.profile.to_library(), None)
            }
        } else {
            TimingConfig::fixed(args.char_delay, args.line_delay)
        };
        job.typo = TypoConfig {
            safe_mode: !args.no_safe_mode,
            probability: args.typo_rate,
            ..TypoConfig::with_profile(args.typos.to_library())
        };
        job
    };

    if args.seed.is_some() {
        job.timing.seed = args.seed;
    }
    // the console trace is planned separately and must match what gets typed
    if job.timing.seed.is_none() {
        job.timing.seed = Some(rand::random());
    }

    job.validate().context("invalid job")?;
    if let Some((idx, c)) = find_first_unsupported_char(&job.text) {
        eprintln!(
            "Warning: {c:?} at char {idx} has no US keystroke; units containing it will be skipped."
        );
    }
    Ok(job)
}

fn print_stats(verb: &str, stats: &PlanStats) {
    eprintln!(
        "{verb}: {} units, {} keystrokes, {} typos, ~{:.1} s",
        stats.units,
        stats.keystrokes,
        stats.typos,
        (stats.total_wait_ms as f64) / 1000.0
    );
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// `p` toggles pause, `s` stops. Runs until stdin closes.
fn spawn_stdin_controls(controller: Arc<TypingController>) -> Result<()> {
    thread::Builder::new()
        .name("stdin-controls".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "p" => {
                        if controller.state() == TypingState::Paused {
                            controller.resume();
                        } else {
                            controller.pause();
                        }
                    }
                    "s" => controller.stop(),
                    "" => {}
                    other => eprintln!("Unknown command {other:?} (p = pause/resume, s = stop)"),
                }
            }
        })
        .context("failed to spawn stdin control thread")?;
    Ok(())
}

/// Prints trace lines up to and including `next_unit`.
fn flush_trace(trace: &[TraceEvent], cursor: &mut usize, next_unit: usize) {
    while let Some(event) = trace.get(*cursor) {
        if event.unit_index > next_unit {
            break;
        }
        print_trace_line(&event.line);
        *cursor += 1;
    }
}

fn run(
    backend: BackendArg,
    window: &str,
    mut job: TypingJob,
    show_trace: bool,
    stdin_controls: bool,
) -> Result<()> {
    let desktop = open_desktop(backend.to_library())?;
    let windows = desktop
        .list_windows()
        .map_err(|err| anyhow!("failed to list windows: {err}"))?;
    let target = find_window(&windows, window)?;
    eprintln!("Target: {} {}", target.handle, target.title);
    job.target = target.handle;

    let units = plan_job(&job);
    print_stats("Planned", &stats(&units));
    let trace = if show_trace {
        job_console_trace(&units)
    } else {
        Vec::new()
    };

    let controller = Arc::new(TypingController::new(desktop));
    let events = controller.subscribe();

    let on_interrupt = Arc::clone(&controller);
    ctrlc::set_handler(move || on_interrupt.stop()).context("failed to install Ctrl+C handler")?;
    if stdin_controls {
        spawn_stdin_controls(Arc::clone(&controller))?;
        eprintln!("Controls: p + Enter to pause/resume, s + Enter to stop, Ctrl+C to stop.");
    } else {
        eprintln!("Controls: Ctrl+C to stop.");
    }

    controller.start(job).context("failed to start typing")?;

    let mut cursor = 0usize;
    let mut started = false;
    for event in events.iter() {
        match event {
            TypingEvent::Countdown { remaining_secs } => {
                eprintln!("Starting in {remaining_secs}...");
            }
            TypingEvent::StateChanged(TypingState::Running) if !started => {
                started = true;
                flush_trace(&trace, &mut cursor, 0);
            }
            TypingEvent::StateChanged(TypingState::Paused) => eprintln!("Paused."),
            TypingEvent::StateChanged(TypingState::Running) => eprintln!("Resumed."),
            TypingEvent::StateChanged(TypingState::Stopping) => eprintln!("Stopping..."),
            TypingEvent::StateChanged(_) => {}
            TypingEvent::Progress(progress) => {
                // typo groups report each char; wait for the whole unit
                let unit_done = units
                    .get(progress.unit_index)
                    .map_or(true, |unit| progress.chars_done >= unit.chars_done);
                if unit_done {
                    flush_trace(&trace, &mut cursor, progress.unit_index + 1);
                }
            }
            TypingEvent::DeliveryFailed { error } => eprintln!("Skipped a unit: {error}"),
            TypingEvent::Finished { .. } => break,
        }
    }

    let snapshot = controller.wait();
    eprintln!(
        "{}: {}/{} chars",
        snapshot.state, snapshot.progress.chars_done, snapshot.progress.total_chars
    );
    match (snapshot.state, snapshot.last_error) {
        (TypingState::Failed, Some(err)) => Err(anyhow::Error::new(err).context("typing failed")),
        (TypingState::Failed, None) => Err(anyhow!("typing failed")),
        _ => Ok(()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Windows { backend } => {
            let desktop = open_desktop(backend.to_library())?;
            let windows = desktop
                .list_windows()
                .map_err(|err| anyhow!("failed to list windows: {err}"))?;
            if windows.is_empty() {
                eprintln!("No titled windows found.");
            }
            for w in windows {
                println!("{}\t{}", w.handle, w.title);
            }
        }
        Command::Preview { job, output } => {
            let job = build_job(&job)?;
            let units = plan_job(&job);
            print_stats("Planned", &stats(&units));

            let json =
                serde_json::to_string_pretty(&units).context("failed to serialize schedule")?;
            if let Some(out) = output {
                write_output(&out, &json)?;
            } else {
                println!("{json}");
            }
        }
        Command::Run {
            backend,
            window,
            job: job_args,
            strategy,
            click,
            countdown,
            no_trace,
        } => {
            let mut job = build_job(&job_args)?;
            if job_args.job.is_none() {
                job.strategy = match strategy {
                    StrategyArg::Background => StrategyKind::Background,
                    StrategyArg::Foreground => StrategyKind::Foreground,
                };
                job.click = click;
                job.countdown_secs = countdown;
                job.pacing = Pacing::default();
            }
            run(backend, &window, job, !no_trace, !reads_stdin(&job_args))?;
        }
    }

    Ok(())
}
