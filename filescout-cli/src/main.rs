use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use filescout::{
    search::Walker, start_search, MatchRecord, ProgressSnapshot, SearchConfig, SearchError,
    SearchEvent, SessionState,
};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How often the event stream is drained
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct CliSearchConfig {
    /// Text to look for in file names (and contents with --contents)
    #[arg(short = 'q', long)]
    query: Option<String>,

    /// Root directory to search in
    #[arg(short = 'd', long, default_value = ".")]
    root: PathBuf,

    /// Also search inside files smaller than 1,000,000 bytes
    #[arg(short = 'c', long)]
    contents: bool,

    /// Match case exactly
    #[arg(short = 's', long)]
    case_sensitive: bool,

    /// Number of worker threads (default: CPU cores)
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Stop the search after this long, e.g. "30s" or "2m"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Print one JSON object per match instead of a table row
    #[arg(long)]
    json: bool,

    /// Configuration file to load
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search file names, and optionally contents, under a directory
    Search(Box<CliSearchConfig>),

    /// Count the files under a directory
    Count {
        /// Root directory to count
        #[arg(short = 'd', long, default_value = ".")]
        root: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search(args) => run_search(*args),
        Commands::Count { root } => run_count(root),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_config(args: &CliSearchConfig) -> Result<SearchConfig> {
    let mut cli_config = SearchConfig {
        query: args.query.clone().unwrap_or_default(),
        root_path: args.root.clone(),
        search_contents: args.contents,
        case_sensitive: args.case_sensitive,
        ..SearchConfig::default()
    };
    if let Some(threads) = args.threads {
        cli_config.thread_count = threads;
    }
    if let Some(level) = &args.log_level {
        cli_config.log_level = level.clone();
    }

    let file_config = SearchConfig::load_from(args.config.as_deref())
        .map_err(|e| SearchError::config_error(e.to_string()))
        .context("Failed to load configuration")?;
    Ok(file_config.merge_with_cli(cli_config))
}

fn run_search(args: CliSearchConfig) -> Result<ExitCode> {
    let config = build_config(&args)?;
    init_logging(&config.log_level);

    let handle = start_search(&config)?;

    if let Some(timeout) = args.timeout {
        let control = handle.control();
        thread::spawn(move || {
            thread::sleep(timeout);
            if control.stop() {
                info!("Stopping after {}", humantime::format_duration(timeout));
            }
        });
    }

    let bar = ProgressBar::new_spinner();
    bar.set_message("Starting search...");
    bar.enable_steady_tick(POLL_INTERVAL);

    let mut matches = 0usize;
    let mut last_progress: Option<ProgressSnapshot> = None;
    let mut terminal: Option<(SessionState, Option<String>)> = None;

    while terminal.is_none() {
        for event in handle.drain() {
            match event {
                SearchEvent::Scanning { files_found } => {
                    bar.set_message(format!(
                        "Scanning directory... Found {} files",
                        HumanCount(files_found)
                    ));
                }
                SearchEvent::Match(record) => {
                    matches += 1;
                    let line = if args.json {
                        serde_json::to_string(&record)?
                    } else {
                        format_match(&record)
                    };
                    bar.suspend(|| println!("{}", line));
                }
                SearchEvent::Progress(snapshot) => {
                    bar.set_length(snapshot.total);
                    bar.set_position(snapshot.processed);
                    bar.set_message(progress_message(&snapshot));
                    last_progress = Some(snapshot);
                }
                SearchEvent::StateChanged { state, detail } => match state {
                    SessionState::Counting => bar.set_message("Scanning directory..."),
                    SessionState::Searching => {
                        bar.set_style(
                            ProgressStyle::with_template("{bar:40.green/white} {msg}")?
                                .progress_chars("##-"),
                        );
                    }
                    _ if state.is_terminal() => terminal = Some((state, detail)),
                    _ => {}
                },
            }
        }
        if terminal.is_none() {
            thread::sleep(POLL_INTERVAL);
        }
    }
    bar.finish_and_clear();

    let (state, detail) = terminal.unwrap_or((SessionState::Failed, None));
    let processed = last_progress.map(|p| p.processed).unwrap_or(0);
    let elapsed = last_progress.map(|p| p.elapsed_secs).unwrap_or(0.0);
    match state {
        SessionState::Completed => {
            eprintln!(
                "Search complete - Processed {} files in {:.1} seconds, {} matches",
                HumanCount(processed),
                elapsed,
                HumanCount(matches as u64)
            );
            Ok(ExitCode::SUCCESS)
        }
        SessionState::Stopped => {
            eprintln!(
                "Search stopped - Processed {} files, {} matches",
                HumanCount(processed),
                HumanCount(matches as u64)
            );
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            eprintln!(
                "{} {}",
                "Error:".red(),
                detail.unwrap_or_else(|| "search failed".to_string())
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_count(root: PathBuf) -> Result<ExitCode> {
    init_logging("warn");
    ensure!(root.is_dir(), "Not a directory: {}", root.display());

    let bar = ProgressBar::new_spinner();
    bar.set_message("Scanning directory...");
    let walker = Walker::new(&root, Arc::new(AtomicBool::new(false)));
    let total = walker.count(|n| {
        bar.set_message(format!("Scanning directory... Found {} files", HumanCount(n)));
    })?;
    bar.finish_and_clear();

    println!("{}", total);
    Ok(ExitCode::SUCCESS)
}

fn format_match(record: &MatchRecord) -> String {
    format!(
        "{}  {}  {}  {}  {}",
        record.name.bold(),
        record.absolute_path.display().to_string().blue(),
        record.size_display(),
        record.modified_display().dimmed(),
        record.type_label.green()
    )
}

fn progress_message(snapshot: &ProgressSnapshot) -> String {
    format!(
        "Processed: {}/{} files ({:.1}%) - {:.0} files/sec",
        HumanCount(snapshot.processed),
        HumanCount(snapshot.total),
        snapshot.percent(),
        snapshot.throughput()
    )
}
