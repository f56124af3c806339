use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use subtitle_helper::{
    classify,
    protocol::PollResult,
    utils::preview,
    AppConfig, CancelOutcome, ConnectionArgs, DownloadFormat, HistoryRecord, HistoryStore,
    HttpGateway, JobRequest, Progress, RemoteCancel, TranscriptionClient,
};
use tokio::signal;
use tokio::time::sleep;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type Client = TranscriptionClient<HttpGateway, HistoryStore>;

#[derive(Parser)]
#[command(name = "subtitle-helper")]
#[command(about = "Transcribe videos and audio through a remote transcription service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Transcribe a link or a local file and save the result to history
    Transcribe {
        /// Video or audio link
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        link: Option<String>,

        /// Local media file to upload instead of a link
        #[arg(long)]
        file: Option<PathBuf>,

        /// Transcription model
        #[arg(long, default_value = "tiny")]
        model: String,

        /// Include timestamps in the transcription
        #[arg(long)]
        timestamps: bool,

        /// Cookie file forwarded to the downloader (links only)
        #[arg(long, conflicts_with = "file")]
        cookies: Option<PathBuf>,
    },

    /// Fetch existing captions for a link without transcribing
    Captions { link: String },

    /// Show the status of a job
    Status { job_id: String },

    /// Ask the backend to stop a job
    Cancel { job_id: String },

    /// Browse or edit the local history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Convert a saved transcription to a file
    Download {
        id: u64,

        #[arg(long, value_enum, default_value = "txt")]
        format: DownloadFormat,

        /// Output path (defaults to the name suggested by the backend)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Check whether the backend is ready
    Health,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List records, newest first
    List {
        /// Maximum number of records, 0 for all
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Print one record in full
    Show { id: u64 },
    /// Delete one record
    Delete { id: u64 },
    /// Delete every record after a countdown
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,

        /// Seconds to wait before clearing; Ctrl+C aborts
        #[arg(long, default_value = "5")]
        hold_secs: u64,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn build_client(config: AppConfig) -> Result<Client> {
    let gateway = HttpGateway::new(config.gateway).context("Failed to create HTTP client")?;
    let store = HistoryStore::open(&config.history_path).with_context(|| {
        format!("Failed to open history at {}", config.history_path.display())
    })?;
    Ok(TranscriptionClient::new(Arc::new(gateway), store, config.poll))
}

fn report_progress(progress: &Progress) {
    match &progress.status {
        Some(status) => eprintln!(
            "[{}/{}] {}",
            progress.attempt, progress.max_attempts, status
        ),
        None if progress.attempt == 0 => eprintln!("Submitting..."),
        None => eprintln!("[{}/{}] waiting for status", progress.attempt, progress.max_attempts),
    }
}

fn print_record(record: &HistoryRecord) {
    let stamp = if record.timestamps_enabled { " (timestamps)" } else { "" };
    println!("#{}  {}", record.id, record.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));
    println!("Input: {}", record.input);
    println!("Model: {}{}", record.model, stamp);
    println!(
        "Time: {:.1}s  Words: {}",
        record.performance.total_time, record.performance.word_count
    );
    println!();
    println!("{}", record.transcription);
}

fn print_cancel(outcome: &CancelOutcome) {
    match outcome {
        CancelOutcome::NoActiveJob => eprintln!("No job to cancel."),
        CancelOutcome::Cancelled { job_id, remote } => {
            eprintln!("Cancelling...");
            match (job_id, remote) {
                (Some(id), RemoteCancel::Requested) => eprintln!("Cancel request sent for job {id}."),
                (Some(id), RemoteCancel::Failed(reason)) => {
                    eprintln!("Could not cancel job {id} on the server: {reason}")
                }
                _ => {}
            }
        }
    }
}

async fn transcribe(
    client: &Client,
    link: Option<String>,
    file: Option<PathBuf>,
    model: String,
    timestamps: bool,
    cookies: Option<PathBuf>,
) -> Result<()> {
    let request = match (link, file) {
        (_, Some(path)) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            JobRequest::file(name, bytes, model)
        }
        (Some(link), None) => {
            let mut request = JobRequest::link(link, model);
            if let Some(path) = cookies {
                let jar = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read cookies from {}", path.display()))?;
                request = request.with_cookies(jar);
            }
            request
        }
        (None, None) => bail!("either a link or --file is required"),
    }
    .with_timestamps(timestamps);

    let job = client.transcribe(request, report_progress);
    tokio::pin!(job);

    let record = loop {
        tokio::select! {
            result = &mut job => break result?,
            _ = signal::ctrl_c() => {
                let outcome = client.cancel().await;
                print_cancel(&outcome);
            }
        }
    };

    info!("Saved history record {}", record.id);
    eprintln!("Done in {:.1}s, {} words (history #{})",
        record.performance.total_time, record.performance.word_count, record.id);
    println!("{}", record.transcription);
    Ok(())
}

async fn history(client: &Client, command: HistoryCommand) -> Result<()> {
    match command {
        HistoryCommand::List { limit } => {
            let records = client.history(limit).await?;
            if records.is_empty() {
                println!("No history yet.");
            }
            for record in records {
                println!(
                    "#{:<5} {}  {:<10} {}",
                    record.id,
                    record.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    record.model,
                    record.input
                );
                println!("       {}", preview(&record.transcription, 80));
            }
        }
        HistoryCommand::Show { id } => print_record(&client.record(id).await?),
        HistoryCommand::Delete { id } => {
            client.delete_record(id).await?;
            eprintln!("Deleted #{id}.");
        }
        HistoryCommand::Clear { yes, hold_secs } => {
            if !yes {
                bail!("refusing to clear history without --yes");
            }
            let count = client.history(0).await?.len();
            eprintln!("Clearing {count} records in {hold_secs}s. Press Ctrl+C to keep them.");
            for remaining in (1..=hold_secs).rev() {
                eprintln!("{remaining}...");
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        eprintln!("Aborted, history kept.");
                        return Ok(());
                    }
                    _ = sleep(Duration::from_secs(1)) => {}
                }
            }
            client.clear_history().await?;
            eprintln!("History cleared.");
        }
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::from(args.connection);
    debug!("Endpoint: {}", config.gateway.endpoint);
    debug!("History: {}", config.history_path.display());
    let client = build_client(config)?;

    match args.command {
        Command::Transcribe { link, file, model, timestamps, cookies } => {
            transcribe(&client, link, file, model, timestamps, cookies).await?
        }
        Command::Captions { link } => {
            let record = client.fetch_captions(&link).await?;
            eprintln!("Saved captions as history #{}", record.id);
            println!("{}", record.transcription);
        }
        Command::Status { job_id } => {
            let status = client.job_status(&job_id).await?;
            println!("{}: {}", job_id, status.status);
            if let Some(error) = &status.error {
                println!("Error: {error}");
            }
            if let Some(output) = &status.output {
                println!("{}", PollResult::from_output(output).text);
            }
        }
        Command::Cancel { job_id } => {
            client.cancel_job(&job_id).await?;
            eprintln!("Cancel request sent for job {job_id}.");
        }
        Command::History { command } => history(&client, command).await?,
        Command::Download { id, format, out } => {
            let file = client.download(id, format).await?;
            let path = out.unwrap_or_else(|| PathBuf::from(&file.file_name));
            tokio::fs::write(&path, &file.bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {} ({} bytes)", path.display(), file.bytes.len());
        }
        Command::Health => {
            let health = client.health().await?;
            println!("{}", if health.ready { "ready" } else { "not ready" });
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level: tracing::Level = args.log_level.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(log_level.into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Starting {} v{}", subtitle_helper::NAME, subtitle_helper::VERSION);

    if let Err(e) = run(args).await {
        let Some(err) = e.downcast_ref::<subtitle_helper::Error>() else {
            return Err(e);
        };
        let diagnosis = classify(err);
        if diagnosis.is_silent() {
            eprintln!("Cancelled, no result was produced.");
            return Ok(());
        }
        debug!("{}", diagnosis);
        eprintln!("{}", diagnosis.render(Local::now()));
        std::process::exit(1);
    }

    Ok(())
}
