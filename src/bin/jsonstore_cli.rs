use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use jsonstore::core::{
    Error as StoreError, ReplayDescriptor, StoreConfig, StoreReader, TimeInterval, Timestamp,
};
use log::info;
use time::OffsetDateTime;

#[derive(Parser)]
#[command(name = "jsonstore", version, about = "Multi-stream JSON store tooling")]
struct Cli {
    /// JSON file with a store config (extension, schemas, preloaded refs).
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Inspect {
        name: String,
        path: PathBuf,
    },
    Replay {
        name: String,
        path: PathBuf,
        /// Stream to replay; repeat for several. All streams if omitted.
        #[arg(long = "stream")]
        streams: Vec<String>,
        #[arg(long = "from", allow_negative_numbers = true)]
        from: Option<Timestamp>,
        #[arg(long = "to", allow_negative_numbers = true)]
        to: Option<Timestamp>,
        /// Filter on envelope `Time` instead of `OriginatingTime`.
        #[arg(long = "wall-clock")]
        wall_clock: bool,
        #[arg(long = "limit")]
        limit: Option<usize>,
    },
    Verify {
        name: String,
        path: PathBuf,
    },
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Inspect { name, path } => cmd_inspect(&name, &path, config, &mut out)?,
        Commands::Replay {
            name,
            path,
            streams,
            from,
            to,
            wall_clock,
            limit,
        } => {
            let interval = TimeInterval::new(
                from.unwrap_or(Timestamp::MIN),
                to.unwrap_or(Timestamp::MAX),
            );
            if interval.is_empty() {
                bail!("--from must not be after --to");
            }
            let descriptor = ReplayDescriptor::new(interval, !wall_clock);
            cmd_replay(&name, &path, config, &streams, descriptor, limit, &mut out)?;
        }
        Commands::Verify { name, path } => cmd_verify(&name, &path, config, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn cmd_inspect(name: &str, path: &Path, config: StoreConfig, out: &mut dyn Write) -> Result<()> {
    let reader = StoreReader::open(name, path, config)?;
    writeln!(out, "store={} path={}", reader.name(), reader.path().display())?;
    writeln!(
        out,
        "streams={} coverage={}",
        reader.available_streams().len(),
        format_interval(reader.originating_time_interval())
    )?;
    for meta in reader.available_streams() {
        writeln!(
            out,
            "  id={} name={} type={} partition={} messages={} originating={}",
            meta.id,
            meta.name,
            meta.type_name.as_deref().unwrap_or("-"),
            meta.partition_name.as_deref().unwrap_or("-"),
            meta.message_count,
            format_interval(meta.originating_interval())
        )?;
    }
    Ok(())
}

fn cmd_replay(
    name: &str,
    path: &Path,
    config: StoreConfig,
    streams: &[String],
    descriptor: ReplayDescriptor,
    limit: Option<usize>,
    out: &mut dyn Write,
) -> Result<()> {
    let mut reader = StoreReader::open(name, path, config)?;
    if streams.is_empty() {
        reader.open_all_streams()?;
    } else {
        for stream in streams {
            reader.open_stream_by_name(stream)?;
        }
    }
    reader.seek(descriptor)?;

    let mut emitted = 0usize;
    for message in reader.replay() {
        if limit.is_some_and(|limit| emitted >= limit) {
            break;
        }
        let message = message?;
        let line = serde_json::json!({
            "Envelope": message.envelope,
            "Data": message.data,
        });
        writeln!(out, "{line}")?;
        emitted += 1;
    }
    info!("replayed {emitted} records from {name}");
    Ok(())
}

fn cmd_verify(name: &str, path: &Path, config: StoreConfig, out: &mut dyn Write) -> Result<()> {
    let mut reader = StoreReader::open(name, path, config)?;
    let mut count = 0u64;
    loop {
        match reader.read() {
            Ok(Some(_)) => count += 1,
            Ok(None) => break,
            Err(StoreError::MalformedStore(msg)) => {
                return Err(anyhow!("record {count}: {msg}"));
            }
            Err(err) => return Err(err.into()),
        }
    }
    writeln!(out, "ok records={count}")?;
    Ok(())
}

fn format_interval(interval: TimeInterval) -> String {
    if interval.is_empty() {
        return "empty".to_string();
    }
    format!(
        "[{}, {}]",
        format_timestamp(interval.left),
        format_timestamp(interval.right)
    )
}

fn format_timestamp(ns: Timestamp) -> String {
    match OffsetDateTime::from_unix_timestamp_nanos(ns as i128) {
        Ok(dt) => {
            let date = dt.date();
            format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
                date.year(),
                date.month() as u8,
                date.day(),
                dt.hour(),
                dt.minute(),
                dt.second(),
                dt.nanosecond()
            )
        }
        Err(_) => ns.to_string(),
    }
}
