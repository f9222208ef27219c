//! `acfp` command-line tool: index WAV files and query them for similar audio.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use acfp::{
    AcfpConfig, DistanceKind, MatchConfig, RetrievalService, TrackFilter, TrackId, TrackMetadata,
    WavAudioSource,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const DEFAULT_INDEX_PATH: &str = "acfp.redb";

#[derive(Parser, Debug)]
#[command(name = "acfp", version, about = "Audio content fingerprinting and similarity search")]
struct Cli {
    /// YAML configuration file (built-in defaults when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// redb index file, overrides the configured backend
    #[arg(long, global = true)]
    index: Option<PathBuf>,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fingerprint a WAV file and add it to the index
    Insert {
        file: PathBuf,
        /// Track title (file stem when omitted)
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        album: Option<String>,
    },
    /// Find indexed tracks similar to a WAV clip
    Query {
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        start_ms: u64,
        /// Milliseconds of audio to read (to the end when omitted)
        #[arg(long)]
        duration_ms: Option<u64>,
        /// Minimum number of agreeing hash tables per candidate
        #[arg(long)]
        threshold: Option<usize>,
        /// Score every stored fingerprint instead of probing buckets
        #[arg(long)]
        full_scan: bool,
        #[arg(long)]
        max_probes: Option<usize>,
        #[arg(long)]
        max_results: Option<usize>,
        #[arg(long, value_enum)]
        distance: Option<DistanceArg>,
    },
    /// Print track and fingerprint totals
    Stats,
    /// List indexed tracks
    List {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        artist: Option<String>,
    },
    /// Remove a track and its fingerprints
    Delete { track_id: TrackId },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DistanceArg {
    Hamming,
    Jaccard,
    Cosine,
}

impl From<DistanceArg> for DistanceKind {
    fn from(arg: DistanceArg) -> Self {
        match arg {
            DistanceArg::Hamming => DistanceKind::Hamming,
            DistanceArg::Jaccard => DistanceKind::Jaccard,
            DistanceArg::Cosine => DistanceKind::Cosine,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config, cli.json_logs);

    let service = RetrievalService::open_index(&config).context("opening index")?;
    let source = WavAudioSource::new();

    match cli.command {
        Commands::Insert {
            file,
            title,
            artist,
            album,
        } => {
            let title = title.unwrap_or_else(|| file_stem(&file));
            let mut metadata = TrackMetadata::new(title);
            metadata.artist = artist;
            metadata.album = album;
            let outcome = service
                .insert_file(&source, &file, &metadata)
                .with_context(|| format!("inserting {}", file.display()))?;
            print_json(&outcome)?;
        }
        Commands::Query {
            file,
            start_ms,
            duration_ms,
            threshold,
            full_scan,
            max_probes,
            max_results,
            distance,
        } => {
            let request = match_request(
                service.default_match_config(),
                threshold,
                full_scan,
                max_probes,
                max_results,
                distance,
            );
            let outcome = service
                .find_similar_file(&source, &file, start_ms, duration_ms, &request)
                .with_context(|| format!("querying {}", file.display()))?;
            print_json(&outcome)?;
            if outcome.hits.is_empty() {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Stats => print_json(&service.stats()?)?,
        Commands::List { title, artist } => {
            let mut filter = TrackFilter::all();
            if let Some(title) = title {
                filter = filter.title_contains(title);
            }
            if let Some(artist) = artist {
                filter = filter.artist(artist);
            }
            print_json(&service.tracks(&filter)?)?;
        }
        Commands::Delete { track_id } => {
            let removed = service.delete(track_id)?;
            print_json(&serde_json::json!({ "track_id": track_id, "removed": removed }))?;
            if !removed {
                return Ok(ExitCode::from(2));
            }
        }
    }

    service.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn load_config(cli: &Cli) -> Result<AcfpConfig> {
    let config = match &cli.config {
        Some(path) => AcfpConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AcfpConfig::default(),
    };
    let config = match &cli.index {
        Some(path) => config.with_redb_path(path.display().to_string()),
        None if config.index.backend == "in_memory" => config.with_redb_path(DEFAULT_INDEX_PATH),
        None => config,
    };
    Ok(config)
}

fn match_request(
    defaults: &MatchConfig,
    threshold: Option<usize>,
    full_scan: bool,
    max_probes: Option<usize>,
    max_results: Option<usize>,
    distance: Option<DistanceArg>,
) -> MatchConfig {
    let mut request = defaults.clone();
    if let Some(threshold) = threshold {
        request = request.with_threshold_tables(threshold);
    }
    if full_scan {
        request = request.with_full_scan(true);
    }
    if let Some(max_probes) = max_probes {
        request = request.with_max_probes(max_probes);
    }
    if let Some(max_results) = max_results {
        request = request.with_max_results(max_results);
    }
    if let Some(distance) = distance {
        request = request.with_distance(distance.into());
    }
    request
}

fn init_tracing(config: &AcfpConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
