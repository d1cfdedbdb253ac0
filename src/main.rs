use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossfade::analyzer::{self, AnalyzeConfig, AnalyzeOutcome, ProgressSink, ProgressStatus};
use crossfade::cache::TrackCache;
use crossfade::export;
use crossfade::model::TrackFeatures;
use crossfade::sequencer::{self, SequencerParams, Strategy};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "crossfade", version, about = "Harmonic DJ set builder")]
struct Cli {
    /// Cache directory (defaults to the XDG cache location)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum StrategyName {
    HarmonicFlow,
    HarmonicFlowEnhanced,
    WarmUp,
    CoolDown,
    PeakTimeEnhanced,
    EnergyWaveEnhanced,
    ConsistentEnhanced,
    GenreFlow,
    EmotionalJourney,
    SmartHarmonic,
}

impl StrategyName {
    fn to_strategy(&self) -> Strategy {
        match self {
            Self::HarmonicFlow => Strategy::HarmonicFlow,
            Self::HarmonicFlowEnhanced => Strategy::HarmonicFlowEnhanced,
            Self::WarmUp => Strategy::WarmUp,
            Self::CoolDown => Strategy::CoolDown,
            Self::PeakTimeEnhanced => Strategy::PeakTimeEnhanced,
            Self::EnergyWaveEnhanced => Strategy::EnergyWaveEnhanced,
            Self::ConsistentEnhanced => Strategy::ConsistentEnhanced,
            Self::GenreFlow => Strategy::GenreFlow,
            Self::EmotionalJourney => Strategy::EmotionalJourney,
            Self::SmartHarmonic => Strategy::SmartHarmonic,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze all audio files under a folder
    Analyze {
        /// Folder to analyze (recursive)
        folder: PathBuf,

        /// Number of parallel workers (default: CPU/file-count policy)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Per-file timeout in seconds
        #[arg(long, default_value = "60")]
        timeout: u64,

        /// Bypass the feature cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Analyze a folder and sequence the tracks into a playlist
    Playlist {
        /// Folder to analyze (recursive)
        folder: PathBuf,

        /// Ordering strategy
        #[arg(short, long, value_enum, default_value = "harmonic-flow")]
        strategy: StrategyName,

        /// Export path (.m3u or .xml); prints only when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Playlist name used in the export header
        #[arg(long, default_value = "crossfade set")]
        name: String,

        /// BPM window for adjacent tracks
        #[arg(long, default_value = "6.0")]
        bpm_tolerance: f64,

        /// Harmonic strictness, 1-10
        #[arg(long, default_value = "5")]
        strictness: u8,

        /// Genre weight, 0.0-1.0
        #[arg(long, default_value = "0.5")]
        genre_weight: f64,

        /// Peak position as a percentage of the set (peak-time strategy)
        #[arg(long, default_value = "60")]
        peak_position: f64,

        /// Allow experimental (distant-key) transitions
        #[arg(long)]
        experimental: bool,

        /// Number of parallel workers
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Per-file timeout in seconds
        #[arg(long, default_value = "60")]
        timeout: u64,

        /// Bypass the feature cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Inspect or clear the feature cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache statistics
    Stats,
    /// Remove every cached record
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let cache_dir = cli
        .cache_dir
        .unwrap_or_else(crossfade::config::default_cache_dir);
    log::info!("Cache: {}", cache_dir.display());

    match cli.command {
        Commands::Analyze {
            folder,
            jobs,
            timeout,
            no_cache,
        } => {
            let cfg = build_config(&cache_dir, jobs, timeout, no_cache);
            let outcome = run_analysis(&folder, &cfg)?;
            print_track_table(&outcome.records);
            print_failures(&outcome.failures);
            println!(
                "Analysis complete: {} analyzed, {} failed",
                outcome.records.len(),
                outcome.failures.len()
            );
        }

        Commands::Playlist {
            folder,
            strategy,
            output,
            name,
            bpm_tolerance,
            strictness,
            genre_weight,
            peak_position,
            experimental,
            jobs,
            timeout,
            no_cache,
        } => {
            let cfg = build_config(&cache_dir, jobs, timeout, no_cache);
            let outcome = run_analysis(&folder, &cfg)?;
            print_failures(&outcome.failures);

            let strategy = strategy.to_strategy();
            let params = SequencerParams {
                bpm_tolerance,
                harmonic_strictness: strictness.clamp(1, 10),
                genre_weight: genre_weight.clamp(0.0, 1.0),
                peak_position: peak_position.clamp(0.0, 100.0),
                allow_experimental: experimental,
            };
            let result = sequencer::sequence(&outcome.records, strategy, &params);

            println!("Playlist ({} strategy):", strategy.name());
            println!();
            print_track_table(&result.playlist);
            print_metrics(&result.metrics);

            if let Some(output) = output {
                export::export_to_path(&output, &name, &result.playlist)
                    .context("Export failed")?;
                println!("Exported to {}", output.display());
            }
        }

        Commands::Cache { action } => {
            let cache = TrackCache::open(&cache_dir).context("Failed to open cache")?;
            match action {
                CacheCommands::Stats => {
                    let stats = cache.stats().context("Failed to read cache stats")?;
                    println!("Cache: {}", cache_dir.display());
                    println!("Entries:  {}", stats.entries);
                    println!("Size:     {:.1} KiB", stats.db_bytes as f64 / 1024.0);
                }
                CacheCommands::Clear => {
                    let removed = cache.clear().context("Failed to clear cache")?;
                    println!("Cache cleared: {removed} entries removed");
                }
            }
        }
    }

    Ok(())
}

fn build_config(
    cache_dir: &Path,
    jobs: Option<usize>,
    timeout: u64,
    no_cache: bool,
) -> AnalyzeConfig {
    AnalyzeConfig {
        max_workers: jobs,
        per_file_timeout: Duration::from_secs(timeout.max(1)),
        cache_dir: cache_dir.to_path_buf(),
        use_cache: !no_cache,
        ..AnalyzeConfig::default()
    }
}

fn run_analysis(folder: &Path, cfg: &AnalyzeConfig) -> Result<AnalyzeOutcome> {
    let sink = BarSink::new();
    let outcome = analyzer::analyze_folder(folder, cfg, &sink).context("Analysis failed")?;
    sink.finish(&outcome);
    Ok(outcome)
}

/// indicatif-backed progress sink; only the dispatcher calls it.
struct BarSink {
    pb: ProgressBar,
}

impl BarSink {
    fn new() -> Self {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
        );
        Self { pb }
    }

    fn finish(&self, outcome: &AnalyzeOutcome) {
        self.pb.finish_with_message(format!(
            "Done: {} analyzed, {} failed",
            outcome.records.len(),
            outcome.failures.len()
        ));
    }
}

impl ProgressSink for BarSink {
    fn update(&self, done: usize, total: usize, current: &Path, status: ProgressStatus) {
        self.pb.set_length(total as u64);
        self.pb.set_position(done as u64);
        let file = current
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.pb.set_message(format!("{file} ({})", status.as_str()));
    }
}

fn print_track_table(tracks: &[TrackFeatures]) {
    if tracks.is_empty() {
        println!("No tracks.");
        return;
    }

    println!(
        "{:>3}  {:<40} {:>6} {:>4} {:>6} {:>5}  {:>9} {:>9}",
        "#", "Track", "BPM", "Key", "Energy", "Bass", "Mix in", "Mix out"
    );
    println!("{}", "-".repeat(92));

    for (i, t) in tracks.iter().enumerate() {
        let label = t.display_label();
        let label: String = if label.len() > 40 {
            format!("{}...", &label[..37])
        } else {
            label
        };
        println!(
            "{:>3}  {:<40} {:>6.1} {:>4} {:>6.2} {:>5.2}  {:>9} {:>9}",
            i + 1,
            label,
            t.bpm,
            t.camelot.to_string(),
            t.energy,
            t.bass_intensity,
            fmt_time(t.mix_in_s),
            fmt_time(t.mix_out_s),
        );
    }
    println!();
}

fn print_metrics(metrics: &crossfade::sequencer::metrics::PlaylistMetrics) {
    println!("Quality:");
    match metrics.mean_compat {
        Some(mean) => println!("  mean compatibility:  {mean:.1}"),
        None => println!("  mean compatibility:  n/a"),
    }
    println!(
        "  harmonic hit rate:   {:.0}%",
        metrics.harmonic_hit_rate * 100.0
    );
    println!(
        "  BPM jumps:           mean {:.1}, p95 {:.1}, max {:.1}",
        metrics.bpm_jump_mean, metrics.bpm_jump_p95, metrics.bpm_jump_max
    );
    println!("  energy correlation:  {:+.2}", metrics.energy_correlation);
    println!("  genre switches:      {}", metrics.genre_switches);
    if metrics.constraint_relaxations > 0 {
        println!(
            "  constraints relaxed: {}",
            metrics.constraint_relaxations
        );
    }
}

fn print_failures(failures: &[analyzer::AnalyzeFailure]) {
    for failure in failures {
        println!(
            "SKIP [{}] {}: {}",
            failure.reason.as_str(),
            failure.path.display(),
            failure.message
        );
    }
}

fn fmt_time(seconds: f64) -> String {
    let total = seconds.round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
