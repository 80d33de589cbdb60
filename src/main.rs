use anyhow::{bail, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use mirrank::config::Settings;
use mirrank::sources::{self, Distribution, SourceKind};
use mirrank::{Mirror, MirrorReport, NetworkProber, RankingEngine};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mirrank")]
#[command(about = "Rank distribution mirrors by response time", long_about = None)]
struct Cli {
    /// Log more to stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank all mirrors (e.g., mirrank rank --distro Debian --rounds 3)
    Rank {
        #[command(flatten)]
        mirrors: MirrorArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Find the single fastest mirror
    Best {
        #[command(flatten)]
        mirrors: MirrorArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// List candidate mirrors without probing them
    List {
        #[command(flatten)]
        mirrors: MirrorArgs,
    },
}

#[derive(Args)]
struct MirrorArgs {
    /// Distribution: Ubuntu, Debian, Arch, or any name with a file source
    #[arg(short, long)]
    distro: String,

    /// Where the mirror list comes from
    #[arg(short, long, value_enum, default_value_t = SourceKind::Builtin)]
    source: SourceKind,

    /// Mirror file, for the json and txt sources
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Only keep mirrors in this country (name or two-letter code)
    #[arg(short, long)]
    country: Option<String>,
}

#[derive(Args)]
struct ProbeArgs {
    /// Probe rounds (default from config.toml, else 1)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    rounds: Option<u32>,

    /// Per-probe timeout in seconds (default from config.toml, else 7)
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct RankingDocument<'a> {
    distribution: &'a str,
    rounds: u32,
    urls: &'a [MirrorReport<'a>],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Rank { mirrors, probe } => handle_rank(&mirrors, &probe).await?,
        Commands::Best { mirrors, probe } => handle_best(&mirrors, &probe).await?,
        Commands::List { mirrors } => handle_list(&mirrors).await?,
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries results only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// --- Handlers ---

async fn load_mirrors(args: &MirrorArgs) -> Result<(String, Vec<Mirror>)> {
    let distribution = Distribution::parse(&args.distro);
    let source = sources::get_source(distribution, args.source, args.file.clone())?;

    let mut mirrors = source.mirrors().await?;
    if let Some(ref country) = args.country {
        mirrors = sources::filter_by_country(mirrors, country);
        info!(%country, count = mirrors.len(), "filtered mirrors by country");
    }

    if mirrors.is_empty() {
        bail!("No mirrors found for {}.", source.name());
    }

    Ok((source.name().to_string(), mirrors))
}

fn build_engine(args: &ProbeArgs) -> Result<RankingEngine<NetworkProber>> {
    let settings = Settings::load()?;
    let rounds = args.rounds.unwrap_or(settings.rounds);
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.timeout());

    let engine = RankingEngine::new(NetworkProber::new(timeout)?, rounds)?.with_progress(true);
    info!(rounds = engine.rounds(), ?timeout, "probe configuration");
    Ok(engine)
}

async fn handle_rank(mirrors: &MirrorArgs, probe: &ProbeArgs) -> Result<()> {
    let (distro, candidates) = load_mirrors(mirrors).await?;
    let engine = build_engine(probe)?;

    let mut ranking = engine.run(candidates).await?;
    ranking.sort();

    print_reports(&distro, ranking.rounds(), &ranking.reports(), probe.output)
}

async fn handle_best(mirrors: &MirrorArgs, probe: &ProbeArgs) -> Result<()> {
    let (distro, candidates) = load_mirrors(mirrors).await?;
    let engine = build_engine(probe)?;

    let ranking = engine.run(candidates).await?;

    match ranking.best() {
        Some(best) => print_reports(&distro, ranking.rounds(), &[best], probe.output),
        None => bail!(
            "No reachable mirror among {} candidates. Please check your network connection.",
            ranking.len()
        ),
    }
}

async fn handle_list(mirrors: &MirrorArgs) -> Result<()> {
    let (distro, candidates) = load_mirrors(mirrors).await?;

    println!("{} mirrors ({})", distro, candidates.len());
    println!("{:<6} {:<8} {:<24} URL", "PROTO", "COUNTRY", "ARCHITECTURES");
    println!("{}", "-".repeat(80));
    for m in &candidates {
        println!(
            "{:<6} {:<8} {:<24} {}",
            m.protocol(),
            m.country_code().unwrap_or("-"),
            m.architectures().unwrap_or("-"),
            m.url()
        );
    }
    Ok(())
}

fn print_reports(
    distro: &str,
    rounds: u32,
    reports: &[MirrorReport<'_>],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let doc = RankingDocument {
                distribution: distro,
                rounds,
                urls: reports,
            };
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Table => {
            println!();
            println!("{:<4} {:<12} {:<16} URL", "RANK", "AVG TIME", "COUNTRY");
            println!("{}", "-".repeat(80));

            for (i, report) in reports.iter().enumerate() {
                let stats = report.statistics;
                let latency_str = match (stats.avg_response, stats.reachable) {
                    (None, _) => "Unsupported".to_string(),
                    (Some(_), Some(false)) => "Timeout".to_string(),
                    (Some(avg), _) => format!("{}ms", avg.as_millis()),
                };

                println!(
                    "{:<4} {:<12} {:<16} {}",
                    i + 1,
                    latency_str,
                    report.mirror.country().unwrap_or("-"),
                    report.mirror.url()
                );
            }
        }
    }
    Ok(())
}
