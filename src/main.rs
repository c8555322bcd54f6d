use anyhow::{bail, Context, Result};
use aod_max::config::{ClipSource, Config};
use aod_max::depot::{self, Depot, TimeFilter};
use aod_max::external::ToolRunner;
use aod_max::mosaic::MosaicBuilder;
use aod_max::region::RegionClipper;
use aod_max::render::ImageRenderer;
use aod_max::sink::{GdalSink, GdalSource};
use aod_max::{Orchestrator, Tier};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use regex::Regex;
use std::path::PathBuf;

/// Temporal maximum composites of aerosol optical depth rasters.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON configuration file. Missing fields take their defaults.
    #[arg(long, short, env = "AOD_MAX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build day, month and year maxima.
    Aggregate {
        /// Tier to run; repeat for several. Defaults to the configured tiers.
        #[arg(long = "tier", value_parser = parse_tier)]
        tiers: Vec<Tier>,
        /// Year to process; repeat for several. Defaults to the configured years.
        #[arg(long = "year")]
        years: Vec<i32>,
        /// Worker threads for bucket aggregation.
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Reproject and clip sensor scenes to the study region.
    Clip {
        #[arg(long, value_parser = parse_source)]
        source: Option<ClipSource>,
        #[arg(long = "year")]
        years: Vec<i32>,
    },
    /// Build monthly mosaics.
    Mosaic {
        #[arg(long = "year")]
        years: Vec<i32>,
    },
    /// Look up or extract archives in the depot.
    Depot {
        #[command(subcommand)]
        action: DepotAction,
    },
}

#[derive(Subcommand, Debug)]
enum DepotAction {
    /// Print archives matching the dates and times.
    List {
        #[command(flatten)]
        query: DepotQuery,
    },
    /// Extract product files from matching archives.
    Extract {
        #[command(flatten)]
        query: DepotQuery,
        /// Regular expression for member names; repeat for several.
        #[arg(long = "product")]
        products: Vec<String>,
        #[arg(long)]
        dest: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct DepotQuery {
    /// YYYYMMDD or YYYYJJJ; repeat for several.
    #[arg(long = "date")]
    dates: Vec<String>,
    /// First day of a range, YYYYMMDD or YYYYJJJ.
    #[arg(long, requires = "to")]
    from: Option<String>,
    /// Day after the last day of the range.
    #[arg(long, requires = "from")]
    to: Option<String>,
    /// HH:MM, HHMM or HH:MM-HH:MM; repeat for several.
    #[arg(long = "time")]
    times: Vec<String>,
}

fn parse_tier(s: &str) -> Result<Tier, String> {
    match s {
        "day" => Ok(Tier::Day),
        "month" => Ok(Tier::Month),
        "year" => Ok(Tier::Year),
        _ => Err(format!("unknown tier `{}` (day, month, year)", s)),
    }
}

fn parse_source(s: &str) -> Result<ClipSource, String> {
    match s {
        "netcdf" => Ok(ClipSource::Netcdf),
        "geotiff" => Ok(ClipSource::Geotiff),
        _ => Err(format!("unknown source `{}` (netcdf, geotiff)", s)),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default))
        .format_timestamp_secs()
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn pick_years(requested: Vec<i32>, configured: &[i32]) -> Vec<i32> {
    if requested.is_empty() {
        configured.to_vec()
    } else {
        requested
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut config = load_config(cli.config.as_ref())?;
    let runner = ToolRunner::from_secs(config.tool_timeout_secs);

    match cli.command {
        Command::Aggregate {
            tiers,
            years,
            threads,
        } => {
            if !tiers.is_empty() {
                config.tiers = tiers;
            }
            config.years = pick_years(years, &config.years);
            if threads.is_some() {
                config.threads = threads;
            }
            config.validate()?;

            let summary = tokio::task::spawn_blocking(move || -> Result<_> {
                let threads = config.get_thread_count();
                log::info!("Aggregating with {} threads", threads);
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()?;

                let source = GdalSource;
                let sink = GdalSink::new(ImageRenderer::new(
                    config.image_scale,
                    config.font_path.as_deref(),
                ));
                Ok(Orchestrator::new(&config, &source, &sink).run())
            })
            .await??;

            summary.log();
            if summary.has_failures() {
                bail!(
                    "{} tier/year/bucket combinations failed",
                    summary.failed_combinations().len()
                );
            }
        }
        Command::Clip { source, years } => {
            if let Some(source) = source {
                config.region.source = source;
            }
            let years = pick_years(years, &config.years);
            let report = RegionClipper::new(&config, runner).run(&years).await?;
            report.log("clip");
            if report.has_failures() {
                bail!("{} scenes failed to clip", report.failures.len());
            }
        }
        Command::Mosaic { years } => {
            let years = pick_years(years, &config.mosaic.years);
            let report = MosaicBuilder::new(&config, runner).run(&years).await?;
            report.log("mosaic");
            if report.has_failures() {
                bail!("{} mosaics failed", report.failures.len());
            }
        }
        Command::Depot { action } => {
            let depot = Depot::from_config(&config.depot)?;
            match action {
                DepotAction::List { query } => {
                    for path in find_archives(&depot, &query)? {
                        println!("{}", path.display());
                    }
                }
                DepotAction::Extract {
                    query,
                    products,
                    dest,
                } => {
                    let products = if products.is_empty() {
                        config.depot.products.clone()
                    } else {
                        products
                    };
                    let patterns = products
                        .iter()
                        .map(|p| Regex::new(p))
                        .collect::<Result<Vec<_>, _>>()?;
                    let dest = dest.unwrap_or_else(|| config.depot.dest_dir.clone());

                    let mut failed = 0;
                    for archive in find_archives(&depot, &query)? {
                        if let Err(e) =
                            depot::extract_products(&runner, &archive, &patterns, &dest).await
                        {
                            log::error!("{}: {}", archive.display(), e);
                            failed += 1;
                        }
                    }
                    if failed > 0 {
                        bail!("{} archives could not be extracted", failed);
                    }
                }
            }
        }
    }
    Ok(())
}

fn find_archives(depot: &Depot, query: &DepotQuery) -> Result<Vec<PathBuf>> {
    let mut dates = query
        .dates
        .iter()
        .map(|d| depot::parse_date(d))
        .collect::<Result<Vec<_>, _>>()?;
    if let (Some(from), Some(to)) = (&query.from, &query.to) {
        dates.extend(depot::date_range(
            depot::parse_date(from)?,
            depot::parse_date(to)?,
        ));
    }
    if dates.is_empty() {
        bail!("no dates given; use --date or --from/--to");
    }
    let filters = query
        .times
        .iter()
        .map(|t| TimeFilter::parse(t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(depot.find(&dates, &filters))
}
