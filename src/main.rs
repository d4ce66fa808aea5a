use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::{Days, Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use log::{error, info};

use showtime_scrape::config::{CONFIG_ENV, Config};
use showtime_scrape::lock::{self, RunLock};
use showtime_scrape::publish::{PublishReport, Publisher, RenderOptions};
use showtime_scrape::{ScrapeCycle, ShowFilter, Store};

#[derive(Parser)]
#[command(name = "showtime-scrape")]
#[command(about = "Scrape theater showtimes into SQLite and publish them as a static site")]
#[command(version)]
struct Cli {
    /// Config file (TOML). Falls back to $SHOWTIME_CONFIG, then built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scrape cycle
    Scrape,
    /// Render the site from what is stored
    Publish(PublishArgs),
    /// Scrape, then publish
    Run(PublishArgs),
    /// Write every stored showing to a CSV file
    Export {
        path: PathBuf,
    },
    /// Print stored showings
    List {
        /// Only venues containing this text
        #[arg(long)]
        venue: Option<String>,
        /// Only titles containing this text
        #[arg(long)]
        title: Option<String>,
        /// Only this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Delete showings scheduled more than N days ago
    Prune {
        #[arg(long)]
        older_than_days: u64,
    },
}

#[derive(clap::Args)]
struct PublishArgs {
    /// Only this day (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Group by film instead of by day
    #[arg(long)]
    group_by_title: bool,
    /// Replace outputs without keeping a timestamped copy
    #[arg(long)]
    no_backup: bool,
    /// HTML output path
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn load_config(flag: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = flag.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    if let Some(path) = &path {
        info!("Using config {}", path.display());
    }
    Config::load(path.as_deref()).context("loading configuration")
}

/// Take the run lock, or `None` if another run holds it.
fn run_lock(config: &Config) -> anyhow::Result<Option<RunLock>> {
    let lock = RunLock::acquire(&config.lock.path).context("acquiring run lock")?;
    if lock.is_none() {
        info!("Another run is in progress; skipping this one");
    }
    Ok(lock)
}

async fn scrape(config: &Config, store: &mut Store) -> anyhow::Result<()> {
    lock::reap_stray_browser(&config.fetch.browser_pid_file);
    let cycle = ScrapeCycle::from_config(config).context("building scraper")?;
    let report = cycle.run(store).await.context("scrape cycle failed")?;
    info!(
        "Scraped {} films: {} new showings, {} already stored",
        report.films, report.inserted, report.skipped
    );
    Ok(())
}

fn publish(config: &Config, store: &Store, args: PublishArgs) -> anyhow::Result<PublishReport> {
    let mut publish_config = config.publish.clone();
    if let Some(output) = args.output {
        publish_config.html_output = output;
    }
    if args.no_backup {
        publish_config.backup_existing = false;
    }
    if args.group_by_title {
        publish_config.group_by_title = true;
    }

    let mut options = RenderOptions::now(&publish_config);
    options.target_date = args.date;

    let publisher = Publisher::new(publish_config);
    let report = publisher
        .publish(store, &options)
        .context("publishing site")?;
    info!(
        "Published {} showings to {}",
        report.showings,
        report.html.display()
    );
    Ok(report)
}

fn list(store: &Store, filter: &ShowFilter) -> anyhow::Result<()> {
    let rows = store.query(filter).context("querying showings")?;
    for row in &rows {
        let show = &row.showing;
        println!(
            "{}  {:<40}  {}",
            show.scheduled_at.format("%Y-%m-%d %H:%M"),
            show.title,
            show.venue
        );
    }
    println!("{} showings", rows.len());
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config)?;
    let mut store = Store::open(&config.store).context("opening database")?;

    match cli.command {
        Commands::Scrape => {
            let Some(_lock) = run_lock(&config)? else {
                return Ok(());
            };
            scrape(&config, &mut store).await?;
        }
        Commands::Publish(args) => {
            let Some(_lock) = run_lock(&config)? else {
                return Ok(());
            };
            publish(&config, &store, args)?;
        }
        Commands::Run(args) => {
            let Some(_lock) = run_lock(&config)? else {
                return Ok(());
            };
            scrape(&config, &mut store).await?;
            publish(&config, &store, args)?;
        }
        Commands::Export { path } => {
            let count = store
                .export_csv(&path)
                .with_context(|| format!("exporting to {}", path.display()))?;
            println!("Exported {count} showings to {}", path.display());
        }
        Commands::List { venue, title, date } => {
            let mut filter = match date {
                Some(day) => ShowFilter::on_date(day),
                None => ShowFilter::default(),
            };
            filter.venue = venue;
            filter.title = title;
            list(&store, &filter)?;
        }
        Commands::Prune { older_than_days } => {
            let Some(_lock) = run_lock(&config)? else {
                return Ok(());
            };
            let cutoff = Local::now()
                .date_naive()
                .checked_sub_days(Days::new(older_than_days))
                .context("--older-than-days is too large")?
                .and_time(NaiveTime::MIN);
            let deleted = store.prune(cutoff).context("pruning showings")?;
            println!("Deleted {deleted} showings scheduled before {cutoff}");
        }
    }

    store.close().context("closing database")?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
