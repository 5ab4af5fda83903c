//! `fare-scout`: command-line front end for the fare search engine
//!
//! ```bash
//! fare-scout search ICN NRT 20260120 --ret 20260125
//! fare-scout multi ICN NRT,KIX,FUK 20260120
//! fare-scout dates GMP CJU 20260301 --days 7 --return-offset 3
//! fare-scout alerts add ICN NRT 20260120 --target 300000
//! fare-scout alerts check
//! fare-scout manual ICN NRT 20260120 --ret 20260125
//! ```
//!
//! Progress goes to stderr, results to stdout.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fare_scout::codes::{AirlineCategory, airline_category};
use fare_scout::events::ProgressReporter;
use fare_scout::model::offset_date;
use fare_scout::monitor::{self, AlertCheckOutcome, SearchRecorder};
use fare_scout::{
    CabinClass, ChromiumLauncher, Config, DateOutcome, ErrorKind, FlightResult, FlightSearcher,
    ParallelSearcher, RouteKey, SearchEvent, SearchOutcome, SearchParams, Store, load_yaml_config,
    spawn_search,
};

#[derive(Parser)]
#[command(
    name = "fare-scout",
    about = "Find the cheapest flights on Interpark through a headless browser",
    version
)]
struct Cli {
    /// YAML config file; defaults to $FARE_SCOUT_CONFIG or ./config.yaml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[arg(long, global = true)]
    visible: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct TripArgs {
    /// Return date (YYYYMMDD); omit for one way
    #[arg(long)]
    ret: Option<String>,

    #[arg(long, default_value_t = 1)]
    adults: u32,

    /// ECONOMY, BUSINESS or FIRST
    #[arg(long, default_value = "ECONOMY")]
    cabin: String,

    #[arg(long, default_value_t = 1000)]
    max_results: usize,
}

impl TripArgs {
    fn params(&self, origin: &str, destination: &str, departure: &str) -> SearchParams {
        let params = SearchParams::new(origin, destination, departure)
            .with_adults(self.adults)
            .with_cabin(CabinClass::parse_lenient(&self.cabin))
            .with_max_results(self.max_results);
        match &self.ret {
            Some(ret) => params.with_return(ret),
            None => params,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Search one route
    Search {
        origin: String,
        destination: String,
        /// Departure date (YYYYMMDD)
        departure: String,

        #[command(flatten)]
        trip: TripArgs,

        /// Ignore cached results
        #[arg(long)]
        force: bool,

        /// Rows to print
        #[arg(long, default_value_t = 20)]
        top: usize,

        /// Only print carriers of one kind: lcc, fsc or other
        #[arg(long)]
        carrier: Option<String>,
    },

    /// Search several destinations in parallel
    Multi {
        origin: String,
        /// Comma separated destination codes
        #[arg(value_delimiter = ',')]
        destinations: Vec<String>,
        departure: String,

        #[command(flatten)]
        trip: TripArgs,
    },

    /// Cheapest fare for each day of a date range
    Dates {
        origin: String,
        destination: String,
        /// First departure date (YYYYMMDD)
        start: String,

        /// Number of consecutive departure dates
        #[arg(long, default_value_t = 7)]
        days: i64,

        /// Days between departure and return; 0 searches one way
        #[arg(long, default_value_t = 0)]
        return_offset: i64,

        #[arg(long, default_value_t = 1)]
        adults: u32,
    },

    /// Open a visible browser, search by hand, then read the fares off the page
    Manual {
        origin: String,
        destination: String,
        departure: String,

        #[command(flatten)]
        trip: TripArgs,

        #[arg(long, default_value_t = 20)]
        top: usize,
    },

    /// Manage price alerts
    #[command(subcommand)]
    Alerts(AlertCommands),

    /// Manage favorites
    #[command(subcommand)]
    Favorites(FavoriteCommands),

    /// Price history and trend of a route
    History {
        origin: String,
        destination: String,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Database statistics and popular routes
    Stats,

    /// Remove price history and search logs past retention
    Cleanup {
        /// Overrides database.retention_days
        #[arg(long)]
        days: Option<i64>,
    },

    /// Rebuild indices and compact the database
    Optimize,
}

#[derive(Subcommand)]
enum AlertCommands {
    Add {
        origin: String,
        destination: String,
        departure: String,
        #[arg(long)]
        ret: Option<String>,
        /// Notify at or below this price (KRW)
        #[arg(long)]
        target: i64,
    },
    List,
    /// Search every active alert now
    Check,
    Remove {
        id: i64,
    },
}

#[derive(Subcommand)]
enum FavoriteCommands {
    /// Save a fare from the last stored search of a route
    Add {
        origin: String,
        destination: String,
        departure: String,
        /// 1-based position in the stored results, cheapest first
        #[arg(long, default_value_t = 1)]
        rank: usize,
        #[arg(long, default_value = "")]
        note: String,
    },
    List,
    Remove {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fare_scout=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_yaml_config(cli.config.as_deref())?;
    if cli.visible {
        config.browser.headless = false;
    }

    match cli.command {
        Commands::Search {
            origin,
            destination,
            departure,
            trip,
            force,
            top,
            carrier,
        } => {
            let category = match carrier.as_deref() {
                Some(label) => match AirlineCategory::parse(label) {
                    Some(category) => Some(category),
                    None => bail!("Unknown carrier kind {label:?}; use lcc, fsc or other"),
                },
                None => None,
            };
            let params = trip.params(&origin, &destination, &departure);
            run_search(&config, params, force, top, category).await
        }
        Commands::Multi {
            origin,
            destinations,
            departure,
            trip,
        } => {
            let base = trip.params(&origin, "", &departure);
            run_multi(&config, base, destinations).await
        }
        Commands::Dates {
            origin,
            destination,
            start,
            days,
            return_offset,
            adults,
        } => {
            let base = SearchParams::new(&origin, &destination, &start).with_adults(adults);
            run_dates(&config, base, days, return_offset).await
        }
        Commands::Manual {
            origin,
            destination,
            departure,
            trip,
            top,
        } => {
            let params = trip.params(&origin, &destination, &departure);
            run_manual(&config, params, top).await
        }
        Commands::Alerts(cmd) => run_alerts(&config, cmd).await,
        Commands::Favorites(cmd) => run_favorites(&config, cmd).await,
        Commands::History {
            origin,
            destination,
            days,
        } => run_history(&config, &origin, &destination, days).await,
        Commands::Stats => run_stats(&config).await,
        Commands::Cleanup { days } => {
            let mut conn = open_store(&config).await?.connect().await?;
            let removed = conn
                .cleanup_old_data(days.unwrap_or(config.database.retention_days))
                .await?;
            conn.close().await;
            println!("Removed {removed} rows");
            Ok(())
        }
        Commands::Optimize => {
            let mut conn = open_store(&config).await?.connect().await?;
            conn.optimize().await?;
            conn.close().await;
            println!("Database optimized");
            Ok(())
        }
    }
}

fn build_searcher(config: &Config) -> Arc<FlightSearcher> {
    Arc::new(FlightSearcher::new(config, Arc::new(ChromiumLauncher::new())))
}

async fn open_store(config: &Config) -> Result<Store> {
    let path = config.database.resolved_path();
    Store::open(&path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))
}

/// Cancel `cancel` on Ctrl-C
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            cancel.cancel();
        }
    });
}

/// Report progress on stderr
fn stderr_progress(config: &Config) -> (Arc<ProgressReporter>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let SearchEvent::Progress(msg) = event {
                eprintln!("  {msg}");
            }
        }
    });
    let reporter = ProgressReporter::new(tx, config.scraper.progress_dedup_window());
    (Arc::new(reporter), printer)
}

async fn run_search(
    config: &Config,
    params: SearchParams,
    force: bool,
    top: usize,
    category: Option<AirlineCategory>,
) -> Result<()> {
    let store = open_store(config).await?;
    let recorder = SearchRecorder::new(store, &config.database);
    let (handle, mut events) = spawn_search(build_searcher(config), params, force, Some(recorder));

    let mut outcome = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SearchEvent::Progress(msg)) => eprintln!("  {msg}"),
                Some(terminal) => {
                    outcome = Some(terminal);
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling...");
                handle.cancel();
            }
        }
    }
    handle.join().await;

    match outcome {
        Some(SearchEvent::Success(results)) => {
            let shown: Vec<FlightResult> = match category {
                Some(category) => results
                    .into_iter()
                    .filter(|r| airline_category(&r.airline) == category)
                    .collect(),
                None => results,
            };
            print_results(&shown, top);
            Ok(())
        }
        Some(SearchEvent::Failure { kind, message }) => {
            if kind == ErrorKind::DataExtraction {
                eprintln!("Try `fare-scout manual` with the same route to search by hand.");
            }
            bail!("[{kind}] {message}")
        }
        Some(SearchEvent::Cancelled) => {
            eprintln!("Search cancelled");
            Ok(())
        }
        _ => bail!("Search ended without a result"),
    }
}

async fn run_manual(config: &Config, params: SearchParams, top: usize) -> Result<()> {
    let searcher = build_searcher(config);
    let mut session = searcher.start_manual_session(&params).await?;
    eprintln!("Browser opened. Finish the search in the window, then press Enter here.");

    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await;
    let extracted = match read {
        Ok(_) => session.extract().await.map_err(anyhow::Error::from),
        Err(e) => Err(anyhow::Error::from(e).context("Failed to read from stdin")),
    };
    session.close().await;

    let results = extracted?;
    if !results.is_empty() {
        let store = open_store(config).await?;
        let report = SearchRecorder::new(store, &config.database)
            .record(&params.normalize()?, &results)
            .await;
        tracing::debug!(?report, "Manual results recorded");
    }
    print_results(&results, top);
    Ok(())
}

async fn run_multi(config: &Config, base: SearchParams, destinations: Vec<String>) -> Result<()> {
    if destinations.is_empty() {
        bail!("No destinations given");
    }
    let store = open_store(config).await?;
    let parallel = ParallelSearcher::new(build_searcher(config), &config.parallel)
        .with_recorder(SearchRecorder::new(store, &config.database));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let (progress, printer) = stderr_progress(config);
    let outcomes = parallel
        .search_destinations(&base, &destinations, &cancel, &progress)
        .await;
    drop(progress);
    let _ = printer.await;

    for (dest, outcome) in outcomes {
        match outcome {
            Ok(SearchOutcome::Completed(results)) => match results.first() {
                Some(best) => println!(
                    "{}-{dest}  {:>10}  {} ({} fares)",
                    base.origin,
                    best.price,
                    best.airline,
                    results.len()
                ),
                None => println!("{}-{dest}  no fares", base.origin),
            },
            Ok(SearchOutcome::Cancelled) => println!("{}-{dest}  cancelled", base.origin),
            Err(e) => println!("{}-{dest}  failed: {e}", base.origin),
        }
    }
    Ok(())
}

async fn run_dates(config: &Config, base: SearchParams, days: i64, return_offset: i64) -> Result<()> {
    let start = base.normalize()?.departure_date;
    let dates: Vec<String> = (0..days.max(1))
        .filter_map(|offset| offset_date(&start, offset))
        .collect();

    let store = open_store(config).await?;
    let parallel = ParallelSearcher::new(build_searcher(config), &config.parallel)
        .with_recorder(SearchRecorder::new(store, &config.database));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let (progress, printer) = stderr_progress(config);
    let outcomes = parallel
        .search_date_range(&base, &dates, return_offset, &cancel, &progress)
        .await;
    drop(progress);
    let _ = printer.await;

    let cheapest = outcomes.values().filter_map(DateOutcome::price).min();
    for (date, outcome) in &outcomes {
        let line = match outcome {
            DateOutcome::Found(found) => {
                let marker = if Some(found.min_price) == cheapest { "  *" } else { "" };
                format!("{:>10}  {}{marker}", found.min_price, found.airline)
            }
            DateOutcome::Empty => "no fares".into(),
            DateOutcome::ManualRequired => "needs manual search".into(),
            DateOutcome::Failed(msg) => format!("failed: {msg}"),
            DateOutcome::Cancelled => "cancelled".into(),
        };
        println!("{date}  {line}");
    }
    Ok(())
}

async fn run_alerts(config: &Config, cmd: AlertCommands) -> Result<()> {
    let store = open_store(config).await?;
    let mut conn = store.connect().await?;

    match cmd {
        AlertCommands::Add {
            origin,
            destination,
            departure,
            ret,
            target,
        } => {
            let mut params = SearchParams::new(&origin, &destination, &departure);
            if let Some(ret) = ret {
                params = params.with_return(ret);
            }
            let params = params.normalize()?;
            let id = conn
                .add_price_alert(&params.route_key(), params.return_date.as_deref(), target)
                .await?;
            println!("Alert #{id} added for {}", params.route_key());
        }
        AlertCommands::List => {
            for alert in conn.get_all_alerts().await? {
                println!(
                    "#{:<4} {}  ret {:<8}  target {:>10}  last {:>10}  {:?}",
                    alert.id,
                    alert.route_key(),
                    alert.return_date.as_deref().unwrap_or("-"),
                    alert.target_price,
                    alert
                        .last_price
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".into()),
                    alert.state()
                );
            }
        }
        AlertCommands::Check => {
            let searcher = build_searcher(config);
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let (progress, printer) = stderr_progress(config);
            let checks = monitor::check_alerts(&mut conn, &searcher, &cancel, &progress).await?;
            drop(progress);
            let _ = printer.await;

            for check in checks {
                let status = match check.outcome {
                    AlertCheckOutcome::Triggered { price } => format!("TRIGGERED at {price}"),
                    AlertCheckOutcome::Watching { price } => format!("cheapest {price}"),
                    AlertCheckOutcome::NoFares => "no fares".into(),
                    AlertCheckOutcome::Failed { kind, message } => format!("[{kind}] {message}"),
                };
                println!(
                    "#{:<4} {} target {:>10}  {status}",
                    check.alert.id,
                    check.alert.route_key(),
                    check.alert.target_price
                );
            }
        }
        AlertCommands::Remove { id } => {
            if !conn.delete_alert(id).await? {
                bail!("No alert #{id}");
            }
            println!("Alert #{id} removed");
        }
    }

    conn.close().await;
    Ok(())
}

async fn run_favorites(config: &Config, cmd: FavoriteCommands) -> Result<()> {
    let mut conn = open_store(config).await?.connect().await?;
    match cmd {
        FavoriteCommands::Add {
            origin,
            destination,
            departure,
            rank,
            note,
        } => {
            let route = SearchParams::new(&origin, &destination, &departure)
                .normalize()?
                .route_key();
            let Some(last) = conn.get_last_search(&route).await? else {
                bail!("No stored search for {route}; run `fare-scout search` first");
            };
            let Some(flight) = last.results.get(rank.saturating_sub(1)) else {
                bail!("{route} has {} stored fares", last.results.len());
            };
            let id = conn
                .add_favorite(flight, &last.search_params(), &note)
                .await?;
            println!("Favorite #{id}: {} {} {}", flight.airline, flight.price, route);
        }
        FavoriteCommands::List => {
            for fav in conn.list_favorites().await? {
                println!(
                    "#{:<4} {}  {:>10}  {} {}-{}  {}",
                    fav.id,
                    RouteKey::new(&fav.origin, &fav.destination, &fav.departure_date),
                    fav.price,
                    fav.airline,
                    fav.departure_time,
                    fav.arrival_time,
                    fav.note
                );
            }
        }
        FavoriteCommands::Remove { id } => {
            if !conn.remove_favorite(id).await? {
                bail!("No favorite #{id}");
            }
            println!("Favorite #{id} removed");
        }
    }
    conn.close().await;
    Ok(())
}

async fn run_history(config: &Config, origin: &str, destination: &str, days: i64) -> Result<()> {
    let origin = origin.to_ascii_uppercase();
    let destination = destination.to_ascii_uppercase();
    let mut conn = open_store(config).await?.connect().await?;

    for point in conn.get_price_history(&origin, &destination, days).await? {
        println!(
            "{}  {}  {:>10}  {}",
            point.recorded_at,
            point.departure_date,
            point.price,
            point.airline.as_deref().unwrap_or("-")
        );
    }
    let trend = conn.get_price_trend(&origin, &destination).await?;
    println!(
        "trend {}  change {}  min {}  max {}  avg {}  current {}",
        trend.trend.as_str(),
        trend.change,
        trend.min,
        trend.max,
        trend.avg,
        trend.current
    );
    conn.close().await;
    Ok(())
}

async fn run_stats(config: &Config) -> Result<()> {
    let mut conn = open_store(config).await?.connect().await?;
    let stats = conn.get_stats().await?;
    println!(
        "favorites {}  price history {}  search logs {}  alerts {}  snapshots {}",
        stats.favorites, stats.price_history, stats.search_logs, stats.price_alerts, stats.snapshots
    );

    let popular = conn.get_popular_routes(10).await?;
    if !popular.is_empty() {
        println!("\nPopular routes:");
        for route in popular {
            println!(
                "  {}-{}  {} searches  avg {}",
                route.origin,
                route.destination,
                route.count,
                route
                    .avg_price
                    .map(|p| format!("{p:.0}"))
                    .unwrap_or_else(|| "-".into())
            );
        }
    }

    if let Some(last) = conn.latest_last_search().await? {
        println!(
            "\nLast search: {} ({:.1}h ago, {} fares)",
            last.route, last.hours_ago, last.result_count
        );
    }
    conn.close().await;
    Ok(())
}

fn print_results(results: &[FlightResult], top: usize) {
    if results.is_empty() {
        println!("No fares found");
        return;
    }
    for (i, r) in results.iter().take(top.max(1)).enumerate() {
        let mut line = format!(
            "{:>3}. {:>10} {}  {:<14} {:<5} {}-{} stops {}",
            i + 1,
            r.price,
            r.currency,
            r.airline,
            airline_category(&r.airline).as_str(),
            r.departure_time,
            r.arrival_time,
            r.stops
        );
        if r.is_round_trip {
            let carrier = if r.return_airline.is_empty() {
                String::new()
            } else {
                format!(" {}", r.return_airline)
            };
            line.push_str(&format!(
                "  | return{carrier} {}-{} stops {}",
                r.return_departure_time, r.return_arrival_time, r.return_stops
            ));
        }
        println!("{line}");
    }
    if results.len() > top {
        println!("... {} more", results.len() - top);
    }
}
