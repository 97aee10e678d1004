mod config;

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{fmt, EnvFilter};

use avamon_core::{
    HttpPoller, MemoryStore, Monitor, MonitorConfig, MonitorError, Poller, RedisOptions,
    RedisStore, Scheduler, StaticTargets, Status, StatusStore, StatusType, Target, TargetStatus,
    WebhookConfig, WebhookDispatcher,
};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        // Called once, so the leak lives as long as the program.
        Box::leak(VERSION.to_string().into_boxed_str())
    } else {
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Avamon: HTTP availability monitor.
#[derive(Parser)]
#[command(name = "avamon", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe each URL once and print the result.
    Poll {
        /// URLs to probe. Bare hosts get an http:// prefix.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Timeout of a single attempt in milliseconds.
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,

        /// Extra attempts after a timeout.
        #[arg(long, default_value_t = 2)]
        retries: u32,
    },
    /// Poll URLs on a fixed interval and print every result.
    Schedule {
        urls: Vec<String>,

        /// Poll interval in milliseconds.
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,

        /// Maximum number of probes in flight.
        #[arg(long, default_value_t = 5)]
        parallel: usize,
    },
    /// Monitor targets and print status changes.
    Watch(WatchArgs),
    /// Inspect the Redis status store.
    Store {
        #[command(flatten)]
        redis: RedisArgs,

        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Args)]
struct WatchArgs {
    /// URLs to monitor, in addition to the targets of the config file.
    urls: Vec<String>,

    /// Path to TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Poll interval in milliseconds. Overrides config file.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Maximum number of probes in flight. Overrides config file.
    #[arg(long)]
    parallel: Option<usize>,

    /// Keep statuses in Redis (the config file's [redis] section, or
    /// localhost:6379) instead of memory.
    #[arg(long, default_value_t = false)]
    redis: bool,

    /// Also report targets that are healthy when first seen.
    #[arg(long, default_value_t = false)]
    notify_first_ok: bool,

    /// Optional webhook URL to POST status changes to.
    #[arg(long)]
    webhook_url: Option<String>,
}

#[derive(Args)]
struct RedisArgs {
    #[arg(long, default_value = "localhost", global = true)]
    host: String,

    #[arg(long, default_value_t = 6379, global = true)]
    port: u16,

    #[arg(long, global = true)]
    password: Option<String>,

    #[arg(long, default_value_t = 0, global = true)]
    db: i64,
}

impl RedisArgs {
    fn to_options(&self) -> RedisOptions {
        RedisOptions {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            db: self.db,
        }
    }
}

#[derive(Subcommand)]
enum StoreAction {
    /// Check that the server answers.
    Ping,
    /// Print every stored status.
    Scan,
    /// Print the stored status of a target, or N/A.
    Get { id: u64, title: String, url: String },
    /// Store a status for a target.
    Set {
        id: u64,
        title: String,
        url: String,
        /// Status type, matched by case-insensitive prefix (e.g. `ok`, `time`, `http`).
        status_type: String,
        /// Error message; empty for none.
        err: String,
        /// Response time in milliseconds.
        time_ms: u64,
        /// HTTP status code; 0 for none.
        http: u16,
        /// Time to live in milliseconds.
        ttl_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Poll {
            urls,
            timeout_ms,
            retries,
        } => {
            init_tracing("pretty", "warn");
            run_poll(urls, timeout_ms, retries).await;
        }
        Commands::Schedule {
            urls,
            interval_ms,
            parallel,
        } => {
            init_tracing("pretty", "warn");
            run_schedule(urls, interval_ms, parallel).await;
        }
        Commands::Watch(args) => {
            run_watch(args).await;
        }
        Commands::Store { redis, action } => {
            init_tracing("pretty", "warn");
            run_store(redis, action).await;
        }
    }
}

fn fatal(message: impl Display) -> ! {
    tracing::error!("{}", message);
    std::process::exit(1);
}

fn build_poller(config: &MonitorConfig) -> HttpPoller {
    HttpPoller::from_config(config)
        .unwrap_or_else(|e| fatal(format!("Failed to build HTTP client: {}", e)))
}

async fn run_poll(urls: Vec<String>, timeout_ms: u64, retries: u32) {
    let config = MonitorConfig::default()
        .with_request_timeout(timeout_ms)
        .with_timeout_retries(retries);
    let poller = build_poller(&config);

    let spinner_style = ProgressStyle::with_template("{spinner} {msg}").expect("valid template");

    for url in urls {
        let spinner = ProgressBar::new_spinner().with_style(spinner_style.clone());
        spinner.set_message(format!("Polling {}", style(&url).bold()));
        spinner.enable_steady_tick(Duration::from_millis(100));

        let status = poller.poll(&url).await;

        spinner.finish_and_clear();
        println!("{} {}", status_badge(&status), style(&url).bold());
        println!("{}", status.expanded());
    }
}

async fn run_schedule(urls: Vec<String>, interval_ms: u64, parallel: usize) {
    if urls.is_empty() {
        fatal("No URLs given");
    }

    let config = MonitorConfig::default()
        .with_poll_interval(interval_ms)
        .with_max_parallel(parallel);
    let poller = build_poller(&config);
    let scheduler = Scheduler::new(
        Arc::new(StaticTargets::from_urls(urls)),
        Arc::new(poller),
        &config,
    );

    let (statuses_tx, mut statuses_rx) = mpsc::channel(config.channel_capacity);
    let shutdown = shutdown_channel();
    let handle = tokio::spawn(async move { scheduler.run(statuses_tx, shutdown).await });

    while let Some(result) = statuses_rx.recv().await {
        println!(
            "{}  {} {}",
            style(timestamp()).dim(),
            status_badge(&result.status),
            result
        );
    }

    if let Err(e) = handle.await {
        tracing::warn!(error = %e, "Scheduler task failed");
    }
}

async fn run_watch(args: WatchArgs) {
    let app_config = match args.config {
        Some(ref path) => match config::AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.log.format, "info");
                tracing::info!(path = %path.display(), "Loaded config file");
                c
            }
            Err(e) => {
                init_tracing("pretty", "info");
                fatal(e);
            }
        },
        None => {
            init_tracing("pretty", "info");
            config::AppConfig::default()
        }
    };

    let mut config = app_config.monitor.to_monitor_config();
    if let Some(v) = args.interval_ms {
        config = config.with_poll_interval(v);
    }
    if let Some(v) = args.parallel {
        config = config.with_max_parallel(v);
    }
    if args.notify_first_ok {
        config = config.with_notify_first_ok(true);
    }
    if config.ttl_shorter_than_poll() {
        tracing::warn!(
            ttl_ms = config.status_ttl.as_millis() as u64,
            worst_case_poll_ms = config.worst_case_poll().as_millis() as u64,
            "Status TTL does not outlast a fully timed out poll, unchanged failures may be reported again"
        );
    }

    let targets = merge_targets(app_config.targets(), &args.urls);
    if targets.is_empty() {
        fatal("No targets given: pass URLs or a config file with [[target]] entries");
    }

    let store: Box<dyn StatusStore> = match redis_options(args.redis, app_config.redis.clone()) {
        Some(options) => {
            let mut store = RedisStore::connect(&options)
                .await
                .unwrap_or_else(|e| fatal(format!("Failed to connect to Redis: {}", e)));
            if let Err(e) = store.ping().await {
                fatal(format!("Redis did not answer PING: {}", e));
            }
            tracing::info!(host = %options.host, port = options.port, db = options.db, "Using Redis status store");
            Box::new(store)
        }
        None => Box::new(MemoryStore::new()),
    };

    let mut webhooks = app_config.webhook.clone();
    if let Some(ref url) = args.webhook_url {
        webhooks.push(WebhookConfig::new(url.clone()));
    }

    let (webhook_tx, webhook_handle) = if webhooks.is_empty() {
        (None, None)
    } else {
        let client = HttpPoller::build_client(config.request_timeout)
            .unwrap_or_else(|e| fatal(format!("Failed to build HTTP client: {}", e)));
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let dispatcher = WebhookDispatcher::new(rx, webhooks.clone(), client);
        let handle = tokio::spawn(dispatcher.run());
        tracing::info!(count = webhooks.len(), "Webhook dispatcher started");
        (Some(tx), Some(handle))
    };

    let poller = build_poller(&config);
    let target_count = targets.len();
    let scheduler = Scheduler::new(
        Arc::new(StaticTargets::new(targets)),
        Arc::new(poller),
        &config,
    );
    let (mut monitor, mut updates) = Monitor::new(scheduler, store, &config);
    let mut errors = monitor.errors();

    let multi = MultiProgress::new();
    let msg_style = ProgressStyle::with_template("{spinner} {wide_msg}").expect("valid template");

    multi
        .println(format!(
            "{} {}",
            style("avamon").bold(),
            style(env!("CARGO_PKG_VERSION")).dim()
        ))
        .ok();
    multi
        .println(format!("  {} {}", style("targets:").dim(), target_count))
        .ok();
    multi
        .println(format!(
            "  {} {}ms",
            style("poll:   ").dim(),
            config.poll_interval.as_millis()
        ))
        .ok();
    multi
        .println(format!(
            "  {} {}ms",
            style("ttl:    ").dim(),
            config.status_ttl.as_millis()
        ))
        .ok();
    for wh in &webhooks {
        multi
            .println(format!("  {} {}", style("webhook:").dim(), wh.url))
            .ok();
    }
    multi.println("").ok();
    multi
        .println(format!("{}", style("Press Ctrl+C to stop").dim()))
        .ok();
    multi.println("").ok();

    let status_bar = multi.add(ProgressBar::new_spinner().with_style(msg_style));
    status_bar.enable_steady_tick(Duration::from_millis(120));
    status_bar.set_message(format!("{}", style("Waiting for status changes...").dim()));

    let monitor_task = tokio::spawn(monitor.run(shutdown_channel()));

    let mut update_count = 0u64;
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => {
                    update_count += 1;
                    multi.println(format_update(&update)).ok();
                    status_bar.set_message(format!(
                        "{}",
                        style(format!("{} status changes so far", update_count)).dim()
                    ));
                    if let Some(ref tx) = webhook_tx {
                        let _ = tx.send(update).await;
                    }
                }
                None => break,
            },
            Some(error) = errors.recv() => {
                multi.println(format_error(&error)).ok();
            }
        }
    }

    status_bar.finish_and_clear();
    multi
        .println(format!("\n{}", style("Monitor stopped.").dim()))
        .ok();

    if let Err(e) = monitor_task.await {
        tracing::warn!(error = %e, "Monitor task failed");
    }

    drop(webhook_tx);
    if let Some(handle) = webhook_handle {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(_) => tracing::info!("Webhook dispatcher shut down"),
            Err(_) => tracing::warn!("Webhook dispatcher did not shut down in time, aborting"),
        }
    }
}

async fn run_store(redis: RedisArgs, action: StoreAction) {
    let mut store = RedisStore::connect(&redis.to_options())
        .await
        .unwrap_or_else(|e| fatal(format!("Failed to connect to Redis: {}", e)));

    match action {
        StoreAction::Ping => match store.ping().await {
            Ok(()) => println!("{}", style("PONG").green()),
            Err(e) => fatal(e),
        },
        StoreAction::Scan => match store.scan().await {
            Ok(results) if results.is_empty() => println!("{}", style("No statuses stored").dim()),
            Ok(results) => {
                for result in results {
                    println!("{} {}", status_badge(&result.status), style(&result.target).bold());
                    println!("{}", result.status.expanded());
                }
            }
            Err(e) => fatal(e),
        },
        StoreAction::Get { id, title, url } => {
            match store.get(&Target::new(id, title, url)).await {
                Ok(Some(status)) => println!("{}", status.expanded()),
                Ok(None) => println!("N/A"),
                Err(e) => fatal(e),
            }
        }
        StoreAction::Set {
            id,
            title,
            url,
            status_type,
            err,
            time_ms,
            http,
            ttl_ms,
        } => {
            let Some(status_type) = StatusType::parse_prefix(&status_type) else {
                fatal(format!("Unknown status type: {}", status_type));
            };
            let status = Status {
                status_type,
                error: (!err.is_empty()).then_some(err),
                response_time: Duration::from_millis(time_ms),
                http_status_code: (http != 0).then_some(http),
            };
            let target = Target::new(id, title, url);
            match store.set(&target, &status, Duration::from_millis(ttl_ms)).await {
                Ok(()) => println!("{}", style("OK").green()),
                Err(e) => fatal(e),
            }
        }
    }
}

/// Config targets first, then URLs from the command line numbered after
/// the highest config ID.
fn merge_targets(mut targets: Vec<Target>, urls: &[String]) -> Vec<Target> {
    let mut next_id = targets.iter().map(|t| t.id).max().unwrap_or(0) + 1;
    for url in urls {
        targets.push(Target::new(next_id, url.clone(), url.clone()));
        next_id += 1;
    }
    targets
}

fn redis_options(enabled: bool, configured: Option<RedisOptions>) -> Option<RedisOptions> {
    match configured {
        Some(options) => Some(options),
        None if enabled => Some(RedisOptions::default()),
        None => None,
    }
}

fn status_badge(status: &Status) -> console::StyledObject<&'static str> {
    if status.is_ok() {
        style("UP  ").green().bold()
    } else {
        style("DOWN").red().bold()
    }
}

fn format_update(update: &TargetStatus) -> String {
    let mut out = format!(
        "  {}  {} {} {}",
        style(timestamp()).dim(),
        status_badge(&update.status),
        style(&update.target.title).bold(),
        style(&update.target.url).dim()
    );
    for line in update.status.expanded().lines() {
        out.push_str("\n      ");
        out.push_str(line);
    }
    out
}

fn format_error(error: &MonitorError) -> String {
    format!(
        "  {}  {} {}",
        style(timestamp()).dim(),
        style("ERROR").red().bold(),
        error
    )
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// A watch channel that turns true on Ctrl+C or SIGTERM.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping...");
        let _ = tx.send(true);
    });
    rx
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing(log_format: &str, default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match log_format {
        "json" => {
            fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .init();
        }
    }
}
