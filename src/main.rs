use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskhub::{
    config::Config,
    database::Database,
    scheduler::{CronDriver, ScheduleTable, Scheduler, SchedulerSettings},
    tasks::{builtin::builtin_registry, run_direct},
    utils::{format_duration, relay_shutdown},
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "taskhub")]
#[command(version)]
#[command(about = "Background task scheduler with an admin API")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, cron driver and web server
    Serve {
        /// Listening IP address
        #[arg(short = 'H', long, value_name = "IP")]
        host: Option<String>,

        /// Listening port
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,

        /// Database URL (overrides config file)
        #[arg(short = 'd', long, value_name = "URL")]
        database_url: Option<String>,
    },
    /// Run a single task in the foreground and print its result
    Run {
        /// Registered task name
        task: String,

        /// Database URL (overrides config file)
        #[arg(short = 'd', long, value_name = "URL")]
        database_url: Option<String>,
    },
    /// List registered tasks
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = if cli.log_level == "trace" {
        format!("taskhub={},tower_http=trace", cli.log_level)
    } else {
        format!("taskhub={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration from {}: {:#}", cli.config, e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Command::Serve {
            host,
            port,
            database_url,
        } => serve(config, host, port, database_url).await,
        Command::Run { task, database_url } => run_once(config, &task, database_url).await,
        Command::List => list(&config),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    database_url: Option<String>,
) -> Result<()> {
    info!("Starting TaskHub v{}", env!("CARGO_PKG_VERSION"));

    // Override config with CLI arguments
    if let Some(host) = host {
        config.web.host = host;
    }
    if let Some(port) = port {
        config.web.port = port;
    }
    if let Some(database_url) = database_url {
        config.database.url = database_url;
    }

    let registry = builtin_registry(&config.tasks)?;
    let schedules = Arc::new(ScheduleTable::from_config(&registry, &config.schedules)?);

    info!("Using database: {}", config.database.url);
    let database = Database::new(&config.database).await?;
    info!("Database connection established");

    let scheduler = Scheduler::new(registry, SchedulerSettings::from(&config.scheduler));
    scheduler.initialize(database)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let driver = CronDriver::new(scheduler.clone(), Arc::clone(&schedules));
    let driver_task = tokio::spawn(driver.run(shutdown_rx.clone()));

    let web_server = WebServer::new(&config.web, AppState::new(scheduler, schedules))?;
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );

    let mut server_shutdown = shutdown_rx;
    let server = web_server.serve(async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    });

    tokio::spawn(relay_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    server.await?;
    if let Err(e) = driver_task.await {
        error!("Cron driver stopped abnormally: {}", e);
    }

    info!("TaskHub stopped");
    Ok(())
}

async fn run_once(mut config: Config, task: &str, database_url: Option<String>) -> Result<()> {
    if let Some(database_url) = database_url {
        config.database.url = database_url;
    }

    let registry = builtin_registry(&config.tasks)?;
    // Resolve the name before touching the database.
    registry.get(task)?;

    let database = Database::new(&config.database).await?;
    let value = run_direct(&registry, task, database).await?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let registry = builtin_registry(&config.tasks)?;
    let schedules = ScheduleTable::from_config(&registry, &config.schedules)?;

    for task in registry.iter() {
        let schedule = schedules.expression(task.name()).unwrap_or("-");
        let marker = if task.is_synthetic() { " (synthetic)" } else { "" };
        println!(
            "{:<20} {:<10} {:<16} {}{}",
            task.name(),
            format_duration(task.timeout()),
            schedule,
            task.display_name(),
            marker
        );
    }
    Ok(())
}
