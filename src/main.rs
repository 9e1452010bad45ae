use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;

use wsjt2hamclock_lib::config::{Config, DEFAULT_CONFIG_FILE};
use wsjt2hamclock_lib::display::{DisplayRow, MonitorEvent, RowHistory, COLUMNS};
use wsjt2hamclock_lib::hamclock::HamclockClient;
use wsjt2hamclock_lib::monitor::Monitor;
use wsjt2hamclock_lib::qrz::QrzClient;

const PKG_DESCRIPTION: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " - point HamClock at the station WSJT-X is working"
);

#[derive(Debug, Parser)]
#[command(version = env!("CARGO_PKG_VERSION"), about = PKG_DESCRIPTION)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Print the effective configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Write the effective configuration back to the config file and exit
    #[arg(long = "save-config")]
    save_config: bool,
    /// Print rows as JSON lines instead of a table
    #[arg(long)]
    json: bool,
    /// Multicast group override
    #[arg(short = 'g', long)]
    group: Option<Ipv4Addr>,
    /// UDP port override
    #[arg(short = 'p', long)]
    port: Option<u16>,
}

fn print_row(row: &DisplayRow, json: bool) {
    if json {
        match serde_json::to_string(row) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to serialize row: {}", e),
        }
        return;
    }

    let cols = row.columns();
    println!(
        "{:<8}  {:<12}  {:<10}  {:<6}  {:<24}  {:<20}  {}",
        cols[0], cols[1], cols[2], cols[3], cols[4], cols[5], cols[6]
    );
    if let Some(error) = &row.error {
        println!("          {}", error);
    }
}

fn print_header() {
    println!(
        "{:<8}  {:<12}  {:<10}  {:<6}  {:<24}  {:<20}  {}",
        COLUMNS[0], COLUMNS[1], COLUMNS[2], COLUMNS[3], COLUMNS[4], COLUMNS[5], COLUMNS[6]
    );
}

/// Returns true once the worker has gone away. A fatal worker error is kept
/// in `failure` so the process can exit non-zero.
fn handle_event(
    event: MonitorEvent,
    history: &mut RowHistory,
    failure: &mut Option<String>,
    json: bool,
) -> bool {
    match event {
        MonitorEvent::Connected { group, port } => {
            log::info!("Listening for WSJT-X on {}:{}", group, port);
            if !json {
                print_header();
            }
        }
        MonitorEvent::Row(row) => {
            print_row(&row, json);
            history.push(row);
        }
        MonitorEvent::Error(e) => {
            log::error!("Monitor error: {}", e);
            *failure = Some(e);
        }
        MonitorEvent::Disconnected => {
            log::info!("Monitor disconnected after {} rows", history.len());
            return true;
        }
    }
    false
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("wsjt2hamclock=info,wsjt2hamclock_lib=info"),
    )
    .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(group) = cli.group {
        config.multicast_group = group.to_string();
    }
    if let Some(port) = cli.port {
        config.multicast_port = port;
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    if cli.save_config {
        config.save(&cli.config)?;
        return Ok(());
    }

    if config.qrz_username.is_empty() {
        log::warn!("No QRZ username configured; lookups will fail");
    }

    // Blocking HTTP clients are built here, outside the async runtime
    let qrz = QrzClient::from_config(&config)?;
    let hamclock = HamclockClient::from_config(&config)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<MonitorEvent>();
    let mut monitor = Monitor::new(config);
    monitor.start(qrz, hamclock, tx)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let json = cli.json;
    let mut history = RowHistory::default();
    let mut failure = None;
    runtime.block_on(async {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if handle_event(event, &mut history, &mut failure, json) {
                            return;
                        }
                    }
                    None => return,
                },
                _ = signal::ctrl_c() => {
                    log::info!("Ctrl+C received, shutting down");
                    monitor.stop();
                    break;
                }
            }
        }

        // Drain whatever the worker delivers before it exits
        while let Some(event) = rx.recv().await {
            if handle_event(event, &mut history, &mut failure, json) {
                break;
            }
        }
    });

    monitor.join();

    if let Some(e) = failure {
        return Err(format!("monitor stopped: {}", e).into());
    }
    Ok(())
}
