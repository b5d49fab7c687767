//! bwmon - Interface Bandwidth Monitor
//!
//! Entry point for the bwmon command line tool.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use futures::StreamExt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sonic_bwmon::output::{write_interface_table, write_measurement, write_oid_dump};
use sonic_bwmon::snmp::parse_oid;
use sonic_bwmon::{
    monitor_bandwidth_with, parse_interval, BwmonConfig, BwmonError, OutputFormat, SnmpDevice,
    SnmpTransport,
};

/// Monitor rx/tx bandwidth of a network interface over SNMP
#[derive(Parser, Debug)]
#[command(name = "bwmon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SNMP agent host [default: 127.0.0.7]
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// SNMPv2c community [default: public]
    #[arg(short = 'c', long)]
    community: Option<String>,

    /// Sample interval, e.g. 1s, 500ms, 2m [default: 1s]
    #[arg(short = 's', long, value_parser = parse_interval)]
    sample_interval: Option<Duration>,

    /// Interface name to monitor
    #[arg(short = 'i', long, default_value = "ether1")]
    interface: String,

    /// List the device's interfaces and exit
    #[arg(long)]
    list: bool,

    /// Stop after this many samples (one extra tick takes the baseline)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    count: Option<u64>,

    /// Print the value of an OID and exit
    #[arg(long, value_name = "OID")]
    dump_oid: Option<String>,

    /// With --dump-oid, walk the subtree instead of a single get
    #[arg(long, requires = "dump_oid")]
    walk: bool,

    /// Output format [default: text]
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    /// Command line values win over the configuration file
    fn apply(&self, config: &mut BwmonConfig) {
        if let Some(host) = &self.host {
            config.device.host = host.clone();
        }
        if let Some(community) = &self.community {
            config.device.community = community.clone();
        }
        if let Some(interval) = self.sample_interval {
            config.monitor.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
    }

    /// Ticks to run for `--count` samples
    fn max_ticks(&self) -> Option<u64> {
        self.count.map(|count| count.saturating_add(1))
    }
}

/// Initializes tracing/logging subsystem
///
/// Logs go to stderr; stdout carries only measurements.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("bwmon: failed to set tracing subscriber: {}", e);
    }
}

async fn dump_oid(device: &SnmpDevice, oid: &str, walk: bool) -> anyhow::Result<()> {
    let oid = parse_oid(oid)?;
    let rows = if walk {
        device.transport().walk(&oid).await.context("Walk failed")?
    } else {
        let value = device.transport().get(&oid).await.context("Get failed")?;
        vec![(oid, value)]
    };
    let mut out = std::io::stdout().lock();
    write_oid_dump(&mut out, &rows)?;
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => BwmonConfig::load_or_default(path)?,
        None => BwmonConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let device = Arc::new(SnmpDevice::connect(&config.device));
    if let Some(oid) = &args.dump_oid {
        return dump_oid(&device, oid, args.walk).await;
    }

    let banner = device
        .system_banner()
        .await
        .with_context(|| format!("Failed to reach {}:{}", config.device.host, config.device.port))?;
    info!("Connected to {}", banner);

    if args.list {
        let interfaces = device.interfaces().await.context("Failed to list interfaces")?;
        let mut out = std::io::stdout().lock();
        write_interface_table(&mut out, &interfaces)?;
        out.flush()?;
        return Ok(());
    }

    let interface = match device.find_interface(&args.interface).await {
        Ok(interface) => interface,
        Err(e @ BwmonError::InterfaceNotFound(_)) => return Err(anyhow!("{} (maybe try --list)", e)),
        Err(e) => return Err(e).context("Failed to look up interface"),
    };
    info!("Monitoring {} (index {})", interface, interface.index);

    let mut monitor_config = config.monitor_config();
    monitor_config.max_ticks = args.max_ticks();
    let format = config.output.format;
    let mut stream = monitor_bandwidth_with(device, interface.clone(), monitor_config)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, stopping");
                break;
            }
            next = stream.next() => match next {
                Some(measurement) => {
                    let mut out = std::io::stdout().lock();
                    write_measurement(&mut out, format, &interface, &measurement)?;
                }
                None => break,
            },
        }
    }

    let stats = stream.shutdown().await;
    info!(
        ticks = stats.ticks,
        measurements = stats.measurements,
        failed_polls = stats.failed_polls,
        coalesced_rx = stats.coalesced_rx,
        coalesced_tx = stats.coalesced_tx,
        "Monitoring stopped"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("--- Starting bwmon ---");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("bwmon failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
