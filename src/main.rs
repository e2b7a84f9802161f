use clap::{Parser, Subcommand};
use ctrack::capture::{ipv4_packet, AfPacketTap, PacketSource};
use ctrack::config::{self, Config};
use ctrack::conntrack::{Timestamp, Verdict};
use ctrack::dataplane::Gateway;
use ctrack::protocol::ethernet;
use ctrack::telemetry::init_logging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, trace, warn};

/// Interval between metric dumps
const STATS_INTERVAL_SECS: u64 = 10;

/// Receive buffer size: a maximum-length IPv4 packet behind a VLAN-tagged
/// Ethernet header. Offloaded super-frames beyond that are reported as
/// truncated.
const RX_BUF_SIZE: usize = u16::MAX as usize + ethernet::HEADER_SIZE + 4;

#[derive(Parser)]
#[command(name = "ctrack")]
#[command(about = "Passive TCP, UDP and ICMP connection tracker for IPv4 interfaces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Run the tracker on the configured interfaces
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Put the interfaces into promiscuous mode
        #[arg(long)]
        promisc: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Run { config, promisc } => cmd_run(&config, promisc),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn load_valid(config_path: &Path) -> Result<Config, String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }
    Ok(cfg)
}

fn cmd_validate(config_path: &Path) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());
    load_valid(config_path)?;
    println!("[INFO] Configuration is valid");
    Ok(())
}

fn cmd_run(config_path: &Path, promisc: bool) -> Result<(), String> {
    let cfg = load_valid(config_path)?;
    init_logging(Some(&cfg.logging));

    info!("Loading {}...", config_path.display());
    let gateway = Arc::new(Gateway::from_config(&cfg).map_err(|e| e.to_string())?);

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let mut taps = Vec::new();
        for name in gateway.interface_names() {
            info!("Binding to interface {}...", name);
            let tap = AfPacketTap::bind(&name, promisc).map_err(|e| {
                format!(
                    "Failed to bind to {}: {}. Run with root privileges.",
                    name, e
                )
            })?;
            taps.push(tap);
        }

        let workers: Vec<_> = taps
            .into_iter()
            .map(|tap| tokio::spawn(watch(tap, gateway.clone())))
            .collect();

        let mut aging_timer = gateway.aging_interval();
        let mut stats_timer = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));

        info!("Tracking connections on {} interfaces", workers.len());

        loop {
            tokio::select! {
                _ = aging_timer.tick() => {
                    gateway.run_aging(Timestamp::now());
                }
                _ = stats_timer.tick() => {
                    log_metrics(&gateway);
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for Ctrl-C: {}", e);
                    }
                    break;
                }
            }
        }

        info!("Shutting down");
        for worker in workers {
            worker.abort();
        }
        log_metrics(&gateway);
        Ok(())
    })
}

/// Feed every IPv4 frame received on `tap` through its prerouting hook
async fn watch<S: PacketSource>(tap: S, gateway: Arc<Gateway>) {
    let mut buf = vec![0u8; RX_BUF_SIZE];
    loop {
        let info = match tap.recv(&mut buf).await {
            Ok(info) => info,
            Err(e) => {
                warn!("{}: receive error: {}", tap.name(), e);
                continue;
            }
        };
        if info.outgoing {
            continue;
        }

        let Some(packet) = ipv4_packet(&buf[..info.len]) else {
            continue;
        };

        let result = if info.truncated() {
            let wire_len = packet.len() + (info.wire_len - info.len);
            gateway.process_truncated(tap.name(), wire_len)
        } else {
            gateway.process_packet(tap.name(), packet)
        };
        match result {
            Ok(Verdict::Accept) => {}
            Ok(Verdict::Drop) => trace!("{}: would drop {} bytes", tap.name(), packet.len()),
            Err(e) => {
                error!("{}: {}", tap.name(), e);
                return;
            }
        }
    }
}

fn log_metrics(gateway: &Gateway) {
    let metrics = gateway.export_metrics();
    for (name, value) in &metrics {
        debug!("{} = {}", name, value);
    }
    let dropped: u64 = metrics
        .iter()
        .filter(|(name, _)| name.ends_with(".prerouting_dropped"))
        .map(|(_, v)| v)
        .sum();
    info!("Stats: {} packets dropped at prerouting", dropped);
}
