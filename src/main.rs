use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use lorart_lib::join::JoinReply;
use lorart_lib::usb::UsbHost;
use lorart_lib::{DeviceFilter, LinkConfig, LoraWorker, NusbHost};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Drive a LoRa radio module over USB CDC: join the network and fetch downlinks.
#[derive(Parser, Debug)]
#[command(name = "lorart", author, version, about, long_about = None)]
struct Cli {
    /// JSON file overriding the link timing and OTAA credentials.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB devices and whether they expose a CDC interface.
    List,
    /// Open the module and join the network.
    Join {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Send a telemetry request and wait for the downlink answer.
    Fetch {
        /// Telemetry code to request (0-255).
        #[arg(long)]
        code: u8,
        /// Optional entity tag (0-255); sent as 0 when absent.
        #[arg(long)]
        etag: Option<u8>,
        /// Join the network first on the selected device.
        #[arg(long)]
        join: bool,
        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[derive(clap::Args, Debug)]
struct DeviceArgs {
    /// USB vendor id, decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_id)]
    vid: Option<u16>,
    /// USB product id, decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_id)]
    pid: Option<u16>,
}

impl DeviceArgs {
    fn filter(&self) -> DeviceFilter {
        DeviceFilter::new(self.vid, self.pid)
    }
}

fn parse_id(value: &str) -> Result<u16> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("invalid USB id: {value}"))
}

/// Directives used when `RUST_LOG` is unset: dependencies stay at `warn`, this binary
/// and the link library follow `-v`/`-q`.
fn default_directives(level: LevelFilter) -> String {
    format!("warn,lorart={level},lorart_lib={level}")
}

fn log_filter(verbosity: &Verbosity<InfoLevel>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity.tracing_level_filter())))
}

fn open_log_file(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let file = File::create(path).with_context(|| format!("cannot create log file {}", path.display()))?;
    Ok(tracing_appender::non_blocking(file))
}

/// Console logs go to stderr; stdout carries the JSON replies.
fn setup_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let (file_writer, guard) = match cli.log_file.as_deref().map(open_log_file).transpose()? {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(log_filter(&cli.verbose))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).without_time())
        .with(file_writer.map(|writer| fmt::layer().with_writer(writer).with_ansi(false)))
        .init();

    if let Some(path) = &cli.log_file {
        info!(path = %path.display(), "Logging to file");
    }
    Ok(guard)
}

fn load_config(path: Option<&PathBuf>) -> Result<LinkConfig> {
    let Some(path) = path else {
        return Ok(LinkConfig::default());
    };
    let config = LinkConfig::from_file(path).with_context(|| format!("Failed to load config {:?}", path))?;
    info!("Loaded config from {:?}", path);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(&cli)?;

    if let Err(e) = run(cli).await {
        error!("lorart failed: {:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::List => list_devices(),
        Command::Join { device } => {
            let worker = LoraWorker::spawn(NusbHost, config)?;
            let outcome = worker.join(device.filter()).await;
            worker.shutdown().await;
            println!("{}", serde_json::to_string(&JoinReply::from(&outcome))?);
            Ok(())
        }
        Command::Fetch {
            code,
            etag,
            join,
            device,
        } => {
            let worker = LoraWorker::spawn(NusbHost, config)?;
            if join {
                let outcome = worker.join(device.filter()).await;
                if !outcome.is_joined() {
                    worker.shutdown().await;
                    bail!("join failed: {}", serde_json::to_string(&JoinReply::from(&outcome))?);
                }
            }
            let downlink = worker.fetch(code, etag).await;
            worker.shutdown().await;
            // `null` when no downlink arrived
            println!("{}", serde_json::to_string(&downlink)?);
            Ok(())
        }
    }
}

fn list_devices() -> Result<()> {
    let host = NusbHost;
    let devices = host.devices()?;
    if devices.is_empty() {
        info!("No USB devices found.");
    }
    for (index, device) in devices.iter().enumerate() {
        let cdc = device.first_cdc_interface().map(|i| i.number);
        println!(
            "#{} {} {} cdc={} access={}",
            index + 1,
            device,
            device.product.as_deref().unwrap_or("<Not available>"),
            cdc.map_or_else(|| "-".to_string(), |n| n.to_string()),
            if host.has_permission(device) { "granted" } else { "denied" },
        );
    }
    Ok(())
}
