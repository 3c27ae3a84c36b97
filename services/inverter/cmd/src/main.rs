//! Voltronic inverter command-line client.
//!
//! Sends P30 commands (QPIGS, QMOD, QPI, ...) over a serial port and prints
//! the inverter's responses.

use chrono::{DateTime, Utc};
use clap::Parser;
use inverter_device::{Device, SerialDevice};
use inverter_wire::{DigestAlgorithm, P30Protocol, TextEncoding, WireError};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
#[macro_use]
mod logging;

use config::InverterConfig;
use logging::InverterLogFormatter;

/// Query a Voltronic inverter over its serial port
#[derive(Parser, Debug)]
#[command(name = "inverter", version, about = "Query a Voltronic inverter over the P30 serial protocol")]
struct Args {
    /// Commands to send, e.g. QPIGS QMOD
    #[arg(required = true)]
    commands: Vec<String>,

    /// Serial port path, e.g. /dev/ttyUSB0
    #[arg(long)]
    port: Option<String>,

    /// Line speed in baud
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Response timeout, e.g. 2s
    #[arg(long)]
    timeout: Option<humantime::Duration>,

    /// Accept responses without checking their digest
    #[arg(long)]
    no_verify: bool,

    /// Digest algorithm (v1, v1-legacy)
    #[arg(long)]
    digest: Option<DigestAlgorithm>,

    /// Payload text encoding (US-ASCII, ISO-8859-1)
    #[arg(long)]
    encoding: Option<TextEncoding>,

    /// Largest response accepted, in bytes
    #[arg(long)]
    max_buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print responses as JSON lines
    #[arg(long)]
    json: bool,

    /// Configuration file path
    #[arg(long, default_value = "inverter.yaml")]
    config: PathBuf,
}

impl Args {
    /// Command-line flags take precedence over file and environment
    fn apply_to(&self, config: &mut InverterConfig) {
        if let Some(port) = &self.port {
            config.device.port = port.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.device.settings.baud_rate = baud_rate;
        }
        if let Some(timeout) = &self.timeout {
            config.timeout = **timeout;
        }
        if self.no_verify {
            config.protocol.verify_digest = false;
        }
        if let Some(digest) = self.digest {
            config.protocol.digest_algorithm = digest;
        }
        if let Some(encoding) = self.encoding {
            config.protocol.text_encoding = encoding;
        }
        if let Some(size) = self.max_buffer_size {
            config.protocol.maximum_buffer_size = size;
        }
    }
}

/// One command and its outcome, as printed with `--json`
#[derive(Debug, Serialize)]
struct Exchange<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    elapsed_ms: u64,
    timestamp: DateTime<Utc>,
}

impl<'a> Exchange<'a> {
    fn new(command: &'a str, result: &Result<String, WireError>, elapsed: Duration) -> Self {
        let (response, error) = match result {
            Ok(response) => (Some(response.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            command,
            response,
            error,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        }
    }

    fn print(&self, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", serde_json::to_string(self)?);
        } else {
            match (&self.response, &self.error) {
                (Some(response), _) => println!("{}: {}", self.command, response),
                (None, Some(error)) => eprintln!("{}: {}", self.command, error),
                (None, None) => {}
            }
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("inverter={}", args.log_level).parse()?)
        .add_directive(format!("inverter_wire={}", args.log_level).parse()?)
        .add_directive(format!("inverter_device={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .event_format(InverterLogFormatter::new("inverter"))
        .init();

    info!("Starting inverter client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = InverterConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);
    config.validate()?;

    let protocol = P30Protocol::from_config(&config.protocol)?;
    let mut device = SerialDevice::open(&config.device.port, &config.device.settings)?;

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            component_warn!("signal", "Interrupt received, cancelling");
            let _ = cancel_tx.send(true);
        }
    });

    let mut failures = 0usize;
    for command in &args.commands {
        if *cancel_rx.borrow() {
            break;
        }

        let started = Instant::now();
        if let Err(e) = protocol.write(&mut device, command) {
            device.close()?;
            return Err(e.into());
        }
        component_debug!("serial", "Sent {} to {}", command, device.name());

        let result = protocol
            .read_with_cancel(&mut device, config.timeout, &mut cancel_rx)
            .await;
        Exchange::new(command, &result, started.elapsed()).print(args.json)?;

        match result {
            Ok(_) => {}
            Err(WireError::Interrupted { bytes_transferred }) => {
                component_warn!(
                    "serial",
                    "Read of {} response interrupted after {} bytes",
                    command,
                    bytes_transferred
                );
                failures += 1;
                break;
            }
            Err(e) if e.is_recoverable() => {
                component_error!("protocol", "{} failed: {}", command, e);
                failures += 1;
            }
            Err(e) => {
                device.close()?;
                return Err(e.into());
            }
        }
    }

    device.close()?;
    component_info!("serial", "Closed {}", device.name());

    if failures > 0 {
        anyhow::bail!("{} of {} commands failed", failures, args.commands.len());
    }
    Ok(())
}
