//! bmsread: read one snapshot from a Daly or JK BMS and print it as JSON.
//!
//! ```bash
//! # Daly, name from BMSREAD_DEVICE_NAME or the default
//! bmsread
//!
//! # JK with an explicit name and a longer read
//! bmsread --protocol jk --name JK-B2A24S --timeout 30
//!
//! # Let the JK BMS re-learn 100% SOC with a 3.45 V full cell
//! bmsread --protocol jk soc-reset 3.45
//! ```

use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bmsread::{command, BmsClient, Protocol, ReaderConfig};

/// Spacing between consecutive register writes.
const WRITE_SPACING: Duration = Duration::from_millis(300);

#[derive(Parser)]
#[command(name = "bmsread")]
#[command(version)]
#[command(about = "Read telemetry from Daly and JK BMS over Bluetooth Low Energy")]
struct Cli {
    /// BMS protocol: daly or jk
    #[arg(short, long)]
    protocol: Option<Protocol>,

    /// Advertised BLE name of the BMS
    #[arg(short, long)]
    name: Option<String>,

    /// Read timeout in seconds
    #[arg(short, long)]
    timeout: Option<f64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one snapshot (default)
    Read,

    /// JK only: write OVPR = max - 0.10 V, then OVP = max - 0.05 V
    SocReset {
        /// Full-charge cell voltage
        max_cell_volts: f64,
    },

    /// JK only: switch the charge, discharge and balance controls
    Switches {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bmsread=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = apply_args(ReaderConfig::from_env()?, &cli)?;
    tracing::info!(
        "bmsread v{} reading {} device {}",
        env!("CARGO_PKG_VERSION"),
        config.protocol,
        config.device_name
    );

    let protocol = config.protocol;
    let mut client = BmsClient::new(config).await?;

    let result = match cli.command.unwrap_or(Commands::Read) {
        Commands::Read => read(&mut client).await,
        Commands::SocReset { max_cell_volts } => {
            require_jk(protocol)?;
            client.send(&command::soc_reset(max_cell_volts), WRITE_SPACING).await
        }
        Commands::Switches { state } => {
            require_jk(protocol)?;
            client.send(&command::control_switches(state == "on"), WRITE_SPACING).await
        }
    };

    client.stop().await?;
    result
}

async fn read(client: &mut BmsClient) -> Result<()> {
    let snapshot = client.fetch_snapshot().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn apply_args(mut config: ReaderConfig, cli: &Cli) -> Result<ReaderConfig> {
    if let Some(protocol) = cli.protocol {
        config.protocol = protocol;
    }
    if let Some(name) = &cli.name {
        config.device_name = name.clone();
    }
    if let Some(secs) = cli.timeout {
        if !secs.is_finite() || secs <= 0.0 {
            bail!("timeout must be a positive number of seconds");
        }
        config.timeout = Duration::from_secs_f64(secs);
    }
    Ok(config)
}

fn require_jk(protocol: Protocol) -> Result<()> {
    if protocol != Protocol::Jk {
        bail!("register writes are only supported for JK");
    }
    Ok(())
}
