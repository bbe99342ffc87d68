use clap::Parser;
use log::{error, info};
use pico_sos::console::{run_console, ConsoleOptions};
use pico_sos::error::AppRunError;
use pico_sos::init_logging;
use pico_sos::telemetry::location::PositionFix;

/// Companion console for the Pico safety radio.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Serial port of the Pico (e.g. /dev/ttyACM0); defaults to the
    /// configured or first enumerated port.
    #[arg(long)]
    port: Option<String>,

    /// Latitude for the manual location provider.
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude for the manual location provider.
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// ISO country code used to pick the emergency number.
    #[arg(long)]
    region: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("pico-sos ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();

    let manual_fix = match (args.lat, args.lon) {
        (Some(latitude), Some(longitude)) => Some(PositionFix {
            latitude,
            longitude,
        }),
        _ => None,
    };

    let options = ConsoleOptions {
        port: args.port,
        manual_fix,
        region: args.region,
    };

    match run_console(options).await {
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(()) => Ok(()),
    }
}
