mod telemetry;

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use std::time::Duration;
use telemetry::Reading;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Posts synthetic cold-chain readings to the ingestor.
#[derive(Debug, Parser)]
#[command(name = "mst01-simulator")]
struct Args {
    /// Ingestion endpoint
    #[arg(long, env = "ENDPOINT", default_value = "http://localhost:10000/api/telemetry")]
    endpoint: String,

    /// Readings per second across all devices
    #[arg(long, env = "RATE", default_value_t = 10)]
    rate: u64,

    #[arg(long, env = "DEVICES", default_value_t = 5)]
    devices: usize,

    /// Share of readings reporting an out-of-range temperature
    #[arg(long, env = "FAULT_RATIO", default_value_t = 0.05)]
    fault_ratio: f64,

    /// Stop after this many readings; runs forever when absent
    #[arg(long, env = "COUNT")]
    count: Option<u64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(reason) = check_args(&args) {
        error!("Invalid arguments: {}", reason);
        std::process::exit(2);
    }

    info!("Starting MST01 simulator");
    info!(
        "Endpoint: {}, Rate: {} req/s, Devices: {}, Fault ratio: {}",
        args.endpoint, args.rate, args.devices, args.fault_ratio
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|e| {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        });

    let devices: Vec<String> = (0..args.devices).map(device_mac).collect();
    let fault_ratio = args.fault_ratio;
    let interval = Duration::from_micros(1_000_000 / args.rate);
    let mut ticker = tokio::time::interval(interval);

    let mut rng = rand::thread_rng();
    let mut sent = 0u64;
    let mut failed = 0u64;

    loop {
        if args.count.is_some_and(|count| sent + failed >= count) {
            break;
        }
        ticker.tick().await;

        let device = &devices[((sent + failed) % devices.len() as u64) as usize];
        let reading = generate_reading(&mut rng, device.clone(), fault_ratio);

        match client.post(&args.endpoint).json(&reading).send().await {
            Ok(resp) if resp.status().is_success() => {
                sent += 1;
            }
            Ok(resp) => {
                failed += 1;
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!("Ingestor answered {}: {}", status, body);
            }
            Err(e) => {
                failed += 1;
                warn!("Failed to post reading: {}", e);
            }
        }

        // Log progress periodically
        if (sent + failed) % 100 == 0 {
            info!("Posted {} readings ({} failed)", sent, failed);
        }
    }

    info!("Done: {} readings stored, {} failed", sent, failed);
}

/// The request interval is whole microseconds, so the rate tops out at one
/// request per microsecond.
const MAX_RATE: u64 = 1_000_000;

fn check_args(args: &Args) -> Result<(), String> {
    if args.rate == 0 || args.rate > MAX_RATE {
        return Err(format!("rate must be between 1 and {}, got {}", MAX_RATE, args.rate));
    }
    if args.devices == 0 {
        return Err("device count must be positive".to_string());
    }
    if !(0.0..=1.0).contains(&args.fault_ratio) {
        return Err(format!(
            "fault ratio must be between 0 and 1, got {}",
            args.fault_ratio
        ));
    }
    Ok(())
}

fn device_mac(index: usize) -> String {
    format!("AA:BB:CC:00:{:02X}:{:02X}", (index >> 8) & 0xFF, index & 0xFF)
}

fn generate_reading(rng: &mut impl Rng, device_identifier: String, fault_ratio: f64) -> Reading {
    let temperature = if rng.gen_bool(fault_ratio) {
        rng.gen_range(-40.0..60.0) // sensor fault or door left open
    } else {
        rng.gen_range(2.0..8.0) // cold-chain range
    };

    // Older firmware has no humidity sensor.
    let humidity = if rng.gen_bool(0.2) {
        None
    } else {
        Some(rng.gen_range(30.0..80.0))
    };

    Reading {
        device_identifier,
        temperature,
        humidity,
        timestamp: Utc::now(),
    }
}
