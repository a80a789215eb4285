use std::process::exit;

use anyhow::{Context, Result};
use clap::Parser;

use _core::logging::init_rust_logging;
use _core::{open_rpi_pins, Hx711, Hx711Config};

#[derive(Parser, Debug)]
#[command(name = "hx711-read", about = "Read raw samples from an HX711 load cell ADC")]
struct Args {
    /// BCM number of the GPIO connected to DOUT
    #[arg(long, default_value_t = 21)]
    data_pin: u8,
    /// BCM number of the GPIO connected to PD_SCK
    #[arg(long, default_value_t = 20)]
    clock_pin: u8,
    /// Channel A gain (64 or 128)
    #[arg(long, default_value_t = 128)]
    gain: u32,
    /// Input channel (A or B)
    #[arg(long, default_value = "A")]
    channel: String,
    /// Number of samples to read
    #[arg(long, default_value_t = 10)]
    readings: usize,
    /// Skip the power-cycle reset before reading
    #[arg(long)]
    no_reset: bool,
    /// Log level (overrides HX711_LOG / RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_rust_logging(args.log_level.as_deref());

    let config = Hx711Config::from_parts(&args.channel, args.gain)?;
    println!(
        "Using DOUT: GPIO{}, PD_SCK: GPIO{}, channel {}, gain {}",
        args.data_pin,
        args.clock_pin,
        config.channel,
        config.effective_gain()
    );

    let (sck, dout) = open_rpi_pins(args.clock_pin, args.data_pin)
        .context("failed to open GPIO pins")?;
    let mut hx = Hx711::new(sck, dout, config)?;

    if !args.no_reset {
        println!("Reset");
        hx.reset()?;
        println!("Ready to use");
    }

    let batch = hx.acquire_with_stats(args.readings)?;
    println!("Raw data: {:?}", batch.samples);
    if batch.discarded() > 0 {
        println!(
            "Discarded reads: {} (not ready {}, timing {}, invalid {}, desync {})",
            batch.discarded(),
            batch.not_ready,
            batch.timing_violations,
            batch.invalid_samples,
            batch.desyncs
        );
    }
    Ok(())
}
