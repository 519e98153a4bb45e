//! # Rainbow Example
//!
//! Spreads the color wheel along the strip and rotates it, one render per
//! frame, until Ctrl+C.
//!
//! ## Rust concepts introduced
//! - Iterators with `enumerate` and `map`
//! - Wrapping arithmetic for overflow-safe counters
//! - Blocking on a render from plain (non-async) code
//!
//! ## Run it
//! ```sh
//! cargo run --example rainbow -- --debug
//! sudo ./target/release/examples/rainbow --leds 60
//! ```

use clap::Parser;
use led_strip_rs::{
    Color, ControllerOptions, LedController, StripConfig, is_running, setup_signal_handler,
};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
struct Args {
    /// Number of leds on the strip
    #[arg(long, default_value_t = StripConfig::default().led_amount)]
    leds: usize,

    /// Simulate the SPI device instead of opening it
    #[arg(long)]
    debug: bool,

    /// Brightness, "auto" or 0-100
    #[arg(long, default_value = "40")]
    brightness: String,
}

fn main() {
    tracing_subscriber::fmt().with_target(false).compact().init();

    let args = Args::parse();
    let options = ControllerOptions {
        debug: args.debug,
        ..ControllerOptions::default()
    };

    let strip = match LedController::new(args.leds, options) {
        Ok(strip) => strip,
        Err(e) => {
            eprintln!("Failed to start LED strip: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = strip.set_brightness(args.brightness.as_str()) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let running = match setup_signal_handler() {
        Ok(running) => running,
        Err(e) => {
            eprintln!("Failed to install Ctrl+C handler: {e}");
            std::process::exit(1);
        }
    };

    let leds = args.leds;
    let mut offset: u8 = 0;

    while is_running(&running) {
        for index in 0..leds {
            // Spread one full turn of the wheel over the strip.
            let position = (index * 256 / leds) as u8;
            let _ = strip.set_pixel(index, Color::wheel(position.wrapping_add(offset)));
        }

        if let Err(e) = strip.render().wait() {
            eprintln!("Render failed: {e}");
            break;
        }

        offset = offset.wrapping_add(2);
        thread::sleep(Duration::from_millis(16));
    }

    if let Err(e) = strip.clear().render().wait() {
        eprintln!("Could not clear the strip: {e}");
    }
    println!("\nShutting down cleanly.");
}
