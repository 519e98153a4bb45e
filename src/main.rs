//! LED Strip HTTP API Server
//!
//! Runs a web server on the Pi that accepts commands to control an SPI LED
//! strip. Any device on the LAN can set pixels, change brightness, render,
//! or watch the strip change over a WebSocket.
//!
//! ## Architecture
//! - **Render thread** (std::thread, inside `LedController`): owns the SPI
//!   bus and writes frames in the order they were rendered
//! - **HTTP server** (tokio/axum): edits the pending strip and queues renders
//!
//! ## Rust concepts
//! - `#[tokio::main]` async entry point
//! - `Arc` to share the controller with every handler
//! - Graceful shutdown driven by an `AtomicBool` from the Ctrl+C handler
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/led-strip-rs --leds 60 --port 8080
//! ./target/release/led-strip-rs --debug   # no hardware needed
//! ```

use clap::Parser;
use led_strip_rs::bus::ClockSpeed;
use led_strip_rs::controller::DEFAULT_DEVICE_PATH;
use led_strip_rs::server::{self, AppState};
use led_strip_rs::{ControllerOptions, LedController, StripConfig, is_running, setup_signal_handler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// LED Strip HTTP API Server
#[derive(Parser)]
#[command(name = "led-strip-rs")]
#[command(about = "HTTP API server for controlling an SPI RGB LED strip")]
#[command(version)]
struct Args {
    /// Number of leds on the strip
    #[arg(long, default_value_t = StripConfig::default().led_amount)]
    leds: usize,

    /// SPI device to write to
    #[arg(long, default_value = DEFAULT_DEVICE_PATH)]
    device: PathBuf,

    /// SPI clock speed
    #[arg(long, value_enum, default_value_t = ClockSpeed::Mhz2)]
    clock_speed: ClockSpeed,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Render after every edit
    #[arg(long)]
    automatic_rendering: bool,

    /// Simulate the SPI device instead of opening it
    #[arg(long)]
    debug: bool,

    /// Pause after each frame so the strip latches
    #[arg(long, default_value = "10")]
    latch_delay_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();

    tracing::info!("LED Strip HTTP Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Leds: {}", args.leds);
    tracing::info!("Device: {}", args.device.display());
    tracing::info!("Port: {}", args.port);

    let running = match setup_signal_handler() {
        Ok(running) => running,
        Err(e) => {
            eprintln!("Failed to install Ctrl+C handler: {e}");
            std::process::exit(1);
        }
    };

    let options = ControllerOptions {
        debug: args.debug,
        automatic_rendering: args.automatic_rendering,
        clock_speed: args.clock_speed,
        device_path: args.device,
        latch_delay: Duration::from_millis(args.latch_delay_ms),
        ..ControllerOptions::default()
    };

    let controller = match LedController::new(args.leds, options) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            eprintln!("Failed to start LED strip: {e}");
            if !args.debug {
                eprintln!("Run with --debug to simulate the strip without hardware.");
            }
            std::process::exit(1);
        }
    };

    let app = server::create_router(AppState {
        controller: controller.clone(),
    });

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", args.port);
    tracing::info!("Try: curl http://localhost:{}/api/v1/status", args.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = async move {
        while is_running(&running) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    // Leave the strip dark.
    if let Err(e) = controller.clear().render().await {
        tracing::warn!("Could not clear the strip on exit: {}", e);
    }

    tracing::info!("Shut down cleanly");
}
