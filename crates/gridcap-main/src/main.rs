// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of GridCap.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! GridCap - entry point for the export-limit controller binary

use anyhow::{Context, Result};
use clap::Parser;
use gridcap_core::{ControllerConfig, Driver, SystemClock};
use gridcap_sems::SemsClient;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::info;
use tracing_subscriber::FmtSubscriber;

/// Stop flag shared with the signal handler
static STOP: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "gridcap", version)]
#[command(about = "Closed-loop grid export-limit controller for SEMS appliances", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gridcap.toml")]
    config: PathBuf,

    /// Print the effective configuration (password redacted) and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG, defaults to info
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let config = ControllerConfig::load(&cli.config)?;

    if cli.print_config {
        print!("{}", config.to_redacted_toml()?);
        return Ok(());
    }

    log_summary(&config);

    let credentials = config.appliance.credentials()?;
    let api = SemsClient::from_config(&config.appliance)
        .context("Failed to create appliance client")?;

    let stop = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&stop);

    let mut driver = Driver::new(config, credentials, api, SystemClock).with_stop_flag(stop);
    driver.run();
    driver.shutdown();

    info!("👋 GridCap stopped");
    Ok(())
}

fn log_summary(config: &ControllerConfig) {
    info!("🚀 Starting GridCap export-limit controller");
    info!("📋 Configuration Summary:");
    info!("   Appliance: {} (user {})", config.appliance.base_url, config.appliance.user);
    info!(
        "   Target: {:.0}W, meter positive = {}",
        config.control.target_meter_w,
        if config.control.meter_positive_is_export {
            "export"
        } else {
            "import"
        }
    );
    info!(
        "   Limit: {:.0}-{:.0}W, ramp {:.0}W/step, deadband {:.0}W",
        config.control.export_limit_min_w,
        config.control.export_limit_max_w,
        config.control.ramp_w_per_step,
        config.control.deadband_w
    );
    info!(
        "   Periods: data {}s, status {}s, write {}s",
        config.timing.read_data_period_s,
        config.timing.read_status_period_s,
        config.timing.write_period_s
    );
    info!(
        "   Safe mode: {}, OOC alarm: {}",
        config.safe_mode.enabled, config.ooc_alarm.enabled
    );
}

/// SIGINT and SIGTERM raise the stop flag; the loop exits at its next iteration
fn install_signal_handlers(stop: &Arc<AtomicBool>) {
    let _ = STOP.set(Arc::clone(stop));

    let action = SigAction::new(
        SigHandler::Handler(stop_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store
        if let Err(e) = unsafe { signal::sigaction(sig, &action) } {
            tracing::warn!("Failed to install {} handler: {}", sig, e);
        }
    }
}

extern "C" fn stop_handler(_signal: nix::libc::c_int) {
    if let Some(stop) = STOP.get() {
        stop.store(true, Ordering::SeqCst);
    }
}
