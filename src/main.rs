// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod cli;
mod config;
mod error;

use std::process::ExitCode;
use std::time::Duration;

use aprs_tracker::Bridge;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use mimalloc::MiMalloc;

use cli::Args;
use config::AppConfig;
use error::AppError;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How long tasks get to stop after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let args = Args::parse();
    log_setup(args.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(args));
    // Stdout writes run on blocking threads; one stuck on a full pipe must not
    // keep the process alive.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    if args.print_config {
        let path = AppConfig::config_path(args.config.as_deref())?;
        println!("{}", path.display());
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    let bridge_config = config.to_bridge_config()?;

    info!(
        "Following {} and writing {}",
        bridge_config.log_path.display(),
        bridge_config.poi.path.display()
    );

    // Standard output is Navit's vehicle pipe; logs stay on stderr.
    let bridge = Bridge::spawn(bridge_config, tokio::io::stdout())?;
    let stats = bridge.stats();
    let cancel = bridge.cancel_token();

    let finished = bridge.wait();
    tokio::pin!(finished);

    let outcome = tokio::select! {
        result = &mut finished => result,
        signal = shutdown_signal() => {
            signal.map_err(AppError::Signal)?;
            info!("Shutting down");
            cancel.cancel();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut finished).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Pipeline tasks did not stop within {SHUTDOWN_GRACE:?}");
                    Ok(())
                }
            }
        }
    };

    info!("Final counters: {}", stats.snapshot());
    outcome.map_err(AppError::from)
}

/// Resolve on Ctrl-C, or SIGTERM where there is one.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

fn log_setup(verbose: u8) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        env_logger::Builder::new()
            .filter_module("aprs_navit", level)
            .filter_module("aprs_tracker", level)
            .init();
    } else {
        env_logger::init();
    }
}
