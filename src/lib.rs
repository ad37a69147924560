pub mod cli;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod readiness;
pub mod ringbuffer;
pub mod ssl;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::Cli;
use crate::readiness::Interrupt;

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("cannot start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let interrupt = Interrupt::new();
        let on_ctrl_c = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, stopping");
                on_ctrl_c.trigger();
            }
        });

        match cli.execute(config, &interrupt).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{e}");
                let mut source = std::error::Error::source(&e);
                while let Some(cause) = source {
                    log::error!("  caused by: {cause}");
                    source = cause.source();
                }
                ExitCode::FAILURE
            }
        }
    })
}
