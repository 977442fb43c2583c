//! shiftdb Command-Line Interface
//!
//! Applies, rolls back and inspects schema migrations for a shiftdb store.

mod commands;
mod config;
mod error;
mod formatter;

use clap::Parser;
use config::Args;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // Logs go to stderr; stdout carries command output only.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shiftdb_cli=info,shiftdb_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Args::parse().into_config();
    tracing::debug!(
        data_path = %config.storage.path.display(),
        migrations = %config.migrations.display(),
        format = %config.format,
        "configuration loaded"
    );

    let formatter = formatter::create_formatter(config.format);
    match commands::run(config, &*formatter) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e));
            std::process::exit(1);
        }
    }
}
