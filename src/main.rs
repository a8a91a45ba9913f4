//! Boot sequence: parse the two positional CLI arguments, scan the data
//! directory, stand up the registry and stats loop, then serve HTTP.
//!
//! The registry, per-log actors, and stats loop are the two singletons
//! spec §9 calls out; both are created here, after boot-time discovery has
//! finished, and live until the process exits.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Arg, Command};
use kaf::registry::{self, RegistryHandle};
use kaf::{http, stats};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("kaf")
        .about("A small, human-inspectable append-only event-log server")
        .arg(Arg::new("listen").help("host:port to listen on").required(true))
        .arg(
            Arg::new("data_dir")
                .help("directory holding log files")
                .required(true),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut command = cli();
    let matches = match command.clone().try_get_matches() {
        Ok(matches) => matches,
        Err(_) => {
            // Wrong arity: print help and exit successfully (spec §6).
            command.print_help().ok();
            println!();
            return Ok(());
        }
    };

    let listen: &String = matches.get_one("listen").expect("required arg");
    let data_dir: PathBuf = matches.get_one::<String>("data_dir").expect("required arg").into();

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let registry = registry::spawn(data_dir.clone());
    let discovered = discover(&registry, &data_dir)
        .await
        .context("boot-time log discovery failed")?;
    tracing::info!(listen, data_dir = %data_dir.display(), discovered, "kaf starting");

    stats::spawn(registry.clone());

    let app = http::router(registry);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Boot-time discovery (spec §4.D): every non-hidden, non-archived file
/// already in the data directory is registered before the listener opens.
/// A failure to load any one of them is fatal.
async fn discover(registry: &RegistryHandle, data_dir: &Path) -> anyhow::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(data_dir).with_context(|| format!("reading {}", data_dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !registry::is_valid_log_name(&name) {
            continue;
        }
        registry
            .lookup_or_create(&name, true)
            .await
            .with_context(|| format!("loading log {name}"))?;
        count += 1;
    }
    Ok(count)
}
