// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lg_common::log::{init_file_logger, init_logger, init_term_logger};
use lgdb::config::Config;
use lgdb::housekeeping::Housekeeping;
use lgdb::neighbors::NeighborsStoreStats;
use lgdb::routes::RoutesStoreStats;
use lgdb::{NeighborsStore, RoutesStore, SourceId, SourceRegistry};
use serde::Serialize;
use slog::Logger;
use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::sync::Arc;

mod log;
use log::lgd_log;

const COMPONENT_LGD: &str = "lgd";
const MOD_DAEMON: &str = "daemon";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log record format.
    #[arg(long, global = true, value_enum, default_value = "term")]
    log_format: LogFormat,

    /// Write bunyan log records to this file instead.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    /// Human readable, on stderr.
    Term,
    /// Bunyan JSON lines, on stdout.
    Bunyan,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Keep the stores refreshed until interrupted.
    Run(ConfigArg),

    /// Refresh once and print routes whose network starts with a prefix.
    Lookup {
        #[command(flatten)]
        config: ConfigArg,

        prefix: String,
    },

    /// Refresh once and print neighbors whose description matches a query.
    Neighbors {
        #[command(flatten)]
        config: ConfigArg,

        query: String,

        /// Only search this source.
        #[arg(long)]
        source: Option<String>,
    },

    /// Refresh once and print per-source store statistics.
    Stats(ConfigArg),
}

#[derive(Args, Debug)]
struct ConfigArg {
    /// Path to the JSON configuration file.
    #[arg(
        short,
        long,
        env = "LGD_CONFIG",
        default_value = "/etc/lgd/config.json"
    )]
    config: PathBuf,
}

/// Every long-lived component, built once from configuration and shared by
/// handle.
struct Daemon {
    config: Config,
    sources: Arc<SourceRegistry>,
    neighbors: Arc<NeighborsStore>,
    routes: Arc<RoutesStore>,
    housekeeping: Arc<Housekeeping>,
}

impl Daemon {
    fn new(arg: &ConfigArg, log: &Logger) -> Result<Self> {
        let config = Config::from_file(&arg.config).with_context(|| {
            format!("load config {}", arg.config.display())
        })?;
        let sources = Arc::new(SourceRegistry::from_config(&config, log)?);
        let neighbors = Arc::new(NeighborsStore::new(
            sources.clone(),
            config.neighbors_store,
            log.clone(),
        ));
        let routes = Arc::new(RoutesStore::new(
            sources.clone(),
            neighbors.clone(),
            config.routes_store,
            log.clone(),
        ));
        let housekeeping = Arc::new(Housekeeping::new(
            sources.clone(),
            config.housekeeping,
            log.clone(),
        ));
        Ok(Self {
            config,
            sources,
            neighbors,
            routes,
            housekeeping,
        })
    }

    /// Refresh neighbors before routes so lookups can attach neighbors.
    fn refresh(&self) {
        self.neighbors.refresh();
        self.routes.refresh();
    }
}

#[derive(Serialize)]
struct Stats {
    neighbors: NeighborsStoreStats,
    routes: RoutesStoreStats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = match (&cli.log_file, cli.log_format) {
        (Some(path), _) => init_file_logger(path)
            .with_context(|| format!("open log file {}", path.display()))?,
        (None, LogFormat::Term) => init_term_logger(),
        (None, LogFormat::Bunyan) => init_logger(),
    };
    match cli.command {
        Commands::Run(arg) => run(Daemon::new(&arg, &log)?, log),
        Commands::Lookup { config, prefix } => {
            let d = Daemon::new(&config, &log)?;
            d.refresh();
            print_json(&d.routes.lookup_prefix(&prefix))
        }
        Commands::Neighbors {
            config,
            query,
            source,
        } => {
            let d = Daemon::new(&config, &log)?;
            d.neighbors.refresh();
            match source {
                Some(id) => print_json(
                    &d.neighbors.lookup_neighbors_at(&SourceId::from(id), &query)?,
                ),
                None => print_json(&d.neighbors.lookup_neighbors(&query)),
            }
        }
        Commands::Stats(arg) => {
            let d = Daemon::new(&arg, &log)?;
            d.refresh();
            print_json(&Stats {
                neighbors: d.neighbors.stats(),
                routes: d.routes.stats(),
            })
        }
    }
}

fn run(daemon: Daemon, log: Logger) -> Result<()> {
    let (tx, rx) = channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set termination handler")?;

    // Dropping the handles stops the threads.
    let _neighbors = daemon.neighbors.start()?;
    let _routes = daemon.routes.start()?;
    let _housekeeping = daemon.housekeeping.start()?;

    lgd_log!(log, info, "looking glass running";
        "sources" => daemon.sources.len(),
        "refresh_interval" => format!("{:?}", daemon.config.routes_store.refresh_interval)
    );

    rx.recv().context("wait for termination")?;
    lgd_log!(log, info, "shutting down");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
