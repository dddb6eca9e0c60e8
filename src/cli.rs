use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Once};

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::api::{AppState, run_http_server};
use crate::catalog::{CatalogError, FundCatalog};
use crate::prices::CsvDirectorySource;
use crate::service::{ServiceError, SimulationRequest, run_simulation};

pub const LOG_ENV: &str = "FIRE_DRAWDOWN_LOG";

static INIT_TRACING: Once = Once::new();

/// Installs the global subscriber. Reads per-target levels from
/// `FIRE_DRAWDOWN_LOG` and defaults to `fire_drawdown=info`.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new("fire_drawdown=info"));
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    });
}

#[derive(Parser, Debug)]
#[command(
    name = "fire-drawdown",
    about = "Replays historical fund returns against inflation-indexed retirement withdrawals"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API.
    Serve(ServeArgs),
    /// Run one simulation request from a JSON file and print the report.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    #[arg(
        long,
        default_value = "data/prices",
        help = "Directory holding <ticker>.csv files with date and close columns"
    )]
    pub prices_dir: PathBuf,
    #[arg(
        long,
        help = "JSON fund catalog ([{\"name\", \"ticker\"}]); defaults to the built-in list"
    )]
    pub catalog: Option<PathBuf>,
}

impl DataArgs {
    pub fn load_catalog(&self) -> Result<FundCatalog, CatalogError> {
        match &self.catalog {
            Some(path) => FundCatalog::from_json_file(path),
            None => Ok(FundCatalog::builtin()),
        }
    }

    pub fn price_source(&self) -> CsvDirectorySource {
        CsvDirectorySource::new(&self.prices_dir)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,
    #[command(flatten)]
    pub data: DataArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long, help = "Path to a simulation request JSON file")]
    pub request: PathBuf,
    #[arg(long, help = "Pretty-print the JSON report")]
    pub pretty: bool,
    #[command(flatten)]
    pub data: DataArgs,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid request JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("server error: {0}")]
    Server(#[source] std::io::Error),
}

pub async fn serve(args: ServeArgs) -> Result<(), CliError> {
    let catalog = args.data.load_catalog()?;
    let state = AppState::new(Arc::new(catalog), Arc::new(args.data.price_source()));
    let addr = SocketAddr::new(args.bind, args.port);
    run_http_server(addr, state).await.map_err(CliError::Server)
}

/// Runs the request in `args.request` and returns the rendered JSON report.
pub fn simulate(args: &SimulateArgs) -> Result<String, CliError> {
    let raw = fs::read_to_string(&args.request).map_err(|source| CliError::Read {
        path: args.request.display().to_string(),
        source,
    })?;
    let request: SimulationRequest = serde_json::from_str(&raw)?;
    let catalog = args.data.load_catalog()?;
    let source = args.data.price_source();

    let report = run_simulation(request, &catalog, &source, Local::now().date_naive())?;
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    Ok(rendered)
}
