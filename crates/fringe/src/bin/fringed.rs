//! fringed - archive daemon.
//!
//! Serves an integration-period archive over the TCP query protocol.
//! The acquisition pipeline feeds the same store in-process in a full
//! deployment; run standalone, fringed serves whatever the archive
//! directory already holds.

use clap::Parser;
use fringe::net::{QueryService, Server, SiteInfo};
use fringe::{StoreConfig, TimeSeriesStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "fringed", about = "Integration-period archive server")]
struct Args {
    /// Archive root directory.
    #[arg(long)]
    root: PathBuf,

    /// Separate archive holding raw-audio records, if one is kept.
    #[arg(long)]
    raw_root: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:31234")]
    listen: String,

    /// Site longitude in degrees, east positive.
    #[arg(long, default_value_t = 0.0)]
    longitude: f64,

    /// Site latitude in degrees, north positive.
    #[arg(long, default_value_t = 0.0)]
    latitude: f64,

    /// Raw audio sample rate in Hz.
    #[arg(long, default_value_t = 8000)]
    sample_rate: u32,

    /// Delete data older than this many days; 0 keeps everything.
    #[arg(long, default_value_t = 0)]
    max_age_days: u64,

    /// Records batched in memory before each flush.
    #[arg(long, default_value_t = 5)]
    write_buffer: usize,

    /// Recent records cached in memory.
    #[arg(long, default_value_t = 5)]
    cache: usize,
}

fn main() -> fringe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fringe=debug,fringed=debug".into()),
        )
        .init();

    let args = Args::parse();

    let max_age = (args.max_age_days > 0)
        .then(|| Duration::from_secs(args.max_age_days * 86_400));
    let config = StoreConfig::default()
        .with_write_buffer_size(args.write_buffer)
        .with_cache_size(args.cache)
        .with_max_age(max_age);

    let store = Arc::new(TimeSeriesStore::new(&args.root, config.clone()));
    let raw_store = args
        .raw_root
        .as_ref()
        .map(|root| Arc::new(TimeSeriesStore::new(root, config)));

    let site = SiteInfo {
        longitude: args.longitude,
        latitude: args.latitude,
        sample_rate: args.sample_rate,
    };

    let service = Arc::new(QueryService::new(store, raw_store, site));
    let server = Server::bind(args.listen.as_str(), service)?;
    debug!(addr = %server.local_addr()?, "listening");
    server.run()
}
