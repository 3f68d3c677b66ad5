//! Query command: runs one bounding-box request against a JSON file source.
//!
//! ```text
//! geocache query --source stations.json --bbox 52.4,13.3,52.6,13.5 --param kind=station
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use geocache::config::ConfigFile;
use geocache::coord::GeoBounds;
use geocache::executor::WorkerPool;
use geocache::source::{JsonFileSource, PointFeature, QueryFilter};
use geocache::{AbortReason, BBoxCallback, DataCache};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::info;

use super::common::{parse_bbox, parse_param};
use crate::error::CliError;

/// How long shutdown waits on fetches still running after the answer.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Arguments of `geocache query`.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// JSON file with point features
    #[arg(long)]
    pub source: PathBuf,

    /// Bounding box as south,west,north,east in degrees
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: GeoBounds,

    /// Tile zoom level (overrides config)
    #[arg(long)]
    pub zoom: Option<u8>,

    /// Number of concurrent fetches (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Filter parameter, repeatable
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Artificial per-fetch delay in milliseconds
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Refetch tiles even if cached
    #[arg(long)]
    pub force: bool,
}

enum QueryEvent {
    Data(Vec<Arc<PointFeature>>),
    Aborted(AbortReason),
}

/// Feeds the progress bar and forwards the final outcome.
struct QueryProgress {
    bar: ProgressBar,
    tx: UnboundedSender<QueryEvent>,
}

impl BBoxCallback<PointFeature> for QueryProgress {
    fn on_progress_update(&self, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
    }

    fn on_receive_data_update(&self, _bounds: &GeoBounds, data: Vec<Arc<PointFeature>>) {
        let _ = self.tx.send(QueryEvent::Data(data));
    }

    fn on_abort(&self, _bounds: &GeoBounds, reason: AbortReason) {
        let _ = self.tx.send(QueryEvent::Aborted(reason));
    }
}

/// Runs the query command.
pub fn run(args: QueryArgs, config: ConfigFile) -> Result<(), CliError> {
    let mut cache_config = config.cache;
    if let Some(zoom) = args.zoom {
        cache_config = cache_config.with_zoom(zoom);
    }
    if let Some(workers) = args.workers {
        cache_config = cache_config.with_workers(workers);
    }
    let range = args.bbox.tile_range(cache_config.zoom)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::RuntimeCreation(e.to_string()))?;
    let pool = WorkerPool::new(runtime.handle().clone(), cache_config.workers)?;

    let mut source = JsonFileSource::new(&args.source);
    if let Some(ms) = args.latency_ms {
        source = source.with_latency(Duration::from_millis(ms));
    }
    let filter = args
        .params
        .into_iter()
        .fold(QueryFilter::new(), |filter, (key, value)| {
            filter.with_param(key, value)
        });

    let cache = DataCache::new(source, filter, cache_config, pool)?;

    println!(
        "{} {} ({} tiles at zoom {})",
        style("Querying").cyan().bold(),
        args.bbox,
        range.len(),
        cache.zoom()
    );

    let bar = progress_bar(range.len() as u64);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback = Arc::new(QueryProgress {
        bar: bar.clone(),
        tx,
    });
    let handle = cache.get_data_by_bbox(args.bbox, callback, args.force);

    let result = match runtime.block_on(rx.recv()) {
        Some(QueryEvent::Data(features)) => {
            bar.finish_and_clear();
            print_features(&features);
            let stats = cache.stats();
            info!(features = features.len(), %stats, "Query finished");
            println!(
                "{} {} feature(s), {} fetch(es)",
                style("Done:").green().bold(),
                features.len(),
                stats.fetches_succeeded
            );
            Ok(())
        }
        Some(QueryEvent::Aborted(reason)) => {
            bar.abandon();
            handle.cancel();
            Err(CliError::QueryAborted(reason))
        }
        None => {
            bar.abandon();
            Err(CliError::QueryAborted(AbortReason::Unknown))
        }
    };

    drop(cache);
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    let template = ProgressStyle::with_template("{spinner} [{bar:40.cyan/blue}] {pos}/{len} tiles")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(template.progress_chars("=> "));
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_features(features: &[Arc<PointFeature>]) {
    let mut sorted: Vec<&PointFeature> = features.iter().map(Arc::as_ref).collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    for feature in sorted {
        println!(
            "{}  {:>10.5} {:>11.5}  {}",
            style(&feature.id).bold(),
            feature.lat,
            feature.lon,
            style(format_properties(feature)).dim()
        );
    }
}

fn format_properties(feature: &PointFeature) -> String {
    let mut keys: Vec<&String> = feature.properties.keys().collect();
    keys.sort();
    keys.into_iter()
        .filter_map(|key| {
            feature
                .property_str(key)
                .map(|value| format!("{}={}", key, value))
        })
        .collect::<Vec<_>>()
        .join(" ")
}
