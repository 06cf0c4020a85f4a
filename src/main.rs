use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use vast_resolver::cache::DirectoryCache;
use vast_resolver::config::{DEFAULT_MAX_HOPS, ResolverConfig};
use vast_resolver::delivery::{HttpTrackerQueue, LoggingSink, TrackerSink};
use vast_resolver::fetch::{self, HttpFetcher};
use vast_resolver::selector::ScreenMetrics;
use vast_resolver::{VastManager, parse_vast};

/// VAST parser and wrapper-chain resolver
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a VAST file or URL
    Parse {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Pretty print the output
        #[arg(short, long)]
        pretty: bool,

        /// Print JSON instead of the debug representation
        #[arg(long)]
        json: bool,
    },

    /// Follow wrappers until a playable ad is found
    Resolve {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Pretty print the output
        #[arg(short, long)]
        pretty: bool,

        /// Print JSON instead of the debug representation
        #[arg(long)]
        json: bool,

        /// Maximum wrapper chain length
        #[arg(long, default_value_t = DEFAULT_MAX_HOPS)]
        max_hops: usize,

        #[arg(long, default_value_t = 1920)]
        screen_width: u32,

        #[arg(long, default_value_t = 1080)]
        screen_height: u32,

        #[arg(long, default_value_t = 1.0)]
        density: f32,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 3)]
        timeout_secs: u64,

        /// Media cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        #[arg(long)]
        dsp_creative_id: Option<String>,

        /// Log trackers instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_output<T: std::fmt::Debug + serde::Serialize>(
    value: &T,
    pretty: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match (json, pretty) {
        (true, true) => println!("{}", serde_json::to_string_pretty(value)?),
        (true, false) => println!("{}", serde_json::to_string(value)?),
        (false, true) => println!("{:#?}", value),
        (false, false) => println!("{:?}", value),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { input, pretty, json } => {
            let content = fetch::read_input(&input, Duration::from_secs(3)).await?;
            let result = parse_vast(&content);
            print_output(&result, pretty, json)?;
        }
        Commands::Resolve {
            input,
            pretty,
            json,
            max_hops,
            screen_width,
            screen_height,
            density,
            timeout_secs,
            cache_dir,
            dsp_creative_id,
            dry_run,
        } => {
            let timeout = Duration::from_secs(timeout_secs);
            let content = fetch::read_input(&input, timeout).await?;

            let config = ResolverConfig::default()
                .with_max_hops(max_hops)
                .with_screen(ScreenMetrics::new(screen_width, screen_height, density))
                .with_fetch_timeout(timeout);
            let cache_dir = cache_dir.unwrap_or_else(|| std::env::temp_dir().join("vast-resolver-cache"));
            let cache = DirectoryCache::open(cache_dir)?;
            let fetcher = HttpFetcher::new(timeout)?;

            let queue = if dry_run {
                None
            } else {
                Some(Arc::new(HttpTrackerQueue::spawn(timeout)?))
            };
            let sink: Arc<dyn TrackerSink> = match &queue {
                Some(queue) => Arc::clone(queue) as Arc<dyn TrackerSink>,
                None => Arc::new(LoggingSink),
            };

            let mut manager = VastManager::new(config, Arc::new(fetcher), sink, Arc::new(cache));
            let (tx, rx) = oneshot::channel();
            manager.prepare(content, dsp_creative_id, move |ad| {
                let _ = tx.send(ad);
            });
            let resolved = rx.await?;
            drop(manager);

            if let Some(queue) = &queue {
                queue.close().await;
            }

            match resolved {
                Some(ad) => print_output(&ad, pretty, json)?,
                None => {
                    info!("No playable ad in {}", input);
                    return Err("no playable ad".into());
                }
            }
        }
    }

    Ok(())
}
