//! Scanwatch - IP-camera barcode reader
//!
//! Reads barcodes from an MJPEG camera stream, debounces repeat sightings,
//! and records reads against a local product catalog.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanwatch::capture::MjpegFactory;
use scanwatch::catalog::Catalog;
use scanwatch::config::AppConfig;
use scanwatch::decode::ImageDecoder;
use scanwatch::paths;
use scanwatch::reader::{Reader, ScanOutcome};

/// Scanwatch - read barcodes from an IP camera into a product catalog
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Camera stream URL (overrides the config file)
    #[arg(long)]
    camera: Option<String>,

    /// Register a product code and exit
    #[arg(long, value_name = "CODE")]
    add_product: Option<String>,

    /// Product description for --add-product
    #[arg(long, default_value = "")]
    description: String,

    /// List cataloged products and exit
    #[arg(long)]
    list_products: bool,

    /// Show per-code reading totals and exit
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut config = AppConfig::load_or_default(Path::new(&args.config)).await?;
    if let Some(url) = args.camera {
        config.camera.url = url;
    }

    let data_dir = config.storage.path.clone().unwrap_or_else(paths::data_dir);
    paths::ensure_dir(&data_dir)?;
    let catalog = Arc::new(Catalog::open(paths::catalog_db_path(&data_dir))?);

    if let Some(code) = args.add_product {
        if catalog.add_product(&code, &args.description)? {
            info!("Product {} cataloged", code);
        } else {
            warn!("Product {} is already cataloged", code);
        }
        return Ok(());
    }

    if args.list_products {
        let products = catalog.products()?;
        if products.is_empty() {
            println!("No products cataloged yet");
        }
        for product in products {
            let description = if product.description.is_empty() {
                "(no description)"
            } else {
                &product.description
            };
            println!("{}\t{}", product.code, description);
        }
        return Ok(());
    }

    if args.stats {
        let stats = catalog.reading_stats()?;
        if stats.is_empty() {
            println!("No readings recorded yet");
        }
        for stat in stats {
            println!("{}\t{}\t{}", stat.total, stat.code, stat.description);
        }
        return Ok(());
    }

    run_reader(config, catalog).await
}

async fn run_reader(config: AppConfig, catalog: Arc<Catalog>) -> Result<()> {
    let factory = Arc::new(MjpegFactory::new(Duration::from_millis(
        config.camera.connect_timeout_ms,
    )));
    let reader = Reader::new(
        config.engine.settings(),
        factory,
        Arc::new(ImageDecoder),
        catalog,
    );
    let mut notices = reader
        .take_notice_receiver()
        .context("notice receiver already taken")?;

    reader.start(&config.camera.url).await?;
    info!("Scanning {} (Ctrl-C to stop)", config.camera.url);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            notice = notices.recv() => {
                let Some(notice) = notice else { break };
                match notice.outcome {
                    ScanOutcome::Read => info!("✅ {}", notice.detail),
                    ScanOutcome::Unregistered => warn!("⚠️  {}", notice.detail),
                    ScanOutcome::Error => {
                        error!("❌ {}", notice.detail);
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    reader.stop().await;
    info!("Scanwatch shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
