#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};
use rama::{
    Layer as RamaLayer,
    graceful::Shutdown,
    http::{layer::trace::TraceLayer, server::HttpServer},
    layer::ConsumeErrLayer,
    rt::Executor,
    tcp::server::TcpListener,
};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use capillary::{
    config::{Config, DEFAULT_CONFIG_FILE},
    proxy::RegistryProxy,
    upstream::UpstreamClient,
};
use capillary_adapter::{Cache, FilesystemCache};

#[derive(Debug, Parser)]
#[command(author, version, about = "Capillary npm and jsr caching proxy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the caching proxy server
    Serve(ServeArgs),
    /// Display statistics for the on-disk cache
    Stats {
        /// Path to the configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Perform a health check against a running proxy
    Health {
        /// URL of the health endpoint (defaults to local proxy)
        #[arg(long, default_value = "http://127.0.0.1:8000/up")]
        url: String,
        /// Timeout in seconds for the request
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Path to the configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Serve only what is already cached; misses become 404
    #[arg(long)]
    cached_only: bool,
    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
    /// Cache root directory
    #[arg(long)]
    cache_root: Option<PathBuf>,
    /// Disable the in-memory tier
    #[arg(long)]
    no_mem_cache: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if self.cached_only {
            config.cache.cached_only = true;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(root) = &self.cache_root {
            let cwd = std::env::current_dir().context("reading current directory")?;
            config.cache.root = root.clone();
            config.cache.normalize_paths(&cwd);
        }
        if self.no_mem_cache {
            config.cache.memory = false;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_server(args),
        Command::Stats { config } => run_stats(config),
        Command::Health { url, timeout } => run_health(url, timeout),
    }
}

fn run_server(args: ServeArgs) -> Result<()> {
    let mut config =
        Config::load(Some(args.config.clone())).context("loading configuration")?;
    args.apply(&mut config)?;
    config.validate().context("validating configuration")?;
    init_tracing(&config)?;
    let config = Arc::new(config);

    let rt_server = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("constructing server runtime")?;

    rt_server.block_on(async move {
        let cache = Cache::open(config.cache.options())
            .await
            .context("opening cache")?;
        tracing::info!(
            root = %config.cache.root.display(),
            memory = config.cache.memory,
            cached_only = config.cache.cached_only,
            "cache ready"
        );

        let proxy = RegistryProxy::new(config.clone(), Arc::new(cache), UpstreamClient::new());

        let graceful = Shutdown::default();
        let addr = format!("{}:{}", config.server.host, config.server.port);

        tracing::info!(%addr, "starting Rama HTTP server");

        graceful.spawn_task_fn(move |guard| {
            let proxy = proxy.clone();
            let addr = addr.clone();
            async move {
                let tcp_service = match TcpListener::build().bind(addr.clone()).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        tracing::error!(%addr, error = %err, "failed to bind listener");
                        return;
                    }
                };

                let exec = Executor::graceful(guard.clone());
                let http_service = HttpServer::auto(exec).service(
                    (TraceLayer::new_for_http(), ConsumeErrLayer::default()).into_layer(proxy),
                );

                tcp_service.serve_graceful(guard, http_service).await;
            }
        });

        tokio::signal::ctrl_c()
            .await
            .context("listening for shutdown signal")?;

        graceful
            .shutdown_with_limit(Duration::from_secs(30))
            .await?;

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn run_stats(config_path: PathBuf) -> Result<()> {
    let config = Config::load(Some(config_path)).context("loading configuration")?;
    init_tracing(&config)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("constructing stats runtime")?;

    let storage = rt
        .block_on(FilesystemCache::open(&config.cache.root))
        .context("opening cache directory")?;
    let stats = rt
        .block_on(storage.stats())
        .context("collecting cache stats")?;

    drop(rt);

    println!("Filesystem cache: {}", storage.root().display());
    println!("  entries: {}", stats.entries);
    println!("  total size: {}", format_bytes(stats.total_bytes));
    println!("  npm upstream: {}", config.registries.npm);
    println!("  jsr upstream: {}", config.registries.jsr);

    Ok(())
}

fn run_health(url: String, timeout: u64) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .context("building health check client")?;

    let response = client
        .get(&url)
        .send()
        .context("sending health check request")?;

    if response.status().is_success() {
        println!("Capillary healthy: {}", response.status());
        Ok(())
    } else {
        bail!("health endpoint returned status {}", response.status());
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("building log filter")?;

    let fmt_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        use opentelemetry_otlp::WithExportConfig;

        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", "capillary"),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?;

        let provider = sdktrace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        let tracer = provider.tracer("capillary");
        global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
