use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use podtail_k8s::KubeLogSource;
use podtail_logs::{LogObserver, LogSession};
use podtail_types::SessionOptions;

mod config;
mod screen;

use config::Config;
use screen::ScreenObserver;

/// Podtail - live, filterable log tailing for Kubernetes pods
#[derive(Parser, Debug)]
#[command(name = "podtail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pod to tail, as NAMESPACE/POD or POD (default namespace)
    #[arg(value_name = "PATH")]
    path: String,

    /// Container to tail
    #[arg(short, long)]
    container: Option<String>,

    /// Container used when --container is not given
    #[arg(long)]
    default_container: Option<String>,

    /// Tail every container of the pod
    #[arg(short = 'A', long)]
    all_containers: bool,

    /// Maximum number of buffered lines
    #[arg(long)]
    lines: Option<usize>,

    /// Milliseconds between screen updates
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Only show logs newer than this many seconds
    #[arg(long)]
    since: Option<i64>,

    /// Show logs of the previous container instance
    #[arg(short, long)]
    previous: bool,

    /// Prefix lines with their timestamp
    #[arg(long)]
    timestamps: bool,

    /// Case-insensitive filtering
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Initial filter: REGEX, !REGEX (inverted) or "-f TERM" (fuzzy)
    #[arg(short, long, allow_hyphen_values = true)]
    filter: Option<String>,

    /// Kubernetes context name (defaults to the current context)
    #[arg(long)]
    context: Option<String>,

    /// TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    /// Overlay command-line flags on the config file's session options
    fn session_options(&self, mut opts: SessionOptions) -> SessionOptions {
        opts.path = self.path.clone();
        if let Some(container) = &self.container {
            opts.container = container.clone();
        }
        if let Some(default_container) = &self.default_container {
            opts.default_container = default_container.clone();
        }
        if let Some(lines) = self.lines {
            opts.capacity = lines;
        }
        if let Some(ms) = self.interval_ms {
            opts.notification_interval = Duration::from_millis(ms);
        }
        if self.since.is_some() {
            opts.since_seconds = self.since;
        }
        opts.previous |= self.previous;
        opts.show_timestamps |= self.timestamps;
        opts.case_insensitive |= self.ignore_case;
        opts
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they don't fight with the repainted view
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    let options = args.session_options(config.session);

    let source = KubeLogSource::connect(args.context.as_deref()).await?;

    let session = LogSession::new(options);
    session
        .init(Arc::new(source))
        .context("Invalid session configuration")?;
    if args.all_containers && !session.container().is_empty() {
        session.toggle_all_containers();
    }
    if let Some(expr) = &args.filter {
        session.filter(expr).context("Invalid --filter")?;
    }

    let screen = Arc::new(ScreenObserver::new());
    let observer: Arc<dyn LogObserver> = screen.clone();
    session.add_observer(&observer);

    let cancel = CancellationToken::new();
    session.start(&cancel)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            screen.terminated().await;
        }
        _ = screen.terminated() => {}
    }

    session.stop();
    Ok(())
}
