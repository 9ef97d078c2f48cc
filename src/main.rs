use std::{sync::Arc, time::Duration};

use alldl_proxy::{
    config::{LogFormat, Settings},
    history::{HistoryStore, JsonFileStore, MemoryStore, RecentHistory},
    normalize::DownloadResult,
    query::{Lookup, ProxyClient, QuerySource, run_query},
    server,
    upstream::UpstreamClient,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const PROXY_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP proxy in front of the AllDL API
    Serve {
        /// Address to bind, overrides APP_ADDR / PORT
        #[arg(long)]
        addr: Option<String>,
        /// Upstream base URL, overrides ALLDL_UPSTREAM_URL
        #[arg(long)]
        upstream: Option<String>,
    },
    /// Resolve the download options for a post or video URL
    Lookup {
        url: String,
        /// Resolve through a running proxy endpoint instead of the API
        #[arg(long)]
        proxy: Option<String>,
        /// Upstream base URL, overrides ALLDL_UPSTREAM_URL
        #[arg(long)]
        upstream: Option<String>,
        /// Print the normalized result as JSON
        #[arg(long)]
        json: bool,
        /// Print only the URL of the n-th option (1-based)
        #[arg(long)]
        pick: Option<usize>,
    },
    /// Show recent lookups
    History {
        /// Forget all recent lookups
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let settings = Settings::from_env();
    init_tracing(settings.log_format);

    if let Err(error) = run(args, settings).await {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("alldl_proxy=info,tower_http=info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

async fn run(args: Args, mut settings: Settings) -> Result<()> {
    match args.command {
        Command::Serve { addr, upstream } => {
            if let Some(addr) = addr {
                settings.bind_addr = addr;
            }
            if let Some(upstream) = upstream {
                settings.upstream_url = upstream;
            }
            server::serve(&settings).await
        }
        Command::Lookup {
            url,
            proxy,
            upstream,
            json,
            pick,
        } => {
            if let Some(upstream) = upstream {
                settings.upstream_url = upstream;
            }
            lookup(&settings, &url, proxy.as_deref(), json, pick).await
        }
        Command::History { clear } => history(&settings, clear).await,
    }
}

async fn lookup(
    settings: &Settings,
    url: &str,
    proxy: Option<&str>,
    json: bool,
    pick: Option<usize>,
) -> Result<()> {
    let source = match proxy {
        Some(endpoint) => QuerySource::Proxy(
            ProxyClient::new(endpoint, settings.upstream_timeout + PROXY_TIMEOUT_MARGIN)
                .context("Invalid proxy endpoint")?,
        ),
        None => QuerySource::Direct(
            UpstreamClient::new(&settings.upstream_url, settings.upstream_timeout)
                .context("Invalid upstream configuration")?,
        ),
    };

    let lookup = run_query(&source, url).await?;

    let mut recent = RecentHistory::load(history_store(settings), settings.history_limit).await;
    recent.add(lookup.history_entry()).await;

    if let Some(index) = pick {
        let Some(option) = index
            .checked_sub(1)
            .and_then(|position| lookup.result.options.get(position))
        else {
            bail!(
                "Option {index} does not exist, {} available",
                lookup.result.options.len()
            );
        };
        println!("{}", option.url);
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&lookup.result)?);
    } else {
        print_lookup(&lookup);
    }

    Ok(())
}

fn print_lookup(lookup: &Lookup) {
    let DownloadResult {
        platform,
        title,
        thumbnail,
        options,
        ..
    } = &lookup.result;

    println!("{}", title.as_deref().unwrap_or(&lookup.url));
    if let Some(platform) = platform {
        println!("Platform:  {platform}");
    }
    if let Some(thumbnail) = thumbnail {
        println!("Thumbnail: {thumbnail}");
    }

    if options.is_empty() {
        println!(
            "No download options were returned for this link. Try another URL or a different post/video."
        );
        return;
    }

    for (position, option) in options.iter().enumerate() {
        let kind = option.kind.as_str().to_uppercase();
        match &option.size {
            Some(size) => println!("{:>3}. [{kind}] {} ({size})", position + 1, option.label),
            None => println!("{:>3}. [{kind}] {}", position + 1, option.label),
        }
        println!("     {}", option.url);
    }
}

async fn history(settings: &Settings, clear: bool) -> Result<()> {
    let mut recent = RecentHistory::load(history_store(settings), settings.history_limit).await;

    if clear {
        recent.clear().await;
        println!("Recent lookups cleared");
        return Ok(());
    }

    if recent.items().is_empty() {
        println!("No recent lookups");
        return Ok(());
    }

    for entry in recent.items() {
        let at = entry.at.format("%Y-%m-%d %H:%M");
        let label = entry.title.as_deref().unwrap_or(&entry.url);
        match &entry.platform {
            Some(platform) => println!("{at}  [{platform}] {label}"),
            None => println!("{at}  {label}"),
        }
        println!("     {}", entry.url);
    }

    Ok(())
}

fn history_store(settings: &Settings) -> Arc<dyn HistoryStore> {
    match &settings.history_path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => {
            warn!("No data directory available, recent lookups will not be kept");
            Arc::new(MemoryStore::default())
        }
    }
}
