//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::config::{Credentials, Settings};
use crate::extract::{DedupIndex, EngineConfig, ExtractionEngine, LiveSearchSurface};
use crate::models::SearchQuery;
use crate::output::{unique_file_name, OutputSink};
use crate::scheduler::{KeywordScheduler, SchedulerConfig};
use crate::server::CommandServer;
use crate::session::{LoginAutomaton, SessionConfig, SessionManager, SessionStore};

#[derive(Parser)]
#[command(name = "tweetharvest")]
#[command(about = "Persistent browser-session tweet harvesting service")]
#[command(version)]
pub struct Cli {
    /// Config file (default: tweetharvest.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the harvesting server (browser session + command socket)
    Serve {
        /// Address to bind to (HOST:PORT)
        #[arg(long, env = "TWEETHARVEST_BIND")]
        bind: Option<String>,
    },

    /// One-shot harvest of the given keywords, then exit
    Scrape {
        /// Keywords to search for
        keywords: Vec<String>,
        /// Restrict searches to these handles (repeatable)
        #[arg(short = 'H', long = "handle")]
        handles: Vec<String>,
        /// Maximum scroll passes per search
        #[arg(long)]
        passes: Option<usize>,
        /// Output file (default: a unique name in the output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Query a running server's health
    Status {
        /// Server address (HOST:PORT)
        #[arg(long, env = "TWEETHARVEST_BIND")]
        bind: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => serve(settings, bind).await,
        Commands::Scrape {
            keywords,
            handles,
            passes,
            output,
        } => scrape(settings, keywords, handles, passes, output).await,
        Commands::Status { bind } => status(settings, bind).await,
    }
}

fn session_config(settings: &Settings) -> SessionConfig {
    SessionConfig {
        headless: settings.headless,
        page_timeout: Duration::from_secs(settings.page_timeout_secs),
        chrome_args: settings.chrome_args.clone(),
    }
}

fn engine_config(settings: &Settings) -> EngineConfig {
    EngineConfig {
        base_url: settings.base_url.clone(),
        max_passes: settings.max_passes,
        min_text_len: settings.min_text_len,
        settle: Duration::from_secs(settings.settle_secs),
        fingerprint: settings.fingerprint,
    }
}

/// Launch the browser and drive login, restoring and persisting cookies
/// around it.
async fn establish_session(settings: &Settings) -> Result<Arc<SessionManager>> {
    let credentials = Credentials::from_env();
    if credentials.is_none() {
        warn!(
            "{} / {} not set; falling back to manual login",
            Credentials::USERNAME_VAR,
            Credentials::PASSWORD_VAR
        );
    }

    let session = Arc::new(SessionManager::new(session_config(settings)));
    session.ensure().await?;

    let store = settings.cookies_file.as_ref().map(SessionStore::new);

    {
        let lease = session.lease().await?;

        if let Some(store) = &store {
            if store.exists() {
                if let Err(e) = store.restore(lease.page()).await {
                    warn!("Cookie restore failed, proceeding to fresh login: {}", e);
                }
            }
        }

        let automaton = LoginAutomaton::new(
            settings.base_url.clone(),
            Duration::from_secs(settings.login_timeout_secs),
        );
        automaton
            .login(&lease, credentials.as_ref(), settings.headless)
            .await
            .context("login failed")?;

        if let Some(store) = &store {
            if let Err(e) = store.save(lease.browser()).await {
                warn!("Cookie save failed: {}", e);
            }
        }
    }

    Ok(session)
}

async fn serve(settings: Settings, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| settings.bind.clone());

    println!("{} Setting up browser...", style(">").cyan());
    let session = establish_session(&settings).await?;
    println!("{} Logged in, session ready", style("+").green());

    let dedup = match &settings.dedup_file {
        Some(path) => Arc::new(DedupIndex::with_snapshot(path)?),
        None => Arc::new(DedupIndex::new()),
    };

    let scheduler = Arc::new(KeywordScheduler::new(
        Arc::clone(&session),
        dedup,
        SchedulerConfig {
            output_dir: settings.output_dir.clone(),
            keywords_file: settings.keywords_file.clone(),
            scrape_interval: Duration::from_secs(settings.scrape_interval_secs),
            engine: engine_config(&settings),
        },
    ));

    let server = CommandServer::new(Arc::clone(&scheduler), Arc::clone(&session));
    println!(
        "{} Command server on {} (actions: scrape, status, health)",
        style("+").green(),
        style(&bind).cyan()
    );

    tokio::select! {
        result = server.run(&bind) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\n{} Shutting down...", style("!").yellow());
        }
    }

    scheduler.shutdown().await;
    session.close().await;
    Ok(())
}

async fn scrape(
    settings: Settings,
    keywords: Vec<String>,
    handles: Vec<String>,
    passes: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    if keywords.iter().all(|k| k.trim().is_empty()) {
        bail!("at least one keyword is required");
    }

    let session = establish_session(&settings).await?;

    let mut engine_cfg = engine_config(&settings);
    if let Some(passes) = passes {
        engine_cfg.max_passes = passes;
    }
    let engine = ExtractionEngine::new(engine_cfg);
    let dedup = DedupIndex::new();

    let path = output
        .unwrap_or_else(|| settings.output_dir.join(unique_file_name(&keywords, &handles)));
    let mut sink = OutputSink::open(&path)?;
    println!("{} Writing to {}", style(">").cyan(), sink.file_name());

    let mut total = 0usize;
    for keyword in &keywords {
        let queries: Vec<SearchQuery> = if handles.is_empty() {
            vec![SearchQuery::new(keyword, None)?]
        } else {
            handles
                .iter()
                .map(|h| SearchQuery::new(keyword, Some(h.as_str())))
                .collect::<Result<_>>()?
        };

        for query in queries {
            info!("Searching '{}'", keyword);
            let records = {
                let lease = session.lease().await?;
                let mut surface = LiveSearchSurface::new(&lease);
                engine.extract(&mut surface, &query, &dedup).await?
            };
            let written = sink.append(&records, keyword, query.handle())?;
            total += written;
            println!(
                "{} {} new records for '{}'{}",
                style("+").green(),
                written,
                keyword,
                query
                    .handle()
                    .map(|h| format!(" (from {})", h))
                    .unwrap_or_default()
            );
        }
    }

    println!(
        "{} Done: {} records in {}",
        style("+").green(),
        style(total).bold(),
        sink.file_name()
    );

    session.close().await;
    Ok(())
}

async fn status(settings: Settings, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| settings.bind.clone());

    let mut stream = TcpStream::connect(&bind)
        .await
        .with_context(|| format!("failed to connect to {}", bind))?;

    stream.write_all(br#"{"action":"status"}"#).await?;
    stream.shutdown().await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    let body: serde_json::Value =
        serde_json::from_slice(&response).context("server returned invalid JSON")?;

    let running = body["success"].as_bool().unwrap_or(false);
    let ready = body["browser_ready"].as_bool().unwrap_or(false);
    let uptime = body["uptime"].as_f64().unwrap_or(0.0);

    let state = if running {
        style("running").green()
    } else {
        style("unreachable").red()
    };
    println!("server:        {}", state);
    println!(
        "browser ready: {}",
        if ready {
            style("yes").green()
        } else {
            style("no").red()
        }
    );
    println!("uptime:        {:.0}s", uptime);

    Ok(())
}
