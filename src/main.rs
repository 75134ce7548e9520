use anyhow::{Context, bail};
use blog_server::{
    AppState, SqliteRepository,
    config::{self, AppConfig, Env},
    create_router, password,
    repository::{Repository, RepositoryState},
    transfer,
};
use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Passwords shorter than this are refused by `adduser`.
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Parser)]
#[command(name = "blog-server")]
#[command(about = "A small self-hosted blog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh base64 session key for BLOG_SESSION_KEY
    Keygen,
    #[command(flatten)]
    Blog(BlogCommand),
}

/// Commands that need the configuration and the database.
#[derive(Subcommand)]
enum BlogCommand {
    /// Run the HTTP server (default)
    Serve,
    /// Create the database tables if they do not exist
    Install,
    /// Add a user; the password is read from BLOG_NEW_PASSWORD or stdin
    Adduser { email: String, fullname: String },
    /// Import pages from the .markdown files in a directory
    #[command(alias = "importdb")]
    Import { dir: PathBuf },
    /// Export every page as a .markdown file into a directory
    #[command(alias = "exportdb")]
    Export { dir: PathBuf },
}

/// main
///
/// Loads configuration and logging, then runs the requested subcommand.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();

    let command = match cli.command {
        Some(Commands::Keygen) => return keygen(),
        Some(Commands::Blog(command)) => command,
        None => BlogCommand::Serve,
    };

    let config = AppConfig::load();

    // 2. Logging Filter Setup
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "blog_server=debug,tower_http=info".into());

    // 3. Initialize Logging based on Environment
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    // 4. Database Initialization (SQLite)
    ensure_database_dir(&config.db_url)?;
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .with_context(|| format!("could not open database {}", config.db_url))?;
    let sqlite = SqliteRepository::new(pool);

    match command {
        BlogCommand::Install => {
            sqlite.install().await.context("could not install tables")?;
            println!("Database tables installed.");
            Ok(())
        }
        BlogCommand::Adduser { email, fullname } => add_user(&sqlite, &email, &fullname).await,
        BlogCommand::Import { dir } => {
            let summary = transfer::import_dir(&sqlite, &dir)
                .await
                .with_context(|| format!("could not import {}", dir.display()))?;
            println!(
                "Imported {} new and {} existing pages.",
                summary.inserted, summary.updated
            );
            Ok(())
        }
        BlogCommand::Export { dir } => {
            let count = transfer::export_dir(&sqlite, &dir)
                .await
                .with_context(|| format!("could not export to {}", dir.display()))?;
            println!("Exported {count} pages.");
            Ok(())
        }
        BlogCommand::Serve => serve(config, Arc::new(sqlite) as RepositoryState).await,
    }
}

fn keygen() -> anyhow::Result<()> {
    let mut key = [0u8; 32];
    getrandom::getrandom(&mut key).context("could not generate session key")?;
    println!("{}", config::encode_session_key(&key));
    Ok(())
}

async fn serve(config: AppConfig, repo: RepositoryState) -> anyhow::Result<()> {
    tracing::info!("Application starting in {:?} mode", config.env);

    // 5. Unified State Assembly
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(repo, config).context("invalid url prefix")?;

    // 6. Router and Server Startup
    let app = create_router(state);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("could not bind to {bind_addr}"))?;
    tracing::info!("Listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn add_user(repo: &SqliteRepository, email: &str, fullname: &str) -> anyhow::Result<()> {
    if !email.contains('@') {
        bail!("{email:?} is not an email address");
    }
    if repo.credential(email).await?.is_some() {
        bail!("a user with email {email} already exists");
    }

    let password = match std::env::var("BLOG_NEW_PASSWORD") {
        Ok(password) => password,
        Err(_) => {
            eprint!("Password: ");
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("could not read password")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.chars().count() < MIN_PASSWORD_LEN {
        bail!("password must be at least {MIN_PASSWORD_LEN} characters");
    }

    let hash = password::hash_password(&password)?;
    repo.add_user(email, fullname, &hash).await?;
    tracing::info!(%email, "user added");
    println!("User {email} added.");
    Ok(())
}

/// SQLite does not create missing parent directories.
fn ensure_database_dir(db_url: &str) -> anyhow::Result<()> {
    let Some(rest) = db_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let file = rest.split('?').next().unwrap_or(rest);
    if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("could not listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("could not listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
