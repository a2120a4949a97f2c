use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod registry;
mod routes;
mod services;
mod state;

use config::{AppConfig, Command};
use services::{
    storer::{LocalStorer, Storer},
    watermark::Watermark,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-manager with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    if command == Command::CleanTemp {
        return clean_temp(&cfg).await;
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    match command {
        Command::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(()); // exit after migration
        }
        Command::CreateUser(username) => {
            let token = Uuid::new_v4().simple().to_string();
            let repo = services::file_repository::FileRepository::new(db.clone());
            let user = repo
                .create_user(&username, &token)
                .await
                .with_context(|| format!("creating user {}", username))?;
            tracing::info!(user_id = user.id, "Created user {}", user.username);
            println!("{}", token);
            return Ok(());
        }
        Command::Serve | Command::CleanTemp => {}
    }

    // --- Initialize shared state ---
    let watermark = match &cfg.watermark {
        Some(path) => {
            let mark = Watermark::load(path, cfg.watermark_position, cfg.watermark_opacity)
                .with_context(|| format!("loading watermark {}", path.display()))?;
            tracing::info!("Watermarking uploads with {}", path.display());
            Some(mark)
        }
        None => None,
    };
    let state = state::AppState::new(&cfg, db, watermark);

    // --- Build router ---
    let files_route = cfg.files_route();
    let app: Router = routes::routes::routes(&state, files_route.as_deref()).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Remove the unbound (`{key}/0/`) folder of every upload category.
async fn clean_temp(cfg: &AppConfig) -> Result<()> {
    let storer: Arc<dyn Storer> = Arc::new(LocalStorer::new(&cfg.storage_dir, &cfg.base_url));
    let registry = registry::subdir::SubdirRegistry::with_defaults();

    registry
        .clean_temp_files(&cfg.temp_prefix, |dir| {
            let storer = storer.clone();
            async move {
                tracing::info!("Removing temporary folder {}", dir);
                storer.delete_dir(&dir).await
            }
        })
        .await?;

    tracing::info!("Temporary folders cleaned.");
    Ok(())
}
