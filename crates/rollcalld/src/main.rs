use std::sync::Arc;

use anyhow::{Context, Result};
use rollcall_core::Recorder;
use rollcall_store::{Store, TemplateCipher};
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod config;
mod worker;

use api::AppState;
use auth::Auth;
use config::Config;
use worker::WorkerSettings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        template_dim = config.template_dim,
        late_cutoff = %config.late_cutoff,
        "configuration loaded"
    );

    let cipher = match &config.template_passphrase {
        Some(passphrase) => {
            tracing::info!("template key derived from passphrase");
            TemplateCipher::from_passphrase(passphrase)
        }
        None => TemplateCipher::load_or_create(&config.key_path).with_context(|| {
            format!("failed to load template key {}", config.key_path.display())
        })?,
    };

    let store = Store::open(&config.db_path, cipher)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let handle = worker::spawn_worker(
        store,
        WorkerSettings {
            match_threshold: config.match_threshold,
            template_dim: config.template_dim,
            recorder: Recorder::new(config.late_cutoff),
        },
    )?;

    let auth = Auth::new(
        &config.admin_user,
        config.admin_password.as_deref(),
        config.token_ttl_secs,
    );
    if !auth.login_enabled() {
        tracing::warn!("ROLLCALL_ADMIN_PASSWORD not set; API login is disabled");
    }

    let listen_addr = config.listen_addr;
    let state = Arc::new(AppState {
        store: handle,
        auth,
        config,
    });
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
