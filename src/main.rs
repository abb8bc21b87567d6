use forumgate::{
    bot::{self, TelegramClient},
    config::AppConfig,
    gate::{AuthGate, KeyPairProvider},
    web, AppError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up BOT_TOKEN and friends from .env when present
    let _ = dotenvy::dotenv();

    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forumgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ForumGate v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init()?;
    info!("Configuration loaded: forum {}", config.discourse.site_url);

    if config.telegram.bot_token.trim().is_empty() {
        error!("Telegram bot token not configured!");
        error!("Set BOT_TOKEN or FORUMGATE_TELEGRAM__BOT_TOKEN");
        return Err(anyhow::anyhow!("Telegram bot token not configured"));
    }
    if config.discourse.auth_redirect.is_none() {
        warn!("discourse.auth_redirect is not set; users must paste their key into the chat");
    }

    // Without a key pair no challenge can ever be answered
    let keys = KeyPairProvider::generate().map_err(AppError::from)?;

    let gate = Arc::new(AuthGate::from_config(config, keys)?);
    let sweeper = (config.gate.sweep_interval_secs > 0)
        .then(|| gate.spawn_sweeper(Duration::from_secs(config.gate.sweep_interval_secs)));

    let telegram = Arc::new(TelegramClient::new(&config.telegram)?);

    // Start web server in background
    let web_handle = if config.web.enabled {
        let state = web::AppState::new(gate.clone(), telegram.clone());
        let app = web::create_router(state);

        let web_addr = format!("{}:{}", config.web.host, config.web.port);
        let listener = TcpListener::bind(&web_addr).await?;
        info!("Web server listening on http://{}", web_addr);
        info!("Auth redirect endpoint: http://{}/auth/", web_addr);

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
            {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        info!("Web server disabled; only chat replies are accepted");
        None
    };

    let data = Arc::new(bot::Data {
        gate: gate.clone(),
        chat: telegram.clone(),
        config: config.telegram.clone(),
    });

    tokio::select! {
        result = bot::run_polling(telegram, data) => {
            if let Err(e) = result {
                error!("Telegram bot error: {}", e);
                return Err(anyhow::anyhow!("{}", e));
            }
        }
        _ = shutdown_signal() => {
            info!("Shutting down");
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    if let Some(web_handle) = web_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), web_handle).await;
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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
}
