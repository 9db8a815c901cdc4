use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use uuid::Uuid;

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod health;
pub mod message;
pub mod metrics;
pub mod rate_limit;
pub mod rooms;
pub mod session;
pub mod token_store;
pub mod utils;

use auth::TokenService;
use config::Config;
use context::AppContext;
use fanout::FanoutAdapter;
use handlers::handle_websocket;
use rate_limit::RateLimiter;
use rooms::InMemoryConversationDirectory;
use session::SessionRegistry;
use token_store::{InMemoryTokenStore, TokenStore};

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

async fn http_handler(req: Request<IncomingBody>, fanout: Arc<FanoutAdapter>) -> HttpResult {
    let response = match req.uri().path() {
        "/health" => match health::health_check(&fanout).await {
            Ok(_) => Response::new(Full::new(Bytes::from("OK"))),
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                let mut res = Response::new(Full::new(Bytes::from("Service Unavailable")));
                *res.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                res
            }
        },
        "/metrics" => match metrics::gather_metrics() {
            Ok(metrics_data) => {
                let mut res = Response::new(Full::new(Bytes::from(metrics_data)));
                res.headers_mut()
                    .insert("Content-Type", "text/plain; version=0.0.4".parse().unwrap());
                res
            }
            Err(e) => {
                tracing::error!("Failed to gather metrics: {}", e);
                let mut res = Response::new(Full::new(Bytes::from("Internal Server Error")));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        },
        _ => {
            let mut not_found = Response::new(Full::new(Bytes::from("Not Found")));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            not_found
        }
    };
    Ok(response)
}

pub async fn run_http_server(config: Arc<Config>, fanout: Arc<FanoutAdapter>) -> Result<()> {
    let http_addr = format!("0.0.0.0:{}", config.health_port);
    let listener = TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP server listening on http://{}", http_addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let fanout = fanout.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| http_handler(req, fanout.clone()));

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Error serving HTTP connection: {:?}", err);
            }
        });
    }
}

pub async fn run_websocket_server(ctx: AppContext, listener: TcpListener) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to accept socket: {}", e);
                continue;
            }
        };

        let ctx = ctx.clone();

        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(socket).await {
                Ok(ws_stream) => handle_websocket(ws_stream, addr, ctx).await,
                Err(e) => tracing::debug!("WebSocket upgrade failed for {}: {}", addr, e),
            }
        });
    }
}

/// Periodic housekeeping: prunes expired registry/blacklist entries and idle
/// rate-limit keys, bounding memory growth.
pub async fn run_sweeper(
    interval: Duration,
    store: Arc<dyn TokenStore>,
    limiters: Vec<Arc<RateLimiter>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick fires immediately
    loop {
        ticker.tick().await;
        let removed = store.sweep_expired(chrono::Utc::now().timestamp()).await;
        for limiter in &limiters {
            limiter.sweep();
        }
        if removed > 0 {
            tracing::debug!(removed, "Swept expired token entries");
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Token lifecycle: in-memory registry/blacklist. Multi-process
    // deployments must externalize this store behind the TokenStore trait.
    let token_store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
    let tokens = Arc::new(TokenService::new(&config, token_store.clone())?);

    let auth_limiter = Arc::new(RateLimiter::from_config(&config.auth_rate_limit));
    let sensitive_limiter = Arc::new(RateLimiter::from_config(&config.sensitive_rate_limit));

    let registry = Arc::new(SessionRegistry::new());

    // Membership directory: the embedding deployment substitutes its
    // relational store behind the same trait.
    let directory = Arc::new(InMemoryConversationDirectory::new());

    let instance_id = Uuid::new_v4().to_string();
    let fanout = Arc::new(FanoutAdapter::connect(&config, instance_id.clone()).await);
    fanout.spawn_subscriber(registry.clone());

    let ctx = AppContext::new(
        config.clone(),
        tokens,
        auth_limiter.clone(),
        sensitive_limiter.clone(),
        registry,
        directory,
        fanout.clone(),
        instance_id,
    );

    let bind_address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("Courier server listening on {} (WebSocket)", bind_address);

    tokio::spawn(run_sweeper(
        Duration::from_secs(config.sweep_interval_secs),
        token_store,
        vec![auth_limiter, sensitive_limiter],
    ));

    let websocket_server = run_websocket_server(ctx, listener);
    let http_server = run_http_server(config, fanout);

    tokio::select! {
        _ = websocket_server => {
            tracing::info!("WebSocket server shut down.");
        },
        res = http_server => {
            if let Err(e) = res {
                tracing::error!("HTTP server failed: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Shutting down...");
        }
    }

    Ok(())
}
