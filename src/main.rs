use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use rust_image_resizer::config::{ResizeConfig, StorageConfig};
use rust_image_resizer::infrastructure::storage;
use rust_image_resizer::models::{BucketNotification, Outcome};
use rust_image_resizer::services::pipeline::Pipeline;
use rust_image_resizer::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive bucket notifications over HTTP
    Serve {
        /// Port for the webhook server
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
    /// Process a single notification and exit
    Invoke {
        /// Notification JSON file, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        event: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_image_resizer=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let resize_config = ResizeConfig::from_env();
    let storage_config = StorageConfig::from_env();
    info!(
        "🖼️  Resize Config: Width={}px, Tag={}, Deadline={:?}, Cleanup on failure={}",
        resize_config.target_width,
        resize_config.size_tag,
        resize_config.deadline,
        resize_config.cleanup_on_failure
    );

    let storage_service = storage::setup_storage(&storage_config).await;
    let pipeline = Arc::new(Pipeline::new(
        storage_service.clone(),
        storage_service,
        resize_config,
    ));

    match args.command {
        Command::Serve { port } => serve(pipeline, port).await,
        Command::Invoke { event } => invoke(pipeline, &event).await,
    }
}

async fn serve(pipeline: Arc<Pipeline>, port: u16) -> anyhow::Result<()> {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(AppState { pipeline }).layer(trace_layer);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ Webhook listening on: http://0.0.0.0:{}/events", port);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Resizer exited cleanly.");
    Ok(())
}

async fn invoke(pipeline: Arc<Pipeline>, event: &str) -> anyhow::Result<()> {
    let raw = if event == "-" {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        raw
    } else {
        tokio::fs::read_to_string(event)
            .await
            .with_context(|| format!("reading notification from {}", event))?
    };

    let notification: BucketNotification =
        serde_json::from_str(&raw).context("parsing bucket notification")?;

    match pipeline.handle_notification(&notification).await {
        Outcome::Uploaded(uploaded) => {
            println!("{}", serde_json::to_string_pretty(&uploaded)?);
            Ok(())
        }
        Outcome::Skipped(reason) => {
            info!("⏭️  Skipped: {}", reason);
            Ok(())
        }
        Outcome::Failed(e) => {
            error!("❌ {}", e.reason());
            anyhow::bail!(e.reason())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
