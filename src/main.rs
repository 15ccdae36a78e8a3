use anyhow::Context;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use clap::Parser;
use dotenvy::dotenv;
use h265_converter::config::ConverterConfig;
use h265_converter::api::middleware::request_id::REQUEST_ID_HEADER;
use h265_converter::infrastructure::{encoder, storage};
use h265_converter::{AppState, create_app};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::signal;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port for the HTTP server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "h265_converter=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting H.265 converter...");

    // 2. Configuration & Infrastructure
    let config = ConverterConfig::from_env();
    info!(
        "⚙️  Config: Max Size={}MB, Upload Dir={}, Encoder={}",
        config.max_file_size / 1024 / 1024,
        config.upload_dir.display(),
        config.encoder_path.display()
    );

    storage::setup_storage(&config).await?;
    let runner = encoder::setup_encoder(&config).await;

    // 3. HTTP Service
    let state = AppState::new(config, runner);

    let app = create_app(state).layer(trace_layer());
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ Server listening on: http://{}", addr);
    info!("📖 Swagger UI documentation: http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal()?)
        .await?;

    info!("👋 Converter exited cleanly.");
    Ok(())
}

/// Request spans tagged with the caller's request id, plus one line per request and response
fn trace_layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    impl Fn(&Request<Body>) -> tracing::Span + Clone,
    impl Fn(&Request<Body>, &tracing::Span) + Clone,
    impl Fn(&Response, Duration, &tracing::Span) + Clone,
> {
    TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "convert_request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &Request<Body>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri().path());
        })
        .on_response(|response: &Response, latency: Duration, _span: &tracing::Span| {
            info!("📤 {} after {:?}", response.status(), latency);
        })
}

/// Resolves on Ctrl+C or SIGTERM. The SIGTERM handler is registered up front.
fn shutdown_signal() -> anyhow::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    Ok(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Ctrl+C handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("⌨️  Ctrl+C received, draining in-flight conversions...");
            },
            _ = terminate => {
                info!("💤 SIGTERM received, draining in-flight conversions...");
            },
        }
    })
}
