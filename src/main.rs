use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use vespa_sync::AppState;
use vespa_sync::config::Config;
use vespa_sync::db;
use vespa_sync::handlers;
use vespa_sync::middleware::{AuthState, auth_middleware};
use vespa_sync::models;
use vespa_sync::services::sync_orchestrator::SyncTuning;
use vespa_sync::services::{
    Aggregator, Linker, Loader, RateLimiter, RefreshService, SourceCrmClient, SyncOrchestrator,
};
use vespa_sync::utils::ScheduledExecutor;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::refresh::refresh, handlers::health::health),
    components(schemas(
        models::RefreshRequest,
        models::RefreshResponse,
        handlers::health::HealthResponse,
    )),
    tags(
        (name = "Refresh", description = "Manual single-establishment sync"),
        (name = "Health", description = "Liveness/readiness"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let (config, cli_args) = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name =
            log_path.file_name().and_then(|n| n.to_str()).unwrap_or("vespa-sync.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();

        run(config, cli_args).await
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        run(config, cli_args).await
    }
}

async fn run(
    config: Config,
    cli_args: vespa_sync::config::CommandLineArgs,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing::info!("vespa-sync starting up");
    tracing::info!("Configuration loaded successfully");

    let pool = db::create_pool(&config.warehouse.url).await?;
    tracing::info!("Warehouse pool created successfully");

    let rate_limiter = Arc::new(RateLimiter::new(
        config.source.rate_limit_per_sec,
        config.source.rate_limit_burst,
    ));
    let source = SourceCrmClient::new(
        config.source.base_url.clone(),
        config.source.app_id.clone(),
        config.source.api_key.clone(),
        Arc::clone(&rate_limiter),
    )?;

    let linker = Arc::new(Linker::new());
    linker.warm(&pool).await?;
    tracing::info!("Linker cache warmed from warehouse");

    let loader = Loader::new(pool.clone());
    let aggregator = Aggregator::new(pool.clone());

    let tuning = SyncTuning {
        page_size: config.sync.page_size,
        establishment_batch_size: config.sync.batch_size_establishment,
        student_batch_size: config.sync.batch_size_student,
        vespa_score_batch_size: config.sync.batch_size_vespa_score,
        question_response_batch_size: config.sync.batch_size_question_response,
        checkpoint_dir: config.sync.checkpoint_dir.clone().into(),
        report_dir: config.sync.report_dir.clone().into(),
    };

    let orchestrator = Arc::new(SyncOrchestrator::new(
        pool.clone(),
        source,
        Arc::clone(&linker),
        loader,
        aggregator,
        tuning,
    ));

    if cli_args.once {
        tracing::info!("Running a single full sync in the foreground (--once)");
        let report = orchestrator.run_full_sync(tokio_util::sync::CancellationToken::new()).await;
        return Ok(match report {
            Ok(report) => ExitCode::from(match report.status.as_str() {
                "completed" => 0,
                "partial" => 2,
                _ => 1,
            }),
            Err(e) => {
                tracing::error!("Full sync failed: {}", e);
                ExitCode::from(1)
            },
        });
    }

    let refresh_service = Arc::new(RefreshService::new(Arc::clone(&orchestrator)));

    let app_state = Arc::new(AppState {
        db: pool.clone(),
        refresh_service: Arc::clone(&refresh_service),
        refresh_bearer_token: config.refresh.bearer_token.clone(),
    });

    let scheduled_orchestrator = Arc::clone(&orchestrator);
    let executor =
        ScheduledExecutor::new("full-sync", Duration::from_secs(config.sync.interval_secs));
    let scheduler_shutdown = executor.shutdown_handle();
    tokio::spawn(async move {
        executor.start(scheduled_orchestrator).await;
    });
    tracing::info!("Scheduled full sync started (every {}s)", config.sync.interval_secs);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, stopping scheduled full sync");
            scheduler_shutdown.shutdown();
        }
    });

    let auth_state = AuthState { bearer_token: config.refresh.bearer_token.clone() };

    let refresh_router = Router::new()
        .route("/refresh", post(handlers::refresh::refresh))
        .route_layer(axum_middleware::from_fn_with_state(auth_state, auth_middleware));

    let app = Router::new()
        .merge(refresh_router)
        .route("/health", get(handlers::health::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await?;
    tracing::info!("Listening on {}:{}", config.server.host, config.server.port);
    axum::serve(listener, app).await?;

    Ok(ExitCode::SUCCESS)
}
