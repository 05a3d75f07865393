use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use videome::auth::build_auth_client;
use videome::config::AppConfig;
use videome::gateway::build_gateway;
use videome::openapi::ApiDoc;
use videome::storage::build_media_store;
use videome::upload::FfmpegFrameGrabber;
use videome::{config, AppState, SecurityHeaders};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // .env only in debug builds; deployments set the environment themselves
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping VideoMe server");
    let app_config = AppConfig::from_env();
    if !app_config.is_configured() {
        warn!(missing = ?app_config.missing, "backend not configured; every page will show the setup guide");
    }
    if app_config.jwt_secret.is_none() {
        info!("SUPABASE_JWT_SECRET not set; tokens are verified against the auth service");
    }

    if let Some(addr) = app_config.metrics_addr {
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => info!(%addr, "Prometheus exporter listening"),
            Err(e) => error!(error = %e, "failed to install Prometheus exporter"),
        }
    }

    let state = AppState {
        gateway: build_gateway(&app_config),
        store: build_media_store(&app_config).await,
        auth: build_auth_client(&app_config),
        frames: Arc::new(FfmpegFrameGrabber::new(&app_config.ffmpeg_path, &app_config.ffprobe_path)),
        config: app_config.clone(),
    };
    let openapi = ApiDoc::openapi();
    info!("OpenAPI document generated");

    let bind_addr = app_config.bind_addr.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&app_config.frontend_url)
            // Vite dev server
            .allowed_origin("http://localhost:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_config(&app_config))
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind_addr)?;

    info!("Listening on http://{bind_addr}");
    server.run().await
}
