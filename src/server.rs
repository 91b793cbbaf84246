use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::Request,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    cache::DatasetCache,
    config::Config,
    recommend::RecommendationBander,
    routes::{
        batch_rank_handler, clear_cache_handler, health_handler, rank_handler,
        recommend_handler, stats_handler, trend_handler, years_handler,
    },
};

static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
static PROCESS_TIME: HeaderName = HeaderName::from_static("x-process-time");

pub struct AppState {
    pub config: Config,
    pub cache: DatasetCache,
    pub bander: RecommendationBander,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool) -> Arc<Self> {
        let cache = DatasetCache::new(
            pool,
            config.score_bounds,
            config.default_year,
            config.cache_ttl,
        );
        let bander = RecommendationBander::new(config.max_rank, config.bands);

        Arc::new(Self {
            config,
            cache,
            bander,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, REQUEST_ID.clone()])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/rank", post(rank_handler))
        .route("/rank/batch", post(batch_rank_handler))
        .route("/recommend", post(recommend_handler))
        .route("/stats", get(stats_handler))
        .route("/years", get(years_handler))
        .route("/trend", get(trend_handler))
        .route("/health", get(health_handler))
        .route("/cache/clear", post(clear_cache_handler))
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let request_id = req
        .headers()
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID.clone(), value);
    }

    let mut resp = next.run(req).await;
    let elapsed = started.elapsed();

    info!(
        method = %method,
        path = %path,
        status = resp.status().as_u16(),
        request_id = %request_id,
        latency_ms = elapsed.as_millis() as u64,
        "request"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{:.2}ms", elapsed.as_secs_f64() * 1000.0)) {
        resp.headers_mut().insert(PROCESS_TIME.clone(), value);
    }

    resp
}

pub async fn start_server(config: Config, pool: SqlitePool) -> anyhow::Result<()> {
    info!("Initializing state...");
    let state = AppState::new(config, pool);

    // Load eagerly so a broken database fails at startup, not on first request.
    let dataset = state.cache.get().await?;
    if dataset.resolver.years().is_empty() {
        tracing::warn!("No score records loaded; run `import-scores` or `seed` first");
    }

    let address = state.config.address();
    let app = router(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
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

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::StatusCode,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::db;

    async fn app() -> Router {
        let pool = db::memory_pool().await;
        db::seed(&pool).await.unwrap();
        let config = Config::from_lookup(|_| None).unwrap();
        router(AppState::new(config, pool))
    }

    async fn post(
        app: &Router,
        path: &str,
        body: &str,
        request_id: &str,
    ) -> (StatusCode, String, Value) {
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .header(REQUEST_ID.clone(), request_id)
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let echoed = response
            .headers()
            .get(&REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(response.headers().contains_key(&PROCESS_TIME));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, echoed, json)
    }

    #[tokio::test]
    async fn rank_route_answers_and_echoes_request_id() {
        let app = app().await;
        let (status, echoed, body) = post(&app, "/rank", r#"{"score":650}"#, "abc").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(echoed, "abc");
        assert_eq!(body["year"], 2024);
        assert_eq!(body["scope"], "city");
        assert!(body["rank"].as_u64().unwrap() >= 1);
        assert!(body["inner_rank"].as_u64().is_some());
    }

    #[tokio::test]
    async fn rank_route_maps_errors_to_status_and_code() {
        let app = app().await;
        let cases = [
            (r#"{"score":900}"#, StatusCode::BAD_REQUEST, "INVALID_SCORE"),
            (r#"{"score":650,"year":1999}"#, StatusCode::NOT_FOUND, "NO_DATA"),
            (r#"{"score":"x"}"#, StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD"),
            (r#"{"score":650,"scope":"suburbs"}"#, StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD"),
            ("not json", StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD"),
        ];

        for (body, expected_status, expected_code) in cases {
            let (status, echoed, json) = post(&app, "/rank", body, "rid-1").await;
            assert_eq!(status, expected_status, "{body}");
            assert_eq!(json["error"], expected_code, "{body}");
            assert_eq!(echoed, "rid-1");
        }
    }

    #[tokio::test]
    async fn recommend_route_bands_and_validates() {
        let app = app().await;

        let (status, _, body) = post(&app, "/recommend", r#"{"rank":5000}"#, "r1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["year"], 2024);
        assert_eq!(body["recommendations"]["match"][0]["name"], "Xinhua High School");

        let (status, _, body) = post(&app, "/recommend", r#"{"rank":0}"#, "r2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_RANK");

        let (status, _, body) =
            post(&app, "/recommend", r#"{"rank":5000,"limit":0}"#, "r3").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "MALFORMED_PAYLOAD");

        let (status, _, body) =
            post(&app, "/recommend", r#"{"rank":5000,"limit":1}"#, "r4").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["total_schools"].as_u64().unwrap() <= 3);
    }

    #[tokio::test]
    async fn missing_request_id_is_generated() {
        let app = app().await;
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let generated = response.headers().get(&REQUEST_ID).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(generated).is_ok());
    }
}
