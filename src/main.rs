mod candle_engine;
mod classify;
mod config;
mod engine;
mod error;
#[cfg(test)]
mod fake_engine;
mod pages;
mod provider;
mod reviews;
mod types;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use candle_engine::{CandleConfig, CandleLoader};
use classify::ClassificationService;
use config::Config;
use error::ApiError;
use provider::ModelProvider;
use reviews::ReviewStore;
use types::{ClassificationResponse, Review, ReviewRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);
    tracing::info!("Starting food classifier with config: {:?}", config);

    if !config.has_model_source() {
        anyhow::bail!("Either --model-id or --model-path must be provided");
    }

    let loader = CandleLoader::new(CandleConfig::from(&config));
    let provider = Arc::new(ModelProvider::new(Arc::new(loader)));

    // The service cannot answer anything useful without a model.
    provider.get_model().await?;

    let state = AppState::new(ClassificationService::new(provider), config.max_upload_bytes);
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = router(state)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,food_classifier=debug".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[derive(Clone)]
struct AppState {
    classifier: ClassificationService,
    reviews: Arc<ReviewStore>,
    max_upload_bytes: usize,
}

impl AppState {
    fn new(classifier: ClassificationService, max_upload_bytes: usize) -> Self {
        Self {
            classifier,
            reviews: Arc::new(ReviewStore::default()),
            max_upload_bytes,
        }
    }
}

fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", get(pages::index))
        .route("/about", get(pages::about))
        .route("/classify", post(classify_handler).layer(upload_limit))
        .route("/reviews", get(list_reviews).post(create_review))
        .route("/health", get(health))
        .route("/readiness", get(readiness))
        .with_state(state)
}

#[tracing::instrument(skip(state, multipart))]
async fn classify_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ClassificationResponse>, ApiError> {
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::TooLarge {
                limit: state.max_upload_bytes,
            }
        } else {
            ApiError::Multipart(e.body_text())
        }
    };

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            upload = Some(field.bytes().await.map_err(multipart_error)?.to_vec());
            break;
        }
    }
    let bytes = upload.ok_or(ApiError::MissingFile)?;

    let set = state.classifier.classify_upload(bytes).await?;
    tracing::info!(model = %set.model, "Classification completed successfully");
    Ok(Json(ClassificationResponse::from(set)))
}

async fn list_reviews(State(state): State<AppState>) -> Json<Vec<Review>> {
    Json(state.reviews.list().await)
}

async fn create_review(
    State(state): State<AppState>,
    Json(request): Json<ReviewRequest>,
) -> (StatusCode, Json<Review>) {
    let review = state.reviews.add(request).await;
    tracing::info!(review_id = %review.id, "Review added");
    (StatusCode::CREATED, Json(review))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.classifier.provider().is_loaded() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "loading" })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_engine::{FakeLoader, encode, solid_image};
    use axum::body::Body;
    use axum::http::{Request, header};
    use image::ImageFormat;
    use tower::ServiceExt;

    const BOUNDARY: &str = "food-classifier-boundary";

    fn app_with_limit(limit: usize) -> Router {
        let provider = Arc::new(ModelProvider::new(Arc::new(FakeLoader::new(8))));
        router(AppState::new(ClassificationService::new(provider), limit))
    }

    fn app() -> Router {
        app_with_limit(1024 * 1024)
    }

    fn multipart_request(field: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"dish.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/classify")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn serves_pages() {
        let resp = app().oneshot(get_request("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8_lossy(&bytes);
        assert!(html.contains("Upload an Image for Classification"));
        assert!(html.contains("catch (err)"));
        assert!(html.contains("Classification failed, please try again."));

        let resp = app().oneshot(get_request("/about")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn classifies_uploaded_png() {
        let png = encode(&solid_image(20, 20, [240, 20, 20]), ImageFormat::Png);
        let resp = app()
            .oneshot(multipart_request("file", &png))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["object"], "list");
        assert_eq!(body["model"], "fake");
        assert!(body["id"].as_str().unwrap().starts_with("classify-"));

        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 5);
        assert_eq!(data[0]["label"], "dish_0");
        assert_eq!(data[0]["index"], 0);
        let confidences: Vec<f64> = data
            .iter()
            .map(|d| d["confidence"].as_f64().unwrap())
            .collect();
        assert!(confidences.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn rejects_bad_uploads() {
        let app = app();

        let resp = app
            .clone()
            .oneshot(multipart_request("file", b"GIF89a\x01\x00\x01\x00"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json_body(resp).await["code"], "UNSUPPORTED_IMAGE");

        let resp = app
            .clone()
            .oneshot(multipart_request("file", b""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["code"], "EMPTY_IMAGE");

        let resp = app
            .clone()
            .oneshot(multipart_request("photo", b"whatever"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["code"], "MISSING_FILE");

        let png = encode(&solid_image(20, 20, [20, 20, 240]), ImageFormat::Png);
        let resp = app.oneshot(multipart_request("file", &png)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_oversized_uploads() {
        let png = encode(&solid_image(64, 64, [240, 20, 20]), ImageFormat::Png);
        let resp = app_with_limit(16)
            .oneshot(multipart_request("file", &png))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(resp).await["code"], "UPLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn readiness_follows_model_load() {
        let app = app();

        let resp = app.clone().oneshot(get_request("/readiness")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let png = encode(&solid_image(20, 20, [20, 240, 20]), ImageFormat::Png);
        let resp = app
            .clone()
            .oneshot(multipart_request("file", &png))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.clone().oneshot(get_request("/readiness")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn reviews_round_trip_through_state() {
        let app = app();

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/reviews")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name":"asha","text":"Got my biryani right"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(json_body(resp).await["name"], "asha");

        let resp = app.oneshot(get_request("/reviews")).await.unwrap();
        let reviews = json_body(resp).await;
        assert_eq!(reviews.as_array().unwrap().len(), 1);
        assert_eq!(reviews[0]["text"], "Got my biryani right");
    }
}
