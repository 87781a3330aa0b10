use crate::config::Config;
use anyhow::{Context, Result};
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get, post};
use config_model::EndpointConfig;
use reqwest::Url;
use serde_json::json;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

/// Request headers carried over to the upstream call.
const FORWARDED_HEADERS: [HeaderName; 2] = [header::CONTENT_TYPE, header::ACCEPT];

#[derive(Clone)]
struct RelayState {
    http: reqwest::Client,
    upstream: Arc<EndpointConfig>,
    timeout: Duration,
}

pub async fn run(config: Config) -> Result<()> {
    let router = router(&config)?;
    let addr = SocketAddr::new(
        config
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind-address {:?}", config.bind_address))?,
        config.port,
    );
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {addr}"))?;
    info!(?addr, upstream = %config.upstream.base_url, "relay listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited")?;
    Ok(())
}

pub fn router(config: &Config) -> Result<Router> {
    let http = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.upstream.accept_invalid_certs)
        .build()
        .context("failed to build upstream HTTP client")?;
    let state = RelayState {
        http,
        upstream: Arc::new(config.upstream.clone()),
        timeout: config.request_timeout,
    };

    let mut router = Router::new()
        .route("/", get(health))
        .route("/api/v1/uploadFile", post(forward_upload))
        .route("/api/v1/generate/{file_id}/{target}", get(forward_generate))
        .route("/api/{*rest}", any(forward_passthrough))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .with_state(state);

    if let Some(cors) = cors_layer(&config.allowed_origins)? {
        router = router.layer(cors);
    }
    Ok(router)
}

fn cors_layer(origins: &[String]) -> Result<Option<CorsLayer>> {
    if origins.is_empty() {
        return Ok(None);
    }
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("allowed origin {origin:?} is not a valid header value"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            term.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "message": "Server is running" }))
}

async fn forward_upload(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.upstream.upload_url() {
        Ok(url) => relay(&state, Method::POST, url, &headers, body).await,
        Err(err) => proxy_failure(format!("{err:#}")),
    }
}

async fn forward_generate(
    State(state): State<RelayState>,
    Path((file_id, target)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    match state.upstream.generate_url(&file_id, &target) {
        Ok(url) => relay(&state, Method::GET, url, &headers, Bytes::new()).await,
        Err(err) => proxy_failure(format!("{err:#}")),
    }
}

async fn forward_passthrough(
    State(state): State<RelayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.upstream.passthrough_url(uri.path(), uri.query()) {
        Ok(url) => relay(&state, method, url, &headers, body).await,
        Err(err) => proxy_failure(format!("{err:#}")),
    }
}

async fn relay(
    state: &RelayState,
    method: Method,
    url: Url,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    debug!(%method, %url, bytes = body.len(), "relaying request");
    let mut request = state
        .http
        .request(method.clone(), url.clone())
        .timeout(state.timeout);
    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(&name) {
            request = request.header(name, value.clone());
        }
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(err) => return proxy_failure(err),
    };
    let status = upstream.status();
    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return proxy_failure(err),
    };
    info!(%method, path = url.path(), %status, bytes = bytes.len(), "relayed");

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    response
}

fn proxy_failure(err: impl Display) -> Response {
    warn!(error = %err, "upstream request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Failed to proxy request",
            "message": err.to_string(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn spawn_upstream() -> SocketAddr {
        async fn upload(headers: HeaderMap, body: Bytes) -> Json<serde_json::Value> {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(json!({
                "fileId": "f-1",
                "contentType": content_type,
                "length": body.len(),
            }))
        }
        async fn generate(Path((id, target)): Path<(String, String)>) -> Json<serde_json::Value> {
            Json(json!([{ "settings": { "b": 0.5, "c": 0.5 }, "imageData": format!("{id}|{target}") }]))
        }
        async fn teapot(uri: Uri) -> (StatusCode, String) {
            (StatusCode::IM_A_TEAPOT, uri.query().unwrap_or_default().to_string())
        }

        let app = Router::new()
            .route("/api/v1/uploadFile", post(upload))
            .route("/api/v1/generate/{id}/{target}", get(generate))
            .route("/api/other", any(teapot));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn relay_for(addr: SocketAddr) -> Router {
        let config = Config {
            upstream: EndpointConfig::with_base_url(format!("http://{addr}")),
            ..Config::default()
        };
        router(&config).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_reports_running() {
        let addr = spawn_upstream().await;
        let response = relay_for(addr)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "Server is running");
    }

    #[tokio::test]
    async fn upload_keeps_body_and_content_type() {
        let addr = spawn_upstream().await;
        let request = Request::post("/api/v1/uploadFile")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=xyz")
            .body(Body::from(vec![7u8; 321]))
            .unwrap();
        let response = relay_for(addr).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["fileId"], "f-1");
        assert_eq!(body["contentType"], "multipart/form-data; boundary=xyz");
        assert_eq!(body["length"], 321);
    }

    #[tokio::test]
    async fn generate_segments_survive_the_hop() {
        let addr = spawn_upstream().await;
        let request = Request::get("/api/v1/generate/f-1/warm%20sunset")
            .body(Body::empty())
            .unwrap();
        let response = relay_for(addr).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["imageData"], "f-1|warm sunset");
    }

    #[tokio::test]
    async fn passthrough_relays_status_and_query() {
        let addr = spawn_upstream().await;
        let request = Request::delete("/api/other?x=1")
            .body(Body::empty())
            .unwrap();
        let response = relay_for(addr).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"x=1");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_500() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let response = relay_for(addr)
            .oneshot(
                Request::get("/api/v1/generate/a/b")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Failed to proxy request");
    }

    #[tokio::test]
    async fn cors_allows_listed_origin_only() {
        let addr = spawn_upstream().await;
        let config = Config {
            upstream: EndpointConfig::with_base_url(format!("http://{addr}")),
            allowed_origins: vec!["http://localhost:3000".into()],
            ..Config::default()
        };
        let app = router(&config).unwrap();
        let allowed = app
            .clone()
            .oneshot(
                Request::get("/")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        let other = app
            .oneshot(
                Request::get("/")
                    .header(header::ORIGIN, "https://elsewhere.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(
            other
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }
}
