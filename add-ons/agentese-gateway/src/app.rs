//! Router and handlers: the HTTP projection of the fabric.
//!
//! The observer travels in `X-Observer-Archetype` / `X-Observer-Capabilities`
//! headers, never in the body. Errors map onto the fixed status table:
//! 404 path-not-found, 403 affordance, 400 syntax/contract, 429 budget,
//! 409 composition, 500 uncaught.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentese_core::{AgentesError, Logos, Observer, QueryOptions};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub logos: Arc<Logos>,
}

pub fn build_router(logos: Arc<Logos>) -> Router {
    let state = AppState { logos };
    Router::new()
        .route("/agentese/discover", get(discover))
        .route("/agentese/openapi.json", get(openapi))
        .route("/agentese/query", get(query))
        .route("/agentese/:path", get(websocket))
        .route("/agentese/:path/affordances", get(affordances_handler))
        .route("/agentese/:path/:aspect", get(invoke_get).post(invoke_post))
        .route("/agentese/:path/:aspect/stream", get(stream))
        .with_state(state)
}

/// Observer from headers only; the body never carries it.
fn observer_from_headers(headers: &HeaderMap) -> Observer {
    let archetype = headers
        .get("x-observer-archetype")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("guest")
        .to_string();
    let capabilities: Vec<String> = headers
        .get("x-observer-capabilities")
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Observer::new(archetype, capabilities)
}

fn error_response(err: &AgentesError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.report() }))).into_response()
}

fn kwargs_from_query(params: BTreeMap<String, String>) -> Value {
    let mut map = serde_json::Map::new();
    for (key, raw) in params {
        // Numbers and booleans arrive as strings; keep them typed when they parse.
        let value = raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .or_else(|_| raw.parse::<bool>().map(Value::from))
            .unwrap_or(Value::String(raw));
        map.insert(key, value);
    }
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

async fn discover(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let include_metadata = params.contains_key("include_metadata");
    let include_schemas = params.contains_key("include_schemas");
    let paths = state.logos.registry().list_paths(None);

    let mut body = json!({ "paths": paths });
    if include_metadata {
        let metadata: BTreeMap<String, Value> = paths
            .iter()
            .filter_map(|p| {
                state
                    .logos
                    .registry()
                    .get(p)
                    .map(|m| (p.clone(), serde_json::to_value(m).unwrap_or(Value::Null)))
            })
            .collect();
        body["metadata"] = serde_json::to_value(metadata).unwrap_or(Value::Null);
    }
    if include_schemas {
        let schemas: BTreeMap<String, Value> = paths
            .iter()
            .map(|p| {
                (
                    p.clone(),
                    serde_json::to_value(state.logos.registry().get_contracts(p))
                        .unwrap_or(Value::Null),
                )
            })
            .collect();
        body["schemas"] = serde_json::to_value(schemas).unwrap_or(Value::Null);
    }
    Json(body).into_response()
}

/// OpenAPI 3.1 projection of the registered handle space.
async fn openapi(State(state): State<AppState>) -> Response {
    let mut paths = serde_json::Map::new();
    for handle in state.logos.registry().list_paths(None) {
        let contracts = state.logos.registry().get_contracts(&handle);
        let mut operations = serde_json::Map::new();
        operations.insert(
            "get".into(),
            json!({
                "summary": format!("Invoke an aspect of {handle}"),
                "parameters": [
                    { "name": "path", "in": "path", "required": true, "schema": { "type": "string" } },
                    { "name": "aspect", "in": "path", "required": true, "schema": { "type": "string" } }
                ],
                "responses": { "200": { "description": "Rendering" } }
            }),
        );
        if !contracts.is_empty() {
            operations.insert(
                "post".into(),
                json!({
                    "summary": format!("Invoke with a JSON body against {handle} contracts"),
                    "responses": { "200": { "description": "Rendering" } }
                }),
            );
        }
        paths.insert(format!("/agentese/{handle}/{{aspect}}"), Value::Object(operations));
    }
    Json(json!({
        "openapi": "3.1.0",
        "info": { "title": "AGENTESE gateway", "version": env!("CARGO_PKG_VERSION") },
        "paths": paths,
    }))
    .into_response()
}

async fn query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let observer = observer_from_headers(&headers);
    let pattern = params.get("pattern").cloned().unwrap_or_else(|| "**".to_string());
    let options = QueryOptions {
        limit: params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(50),
        offset: params.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0),
        tenant: params.get("tenant").cloned(),
        capability_check: params.contains_key("capability_check"),
        dry_run: params.contains_key("dry_run"),
    };
    match state.logos.query(&pattern, options, Some(&observer)).await {
        Ok(result) => Json(json!({
            "total": result.total,
            "paths": result.paths,
            "dry_run": result.dry_run,
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Affordances are observer-dependent: resolve the node, filter, report.
async fn affordances_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let observer = observer_from_headers(&headers);
    let parsed = match state.logos.parse_path(&path) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&err),
    };
    let holon = parsed.holon_path();
    if !state.logos.registry().has(&holon) {
        let handles = state.logos.registry().handles();
        return error_response(&AgentesError::PathNotFound {
            path: holon.clone(),
            suggestions: agentese_core::suggest(&holon, &handles, 3),
        });
    }
    let visible = visible_aspects(&state.logos, &holon, &observer).await;
    Json(json!({ "path": holon, "affordances": visible })).into_response()
}

async fn visible_aspects(logos: &Arc<Logos>, path: &str, observer: &Observer) -> Vec<String> {
    // The query surface already proves existence; ask the registry directly.
    let Ok(parsed) = logos.parse_path(path) else { return Vec::new() };
    let container = logos.container();
    let Ok(node) = logos.registry().resolve(&parsed.holon_path(), container).await else {
        return Vec::new();
    };
    let archetypes = logos.archetypes().read().expect("archetype registry poisoned");
    agentese_core::affordances(&node.aspects(), observer, &archetypes)
}

async fn invoke_get(
    State(state): State<AppState>,
    Path((path, aspect)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    invoke_inner(&state, &format!("{path}:{aspect}"), &headers, kwargs_from_query(params)).await
}

async fn invoke_post(
    State(state): State<AppState>,
    Path((path, aspect)): Path<(String, String)>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Response {
    let kwargs = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    invoke_inner(&state, &format!("{path}:{aspect}"), &headers, kwargs).await
}

async fn invoke_inner(state: &AppState, path: &str, headers: &HeaderMap, kwargs: Value) -> Response {
    let observer = observer_from_headers(headers);
    match state.logos.invoke(path, Some(&observer), kwargs).await {
        Ok(rendering) => Json(rendering.to_dict()).into_response(),
        Err(err) => {
            debug!(target: "agentese::gateway", path, error = %err, "invocation failed");
            error_response(&err)
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

async fn stream(
    State(state): State<AppState>,
    Path((path, aspect)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let observer = observer_from_headers(&headers);
    let full = format!("{path}:{aspect}");
    match state
        .logos
        .invoke_stream(&full, Some(&observer), kwargs_from_query(params))
        .await
    {
        Ok(inner) => {
            let sse_stream = inner.map(|item| match item {
                Ok(rendering) => SseEvent::default().json_data(rendering.to_dict()),
                Err(err) => SseEvent::default()
                    .event("error")
                    .json_data(json!({ "error": err.report() })),
            });
            Sse::new(sse_stream).into_response()
        }
        Err(err) => error_response(&err),
    }
}

// ---------------------------------------------------------------------------
// WebSocket: bidirectional invocation stream
// ---------------------------------------------------------------------------

async fn websocket(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let observer = observer_from_headers(&headers);
    upgrade.on_upgrade(move |socket| ws_loop(state, socket, path, observer))
}

/// Each inbound frame is `{"aspect": "...", "kwargs": {...}}`; each outbound
/// frame is `{"ok": true, "result": ...}` or `{"ok": false, "error": ...}`.
async fn ws_loop(state: AppState, mut socket: WebSocket, path: String, observer: Observer) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                let _ = socket
                    .send(Message::Text(
                        json!({ "ok": false, "error": { "kind": "bad_frame", "message": e.to_string() } })
                            .to_string(),
                    ))
                    .await;
                continue;
            }
        };
        let aspect = request.get("aspect").and_then(|v| v.as_str()).unwrap_or("manifest");
        let kwargs = request.get("kwargs").cloned().unwrap_or_else(|| json!({}));
        let reply = match state
            .logos
            .invoke(&format!("{path}:{aspect}"), Some(&observer), kwargs)
            .await
        {
            Ok(rendering) => json!({ "ok": true, "result": rendering.to_dict() }),
            Err(err) => json!({ "ok": false, "error": err.report() }),
        };
        if socket.send(Message::Text(reply.to_string())).await.is_err() {
            warn!(target: "agentese::gateway", path, "websocket peer went away");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentese_core::{FabricConfig, NodeRegistry};
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn test_router() -> Router {
        let registry = Arc::new(NodeRegistry::new());
        let logos = Logos::with_registry(FabricConfig::default(), registry);
        agentese_nodes::bootstrap(&logos).unwrap();
        build_router(logos)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn discover_lists_paths() {
        let router = test_router().await;
        let response = router
            .oneshot(Request::get("/agentese/discover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let paths: Vec<String> =
            serde_json::from_value(body["paths"].clone()).unwrap();
        assert!(paths.contains(&"world.garden".to_string()));
    }

    #[tokio::test]
    async fn invoke_maps_affordance_to_403() {
        let router = test_router().await;
        let response = router
            .oneshot(Request::get("/agentese/world.garden/tend").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["error"]["kind"], "affordance_denied");
    }

    #[tokio::test]
    async fn observer_headers_unlock_aspects() {
        let router = test_router().await;
        let response = router
            .oneshot(
                Request::get("/agentese/world.garden/tend")
                    .header("X-Observer-Archetype", "architect")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_is_404_with_suggestions() {
        let router = test_router().await;
        let response = router
            .oneshot(Request::get("/agentese/world.gardn/manifest").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["suggestions"][0], "world.garden");
    }

    #[tokio::test]
    async fn openapi_projection_includes_handles() {
        let router = test_router().await;
        let response = router
            .oneshot(Request::get("/agentese/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["openapi"], "3.1.0");
        assert!(body["paths"]
            .as_object()
            .unwrap()
            .contains_key("/agentese/world.garden/{aspect}"));
    }

    #[tokio::test]
    async fn post_body_carries_kwargs() {
        let router = test_router().await;
        let response = router
            .oneshot(
                Request::post("/agentese/world.document/manifest")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text": "one two"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["body"]["words"], 2);
    }
}
