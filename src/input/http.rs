//! HTTP input
//!
//! Serves configured routes with axum. Every request runs its route's flow
//! with the request exposed as `state.request`, and the reply comes from the
//! `state.response` envelope the flow wrote (see the `respond` closure) or,
//! when there is none, from the flow's last result.

use crate::{
    error::{ConfigurationError, EngineError},
    input::{parse_config, InputContext, InputHandle, InputPlugin},
    runtime::{context::Runtime, engine::Engine},
    value::to_display_string,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::Query,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, MethodFilter, MethodRouter},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpInputConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// 0 picks a free port; the bound address is exposed as the `address` service
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// HTTP method or `ANY`
    #[serde(default = "default_method")]
    pub method: String,
    /// `/orders/{id}`; `:id` and `*rest` segments are accepted too
    pub path: String,
    pub flow: String,
}

/// The `http` input plugin
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpInput;

#[async_trait]
impl InputPlugin for HttpInput {
    fn plugin_type(&self) -> &str {
        "http"
    }

    async fn initialize(&self, config: Value, ctx: InputContext) -> Result<InputHandle> {
        let config: HttpInputConfig = parse_config("http", config)?;
        let app = build_router(&config.routes, &ctx)?;

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind http input on {bind_addr}"))?;
        let address: SocketAddr = listener.local_addr()?;
        tracing::info!(
            "📡 HTTP input listening on http://{} ({} routes)",
            address,
            config.routes.len()
        );

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).with_graceful_shutdown(signal).await
        });

        Ok(InputHandle::new()
            .with_service("address", address)
            .with_cleanup(move || async move {
                tracing::info!("⏹️ Shutting down HTTP input on {}", address);
                shutdown.cancel();
                server
                    .await
                    .context("http server task panicked")?
                    .context("http server failed")?;
                Ok(())
            }))
    }
}

/// Build the router for `routes`, one method router per path
fn build_router(routes: &[RouteConfig], ctx: &InputContext) -> Result<Router> {
    let mut seen = HashSet::new();
    let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();

    for route in routes {
        let path = normalize_route_path(&route.path)?;
        let (method_name, filter) = method_filter(&route.method)?;
        if !seen.insert((method_name.clone(), path.clone())) {
            return Err(ConfigurationError::InvalidDefinition(format!(
                "http route {method_name} {path} is declared twice"
            ))
            .into());
        }

        let target = Arc::new(RouteTarget {
            engine: ctx.engine.clone(),
            metadata: ctx.metadata.clone(),
            route: path.clone(),
            flow: route.flow.clone(),
        });
        let handler = move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
            let target = Arc::clone(&target);
            async move { target.handle(method, uri, headers, body).await }
        };

        tracing::debug!("🔗 {} {} -> flow '{}'", method_name, path, route.flow);
        let method_router = match by_path.remove(&path) {
            Some(existing) => existing.on(filter, handler),
            None => axum::routing::on(filter, handler),
        };
        by_path.insert(path, method_router);
    }

    let has_health_route = by_path.contains_key("/healthz");
    let mut router = Router::new();
    for (path, method_router) in by_path {
        router = router.route(&path, method_router);
    }
    if !has_health_route {
        router = router.route("/healthz", get(health_check));
    }
    Ok(router)
}

fn method_filter(method: &str) -> Result<(String, MethodFilter)> {
    let name = method.trim().to_ascii_uppercase();
    if name == "ANY" || name == "*" {
        let all = MethodFilter::GET
            .or(MethodFilter::POST)
            .or(MethodFilter::PUT)
            .or(MethodFilter::PATCH)
            .or(MethodFilter::DELETE)
            .or(MethodFilter::HEAD)
            .or(MethodFilter::OPTIONS);
        return Ok(("ANY".to_string(), all));
    }

    let invalid =
        || ConfigurationError::InvalidDefinition(format!("unsupported http method '{method}'"));
    let parsed = Method::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let filter = MethodFilter::try_from(parsed).map_err(|_| invalid())?;
    Ok((name, filter))
}

/// Convert `:param` and `*rest` segments to the `{param}` form the router expects
fn normalize_route_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(ConfigurationError::InvalidDefinition(format!(
            "http route path '{path}' must start with '/'"
        ))
        .into());
    }
    let segments: Vec<String> = path
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect();
    Ok(segments.join("/"))
}

/// Match `path` against a normalized route template and collect its parameters
fn extract_params(template: &str, path: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let mut actual = path.trim_start_matches('/').split('/');

    for segment in template.trim_start_matches('/').split('/') {
        let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
            actual.next();
            continue;
        };
        if let Some(rest_name) = name.strip_prefix('*') {
            let rest: Vec<&str> = actual.by_ref().collect();
            params.insert(rest_name.to_string(), Value::String(rest.join("/")));
            break;
        }
        if let Some(value) = actual.next() {
            params.insert(name.to_string(), Value::String(value.to_string()));
        }
    }
    params
}

/// Empty bodies become null, JSON bodies are parsed, anything else is kept as text
fn parse_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn headers_to_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in headers {
        if let Ok(text) = value.to_str() {
            map.insert(name.as_str().to_string(), Value::String(text.to_string()));
        }
    }
    map
}

/// A route bound to its flow
struct RouteTarget {
    engine: Engine,
    metadata: Map<String, Value>,
    route: String,
    flow: String,
}

impl RouteTarget {
    async fn handle(&self, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
        let path = uri.path().to_string();
        tracing::info!("📥 {} {} -> flow '{}'", method, path, self.flow);

        let query: HashMap<String, String> = Query::try_from_uri(&uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        let state = json!({
            "request": {
                "method": method.as_str(),
                "path": path,
                "params": extract_params(&self.route, uri.path()),
                "query": query,
                "headers": headers_to_map(&headers),
                "body": parse_body(&body),
            }
        });
        let runtime = Runtime::with_values(self.metadata.clone()).with_value(
            "http",
            json!({"method": method.as_str(), "path": path, "route": self.route}),
        );

        match self.engine.execute(&self.flow, Some(state), Some(runtime)).await {
            Ok(result) => match result.state.get("response") {
                Some(Value::Object(envelope)) => envelope_response(envelope),
                _ => (StatusCode::OK, Json(result.last_result)).into_response(),
            },
            Err(e) => error_response(&self.flow, e),
        }
    }
}

/// Turn a `{status, headers?, body?}` envelope into a response
fn envelope_response(envelope: &Map<String, Value>) -> Response {
    let status = envelope
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let mut response = match envelope.get("body") {
        None | Some(Value::Null) => status.into_response(),
        Some(Value::String(text)) => (status, text.clone()).into_response(),
        Some(body) => (status, Json(body.clone())).into_response(),
    };

    if let Some(Value::Object(headers)) = envelope.get("headers") {
        let response_headers = response.headers_mut();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes());
            let value = HeaderValue::from_str(&to_display_string(value));
            match (name, value) {
                (Ok(name), Ok(value)) => {
                    response_headers.insert(name, value);
                }
                _ => tracing::warn!("⚠️ Dropping invalid response header"),
            }
        }
    }
    response
}

fn error_response(flow: &str, error: EngineError) -> Response {
    let status = match &error {
        EngineError::Configuration(ConfigurationError::UnknownFlow(name)) if name == flow => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!("❌ Flow '{}' failed: {}", flow, error);
    (status, Json(json!({"error": error.to_string()}))).into_response()
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_route_path() {
        assert_eq!(normalize_route_path("/orders/:id").unwrap(), "/orders/{id}");
        assert_eq!(normalize_route_path("/files/*rest").unwrap(), "/files/{*rest}");
        assert_eq!(normalize_route_path("/plain/{id}").unwrap(), "/plain/{id}");
        assert!(normalize_route_path("orders").is_err());
    }

    #[test]
    fn test_extract_params() {
        let params = extract_params("/orders/{id}/items/{item}", "/orders/7/items/abc");
        assert_eq!(Value::Object(params), json!({"id": "7", "item": "abc"}));

        let params = extract_params("/files/{*rest}", "/files/a/b/c.txt");
        assert_eq!(Value::Object(params), json!({"rest": "a/b/c.txt"}));

        assert!(extract_params("/static", "/static").is_empty());
    }

    #[test]
    fn test_method_filter() {
        assert_eq!(method_filter("post").unwrap().0, "POST");
        assert_eq!(method_filter("any").unwrap().0, "ANY");
        assert!(method_filter("not a method").is_err());
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::new()), Value::Null);
        assert_eq!(parse_body(&Bytes::from_static(b"{\"a\":1}")), json!({"a": 1}));
        assert_eq!(parse_body(&Bytes::from_static(b"plain")), json!("plain"));
    }

    #[test]
    fn test_envelope_response() {
        let Value::Object(envelope) =
            json!({"status": 202, "headers": {"x-run": "1"}, "body": {"ok": true}})
        else {
            unreachable!()
        };
        let response = envelope_response(&envelope);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get("x-run").unwrap(), "1");
    }

    #[test]
    fn test_duplicate_routes_rejected() {
        use crate::runtime::events::NoopEventSink;
        let ctx = InputContext::new(Engine::new(), Arc::new(NoopEventSink));
        let route = RouteConfig {
            method: "GET".into(),
            path: "/a".into(),
            flow: "f".into(),
        };
        assert!(build_router(&[route.clone(), route.clone()], &ctx).is_err());

        let post = RouteConfig { method: "POST".into(), ..route.clone() };
        assert!(build_router(&[route, post], &ctx).is_ok());
    }
}
