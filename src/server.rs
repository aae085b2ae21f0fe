//! HTTP front door for the hit counter.
//!
//! Every request, whatever its method or path, becomes a JSON envelope in the
//! shape API gateways hand to functions. A downstream reply shaped like
//! `{statusCode, headers, body}` is rendered as that HTTP response; any other
//! JSON reply is returned as-is with status 200.

use crate::error::HitCounterError;
use crate::handler::HitCounterHandler;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use warp::http::{Method, Response, StatusCode};
use warp::hyper::Body;
use warp::{Filter, Rejection, Reply};

/// Filter that routes every request through `handler`.
pub fn routes(
    handler: Arc<HitCounterHandler>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::any()
        .and(warp::path::full())
        .and(warp::method())
        .and(warp::header::headers_cloned())
        .and(
            warp::filters::query::raw()
                .or(warp::any().map(String::new))
                .unify(),
        )
        .and(warp::body::bytes())
        .and_then(
            move |path: warp::path::FullPath,
                  method: Method,
                  headers: HeaderMap,
                  query: String,
                  body: Bytes| {
                let handler = handler.clone();
                async move {
                    let envelope = build_envelope(path.as_str(), &method, &headers, &query, &body);
                    Ok::<_, Infallible>(respond(handler.handle(&envelope).await))
                }
            },
        )
        .with(warp::trace::request())
}

/// Serve `handler` on `addr` until `shutdown` resolves.
pub async fn run_server<F>(
    handler: Arc<HitCounterHandler>,
    addr: SocketAddr,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (bound, server) =
        warp::serve(routes(handler)).try_bind_with_graceful_shutdown(addr, shutdown)?;

    tracing::info!("Hit counter listening on {}", bound);
    server.await;
    tracing::info!("Hit counter shut down");
    Ok(())
}

fn build_envelope(
    path: &str,
    method: &Method,
    headers: &HeaderMap,
    query: &str,
    body: &Bytes,
) -> Value {
    let headers: Map<String, Value> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
        })
        .collect();

    let query_params: Map<String, Value> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();

    let query_params = if query_params.is_empty() {
        Value::Null
    } else {
        Value::Object(query_params)
    };

    // Bodies that are not UTF-8 travel base64-encoded, as gateways send them.
    let (body, is_base64_encoded) = match std::str::from_utf8(body) {
        Ok("") => (Value::Null, false),
        Ok(text) => (Value::String(text.to_string()), false),
        Err(_) => (Value::String(general_purpose::STANDARD.encode(body)), true),
    };

    json!({
        "path": path,
        "httpMethod": method.as_str(),
        "headers": headers,
        "queryStringParameters": query_params,
        "body": body,
        "isBase64Encoded": is_base64_encoded,
        "requestContext": {
            "requestId": uuid::Uuid::new_v4().to_string(),
        },
    })
}

fn respond(result: Result<Value, HitCounterError>) -> Response<Body> {
    match result {
        Ok(reply) => render_reply(reply),
        Err(err) => {
            err.log();
            let status = StatusCode::from_u16(err.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            json_response(status, &json!({ "message": err.user_message() }))
        }
    }
}

fn render_reply(reply: Value) -> Response<Body> {
    let status = reply
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok());

    let status = match status {
        Some(status) => status,
        None => return json_response(StatusCode::OK, &reply),
    };

    let is_base64_encoded = reply
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let body = match reply.get("body") {
        Some(Value::String(text)) if is_base64_encoded => {
            match general_purpose::STANDARD.decode(text) {
                Ok(bytes) => Body::from(bytes),
                Err(e) => {
                    tracing::warn!("Downstream sent an invalid base64 body: {}", e);
                    return json_response(
                        StatusCode::BAD_GATEWAY,
                        &json!({ "message": "Downstream service failed" }),
                    );
                }
            }
        }
        Some(Value::String(text)) => Body::from(text.clone()),
        Some(Value::Null) | None => Body::empty(),
        Some(other) => Body::from(other.to_string()),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;

    if let Some(Value::Object(headers)) = reply.get("headers") {
        for (name, value) in headers {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => tracing::debug!("Dropping invalid downstream header '{}'", name),
            }
        }
    }

    response
}

fn json_response(status: StatusCode, value: &Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
