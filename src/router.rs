use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tracing::error;

use crate::cache::FileCache;
use crate::dht::{Dht, DhtEntry};
use crate::http::{Body, HttpVersion, Request, Response};
use crate::validator::{RequestType, Validator};

/// Dispatches validated requests: plain clients to the file cache, peer
/// nodes to the DHT API.
pub struct Router {
    dht: Arc<Mutex<Dht>>,
    validator: Validator,
    cache: Arc<FileCache>,
    liveness_threshold: i32,
}

impl Router {
    pub fn new(
        dht: Arc<Mutex<Dht>>,
        validator: Validator,
        cache: Arc<FileCache>,
        liveness_threshold: i32,
    ) -> Self {
        Router {
            dht,
            validator,
            cache,
            liveness_threshold,
        }
    }

    pub async fn global_router(&self, request: &Request) -> Response {
        let mut response = match self.validator.classify(request) {
            RequestType::PlainClient => self.plain_router(request).await,
            RequestType::Node => self.peer_router(request),
            RequestType::Invalid => {
                default_response("Invalid request.", request.version, 400)
            }
        };
        response.keep_alive = request.keep_alive;
        response
    }

    async fn plain_router(&self, request: &Request) -> Response {
        let version = request.version;
        let (path, query) = split_target(&request.target);

        // A target= query parameter overrides the request path.
        let effective_path = match query_param(query, "target").filter(|t| !t.is_empty()) {
            Some(target) if target.starts_with('/') => target.to_string(),
            Some(target) => format!("/{target}"),
            None if path != "/" && !path.is_empty() => path.to_string(),
            None => return default_response("Hello from pacPrism!", version, 200),
        };

        let range = request.header("range").unwrap_or("");
        let if_modified_since = request.header("if-modified-since").unwrap_or("");
        let if_none_match = request.header("if-none-match").unwrap_or("");

        // Precedence: Range > Conditional > Normal.
        let result = if !range.is_empty() {
            self.cache.serve_range(&effective_path, version, range).await
        } else if !if_modified_since.is_empty() || !if_none_match.is_empty() {
            self.cache
                .serve_conditional(&effective_path, version, if_modified_since, if_none_match)
                .await
        } else {
            self.cache.serve(&effective_path, version).await
        };

        match result {
            Ok(response) => response,
            Err(err) => {
                error!(path = %effective_path, error = %err, "failed to serve from cache");
                default_response("Failed to fetch file from upstream.", version, 502)
            }
        }
    }

    fn peer_router(&self, request: &Request) -> Response {
        let version = request.version;
        let (path, query) = split_target(&request.target);

        let Some(api_path) = path.strip_prefix("/api/dht/") else {
            return json_response(
                json!({"status": "error", "message": "Invalid API path"}),
                400,
                version,
            );
        };

        // clean/* operations keep their slash; everything else splits into
        // operation and a path parameter.
        let (operation, params) = if api_path.starts_with("clean/") {
            (api_path, "")
        } else {
            match api_path.split_once('/') {
                Some((operation, params)) => (operation, params),
                None => (api_path, ""),
            }
        };

        match (operation, request.method.as_str()) {
            ("verify", _) if !params.is_empty() => {
                let exists = self.dht.lock().verify_entry(params);
                json_response(
                    json!({"operation": "verify", "node_id": params, "exists": exists}),
                    200,
                    version,
                )
            }
            ("store", "POST") => match serde_json::from_str::<DhtEntry>(&request.body) {
                Ok(entry) => {
                    let node_id = entry.node_id.clone();
                    self.dht.lock().store_entry(entry);
                    json_response(
                        json!({"operation": "store", "status": "success", "node_id": node_id}),
                        201,
                        version,
                    )
                }
                Err(_) => json_response(
                    json!({"operation": "store", "status": "error", "message": "Invalid JSON body"}),
                    400,
                    version,
                ),
            },
            ("query", _) => match query_param(query, "shard_id").filter(|s| !s.is_empty()) {
                Some(shard_id) => {
                    let node_ids = self
                        .dht
                        .lock()
                        .query_node_ids_by_shard_id(shard_id)
                        .unwrap_or_default();
                    json_response(
                        json!({"operation": "query", "shard_id": shard_id, "node_ids": node_ids}),
                        200,
                        version,
                    )
                }
                None => json_response(
                    json!({"operation": "query", "status": "error", "message": "Missing shard_id parameter"}),
                    400,
                    version,
                ),
            },
            ("clean/expiry", "POST") => {
                self.dht.lock().clean_by_expiry_time();
                json_response(
                    json!({"operation": "clean/expiry", "status": "success", "message": "Expired entries cleaned"}),
                    200,
                    version,
                )
            }
            ("clean/liveness", "POST") => {
                self.dht.lock().clean_by_liveness(self.liveness_threshold);
                json_response(
                    json!({"operation": "clean/liveness", "status": "success", "message": "Unhealthy entries cleaned"}),
                    200,
                    version,
                )
            }
            _ => json_response(
                json!({"status": "error", "message": "Unknown DHT operation"}),
                404,
                version,
            ),
        }
    }
}

/// String-body response with the server identity header.
pub fn default_response(body: &str, version: HttpVersion, status: u16) -> Response {
    Response::new(status, version).with_text(body)
}

/// 307 Temporary Redirect with an empty body.
pub fn redirect(location: &str, version: HttpVersion) -> Response {
    Response::new(307, version)
        .with_header("Location", location)
        .with_body(Body::Empty)
}

fn json_response(value: serde_json::Value, status: u16, version: HttpVersion) -> Response {
    match serde_json::to_string_pretty(&value) {
        Ok(body) => Response::new(status, version)
            .with_header("Content-Type", "application/json")
            .with_text(&body),
        Err(err) => Response::new(500, version)
            .with_header("Content-Type", "application/json")
            .with_text(&format!(
                "{{\"status\": \"error\", \"message\": \"{err}\"}}"
            )),
    }
}

/// Split a request target into path and query at the first `?`.
fn split_target(target: &str) -> (&str, &str) {
    match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    }
}

/// First value of `key=` in an `&`-separated query string.
fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == key).then_some(value)
    })
}
