//! HTTP control API.
//!
//! Listens on loopback and routes by hand over `(method, path)`. Each
//! request is served on its own thread so the long-lived `/events` stream
//! never starves the accept loop. Bodies are JSON throughout.

pub mod handlers;

use std::io::Read;
use std::sync::Arc;
use std::thread;

use tiny_http::{Method, Response, Server};
use tracing::{error, info};

use crate::app::AppContext;
use crate::error::Result;

pub struct HttpServer {
    server: Arc<Server>,
}

impl HttpServer {
    /// Bind and start serving in background threads.
    pub fn start(ctx: Arc<AppContext>) -> Result<Self> {
        let addr = ctx.config.bind_addr();
        let server = Server::http(&addr)
            .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;
        let server = Arc::new(server);
        info!("control API listening on http://{}", addr);

        let accept = Arc::clone(&server);
        thread::spawn(move || {
            for request in accept.incoming_requests() {
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || handle_request(ctx, request));
            }
        });

        Ok(Self { server })
    }

    /// Stop accepting connections; in-flight requests finish on their own
    /// threads.
    pub fn shutdown(&self) {
        self.server.unblock();
    }

    /// Bound address (useful when the configured port is 0).
    pub fn addr(&self) -> Option<std::net::SocketAddr> {
        self.server.server_addr().to_ip()
    }
}

fn handle_request(ctx: Arc<AppContext>, mut request: tiny_http::Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (url.clone(), String::new()),
    };

    let mut body = String::new();
    if matches!(method, Method::Post | Method::Put) {
        if let Err(e) = request.as_reader().read_to_string(&mut body) {
            error!("failed to read request body: {}", e);
            respond_json(
                request,
                400,
                serde_json::json!({ "error": "bad_body", "details": e.to_string() }),
            );
            return;
        }
    }

    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(url_decode)
        .collect();
    let parts: Vec<&str> = segments.iter().map(String::as_str).collect();

    let outcome = match (&method, parts.as_slice()) {
        (Method::Get, ["healthz"]) => handlers::misc::healthz(),

        (Method::Post, ["jobs"]) => handlers::jobs::create(&ctx, &body),
        (Method::Get, ["jobs"]) => handlers::jobs::list(&ctx, &query),
        (Method::Post, ["jobs", "claim"]) => handlers::jobs::claim(&ctx, &query),
        (Method::Post, ["jobs", "cleanup"]) => handlers::jobs::cleanup(&ctx, &body),
        (Method::Get, ["jobs", id]) => handlers::jobs::get(&ctx, id),
        (Method::Delete, ["jobs", id]) => handlers::jobs::delete(&ctx, id),
        (Method::Get, ["jobs", id, "logs"]) => handlers::jobs::logs(&ctx, id),
        (Method::Post, ["jobs", id, "logs"]) => handlers::jobs::append_log(&ctx, id, &body),
        (Method::Get, ["jobs", id, "dependencies"]) => handlers::jobs::dependencies(&ctx, id),
        (Method::Post, ["jobs", id, "complete"]) => handlers::jobs::complete(&ctx, id, &body),
        (Method::Post, ["jobs", id, "continue"]) => handlers::jobs::continue_job(&ctx, id, &body),
        (Method::Post, ["jobs", id, "resume"]) => handlers::jobs::resume(&ctx, id, &body),
        (Method::Post, ["jobs", id, "cancel"]) => handlers::jobs::cancel(&ctx, id),

        (Method::Get, ["worktrees"]) => handlers::worktrees::list(&ctx),
        (Method::Delete, ["worktrees", "cleanup"]) => handlers::worktrees::cleanup(&ctx),
        (Method::Delete, ["worktrees", path]) => handlers::worktrees::delete(&ctx, path),

        (Method::Get, ["events"]) => {
            handlers::events::stream(&ctx, request);
            return;
        }

        _ => {
            respond_json(request, 404, serde_json::json!({ "error": "not_found" }));
            return;
        }
    };

    match outcome {
        Ok((status, value)) => respond_json(request, status, value),
        Err(err) => {
            let status = err.http_status();
            if status >= 500 {
                error!("{} {} failed: {}", method, path, err);
                respond_json(
                    request,
                    status,
                    serde_json::json!({ "error": "internal_error" }),
                );
            } else {
                respond_json(
                    request,
                    status,
                    serde_json::json!({ "error": err.code(), "details": err.to_string() }),
                );
            }
        }
    }
}

pub(crate) fn json_content_type() -> tiny_http::Header {
    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("static header")
}

pub(crate) fn respond_json(request: tiny_http::Request, status: u16, value: serde_json::Value) {
    let body = value.to_string();
    let response = Response::from_string(body)
        .with_status_code(status)
        .with_header(json_content_type());
    let _ = request.respond(response);
}

/// Minimal percent-decoding for path segments and query values.
pub(crate) fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let hex = &input[i + 1..i + 3];
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

/// Parse `k=v&k2=v2` query strings, decoding both sides.
pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (url_decode(k), url_decode(v)),
            None => (url_decode(pair), String::new()),
        })
        .collect()
}

pub(crate) fn query_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Uniform handler result: HTTP status plus JSON body.
pub type HandlerResult = Result<(u16, serde_json::Value)>;
