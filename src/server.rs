//! Static development server
//!
//! Serves the document root over HTTP with `tiny_http` and injects the
//! live-reload client into every HTML page.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use tiny_http::{Header, Request, Response, Server, StatusCode};

use crate::config::ServerSettings;
use crate::error::{PipeError, Result};
use crate::reload::{self, ReloadChannel};

/// A running server
#[derive(Debug, Clone)]
pub struct DevServer {
    pub addr: SocketAddr,
    pub reload_port: u16,
}

impl DevServer {
    /// Start the live-reload hub, bind the HTTP server and serve on a thread
    pub fn start(settings: &ServerSettings, channel: &ReloadChannel) -> Result<Self> {
        let reload_port = reload::start(&settings.host, settings.reload_port, channel)?;

        let address = format!("{}:{}", settings.host, settings.port);
        let server = Server::http(&address).map_err(|e| PipeError::Server {
            address: address.clone(),
            message: e.to_string(),
        })?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| PipeError::Server {
                address: address.clone(),
                message: "not an IP listener".to_string(),
            })?;

        let root = settings.base_dir.clone();
        let script = reload::client_script(reload_port, settings.notify);

        std::thread::Builder::new()
            .name("dev-server".into())
            .spawn(move || {
                for request in server.incoming_requests() {
                    if let Err(e) = handle(request, &root, &script) {
                        tracing::debug!("request failed: {e}");
                    }
                }
            })?;

        tracing::info!(%addr, reload_port, "dev server listening");
        Ok(Self { addr, reload_port })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// What a request URL maps to
#[derive(Debug, PartialEq, Eq)]
enum Resolved {
    File(PathBuf),
    Forbidden,
    NotFound,
}

fn resolve_url(url: &str, root: &Path) -> Resolved {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let relative = decoded.trim_matches('/');

    if relative.split(['/', '\\']).any(|part| part == "..") {
        return Resolved::Forbidden;
    }

    let local = root.join(relative);
    if local.is_file() {
        return Resolved::File(local);
    }

    let index = local.join("index.html");
    if local.is_dir() && index.is_file() {
        return Resolved::File(index);
    }

    Resolved::NotFound
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Insert `script` before the last `</body>`, or append it
fn inject_script(body: &[u8], script: &str) -> Vec<u8> {
    const PATTERN: &[u8] = b"</body>";

    let pos = body
        .windows(PATTERN.len())
        .rposition(|w| w.eq_ignore_ascii_case(PATTERN))
        .unwrap_or(body.len());

    let mut out = Vec::with_capacity(body.len() + script.len());
    out.extend_from_slice(&body[..pos]);
    out.extend_from_slice(script.as_bytes());
    out.extend_from_slice(&body[pos..]);
    out
}

fn header(key: &str, value: &str) -> Option<Header> {
    Header::from_bytes(key.as_bytes(), value.as_bytes()).ok()
}

fn send(request: Request, status: u16, mime: &str, body: Vec<u8>) -> std::io::Result<()> {
    let mut response = Response::from_data(body).with_status_code(StatusCode(status));
    if let Some(h) = header("Content-Type", mime) {
        response.add_header(h);
    }
    if let Some(h) = header("Cache-Control", "no-cache") {
        response.add_header(h);
    }
    request.respond(response)
}

fn handle(request: Request, root: &Path, script: &str) -> std::io::Result<()> {
    let plain = "text/plain; charset=utf-8";

    match resolve_url(request.url(), root) {
        Resolved::File(path) => {
            let mime = content_type(&path);
            let body = match std::fs::read(&path) {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(path = %path.display(), "read failed: {e}");
                    return send(request, 500, plain, b"500 Internal Server Error".to_vec());
                }
            };
            let body = if mime.starts_with("text/html") {
                inject_script(&body, script)
            } else {
                body
            };
            send(request, 200, mime, body)
        }
        Resolved::Forbidden => send(request, 403, plain, b"403 Forbidden".to_vec()),
        Resolved::NotFound => send(request, 404, plain, b"404 Not Found".to_vec()),
    }
}
