//! Live-reload channel
//!
//! Compile tasks publish [`ReloadEvent`]s on a broadcast channel. A small
//! WebSocket hub forwards each event to every connected browser as JSON; the
//! client script injected into served pages reacts to them.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tungstenite::protocol::Message;
use tungstenite::WebSocket;

use crate::error::{PipeError, Result};

/// Ports tried after the configured one is taken
const MAX_PORT_RETRIES: u16 = 10;

const CHANNEL_CAPACITY: usize = 64;

/// What changed, as far as the browser is concerned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ReloadEvent {
    /// A stylesheet was rewritten; `path` is its URL path
    #[serde(rename = "css")]
    StyleChanged { path: String },
    /// Reload the whole page
    #[serde(rename = "reload")]
    FullReload,
}

impl ReloadEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Sender side of the reload channel; cheap to clone
#[derive(Debug, Clone)]
pub struct ReloadChannel {
    tx: broadcast::Sender<ReloadEvent>,
}

impl Default for ReloadChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; returns the number of listeners that got it
    pub fn send(&self, event: ReloadEvent) -> usize {
        tracing::debug!(?event, "reload event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.tx.subscribe()
    }
}

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Start the WebSocket hub; returns the port it bound
pub fn start(host: &str, base_port: u16, channel: &ReloadChannel) -> Result<u16> {
    let listener = bind_with_retry(host, base_port)?;
    let port = listener.local_addr()?.port();
    let clients: Clients = Arc::new(Mutex::new(Vec::new()));

    // Subscribe before returning so no event sent afterwards is missed
    let mut rx = channel.subscribe();

    let acceptor_clients = Arc::clone(&clients);
    std::thread::Builder::new()
        .name("reload-accept".into())
        .spawn(move || accept_loop(listener, acceptor_clients))?;

    std::thread::Builder::new()
        .name("reload-broadcast".into())
        .spawn(move || loop {
            match rx.blocking_recv() {
                Ok(event) => broadcast(&clients, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "reload hub lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        })?;

    tracing::debug!(port, "live reload listening");
    Ok(port)
}

fn bind_with_retry(host: &str, base_port: u16) -> Result<TcpListener> {
    let mut last_error = None;

    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                if offset > 0 {
                    tracing::info!("reload port {base_port} in use, using {port} instead");
                }
                return Ok(listener);
            }
            Err(e) => last_error = Some(e),
        }
        if base_port == 0 {
            break;
        }
    }

    Err(PipeError::Server {
        address: format!("{host}:{base_port}"),
        message: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

fn accept_loop(listener: TcpListener, clients: Clients) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!("reload accept failed: {e}");
                continue;
            }
        };

        match tungstenite::accept(stream) {
            Ok(mut ws) => {
                let mut clients = clients.lock();
                let hello = Message::text(r#"{"type":"connected"}"#);
                if let Err(e) = ws.send(hello) {
                    tracing::debug!("failed to greet reload client: {e}");
                    continue;
                }
                clients.push(ws);
                tracing::debug!(total = clients.len(), "reload client connected");
            }
            Err(e) => tracing::debug!("reload handshake failed: {e}"),
        }
    }
}

fn broadcast(clients: &Clients, event: &ReloadEvent) {
    let msg = Message::text(event.to_json());
    let mut clients = clients.lock();

    clients.retain_mut(|ws| match ws.send(msg.clone()) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("reload client dropped: {e}");
            false
        }
    });
}

const CLIENT_SCRIPT: &str = r#"<script>
(function () {
  var notify = __NOTIFY__;
  var socket = new WebSocket("ws://" + (location.hostname || "localhost") + ":__PORT__");

  function banner(text) {
    var el = document.createElement("div");
    el.textContent = text;
    el.style.cssText = "position:fixed;top:0;right:0;z-index:9999;padding:6px 12px;" +
      "background:#1b1b1b;color:#fff;font:12px sans-serif;";
    document.body.appendChild(el);
    setTimeout(function () { el.remove(); }, 1500);
  }

  function basename(href) {
    return href.split("?")[0].split("/").pop();
  }

  function swapStyles(path) {
    var name = basename(path);
    var links = document.querySelectorAll('link[rel="stylesheet"]');
    var swapped = false;
    links.forEach(function (link) {
      if (basename(link.getAttribute("href") || "") === name) {
        link.href = link.href.split("?")[0] + "?v=" + Date.now();
        swapped = true;
      }
    });
    if (!swapped) location.reload();
  }

  socket.onmessage = function (event) {
    var msg = JSON.parse(event.data);
    if (msg.type === "css") swapStyles(msg.path);
    else if (msg.type === "reload") location.reload();
    else if (msg.type === "connected" && notify) banner("Connected");
  };
})();
</script>
"#;

/// Script tag injected into served HTML
pub fn client_script(port: u16, notify: bool) -> String {
    CLIENT_SCRIPT
        .replace("__PORT__", &port.to_string())
        .replace("__NOTIFY__", if notify { "true" } else { "false" })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_text(ws: &mut WebSocket<tungstenite::stream::MaybeTlsStream<TcpStream>>) -> String {
        loop {
            if let Message::Text(text) = ws.read().unwrap() {
                return text.as_str().to_string();
            }
        }
    }

    #[test]
    fn test_event_json() {
        let css = ReloadEvent::StyleChanged {
            path: "/static/assets/main.css".to_string(),
        };
        assert_eq!(
            css.to_json(),
            r#"{"type":"css","path":"/static/assets/main.css"}"#
        );
        assert_eq!(ReloadEvent::FullReload.to_json(), r#"{"type":"reload"}"#);
    }

    #[test]
    fn test_send_without_listeners() {
        let channel = ReloadChannel::new();
        assert_eq!(channel.send(ReloadEvent::FullReload), 0);

        let mut rx = channel.subscribe();
        assert_eq!(channel.send(ReloadEvent::FullReload), 1);
        assert_eq!(rx.try_recv().unwrap(), ReloadEvent::FullReload);
    }

    #[test]
    fn test_client_script_placeholders() {
        let script = client_script(35730, true);
        assert!(script.contains(":35730\""));
        assert!(script.contains("var notify = true;"));
        assert!(!script.contains("__PORT__"));

        assert!(client_script(35729, false).contains("var notify = false;"));
    }

    #[test]
    fn test_browser_receives_events() {
        let channel = ReloadChannel::new();
        let port = start("127.0.0.1", 0, &channel).unwrap();

        let (mut ws, _) = tungstenite::connect(format!("ws://127.0.0.1:{port}")).unwrap();
        assert_eq!(read_text(&mut ws), r#"{"type":"connected"}"#);

        channel.send(ReloadEvent::StyleChanged {
            path: "/static/assets/main.css".to_string(),
        });
        channel.send(ReloadEvent::FullReload);

        assert_eq!(
            read_text(&mut ws),
            r#"{"type":"css","path":"/static/assets/main.css"}"#
        );
        assert_eq!(read_text(&mut ws), r#"{"type":"reload"}"#);
    }

    #[test]
    fn test_taken_port_moves_on() {
        let held = TcpListener::bind("127.0.0.1:0").unwrap();
        let taken = held.local_addr().unwrap().port();

        let listener = bind_with_retry("127.0.0.1", taken).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), taken);
    }
}
