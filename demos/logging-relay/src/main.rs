//! Relays one viewer to one simulator and logs every message as JSON.
//!
//! ```text
//! LLUDP_LISTEN=127.0.0.1:13001 LLUDP_UPSTREAM=203.0.113.7:13000 \
//!     RUST_LOG=info cargo run -p logging-relay
//! ```

use lludp_protocol::Message;
use lludp_proxy::{MessageHook, ProxyConfig, ProxyServer, Session, Verdict};
use tracing_subscriber::EnvFilter;

/// Messages too chatty to log at info.
const NOISY: &[&str] = &["AgentUpdate", "PacketAck", "StartPingCheck", "CompletePingCheck"];

struct LogEverything;

impl MessageHook for LogEverything {
    fn on_message(&mut self, _session: &mut Session, message: &mut Message) -> Verdict {
        let json = message.to_dict().to_string();
        if NOISY.iter().any(|name| *name == message.name()) {
            tracing::debug!(direction = %message.direction(), %json, "message");
        } else {
            tracing::info!(direction = %message.direction(), %json, "message");
        }
        Verdict::Forward
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let defaults = ProxyConfig::default();
    let listen = std::env::var("LLUDP_LISTEN").unwrap_or_else(|_| "127.0.0.1:13001".to_string());
    let upstream = std::env::var("LLUDP_UPSTREAM").unwrap_or(defaults.upstream_addr);

    let server = ProxyServer::builder()
        .listen(&listen)
        .upstream(&upstream)
        .hook(LogEverything)
        .build()
        .await?;
    tracing::info!(viewer_addr = %server.local_addr()?, "point the viewer here");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}
