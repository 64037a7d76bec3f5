//! TCP render server

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::error::RemoteError;
use crate::protocol::{RemoteEvent, RemoteReply};

/// Implemented by whatever renders on the server side
pub trait RenderHandler: Send + 'static {
    fn handle_event(&mut self, event: RemoteEvent) -> RemoteReply;
}

/// Render server handle - keep this alive to keep the server running
pub struct RenderServer {
    local_addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl RenderServer {
    /// Bind `addr` and serve connections in the background.
    /// All connections share `handler`. Must be called inside a tokio runtime.
    pub async fn start(handler: Arc<Mutex<dyn RenderHandler>>, addr: &str) -> Result<Self, RemoteError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Render server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::info!("Render client connected from {}", peer);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, handler).await;
                            log::info!("Render client disconnected: {}", peer);
                        });
                    }
                    Err(e) => {
                        log::error!("Render server accept error: {}", e);
                    }
                }
            }
        });

        Ok(Self { local_addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for RenderServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// What the connection does after answering one request
enum Outcome {
    Continue(RemoteReply),
    Close(RemoteReply),
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    handler: Arc<Mutex<dyn RenderHandler>>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Render server read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let outcome = respond(line.trim(), &handler).await;
        let (Outcome::Continue(reply) | Outcome::Close(reply)) = &outcome;
        if let Err(e) = write_reply(&mut writer, reply).await {
            log::error!("Render server write error: {}", e);
            break;
        }
        if let Outcome::Close(_) = outcome {
            break;
        }
    }
}

async fn respond(line: &str, handler: &Mutex<dyn RenderHandler>) -> Outcome {
    let event = match serde_json::from_str::<RemoteEvent>(line) {
        Ok(event) => event,
        Err(e) => return Outcome::Continue(RemoteReply::error(format!("Invalid event JSON: {}", e))),
    };
    log::debug!("Remote event: {}", event_name(&event));
    match event {
        RemoteEvent::Ping => Outcome::Continue(RemoteReply::Ok),
        RemoteEvent::Exit => Outcome::Close(handler.lock().await.handle_event(RemoteEvent::Exit)),
        event => Outcome::Continue(handler.lock().await.handle_event(event)),
    }
}

async fn write_reply(writer: &mut OwnedWriteHalf, reply: &RemoteReply) -> std::io::Result<()> {
    let mut json = serde_json::to_string(reply).unwrap_or_else(|e| {
        format!("{{\"status\":\"error\",\"message\":\"Serialize error: {}\"}}", e)
    });
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await
}

fn event_name(event: &RemoteEvent) -> &'static str {
    match event {
        RemoteEvent::Render { .. } => "Render",
        RemoteEvent::Resize { .. } => "Resize",
        RemoteEvent::NewParameter { .. } => "NewParameter",
        RemoteEvent::TransferFunction { .. } => "TransferFunction",
        RemoteEvent::Exit => "Exit",
        RemoteEvent::Ping => "Ping",
    }
}
