//! Blocking client for a render server

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::RemoteError;
use crate::protocol::{RemoteEvent, RemoteReply};

struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Connection {
    fn open(addr: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { writer: stream, reader })
    }

    fn exchange(&mut self, json: &str, addr: &str) -> Result<RemoteReply, RemoteError> {
        self.writer.write_all(json.as_bytes())?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(RemoteError::Closed(addr.to_string()));
        }
        Ok(serde_json::from_str(&line)?)
    }
}

/// Client of one render server. Each event gets exactly one reply.
///
/// A failed exchange (timeout included) drops the connection, so a late
/// reply can never be taken for the answer to a later event. The next
/// event reconnects.
pub struct RemoteClient {
    addr: String,
    timeout: Duration,
    conn: Option<Connection>,
}

impl RemoteClient {
    /// Connect with `timeout` applied to every read.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let conn = Connection::open(addr, timeout)?;
        log::info!("Connected to render server {}", addr);
        Ok(Self {
            addr: addr.to_string(),
            timeout,
            conn: Some(conn),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// False after a failed exchange until the next event reconnects
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Send an event and wait for its reply. Error replies become `Err`.
    pub fn send(&mut self, event: &RemoteEvent) -> Result<RemoteReply, RemoteError> {
        let mut json = serde_json::to_string(event)?;
        json.push('\n');

        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                log::info!("Reconnecting to render server {}", self.addr);
                Connection::open(&self.addr, self.timeout)?
            }
        };
        let reply = match conn.exchange(&json, &self.addr) {
            Ok(reply) => {
                self.conn = Some(conn);
                reply
            }
            Err(e) => {
                log::warn!("Dropping connection to {}: {}", self.addr, e);
                return Err(e);
            }
        };
        match reply {
            RemoteReply::Error { message } => Err(RemoteError::Server(message)),
            reply => Ok(reply),
        }
    }

    /// Send an event that must be acknowledged with `Ok`
    pub fn send_ack(&mut self, event: &RemoteEvent) -> Result<(), RemoteError> {
        match self.send(event)? {
            RemoteReply::Ok => Ok(()),
            other => Err(RemoteError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    pub fn ping(&mut self) -> Result<(), RemoteError> {
        self.send_ack(&RemoteEvent::Ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireCamera;
    use crate::server::{RenderHandler, RenderServer};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl RenderHandler for Recorder {
        fn handle_event(&mut self, event: RemoteEvent) -> RemoteReply {
            match event {
                RemoteEvent::Render { rect, frame, .. } => {
                    self.events.push(format!("render {frame}"));
                    let count = (rect[2] * rect[3]) as usize * 4;
                    RemoteReply::Tile { rect, frame, pixels: vec![0.5; count] }
                }
                RemoteEvent::Resize { width, height } => {
                    self.events.push(format!("resize {width}x{height}"));
                    RemoteReply::Ok
                }
                RemoteEvent::NewParameter { id, .. } if id == "Bogus" => RemoteReply::error("unknown parameter"),
                other => {
                    self.events.push(format!("{other:?}"));
                    RemoteReply::Ok
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_server_roundtrip() {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let server = RenderServer::start(recorder.clone(), "127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();

        let events = tokio::task::spawn_blocking(move || {
            let mut client = RemoteClient::connect(&addr, Duration::from_secs(5)).unwrap();
            client.ping().unwrap();
            client.send_ack(&RemoteEvent::Resize { width: 8, height: 4 }).unwrap();

            let camera = WireCamera { modelview: [0.0; 16], projection: [0.0; 16], viewport: [0, 0, 8, 4] };
            let reply = client
                .send(&RemoteEvent::Render { camera, rect: [1, 1, 2, 2], frame: 3 })
                .unwrap();
            let RemoteReply::Tile { pixels, frame, .. } = reply else { panic!("expected tile") };
            assert_eq!(frame, 3);
            assert_eq!(pixels.len(), 16);

            let err = client.send(&RemoteEvent::NewParameter { id: "Bogus".into(), value: serde_json::Value::Null });
            assert!(matches!(err, Err(RemoteError::Server(_))));

            client.send_ack(&RemoteEvent::Exit).unwrap();
            // the server closes the connection after acknowledging exit
            assert!(client.ping().is_err());
        })
        .await;
        assert!(events.is_ok());

        let recorded = recorder.lock().await.events.clone();
        assert_eq!(recorded, vec!["resize 8x4", "render 3", "Exit"]);
    }

    /// Answers pings at once and sleeps through the first render
    struct Sleepy {
        delay: Option<Duration>,
    }

    impl RenderHandler for Sleepy {
        fn handle_event(&mut self, event: RemoteEvent) -> RemoteReply {
            match event {
                RemoteEvent::Render { rect, frame, .. } => {
                    if let Some(delay) = self.delay.take() {
                        std::thread::sleep(delay);
                    }
                    RemoteReply::Tile { rect, frame, pixels: vec![frame as f32; 4] }
                }
                _ => RemoteReply::Ok,
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_late_reply_is_not_read_as_the_next_one() {
        let handler = Arc::new(Mutex::new(Sleepy { delay: Some(Duration::from_millis(300)) }));
        let server = RenderServer::start(handler, "127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();

        let frames = tokio::task::spawn_blocking(move || {
            let mut client = RemoteClient::connect(&addr, Duration::from_millis(100)).unwrap();
            let camera = WireCamera { modelview: [0.0; 16], projection: [0.0; 16], viewport: [0, 0, 1, 1] };
            let first = client.send(&RemoteEvent::Render { camera, rect: [0, 0, 1, 1], frame: 1 });
            assert!(matches!(first, Err(RemoteError::Io(_))));
            assert!(!client.is_connected());

            let mut answered = Vec::new();
            for frame in 2..=8u64 {
                if let Ok(RemoteReply::Tile { frame: got, pixels, .. }) =
                    client.send(&RemoteEvent::Render { camera, rect: [0, 0, 1, 1], frame })
                {
                    assert_eq!(got, frame, "reply for frame {got} taken as frame {frame}");
                    assert_eq!(pixels[0], frame as f32);
                    answered.push(frame);
                }
            }
            answered
        })
        .await
        .unwrap();
        assert!(frames.contains(&8), "client never resynced: {frames:?}");
    }
}
