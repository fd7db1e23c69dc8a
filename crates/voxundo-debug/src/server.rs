//! TCP status server

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::protocol::{ProtocolError, StatusCommand, StatusResponse, parse_command};

/// Trait that the application implements to answer status commands
pub trait StatusHandler: Send + Sync + 'static {
    fn handle_command(&mut self, cmd: StatusCommand) -> StatusResponse;
}

/// Status server handle - keep this alive to keep the server running
pub struct StatusServer {
    local_addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl StatusServer {
    /// Bind to `127.0.0.1:port` (0 picks a free port) and serve in the
    /// background. The handler is called for each incoming command.
    pub async fn start(handler: Arc<Mutex<dyn StatusHandler>>, port: u16) -> std::io::Result<Self> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&addr).await.inspect_err(|e| {
            log::error!("Failed to bind status server on {}: {}", addr, e);
        })?;
        let local_addr = listener.local_addr()?;
        log::info!("Status server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        log::info!("Status client connected from {}", peer);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, handler).await;
                            log::info!("Status client disconnected: {}", peer);
                        });
                    }
                    Err(e) => {
                        log::error!("Status server accept error: {}", e);
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

impl Drop for StatusServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, handler: Arc<Mutex<dyn StatusHandler>>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // Connection closed
            Ok(_) => {
                let response = match parse_command(&line) {
                    Ok(cmd) => {
                        log::debug!("Status command: {:?}", cmd);
                        let mut h = handler.lock().await;
                        h.handle_command(cmd)
                    }
                    Err(ProtocolError::Empty) => continue,
                    Err(e) => StatusResponse::error(e.to_string()),
                };

                let mut resp_json = serde_json::to_string(&response).unwrap_or_else(|e| {
                    format!("{{\"status\":\"error\",\"message\":\"Serialize error: {}\"}}", e)
                });
                resp_json.push('\n');

                if let Err(e) = writer.write_all(resp_json.as_bytes()).await {
                    log::error!("Status server write error: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    log::error!("Status server flush error: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::error!("Status server read error: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseData;
    use tokio::net::TcpStream;

    struct Counter {
        aborts: u32,
    }

    impl StatusHandler for Counter {
        fn handle_command(&mut self, cmd: StatusCommand) -> StatusResponse {
            match cmd {
                StatusCommand::Ping => StatusResponse::pong(),
                StatusCommand::AbortComplex => {
                    self.aborts += 1;
                    StatusResponse::none()
                }
                _ => StatusResponse::error("unsupported"),
            }
        }
    }

    async fn round_trip(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, writer: &mut tokio::net::tcp::OwnedWriteHalf, request: &str) -> StatusResponse {
        writer.write_all(request.as_bytes()).await.unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_serves_line_delimited_json() {
        let handler = Arc::new(Mutex::new(Counter { aborts: 0 }));
        let server = StatusServer::start(handler.clone(), 0).await.unwrap();

        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let pong = round_trip(&mut reader, &mut writer, "{\"cmd\":\"Ping\"}\n").await;
        assert_eq!(pong, StatusResponse::pong());

        // Blank lines are skipped without a reply
        let none = round_trip(&mut reader, &mut writer, "\n{\"cmd\":\"AbortComplex\"}\n").await;
        assert_eq!(none, StatusResponse::ok(ResponseData::None));
        assert_eq!(handler.lock().await.aborts, 1);

        let bad = round_trip(&mut reader, &mut writer, "nonsense\n").await;
        assert!(matches!(bad, StatusResponse::Error { .. }));
    }
}
