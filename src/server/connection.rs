//! Per-connection request loop
//!
//! Each accepted connection gets one `Connection` task reading
//! newline-delimited JSON requests. Unary requests are answered in place. A
//! stream request switches the connection into streaming mode: the session
//! owns the write half until it ends, while the read half is watched so a
//! client disconnect (or any stray byte) cancels the stream.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::Message;
use crate::protocol::{Request, Response};
use crate::service::RelayService;
use crate::session::MessageSink;

/// One client connection
pub(crate) struct Connection<S> {
    session_id: u64,
    stream: S,
    service: Arc<RelayService>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub(crate) fn new(session_id: u64, stream: S, service: Arc<RelayService>) -> Self {
        Self {
            session_id,
            stream,
            service,
        }
    }

    /// Serve the connection until the client disconnects
    pub(crate) async fn run(self) -> Result<()> {
        let Self {
            session_id,
            stream,
            service,
        } = self;

        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                tracing::debug!(session_id, "client disconnected");
                return Ok(());
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<Request>(trimmed) {
                Ok(request) => request,
                Err(e) => {
                    let response = Response::Error {
                        code: "invalid_argument".to_string(),
                        message: format!("malformed request: {e}"),
                    };
                    write_line(&mut writer, &response).await?;
                    continue;
                }
            };

            match request {
                Request::JoinRoom { user_id, room_id } => {
                    let response = match service.join_room(&user_id, &room_id).await {
                        Ok(recent_messages) => Response::Joined {
                            success: true,
                            recent_messages,
                        },
                        Err(e) => Response::from_error(&e),
                    };
                    write_line(&mut writer, &response).await?;
                }
                Request::SendMessage {
                    user_id,
                    room_id,
                    content,
                } => {
                    let response = match service.send_message(&user_id, &room_id, &content).await {
                        Ok(message) => Response::Sent {
                            success: true,
                            message,
                        },
                        Err(e) => Response::from_error(&e),
                    };
                    write_line(&mut writer, &response).await?;
                }
                Request::LeaveRoom { user_id, room_id } => {
                    let response = match service.leave_room(&user_id, &room_id).await {
                        Ok(()) => Response::Left { success: true },
                        Err(e) => Response::from_error(&e),
                    };
                    write_line(&mut writer, &response).await?;
                }
                Request::StreamMessages { user_id, room_id } => {
                    // Streaming takes over the connection; when the stream
                    // ends the connection is done.
                    return stream_to_client(
                        &service,
                        session_id,
                        &mut reader,
                        &mut writer,
                        user_id,
                        room_id,
                    )
                    .await;
                }
            }
        }
    }
}

/// Run a stream session over the connection's write half
async fn stream_to_client<R, W>(
    service: &RelayService,
    session_id: u64,
    reader: &mut R,
    writer: &mut W,
    user_id: String,
    room_id: String,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    tracing::debug!(session_id, room = %room_id, user = %user_id, "connection entering stream mode");

    let cancel = CancellationToken::new();
    let result = {
        let mut sink = LineSink {
            writer: &mut *writer,
        };
        let stream_fut = service.stream_messages(&user_id, &room_id, &mut sink, cancel.clone());
        tokio::pin!(stream_fut);

        let mut buf = String::new();
        loop {
            tokio::select! {
                result = &mut stream_fut => break result,
                // EOF, a read error, or any client bytes end the stream
                _ = reader.read_line(&mut buf) => {
                    cancel.cancel();
                    break stream_fut.await;
                }
            }
        }
    };

    if let Err(ref e) = result {
        tracing::debug!(session_id, error = %e, "stream ended with error");
        // Best effort: if the sink itself failed the peer is already gone
        let _ = write_line(writer, &Response::from_error(e)).await;
    }
    result
}

async fn write_line<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut line = serde_json::to_vec(response).map_err(io::Error::from)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// [`MessageSink`] writing `message` responses as JSON lines
struct LineSink<'a, W> {
    writer: &'a mut W,
}

#[async_trait]
impl<'a, W> MessageSink for LineSink<'a, W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &Message) -> io::Result<()> {
        let response = Response::Message {
            message: message.clone(),
        };
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;
    use tokio_test::assert_ok;

    use super::*;
    use crate::store::MemoryStore;

    struct TestClient {
        reader: BufReader<tokio::io::ReadHalf<DuplexStream>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
    }

    impl TestClient {
        async fn request(&mut self, request: &Request) -> Response {
            self.send_raw(&serde_json::to_string(request).unwrap()).await;
            self.next_response().await
        }

        async fn send_raw(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn next_response(&mut self) -> Response {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            serde_json::from_str(&line).unwrap()
        }
    }

    fn start_connection(
        service: Arc<RelayService>,
    ) -> (TestClient, tokio::task::JoinHandle<Result<()>>) {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let handle = tokio::spawn(Connection::new(1, server_side, service).run());

        let (read_half, writer) = tokio::io::split(client_side);
        let client = TestClient {
            reader: BufReader::new(read_half),
            writer,
        };
        (client, handle)
    }

    fn service() -> Arc<RelayService> {
        Arc::new(RelayService::new(Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn test_unary_request_flow() {
        let (mut client, handle) = start_connection(service());

        let response = client
            .request(&Request::JoinRoom {
                user_id: "alice".into(),
                room_id: "weather".into(),
            })
            .await;
        assert_eq!(
            response,
            Response::Joined {
                success: true,
                recent_messages: vec![],
            }
        );

        let response = client
            .request(&Request::SendMessage {
                user_id: "alice".into(),
                room_id: "weather".into(),
                content: "hello".into(),
            })
            .await;
        let Response::Sent { success, message } = response else {
            panic!("expected sent response");
        };
        assert!(success);
        assert_eq!(message.content, "hello");

        let response = client
            .request(&Request::LeaveRoom {
                user_id: "alice".into(),
                room_id: "weather".into(),
            })
            .await;
        assert_eq!(response, Response::Left { success: true });

        drop(client);
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let (mut client, handle) = start_connection(service());

        client.send_raw("this is not json").await;
        let Response::Error { code, .. } = client.next_response().await else {
            panic!("expected error response");
        };
        assert_eq!(code, "invalid_argument");

        // Connection still serves valid requests afterwards
        let response = client
            .request(&Request::JoinRoom {
                user_id: "alice".into(),
                room_id: "weather".into(),
            })
            .await;
        assert!(matches!(response, Response::Joined { .. }));

        drop(client);
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_non_member_send_gets_error_response() {
        let (mut client, handle) = start_connection(service());

        let response = client
            .request(&Request::SendMessage {
                user_id: "mallory".into(),
                room_id: "weather".into(),
                content: "let me in".into(),
            })
            .await;
        let Response::Error { code, .. } = response else {
            panic!("expected error response");
        };
        assert_eq!(code, "permission_denied");

        drop(client);
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_mode_until_disconnect() {
        let service = service();
        service.join_room("bob", "weather").await.unwrap();

        let (mut client, handle) = start_connection(service.clone());

        let response = client
            .request(&Request::StreamMessages {
                user_id: "bob".into(),
                room_id: "weather".into(),
            })
            .await;
        let Response::Message { message } = response else {
            panic!("expected streamed keep-alive");
        };
        assert!(message.is_keep_alive());

        // Client disconnect cancels the stream and cleans up the registry
        drop(client);
        assert_ok!(handle.await.unwrap());
        assert_eq!(service.registry().subscriber_count("weather").await, 0);
    }

    #[tokio::test]
    async fn test_stream_rejects_non_member() {
        let (mut client, handle) = start_connection(service());

        let response = client
            .request(&Request::StreamMessages {
                user_id: "mallory".into(),
                room_id: "weather".into(),
            })
            .await;
        let Response::Error { code, .. } = response else {
            panic!("expected error response");
        };
        assert_eq!(code, "permission_denied");

        // The failed stream closes the connection with the error
        drop(client);
        assert!(handle.await.unwrap().is_err());
    }
}
