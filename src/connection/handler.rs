//! Connection Session
//!
//! One session per client, each in its own task. A session owns its
//! transport, its line buffer and a clone of the command handler; the
//! storage engine is the only thing it shares with other sessions.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, connected_clients += 1
//!        │
//!        ▼
//! 2. Ready banner sent
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  Drain complete lines        │
//!    │    execute, write reply      │
//!    │  Flush                       │
//!    │  Read more bytes             │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │  peer closed / I/O error / shutdown
//!        ▼
//! 4. connected_clients -= 1 (guard dropped on every exit path)
//! ```
//!
//! The transport is anything implementing `AsyncRead + AsyncWrite`, so the
//! same loop serves TCP sockets and in-memory pipes.

use crate::commands::CommandHandler;
use crate::protocol::{LineCodec, ParseError, Reply};
use std::fmt::Display;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Sent to every client right after it connects
pub const READY_BANNER: &[u8] = b"+OK driftkv server ready\r\n";

/// Handles a single client connection.
pub struct ConnectionHandler<S> {
    /// The transport for this connection
    stream: BufWriter<S>,

    /// Client label (for logging)
    peer: String,

    /// Buffered input not yet turned into requests
    codec: LineCodec,

    /// The command handler (shared storage)
    command_handler: CommandHandler,

    /// Server-wide shutdown signal, if any
    shutdown: Option<watch::Receiver<bool>>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The transport for this connection
    /// * `peer` - How the client shows up in logs
    /// * `command_handler` - The command handler for executing commands
    pub fn new(stream: S, peer: impl Display, command_handler: CommandHandler) -> Self {
        Self {
            stream: BufWriter::new(stream),
            peer: peer.to_string(),
            codec: LineCodec::new(),
            command_handler,
            shutdown: None,
        }
    }

    /// Ends the session once `shutdown` turns `true` or its sender is dropped.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Runs the session until the client leaves, the transport fails or
    /// the server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let _client = self.command_handler.stats().client_connected();
        info!(client = %self.peer, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.peer, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.peer, "Client disconnected")
            }
            Err(ConnectionError::Shutdown) => {
                debug!(client = %self.peer, "Session closed for shutdown")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Connection error"),
        }

        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        self.stream.write_all(READY_BANNER).await?;
        self.stream.flush().await?;

        loop {
            let mut replies = 0usize;
            while let Some(reply) = self.next_reply()? {
                self.stream.write_all(&reply.encode()).await?;
                replies += 1;
            }

            if replies > 0 {
                self.stream.flush().await?;
                trace!(client = %self.peer, replies = replies, "Sent replies");
            }

            self.read_more_data().await?;
        }
    }

    /// Produces the reply for the next buffered request, if any.
    fn next_reply(&mut self) -> Result<Option<Reply>, ConnectionError> {
        match self.codec.next_request() {
            Ok(Some(request)) => {
                trace!(client = %self.peer, command = %request.name, "Executing command");
                Ok(Some(self.command_handler.execute(&request)))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_recoverable() => {
                warn!(client = %self.peer, error = %e, "Rejected command line");
                Ok(Some(Reply::error(e.to_string())))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads more data from the transport into the codec buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        let n = tokio::select! {
            read = self.stream.get_mut().read_buf(self.codec.buffer_mut()) => read?,
            _ = shutdown_requested(&mut self.shutdown) => return Err(ConnectionError::Shutdown),
        };

        if n == 0 {
            if self.codec.buffered() > 0 {
                debug!(
                    client = %self.peer,
                    buffered = self.codec.buffered(),
                    "Peer closed with a partial command"
                );
                return Err(ConnectionError::UnexpectedEof);
            }
            return Err(ConnectionError::ClientDisconnected);
        }

        trace!(client = %self.peer, bytes = n, "Read data");
        Ok(())
    }
}

/// Resolves when shutdown is signalled; never resolves without a signal.
async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        // A dropped sender counts as shutdown too
        Some(rx) => {
            let _ = rx.wait_for(|stop| *stop).await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input that cannot be framed (e.g. a line over the length limit)
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Client disconnected in the middle of a line
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// The server is shutting down
    #[error("Server shutting down")]
    Shutdown,
}

/// Runs a session for an accepted TCP connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    shutdown: watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler).with_shutdown(shutdown);
    if let Err(e) = handler.run().await {
        trace!(client = %addr, error = %e, "Session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ServerStats;
    use crate::storage::StorageEngine;
    use std::sync::Arc;
    use tokio::io::{duplex, DuplexStream};
    use tokio::task::JoinHandle;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(StorageEngine::new()), Arc::new(ServerStats::new()))
    }

    /// Starts a session over an in-memory pipe and consumes the banner.
    async fn connect(
        handler: &CommandHandler,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> (DuplexStream, JoinHandle<Result<(), ConnectionError>>) {
        let (mut client, server) = duplex(64 * 1024);
        let mut session = ConnectionHandler::new(server, "test-client", handler.clone());
        if let Some(rx) = shutdown {
            session = session.with_shutdown(rx);
        }
        let task = tokio::spawn(session.run());

        expect(&mut client, READY_BANNER).await;
        (client, task)
    }

    async fn expect(client: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    #[tokio::test]
    async fn test_pipelined_commands_in_one_write() {
        let handler = create_handler();
        let (mut client, _task) = connect(&handler, None).await;

        client.write_all(b"SET a 1\nGET a\n").await.unwrap();
        expect(&mut client, b"+OK\r\n$1\r\n1\r\n").await;
    }

    #[tokio::test]
    async fn test_command_split_across_writes() {
        let handler = create_handler();
        let (mut client, _task) = connect(&handler, None).await;

        client.write_all(b"SET fo").await.unwrap();
        client.flush().await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"o bar\r\nGET foo\r").await.unwrap();
        expect(&mut client, b"+OK\r\n").await;

        client.write_all(b"\n").await.unwrap();
        expect(&mut client, b"$3\r\nbar\r\n").await;
    }

    #[tokio::test]
    async fn test_blank_lines_get_no_reply() {
        let handler = create_handler();
        let (mut client, _task) = connect(&handler, None).await;

        client.write_all(b"\r\n   \n\nPING\n").await.unwrap();
        expect(&mut client, b"+PONG\r\n").await;
        assert_eq!(handler.stats().commands_processed(), 1);
    }

    #[tokio::test]
    async fn test_errors_do_not_end_session() {
        let handler = create_handler();
        let (mut client, _task) = connect(&handler, None).await;

        client.write_all(b"FOO\nGET \xff\nGET\nPING\n").await.unwrap();
        expect(
            &mut client,
            b"-ERR unknown command 'FOO'\r\n\
              -ERR invalid UTF-8 in command line\r\n\
              -ERR wrong number of arguments for 'get' command\r\n\
              +PONG\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_disconnect_releases_client_count() {
        let handler = create_handler();
        let (client, task) = connect(&handler, None).await;

        assert_eq!(handler.stats().connected_clients(), 1);

        drop(client);
        let result = task.await.unwrap();

        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(handler.stats().connected_clients(), 0);
        assert_eq!(handler.stats().connections_received(), 1);
    }

    #[tokio::test]
    async fn test_partial_line_at_close() {
        let handler = create_handler();
        let (mut client, task) = connect(&handler, None).await;

        client.write_all(b"SET half").await.unwrap();
        client.shutdown().await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
        assert!(handler.storage().is_empty());
        assert_eq!(handler.stats().connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_session() {
        let handler = create_handler();
        let (tx, rx) = watch::channel(false);
        let (_client, task) = connect(&handler, Some(rx)).await;

        tx.send(true).unwrap();
        let result = task.await.unwrap();

        assert!(matches!(result, Err(ConnectionError::Shutdown)));
        assert_eq!(handler.stats().connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_line_too_long_closes_session() {
        let handler = create_handler();
        let (mut client, task) = connect(&handler, None).await;

        let junk = vec![b'x'; crate::protocol::MAX_LINE_LENGTH + 1];
        let _ = client.write_all(&junk).await;

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(ConnectionError::Parse(ParseError::LineTooLong { .. }))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_see_own_writes() {
        let handler = create_handler();
        let mut clients = Vec::new();

        for i in 0..8 {
            let handler = handler.clone();
            clients.push(tokio::spawn(async move {
                let (mut client, _task) = connect(&handler, None).await;
                for j in 0..50 {
                    let key = format!("k{}-{}", i, j);
                    let value = format!("v{}-{}", i, j);

                    client
                        .write_all(format!("SET {} {}\nGET {}\n", key, value, key).as_bytes())
                        .await
                        .unwrap();
                    let get = format!("+OK\r\n${}\r\n{}\r\n", value.len(), value);
                    expect(&mut client, get.as_bytes()).await;

                    client
                        .write_all(format!("DEL {}\nEXISTS {}\n", key, key).as_bytes())
                        .await
                        .unwrap();
                    expect(&mut client, b":1\r\n:0\r\n").await;
                }
                client
            }));
        }

        for client in clients {
            client.await.unwrap();
        }

        assert!(handler.storage().is_empty());
        assert_eq!(handler.stats().commands_processed(), 8 * 50 * 4);
    }

    #[tokio::test]
    async fn test_scripted_transport() {
        let mock = tokio_test::io::Builder::new()
            .write(READY_BANNER)
            .read(b"SET a 1\nGET a\nTTL a\n")
            .write(b"+OK\r\n$1\r\n1\r\n:-1\r\n")
            .build();

        let result = ConnectionHandler::new(mock, "mock", create_handler())
            .run()
            .await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }
}
