//! Newline-delimited JSON over TCP.

use async_trait::async_trait;
use mcc_core::ClosingCode;
use mcc_protocol::{
    decode_relay_line, encode_line, ClientMessage, FrameError, RelayMessage, MAX_FRAME_SIZE,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Connection, FrameSink, FrameStream, TransportError, TransportFactory};

/// Inbound frames buffered between the socket reader and the session.
const INBOUND_BUFFER: usize = 64;

/// Connects to relays over plain TCP, one JSON message per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransportFactory;

impl TcpTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for TcpTransportFactory {
    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(endpoint, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let reader_task = tokio::spawn(read_frames(BufReader::new(reader), tx));

        debug!(endpoint, "TCP connection established");
        Ok(Connection::new(
            endpoint,
            Box::new(TcpSink {
                writer: BufWriter::new(writer),
            }),
            Box::new(TcpFrameStream {
                rx,
                reader_task,
            }),
        ))
    }
}

/// Reads lines until EOF or an I/O error, forwarding decoded frames.
///
/// Runs as its own task so `FrameStream::recv` is a cancel-safe channel
/// receive rather than a partially consumed `read_line`.
async fn read_frames(
    mut reader: BufReader<OwnedReadHalf>,
    tx: mpsc::Sender<Result<RelayMessage, TransportError>>,
) {
    let limit = (MAX_FRAME_SIZE + 2) as u64;
    let mut line = String::new();

    loop {
        line.clear();
        let outcome = match (&mut reader).take(limit).read_line(&mut line).await {
            Ok(0) => {
                let _ = tx.send(Err(TransportError::Closed { code: None })).await;
                return;
            }
            Ok(_) if !line.ends_with('\n') && line.len() > MAX_FRAME_SIZE => {
                // The rest of the oversized line cannot be skipped reliably.
                warn!(size = line.len(), "Relay frame exceeds size limit");
                let _ = tx
                    .send(Err(TransportError::Io(format!(
                        "frame exceeds {MAX_FRAME_SIZE} bytes"
                    ))))
                    .await;
                return;
            }
            Ok(_) => match decode_relay_line(&line) {
                Ok(message) => Ok(message),
                Err(FrameError::Empty) => continue,
                Err(e) => Err(TransportError::Malformed(e.to_string())),
            },
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };

        if tx.send(outcome).await.is_err() {
            return;
        }
    }
}

struct TcpSink {
    writer: BufWriter<OwnedWriteHalf>,
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        let line = encode_line(message).map_err(|e| TransportError::Malformed(e.to_string()))?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self, code: ClosingCode) -> Result<(), TransportError> {
        debug!(%code, "Shutting down TCP connection");
        self.writer.shutdown().await?;
        Ok(())
    }
}

struct TcpFrameStream {
    rx: mpsc::Receiver<Result<RelayMessage, TransportError>>,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl FrameStream for TcpFrameStream {
    async fn recv(&mut self) -> Result<RelayMessage, TransportError> {
        self.rx
            .recv()
            .await
            .unwrap_or(Err(TransportError::Closed { code: None }))
    }
}

impl Drop for TcpFrameStream {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcc_core::PositionTime;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let relay = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let received = mcc_protocol::decode_client_line(&line).unwrap();

            writer.write_all(b"\n{not json}\n").await.unwrap();
            writer
                .write_all(encode_line(&RelayMessage::keep_alive_ack(7)).unwrap().as_bytes())
                .await
                .unwrap();
            received
        });

        let mut connection = TcpTransportFactory::new().connect(&endpoint).await.unwrap();
        connection
            .sink
            .send(&ClientMessage::keep_alive(7, PositionTime::zero()))
            .await
            .unwrap();

        assert!(matches!(
            connection.stream.recv().await,
            Err(TransportError::Malformed(_))
        ));
        assert_eq!(
            connection.stream.recv().await,
            Ok(RelayMessage::keep_alive_ack(7))
        );
        assert_eq!(
            connection.stream.recv().await,
            Err(TransportError::Closed { code: None })
        );

        let received = relay.await.unwrap();
        assert_eq!(received, ClientMessage::keep_alive(7, PositionTime::zero()));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpTransportFactory::new().connect(&endpoint).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
