use log::{debug, info};
use shared::{FrameCodec, FrameError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
}

/// A chat message relayed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub username: String,
    pub message: String,
}

/// Receiving side of a chat connection
pub struct MessageStream<R> {
    reader: R,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> MessageStream<R> {
    pub fn new(reader: R, codec: FrameCodec) -> Self {
        Self { reader, codec }
    }

    /// Reads the next `(username, message)` pair
    ///
    /// Returns `Ok(None)` once the server has closed the connection.
    pub async fn next_message(&mut self) -> Result<Option<IncomingMessage>, FrameError> {
        let Some(username) = self.codec.read_frame(&mut self.reader).await? else {
            return Ok(None);
        };

        // The server writes both frames at once, so EOF here is a cut-off
        let message = self
            .codec
            .read_frame(&mut self.reader)
            .await?
            .ok_or(FrameError::Truncated {
                expected: self.codec.header_width(),
                received: 0,
            })?;

        Ok(Some(IncomingMessage {
            username: username.text(),
            message: message.text(),
        }))
    }
}

/// Sending side of a chat connection
pub struct MessageSink<W> {
    writer: W,
    codec: FrameCodec,
}

impl<W: AsyncWrite + Unpin> MessageSink<W> {
    pub fn new(writer: W, codec: FrameCodec) -> Self {
        Self { writer, codec }
    }

    /// Sends one frame carrying `payload`
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        let frame = self.codec.encode(payload)?;
        self.writer.write_all(&frame.to_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn send_message(&mut self, text: &str) -> Result<(), ClientError> {
        debug!("Sending {} byte message", text.len());
        self.send_frame(text.as_bytes()).await
    }
}

/// A registered chat session over TCP
pub struct ChatClient {
    username: String,
    incoming: MessageStream<OwnedReadHalf>,
    outgoing: MessageSink<OwnedWriteHalf>,
}

impl ChatClient {
    /// Connects to `server_addr` and registers `username`
    pub async fn connect(
        server_addr: &str,
        username: &str,
        codec: FrameCodec,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(server_addr).await?;
        let (read_half, write_half) = stream.into_split();

        let mut outgoing = MessageSink::new(write_half, codec);
        outgoing.send_frame(username.as_bytes()).await?;
        info!("Connected to {} as {}", server_addr, username);

        Ok(ChatClient {
            username: username.to_string(),
            incoming: MessageStream::new(read_half, codec),
            outgoing,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn send_message(&mut self, text: &str) -> Result<(), ClientError> {
        self.outgoing.send_message(text).await
    }

    pub async fn next_message(&mut self) -> Result<Option<IncomingMessage>, FrameError> {
        self.incoming.next_message().await
    }

    /// Splits the session so reading and writing can run in separate tasks
    pub fn into_split(
        self,
    ) -> (
        MessageStream<OwnedReadHalf>,
        MessageSink<OwnedWriteHalf>,
    ) {
        (self.incoming, self.outgoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_next_message() {
        let reader = Builder::new()
            .read(b"5         alice2         hi")
            .read(b"3         bob")
            .read(b"5         hello")
            .build();
        let mut stream = MessageStream::new(reader, FrameCodec::default());

        let first = stream.next_message().await.unwrap().unwrap();
        assert_eq!(
            first,
            IncomingMessage {
                username: "alice".to_string(),
                message: "hi".to_string(),
            }
        );

        let second = stream.next_message().await.unwrap().unwrap();
        assert_eq!(second.username, "bob");
        assert_eq!(second.message, "hello");

        assert!(stream.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_message_cut_off() {
        let reader = Builder::new().read(b"5         alice").build();
        let mut stream = MessageStream::new(reader, FrameCodec::default());

        assert!(matches!(
            stream.next_message().await,
            Err(FrameError::Truncated { received: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_send_message() {
        let writer = Builder::new()
            .write(b"3         bob")
            .write(b"11        hello world")
            .build();
        let mut sink = MessageSink::new(writer, FrameCodec::default());

        sink.send_frame(b"bob").await.unwrap();
        sink.send_message("hello world").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_oversized_message() {
        let writer = Builder::new().build();
        let codec = FrameCodec::new(10, Some(4)).unwrap();
        let mut sink = MessageSink::new(writer, codec);

        assert!(matches!(
            sink.send_message("too long").await,
            Err(ClientError::Frame(FrameError::PayloadTooLarge { .. }))
        ));
    }
}
