//! Text-only room on stdin/stdout for trying the agent without a media server.

use super::room::{
    AudioFrame, BoxFuture, Participant, ParticipantKind, RoomEvent, RoomPublisher, RoomTransport,
};
use crate::protocol::packets::{CHAT_TOPIC, ChatPacket, DataPacket};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

pub const CONSOLE_IDENTITY: &str = "console-user";

type Output = Box<dyn AsyncWrite + Send + Unpin>;

pub struct ConsoleRoom<R> {
    name: String,
    lines: Lines<R>,
    pending: VecDeque<RoomEvent>,
    connected: bool,
    finished: bool,
    publisher: Arc<ConsolePublisher>,
}

impl ConsoleRoom<BufReader<tokio::io::Stdin>> {
    #[must_use]
    pub fn stdio(name: impl Into<String>) -> Self {
        Self::new(name, BufReader::new(tokio::io::stdin()), Box::new(tokio::io::stdout()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> ConsoleRoom<R> {
    #[must_use]
    pub fn new(name: impl Into<String>, input: R, output: Output) -> Self {
        Self {
            name: name.into(),
            lines: input.lines(),
            pending: VecDeque::new(),
            connected: false,
            finished: false,
            publisher: Arc::new(ConsolePublisher { output: Mutex::new(output) }),
        }
    }

    async fn read_event(&mut self) -> Result<Option<RoomEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    return Ok(Some(RoomEvent::ChatMessage {
                        identity: CONSOLE_IDENTITY.to_string(),
                        text: line,
                    }));
                }
                None => {
                    self.finished = true;
                    return Ok(Some(RoomEvent::Disconnected { reason: "end of input".to_string() }));
                }
            }
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send> RoomTransport for ConsoleRoom<R> {
    fn room_name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.connected {
                self.connected = true;
                let mut user = Participant::new(CONSOLE_IDENTITY, ParticipantKind::Standard);
                user.name = Some("Console".to_string());
                self.pending.push_back(RoomEvent::ParticipantConnected(user));
            }
            Ok(())
        })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<RoomEvent>>> {
        Box::pin(async move {
            if !self.connected {
                return Err(Error::InvalidState("console room is not connected".to_string()));
            }
            self.read_event().await
        })
    }

    fn publisher(&self) -> Arc<dyn RoomPublisher> {
        self.publisher.clone()
    }
}

pub struct ConsolePublisher {
    output: Mutex<Output>,
}

impl ConsolePublisher {
    async fn write_line(&self, line: &str) -> Result<()> {
        let mut output = self.output.lock().await;
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        Ok(())
    }
}

impl RoomPublisher for ConsolePublisher {
    fn publish_data(&self, packet: DataPacket) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if packet.topic != CHAT_TOPIC {
                tracing::debug!(topic = %packet.topic, bytes = packet.payload.len(), "console ignoring data packet");
                return Ok(());
            }
            let chat: ChatPacket = serde_json::from_slice(&packet.payload)?;
            self.write_line(&format!("> {}", chat.message)).await
        })
    }

    fn publish_audio(&self, frame: AudioFrame) -> BoxFuture<'_, Result<()>> {
        tracing::trace!(samples = frame.data.len(), "console has no audio output");
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_become_chat_then_eof_disconnects() {
        let input: &[u8] = b"hello\n\n  \nwhat time is it\n";
        let mut room = ConsoleRoom::new("console", input, Box::new(tokio::io::sink()));
        assert!(room.next_event().await.is_err());

        room.connect().await.unwrap();
        assert!(matches!(
            room.next_event().await.unwrap(),
            Some(RoomEvent::ParticipantConnected(p)) if p.identity == CONSOLE_IDENTITY
        ));
        assert!(matches!(
            room.next_event().await.unwrap(),
            Some(RoomEvent::ChatMessage { text, .. }) if text == "hello"
        ));
        assert!(matches!(
            room.next_event().await.unwrap(),
            Some(RoomEvent::ChatMessage { text, .. }) if text == "what time is it"
        ));
        assert!(matches!(room.next_event().await.unwrap(), Some(RoomEvent::Disconnected { .. })));
        assert!(room.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chat_packets_are_printed() {
        let (writer, mut reader) = tokio::io::duplex(256);
        let room = ConsoleRoom::new("console", &b""[..], Box::new(writer));
        let publisher = room.publisher();
        let payload = ChatPacket::new("Hi there!", 1).to_bytes().unwrap();
        publisher.publish_data(DataPacket::reliable(payload, CHAT_TOPIC)).await.unwrap();
        publisher.publish_data(DataPacket::reliable(b"x".to_vec(), "other")).await.unwrap();
        drop(room);
        drop(publisher);

        let mut printed = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut printed).await.unwrap();
        assert_eq!(printed, "> Hi there!\n");
    }
}
