use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Listening,
    Thinking,
    Speaking,
}

/// A committed utterance. Either field may be absent when the producer had
/// nothing to attach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechCommitted {
    pub content: Option<String>,
    pub participant: Option<String>,
}

impl SpeechCommitted {
    #[must_use]
    pub fn new(content: impl Into<String>, participant: Option<String>) -> Self {
        Self { content: Some(content.into()), participant }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    AgentStateChanged(AgentState),
    UserSpeechCommitted(SpeechCommitted),
    AgentSpeechCommitted(SpeechCommitted),
    Error { message: String },
}

pub type SpeechHandler = Box<dyn Fn(&SpeechCommitted) + Send + Sync>;
pub type EventHandler = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// Synchronous session callbacks, run in registration order on the session task.
#[derive(Default)]
pub struct EventHandlers {
    user_speech: Vec<SpeechHandler>,
    agent_speech: Vec<SpeechHandler>,
    any: Vec<EventHandler>,
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("user_speech", &self.user_speech.len())
            .field("agent_speech", &self.agent_speech.len())
            .field("any", &self.any.len())
            .finish()
    }
}

impl EventHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_user_speech_committed<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SpeechCommitted) + Send + Sync + 'static,
    {
        self.user_speech.push(Box::new(handler));
        self
    }

    #[must_use]
    pub fn on_agent_speech_committed<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SpeechCommitted) + Send + Sync + 'static,
    {
        self.agent_speech.push(Box::new(handler));
        self
    }

    /// Called for every event, after the event-specific handlers.
    #[must_use]
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.any.push(Box::new(handler));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_speech.is_empty() && self.agent_speech.is_empty() && self.any.is_empty()
    }

    pub fn dispatch(&self, event: &SessionEvent) {
        match event {
            SessionEvent::UserSpeechCommitted(committed) => {
                self.user_speech.iter().for_each(|handler| handler(committed));
            }
            SessionEvent::AgentSpeechCommitted(committed) => {
                self.agent_speech.iter().for_each(|handler| handler(committed));
            }
            _ => {}
        }
        self.any.iter().for_each(|handler| handler(event));
    }
}

/// Handlers plus the outbound event queue. Owned by the session task.
pub(crate) struct EventEmitter {
    handlers: Arc<EventHandlers>,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventEmitter {
    pub(crate) const fn new(handlers: Arc<EventHandlers>, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { handlers, tx }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        tracing::trace!(?event, "session event");
        self.handlers.dispatch(&event);
        // A full or dropped receiver only affects observers, never the session.
        let _ = self.tx.try_send(event);
    }
}

pub struct EventStream<'a> {
    rx: &'a mut mpsc::Receiver<SessionEvent>,
}

impl<'a> EventStream<'a> {
    #[must_use]
    pub const fn new(rx: &'a mut mpsc::Receiver<SessionEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for EventStream<'_> {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}
