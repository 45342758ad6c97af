//! One agent job: a room connection and the participant it serves.

use super::room::{Participant, ParticipantKind, RoomEvent, RoomPublisher, RoomTransport};
use super::worker::JobProcess;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Connecting,
    AwaitingParticipant,
    Active,
    Ended,
}

pub struct JobContext {
    room: Box<dyn RoomTransport>,
    room_name: String,
    proc: Arc<JobProcess>,
    state: JobState,
    participant: Option<Participant>,
    backlog: VecDeque<RoomEvent>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("room", &self.room_name)
            .field("state", &self.state)
            .field("participant", &self.participant)
            .field("backlog", &self.backlog.len())
            .finish_non_exhaustive()
    }
}

impl JobContext {
    #[must_use]
    pub fn new(room: Box<dyn RoomTransport>, proc: Arc<JobProcess>) -> Self {
        let room_name = room.room_name().to_string();
        Self {
            room,
            room_name,
            proc,
            state: JobState::Connecting,
            participant: None,
            backlog: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }

    #[must_use]
    pub const fn participant(&self) -> Option<&Participant> {
        self.participant.as_ref()
    }

    /// Process-wide userdata (prewarmed models and the like).
    #[must_use]
    pub fn proc(&self) -> &Arc<JobProcess> {
        &self.proc
    }

    #[must_use]
    pub fn publisher(&self) -> Arc<dyn RoomPublisher> {
        self.room.publisher()
    }

    /// Join the room.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if already connected, or the transport's
    /// error (the job then ends).
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != JobState::Connecting {
            return Err(Error::InvalidState(format!("cannot connect from {:?}", self.state)));
        }
        tracing::info!(room = %self.room_name, "connecting to room");
        if let Err(err) = self.room.connect().await {
            self.state = JobState::Ended;
            return Err(err);
        }
        self.state = JobState::AwaitingParticipant;
        Ok(())
    }

    /// Wait for the first remote participant that is not another agent.
    ///
    /// Events that arrive in the meantime are kept and replayed to the session.
    /// `None` waits indefinitely.
    ///
    /// # Errors
    /// Returns [`Error::ParticipantTimeout`] when `timeout` elapses and
    /// [`Error::ConnectionClosed`] if the room goes away first. Both end the job.
    pub async fn wait_for_participant(&mut self, timeout: Option<Duration>) -> Result<Participant> {
        if self.state != JobState::AwaitingParticipant {
            return Err(Error::InvalidState(format!(
                "cannot wait for a participant from {:?}",
                self.state
            )));
        }
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.next_participant())
                .await
                .unwrap_or(Err(Error::ParticipantTimeout(limit))),
            None => self.next_participant().await,
        };
        match result {
            Ok(participant) => {
                tracing::info!(
                    room = %self.room_name,
                    participant = %participant.identity,
                    kind = ?participant.kind,
                    "participant joined"
                );
                self.state = JobState::Active;
                self.participant = Some(participant.clone());
                Ok(participant)
            }
            Err(err) => {
                self.state = JobState::Ended;
                Err(err)
            }
        }
    }

    async fn next_participant(&mut self) -> Result<Participant> {
        loop {
            match self.room.next_event().await? {
                Some(RoomEvent::ParticipantConnected(participant))
                    if participant.kind != ParticipantKind::Agent =>
                {
                    return Ok(participant);
                }
                Some(RoomEvent::Disconnected { reason }) => {
                    tracing::info!(room = %self.room_name, %reason, "room closed before a participant joined");
                    return Err(Error::ConnectionClosed);
                }
                Some(event) => self.backlog.push_back(event),
                None => return Err(Error::ConnectionClosed),
            }
        }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn RoomTransport>, VecDeque<RoomEvent>) {
        (self.room, self.backlog)
    }
}
