//! Process-level agent server: prewarm hook, userdata and job dispatch.

use super::job::JobContext;
use super::room::{BoxFuture, RoomTransport};
use super::vad::Vad;
use crate::Result;
use futures::{Stream, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Userdata slot holding the prewarmed [`Vad`].
pub const VAD_SLOT: &str = "vad";

type Slot = Arc<dyn Any + Send + Sync>;

/// State shared by every job in this process.
#[derive(Default)]
pub struct JobProcess {
    userdata: RwLock<HashMap<String, Slot>>,
}

impl std::fmt::Debug for JobProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let userdata = self.userdata.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("JobProcess")
            .field("slots", &userdata.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobProcess {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&self, slot: &str, value: T) {
        self.userdata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot.to_string(), Arc::new(value));
    }

    /// The value in `slot`, if present and of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, slot: &str) -> Option<Arc<T>> {
        let value = self
            .userdata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slot)
            .cloned()?;
        value.downcast::<T>().ok()
    }
}

/// Load the voice activity detector into [`VAD_SLOT`].
///
/// # Errors
/// Returns an error if the detector cannot be loaded.
#[allow(clippy::result_large_err, clippy::unnecessary_wraps)]
pub fn prewarm(proc: &JobProcess) -> Result<()> {
    proc.insert(VAD_SLOT, Vad::load());
    tracing::info!("voice activity detector loaded");
    Ok(())
}

pub type SetupFn = Box<dyn Fn(&JobProcess) -> Result<()> + Send + Sync>;
pub type SessionFn = Box<dyn Fn(JobContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct AgentServer {
    proc: Arc<JobProcess>,
    setup: Option<SetupFn>,
    session: Option<SessionFn>,
    prewarmed: OnceCell<()>,
}

impl std::fmt::Debug for AgentServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentServer")
            .field("proc", &self.proc)
            .field("setup", &self.setup.is_some())
            .field("session", &self.session.is_some())
            .field("prewarmed", &self.prewarmed.initialized())
            .finish()
    }
}

impl AgentServer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            proc: Arc::new(JobProcess::new()),
            setup: None,
            session: None,
            prewarmed: OnceCell::new(),
        }
    }

    /// Hook run once per process before the first job.
    #[must_use]
    pub fn setup_fnc<F>(mut self, setup: F) -> Self
    where
        F: Fn(&JobProcess) -> Result<()> + Send + Sync + 'static,
    {
        self.setup = Some(Box::new(setup));
        self
    }

    /// Entry point run for every job.
    #[must_use]
    pub fn rtc_session<F, Fut>(mut self, entrypoint: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.session = Some(Box::new(move |ctx| Box::pin(entrypoint(ctx))));
        self
    }

    #[must_use]
    pub fn proc(&self) -> &Arc<JobProcess> {
        &self.proc
    }

    /// Run the setup hook if it has not run yet.
    ///
    /// # Errors
    /// Returns the setup hook's error; a later call retries.
    pub async fn prewarm(&self) -> Result<()> {
        self.prewarmed
            .get_or_try_init(|| async {
                if let Some(setup) = &self.setup {
                    setup(self.proc.as_ref())?;
                }
                Ok::<_, crate::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Run one job to completion.
    ///
    /// # Errors
    /// Returns an error if prewarming fails, no entry point is registered or
    /// the entry point fails.
    pub async fn run_job(&self, room: Box<dyn RoomTransport>) -> Result<()> {
        self.prewarm().await?;
        let entrypoint = self
            .session
            .as_ref()
            .ok_or_else(|| crate::Error::Config("no rtc_session entry point registered".to_string()))?;
        let span = tracing::info_span!("job", room = %room.room_name());
        let ctx = JobContext::new(room, Arc::clone(&self.proc));
        entrypoint(ctx).instrument(span).await
    }

    /// Run each room from `jobs` as its own task until the stream ends and
    /// every job has finished.
    pub async fn run<S>(self: Arc<Self>, mut jobs: S)
    where
        S: Stream<Item = Box<dyn RoomTransport>> + Unpin,
    {
        let mut tasks = JoinSet::new();
        while let Some(room) = jobs.next().await {
            let server = Arc::clone(&self);
            let name = room.room_name().to_string();
            tasks.spawn(async move {
                if let Err(err) = server.run_job(room).await {
                    tracing::error!(room = %name, error = %err, "job failed");
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "job task panicked");
            }
        }
    }
}

impl Default for AgentServer {
    fn default() -> Self {
        Self::new()
    }
}
