use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use voice_agent_rs::config::{ProcessEnv, Settings};
use voice_agent_rs::entrypoint::{AgentDeps, voice_session};
use voice_agent_rs::sdk::{AgentServer, ConsoleRoom, RoomTransport, prewarm};
use voice_agent_rs::{MemoryDb, Result, create_voice_agent};

#[derive(Debug, Parser)]
#[command(name = "voice-agent", version, about = "Voice assistant agent with tools and memory")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chat with the agent over stdin/stdout.
    Console,
    /// Join a LiveKit room (requires the `livekit` feature).
    Connect {
        #[arg(long)]
        room: String,
        #[arg(long, default_value = "voice-agent")]
        identity: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "voice agent failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let settings = Settings::from_env(&ProcessEnv)?;
    let memory = MemoryDb::open(&settings.memory_db_path)?;
    let agent = Arc::new(create_voice_agent(&settings.llm, memory)?);

    let (room, deepgram): (Box<dyn RoomTransport>, _) = match command {
        Command::Console => (Box::new(ConsoleRoom::stdio("console")), None),
        Command::Connect { room, identity } => connect_room(room, identity)?,
    };

    let deps = Arc::new(AgentDeps {
        agent,
        deepgram,
        participant_timeout: settings.participant_timeout,
    });
    let server = AgentServer::new()
        .setup_fnc(prewarm)
        .rtc_session(move |ctx| voice_session(ctx, Arc::clone(&deps)));
    server.run_job(room).await
}

#[cfg(feature = "livekit")]
#[allow(clippy::result_large_err)]
fn connect_room(
    room: String,
    identity: String,
) -> Result<(Box<dyn RoomTransport>, Option<voice_agent_rs::DeepgramSettings>)> {
    use voice_agent_rs::config::{DeepgramSettings, LiveKitSettings};
    let livekit = LiveKitSettings::from_env(&ProcessEnv)?;
    let deepgram = DeepgramSettings::from_env(&ProcessEnv)?;
    let room = voice_agent_rs::sdk::LiveKitRoom::new(livekit, room, identity);
    Ok((Box::new(room), Some(deepgram)))
}

#[cfg(not(feature = "livekit"))]
#[allow(clippy::result_large_err, clippy::needless_pass_by_value)]
fn connect_room(
    room: String,
    _identity: String,
) -> Result<(Box<dyn RoomTransport>, Option<voice_agent_rs::DeepgramSettings>)> {
    Err(voice_agent_rs::Error::Config(format!(
        "cannot join room {room}: rebuild with `--features livekit`"
    )))
}
