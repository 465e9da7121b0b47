//! Live voice conversation on the default microphone and speakers.
//!
//! Requires `GEMINI_API_KEY` in the environment (or a `.env` file).
//! Run with: `cargo run --example live_mentor`

use anyhow::Context;
use muse_live::{LiveSession, MicBackend, SessionEvent, SessionOptions, SessionState, Speaker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    dotenvy::dotenv().ok();
    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY not set")?;

    if let Ok(devices) = MicBackend::list_input_devices() {
        println!("Input devices: {devices:?}");
    }

    let mut session = LiveSession::new(SessionOptions::mentor())?;
    let mut events = session
        .take_events_receiver()
        .context("events receiver already taken")?;

    session.start(&api_key).await?;
    session.wait_until_active().await?;
    println!("Session active. Speak naturally; Ctrl+C to end.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nEnding session...");
                break;
            }
            event = events.recv() => match event {
                Some(SessionEvent::Transcript(line)) => {
                    let who = match line.speaker {
                        Speaker::User => "You",
                        Speaker::Model => "Model",
                    };
                    println!("{who}: {}", line.text);
                }
                Some(SessionEvent::StateChanged(state)) => {
                    if matches!(state, SessionState::Closed | SessionState::Failed) {
                        println!("[session {state:?}]");
                        break;
                    }
                }
                Some(SessionEvent::Error(message)) => eprintln!("error: {message}"),
                None => break,
            }
        }
    }

    session.stop();
    Ok(())
}
