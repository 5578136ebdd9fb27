use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;
use voxlink_audio::{CpalCapture, CpalPlayer, PlaybackQueue};
use voxlink_core::{AppConfig, Role, SessionSnapshot, Severity};
use voxlink_session::{Session, SessionOptions, WebSocketConnector};

#[derive(Parser)]
#[command(name = "voxlink", about = "Realtime voice chat client")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "voxlink.toml")]
    config: PathBuf,
}

const HELP: &str = "commands: /connect /disconnect /rec /stop /mute /unmute /status /quit; \
                    anything else is sent as a message";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;

    let env_filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::Registry::default().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false),
    );

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    tracing::info!(url = %config.connection.url, "voxlink starting");

    let audio = &config.audio;
    let player = CpalPlayer::open(&audio.output_device, audio.sample_rate, audio.channels)
        .with_context(|| format!("failed to open output device: {}", audio.output_device))?;
    let playback = PlaybackQueue::spawn(Arc::new(player));

    let capture = CpalCapture::new(
        &audio.input_device,
        audio.sample_rate,
        audio.channels,
        audio.block_size,
    );
    let connector = WebSocketConnector::new(
        config.connection.url.clone(),
        config.connection.auth_token.clone(),
    );

    let (session, mut notifications) = Session::spawn(
        Arc::new(connector),
        Box::new(capture),
        Arc::new(playback),
        SessionOptions::from(&config),
    );

    tokio::spawn(async move {
        while let Some(n) = notifications.recv().await {
            match n.severity {
                Severity::Info => println!("[{}] {}", n.title, n.message),
                Severity::Error => eprintln!("[{}] {}", n.title, n.message),
            }
        }
    });

    let mut snapshots = session.subscribe();
    tokio::spawn(async move {
        let mut printed = 0;
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            printed = print_closed_turns(&snapshot, printed);
        }
    });

    if let Err(e) = session.connect().await {
        tracing::warn!("initial connect failed: {e}");
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let result = match line.trim() {
            "" => Ok(()),
            "/quit" => break,
            "/connect" => session.connect().await,
            "/disconnect" => {
                session.disconnect().await;
                Ok(())
            }
            "/rec" => session.start_recording().await,
            "/stop" => {
                session.stop_recording().await;
                Ok(())
            }
            "/mute" => {
                session.set_muted(true).await;
                Ok(())
            }
            "/unmute" => {
                session.set_muted(false).await;
                Ok(())
            }
            "/status" => {
                print_status(&session.snapshot());
                Ok(())
            }
            cmd if cmd.starts_with('/') => {
                println!("{HELP}");
                Ok(())
            }
            text => session.send_text(text).await,
        };
        if let Err(e) = result {
            eprintln!("error: {e}");
        }
    }

    tracing::info!("shutting down");
    session.shutdown().await;

    Ok(())
}

/// Print turns that became final since `from`. Returns the new cursor.
fn print_closed_turns(snapshot: &SessionSnapshot, from: usize) -> usize {
    let mut next = from.min(snapshot.turns.len());
    for turn in &snapshot.turns[next..] {
        if !turn.closed {
            break;
        }
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "agent",
            Role::System => "system",
        };
        println!("{} {who}: {}", turn.timestamp.format("%H:%M:%S"), turn.content);
        next += 1;
    }
    next
}

fn print_status(s: &SessionSnapshot) {
    println!(
        "state={:?} backend={:?} recording={} speaking={} user_speaking={} muted={} turns={}",
        s.state,
        s.backend,
        s.is_recording,
        s.is_speaking,
        s.user_speaking,
        s.muted,
        s.turns.len()
    );
}
