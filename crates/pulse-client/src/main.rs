use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use pulse_api::{Backend, HttpBackend};
use pulse_client::{Config, MessagingSession};
use pulse_types::{VoteDirection, VoteTarget};

enum Command {
    Send { to: String, text: String },
    Read { partner: String },
    Vote { target: VoteTarget, direction: VoteDirection },
    Open { partner: Option<String> },
    Quit,
}

fn parse_command(line: &str) -> Result<Command> {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let verb = parts.next().unwrap_or_default();
    let mut arg = || parts.next().map(str::trim).filter(|s| !s.is_empty());

    match verb {
        "/send" => {
            let to = arg().ok_or_else(|| anyhow!("usage: /send <user> <text>"))?.to_string();
            let text = arg().ok_or_else(|| anyhow!("usage: /send <user> <text>"))?.to_string();
            Ok(Command::Send { to, text })
        }
        "/read" => {
            let partner = arg().ok_or_else(|| anyhow!("usage: /read <user>"))?.to_string();
            Ok(Command::Read { partner })
        }
        "/open" => Ok(Command::Open {
            partner: arg().map(str::to_string),
        }),
        "/vote" => {
            let usage = || anyhow!("usage: /vote <post|comment> <id> <up|down>");
            let kind = arg().ok_or_else(usage)?;
            let rest = arg().ok_or_else(usage)?;
            let (id, dir) = rest.split_once(char::is_whitespace).ok_or_else(usage)?;
            let target = match kind {
                "post" => VoteTarget::Post(id.to_string()),
                "comment" => VoteTarget::Comment(id.to_string()),
                _ => return Err(usage()),
            };
            let direction = match dir.trim() {
                "up" => VoteDirection::Up,
                "down" => VoteDirection::Down,
                _ => return Err(usage()),
            };
            Ok(Command::Vote { target, direction })
        }
        "/quit" => Ok(Command::Quit),
        other => Err(anyhow!("unknown command {}", other)),
    }
}

async fn execute<B: Backend>(session: &MessagingSession<B>, command: Command) {
    match command {
        Command::Send { to, text } => match session.send(&to, &text).await {
            Ok(msg) => info!("Sent {} to {}", msg.id, to),
            Err(e) => warn!("{}", e),
        },
        Command::Read { partner } => match session.mark_read(&partner, None).await {
            Ok(ids) if ids.is_empty() => info!("Nothing unread from {}", partner),
            Ok(ids) => info!("Marked {} messages from {} read", ids.len(), partner),
            Err(e) => warn!("{}", e),
        },
        Command::Vote { target, direction } => match session.vote(target.clone(), direction).await {
            Ok(tally) => info!("{} is at {} ({:?})", target, tally.karma(), tally.viewer),
            Err(e) => warn!("{}", e),
        },
        Command::Open { partner } => {
            session.open_conversation(partner.as_deref());
            if let Some(partner) = partner {
                for msg in session.conversation_with(&partner).iter().rev() {
                    let mark = if msg.is_read { ' ' } else { '*' };
                    info!("{} [{}] {}: {}", mark, msg.created_at.format("%H:%M"), msg.from_id, msg.content);
                }
            }
        }
        Command::Quit => {}
    }
}

/// Log connection transitions and conversation summaries as they change.
fn spawn_watchers(session: &MessagingSession<HttpBackend>) {
    let mut status = session.connection_state();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!(
                "Connection {:?} (attempt {}{})",
                current.state,
                current.reconnect_attempt,
                if current.gave_up { ", gave up" } else { "" }
            );
        }
    });

    let watcher = session.clone();
    let mut messages = session.messages();
    tokio::spawn(async move {
        while messages.changed().await.is_ok() {
            drop(messages.borrow_and_update());
            for convo in watcher.conversations() {
                if convo.unread > 0 {
                    info!("{}: {} unread", convo.partner_id, convo.unread);
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=debug".into()),
        )
        .init();

    let backend = HttpBackend::new(&config.api_url, &config.session.token);
    let session = MessagingSession::new(config.session.clone(), backend)?;
    info!("Logged in as {}", session.user_id());

    spawn_watchers(&session);
    if let Err(e) = session.refresh().await {
        warn!("{}", e);
    }
    session.start_realtime(config.gateway.clone())?;

    let mut ended = session.session_ended();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(&session, command).await,
                    Err(e) => warn!("{}", e),
                }
            }
            _ = ended.wait_for(|ended| *ended) => {
                warn!("Session ended, log in again");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.stop_realtime();
    Ok(())
}
