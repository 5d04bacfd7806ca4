//! Registration and channel-join handshake.
//!
//! The handshake blocks on successive line reads until the server confirms
//! channel membership (numeric 366). No outbound chat may be sent before
//! that point. Nickname collisions grow the nickname within the attempt;
//! every fresh attempt starts again from the configured base nickname.

use std::io;
use std::time::Duration;

use crier_core::IrcConfig;
use tokio::time::sleep;

use crate::wire::{WireReader, WireWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Disconnected,
    Registering,
    Authenticating,
    Joining,
    Ready,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The peer closed the connection before the handshake completed.
    #[error("connection closed during handshake")]
    ConnectionClosed,
    #[error("handshake i/o failure: {0}")]
    Io(#[from] io::Error),
}

/// Drives the handshake to `Ready` and returns the nickname that ended up
/// registered (possibly suffixed after 433 collisions).
pub async fn run_handshake(
    reader: &mut dyn WireReader,
    writer: &mut dyn WireWriter,
    config: &IrcConfig,
) -> Result<String, HandshakeError> {
    let mut state = HandshakeState::Registering;
    let mut nickname = config.nickname.clone();
    let mut suffix = 0u32;

    while state != HandshakeState::Ready {
        let Some(line) = reader.read_line().await? else {
            return Err(HandshakeError::ConnectionClosed);
        };
        tracing::debug!(%line, ?state, "handshake line");

        if line.contains("No Ident response") && state == HandshakeState::Registering {
            register(writer, &nickname).await?;
            writer
                .write_line(&format!(
                    "PRIVMSG NickServ :identify {} {}",
                    nickname, config.password
                ))
                .await?;
            state = HandshakeState::Authenticating;
        } else if line.contains("You are now identified")
            && state == HandshakeState::Authenticating
        {
            sleep(Duration::from_millis(config.join_delay_ms)).await;
            writer.write_line(&format!("JOIN {}", config.channel)).await?;
            state = HandshakeState::Joining;
        } else if line.contains("477") && state == HandshakeState::Joining {
            // Channel requires registration; we are identified, join again.
            sleep(Duration::from_millis(config.join_delay_ms)).await;
            writer.write_line(&format!("JOIN {}", config.channel)).await?;
        } else if line.contains("433") {
            suffix += 1;
            nickname.push_str(&suffix.to_string());
            tracing::info!(%nickname, "nickname in use, retrying with suffix");
            register(writer, &nickname).await?;
        } else if line.contains("PING") {
            let token = line.split(':').nth(1).unwrap_or("").to_string();
            writer.write_line(&format!("PONG :{token}")).await?;
        } else if line.contains("366") && state == HandshakeState::Joining {
            state = HandshakeState::Ready;
        }
    }

    tracing::info!(%nickname, channel = %config.channel, "connected and joined");
    Ok(nickname)
}

async fn register(writer: &mut dyn WireWriter, nickname: &str) -> io::Result<()> {
    writer.write_line(&format!("NICK {nickname}")).await?;
    writer
        .write_line(&format!("USER {nickname} * * :{nickname}"))
        .await
}
