//! The chat session task: owns the connection for the process lifetime,
//! answers keep-alive pings, serves `info` / bare-link lookups, and relays
//! notices queued by the webhook paths.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crier_compose::{render_object_info, render_reference_error};
use crier_core::IrcConfig;
use crier_tracker::{parse_reference, LookupError, ObjectLookup};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use crate::handshake::run_handshake;
use crate::wire::{Dialer, WireWriter};

const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Cloneable sending side of the single-writer outbound path. Both webhook
/// dispatch and build-status polls go through here; the session task applies
/// the pacing delay and performs the actual socket write.
#[derive(Clone)]
pub struct ChatHandle {
    tx: mpsc::Sender<String>,
}

impl ChatHandle {
    /// Queues one already-formatted notice line.
    pub async fn send_notice(&self, line: String) -> Result<()> {
        self.tx
            .send(line)
            .await
            .context("chat session is no longer running")
    }
}

/// One persistent IRC connection plus its reconnect loop.
pub struct ChatSession {
    config: IrcConfig,
    dialer: Arc<dyn Dialer>,
    lookup: Arc<dyn ObjectLookup>,
    /// Site root used to recognize bare tracker links in channel traffic.
    web_base: String,
    outbound: mpsc::Receiver<String>,
    shutdown: watch::Receiver<bool>,
}

impl ChatSession {
    pub fn new(
        config: IrcConfig,
        dialer: Arc<dyn Dialer>,
        lookup: Arc<dyn ObjectLookup>,
        web_base: String,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, ChatHandle) {
        let (tx, outbound) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        (
            Self {
                config,
                dialer,
                lookup,
                web_base,
                outbound,
                shutdown,
            },
            ChatHandle { tx },
        )
    }

    /// Runs until shutdown is signalled. Connection loss is never fatal: the
    /// full connect sequence is re-executed after a short fixed pause, with
    /// no retry ceiling.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }
            let outcome = run_connection(
                &self.config,
                self.dialer.as_ref(),
                self.lookup.as_ref(),
                &self.web_base,
                &mut self.outbound,
                &mut self.shutdown,
            )
            .await;
            match outcome {
                Ok(()) => return,
                Err(error) => {
                    tracing::warn!(%error, "connection lost, reconnecting");
                    sleep(Duration::from_millis(self.config.reconnect_pause_ms)).await;
                }
            }
        }
    }
}

/// One connection attempt: dial, handshake, then the ready loop. Returns
/// `Ok(())` only on shutdown; every transport failure is an `Err` so the
/// caller reconnects.
async fn run_connection(
    config: &IrcConfig,
    dialer: &dyn Dialer,
    lookup: &dyn ObjectLookup,
    web_base: &str,
    outbound: &mut mpsc::Receiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, mut writer) = dialer.dial().await?;
    let nickname = run_handshake(reader.as_mut(), writer.as_mut(), config).await?;
    let info_marker = format!(" :{nickname}: info");

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            queued = outbound.recv() => {
                let Some(message) = queued else { return Ok(()) };
                // Pace consecutive sends so bursts do not flood the channel.
                sleep(Duration::from_millis(config.send_pacing_ms)).await;
                writer
                    .write_line(&format!("NOTICE {} :{}", config.channel, message))
                    .await?;
            }
            inbound = reader.read_line() => {
                let Some(line) = inbound? else {
                    bail!("connection closed by peer");
                };
                handle_line(config, lookup, web_base, &info_marker, &line, writer.as_mut())
                    .await?;
            }
        }
    }
}

async fn handle_line(
    config: &IrcConfig,
    lookup: &dyn ObjectLookup,
    web_base: &str,
    info_marker: &str,
    line: &str,
    writer: &mut dyn WireWriter,
) -> Result<()> {
    tracing::debug!(%line, "inbound");

    if line.contains("PING :") {
        let token = line.split(':').nth(1).unwrap_or("").to_string();
        writer.write_line(&format!("PONG :{token}")).await?;
        return Ok(());
    }

    if let Some((_, rest)) = line.split_once(info_marker) {
        for token in rest.split_whitespace() {
            if token.starts_with('T') || token.starts_with('D') {
                reply_reference(config, lookup, token, writer).await?;
            }
        }
        return Ok(());
    }

    if line.contains(web_base) {
        // A pasted tracker link: everything after the site root up to the
        // next whitespace is a candidate reference.
        for segment in line.split(web_base).skip(1) {
            let Some(token) = segment.split_whitespace().next() else {
                continue;
            };
            if token.starts_with('T') || token.starts_with('D') {
                reply_reference(config, lookup, token, writer).await?;
            }
        }
    }

    Ok(())
}

async fn reply_reference(
    config: &IrcConfig,
    lookup: &dyn ObjectLookup,
    token: &str,
    writer: &mut dyn WireWriter,
) -> Result<()> {
    let reply = match parse_reference(token) {
        Ok(reference) => match lookup.object_info(&reference).await {
            Ok(info) => render_object_info(
                info.priority_color.as_deref(),
                &info.status_name,
                &info.title,
                &info.uri,
                reference.anchor.as_deref(),
            ),
            Err(error) => {
                if !matches!(error, LookupError::MalformedReference { .. }) {
                    tracing::warn!(%error, token, "object lookup failed");
                }
                render_reference_error(&reference.raw)
            }
        },
        Err(LookupError::MalformedReference { raw }) => render_reference_error(&raw),
        Err(error) => {
            tracing::warn!(%error, token, "reference parse failed unexpectedly");
            return Ok(());
        }
    };
    writer
        .write_line(&format!("NOTICE {} :{}", config.channel, reply))
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use crier_tracker::{ObjectInfo, ObjectRef};

    use super::*;
    use crate::wire::WireReader;

    struct ScriptReader {
        lines: VecDeque<String>,
        hang_when_empty: bool,
    }

    #[async_trait::async_trait]
    impl WireReader for ScriptReader {
        async fn read_line(&mut self) -> io::Result<Option<String>> {
            match self.lines.pop_front() {
                Some(line) => Ok(Some(line)),
                None if self.hang_when_empty => std::future::pending().await,
                None => Ok(None),
            }
        }
    }

    struct RecordingWriter {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl WireWriter for RecordingWriter {
        async fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.sent.lock().expect("sent lock").push(line.to_string());
            Ok(())
        }
    }

    struct ScriptedLookup {
        info: ObjectInfo,
    }

    #[async_trait::async_trait]
    impl ObjectLookup for ScriptedLookup {
        async fn object_info(&self, reference: &ObjectRef) -> Result<ObjectInfo, LookupError> {
            if reference.number == 404 {
                return Err(LookupError::Api {
                    message: "no such object".to_string(),
                });
            }
            Ok(self.info.clone())
        }
    }

    fn config() -> IrcConfig {
        IrcConfig {
            host: "irc.example.net".to_string(),
            port: 6697,
            nickname: "crier".to_string(),
            password: "sekrit".to_string(),
            channel: "#dev".to_string(),
            join_delay_ms: 0,
            send_pacing_ms: 0,
            reconnect_pause_ms: 0,
        }
    }

    fn lookup() -> ScriptedLookup {
        ScriptedLookup {
            info: ObjectInfo {
                priority_color: Some("red".to_string()),
                status_name: "Open".to_string(),
                title: "Broken boot".to_string(),
                uri: "https://tracker.example.org/T42".to_string(),
            },
        }
    }

    async fn drive(line: &str) -> Vec<String> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut writer = RecordingWriter { sent: sent.clone() };
        handle_line(
            &config(),
            &lookup(),
            "https://tracker.example.org/",
            " :crier: info",
            line,
            &mut writer,
        )
        .await
        .expect("handle_line");
        let lines = sent.lock().expect("sent lock").clone();
        lines
    }

    #[tokio::test]
    async fn unit_ping_is_answered_with_token() {
        let sent = drive("PING :irc.example.net").await;
        assert_eq!(sent, ["PONG :irc.example.net"]);
    }

    #[tokio::test]
    async fn functional_info_command_answers_each_reference() {
        let sent = drive(":alice!u@h PRIVMSG #dev :crier: info T42 D17").await;
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("NOTICE #dev :"));
        assert!(sent[0].contains("https://tracker.example.org/T42"));
        assert!(sent[1].contains("Broken boot"));
    }

    #[tokio::test]
    async fn functional_bare_link_triggers_lookup() {
        let sent =
            drive(":bob!u@h PRIVMSG #dev :see https://tracker.example.org/T42 for details").await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Open"));
    }

    #[tokio::test]
    async fn unit_malformed_reference_gets_visible_error_with_anchor() {
        let sent = drive(":alice!u@h PRIVMSG #dev :crier: info Tabc#3228").await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Tabc#3228"));
        assert!(sent[0].contains("invalid task reference"));
    }

    #[tokio::test]
    async fn unit_failed_lookup_still_answers() {
        let sent = drive(":alice!u@h PRIVMSG #dev :crier: info T404").await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("T404"));
        assert!(sent[0].contains("invalid task reference"));
    }

    #[tokio::test]
    async fn unit_unrelated_chatter_is_ignored() {
        let sent = drive(":alice!u@h PRIVMSG #dev :lunch anyone?").await;
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn regression_reconnect_redials_and_restarts_from_base_nickname() {
        struct SequencedDialer {
            scripts: Mutex<VecDeque<(Vec<String>, bool)>>,
            sent: Arc<Mutex<Vec<String>>>,
            dials: Arc<Mutex<usize>>,
        }

        #[async_trait::async_trait]
        impl Dialer for SequencedDialer {
            async fn dial(&self) -> Result<(Box<dyn WireReader>, Box<dyn WireWriter>)> {
                let (lines, hang_when_empty) = self
                    .scripts
                    .lock()
                    .expect("scripts lock")
                    .pop_front()
                    .expect("more dials than scripted connections");
                *self.dials.lock().expect("dials lock") += 1;
                let reader = ScriptReader {
                    lines: lines.into_iter().collect(),
                    hang_when_empty,
                };
                let writer = RecordingWriter {
                    sent: self.sent.clone(),
                };
                Ok((Box::new(reader), Box::new(writer)))
            }
        }

        fn lines(raw: &[&str]) -> Vec<String> {
            raw.iter().map(|l| l.to_string()).collect()
        }

        // First connection collides once (suffixed to crier1), reaches Ready,
        // then the peer closes. The second must re-register from the base
        // nickname and stays up until shutdown.
        let scripts = VecDeque::from([
            (
                lines(&["No Ident response", "433", "You are now identified", "366"]),
                false,
            ),
            (
                lines(&["No Ident response", "You are now identified", "366"]),
                true,
            ),
        ]);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dials = Arc::new(Mutex::new(0));
        let dialer = Arc::new(SequencedDialer {
            scripts: Mutex::new(scripts),
            sent: sent.clone(),
            dials: dials.clone(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (session, _handle) = ChatSession::new(
            config(),
            dialer,
            Arc::new(lookup()),
            "https://tracker.example.org/".to_string(),
            shutdown_rx,
        );

        let task = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).expect("signal shutdown");
        task.await.expect("session task");

        assert_eq!(*dials.lock().expect("dials lock"), 2);
        let sent = sent.lock().expect("sent lock").clone();
        let nick_lines: Vec<&String> = sent.iter().filter(|l| l.starts_with("NICK ")).collect();
        assert_eq!(nick_lines, ["NICK crier", "NICK crier1", "NICK crier"]);
    }

    #[tokio::test]
    async fn functional_ready_loop_relays_queued_notices_until_shutdown() {
        struct OneShotDialer {
            sent: Arc<Mutex<Vec<String>>>,
        }

        #[async_trait::async_trait]
        impl Dialer for OneShotDialer {
            async fn dial(&self) -> Result<(Box<dyn WireReader>, Box<dyn WireWriter>)> {
                let reader = ScriptReader {
                    lines: ["No Ident response", "You are now identified", "366"]
                        .iter()
                        .map(|l| l.to_string())
                        .collect(),
                    hang_when_empty: true,
                };
                let writer = RecordingWriter {
                    sent: self.sent.clone(),
                };
                Ok((Box::new(reader), Box::new(writer)))
            }
        }

        let sent = Arc::new(Mutex::new(Vec::new()));
        let dialer = Arc::new(OneShotDialer { sent: sent.clone() });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (session, handle) = ChatSession::new(
            config(),
            dialer,
            Arc::new(lookup()),
            "https://tracker.example.org/".to_string(),
            shutdown_rx,
        );

        let task = tokio::spawn(session.run());
        handle
            .send_notice("hello channel".to_string())
            .await
            .expect("queue notice");

        // Give the session a moment to drain the queue, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).expect("signal shutdown");
        task.await.expect("session task");

        let sent = sent.lock().expect("sent lock").clone();
        assert!(sent.contains(&"NOTICE #dev :hello channel".to_string()));
    }
}
