//! End-to-end webhook tests against a live HTTP listener: signed payloads
//! become exactly one chat line, rejected ones stay silent but still get the
//! fixed acknowledgement.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use crier_gateway::{router, GatewayState, SIGNATURE_HEADER};
use crier_sinks::{Connector, SinkEvent};
use crier_tracker::{LookupError, ObjectStrings, TrackerApi, TransactionHistory};
use hmac::{Hmac, Mac};
use sha2::Sha256;

const SECRET: &str = "hunter2";
const TASK_BODY: &str =
    r#"{"object":{"phid":"PHID-TASK-99","type":"TASK"},"action":{"epoch":1000}}"#;

struct ScriptedTracker;

#[async_trait::async_trait]
impl TrackerApi for ScriptedTracker {
    async fn transaction_history(
        &self,
        _object_phid: &str,
    ) -> Result<TransactionHistory, LookupError> {
        Ok(TransactionHistory {
            entries: vec![crier_classify_entry(1, 1000), crier_classify_entry(2, 1000)],
            first_author_phid: Some("PHID-USER-alice".to_string()),
        })
    }

    async fn author_display_name(&self, _author_phid: &str) -> Option<String> {
        Some("Alice".to_string())
    }

    async fn object_strings(&self, _object_phid: &str) -> Result<ObjectStrings, LookupError> {
        Ok(ObjectStrings {
            full_name: "T99: Boot hangs on splash".to_string(),
            name: "T99".to_string(),
            uri: "https://tracker.example.org/T99".to_string(),
        })
    }
}

fn crier_classify_entry(id: u64, stamp: i64) -> crier_classify::TransactionEntry {
    crier_classify::TransactionEntry {
        id,
        date_created: stamp,
        date_modified: stamp,
        comments: Vec::new(),
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

#[async_trait::async_trait]
impl Connector for RecordingSink {
    async fn send(&self, event: &SinkEvent) -> Result<()> {
        self.events.lock().expect("events lock").push(event.clone());
        Ok(())
    }
}

fn sign(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).expect("hmac");
    mac.update(body.as_bytes());
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

async fn serve() -> (String, Arc<RecordingSink>) {
    let raw = format!(
        r##"
[tracker]
host = "https://tracker.example.org/api/"
token = "api-abc"

[tracker.hooks]
irc = "{SECRET}"

[irc]
host = "irc.example.net"
port = 6697
nickname = "crier"
password = "sekrit"
channel = "#dev"
"##
    );
    let config = Arc::new(toml::from_str(&raw).expect("config"));
    let chat = Arc::new(RecordingSink::default());
    let state = Arc::new(
        GatewayState::new(
            config,
            Arc::new(ScriptedTracker),
            chat.clone(),
            None,
            None,
        )
        .expect("gateway state"),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let address = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("serve");
    });
    (format!("http://{address}"), chat)
}

#[tokio::test]
async fn integration_signed_new_task_webhook_produces_one_chat_line() {
    let (base, chat) = serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/irc"))
        .header(SIGNATURE_HEADER, sign(TASK_BODY))
        .body(TASK_BODY)
        .send()
        .await
        .expect("request");
    assert_eq!(response.text().await.expect("body"), "Ok");

    let events = chat.events.lock().expect("events lock").clone();
    assert_eq!(events.len(), 1);
    let SinkEvent::Chat(notification) = &events[0] else {
        panic!("expected chat event");
    };
    let line = notification.render();
    let positions: Vec<usize> = [
        "T99: Boot hangs on splash",
        "Alice",
        "just created this task",
        "https://tracker.example.org/T99",
    ]
    .iter()
    .map(|part| line.find(part).expect("part present"))
    .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn integration_bad_signature_is_acknowledged_but_silent() {
    let (base, chat) = serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/irc"))
        .header(SIGNATURE_HEADER, "deadbeef")
        .body(TASK_BODY)
        .send()
        .await
        .expect("request");

    // The caller cannot distinguish a rejection from a success.
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.expect("body"), "Ok");
    assert!(chat.events.lock().expect("events lock").is_empty());
}

#[tokio::test]
async fn integration_unsigned_request_is_acknowledged_but_silent() {
    let (base, chat) = serve().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/irc"))
        .body(TASK_BODY)
        .send()
        .await
        .expect("request");
    assert_eq!(response.text().await.expect("body"), "Ok");
    assert!(chat.events.lock().expect("events lock").is_empty());
}
