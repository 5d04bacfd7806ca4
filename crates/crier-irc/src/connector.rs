//! Adapts the chat session to the shared connector surface.

use anyhow::Result;
use crier_sinks::{Connector, SinkEvent};

use crate::session::ChatHandle;

/// The chat-channel sink: renders a notification and queues it on the
/// session's single-writer outbound path.
pub struct ChatConnector {
    handle: ChatHandle,
}

impl ChatConnector {
    pub fn new(handle: ChatHandle) -> Self {
        Self { handle }
    }
}

#[async_trait::async_trait]
impl Connector for ChatConnector {
    async fn send(&self, event: &SinkEvent) -> Result<()> {
        match event {
            SinkEvent::Chat(notification) => {
                self.handle.send_notice(notification.render()).await
            }
            SinkEvent::Commit { .. } => Ok(()),
        }
    }
}
