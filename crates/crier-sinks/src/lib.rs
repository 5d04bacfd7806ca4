//! Outbound sinks: the polymorphic connector surface plus the Jenkins and
//! Launchpad implementations.
//!
//! Sinks share a `connect`/`send`/`listen` capability set and are selected
//! by static configuration at dispatch time, never by runtime type
//! inspection.

pub mod jenkins;
pub mod launchpad;

use anyhow::Result;
use crier_compose::Notification;

pub use jenkins::{transition_phrase, BuildTransition, JenkinsSink};
pub use launchpad::{extract_bug_refs, LaunchpadSink};

/// What the gateway hands a sink once an event survives classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// A composed chat notification, consumed exactly once.
    Chat(Notification),
    /// A commit on a tracked repository, for build/bug-tracker sinks.
    Commit { repository: String, message: String },
}

/// The shared connector surface. `connect` and `listen` default to no-ops;
/// request/response sinks have nothing to set up or receive.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, event: &SinkEvent) -> Result<()>;

    async fn listen(&self) -> Result<()> {
        Ok(())
    }
}
