//! Launchpad bug-tracker sink.
//!
//! Extracts `lp: #N` references from commit messages and, for packages in
//! the configured release list, posts a fixed-template comment and moves the
//! bug to Fix Committed.

use anyhow::{Context, Result};
use crier_core::LaunchpadConfig;
use regex::Regex;
use reqwest::Client;

use crate::{Connector, SinkEvent};

pub struct LaunchpadSink {
    http: Client,
    base_url: String,
    token: String,
    supported_releases: Vec<String>,
}

impl LaunchpadSink {
    pub fn new(config: &LaunchpadConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            supported_releases: config.supported_releases.clone(),
        }
    }

    async fn update_bugs(&self, package: &str, message: &str) -> Result<()> {
        if !self.supported_releases.iter().any(|r| r == package) {
            tracing::debug!(%package, "package not in supported releases, skipping");
            return Ok(());
        }

        for bug in extract_bug_refs(message) {
            self.comment_and_transition(package, bug).await?;
        }
        Ok(())
    }

    async fn comment_and_transition(&self, package: &str, bug: u64) -> Result<()> {
        let url = format!("{}/bugs/{}", self.base_url, bug);
        let comment = format!(
            "This bug was fixed in {package}. The fix will land with the next upload."
        );

        self.http
            .post(&url)
            .header("Authorization", format!("OAuth {}", self.token))
            .form(&[("ws.op", "newMessage"), ("content", comment.as_str())])
            .send()
            .await
            .with_context(|| format!("failed to comment on bug {bug}"))?;

        self.http
            .post(&url)
            .header("Authorization", format!("OAuth {}", self.token))
            .form(&[("ws.op", "transitionToStatus"), ("status", "Fix Committed")])
            .send()
            .await
            .with_context(|| format!("failed to transition bug {bug}"))?;

        tracing::info!(bug, %package, "bug updated");
        Ok(())
    }
}

/// Pulls every bug number out of `lp: #N[, #N...]` markers, case-insensitive.
pub fn extract_bug_refs(message: &str) -> Vec<u64> {
    // Invalid pattern would be a programming error, caught by the tests.
    let marker = Regex::new(r"(?i)lp:\s*(#\d+(?:\s*,\s*#\d+)*)").expect("bug marker pattern");
    let number = Regex::new(r"\d+").expect("number pattern");

    let mut bugs = Vec::new();
    for capture in marker.captures_iter(message) {
        for digits in number.find_iter(&capture[1]) {
            if let Ok(bug) = digits.as_str().parse() {
                bugs.push(bug);
            }
        }
    }
    bugs
}

#[async_trait::async_trait]
impl Connector for LaunchpadSink {
    async fn send(&self, event: &SinkEvent) -> Result<()> {
        match event {
            SinkEvent::Commit {
                repository,
                message,
            } => self.update_bugs(repository, message).await,
            SinkEvent::Chat(_) => Ok(()),
        }
    }
}
