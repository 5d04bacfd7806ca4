//! Jenkins build-trigger and build-status sink.
//!
//! Triggering is a single `notifyCommit` POST keyed by the mapped package
//! name. Status polling compares the last two completed builds so a stable
//! package does not produce a notice per commit.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use crier_core::JenkinsConfig;
use reqwest::Client;
use serde_json::Value;

use crate::{Connector, SinkEvent};

pub struct JenkinsSink {
    http: Client,
    site: String,
    trigger_template: String,
    /// Repository name -> package name; unmapped repositories are skipped.
    packages: BTreeMap<String, String>,
}

/// A reportable change between the two most recent completed builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTransition {
    pub job: String,
    pub phrase: &'static str,
    pub url: String,
}

impl JenkinsSink {
    pub fn new(config: &JenkinsConfig, packages: BTreeMap<String, String>) -> Self {
        Self {
            http: Client::new(),
            site: config.site.clone(),
            trigger_template: config.trigger_template.clone(),
            packages,
        }
    }

    fn package_for(&self, repository: &str) -> Option<&str> {
        let package = self.packages.get(repository).map(String::as_str);
        if package.is_none() {
            tracing::debug!(%repository, "unsupported repository, not triggering");
        }
        package
    }

    async fn trigger(&self, repository: &str) -> Result<()> {
        let Some(package) = self.package_for(repository) else {
            return Ok(());
        };
        let package_url = self.trigger_template.replace("PACKAGE", package);
        let url = format!("{}/git/notifyCommit?url={}", self.site, package_url);
        let response = self
            .http
            .post(&url)
            .body("")
            .send()
            .await
            .with_context(|| format!("failed to notify jenkins for {package}"))?;
        tracing::debug!(status = %response.status(), %package, "sent to jenkins");
        Ok(())
    }

    /// Looks up the last completed build of `job` and the build before it,
    /// and returns a transition worth announcing, if any.
    pub async fn status_transition(&self, job: &str) -> Result<Option<BuildTransition>> {
        let latest = self
            .build_record(job, "lastCompletedBuild")
            .await
            .with_context(|| format!("failed to fetch last completed build of {job}"))?;
        let latest_result = string_field(&latest, "result")?;
        let latest_url = string_field(&latest, "url")?;
        let number = latest
            .get("number")
            .and_then(Value::as_u64)
            .context("build record missing 'number'")?;

        if number < 2 {
            // Nothing to compare against yet.
            return Ok(None);
        }
        let previous = self
            .build_record(job, &(number - 1).to_string())
            .await
            .with_context(|| format!("failed to fetch previous build of {job}"))?;
        let previous_result = string_field(&previous, "result")?;

        Ok(
            transition_phrase(&previous_result, &latest_result).map(|phrase| BuildTransition {
                job: job.to_string(),
                phrase,
                url: latest_url,
            }),
        )
    }

    async fn build_record(&self, job: &str, build: &str) -> Result<Value> {
        let url = format!("{}/job/{}/{}/api/json", self.site, job, build);
        let response = self.http.get(&url).send().await?;
        Ok(response.json().await?)
    }
}

fn string_field(record: &Value, field: &str) -> Result<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("build record missing '{field}'"))
}

/// The status-transition table. Two consecutive successes are suppressed;
/// every other pair yields a qualifying phrase.
pub fn transition_phrase(previous: &str, latest: &str) -> Option<&'static str> {
    match (previous, latest) {
        ("SUCCESS", "SUCCESS") => None,
        (_, "SUCCESS") => Some("just succeeded after failing"),
        ("UNSTABLE", "UNSTABLE") => Some("is still unstable"),
        (_, "UNSTABLE") => Some("just became unstable"),
        ("FAILURE", "FAILURE") => Some("is still failing"),
        (_, "FAILURE") => Some("just failed"),
        (_, "ABORTED") => Some("was just aborted"),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Connector for JenkinsSink {
    async fn send(&self, event: &SinkEvent) -> Result<()> {
        match event {
            SinkEvent::Commit { repository, .. } => self.trigger(repository).await,
            SinkEvent::Chat(_) => Ok(()),
        }
    }
}
