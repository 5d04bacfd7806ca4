//! Shared configuration model for the crier relay.
//!
//! The configuration is read once at startup, validated, and handed to every
//! component as an immutable value. Nothing in the workspace reads ambient
//! global state after that point.

pub mod config;

pub use config::{
    Config, ConfigError, IrcConfig, JenkinsConfig, LaunchpadConfig, TrackerConfig,
};
