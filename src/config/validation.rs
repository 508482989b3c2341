//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffer size > 0)
//! - Check that routing predicates and mounts are well-formed paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    check_mount_path(&mut errors, "routing.bare_prefix", &config.routing.bare_prefix);
    check_mount_path(&mut errors, "routing.wisp_suffix", &config.routing.wisp_suffix);

    if config.bare.request_timeout_secs == 0 {
        errors.push(ValidationError::new("bare.request_timeout_secs", "must be > 0"));
    }
    if config.bare.max_body_bytes == 0 {
        errors.push(ValidationError::new("bare.max_body_bytes", "must be > 0"));
    }
    if config.wisp.buffer_size == 0 {
        errors.push(ValidationError::new("wisp.buffer_size", "must be > 0"));
    }
    if config.wisp.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("wisp.connect_timeout_secs", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let mut seen = HashSet::new();
    for (i, engine) in config.static_files.engines.iter().enumerate() {
        if engine.name.is_empty() {
            errors.push(ValidationError::new(
                format!("static_files.engines[{i}].name"),
                "must not be empty",
            ));
        }
        if !seen.insert(engine.name.as_str()) {
            errors.push(ValidationError::new(
                format!("static_files.engines[{i}].name"),
                format!("duplicate engine '{}'", engine.name),
            ));
        }
        check_mount_path(&mut errors, &format!("static_files.engines[{i}].mount"), &engine.mount);
        check_mount_path(
            &mut errors,
            &format!("static_files.engines[{i}].service_prefix"),
            &engine.service_prefix,
        );
    }
    for (i, mount) in config.static_files.mounts.iter().enumerate() {
        check_mount_path(&mut errors, &format!("static_files.mounts[{i}].path"), &mount.path);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Mount paths must be absolute and end with a slash, e.g. "/bare/".
fn check_mount_path(errors: &mut Vec<ValidationError>, field: &str, path: &str) {
    if path.len() < 2 || !path.starts_with('/') || !path.ends_with('/') {
        errors.push(ValidationError::new(
            field,
            format!("'{}' must start and end with '/' and name a segment", path),
        ));
    }
}
