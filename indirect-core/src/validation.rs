//! Request validation, applied before any backend I/O

use crate::{Operation, Request, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest key any backend is asked to store.
pub const MAX_KEY_LEN: usize = 255;

/// Longest environment name accepted. With [`MAX_KEY_LEN`] this keeps every
/// scoped storage key inside LMDB's 511-byte limit.
pub const MAX_ENVIRONMENT_LEN: usize = 64;

/// Longest serialized option value accepted on a request.
pub const MAX_OPTION_LEN: usize = 64 * 1024;

static ENVIRONMENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("Invalid environment regex"));

static OPTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("Invalid option regex"));

fn invalid_key(key: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Reject keys that could escape a storage namespace or break a wire path.
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(invalid_key(key, "key is empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(invalid_key(key, "key exceeds 255 bytes"));
    }
    if key.chars().any(char::is_control) {
        return Err(invalid_key(key, "key contains control characters"));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(invalid_key(key, "key contains a path separator"));
    }
    if key == "." || key.contains("..") {
        return Err(invalid_key(key, "key contains a relative path component"));
    }
    Ok(())
}

pub fn validate_environment(name: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_ENVIRONMENT_LEN {
        return Err(ValidationError::InvalidEnvironment {
            name: name.to_string(),
            reason: format!("exceeds {} bytes", MAX_ENVIRONMENT_LEN),
        });
    }
    if ENVIRONMENT_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEnvironment {
            name: name.to_string(),
            reason: "must be lowercase letters, digits and underscores".to_string(),
        })
    }
}

/// Validate everything about a request that does not depend on a backend.
pub fn validate_request(request: &Request) -> Result<(), ValidationError> {
    validate_key(request.key())?;
    validate_environment(request.environment())?;

    for (name, value) in request.options() {
        if !OPTION_NAME.is_match(name) {
            return Err(ValidationError::InvalidOption {
                option: name.clone(),
                reason: "option names are letters, digits, '_', '-' and '.'".to_string(),
            });
        }
        if value.to_string().len() > MAX_OPTION_LEN {
            return Err(ValidationError::InvalidOption {
                option: name.clone(),
                reason: "value too large".to_string(),
            });
        }
    }

    if request.force_fresh() && request.force_cached() {
        tracing::debug!(
            request = %request.description(),
            "force_fresh and force_cached both set; force_fresh wins"
        );
    }

    if request.operation() == Operation::Save {
        let artifact = request.instance().ok_or_else(|| ValidationError::InvalidOption {
            option: "instance".to_string(),
            reason: "save requires an artifact".to_string(),
        })?;
        if artifact.key() != request.key() || artifact.kind() != request.kind() {
            return Err(ValidationError::KeyMismatch {
                expected: format!("{}/{}", request.kind(), request.key()),
                found: artifact.description(),
            });
        }
    }

    Ok(())
}
