//! Indirect Core - Request, Artifact and Record Types
//!
//! Data types shared by every backend and by the router: what a request
//! asks for, what a backend answers, and the pure algorithms over them
//! (hierarchy flattening, correlation, validation). No I/O lives here.

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

mod artifact;
pub mod config;
pub mod correlation;
mod enums;
mod error;
pub mod hierarchy;
mod record;
mod request;
pub mod validation;

pub use artifact::*;
pub use config::{EnvironmentConfig, IndirectConfig, KindConfig, KindOverride};
pub use correlation::{ContentStore, Correlator};
pub use enums::*;
pub use error::*;
pub use record::*;
pub use request::*;
pub use validation::{
    validate_environment, validate_key, validate_request, MAX_ENVIRONMENT_LEN, MAX_KEY_LEN,
};
