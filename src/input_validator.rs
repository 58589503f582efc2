use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, GatewayResult};

const MAX_ID_LEN: usize = 256;

/// Whose recommendation is being requested: a user (`identity`) within a
/// game (`context`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub context: String,
    pub identity: String,
}

impl Subject {
    /// Validate raw request fields before any upstream call is made
    pub fn new(game_id: &str, user_id: &str) -> GatewayResult<Self> {
        let context = validate_id("game_id", game_id)?;
        let identity = validate_id("user_id", user_id)?;
        Ok(Self { context, identity })
    }
}

fn validate_id(field: &str, value: &str) -> GatewayResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GatewayError::invalid_request(field, "is required"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(GatewayError::invalid_request(
            field,
            format!("must be at most {MAX_ID_LEN} bytes"),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(GatewayError::invalid_request(
            field,
            "must not contain control characters",
        ));
    }
    Ok(value.to_string())
}
