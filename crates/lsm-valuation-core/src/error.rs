use thiserror::Error;

#[derive(Debug, Error)]
pub enum LsmError {
    #[error("Configuration error: {field}: {reason}")]
    Configuration { field: String, reason: String },

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl LsmError {
    pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
        LsmError::Configuration {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

const CONFIGURATION_PREFIX: &str = "Configuration error: ";

/// Configuration errors raised inside `Deserialize` impls travel through
/// serde as their display text and are restored here.
impl From<serde_json::Error> for LsmError {
    fn from(e: serde_json::Error) -> Self {
        let mut message = e.to_string();
        if e.line() > 0 {
            let position = format!(" at line {} column {}", e.line(), e.column());
            if message.ends_with(&position) {
                message.truncate(message.len() - position.len());
            }
        }
        if e.is_data() {
            if let Some((field, reason)) = message
                .strip_prefix(CONFIGURATION_PREFIX)
                .and_then(|rest| rest.split_once(": "))
            {
                return LsmError::config(field, reason);
            }
        }
        LsmError::SerializationError(e.to_string())
    }
}
