use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryForgeError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Regeneration budget exhausted after {attempts} attempts: {reason}")]
    RegenerationExhausted { attempts: u8, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QueryForgeError>;
