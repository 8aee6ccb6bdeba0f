use thiserror::Error;

pub type Result<T> = std::result::Result<T, IntentError>;

#[derive(Error, Debug)]
pub enum IntentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Pattern set '{name}' is not valid JSON or TOML: {message}")]
    Parse { name: String, message: String },

    #[error("intents.schema_version {0} is not supported (expected 1)")]
    UnsupportedSchema(u32),

    #[error("Unknown intent pattern fields: {}", .0.join(", "))]
    UnknownFields(Vec<String>),

    #[error("Intent pattern '{label}' has an empty pattern")]
    EmptyPattern { label: String },

    #[error("Intent pattern '{label}' is not a valid regex: {source}")]
    InvalidPattern {
        label: String,
        #[source]
        source: regex::Error,
    },

    #[error("Intent pattern label '{0}' is declared more than once")]
    DuplicateLabel(String),
}
