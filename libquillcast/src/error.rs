//! Error types for Quillcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuillcastError>;

#[derive(Error, Debug)]
pub enum QuillcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl QuillcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            QuillcastError::InvalidInput(_) => 3,
            QuillcastError::Publish(PublishError::Authentication(_)) => 2,
            QuillcastError::Publish(_) => 1,
            QuillcastError::Config(_) => 1,
            QuillcastError::Database(_) => 1,
            QuillcastError::Cancelled => 0,
        }
    }

    /// Authentication failures abort the whole run, not just one job.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            QuillcastError::Publish(PublishError::Authentication(_)) | QuillcastError::Cancelled
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures raised while driving a publish run.
///
/// The variants map the taxonomy the scheduler acts on: authentication
/// invalidates the shared session and aborts the run; insertion is fatal
/// for one job once every strategy is exhausted; network errors are
/// transient and retried with backoff; browser errors are infrastructure
/// failures (crashed page, eval error) and treated like network errors.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content insertion failed: {0}")]
    Insertion(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Image provider error: {0}")]
    Image(String),
}

/// Check if an error is transient and should be retried with backoff
pub fn is_transient(error: &QuillcastError) -> bool {
    matches!(
        error,
        QuillcastError::Publish(PublishError::Network(_))
            | QuillcastError::Publish(PublishError::Browser(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = QuillcastError::InvalidInput("empty payload".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = QuillcastError::Publish(PublishError::Authentication("expired".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_publish_errors() {
        let insertion = QuillcastError::Publish(PublishError::Insertion("exhausted".to_string()));
        assert_eq!(insertion.exit_code(), 1);

        let network = QuillcastError::Publish(PublishError::Network("timeout".to_string()));
        assert_eq!(network.exit_code(), 1);

        let browser = QuillcastError::Publish(PublishError::Browser("page crashed".to_string()));
        assert_eq!(browser.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_config_and_database() {
        let config = QuillcastError::Config(ConfigError::MissingField("database.path".to_string()));
        assert_eq!(config.exit_code(), 1);

        let db = QuillcastError::Database(DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        )));
        assert_eq!(db.exit_code(), 1);
    }

    #[test]
    fn test_aborts_run_only_for_auth_and_cancel() {
        let auth = QuillcastError::Publish(PublishError::Authentication("expired".to_string()));
        assert!(auth.aborts_run());
        assert!(QuillcastError::Cancelled.aborts_run());

        let insertion = QuillcastError::Publish(PublishError::Insertion("exhausted".to_string()));
        assert!(!insertion.aborts_run());

        let network = QuillcastError::Publish(PublishError::Network("timeout".to_string()));
        assert!(!network.aborts_run());
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&QuillcastError::Publish(PublishError::Network(
            "reset".to_string()
        ))));
        assert!(is_transient(&QuillcastError::Publish(PublishError::Browser(
            "eval failed".to_string()
        ))));
        assert!(!is_transient(&QuillcastError::Publish(
            PublishError::Authentication("expired".to_string())
        )));
        assert!(!is_transient(&QuillcastError::Publish(
            PublishError::Insertion("exhausted".to_string())
        )));
        assert!(!is_transient(&QuillcastError::Cancelled));
    }

    #[test]
    fn test_error_message_formatting() {
        let error = QuillcastError::Publish(PublishError::Insertion(
            "all 4 strategies failed verification".to_string(),
        ));
        assert_eq!(
            format!("{}", error),
            "Publish error: Content insertion failed: all 4 strategies failed verification"
        );
    }

    #[test]
    fn test_error_conversion_from_publish_error() {
        let publish_error = PublishError::Network("timeout".to_string());
        let error: QuillcastError = publish_error.into();
        assert!(matches!(error, QuillcastError::Publish(_)));
    }

    #[test]
    fn test_publish_error_clone() {
        // Retry logic holds on to the last error while backing off
        let original = PublishError::Network("connection reset".to_string());
        let cloned = original.clone();
        assert_eq!(format!("{}", original), format!("{}", cloned));
    }
}
