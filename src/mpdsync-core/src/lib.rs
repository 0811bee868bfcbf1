pub mod config;
pub mod logging;
pub mod models;
pub mod paths;
pub mod secrets;
pub mod transport;

pub use config::{
    Config, ConfigError, LogLevel, LoggingConfig, PollingConfig, ServerConfig, ValidationError,
};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use models::{
    ChangeSet, ChangedField, Mutation, PlaybackState, ServerStats, ServerStatus, Song,
    StatusSnapshot, NO_SONG, UNKNOWN_PLAYLIST_VERSION,
};
pub use paths::{AppDirs, DirsError};
pub use secrets::{CredentialStore, SecretsError, SecretsResult};
pub use transport::{Command, Connector, Transport, TransportError, TransportResult};

pub const APP_NAME: &str = "mpdsync";
pub const APP_AUTHOR: &str = "mpdsync";
pub const APP_QUALIFIER: &str = "io";
