use thiserror::Error;

/// Errors surfaced by the core library.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem failure while writing the counter store.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Counter map could not be encoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A trigger id was registered twice.
    #[error("duplicate trigger id: {id}")]
    DuplicateTrigger {
        /// The id that was already taken.
        id: String,
    },

    /// A trigger definition can never fire.
    #[error("invalid trigger {id}: {reason}")]
    InvalidTrigger {
        /// Offending trigger id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Filesystem notification backend failure.
    #[error(transparent)]
    Watch(#[from] notify_debouncer_full::notify::Error),
}

/// Result alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
