use thiserror::Error;

/// Everything that can go wrong while keeping the local views in sync.
/// None of these are fatal: each degrades to a local-only or retry state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Cached content was unreadable; treated as empty.
    #[error("storage read failed: {0}")]
    StorageRead(String),

    /// Cache write failed; the in-memory state still applies.
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    /// A remote insert or delete failed; the optimistic change is rolled back.
    #[error("remote write failed: {0}")]
    RemoteWrite(String),

    /// A remote fetch failed; the displayed list is cleared until a retry.
    #[error("remote read failed: {0}")]
    RemoteRead(String),

    /// The live feed could not be established or was lost.
    #[error("live feed unavailable: {0}")]
    Subscription(String),
}

impl SyncError {
    pub fn remote_write(err: impl std::fmt::Display) -> Self {
        Self::RemoteWrite(err.to_string())
    }

    pub fn remote_read(err: impl std::fmt::Display) -> Self {
        Self::RemoteRead(err.to_string())
    }

    pub fn subscription(err: impl std::fmt::Display) -> Self {
        Self::Subscription(err.to_string())
    }

    /// Whether the user can reasonably hit "retry".
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteRead(_) | Self::RemoteWrite(_) | Self::Subscription(_))
    }

    /// Banner text shown to the user.
    pub fn notice(&self) -> &'static str {
        match self {
            Self::StorageRead(_) => "Saved messages could not be read.",
            Self::StorageWrite(_) => "Messages could not be saved on this device.",
            Self::RemoteWrite(_) => "Failed to save message to the database.",
            Self::RemoteRead(_) => {
                "Could not reach database. Please check your network or try again."
            }
            Self::Subscription(_) => "Realtime subscription failed (cannot reach database).",
        }
    }
}
