/// Store-level failures.
///
/// Domain crates treat any of these as "cannot determine safety state":
/// the calling operation fails hard, never silently defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An operation hit a key holding a different value type.
    WrongType { key: String },
    /// Backend/transport failure (connection lost, timeout, etc.).
    Backend { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::WrongType { key } => {
                write!(f, "store key {key:?} holds a different value type")
            }
            StoreError::Backend { message } => write!(f, "store backend failure: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}
