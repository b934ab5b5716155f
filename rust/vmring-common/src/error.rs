use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn metadata_allocation(what: impl Into<String>) -> Error {
        Error(ErrorKind::MetadataAllocation { what: what.into() }.into())
    }

    pub fn backing_store(source: std::io::Error) -> Error {
        Error(ErrorKind::BackingStore { source }.into())
    }

    pub fn resize(size: usize, source: std::io::Error) -> Error {
        Error(ErrorKind::Resize { size, source }.into())
    }

    pub fn map(stage: MapStage, source: std::io::Error) -> Error {
        Error(ErrorKind::Map { stage, source }.into())
    }

    pub fn unmap(source: std::io::Error) -> Error {
        Error(ErrorKind::Unmap { source }.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Unsupported {
                message: message.into(),
            }
            .into(),
        )
    }

    /// Returns `true` if this error was raised while constructing a mapped region.
    pub fn is_construction_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MetadataAllocation { .. }
                | ErrorKind::BackingStore { .. }
                | ErrorKind::Resize { .. }
                | ErrorKind::Map { .. }
                | ErrorKind::Unsupported { .. }
        )
    }
}

/// Which of the two mappings of a mirrored region failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStage {
    /// The initial mapping at an OS-chosen address.
    First,
    /// The fixed-address mirror placed right after the first mapping.
    Second,
}

impl std::fmt::Display for MapStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapStage::First => f.write_str("first"),
            MapStage::Second => f.write_str("second"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("failed to allocate {what}")]
    MetadataAllocation { what: String },

    #[error("failed to create backing store: {source}")]
    BackingStore { source: std::io::Error },

    #[error("failed to resize backing store to {size} bytes: {source}")]
    Resize {
        size: usize,
        source: std::io::Error,
    },

    #[error("{stage} mapping failed: {source}")]
    Map {
        stage: MapStage,
        source: std::io::Error,
    },

    #[error("failed to unmap region: {source}")]
    Unmap { source: std::io::Error },

    #[error("not supported: {message}")]
    Unsupported { message: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
