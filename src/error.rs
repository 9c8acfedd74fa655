//! Error types and handling for skybus

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, SkybusError>;

/// Stable integer identifiers for the broker error surface
///
/// Hosts that ferry errors across a C boundary or a wire protocol should
/// use these codes rather than matching on enum variants.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoSuchTopic = 1,
    InvalidArg = 2,
    NoMemory = 3,
    AlreadyAdvertised = 4,
    QueueTooLarge = 5,
    NoData = 6,
    IoError = 7,
    Forbidden = 8,
}

/// Error types for the skybus broker
#[derive(Debug, thiserror::Error)]
pub enum SkybusError {
    /// Topic is not known to the registry
    #[error("no such topic: {name}")]
    NoSuchTopic { name: String },

    /// Invalid parameters or caller misuse
    #[error("invalid argument: {parameter} - {message}")]
    InvalidArgument { parameter: String, message: String },

    /// Resource exhaustion (instance slots, allocation)
    #[error("out of resources: {message}")]
    NoMemory { message: String },

    /// Node already has a live publisher where only one is allowed
    #[error("topic already advertised: {name}")]
    AlreadyAdvertised { name: String },

    /// Queue growth was requested after the ring was installed
    #[error("queue size {requested} exceeds installed size {installed} for {name}")]
    QueueTooLarge {
        name: String,
        requested: usize,
        installed: usize,
    },

    /// Nothing has ever been published on the node
    #[error("no data on topic: {name}")]
    NoData { name: String },

    /// Transient I/O failure that survived one retry
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Publisher rules deny the operation
    #[error("module {module} may not publish {name}")]
    Forbidden { module: String, name: String },

    /// Two descriptors with the same name disagree on payload layout
    #[error("descriptor mismatch for {name}: payload size {registered} already registered, got {offered}")]
    DescriptorMismatch {
        name: String,
        registered: u16,
        offered: u16,
    },
}

impl SkybusError {
    /// Stable integer identifier for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoSuchTopic { .. } => ErrorCode::NoSuchTopic,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArg,
            Self::NoMemory { .. } => ErrorCode::NoMemory,
            Self::AlreadyAdvertised { .. } => ErrorCode::AlreadyAdvertised,
            Self::QueueTooLarge { .. } => ErrorCode::QueueTooLarge,
            Self::NoData { .. } => ErrorCode::NoData,
            Self::Io { .. } => ErrorCode::IoError,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::DescriptorMismatch { .. } => ErrorCode::InvalidArg,
        }
    }

    /// Create a no-such-topic error
    pub fn no_such_topic(name: impl Into<String>) -> Self {
        Self::NoSuchTopic { name: name.into() }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a resource exhaustion error
    pub fn no_memory(message: impl Into<String>) -> Self {
        Self::NoMemory {
            message: message.into(),
        }
    }

    /// Create an already-advertised error
    pub fn already_advertised(name: impl Into<String>) -> Self {
        Self::AlreadyAdvertised { name: name.into() }
    }

    /// Create a queue-too-large error
    pub fn queue_too_large(name: impl Into<String>, requested: usize, installed: usize) -> Self {
        Self::QueueTooLarge {
            name: name.into(),
            requested,
            installed,
        }
    }

    /// Create a no-data error
    pub fn no_data(name: impl Into<String>) -> Self {
        Self::NoData { name: name.into() }
    }

    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an I/O error without an underlying source
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Create a forbidden error
    pub fn forbidden(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Forbidden {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl From<std::io::Error> for SkybusError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}
