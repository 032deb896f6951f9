//! Interaction error taxonomy
//!
//! Every fallible operation of the consumer runtime surfaces one of the
//! kinds below, so a caller can distinguish a missing affordance from a
//! schema violation or an exhausted payload stream without string matching.

use crate::thing::FormOperation;

/// Errors raised while consuming a Thing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The Thing Description does not contain the requested resource.
    #[error("\"{0}\" not found")]
    NotFound(String),

    /// No protocol client factory is registered for an URI scheme.
    #[error("No protocol client factory registered for scheme \"{0}\"")]
    UnknownScheme(String),

    /// The interaction contradicts a constraint declared by the Thing
    /// Description, such as writing a read-only property.
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// The Thing Description does not declare a usable form for the
    /// requested operation.
    #[error("\"{name}\" has no form supporting the {operation} operation")]
    NoForm {
        name: String,
        operation: FormOperation,
    },

    /// An explicit form index points outside the declared forms.
    #[error("Form index {index} out of range, \"{name}\" declares {len} forms")]
    FormIndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },

    /// The payload stream was already consumed.
    #[error("Content can only be read once")]
    NotReadable,

    /// The content type has no registered codec and decoding cannot proceed.
    #[error("No codec registered for content type \"{0}\"")]
    NotSupported(String),

    /// The decoded value does not satisfy the declared data schema, or an
    /// expected value is missing.
    #[error("Schema evaluation failed: {0}")]
    Evaluation(String),

    /// A lifecycle operation was issued in the wrong state, such as
    /// unsubscribing an affordance that is not subscribed.
    #[error("Invalid operation: {0}")]
    Operation(String),

    /// The payload could not be serialized or deserialized.
    #[error("Serialization failed")]
    Serde(#[from] serde_json::Error),

    /// A transport-level failure, propagated uninterpreted.
    #[error("Protocol error: {0}")]
    Protocol(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary transport error without interpreting it.
    pub fn protocol<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Protocol(Box::new(err))
    }
}
