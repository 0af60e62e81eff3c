//! Error types for proxy synthesis and dispatch

use std::fmt;

/// Result type for synthesis operations
pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// Fatal errors raised while synthesizing a proxy type.
///
/// A synthesis error aborts creation of the whole proxy type; nothing is
/// cached for the failing source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// A member's parameter or return type cannot be carried through dispatch
    #[error("Unsupported signature for {source_type}::{member}: {reason}")]
    UnsupportedSignature {
        /// Source type name
        source_type: String,
        /// Member name
        member: String,
        /// Why the signature was rejected
        reason: String,
    },

    /// A class source has no parameterless constructor
    #[error("Class {0} has no default constructor")]
    MissingDefaultConstructor(String),

    /// A class source is sealed and cannot be subclassed
    #[error("Class {0} is sealed")]
    SealedSource(String),

    /// The source type is not accessible to the synthesizer
    #[error("Source type {0} is not accessible")]
    Inaccessible(String),

    /// Two members share the same structural signature
    #[error("Ambiguous member identity: {0}")]
    AmbiguousMember(String),

    /// A structural signature has no matching member
    #[error("No member matches signature {signature} on {source_type}")]
    UnresolvedMember {
        /// Source type name
        source_type: String,
        /// Rendered signature
        signature: String,
    },

    /// The build-time plan and the source metadata disagree on member count
    #[error("Dispatch plan for {source_type} has {planned} entries, metadata has {declared}")]
    PlanMismatch {
        /// Source type name
        source_type: String,
        /// Entries in the plan
        planned: usize,
        /// Members in the metadata
        declared: usize,
    },

    /// A concrete class member has no base implementation to proceed to
    #[error("Concrete member {source_type}::{member} has no base implementation")]
    MissingBaseImpl {
        /// Source type name
        source_type: String,
        /// Member name
        member: String,
    },
}

/// Why a synchronous call boundary rejected a handler result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncFault {
    /// The handler's future was still pending under the `Throw` policy
    Pending,
    /// The handler produced no value for a non-nullable return
    NullResult,
}

impl fmt::Display for AsyncFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncFault::Pending => write!(f, "handler did not complete synchronously"),
            AsyncFault::NullResult => write!(f, "handler returned no value for a non-nullable result"),
        }
    }
}

/// Per-call errors raised by the dispatch protocol.
///
/// These never affect the proxy type or subsequent calls.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Invalid asynchronous result at a synchronous boundary
    #[error("Invalid async result for {member}: {fault}")]
    InvalidAsync {
        /// Member name
        member: String,
        /// What went wrong
        fault: AsyncFault,
    },

    /// The result value has a different type than the member returns
    #[error("Result type mismatch for {member}: expected {expected}")]
    ResultTypeMismatch {
        /// Member name
        member: String,
        /// Expected Rust type
        expected: &'static str,
    },

    /// An argument slot holds a different type than requested
    #[error("Argument {index} type mismatch: expected {expected}, got {got}")]
    ArgumentTypeMismatch {
        /// Slot index
        index: usize,
        /// Requested type
        expected: &'static str,
        /// Stored type
        got: &'static str,
    },

    /// Argument index past the end of the argument list
    #[error("Argument index {index} out of range ({len} arguments)")]
    ArgumentOutOfRange {
        /// Requested index
        index: usize,
        /// Number of arguments
        len: usize,
    },

    /// No member with this name or signature
    #[error("Unknown member: {0}")]
    UnknownMember(String),

    /// Static and finalizer members cannot be invoked through a proxy
    #[error("Member {0} cannot be invoked on a proxy instance")]
    NotInvocable(String),

    /// The proxy instance was dropped while a proceed path still referenced it
    #[error("Proxy instance was released before proceeding")]
    ProxyReleased,

    /// Failure reported by the user's handler
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl ProxyError {
    /// Build an `InvalidAsync` error for a member
    pub fn invalid_async(member: impl Into<String>, fault: AsyncFault) -> Self {
        ProxyError::InvalidAsync {
            member: member.into(),
            fault,
        }
    }

    /// Check if this is an `InvalidAsync` error
    pub fn is_invalid_async(&self) -> bool {
        matches!(self, ProxyError::InvalidAsync { .. })
    }
}
