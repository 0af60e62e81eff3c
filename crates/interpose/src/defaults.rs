//! Default-behavior synthesis
//!
//! Decides what `proceed()` means when a proxy has no target, and turns
//! untyped handler results back into a member's return type.
//!
//! | Source    | Member   | Without target            |
//! |-----------|----------|---------------------------|
//! | interface | any      | default value             |
//! | class     | abstract | default value             |
//! | class     | concrete | base (provided) body      |

use futures::future;

use crate::error::{AsyncFault, ProxyError};
use crate::invocation::{AnyValue, InvocationResult, ProceedFuture};
use crate::member::MemberInfo;
use crate::source::SourceKind;

/// Path a member proceeds to when the proxy has no target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fallback {
    /// Produce the return type's default value
    Default,
    /// Call the member's provided body
    Base,
}

/// Resolve a member's fallback once, at synthesis time
pub fn resolve_fallback(kind: SourceKind, member: &MemberInfo) -> Fallback {
    match kind {
        SourceKind::Interface => Fallback::Default,
        SourceKind::Class if member.modifiers.is_abstract => Fallback::Default,
        SourceKind::Class => Fallback::Base,
    }
}

/// Wrap an immediate result in an already-completed future
pub fn completed(result: InvocationResult) -> ProceedFuture {
    Box::pin(future::ready(result))
}

/// The synthesized default result of a member returning `T`
pub fn default_value<T: Default + Send + 'static>(member: &MemberInfo) -> Option<AnyValue> {
    if member.is_void() {
        None
    } else {
        Some(Box::new(T::default()))
    }
}

/// Coerce an untyped result to `T`.
///
/// A missing value is only accepted for void and nullable (`Option<_>`)
/// members; anywhere else it is an `InvalidAsync` fault.
pub fn coerce<T: Default + 'static>(
    member: &MemberInfo,
    value: Option<AnyValue>,
) -> Result<T, ProxyError> {
    if member.is_void() {
        return Ok(T::default());
    }
    match value {
        Some(value) => value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| ProxyError::ResultTypeMismatch {
                member: member.name.clone(),
                expected: std::any::type_name::<T>(),
            }),
        None if member.nullable => Ok(T::default()),
        None => Err(ProxyError::invalid_async(
            member.name.clone(),
            AsyncFault::NullResult,
        )),
    }
}

/// Apply the same missing-value rule as [`coerce`] to an untyped result.
///
/// Values produced for void members are discarded.
pub fn require_value(member: &MemberInfo, result: InvocationResult) -> InvocationResult {
    match result? {
        _ if member.is_void() => Ok(None),
        Some(value) => Ok(Some(value)),
        None if member.nullable => Ok(None),
        None => Err(ProxyError::invalid_async(
            member.name.clone(),
            AsyncFault::NullResult,
        )),
    }
}
