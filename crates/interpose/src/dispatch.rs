//! Per-call dispatch protocol
//!
//! Every proxy instance, typed or dynamic, owns a [`ProxyCore`]. A call goes
//! through these states:
//!
//! ```text
//! Created ──(predicate off)──────────────────────────► Completed  (fast path)
//!    │
//!    └─(predicate on)─► Dispatched ─┬─► NotProceeded ─► Completed
//!                                   └─► Proceeded ────► Completed
//! ```
//!
//! The fast path never allocates an [`Invocation`]. `proceed()` may run any
//! number of times; each run re-executes the resolved path against the
//! current argument values.

use std::fmt;
use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::defaults::coerce;
use crate::error::{ProxyError, SynthesisError, SynthesisResult};
use crate::handler::InvocationHandler;
use crate::invocation::{
    Invocation, InvocationResult, ProceedFn, ProceedFuture, ProxyId, SharedArguments, TargetRef,
};
use crate::member::MemberInfo;
use crate::synth::{DispatchEntry, ProxyType};

/// State shared by every call on one proxy instance
pub struct ProxyCore<T: ?Sized> {
    id: ProxyId,
    ty: Arc<ProxyType>,
    target: Option<Arc<T>>,
    target_ref: Option<TargetRef>,
    handler: InvocationHandler,
}

impl<T: ?Sized + Send + Sync + 'static> ProxyCore<T> {
    /// Bind a descriptor, optional target and handler into a new instance
    pub fn new(ty: Arc<ProxyType>, target: Option<Arc<T>>, handler: InvocationHandler) -> Self {
        let id = ProxyId::next();
        let target_ref = target.as_ref().map(|t| TargetRef::new(Arc::clone(t)));

        tracing::debug!(
            proxy = id.as_u64(),
            source = ty.source(),
            strategy = ?ty.strategy(),
            has_target = target.is_some(),
            "created proxy instance"
        );

        Self {
            id,
            ty,
            target,
            target_ref,
            handler,
        }
    }

    /// Instance id
    pub fn id(&self) -> ProxyId {
        self.id
    }

    /// Shared descriptor
    pub fn proxy_type(&self) -> &Arc<ProxyType> {
        &self.ty
    }

    /// The target, if any
    pub fn target(&self) -> Option<&Arc<T>> {
        self.target.as_ref()
    }

    /// Type-erased target handle
    pub fn target_ref(&self) -> Option<&TargetRef> {
        self.target_ref.as_ref()
    }

    /// The handler
    pub fn handler(&self) -> &InvocationHandler {
        &self.handler
    }

    /// Dispatch entry at a declaration index.
    ///
    /// Indices come from the same declaration order the descriptor was built
    /// from; [`check_plan`] guards the length at construction.
    pub fn entry(&self, index: usize) -> &DispatchEntry {
        &self.ty.entries()[index]
    }

    /// Whether a call to `entry` reaches the handler
    pub fn is_active(&self, entry: &DispatchEntry) -> bool {
        entry.intercepted && self.handler.is_active(self.target_ref.as_ref(), &entry.member)
    }

    /// Build the invocation record for one call
    pub fn invocation(
        &self,
        entry: &DispatchEntry,
        arguments: SharedArguments,
        proceed: ProceedFn,
    ) -> Invocation {
        Invocation::new(
            self.id,
            Arc::clone(&entry.member),
            self.target_ref.clone(),
            arguments,
            proceed,
        )
    }

    /// Hand one call to the handler
    pub fn dispatch(
        &self,
        entry: &DispatchEntry,
        arguments: SharedArguments,
        proceed: ProceedFn,
    ) -> ProceedFuture {
        if ProxyConfig::global().trace_dispatch {
            tracing::trace!(
                proxy = self.id.as_u64(),
                member = %entry.member.name,
                flags = ?entry.flags,
                "dispatching"
            );
        }
        self.handler.handle(self.invocation(entry, arguments, proceed))
    }

    /// Hand one call to the handler and collapse the result for a
    /// synchronous member
    pub fn dispatch_sync(
        &self,
        entry: &DispatchEntry,
        arguments: SharedArguments,
        proceed: ProceedFn,
    ) -> InvocationResult {
        let future = self.dispatch(entry, arguments, proceed);
        self.handler.resolve_sync(&entry.member, future)
    }
}

impl<T: ?Sized> fmt::Debug for ProxyCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCore")
            .field("id", &self.id)
            .field("source", &self.ty.source())
            .field("strategy", &self.ty.strategy())
            .field("has_target", &self.target.is_some())
            .field("handler", &self.handler)
            .finish()
    }
}

/// Check that a descriptor has one entry per member the caller will index
pub fn check_plan(ty: &ProxyType, declared: usize) -> SynthesisResult<()> {
    if ty.len() == declared {
        Ok(())
    } else {
        Err(SynthesisError::PlanMismatch {
            source_type: ty.source().to_string(),
            planned: ty.len(),
            declared,
        })
    }
}

/// Coerce a handler result for a typed member, raising on failure
pub fn settle<T: Default + 'static>(member: &MemberInfo, result: InvocationResult) -> T {
    match result.and_then(|value| coerce::<T>(member, value)) {
        Ok(value) => value,
        Err(err) => raise(member, err),
    }
}

/// Copy a by-reference argument back out of the container
pub fn read_back<T: Clone + 'static>(member: &MemberInfo, arguments: &SharedArguments, index: usize) -> T {
    let result = arguments.lock().get::<T>(index);
    match result {
        Ok(value) => value,
        Err(err) => raise(member, err),
    }
}

/// Surface a per-call error from a member whose signature cannot carry it.
///
/// The `ProxyError` becomes the panic payload, so callers can
/// `catch_unwind` and downcast it.
pub fn raise(member: &MemberInfo, error: ProxyError) -> ! {
    tracing::error!(member = %member.name, error = %error, "proxy call failed");
    std::panic::panic_any(error)
}
