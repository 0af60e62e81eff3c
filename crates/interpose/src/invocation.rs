//! Invocation model
//!
//! An [`Invocation`] is created fresh for every intercepted call and handed to
//! the handler. Whatever the member's shape, `proceed()` returns the same
//! boxed future of an untyped result, so one handler can serve every member:
//!
//! | Shape        | `proceed()` resolves to            |
//! |--------------|------------------------------------|
//! | void, sync   | `None` (already completed)         |
//! | value, sync  | `Some(value)` (already completed)  |
//! | void, async  | `None` once the call finishes      |
//! | value, async | `Some(value)` once the call finishes |

use std::any::{type_name, Any};
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Mutex, MutexGuard};

use crate::defaults::coerce;
use crate::error::ProxyError;
use crate::member::{MemberInfo, ParamMode, PropertyInfo};

/// Untyped value crossing the handler boundary
pub type AnyValue = Box<dyn Any + Send>;

/// Result of a handler or proceed path; `None` means "no value"
pub type InvocationResult = Result<Option<AnyValue>, ProxyError>;

/// Future returned by `proceed()` and by handlers
pub type ProceedFuture = BoxFuture<'static, InvocationResult>;

/// Argument container shared by the entry point and the proceed path
pub type SharedArguments = Arc<Mutex<Arguments>>;

/// Proceed capability: runs exactly one resolved call path
pub type ProceedFn = Arc<dyn Fn(SharedArguments) -> ProceedFuture + Send + Sync>;

/// Box a value as a handler result
pub fn value<T: Send + 'static>(value: T) -> Option<AnyValue> {
    Some(Box::new(value))
}

// ============================================================================
// Flags
// ============================================================================

/// Shape flags of an invocation
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InvocationFlags(u8);

impl InvocationFlags {
    /// Synchronous member returning a value
    pub const NONE: InvocationFlags = InvocationFlags(0);
    /// No meaningful return value
    pub const VOID: InvocationFlags = InvocationFlags(1);
    /// The member is asynchronous
    pub const ASYNC: InvocationFlags = InvocationFlags(1 << 1);

    /// Check if all bits of `other` are set
    pub fn contains(&self, other: InvocationFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check for `VOID`
    pub fn is_void(&self) -> bool {
        self.contains(Self::VOID)
    }

    /// Check for `ASYNC`
    pub fn is_async(&self) -> bool {
        self.contains(Self::ASYNC)
    }

    /// Raw bits
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl BitOr for InvocationFlags {
    type Output = InvocationFlags;

    fn bitor(self, rhs: Self) -> Self {
        InvocationFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for InvocationFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_void(), self.is_async()) {
            (false, false) => write!(f, "InvocationFlags(NONE)"),
            (true, false) => write!(f, "InvocationFlags(VOID)"),
            (false, true) => write!(f, "InvocationFlags(ASYNC)"),
            (true, true) => write!(f, "InvocationFlags(VOID | ASYNC)"),
        }
    }
}

// ============================================================================
// Proxy identity and target handle
// ============================================================================

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id of a proxy instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(u64);

impl ProxyId {
    /// Allocate the next id
    pub fn next() -> Self {
        ProxyId(NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Type-erased handle to a proxy's target.
///
/// Holds the `Arc<T>` the proxy was created with; downcast with the same `T`
/// (`Arc<dyn Calc + Send + Sync>` or `Arc<MyCalc>`).
#[derive(Clone)]
pub struct TargetRef(Arc<dyn Any + Send + Sync>);

impl TargetRef {
    /// Erase a target reference
    pub fn new<T: ?Sized + Send + Sync + 'static>(target: Arc<T>) -> Self {
        TargetRef(Arc::new(target))
    }

    /// Recover the target as `Arc<T>`
    pub fn downcast<T: ?Sized + 'static>(&self) -> Option<&Arc<T>> {
        self.0.downcast_ref::<Arc<T>>()
    }

    /// Check if the target was created as `Arc<T>`
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.0.is::<Arc<T>>()
    }
}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TargetRef(..)")
    }
}

// ============================================================================
// Arguments
// ============================================================================

struct Slot {
    value: AnyValue,
    mode: ParamMode,
    type_name: &'static str,
}

/// Ordered, mutable argument list of one call
#[derive(Default)]
pub struct Arguments {
    slots: Vec<Slot>,
}

impl Arguments {
    /// Empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty argument list with room for `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Append an argument
    pub fn push<T: Send + 'static>(&mut self, value: T, mode: ParamMode) {
        self.slots.push(Slot {
            value: Box::new(value),
            mode,
            type_name: type_name::<T>(),
        });
    }

    /// Append a by-value argument
    pub fn with<T: Send + 'static>(mut self, value: T) -> Self {
        self.push(value, ParamMode::Value);
        self
    }

    /// Append a mutable-reference argument
    pub fn with_mut<T: Send + 'static>(mut self, value: T) -> Self {
        self.push(value, ParamMode::Mut);
        self
    }

    /// Append a shared-reference argument (owned copy)
    pub fn with_shared<T: Send + 'static>(mut self, value: T) -> Self {
        self.push(value, ParamMode::Shared);
        self
    }

    fn slot(&self, index: usize) -> Result<&Slot, ProxyError> {
        self.slots.get(index).ok_or(ProxyError::ArgumentOutOfRange {
            index,
            len: self.slots.len(),
        })
    }

    /// Borrow an argument
    pub fn get_ref<T: 'static>(&self, index: usize) -> Result<&T, ProxyError> {
        let slot = self.slot(index)?;
        slot.value
            .downcast_ref::<T>()
            .ok_or(ProxyError::ArgumentTypeMismatch {
                index,
                expected: type_name::<T>(),
                got: slot.type_name,
            })
    }

    /// Clone an argument out
    pub fn get<T: Clone + 'static>(&self, index: usize) -> Result<T, ProxyError> {
        self.get_ref::<T>(index).cloned()
    }

    /// Borrow an argument mutably
    pub fn get_mut<T: 'static>(&mut self, index: usize) -> Result<&mut T, ProxyError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(ProxyError::ArgumentOutOfRange { index, len })?;
        let got = slot.type_name;
        slot.value
            .downcast_mut::<T>()
            .ok_or(ProxyError::ArgumentTypeMismatch {
                index,
                expected: type_name::<T>(),
                got,
            })
    }

    /// Replace an argument; the new value must have the slot's type
    pub fn set<T: Send + 'static>(&mut self, index: usize, value: T) -> Result<(), ProxyError> {
        *self.get_mut::<T>(index)? = value;
        Ok(())
    }

    /// Passing mode of a slot
    pub fn mode(&self, index: usize) -> Option<ParamMode> {
        self.slots.get(index).map(|s| s.mode)
    }

    /// Rust type name stored in a slot
    pub fn type_name(&self, index: usize) -> Option<&'static str> {
        self.slots.get(index).map(|s| s.type_name)
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if there are no arguments
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wrap for sharing with a proceed path
    pub fn into_shared(self) -> SharedArguments {
        Arc::new(Mutex::new(self))
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| (s.mode, s.type_name)))
            .finish()
    }
}

// ============================================================================
// Invocation
// ============================================================================

/// One intercepted call
pub struct Invocation {
    proxy: ProxyId,
    member: Arc<MemberInfo>,
    target: Option<TargetRef>,
    arguments: SharedArguments,
    flags: InvocationFlags,
    proceed: ProceedFn,
}

impl Invocation {
    pub(crate) fn new(
        proxy: ProxyId,
        member: Arc<MemberInfo>,
        target: Option<TargetRef>,
        arguments: SharedArguments,
        proceed: ProceedFn,
    ) -> Self {
        let flags = member.flags();
        Self {
            proxy,
            member,
            target,
            arguments,
            flags,
            proceed,
        }
    }

    /// The proxy instance that was called
    pub fn proxy(&self) -> ProxyId {
        self.proxy
    }

    /// The member being invoked
    pub fn member(&self) -> &Arc<MemberInfo> {
        &self.member
    }

    /// The property, when the member is an accessor
    pub fn property(&self) -> Option<&PropertyInfo> {
        self.member.property.as_ref()
    }

    /// The proxy's target, if it has one
    pub fn target(&self) -> Option<&TargetRef> {
        self.target.as_ref()
    }

    /// Shape flags
    pub fn flags(&self) -> InvocationFlags {
        self.flags
    }

    /// Lock the argument list.
    ///
    /// The guard must be dropped before calling [`proceed`](Self::proceed):
    /// synchronous paths run inside that call and lock the same list.
    /// Holding it across an await point blocks other readers too.
    pub fn arguments(&self) -> MutexGuard<'_, Arguments> {
        self.arguments.lock()
    }

    /// Clone an argument out
    pub fn arg<T: Clone + 'static>(&self, index: usize) -> Result<T, ProxyError> {
        self.arguments.lock().get(index)
    }

    /// Rewrite an argument before proceeding
    pub fn set_arg<T: Send + 'static>(&self, index: usize, value: T) -> Result<(), ProxyError> {
        self.arguments.lock().set(index, value)
    }

    /// Run the original behavior with the current arguments.
    ///
    /// Every call re-runs the path; results are not cached.
    pub fn proceed(&self) -> ProceedFuture {
        (self.proceed)(Arc::clone(&self.arguments))
    }

    /// Proceed and coerce the result to the member's return type
    pub async fn proceed_as<T: Default + 'static>(&self) -> Result<T, ProxyError> {
        let result = self.proceed().await?;
        coerce::<T>(&self.member, result)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("proxy", &self.proxy)
            .field("member", &self.member.name)
            .field("flags", &self.flags)
            .field("has_target", &self.target.is_some())
            .finish()
    }
}
