//! Source type metadata
//!
//! A [`SourceType`] is the reflective description the lazy synthesizer works
//! from. The `#[proxy]` macro emits one per trait through [`ProxySource`];
//! dynamic proxies are described by hand with the builder methods:
//!
//! ```rust,ignore
//! let source = SourceType::class("Calculator")
//!     .member(
//!         MemberDecl::method("sum")
//!             .param("a", "i32", ParamMode::Value)
//!             .param("b", "i32", ParamMode::Value)
//!             .returns("i32")
//!             .base(BaseImpl::sync(|args| {
//!                 let a: i32 = args.get(0)?;
//!                 let b: i32 = args.get(1)?;
//!                 Ok(Some(Box::new(a + b)))
//!             })),
//!     );
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::BoxFuture;
use rustc_hash::FxHasher;

use crate::invocation::{AnyValue, Arguments, InvocationResult};
use crate::member::{
    normalize_type_name, Accessor, CallShape, MemberInfo, MemberSignature, Modifiers, ParamInfo,
    ParamMode, PropertyInfo, TypeRef,
};
use crate::synth::EntryPlan;

/// Whether the source behaves like an interface or a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Only required members; proceeds without a target yield defaults
    Interface,
    /// Has provided bodies; proceeds without a target call them
    Class,
}

/// Synchronous base implementation
pub type SyncBaseFn = Arc<dyn Fn(&mut Arguments) -> InvocationResult + Send + Sync>;

/// Asynchronous base implementation; hands the arguments back for write-back
pub type AsyncBaseFn =
    Arc<dyn Fn(Arguments) -> BoxFuture<'static, (Arguments, InvocationResult)> + Send + Sync>;

/// Original implementation of a concrete member, captured before wrapping
#[derive(Clone)]
pub enum BaseImpl {
    /// Runs to completion on the calling thread
    Sync(SyncBaseFn),
    /// Runs as a future
    Async(AsyncBaseFn),
}

impl BaseImpl {
    /// Wrap a synchronous body
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut Arguments) -> InvocationResult + Send + Sync + 'static,
    {
        BaseImpl::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous body
    pub fn future<F>(f: F) -> Self
    where
        F: Fn(Arguments) -> BoxFuture<'static, (Arguments, InvocationResult)>
            + Send
            + Sync
            + 'static,
    {
        BaseImpl::Async(Arc::new(f))
    }
}

impl fmt::Debug for BaseImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseImpl::Sync(_) => write!(f, "BaseImpl::Sync"),
            BaseImpl::Async(_) => write!(f, "BaseImpl::Async"),
        }
    }
}

/// Produces the value an abstract member of a dynamic source falls back to
#[derive(Clone)]
pub struct DefaultValue(Arc<dyn Fn() -> AnyValue + Send + Sync>);

impl DefaultValue {
    /// Wrap a factory
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> AnyValue + Send + Sync + 'static,
    {
        DefaultValue(Arc::new(f))
    }

    /// Produce a fresh value
    pub fn make(&self) -> AnyValue {
        (self.0)()
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DefaultValue(..)")
    }
}

/// Declaration of one member, before identities are assigned
#[derive(Debug, Clone)]
pub struct MemberDecl {
    /// Member name
    pub name: String,
    /// Parameters (receiver excluded)
    pub params: Vec<ParamInfo>,
    /// Generic parameter names
    pub generic_params: Vec<String>,
    /// Return type
    pub returns: TypeRef,
    /// Whether `None` results coerce to a default
    pub nullable: bool,
    /// Whether the member is asynchronous
    pub is_async: bool,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Property, for accessors
    pub property: Option<PropertyInfo>,
    /// Base implementation, for concrete members of dynamic sources
    pub base: Option<BaseImpl>,
    /// Default result, for abstract members of dynamic sources
    pub default: Option<DefaultValue>,
}

impl MemberDecl {
    /// Start declaring a method
    pub fn method(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            generic_params: Vec::new(),
            returns: TypeRef::Unit,
            nullable: false,
            is_async: false,
            modifiers: Modifiers::default(),
            property: None,
            base: None,
            default: None,
        }
    }

    /// Add a parameter by type name
    pub fn param(self, name: impl Into<String>, ty: &str, mode: ParamMode) -> Self {
        self.param_type(name, TypeRef::named(ty), mode)
    }

    /// Add a parameter with an explicit type reference
    pub fn param_type(mut self, name: impl Into<String>, ty: TypeRef, mode: ParamMode) -> Self {
        self.params.push(ParamInfo {
            name: name.into(),
            ty,
            mode,
        });
        self
    }

    /// Add a generic parameter
    pub fn generic(mut self, name: impl Into<String>) -> Self {
        self.generic_params.push(name.into());
        self
    }

    /// Set the return type by name; `Option<_>` returns are nullable
    pub fn returns(self, ty: &str) -> Self {
        let normalized = normalize_type_name(ty);
        if normalized == "()" || normalized.is_empty() {
            return self.returns_type(TypeRef::Unit);
        }
        self.returns_type(TypeRef::Named(normalized))
    }

    /// Set the return type explicitly
    pub fn returns_type(mut self, ty: TypeRef) -> Self {
        self.nullable = ty.name().starts_with("Option<");
        self.returns = ty;
        self
    }

    /// Mark the member asynchronous
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Mark the member abstract (no body)
    pub fn abstract_member(mut self) -> Self {
        self.modifiers.is_abstract = true;
        self
    }

    /// Mark the member static
    pub fn static_member(mut self) -> Self {
        self.modifiers.is_static = true;
        self
    }

    /// Mark the member as a finalizer
    pub fn finalizer(mut self) -> Self {
        self.modifiers.is_finalizer = true;
        self
    }

    /// Mark the member sealed (never intercepted)
    pub fn sealed(mut self) -> Self {
        self.modifiers.is_sealed = true;
        self
    }

    /// Mark the member as a property accessor
    pub fn property(mut self, name: impl Into<String>, accessor: Accessor) -> Self {
        self.property = Some(PropertyInfo {
            name: name.into(),
            accessor,
        });
        self
    }

    /// Attach the provided body
    pub fn base(mut self, base: BaseImpl) -> Self {
        self.base = Some(base);
        self
    }

    /// Fall back to `T::default()` when there is no target
    pub fn defaults_to<T: Default + Send + 'static>(self) -> Self {
        self.default_with(|| Box::new(T::default()) as AnyValue)
    }

    /// Fall back to a computed value when there is no target
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn() -> AnyValue + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::new(f));
        self
    }

    /// Structural signature
    pub fn signature(&self) -> MemberSignature {
        MemberSignature {
            name: self.name.clone(),
            params: self
                .params
                .iter()
                .map(|p| (p.ty.name().to_string(), p.mode))
                .collect(),
            generic_arity: self.generic_params.len(),
        }
    }

    fn hash_structure<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.params.hash(state);
        self.generic_params.hash(state);
        self.returns.hash(state);
        self.nullable.hash(state);
        self.is_async.hash(state);
        self.modifiers.hash(state);
        self.property.hash(state);
        self.base.is_some().hash(state);
        self.default.is_some().hash(state);
    }

    /// Freeze into metadata with an identity
    pub fn into_info(&self, declaring_type: &str) -> MemberInfo {
        MemberInfo {
            id: self.signature().fingerprint(declaring_type),
            name: self.name.clone(),
            declaring_type: declaring_type.to_string(),
            params: self.params.clone(),
            generic_params: self.generic_params.clone(),
            returns: self.returns.clone(),
            nullable: self.nullable,
            shape: CallShape::classify(&self.returns, self.is_async),
            modifiers: self.modifiers,
            property: self.property.clone(),
        }
    }
}

/// Reflective description of a type to proxy
#[derive(Debug, Clone)]
pub struct SourceType {
    /// Type name
    pub name: String,
    /// Interface or class
    pub kind: SourceKind,
    /// Whether the synthesizer may see the type
    pub accessible: bool,
    /// Sealed classes cannot be subclassed
    pub sealed: bool,
    /// Whether a parameterless constructor is reachable
    pub default_constructible: bool,
    /// Generic parameter names
    pub generic_params: Vec<String>,
    /// Members declared on this type
    pub members: Vec<MemberDecl>,
    /// Parent types whose members are inherited
    pub parents: Vec<SourceType>,
}

impl SourceType {
    fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            accessible: true,
            sealed: false,
            default_constructible: true,
            generic_params: Vec::new(),
            members: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// Describe an interface
    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, SourceKind::Interface)
    }

    /// Describe a class
    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name, SourceKind::Class)
    }

    /// Add a member
    pub fn member(mut self, member: MemberDecl) -> Self {
        self.members.push(member);
        self
    }

    /// Add a parent type
    pub fn parent(mut self, parent: SourceType) -> Self {
        self.parents.push(parent);
        self
    }

    /// Add a generic parameter
    pub fn generic(mut self, name: impl Into<String>) -> Self {
        self.generic_params.push(name.into());
        self
    }

    /// Mark the type sealed
    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    /// Mark the type inaccessible
    pub fn inaccessible(mut self) -> Self {
        self.accessible = false;
        self
    }

    /// Mark the type as lacking a parameterless constructor
    pub fn without_default_constructor(mut self) -> Self {
        self.default_constructible = false;
        self
    }

    /// Fingerprint of everything synthesis reads from this description.
    ///
    /// Base bodies and default factories count by presence only; they live on
    /// proxy instances, not on the shared descriptor.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash_structure(&mut hasher);
        hasher.finish()
    }

    fn hash_structure<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.kind.hash(state);
        self.accessible.hash(state);
        self.sealed.hash(state);
        self.default_constructible.hash(state);
        self.generic_params.hash(state);
        self.members.len().hash(state);
        for member in &self.members {
            member.hash_structure(state);
        }
        self.parents.len().hash(state);
        for parent in &self.parents {
            parent.hash_structure(state);
        }
    }

    /// All members with their declaring type, own members first, then
    /// ancestors depth-first. A parent reached twice is visited once.
    pub fn all_members(&self) -> Vec<(&SourceType, &MemberDecl)> {
        let mut out = Vec::new();
        let mut seen = Vec::new();
        self.collect_members(&mut out, &mut seen);
        out
    }

    fn collect_members<'a>(
        &'a self,
        out: &mut Vec<(&'a SourceType, &'a MemberDecl)>,
        seen: &mut Vec<&'a str>,
    ) {
        if seen.contains(&self.name.as_str()) {
            return;
        }
        seen.push(&self.name);
        for member in &self.members {
            out.push((self, member));
        }
        for parent in &self.parents {
            parent.collect_members(out, seen);
        }
    }
}

/// A type the `#[proxy]` macro generated metadata for.
///
/// `source_type` feeds the lazy strategy; `eager_plan` is the dispatch plan the
/// macro computed at build time. Both describe members in the same order:
/// the trait's own methods, then each parent trait's members.
pub trait ProxySource: 'static {
    /// Number of members, inherited ones included
    const MEMBERS: usize;

    /// Reflective description of the source trait
    fn source_type() -> SourceType;

    /// Dispatch plan computed during macro expansion
    fn eager_plan() -> Vec<EntryPlan>;
}
