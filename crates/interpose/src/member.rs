//! Member identity and metadata
//!
//! Every intercepted method (or property accessor) gets a [`MemberId`]: a
//! 64-bit fingerprint of its declaring type, name, ordered parameter types and
//! modes, and generic arity. Identities are resolved once per proxy type into
//! a [`MemberTable`], so dispatch never re-derives them.
//!
//! ## Signatures
//!
//! | Rust parameter | [`ParamMode`] |
//! |----------------|---------------|
//! | `x: T`         | `Value`       |
//! | `x: &T`        | `Shared`      |
//! | `x: &mut T`    | `Mut`         |

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHasher};

use crate::error::{SynthesisError, SynthesisResult};
use crate::invocation::InvocationFlags;

/// Stable, comparable identity of a proxied member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(u64);

impl MemberId {
    /// Raw fingerprint bits
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// How a parameter is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamMode {
    /// Passed by value
    Value,
    /// Passed by shared reference; the proxy holds an owned copy
    Shared,
    /// Passed by mutable reference; written back after the call
    Mut,
}

impl ParamMode {
    fn prefix(&self) -> &'static str {
        match self {
            ParamMode::Value => "",
            ParamMode::Shared => "&",
            ParamMode::Mut => "&mut ",
        }
    }
}

/// Type reference as seen in a member signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// `()`, or no return type
    Unit,
    /// A named, owned type (including generic parameters)
    Named(String),
    /// A borrowed type, e.g. `&str` in return position
    Borrowed(String),
    /// An opaque type, e.g. `impl Iterator<Item = u8>`
    Opaque(String),
}

impl TypeRef {
    /// Create a named type, normalizing token spacing
    pub fn named(name: &str) -> Self {
        TypeRef::Named(normalize_type_name(name))
    }

    /// Type name as written in signatures
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Unit => "()",
            TypeRef::Named(name) | TypeRef::Borrowed(name) | TypeRef::Opaque(name) => name,
        }
    }

    /// Check if this is the unit type
    pub fn is_unit(&self) -> bool {
        matches!(self, TypeRef::Unit)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Collapse token spacing produced by `stringify!`/`quote!`, keeping a space
/// only between two identifier characters (`dyn Fn`, `mut T`).
pub fn normalize_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;
    for c in name.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            let prev_ident = out.chars().last().is_some_and(is_ident_char);
            if prev_ident && is_ident_char(c) {
                out.push(' ');
            }
            pending_space = false;
        }
        out.push(c);
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Parameter metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamInfo {
    /// Parameter name
    pub name: String,
    /// Referent type (`T` for `&mut T`)
    pub ty: TypeRef,
    /// Passing mode
    pub mode: ParamMode,
}

/// Return shape of a member, picked from its return type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// Synchronous, returns nothing
    SyncVoid,
    /// Synchronous, returns a value
    SyncValue,
    /// Asynchronous, resolves to nothing
    AsyncVoid,
    /// Asynchronous, resolves to a value
    AsyncValue,
}

impl CallShape {
    /// Classify a member by return type and asyncness
    pub fn classify(returns: &TypeRef, is_async: bool) -> Self {
        match (is_async, returns.is_unit()) {
            (false, true) => CallShape::SyncVoid,
            (false, false) => CallShape::SyncValue,
            (true, true) => CallShape::AsyncVoid,
            (true, false) => CallShape::AsyncValue,
        }
    }

    /// Flags exposed to handlers
    pub fn flags(&self) -> InvocationFlags {
        match self {
            CallShape::SyncVoid => InvocationFlags::VOID,
            CallShape::SyncValue => InvocationFlags::NONE,
            CallShape::AsyncVoid => InvocationFlags::VOID | InvocationFlags::ASYNC,
            CallShape::AsyncValue => InvocationFlags::ASYNC,
        }
    }

    /// Check if the member is asynchronous
    pub fn is_async(&self) -> bool {
        matches!(self, CallShape::AsyncVoid | CallShape::AsyncValue)
    }
}

/// Member modifiers relevant to synthesis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    /// No body to proceed to (required trait method)
    pub is_abstract: bool,
    /// No receiver
    pub is_static: bool,
    /// Destructor-like member
    pub is_finalizer: bool,
    /// Cannot be overridden; never intercepted
    pub is_sealed: bool,
}

/// Property accessor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    /// Reads the property
    Get,
    /// Writes the property
    Set,
}

/// Property a member is an accessor of
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyInfo {
    /// Property name
    pub name: String,
    /// Accessor kind
    pub accessor: Accessor,
}

/// Immutable metadata for one member of a source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Identity token
    pub id: MemberId,
    /// Member name
    pub name: String,
    /// Type that declares the member
    pub declaring_type: String,
    /// Parameters in order (receiver excluded)
    pub params: Vec<ParamInfo>,
    /// Generic parameter names
    pub generic_params: Vec<String>,
    /// Return type (the resolved type for async members)
    pub returns: TypeRef,
    /// Whether a missing result may be coerced to a default (`Option<_>`)
    pub nullable: bool,
    /// Call shape
    pub shape: CallShape,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Property, if this member is an accessor
    pub property: Option<PropertyInfo>,
}

impl MemberInfo {
    /// Structural signature of this member
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

    /// Flags exposed to handlers
    pub fn flags(&self) -> InvocationFlags {
        self.shape.flags()
    }

    /// Check if the member is asynchronous
    pub fn is_async(&self) -> bool {
        self.shape.is_async()
    }

    /// Check if the member returns nothing
    pub fn is_void(&self) -> bool {
        self.returns.is_unit()
    }

    /// Static and finalizer members are never dispatched on an instance
    pub fn is_instance_member(&self) -> bool {
        !self.modifiers.is_static && !self.modifiers.is_finalizer
    }
}

/// Structural signature used to look up a member
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberSignature {
    /// Member name
    pub name: String,
    /// Ordered parameter type identities and modes
    pub params: Vec<(String, ParamMode)>,
    /// Number of generic parameters
    pub generic_arity: usize,
}

impl MemberSignature {
    /// Signature with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            generic_arity: 0,
        }
    }

    /// Append a parameter
    pub fn param(mut self, ty: &str, mode: ParamMode) -> Self {
        self.params.push((normalize_type_name(ty), mode));
        self
    }

    /// Set the generic arity
    pub fn generics(mut self, arity: usize) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Fingerprint this signature as declared by `declaring_type`
    pub fn fingerprint(&self, declaring_type: &str) -> MemberId {
        let mut hasher = FxHasher::default();
        declaring_type.hash(&mut hasher);
        self.hash(&mut hasher);
        MemberId(hasher.finish())
    }
}

impl fmt::Display for MemberSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.generic_arity > 0 {
            write!(f, "<{}>", self.generic_arity)?;
        }
        write!(f, "(")?;
        for (i, (ty, mode)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}{}", mode.prefix(), ty)?;
        }
        write!(f, ")")
    }
}

/// Memoized member lookup table for one proxy type
#[derive(Debug, Clone, Default)]
pub struct MemberTable {
    source: String,
    members: Vec<Arc<MemberInfo>>,
    by_signature: FxHashMap<MemberSignature, usize>,
    by_id: FxHashMap<MemberId, usize>,
}

impl MemberTable {
    /// Build a table, rejecting duplicate signatures
    pub fn build(source: &str, members: Vec<MemberInfo>) -> SynthesisResult<Self> {
        let mut table = MemberTable {
            source: source.to_string(),
            members: Vec::with_capacity(members.len()),
            by_signature: FxHashMap::default(),
            by_id: FxHashMap::default(),
        };

        for member in members {
            let signature = member.signature();
            let index = table.members.len();
            if table.by_signature.insert(signature.clone(), index).is_some() {
                return Err(SynthesisError::AmbiguousMember(format!(
                    "{}::{}",
                    source, signature
                )));
            }
            table.by_id.insert(member.id, index);
            table.members.push(Arc::new(member));
        }

        Ok(table)
    }

    /// Resolve a structural signature to its member
    pub fn resolve(&self, signature: &MemberSignature) -> SynthesisResult<&Arc<MemberInfo>> {
        self.index_of(signature)
            .map(|index| &self.members[index])
            .ok_or_else(|| SynthesisError::UnresolvedMember {
                source_type: self.source.clone(),
                signature: signature.to_string(),
            })
    }

    /// Position of a signature in declaration order
    pub fn index_of(&self, signature: &MemberSignature) -> Option<usize> {
        self.by_signature.get(signature).copied()
    }

    /// Look up by identity
    pub fn by_id(&self, id: MemberId) -> Option<&Arc<MemberInfo>> {
        self.by_id.get(&id).map(|&index| &self.members[index])
    }

    /// First member declared with this name
    pub fn by_name(&self, name: &str) -> Option<&Arc<MemberInfo>> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Member at a declaration index
    pub fn get(&self, index: usize) -> Option<&Arc<MemberInfo>> {
        self.members.get(index)
    }

    /// All members in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<MemberInfo>> {
        self.members.iter()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Source type name
    pub fn source(&self) -> &str {
        &self.source
    }
}
