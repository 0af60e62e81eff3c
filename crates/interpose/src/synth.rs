//! Proxy type synthesis
//!
//! A [`ProxyType`] is the immutable descriptor every proxy instance of one
//! source type shares: the member table plus one [`DispatchEntry`] per member,
//! in declaration order. It is produced by one of two strategies:
//!
//! - [`Eager`]: the `#[proxy]` macro computed the plan while expanding; the
//!   runtime only binds it to the member table.
//! - [`Lazy`]: the plan is derived from [`SourceType`] metadata on first use.
//!
//! Both go through [`ProxyTypeCache`], so each (source, strategy) pair is
//! synthesized at most once per process.

use std::any::TypeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::{Lazy as LazyStatic, OnceCell};

use crate::defaults::{resolve_fallback, Fallback};
use crate::error::{SynthesisError, SynthesisResult};
use crate::invocation::InvocationFlags;
use crate::member::{MemberInfo, MemberSignature, MemberTable, TypeRef};
use crate::source::{MemberDecl, ProxySource, SourceKind, SourceType};

/// Which strategy produced a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Planned at build time by the `#[proxy]` macro
    Eager,
    /// Planned at first use from metadata
    Lazy,
}

/// One member's dispatch decisions, as computed by the macro
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPlan {
    /// Structural signature to resolve
    pub signature: MemberSignature,
    /// Path taken without a target
    pub fallback: Fallback,
    /// Shape flags
    pub flags: InvocationFlags,
    /// Whether calls reach the handler at all
    pub intercepted: bool,
}

/// Resolved dispatch decisions for one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEntry {
    /// Member identity and metadata
    pub member: Arc<MemberInfo>,
    /// Shape flags
    pub flags: InvocationFlags,
    /// Path taken without a target
    pub fallback: Fallback,
    /// Whether calls reach the handler at all
    pub intercepted: bool,
}

/// Synthesized proxy type descriptor
#[derive(Debug)]
pub struct ProxyType {
    source: String,
    kind: SourceKind,
    strategy: StrategyKind,
    table: MemberTable,
    entries: Vec<DispatchEntry>,
}

impl ProxyType {
    /// Bind a build-time plan to the source's member table
    pub fn prebuilt(source: &SourceType, plan: &[EntryPlan]) -> SynthesisResult<Self> {
        let (table, _) = member_table(source)?;
        if plan.len() != table.len() {
            return Err(SynthesisError::PlanMismatch {
                source_type: source.name.clone(),
                planned: plan.len(),
                declared: table.len(),
            });
        }

        let mut entries = Vec::with_capacity(plan.len());
        for step in plan {
            let member = table.resolve(&step.signature)?;
            entries.push(DispatchEntry {
                member: Arc::clone(member),
                flags: step.flags,
                fallback: step.fallback,
                intercepted: step.intercepted,
            });
        }

        Ok(Self {
            source: source.name.clone(),
            kind: source.kind,
            strategy: StrategyKind::Eager,
            table,
            entries,
        })
    }

    /// Source type name
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Interface or class
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Strategy that produced this descriptor
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Member lookup table
    pub fn table(&self) -> &MemberTable {
        &self.table
    }

    /// All entries in declaration order
    pub fn entries(&self) -> &[DispatchEntry] {
        &self.entries
    }

    /// Entry at a declaration index
    pub fn entry(&self, index: usize) -> Option<&DispatchEntry> {
        self.entries.get(index)
    }

    /// Entry for a structural signature
    pub fn entry_for(&self, signature: &MemberSignature) -> Option<(usize, &DispatchEntry)> {
        let index = self.table.index_of(signature)?;
        Some((index, &self.entries[index]))
    }

    /// Entry for the first member with this name
    pub fn entry_named(&self, name: &str) -> Option<(usize, &DispatchEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.member.name == name)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether two descriptors dispatch identically, whatever produced them
    pub fn same_behavior(&self, other: &ProxyType) -> bool {
        self.source == other.source && self.kind == other.kind && self.entries == other.entries
    }
}

/// Synthesize a descriptor from metadata (the lazy strategy).
///
/// Inherited members resolve their fallback against the type declaring them.
pub fn synthesize(source: &SourceType) -> SynthesisResult<ProxyType> {
    let (table, kinds) = member_table(source)?;
    let entries = table
        .iter()
        .zip(kinds)
        .map(|(member, kind)| plan_entry(kind, member))
        .collect();

    tracing::debug!(
        source = %source.name,
        members = table.len(),
        "synthesized proxy type"
    );

    Ok(ProxyType {
        source: source.name.clone(),
        kind: source.kind,
        strategy: StrategyKind::Lazy,
        table,
        entries,
    })
}

fn plan_entry(kind: SourceKind, member: &Arc<MemberInfo>) -> DispatchEntry {
    DispatchEntry {
        member: Arc::clone(member),
        flags: member.flags(),
        fallback: resolve_fallback(kind, member),
        intercepted: member.is_instance_member() && !member.modifiers.is_sealed,
    }
}

/// Member table plus the kind of each member's declaring type
fn member_table(source: &SourceType) -> SynthesisResult<(MemberTable, Vec<SourceKind>)> {
    validate_source(source)?;
    let mut members = Vec::new();
    let mut kinds = Vec::new();
    for (owner, decl) in source.all_members() {
        validate_member(source, decl)?;
        members.push(decl.into_info(&owner.name));
        kinds.push(owner.kind);
    }
    Ok((MemberTable::build(&source.name, members)?, kinds))
}

fn validate_source(source: &SourceType) -> SynthesisResult<()> {
    if !source.accessible {
        return Err(SynthesisError::Inaccessible(source.name.clone()));
    }
    if source.kind == SourceKind::Class {
        if source.sealed {
            return Err(SynthesisError::SealedSource(source.name.clone()));
        }
        if !source.default_constructible {
            return Err(SynthesisError::MissingDefaultConstructor(source.name.clone()));
        }
    }
    Ok(())
}

fn validate_member(source: &SourceType, decl: &MemberDecl) -> SynthesisResult<()> {
    let unsupported = |reason: String| SynthesisError::UnsupportedSignature {
        source_type: source.name.clone(),
        member: decl.name.clone(),
        reason,
    };

    match &decl.returns {
        TypeRef::Borrowed(ty) => {
            return Err(unsupported(format!("borrowed return type {}", ty)));
        }
        TypeRef::Opaque(ty) => {
            return Err(unsupported(format!("opaque return type {}", ty)));
        }
        TypeRef::Unit | TypeRef::Named(_) => {}
    }

    for param in &decl.params {
        match &param.ty {
            TypeRef::Opaque(ty) | TypeRef::Borrowed(ty) => {
                return Err(unsupported(format!(
                    "parameter {} has unrepresentable type {}",
                    param.name, ty
                )));
            }
            TypeRef::Unit | TypeRef::Named(_) => {}
        }
    }

    Ok(())
}

// ============================================================================
// Strategies
// ============================================================================

/// How a proxy type obtains its descriptor
pub trait Strategy: Send + Sync + 'static {
    /// Strategy tag, part of the cache key
    const KIND: StrategyKind;

    /// Produce a fresh descriptor for `S`
    fn synthesize<S: ProxySource>() -> SynthesisResult<ProxyType>;

    /// Cached descriptor for `S`, synthesizing it on first use
    fn proxy_type<S: ProxySource>() -> SynthesisResult<Arc<ProxyType>>
    where
        Self: Sized,
    {
        ProxyTypeCache::global().get_or_synthesize::<S, Self>()
    }
}

/// Build-time strategy: binds the macro's plan
#[derive(Debug, Clone, Copy, Default)]
pub struct Eager;

impl Strategy for Eager {
    const KIND: StrategyKind = StrategyKind::Eager;

    fn synthesize<S: ProxySource>() -> SynthesisResult<ProxyType> {
        ProxyType::prebuilt(&S::source_type(), &S::eager_plan())
    }
}

/// First-use strategy: plans from metadata at runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct Lazy;

impl Strategy for Lazy {
    const KIND: StrategyKind = StrategyKind::Lazy;

    fn synthesize<S: ProxySource>() -> SynthesisResult<ProxyType> {
        synthesize(&S::source_type())
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Typed(TypeId, StrategyKind),
    Described(String, u64),
}

static GLOBAL_CACHE: LazyStatic<ProxyTypeCache> = LazyStatic::new(ProxyTypeCache::new);

/// Process-wide memo of synthesized descriptors.
///
/// Each key owns a `OnceCell`; concurrent first users of a key block on the
/// same cell, so synthesis runs once. A failed synthesis leaves the cell
/// empty.
#[derive(Debug, Default)]
pub struct ProxyTypeCache {
    slots: DashMap<CacheKey, Arc<OnceCell<Arc<ProxyType>>>>,
    syntheses: AtomicUsize,
}

impl ProxyTypeCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache
    pub fn global() -> &'static ProxyTypeCache {
        &GLOBAL_CACHE
    }

    /// Descriptor for source `S` under strategy `St`
    pub fn get_or_synthesize<S: ProxySource, St: Strategy>(
        &self,
    ) -> SynthesisResult<Arc<ProxyType>> {
        let key = CacheKey::Typed(TypeId::of::<S>(), St::KIND);
        self.get_or_try_init(key, St::synthesize::<S>)
    }

    /// Descriptor for a runtime-described source.
    ///
    /// Keyed by name and structural fingerprint: two descriptions sharing a
    /// name but differing in kind, flags or members get separate descriptors.
    pub fn get_or_synthesize_dynamic(
        &self,
        source: &SourceType,
    ) -> SynthesisResult<Arc<ProxyType>> {
        let key = CacheKey::Described(source.name.clone(), source.fingerprint());
        self.get_or_try_init(key, || synthesize(source))
    }

    fn get_or_try_init<F>(&self, key: CacheKey, init: F) -> SynthesisResult<Arc<ProxyType>>
    where
        F: FnOnce() -> SynthesisResult<ProxyType>,
    {
        // Clone the slot out so the shard lock is released before synthesis.
        let slot = Arc::clone(
            self.slots
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );

        if let Some(ty) = slot.get() {
            return Ok(Arc::clone(ty));
        }

        slot.get_or_try_init(|| {
            self.syntheses.fetch_add(1, Ordering::SeqCst);
            init().map(Arc::new)
        })
        .cloned()
    }

    /// Number of synthesis runs performed (including failed ones)
    pub fn syntheses(&self) -> usize {
        self.syntheses.load(Ordering::SeqCst)
    }

    /// Number of populated descriptors
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value().get().is_some()).count()
    }

    /// Check if no descriptor is populated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
