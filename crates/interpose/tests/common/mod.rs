//! Shared source traits, targets and helpers for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use interpose::{async_trait, proxy, Invocation, InvocationHandler, InvocationResult, Strategy};

/// Install a test subscriber once; `RUST_LOG=interpose=trace` shows dispatch
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run a generic scenario once per strategy
macro_rules! both_strategies {
    ($($name:ident => $scenario:ident;)*) => {
        mod eager {
            use super::*;
            $(
                #[test]
                fn $name() {
                    $scenario::<interpose::Eager>();
                }
            )*
        }

        mod lazy {
            use super::*;
            $(
                #[test]
                fn $name() {
                    $scenario::<interpose::Lazy>();
                }
            )*
        }
    };
}

/// Async variant of [`both_strategies!`]
macro_rules! both_strategies_async {
    ($($name:ident => $scenario:ident;)*) => {
        mod eager {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    $scenario::<interpose::Eager>().await;
                }
            )*
        }

        mod lazy {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    $scenario::<interpose::Lazy>().await;
                }
            )*
        }
    };
}

// ============================================================================
// Calculator: class-like (has provided bodies)
// ============================================================================

#[proxy]
pub trait Calculator: Send + Sync {
    fn sum(&self, a: i32, b: i32) -> i32 {
        a + b
    }

    /// Sum through `self`, so the inner call is intercepted too
    fn triple(&self, a: i32) -> i32 {
        self.sum(self.sum(a, a), a)
    }

    fn describe(&self) -> String;

    #[proxy(skip)]
    fn version(&self) -> u32 {
        1
    }

    #[proxy(property)]
    fn precision(&self) -> u8;

    #[proxy(property)]
    fn set_precision(&self, value: u8);
}

pub type DynCalculator = dyn Calculator + Send + Sync;

/// Target that multiplies instead of adding
#[derive(Default)]
pub struct Multiplier {
    pub precision: parking_lot::Mutex<u8>,
}

impl Calculator for Multiplier {
    fn sum(&self, a: i32, b: i32) -> i32 {
        a * b
    }

    fn describe(&self) -> String {
        "multiplier".to_string()
    }

    fn version(&self) -> u32 {
        7
    }

    fn precision(&self) -> u8 {
        *self.precision.lock()
    }

    fn set_precision(&self, value: u8) {
        *self.precision.lock() = value;
    }
}

pub fn calculator<S: Strategy>(
    target: Option<Arc<DynCalculator>>,
    handler: InvocationHandler,
) -> Arc<CalculatorProxy<DynCalculator, S>> {
    let proxy = match target {
        Some(target) => CalculatorProxy::with_target(target, handler),
        None => CalculatorProxy::new(handler),
    };
    proxy.expect("calculator proxy")
}

// ============================================================================
// Crud<T>: generic interface
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub id: u32,
    pub name: String,
}

#[proxy]
pub trait Crud<T: Clone + Default + Send + Sync + 'static>: Send + Sync {
    fn get(&self, id: u32) -> T;
    fn save(&self, item: T) -> bool;
    fn count(&self) -> usize;
}

pub fn crud<S: Strategy>(handler: InvocationHandler) -> Arc<CrudProxy<Person, dyn Crud<Person> + Send + Sync, S>> {
    CrudProxy::new(handler).expect("crud proxy")
}

// ============================================================================
// Buffer: by-reference parameters
// ============================================================================

#[proxy]
pub trait Buffer: Send + Sync {
    fn append(&self, text: &mut String, suffix: &str);
    fn swap(&self, left: &mut u32, right: &mut u32) -> u32;
}

pub struct Appender;

impl Buffer for Appender {
    fn append(&self, text: &mut String, suffix: &str) {
        text.push_str(suffix);
    }

    fn swap(&self, left: &mut u32, right: &mut u32) -> u32 {
        std::mem::swap(left, right);
        *left + *right
    }
}

// ============================================================================
// Echo: generic method (not dyn-compatible)
// ============================================================================

#[proxy]
pub trait Echo: Send + Sync {
    fn echo<U: Clone + Default + Send + 'static>(&self, value: U) -> U;
    fn name() -> String;
}

pub struct Loud;

impl Echo for Loud {
    fn echo<U: Clone + Default + Send + 'static>(&self, value: U) -> U {
        value
    }

    fn name() -> String {
        "loud".to_string()
    }
}

// ============================================================================
// Messages: async interface
// ============================================================================

#[proxy]
#[async_trait]
pub trait Messages: Send + Sync {
    async fn message(&self) -> String;
    async fn record(&self, entry: String);
    async fn lookup(&self, key: &str) -> Option<String>;
    async fn fill(&self, slot: &mut Vec<u8>) -> usize;
}

pub type DynMessages = dyn Messages + Send + Sync;

#[derive(Default)]
pub struct Inbox {
    pub entries: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl Messages for Inbox {
    async fn message(&self) -> String {
        tokio::task::yield_now().await;
        "inbox".to_string()
    }

    async fn record(&self, entry: String) {
        self.entries.lock().push(entry);
    }

    async fn lookup(&self, key: &str) -> Option<String> {
        self.entries.lock().iter().find(|e| e.starts_with(key)).cloned()
    }

    async fn fill(&self, slot: &mut Vec<u8>) -> usize {
        slot.extend_from_slice(b"abc");
        slot.len()
    }
}

pub fn messages<S: Strategy>(
    target: Option<Arc<DynMessages>>,
    handler: InvocationHandler,
) -> Arc<MessagesProxy<DynMessages, S>> {
    let proxy = match target {
        Some(target) => MessagesProxy::with_target(target, handler),
        None => MessagesProxy::new(handler),
    };
    proxy.expect("messages proxy")
}

// ============================================================================
// Named and Host: parent trait and child
// ============================================================================

#[proxy]
pub trait Named: Send + Sync {
    fn name(&self) -> String;

    /// Calls `name` through `self`
    fn greeting(&self) -> String {
        format!("hello {}", self.name())
    }
}

#[proxy]
pub trait Host: Named + Send + Sync {
    fn welcome(&self, guest: &str) -> String;
}

pub type DynHost = dyn Host + Send + Sync;

pub struct Concierge;

impl Named for Concierge {
    fn name(&self) -> String {
        "concierge".to_string()
    }
}

impl Host for Concierge {
    fn welcome(&self, guest: &str) -> String {
        format!("welcome {}", guest)
    }
}

pub fn host<S: Strategy>(
    target: Option<Arc<DynHost>>,
    handler: InvocationHandler,
) -> Arc<HostProxy<DynHost, S>> {
    let proxy = match target {
        Some(target) => HostProxy::with_target(target, handler),
        None => HostProxy::new(handler),
    };
    proxy.expect("host proxy")
}

// ============================================================================
// Handlers
// ============================================================================

/// Pass-through handler that counts how often it runs
pub fn counting() -> (InvocationHandler, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let handler = InvocationHandler::new(move |inv: Invocation| {
        seen.fetch_add(1, Ordering::SeqCst);
        async move { inv.proceed().await }
    });
    (handler, calls)
}

/// Handler whose activation predicate is always off, counting any call
pub fn inactive() -> (InvocationHandler, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let handler = InvocationHandler::builder(move |inv: Invocation| {
        seen.fetch_add(1, Ordering::SeqCst);
        async move { inv.proceed().await }
    })
    .activation(|_, _| false)
    .build();
    (handler, calls)
}

/// Handler that replaces every result with `f(invocation)`
pub fn answering<F>(f: F) -> InvocationHandler
where
    F: Fn(&Invocation) -> InvocationResult + Send + Sync + 'static,
{
    let f = Arc::new(f);
    InvocationHandler::new(move |inv: Invocation| {
        let f = Arc::clone(&f);
        async move { f(&inv) }
    })
}
