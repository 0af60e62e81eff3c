//! Interpose - runtime interception for Rust traits
//!
//! A proxy stands in for a trait object and routes every call through an
//! [`InvocationHandler`]. The handler sees the member, its arguments and a
//! `proceed()` capability that runs the original behavior: the target's
//! implementation, the trait's provided body, or a default value.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use interpose::{proxy, value, Eager, InvocationHandler};
//!
//! #[proxy]
//! pub trait Calculator {
//!     fn sum(&self, a: i32, b: i32) -> i32 {
//!         a + b
//!     }
//! }
//!
//! let handler = InvocationHandler::new(|inv| async move {
//!     let sum: i32 = inv.proceed_as().await?;
//!     Ok(value(sum + 3))
//! });
//! let calc: Arc<CalculatorProxy> = CalculatorProxy::new(handler)?;
//! assert_eq!(calc.sum(1, 2), 6);
//! ```
//!
//! `#[proxy]` generates `CalculatorProxy<T, S>`, where `S` picks the synthesis
//! strategy: [`Eager`] binds the dispatch plan computed during macro expansion,
//! [`Lazy`] derives it from metadata on first use. Both yield the same
//! [`ProxyType`], cached once per process.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate self as interpose;

pub mod config;
pub mod defaults;
pub mod dispatch;
pub mod dynamic;
pub mod error;
pub mod handler;
pub mod invocation;
pub mod member;
pub mod source;
pub mod synth;

pub use config::ProxyConfig;
pub use defaults::{coerce, Fallback};
pub use dispatch::ProxyCore;
pub use dynamic::{DynamicProxy, DynamicTarget};
pub use error::{AsyncFault, ProxyError, SynthesisError, SynthesisResult};
pub use handler::{AsyncPolicy, HandlerBuilder, InvocationHandler, Interceptor};
pub use invocation::{
    value, AnyValue, Arguments, Invocation, InvocationFlags, InvocationResult, ProceedFuture,
    ProxyId, TargetRef,
};
pub use member::{
    Accessor, CallShape, MemberId, MemberInfo, MemberSignature, MemberTable, Modifiers,
    ParamInfo, ParamMode, PropertyInfo, TypeRef,
};
pub use source::{BaseImpl, DefaultValue, MemberDecl, ProxySource, SourceKind, SourceType};
pub use synth::{
    synthesize, DispatchEntry, Eager, EntryPlan, Lazy, ProxyType, ProxyTypeCache, Strategy,
    StrategyKind,
};

pub use async_trait::async_trait;
pub use interpose_macros::proxy;

/// Items referenced by `#[proxy]` expansions. Not public API.
#[doc(hidden)]
pub mod __private {
    pub use std::borrow::{Borrow, ToOwned};
    pub use std::boxed::Box;
    pub use std::default::Default;
    pub use std::marker::PhantomData;
    pub use std::option::Option::{self, None, Some};
    pub use std::result::Result::{self, Err, Ok};
    pub use std::string::String;
    pub use std::sync::{Arc, Weak};
    pub use std::vec::Vec;

    pub use crate::defaults::{completed, Fallback};
    pub use crate::dispatch::{check_plan, read_back, settle, ProxyCore};
    pub use crate::error::{ProxyError, SynthesisError};
    pub use crate::handler::InvocationHandler;
    pub use crate::invocation::{
        value, Arguments, InvocationFlags, InvocationResult, ProceedFn, ProceedFuture, ProxyId,
        SharedArguments,
    };
    pub use crate::member::{Accessor, MemberSignature, ParamMode, TypeRef};
    pub use crate::source::{MemberDecl, ProxySource, SourceType};
    pub use crate::synth::{EntryPlan, ProxyType, Strategy};
}
