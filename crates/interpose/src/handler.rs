//! Invocation handlers
//!
//! A handler is always asynchronous, while the member it wraps may not be.
//! When a synchronous member needs its result immediately, the handler's
//! future is collapsed according to the [`AsyncPolicy`]:
//!
//! - `Throw` (default): poll once; a pending future is an `InvalidAsync` error
//! - `Wait`: block the calling thread until the future completes

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;

use crate::config::ProxyConfig;
use crate::error::{AsyncFault, ProxyError};
use crate::invocation::{Invocation, InvocationResult, ProceedFuture, TargetRef};
use crate::member::MemberInfo;

/// How a synchronous call boundary collapses a handler's future
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncPolicy {
    /// Fail with `InvalidAsync` if the future is not already complete
    #[default]
    Throw,
    /// Block the calling thread until the future completes
    Wait,
}

impl FromStr for AsyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "throw" => Ok(AsyncPolicy::Throw),
            "wait" => Ok(AsyncPolicy::Wait),
            other => Err(format!("Unknown async policy: {}", other)),
        }
    }
}

impl fmt::Display for AsyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncPolicy::Throw => write!(f, "throw"),
            AsyncPolicy::Wait => write!(f, "wait"),
        }
    }
}

/// Struct-based handler, for interceptors that carry state
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Handle one invocation
    async fn intercept(&self, invocation: Invocation) -> InvocationResult;

    /// Whether calls to `member` should be intercepted at all
    fn is_active(&self, _target: Option<&TargetRef>, _member: &MemberInfo) -> bool {
        true
    }
}

type InterceptFn = dyn Fn(Invocation) -> ProceedFuture + Send + Sync;
type ActivationFn = dyn Fn(Option<&TargetRef>, &MemberInfo) -> bool + Send + Sync;

/// Shared interception function plus its activation predicate and policy.
///
/// Cloning is cheap; one handler may serve any number of proxies.
#[derive(Clone)]
pub struct InvocationHandler {
    intercept: Arc<InterceptFn>,
    activation: Option<Arc<ActivationFn>>,
    policy: AsyncPolicy,
}

impl InvocationHandler {
    /// Handler from an async closure, using the configured default policy
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = InvocationResult> + Send + 'static,
    {
        Self::builder(f).build()
    }

    /// Start building a handler
    pub fn builder<F, Fut>(f: F) -> HandlerBuilder
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = InvocationResult> + Send + 'static,
    {
        HandlerBuilder {
            intercept: Arc::new(move |invocation| f(invocation).boxed()),
            activation: None,
            policy: ProxyConfig::global().async_policy,
        }
    }

    /// Handler that always proceeds and returns the result unchanged
    pub fn passthrough() -> Self {
        Self::new(|invocation| async move { invocation.proceed().await })
    }

    /// Handler backed by an [`Interceptor`]
    pub fn from_interceptor<I: Interceptor>(interceptor: Arc<I>) -> HandlerBuilder {
        let predicate = Arc::clone(&interceptor);
        HandlerBuilder {
            intercept: Arc::new(move |invocation| {
                let interceptor = Arc::clone(&interceptor);
                async move { interceptor.intercept(invocation).await }.boxed()
            }),
            activation: Some(Arc::new(
                move |target: Option<&TargetRef>, member: &MemberInfo| {
                    predicate.is_active(target, member)
                },
            )),
            policy: ProxyConfig::global().async_policy,
        }
    }

    /// Copy of this handler with another policy
    pub fn with_policy(&self, policy: AsyncPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    /// Run the interception function
    pub fn handle(&self, invocation: Invocation) -> ProceedFuture {
        (self.intercept)(invocation)
    }

    /// Evaluate the activation predicate
    pub fn is_active(&self, target: Option<&TargetRef>, member: &MemberInfo) -> bool {
        match &self.activation {
            Some(predicate) => predicate(target, member),
            None => true,
        }
    }

    /// Sync/async bridging policy
    pub fn policy(&self) -> AsyncPolicy {
        self.policy
    }

    /// Collapse a future into an immediate result per the policy
    pub fn resolve_sync(&self, member: &MemberInfo, future: ProceedFuture) -> InvocationResult {
        match self.policy {
            AsyncPolicy::Throw => match future.now_or_never() {
                Some(result) => result,
                None => {
                    tracing::warn!(
                        member = %member.name,
                        "handler suspended inside a synchronous member"
                    );
                    Err(ProxyError::invalid_async(
                        member.name.clone(),
                        AsyncFault::Pending,
                    ))
                }
            },
            AsyncPolicy::Wait => futures::executor::block_on(future),
        }
    }
}

impl fmt::Debug for InvocationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationHandler")
            .field("policy", &self.policy)
            .field("has_activation", &self.activation.is_some())
            .finish()
    }
}

/// Builder for [`InvocationHandler`]
pub struct HandlerBuilder {
    intercept: Arc<InterceptFn>,
    activation: Option<Arc<ActivationFn>>,
    policy: AsyncPolicy,
}

impl HandlerBuilder {
    /// Set the activation predicate
    pub fn activation<P>(mut self, predicate: P) -> Self
    where
        P: Fn(Option<&TargetRef>, &MemberInfo) -> bool + Send + Sync + 'static,
    {
        self.activation = Some(Arc::new(predicate));
        self
    }

    /// Set the sync/async bridging policy
    pub fn policy(mut self, policy: AsyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Finish
    pub fn build(self) -> InvocationHandler {
        InvocationHandler {
            intercept: self.intercept,
            activation: self.activation,
            policy: self.policy,
        }
    }
}
