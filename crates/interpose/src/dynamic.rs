//! Dynamic proxies over runtime-described source types
//!
//! A [`DynamicProxy`] is built from a [`SourceType`] assembled at runtime
//! instead of a trait, which suits remote stubs and scripted facades. Calls
//! are untyped: members are addressed by name or signature and arguments
//! travel in an [`Arguments`] list that is written back after the call, so
//! `Mut` slots behave like by-reference parameters.

use std::fmt;
use std::mem;
use std::sync::Arc;

use async_trait::async_trait;

use crate::defaults::{completed, require_value, Fallback};
use crate::dispatch::ProxyCore;
use crate::error::{ProxyError, SynthesisError, SynthesisResult};
use crate::handler::InvocationHandler;
use crate::invocation::{Arguments, InvocationResult, ProceedFn, ProxyId, SharedArguments};
use crate::member::{MemberInfo, MemberSignature};
use crate::source::{BaseImpl, DefaultValue, MemberDecl, SourceType};
use crate::synth::{DispatchEntry, ProxyType, ProxyTypeCache};

/// Target of a dynamic proxy.
///
/// The call's argument list is lent to the target (and to asynchronous
/// [`BaseImpl`] bodies) for as long as the proceed future is pending, and
/// written back when it completes. While it is out, the invocation's list is
/// empty: a handler reading `inv.arg(..)` or joining a second `proceed()`
/// meanwhile gets `ArgumentOutOfRange`. Read arguments before proceeding or
/// after the proceed future resolves.
#[async_trait]
pub trait DynamicTarget: Send + Sync + 'static {
    /// Execute `member` with the given arguments
    async fn invoke(&self, member: &MemberInfo, args: &mut Arguments) -> InvocationResult;
}

/// Untyped proxy instance
pub struct DynamicProxy {
    core: ProxyCore<dyn DynamicTarget>,
    paths: Vec<Option<ProceedFn>>,
}

impl DynamicProxy {
    /// Create a proxy for `source`, optionally forwarding to `target`.
    ///
    /// Without a target every concrete class member needs a [`BaseImpl`].
    pub fn new(
        source: &SourceType,
        target: Option<Arc<dyn DynamicTarget>>,
        handler: InvocationHandler,
    ) -> SynthesisResult<Self> {
        let ty = ProxyTypeCache::global().get_or_synthesize_dynamic(source)?;

        let mut paths = vec![None; ty.len()];
        for (_, decl) in source.all_members() {
            let (index, entry) =
                ty.entry_for(&decl.signature())
                    .ok_or_else(|| SynthesisError::UnresolvedMember {
                        source_type: source.name.clone(),
                        signature: decl.signature().to_string(),
                    })?;
            if !entry.member.is_instance_member() {
                continue;
            }
            paths[index] = Some(resolve_path(source, decl, entry, target.as_ref())?);
        }

        Ok(Self {
            core: ProxyCore::new(ty, target, handler),
            paths,
        })
    }

    /// Instance id
    pub fn id(&self) -> ProxyId {
        self.core.id()
    }

    /// Shared descriptor
    pub fn proxy_type(&self) -> &Arc<ProxyType> {
        self.core.proxy_type()
    }

    /// The target, if any
    pub fn target(&self) -> Option<&Arc<dyn DynamicTarget>> {
        self.core.target()
    }

    /// Call the first member named `name`, bridging async results per the
    /// handler's policy
    pub fn invoke(&self, name: &str, args: &mut Arguments) -> InvocationResult {
        let index = self.index_named(name)?;
        self.invoke_at(index, args)
    }

    /// Call the member matching `signature`
    pub fn invoke_signature(
        &self,
        signature: &MemberSignature,
        args: &mut Arguments,
    ) -> InvocationResult {
        let index = self.index_for(signature)?;
        self.invoke_at(index, args)
    }

    /// Call the first member named `name` asynchronously
    pub async fn invoke_async(&self, name: &str, args: &mut Arguments) -> InvocationResult {
        let index = self.index_named(name)?;
        self.invoke_at_async(index, args).await
    }

    /// Call the member matching `signature` asynchronously
    pub async fn invoke_signature_async(
        &self,
        signature: &MemberSignature,
        args: &mut Arguments,
    ) -> InvocationResult {
        let index = self.index_for(signature)?;
        self.invoke_at_async(index, args).await
    }

    fn index_named(&self, name: &str) -> Result<usize, ProxyError> {
        self.proxy_type()
            .entry_named(name)
            .map(|(index, _)| index)
            .ok_or_else(|| ProxyError::UnknownMember(name.to_string()))
    }

    fn index_for(&self, signature: &MemberSignature) -> Result<usize, ProxyError> {
        self.proxy_type()
            .entry_for(signature)
            .map(|(index, _)| index)
            .ok_or_else(|| ProxyError::UnknownMember(signature.to_string()))
    }

    fn prepare(&self, index: usize) -> Result<(&DispatchEntry, &ProceedFn), ProxyError> {
        let entry = self.core.entry(index);
        match &self.paths[index] {
            Some(path) => Ok((entry, path)),
            None => Err(ProxyError::NotInvocable(entry.member.name.clone())),
        }
    }

    fn invoke_at(&self, index: usize, args: &mut Arguments) -> InvocationResult {
        let (entry, path) = self.prepare(index)?;
        let shared = mem::take(args).into_shared();

        let future = if self.core.is_active(entry) {
            self.core.dispatch(entry, Arc::clone(&shared), Arc::clone(path))
        } else {
            path(Arc::clone(&shared))
        };
        let result = self.core.handler().resolve_sync(&entry.member, future);

        *args = mem::take(&mut *shared.lock());
        require_value(&entry.member, result)
    }

    async fn invoke_at_async(&self, index: usize, args: &mut Arguments) -> InvocationResult {
        let (entry, path) = self.prepare(index)?;
        let shared = mem::take(args).into_shared();

        let future = if self.core.is_active(entry) {
            self.core.dispatch(entry, Arc::clone(&shared), Arc::clone(path))
        } else {
            path(Arc::clone(&shared))
        };
        let result = future.await;

        *args = mem::take(&mut *shared.lock());
        require_value(&entry.member, result)
    }
}

impl fmt::Debug for DynamicProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicProxy").field("core", &self.core).finish()
    }
}

fn resolve_path(
    source: &SourceType,
    decl: &MemberDecl,
    entry: &DispatchEntry,
    target: Option<&Arc<dyn DynamicTarget>>,
) -> SynthesisResult<ProceedFn> {
    if let Some(target) = target {
        return Ok(target_path(Arc::clone(target), Arc::clone(&entry.member)));
    }

    match entry.fallback {
        Fallback::Base => match &decl.base {
            Some(base) => Ok(base_path(base.clone())),
            None => Err(SynthesisError::MissingBaseImpl {
                source_type: source.name.clone(),
                member: decl.name.clone(),
            }),
        },
        Fallback::Default => Ok(default_path(decl.default.clone(), entry.member.is_void())),
    }
}

fn target_path(target: Arc<dyn DynamicTarget>, member: Arc<MemberInfo>) -> ProceedFn {
    Arc::new(move |args: SharedArguments| {
        let target = Arc::clone(&target);
        let member = Arc::clone(&member);
        Box::pin(async move {
            let mut local = mem::take(&mut *args.lock());
            let result = target.invoke(&member, &mut local).await;
            *args.lock() = local;
            result
        })
    })
}

fn base_path(base: BaseImpl) -> ProceedFn {
    match base {
        BaseImpl::Sync(body) => Arc::new(move |args: SharedArguments| {
            let result = body(&mut args.lock());
            completed(result)
        }),
        BaseImpl::Async(body) => Arc::new(move |args: SharedArguments| {
            let local = mem::take(&mut *args.lock());
            let pending = body(local);
            Box::pin(async move {
                let (local, result) = pending.await;
                *args.lock() = local;
                result
            })
        }),
    }
}

fn default_path(default: Option<DefaultValue>, is_void: bool) -> ProceedFn {
    Arc::new(move |_args: SharedArguments| {
        let value = match &default {
            Some(default) if !is_void => Some(default.make()),
            _ => None,
        };
        completed(Ok(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AsyncFault;
    use crate::handler::AsyncPolicy;
    use crate::invocation::{value, Invocation};
    use crate::source::SourceKind;
    use crate::member::ParamMode;
    use futures::FutureExt;
    use parking_lot::Mutex;

    /// Remote stub that records calls and answers `greet`
    #[derive(Default)]
    struct Remote {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DynamicTarget for Remote {
        async fn invoke(&self, member: &MemberInfo, args: &mut Arguments) -> InvocationResult {
            self.calls.lock().push(member.name.clone());
            match member.name.as_str() {
                "greet" => {
                    let name: String = args.get(0)?;
                    Ok(value(format!("hello {}", name)))
                }
                "bump" => {
                    *args.get_mut::<u32>(0)? += 1;
                    Ok(None)
                }
                other => Err(ProxyError::UnknownMember(other.to_string())),
            }
        }
    }

    fn greeter(name: &str) -> SourceType {
        SourceType::interface(name)
            .member(
                MemberDecl::method("greet")
                    .param("name", "String", ParamMode::Value)
                    .returns("String")
                    .defaults_to::<String>(),
            )
            .member(MemberDecl::method("bump").param("n", "u32", ParamMode::Mut))
            .member(MemberDecl::method("version").returns("u32").static_member())
    }

    fn calculator(name: &str, with_base: bool) -> SourceType {
        let mut sum = MemberDecl::method("sum")
            .param("a", "i32", ParamMode::Value)
            .param("b", "i32", ParamMode::Value)
            .returns("i32");
        if with_base {
            sum = sum.base(BaseImpl::sync(|args| {
                let a: i32 = args.get(0)?;
                let b: i32 = args.get(1)?;
                Ok(value(a + b))
            }));
        }
        SourceType::class(name).member(sum)
    }

    #[test]
    fn test_forwards_to_target() {
        let remote = Arc::new(Remote::default());
        let target: Arc<dyn DynamicTarget> = remote.clone();
        let proxy = DynamicProxy::new(
            &greeter("Greeter.Forward"),
            Some(target),
            InvocationHandler::passthrough().with_policy(AsyncPolicy::Wait),
        )
        .unwrap();

        let mut args = Arguments::new().with(String::from("ada"));
        let result = proxy.invoke("greet", &mut args).unwrap().unwrap();
        assert_eq!(*result.downcast::<String>().unwrap(), "hello ada");
        assert_eq!(*remote.calls.lock(), vec!["greet".to_string()]);
    }

    #[test]
    fn test_mut_argument_written_back() {
        let target: Arc<dyn DynamicTarget> = Arc::new(Remote::default());
        let proxy = DynamicProxy::new(
            &greeter("Greeter.Mut"),
            Some(target),
            InvocationHandler::passthrough().with_policy(AsyncPolicy::Wait),
        )
        .unwrap();

        let mut args = Arguments::new().with_mut(41u32);
        assert!(proxy.invoke("bump", &mut args).unwrap().is_none());
        assert_eq!(args.get::<u32>(0).unwrap(), 42);
    }

    #[test]
    fn test_interface_default_without_target() {
        let proxy = DynamicProxy::new(
            &greeter("Greeter.Default"),
            None,
            InvocationHandler::passthrough(),
        )
        .unwrap();

        let mut args = Arguments::new().with(String::from("ada"));
        let result = proxy.invoke("greet", &mut args).unwrap().unwrap();
        assert_eq!(*result.downcast::<String>().unwrap(), "");
        assert!(proxy.invoke("bump", &mut Arguments::new().with_mut(1u32)).unwrap().is_none());
    }

    #[test]
    fn test_class_base_body_with_handler() {
        let handler = InvocationHandler::new(|inv: Invocation| async move {
            let sum: i32 = inv.proceed_as().await?;
            Ok(value(sum + 3))
        });
        let proxy = DynamicProxy::new(&calculator("Calculator.Base", true), None, handler).unwrap();

        let mut args = Arguments::new().with(1i32).with(2i32);
        let result = proxy.invoke("sum", &mut args).unwrap().unwrap();
        assert_eq!(*result.downcast::<i32>().unwrap(), 6);
    }

    #[test]
    fn test_missing_base_impl() {
        let err = DynamicProxy::new(
            &calculator("Calculator.NoBase", false),
            None,
            InvocationHandler::passthrough(),
        )
        .unwrap_err();
        assert!(matches!(err, SynthesisError::MissingBaseImpl { .. }));
    }

    #[test]
    fn test_unknown_and_static_members() {
        let proxy = DynamicProxy::new(
            &greeter("Greeter.Errors"),
            None,
            InvocationHandler::passthrough(),
        )
        .unwrap();

        let mut args = Arguments::new();
        assert!(matches!(
            proxy.invoke("missing", &mut args),
            Err(ProxyError::UnknownMember(_))
        ));
        assert!(matches!(
            proxy.invoke("version", &mut args),
            Err(ProxyError::NotInvocable(_))
        ));
    }

    #[test]
    fn test_inactive_member_skips_handler() {
        let handler = InvocationHandler::builder(|_inv: Invocation| async move {
            Err::<Option<crate::invocation::AnyValue>, _>(ProxyError::from(anyhow::anyhow!("intercepted")))
        })
        .activation(|_, member| member.name != "sum")
        .build();
        let proxy = DynamicProxy::new(&calculator("Calculator.Inactive", true), None, handler).unwrap();

        let mut args = Arguments::new().with(2i32).with(2i32);
        let result = proxy.invoke("sum", &mut args).unwrap().unwrap();
        assert_eq!(*result.downcast::<i32>().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_async_base_body() {
        let source = SourceType::class("Loader.Async").member(
            MemberDecl::method("load")
                .param("key", "String", ParamMode::Value)
                .returns("String")
                .asynchronous()
                .base(BaseImpl::future(|args| {
                    async move {
                        let key = args.get::<String>(0);
                        let result = key.map(|k| value(k.to_uppercase()));
                        (args, result)
                    }
                    .boxed()
                })),
        );
        let proxy = DynamicProxy::new(&source, None, InvocationHandler::passthrough()).unwrap();

        let signature = MemberSignature::new("load").param("String", ParamMode::Value);
        let mut args = Arguments::new().with(String::from("abc"));
        let result = proxy
            .invoke_signature_async(&signature, &mut args)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*result.downcast::<String>().unwrap(), "ABC");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_missing_value_result_is_an_error() {
        let source = SourceType::interface("Counter.Null")
            .member(MemberDecl::method("count").returns("u32"))
            .member(MemberDecl::method("peek").returns("Option<u32>"));
        let proxy = DynamicProxy::new(&source, None, InvocationHandler::passthrough()).unwrap();

        let err = proxy.invoke("count", &mut Arguments::new()).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::InvalidAsync { fault: AsyncFault::NullResult, .. }
        ));
        assert!(proxy.invoke("peek", &mut Arguments::new()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_value_result_is_an_error_async() {
        let source = SourceType::interface("Counter.NullAsync")
            .member(MemberDecl::method("count").returns("u32").asynchronous());
        let proxy = DynamicProxy::new(&source, None, InvocationHandler::passthrough()).unwrap();

        let err = proxy.invoke_async("count", &mut Arguments::new()).await.unwrap_err();
        assert!(err.is_invalid_async());
    }

    #[test]
    fn test_handler_value_satisfies_value_member() {
        let source = SourceType::interface("Counter.Answered")
            .member(MemberDecl::method("count").returns("u32"));
        let handler = InvocationHandler::new(|_inv: Invocation| async move { Ok::<_, ProxyError>(value(7u32)) });
        let proxy = DynamicProxy::new(&source, None, handler).unwrap();

        let result = proxy.invoke("count", &mut Arguments::new()).unwrap().unwrap();
        assert_eq!(*result.downcast::<u32>().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_arguments_readable_around_target_call() {
        let handler = InvocationHandler::new(|inv: Invocation| async move {
            let before: String = inv.arg(0)?;
            let pending = inv.proceed();
            let result = pending.await?;
            let after: String = inv.arg(0)?;
            assert_eq!(before, after);
            Ok(result)
        });
        let target: Arc<dyn DynamicTarget> = Arc::new(Remote::default());
        let proxy = DynamicProxy::new(&greeter("Greeter.Lent"), Some(target), handler).unwrap();

        let mut args = Arguments::new().with(String::from("ada"));
        let result = proxy.invoke_async("greet", &mut args).await.unwrap().unwrap();
        assert_eq!(*result.downcast::<String>().unwrap(), "hello ada");
        assert_eq!(args.get::<String>(0).unwrap(), "ada");
    }

    #[test]
    fn test_same_name_class_after_interface_runs_base() {
        let sum = || {
            MemberDecl::method("sum")
                .param("a", "i32", ParamMode::Value)
                .param("b", "i32", ParamMode::Value)
                .returns("i32")
                .defaults_to::<i32>()
        };
        let interface = SourceType::interface("Adder.Shared").member(sum());
        let first = DynamicProxy::new(&interface, None, InvocationHandler::passthrough()).unwrap();
        assert_eq!(first.proxy_type().kind(), SourceKind::Interface);

        let class = SourceType::class("Adder.Shared").member(sum().base(BaseImpl::sync(|args| {
            let a: i32 = args.get(0)?;
            let b: i32 = args.get(1)?;
            Ok(value(a + b))
        })));
        let second = DynamicProxy::new(&class, None, InvocationHandler::passthrough()).unwrap();
        assert_eq!(second.proxy_type().kind(), SourceKind::Class);

        let mut args = Arguments::new().with(1i32).with(2i32);
        let result = second.invoke("sum", &mut args).unwrap().unwrap();
        assert_eq!(*result.downcast::<i32>().unwrap(), 3);

        let sealed = SourceType::class("Adder.Shared").sealed().member(sum());
        assert!(matches!(
            DynamicProxy::new(&sealed, None, InvocationHandler::passthrough()),
            Err(SynthesisError::SealedSource(_))
        ));
    }

    #[test]
    fn test_edit_through_guard_then_proceed() {
        let handler = InvocationHandler::new(|inv: Invocation| async move {
            {
                let mut args = inv.arguments();
                args.set(0, String::from("grace"))?;
            }
            inv.proceed().await
        });
        let target: Arc<dyn DynamicTarget> = Arc::new(Remote::default());
        let proxy = DynamicProxy::new(&greeter("Greeter.Guard"), Some(target), handler).unwrap();

        let mut args = Arguments::new().with(String::from("ada"));
        let result = proxy.invoke("greet", &mut args).unwrap().unwrap();
        assert_eq!(*result.downcast::<String>().unwrap(), "hello grace");
        assert_eq!(args.get::<String>(0).unwrap(), "grace");
    }

    #[test]
    fn test_descriptor_shared_across_instances() {
        let source = greeter("Greeter.Cached");
        let a = DynamicProxy::new(&source, None, InvocationHandler::passthrough()).unwrap();
        let b = DynamicProxy::new(&source, None, InvocationHandler::passthrough()).unwrap();
        assert!(Arc::ptr_eq(a.proxy_type(), b.proxy_type()));
        assert_ne!(a.id(), b.id());
    }
}
