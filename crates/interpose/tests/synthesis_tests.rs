//! Proxy type synthesis tests
//!
//! Covers the metadata `#[proxy]` emits, agreement between the eager and
//! lazy strategies, descriptor caching, and runtime-described sources.

#[macro_use]
mod common;

use std::sync::Arc;

use interpose::{
    async_trait, value, Accessor, Arguments, DynamicProxy, DynamicTarget, Eager, Fallback,
    InvocationHandler, InvocationResult, Lazy, MemberDecl, MemberInfo, ParamMode, ProxySource,
    ProxyType, ProxyTypeCache, SourceKind, SourceType, Strategy, StrategyKind, SynthesisError,
};

use common::*;

fn descriptors<S: ProxySource>() -> (Arc<ProxyType>, Arc<ProxyType>) {
    let eager = Eager::proxy_type::<S>().expect("eager descriptor");
    let lazy = Lazy::proxy_type::<S>().expect("lazy descriptor");
    (eager, lazy)
}

// ============================================================================
// Generated metadata
// ============================================================================

mod metadata {
    use super::*;

    #[test]
    fn test_class_metadata() {
        let source = CalculatorSource::source_type();
        assert_eq!(source.name, "Calculator");
        assert_eq!(source.kind, SourceKind::Class);

        let names: Vec<_> = source.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            ["sum", "triple", "describe", "version", "precision", "set_precision"]
        );

        let describe = &source.members[2];
        assert!(describe.modifiers.is_abstract);
        let version = &source.members[3];
        assert!(version.modifiers.is_sealed);
        assert!(!version.modifiers.is_abstract);
    }

    #[test]
    fn test_interface_metadata() {
        let source = <CrudSource<Person> as ProxySource>::source_type();
        assert_eq!(source.kind, SourceKind::Interface);
        assert_eq!(source.generic_params, vec!["T".to_string()]);

        let save = source.members.iter().find(|m| m.name == "save").unwrap();
        assert_eq!(save.params.len(), 1);
        assert_eq!(save.params[0].ty.name(), "T");
        assert_eq!(save.returns.name(), "bool");
    }

    #[test]
    fn test_param_modes() {
        let source = BufferSource::source_type();
        let append = &source.members[0];
        assert_eq!(append.params[0].mode, ParamMode::Mut);
        assert_eq!(append.params[0].ty.name(), "String");
        assert_eq!(append.params[1].mode, ParamMode::Shared);
        assert_eq!(append.params[1].ty.name(), "str");
        assert!(append.returns.is_unit());
    }

    #[test]
    fn test_async_and_static_metadata() {
        let messages = MessagesSource::source_type();
        assert!(messages.members.iter().all(|m| m.is_async));

        let echo = EchoSource::source_type();
        assert_eq!(echo.members[0].generic_params, vec!["U".to_string()]);
        assert!(echo.members[1].modifiers.is_static);
    }

    #[test]
    fn test_property_metadata() {
        let ty = Lazy::proxy_type::<CalculatorSource>().unwrap();
        let (_, getter) = ty.entry_named("precision").unwrap();
        let (_, setter) = ty.entry_named("set_precision").unwrap();

        let getter = getter.member.property.as_ref().unwrap();
        let setter = setter.member.property.as_ref().unwrap();
        assert_eq!(getter.name, "precision");
        assert_eq!(getter.accessor, Accessor::Get);
        assert_eq!(setter.name, "precision");
        assert_eq!(setter.accessor, Accessor::Set);
    }
}

// ============================================================================
// Strategy agreement
// ============================================================================

mod strategies {
    use super::*;

    #[test]
    fn test_strategies_agree() {
        let (eager, lazy) = descriptors::<CalculatorSource>();
        assert!(eager.same_behavior(&lazy));
        let (eager, lazy) = descriptors::<CrudSource<Person>>();
        assert!(eager.same_behavior(&lazy));
        let (eager, lazy) = descriptors::<BufferSource>();
        assert!(eager.same_behavior(&lazy));
        let (eager, lazy) = descriptors::<EchoSource>();
        assert!(eager.same_behavior(&lazy));
        let (eager, lazy) = descriptors::<MessagesSource>();
        assert!(eager.same_behavior(&lazy));
    }

    #[test]
    fn test_strategy_tags() {
        let (eager, lazy) = descriptors::<CalculatorSource>();
        assert_eq!(eager.strategy(), StrategyKind::Eager);
        assert_eq!(lazy.strategy(), StrategyKind::Lazy);
        assert!(!Arc::ptr_eq(&eager, &lazy));
    }

    #[test]
    fn test_fallback_plan() {
        let (eager, _) = descriptors::<CalculatorSource>();
        let fallback = |name: &str| eager.entry_named(name).unwrap().1.fallback;

        assert_eq!(fallback("sum"), Fallback::Base);
        assert_eq!(fallback("describe"), Fallback::Default);
        assert_eq!(fallback("precision"), Fallback::Default);

        let (_, version) = eager.entry_named("version").unwrap();
        assert!(!version.intercepted);
        let (_, sum) = eager.entry_named("sum").unwrap();
        assert!(sum.intercepted);
    }

    #[test]
    fn test_static_member_not_intercepted() {
        let (eager, lazy) = descriptors::<EchoSource>();
        assert!(!eager.entry_named("name").unwrap().1.intercepted);
        assert!(!lazy.entry_named("name").unwrap().1.intercepted);
        assert!(lazy.entry_named("echo").unwrap().1.intercepted);
    }
}

// ============================================================================
// Caching
// ============================================================================

mod caching {
    use super::*;

    fn concurrent_first_use<S: Strategy>() {
        let cache = ProxyTypeCache::new();

        let types: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.get_or_synthesize::<CalculatorSource, S>().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.syntheses(), 1);
        assert_eq!(cache.len(), 1);
        assert!(types.iter().all(|ty| Arc::ptr_eq(ty, &types[0])));
    }

    fn proxies_share_descriptor<S: Strategy>() {
        let proxies: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| calculator::<S>(None, InvocationHandler::passthrough())))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let first = proxies[0].proxy_type();
        assert!(proxies.iter().all(|p| Arc::ptr_eq(p.proxy_type(), first)));
        let ids: std::collections::HashSet<_> = proxies.iter().map(|p| p.id()).collect();
        assert_eq!(ids.len(), proxies.len());
    }

    both_strategies! {
        test_concurrent_first_use => concurrent_first_use;
        test_proxies_share_descriptor => proxies_share_descriptor;
    }

    #[test]
    fn test_strategies_cached_separately() {
        let cache = ProxyTypeCache::new();
        cache.get_or_synthesize::<BufferSource, Eager>().unwrap();
        cache.get_or_synthesize::<BufferSource, Lazy>().unwrap();
        cache.get_or_synthesize::<BufferSource, Lazy>().unwrap();

        assert_eq!(cache.syntheses(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_generic_instantiations_cached_separately() {
        let cache = ProxyTypeCache::new();
        let people = cache.get_or_synthesize::<CrudSource<Person>, Lazy>().unwrap();
        let numbers = cache.get_or_synthesize::<CrudSource<u64>, Lazy>().unwrap();

        assert!(!Arc::ptr_eq(&people, &numbers));
        assert!(people.same_behavior(&numbers));
    }
}

// ============================================================================
// Runtime-described sources
// ============================================================================

mod dynamic {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory key/value store addressed by member name
    #[derive(Default)]
    struct Store {
        values: Mutex<HashMap<String, i64>>,
    }

    #[async_trait]
    impl DynamicTarget for Store {
        async fn invoke(&self, member: &MemberInfo, args: &mut Arguments) -> InvocationResult {
            match member.name.as_str() {
                "put" => {
                    let key: String = args.get(0)?;
                    let v: i64 = args.get(1)?;
                    self.values.lock().insert(key, v);
                    Ok(None)
                }
                "get" => {
                    let key: String = args.get(0)?;
                    Ok(value(self.values.lock().get(&key).copied()))
                }
                other => Err(anyhow::anyhow!("unsupported member {}", other).into()),
            }
        }
    }

    fn store_source(name: &str) -> SourceType {
        SourceType::interface(name)
            .member(
                MemberDecl::method("put")
                    .param("key", "String", ParamMode::Shared)
                    .param("value", "i64", ParamMode::Value)
                    .asynchronous(),
            )
            .member(
                MemberDecl::method("get")
                    .param("key", "String", ParamMode::Shared)
                    .returns("Option<i64>")
                    .asynchronous()
                    .defaults_to::<Option<i64>>(),
            )
    }

    #[tokio::test]
    async fn test_dynamic_store_round_trip() {
        let store = Arc::new(Store::default());
        let proxy = DynamicProxy::new(
            &store_source("DynStoreRoundTrip"),
            Some(store.clone()),
            InvocationHandler::passthrough(),
        )
        .unwrap();

        let mut args = Arguments::new().with_shared("a".to_string()).with(5i64);
        proxy.invoke_async("put", &mut args).await.unwrap();

        let mut args = Arguments::new().with_shared("a".to_string());
        let result = proxy.invoke_async("get", &mut args).await.unwrap();
        let found = *result.unwrap().downcast::<Option<i64>>().unwrap();
        assert_eq!(found, Some(5));
        assert_eq!(store.values.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_dynamic_handler_rewrites_key() {
        let store = Arc::new(Store::default());
        let handler = InvocationHandler::new(|inv: interpose::Invocation| async move {
            let key: String = inv.arg(0)?;
            inv.set_arg(0, format!("ns:{}", key))?;
            inv.proceed().await
        });
        let proxy =
            DynamicProxy::new(&store_source("DynStoreRewrite"), Some(store.clone()), handler)
                .unwrap();

        let mut args = Arguments::new().with_shared("a".to_string()).with(1i64);
        proxy.invoke_async("put", &mut args).await.unwrap();

        assert_eq!(store.values.lock().get("ns:a"), Some(&1));
    }

    #[tokio::test]
    async fn test_dynamic_without_target_defaults() {
        let proxy = DynamicProxy::new(
            &store_source("DynStoreDefaults"),
            None,
            InvocationHandler::passthrough(),
        )
        .unwrap();

        let mut args = Arguments::new().with_shared("a".to_string());
        let result = proxy.invoke_async("get", &mut args).await.unwrap();
        let found = *result.unwrap().downcast::<Option<i64>>().unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_dynamic_synthesis_errors() {
        let sealed = SourceType::class("DynSealed")
            .member(MemberDecl::method("run"))
            .sealed();
        let err = DynamicProxy::new(&sealed, None, InvocationHandler::passthrough()).unwrap_err();
        assert!(matches!(err, SynthesisError::SealedSource(_)));

        let hidden = SourceType::interface("DynHidden")
            .member(MemberDecl::method("run"))
            .inaccessible();
        let err = DynamicProxy::new(&hidden, None, InvocationHandler::passthrough()).unwrap_err();
        assert!(matches!(err, SynthesisError::Inaccessible(_)));
    }
}
