// #[proxy] proc-macro implementation
//
// Generates the proxy struct, its constructors and the trait impl whose
// methods run the dispatch protocol.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{ItemTrait, Result};

use crate::base::{base_ident, expand_base};
use crate::inherit::{expand_forwarder, expand_parent_impls};
use crate::metadata::expand_source;
use crate::model::{Method, Mode, TraitModel};
use crate::Names;

/// Expands the #[proxy] attribute macro.
///
/// Input: a trait
/// Output: the trait, its hidden base trait, a metadata marker, and the
/// proxy type implementing the trait
///
/// Example expansion:
/// ```ignore
/// // Input:
/// #[proxy]
/// pub trait Calc {
///     fn sum(&self, a: i32, b: i32) -> i32 { a + b }
/// }
///
/// // Output (abridged):
/// pub trait Calc { ... }
/// trait __CalcBase: Calc { fn __base_sum(&self, a: i32, b: i32) -> i32 { a + b } }
/// pub struct CalcSource;
/// impl ProxySource for CalcSource { ... }
/// pub struct CalcProxy<__T: ?Sized = dyn Calc + Send + Sync, __S = Eager> { ... }
/// impl<__T, __S> Calc for CalcProxy<__T, __S> {
///     fn sum(&self, a: i32, b: i32) -> i32 {
///         // fast path when the handler is inactive
///         // otherwise: package arguments, bind proceed, dispatch, settle
///     }
/// }
/// ```
pub fn expand_proxy(item: ItemTrait) -> Result<TokenStream> {
    let model = TraitModel::parse(item)?;
    let names = Names::new(&model);

    let trait_def = &model.item;
    let base = expand_base(&model, &names);
    let source = expand_source(&model, &names);
    let proxy = expand_struct(&model, &names);
    let trait_impl = expand_trait_impl(&model, &names);
    let parent_impls = expand_parent_impls(&model, &names);
    let forwarder = expand_forwarder(&model, &names);

    Ok(quote! {
        #trait_def
        #base
        #source
        #proxy
        #trait_impl
        #parent_impls
        #forwarder
    })
}

/// How generated method bodies name the trait they implement
pub(crate) struct ImplPaths {
    /// Trait the impl is for, with generic arguments
    pub trait_path: TokenStream,
    /// Hidden trait holding the provided bodies
    pub base_path: TokenStream,
    /// Position of the trait's first member in the proxy's entry table
    pub offset: Option<TokenStream>,
}

impl ImplPaths {
    fn own(names: &Names) -> Self {
        let base = &names.base;
        let base_args = names.generic_args();
        Self {
            trait_path: names.trait_path(),
            base_path: quote!(#base #base_args),
            offset: None,
        }
    }

    fn index(&self, method: &Method) -> TokenStream {
        let index = method.index;
        match &self.offset {
            Some(offset) => quote!(#offset + #index),
            None => quote!(#index),
        }
    }
}

/// Method bodies of a proxy's trait impl
pub(crate) fn impl_methods(model: &TraitModel, paths: &ImplPaths) -> Vec<TokenStream> {
    model
        .methods
        .iter()
        .map(|m| {
            if m.is_static {
                expand_static(m, paths)
            } else if m.skip {
                expand_sealed(m, paths)
            } else {
                expand_intercepted(m, paths)
            }
        })
        .collect()
}

fn expand_struct(model: &TraitModel, names: &Names) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let vis = &model.item.vis;
    let proxy = &names.proxy;
    let source = &names.source;
    let trait_ident = &model.item.ident;
    let trait_path = names.trait_path();
    let params = &names.generic_params;
    let type_params = &model.type_params;
    let args = names.generic_args();
    let trait_preds = names.where_predicates();

    let dyn_default = if model.dyn_compatible {
        quote!(= dyn #trait_path + ::core::marker::Send + ::core::marker::Sync)
    } else {
        quote!()
    };

    let struct_where = if trait_preds.is_empty() {
        quote!()
    } else {
        quote!(where #(#trait_preds,)*)
    };

    let struct_doc = format!(
        "Interception proxy for [`{}`], generic over its target type and synthesis strategy",
        trait_ident
    );

    quote! {
        #[doc = #struct_doc]
        #vis struct #proxy<#(#params,)* __T: ?::core::marker::Sized #dyn_default, __S = ::interpose::Eager>
        #struct_where
        {
            __core: #rt::ProxyCore<__T>,
            __this: #rt::Weak<Self>,
            __marker: #rt::PhantomData<fn() -> (#(#type_params,)* __S,)>,
        }

        #[allow(dead_code)]
        impl<#(#params,)* __T: ?::core::marker::Sized, __S> #proxy<#(#type_params,)* __T, __S>
        where
            #(#trait_preds,)*
            #(#type_params: ::core::marker::Send + ::core::marker::Sync + 'static,)*
            __T: ::core::marker::Send + ::core::marker::Sync + 'static,
            __S: #rt::Strategy,
        {
            /// Proxy without a target: proceeds run provided bodies or yield defaults
            #vis fn new(
                handler: #rt::InvocationHandler,
            ) -> #rt::Result<#rt::Arc<Self>, #rt::SynthesisError> {
                Self::__create(#rt::None, handler)
            }

            /// Proxy whose proceeds forward to `target`
            #vis fn with_target(
                target: #rt::Arc<__T>,
                handler: #rt::InvocationHandler,
            ) -> #rt::Result<#rt::Arc<Self>, #rt::SynthesisError> {
                Self::__create(#rt::Some(target), handler)
            }

            fn __create(
                target: #rt::Option<#rt::Arc<__T>>,
                handler: #rt::InvocationHandler,
            ) -> #rt::Result<#rt::Arc<Self>, #rt::SynthesisError> {
                let ty = <__S as #rt::Strategy>::proxy_type::<#source #args>()?;
                #rt::check_plan(&ty, <#source #args as #rt::ProxySource>::MEMBERS)?;
                let core = #rt::ProxyCore::new(ty, target, handler);
                #rt::Ok(#rt::Arc::new_cyclic(|this| Self {
                    __core: core,
                    __this: #rt::Weak::clone(this),
                    __marker: #rt::PhantomData,
                }))
            }

            /// Shared proxy type descriptor
            #vis fn proxy_type(&self) -> &#rt::Arc<#rt::ProxyType> {
                self.__core.proxy_type()
            }

            /// The target, if any
            #vis fn target(&self) -> #rt::Option<&#rt::Arc<__T>> {
                self.__core.target()
            }

            /// Instance id, as seen by handlers
            #vis fn id(&self) -> #rt::ProxyId {
                self.__core.id()
            }

            /// The handler every intercepted call goes through
            #vis fn handler(&self) -> &#rt::InvocationHandler {
                self.__core.handler()
            }
        }
    }
}

fn expand_trait_impl(model: &TraitModel, names: &Names) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let proxy = &names.proxy;
    let trait_path = names.trait_path();
    let params = &names.generic_params;
    let type_params = &model.type_params;
    let trait_preds = names.where_predicates();
    let async_attr = &model.async_attr;
    let value_preds = value_predicates(model);
    let methods = impl_methods(model, &ImplPaths::own(names));

    quote! {
        #async_attr
        impl<#(#params,)* __T: ?::core::marker::Sized, __S> #trait_path for #proxy<#(#type_params,)* __T, __S>
        where
            #(#trait_preds,)*
            #(#type_params: ::core::marker::Send + ::core::marker::Sync + 'static,)*
            #(#value_preds,)*
            __T: #trait_path + ::core::marker::Send + ::core::marker::Sync + 'static,
            __S: #rt::Strategy,
        {
            #(#methods)*
        }
    }
}

/// Bounds the argument container and result coercion need.
///
/// Types naming a method's own generics are left to the method's bounds.
pub(crate) fn value_predicates(model: &TraitModel) -> Vec<TokenStream> {
    let mut preds = Vec::new();
    for method in model.methods.iter().filter(|m| !m.is_static && !m.skip) {
        for param in &method.params {
            if method.mentions_generics(&param.ty) {
                continue;
            }
            let stored = param.stored();
            preds.push(quote! {
                #stored: ::core::clone::Clone + ::core::marker::Send + 'static
            });
        }
        if let Some(ret) = &method.ret {
            if !method.mentions_generics(ret) {
                preds.push(quote! {
                    #ret: ::core::default::Default + ::core::marker::Send + 'static
                });
            }
        }
    }
    preds
}

/// Method signature for the impl, with plain parameter names
fn impl_signature(method: &Method) -> TokenStream {
    let asyncness = &method.sig.asyncness;
    let ident = method.ident();
    let generics = &method.sig.generics;
    let where_clause = &method.sig.generics.where_clause;
    let output = &method.sig.output;
    let names = method.params.iter().map(|p| &p.name);
    let tys = method.params.iter().map(|p| &p.ty);
    let receiver = if method.is_static {
        quote!()
    } else {
        quote!(&self,)
    };

    quote! {
        #asyncness fn #ident #generics (#receiver #(#names: #tys),*) #output #where_clause
    }
}

fn dot_await(method: &Method) -> TokenStream {
    if method.is_async {
        quote!(.await)
    } else {
        quote!()
    }
}

fn expand_static(method: &Method, paths: &ImplPaths) -> TokenStream {
    let sig = impl_signature(method);
    let trait_path = &paths.trait_path;
    let ident = method.ident();
    let turbofish = method.turbofish();
    let args = method.params.iter().map(|p| &p.name);
    let await_ = dot_await(method);

    quote! {
        #sig {
            <__T as #trait_path>::#ident #turbofish(#(#args),*) #await_
        }
    }
}

/// The path a call takes when the handler is bypassed
fn direct_call(method: &Method, paths: &ImplPaths) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let trait_path = &paths.trait_path;
    let ident = method.ident();
    let turbofish = method.turbofish();
    let args: Vec<_> = method.params.iter().map(|p| &p.name).collect();
    let await_ = dot_await(method);

    let fallback = if method.has_body() {
        let base = &paths.base_path;
        let base_ident = base_ident(method);
        quote!(<Self as #base>::#base_ident #turbofish(self, #(#args),*) #await_)
    } else {
        quote!(#rt::Default::default())
    };

    quote! {
        match self.__core.target() {
            #rt::Some(__target) => <__T as #trait_path>::#ident #turbofish(&**__target, #(#args),*) #await_,
            #rt::None => #fallback,
        }
    }
}

fn expand_sealed(method: &Method, paths: &ImplPaths) -> TokenStream {
    let sig = impl_signature(method);
    let direct = direct_call(method, paths);
    quote! {
        #sig {
            #direct
        }
    }
}

fn expand_intercepted(method: &Method, paths: &ImplPaths) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let sig = impl_signature(method);
    let index = paths.index(method);
    let direct = direct_call(method, paths);
    let ret = method.ret_type();
    let arg_count = method.params.len();

    // Entry point: package arguments
    let pushes = method.params.iter().map(|p| {
        let name = &p.name;
        let referent = &p.referent;
        let mode = p.mode.variant();
        let value = match p.mode {
            Mode::Value => quote!(#name),
            Mode::Shared => quote!(<#referent as #rt::ToOwned>::to_owned(#name)),
            Mode::Mut => quote!(<#referent as ::core::clone::Clone>::clone(&*#name)),
        };
        quote!(__args.push(#value, #rt::ParamMode::#mode);)
    });

    let proceed_body = proceed_body(method, paths);
    let captures_this = method.has_body();
    let capture_this = if captures_this {
        quote!(let __this = #rt::Weak::clone(&self.__this);)
    } else {
        quote!()
    };
    let clone_this = if captures_this {
        quote!(let __this = #rt::Weak::clone(&__this);)
    } else {
        quote!()
    };

    let dispatch = if method.is_async {
        quote!(let __result = self.__core.dispatch(__entry, #rt::Arc::clone(&__args), __proceed).await;)
    } else {
        quote!(let __result = self.__core.dispatch_sync(__entry, #rt::Arc::clone(&__args), __proceed);)
    };

    // By-reference parameters see the container's final values
    let copy_back = method
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.mode == Mode::Mut)
        .map(|(i, p)| {
            let name = &p.name;
            let referent = &p.referent;
            quote!(*#name = #rt::read_back::<#referent>(&__entry.member, &__args, #i);)
        });

    quote! {
        #sig {
            let __entry = self.__core.entry(#index);
            if !self.__core.is_active(__entry) {
                return #direct;
            }

            #[allow(unused_mut)]
            let mut __args = #rt::Arguments::with_capacity(#arg_count);
            #(#pushes)*
            let __args = __args.into_shared();

            let __proceed: #rt::ProceedFn = {
                let __target = self.__core.target().cloned();
                #capture_this
                #rt::Arc::new(move |__args: #rt::SharedArguments| -> #rt::ProceedFuture {
                    let __target = __target.clone();
                    #clone_this
                    #proceed_body
                })
            };

            #dispatch
            #(#copy_back)*
            #rt::settle::<#ret>(&__entry.member, __result)
        }
    }
}

/// Body of the proceed closure: read arguments, run the resolved path,
/// write by-reference values back
fn proceed_body(method: &Method, paths: &ImplPaths) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let trait_path = &paths.trait_path;
    let ident = method.ident();
    let turbofish = method.turbofish();
    let ret = method.ret_type();
    let await_ = dot_await(method);

    let extract = if method.params.is_empty() {
        quote!()
    } else {
        let bindings = method.params.iter().map(|p| {
            let name = &p.name;
            match p.mode {
                Mode::Mut => quote!(mut #name),
                Mode::Value | Mode::Shared => quote!(#name),
            }
        });
        let reads = method.params.iter().enumerate().map(|(i, p)| {
            let stored = p.stored();
            quote!(__guard.get::<#stored>(#i)?)
        });
        quote! {
            let (#(#bindings,)*) = {
                let __guard = __args.lock();
                (#(#reads,)*)
            };
        }
    };

    let call_args: Vec<_> = method
        .params
        .iter()
        .map(|p| {
            let name = &p.name;
            let referent = &p.referent;
            match p.mode {
                Mode::Value => quote!(#name),
                Mode::Shared => quote!(#rt::Borrow::<#referent>::borrow(&#name)),
                Mode::Mut => quote!(&mut #name),
            }
        })
        .collect();

    let fallback = if method.has_body() {
        let base = &paths.base_path;
        let base_ident = base_ident(method);
        quote! {{
            let __this = __this.upgrade().ok_or(#rt::ProxyError::ProxyReleased)?;
            <Self as #base>::#base_ident #turbofish(&*__this, #(#call_args),*) #await_
        }}
    } else {
        quote!(#rt::Default::default())
    };

    let write_back = {
        let sets: Vec<_> = method
            .params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.mode == Mode::Mut)
            .map(|(i, p)| {
                let name = &p.name;
                let referent = &p.referent;
                quote!(__guard.set::<#referent>(#i, #name)?;)
            })
            .collect();
        if sets.is_empty() {
            quote!()
        } else {
            quote! {{
                let mut __guard = __args.lock();
                #(#sets)*
            }}
        }
    };

    let wrap = if method.is_void() {
        quote!(#rt::None)
    } else {
        quote!(#rt::value(__ret))
    };

    let run = quote! {
        #extract
        let __ret: #ret = match &__target {
            #rt::Some(__target) => <__T as #trait_path>::#ident #turbofish(&**__target, #(#call_args),*) #await_,
            #rt::None => #fallback,
        };
        #write_back
        #rt::InvocationResult::Ok(#wrap)
    };

    if method.is_async {
        quote! {
            #rt::Box::pin(async move { #run })
        }
    } else {
        quote! {
            #rt::completed((move || -> #rt::InvocationResult { #run })())
        }
    }
}
