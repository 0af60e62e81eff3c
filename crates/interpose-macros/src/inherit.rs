// Parent trait support
//
// A child trait's proxy must implement every parent `#[proxy]` trait too, but
// the child's expansion never sees the parent's methods. So each `#[proxy]`
// trait also emits a hidden `macro_rules!` forwarder holding its own trait
// impl, parameterized over the proxy type and the position of its members in
// the proxy's entry table. The child's expansion calls one forwarder per
// parent.
//
// Entry layout of a child proxy: own members first, then each parent's
// members in supertrait order. Offsets are `ProxySource::MEMBERS` sums, so
// they are constants the child computes without knowing the parent's shape.

use proc_macro2::TokenStream;
use quote::quote;

use crate::model::TraitModel;
use crate::proxy::{impl_methods, value_predicates, ImplPaths};
use crate::Names;

/// Expands the forwarder a child trait calls to implement this trait
///
/// ```ignore
/// // For `#[proxy] pub trait Named { fn name(&self) -> String; }`:
/// macro_rules! __interpose_inherit_Named {
///     (proxy: $proxy:ident, params: [..], args: [..], preds: [..],
///      parent: [..], base: [..], offset: [..]) => {
///         impl<.., __T: ?Sized, __S> Named for $proxy<.., __T, __S> where .. { .. }
///     };
/// }
/// pub(crate) use __interpose_inherit_Named;
/// ```
pub fn expand_forwarder(model: &TraitModel, names: &Names) -> TokenStream {
    let forwarder = &names.forwarder;
    let trait_ident = &model.item.ident;

    let body = if !model.type_params.is_empty() {
        let message = format!(
            "`{}` is generic and cannot be a parent of a #[proxy] trait",
            trait_ident
        );
        quote!(::core::compile_error!(#message);)
    } else if !model.parents.is_empty() {
        let message = format!(
            "`{}` has parent traits of its own; #[proxy] supports one level of inheritance",
            trait_ident
        );
        quote!(::core::compile_error!(#message);)
    } else {
        forwarded_impl(model)
    };

    quote! {
        #[doc(hidden)]
        #[allow(unused_macros)]
        macro_rules! #forwarder {
            (
                proxy: $proxy:ident,
                params: [$($params:tt)*],
                args: [$($args:tt)*],
                preds: [$($preds:tt)*],
                parent: [$($parent:tt)*],
                base: [$($base:tt)*],
                offset: [$($offset:tt)*] $(,)?
            ) => {
                #body
            };
        }

        #[doc(hidden)]
        #[allow(unused_imports)]
        pub(crate) use #forwarder;
    }
}

/// The parent trait impl, written against the forwarder's metavariables
fn forwarded_impl(model: &TraitModel) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let paths = ImplPaths {
        trait_path: quote!($($parent)*),
        base_path: quote!($($base)*),
        offset: Some(quote!(($($offset)*))),
    };
    let methods = impl_methods(model, &paths);
    let value_preds = value_predicates(model);
    let async_attr = model
        .async_attr
        .as_ref()
        .map(|_| quote!(#[::interpose::async_trait]));

    quote! {
        #async_attr
        impl<$($params)* __T: ?::core::marker::Sized, __S> $($parent)* for $proxy<$($args)* __T, __S>
        where
            $($preds)*
            #(#value_preds,)*
            __T: $($parent)* + ::core::marker::Send + ::core::marker::Sync + 'static,
            __S: #rt::Strategy,
        {
            #(#methods)*
        }
    }
}

/// Calls each parent's forwarder for this trait's proxy
pub fn expand_parent_impls(model: &TraitModel, names: &Names) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let proxy = &names.proxy;
    let params = &names.generic_params;
    let type_params = &model.type_params;
    let trait_preds = names.where_predicates();
    let own = model.methods.len();

    let mut offset = quote!(#own);
    let mut impls = Vec::with_capacity(model.parents.len());
    for parent in &model.parents {
        let forwarder = parent.forwarder();
        let path = &parent.path;
        let base = parent.base();
        let source = parent.source();

        impls.push(quote! {
            #forwarder! {
                proxy: #proxy,
                params: [#(#params,)*],
                args: [#(#type_params,)*],
                preds: [
                    #(#trait_preds,)*
                    #(#type_params: ::core::marker::Send + ::core::marker::Sync + 'static,)*
                ],
                parent: [#path],
                base: [#base],
                offset: [#offset],
            }
        });

        offset = quote!(#offset + <#source as #rt::ProxySource>::MEMBERS);
    }

    quote!(#(#impls)*)
}
