// Provided-body capture
//
// A trait's default method bodies are what a class-like proxy proceeds to
// when it has no target. The proxy overrides every method, so the bodies are
// copied into a hidden extension trait, blanket-implemented for every
// implementor of the source trait. Calls made from inside a body still go
// through `Self`, so they stay intercepted. The base trait shares the source
// trait's visibility so child proxies in other modules can reach it.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::model::{Method, TraitModel};
use crate::Names;

pub fn base_ident(method: &Method) -> syn::Ident {
    format_ident!("__base_{}", method.ident())
}

/// Expands the hidden base trait, or nothing when no method has a body
///
/// ```ignore
/// // Input:
/// trait Calc {
///     fn sum(&self, a: i32, b: i32) -> i32 { a + b }
/// }
///
/// // Output:
/// trait __CalcBase: Calc {
///     fn __base_sum(&self, a: i32, b: i32) -> i32 { a + b }
/// }
/// impl<__X: Calc + ?Sized> __CalcBase for __X {}
/// ```
pub fn expand_base(model: &TraitModel, names: &Names) -> TokenStream {
    let bodies: Vec<_> = model
        .methods
        .iter()
        .filter(|m| m.has_body() && !m.is_static)
        .collect();
    if bodies.is_empty() {
        return quote!();
    }

    let vis = &model.item.vis;
    let base = &names.base;
    let trait_path = names.trait_path();
    let params = &names.generic_params;
    let decl = names.generic_decl();
    let args = names.generic_args();
    let where_clause = &model.item.generics.where_clause;
    let async_attr = &model.async_attr;

    let methods = bodies.iter().map(|m| {
        let mut sig = m.sig.clone();
        sig.ident = base_ident(m);
        let attrs = &m.attrs;
        let body = &m.body;
        quote! {
            #(#attrs)*
            #sig #body
        }
    });

    quote! {
        #[doc(hidden)]
        #async_attr
        #vis trait #base #decl: #trait_path #where_clause {
            #(#methods)*
        }

        impl<#(#params,)* __X: #trait_path + ?::core::marker::Sized> #base #args for __X
        #where_clause
        {}
    }
}
