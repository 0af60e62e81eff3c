// interpose-macros: build-time proxy synthesis
//
// Provides the #[proxy] attribute, which turns a trait into:
// - the trait itself (helper attributes stripped)
// - `<Trait>Source`, its metadata and the dispatch plan computed here
// - `<Trait>Proxy<T, S>`, the proxy type implementing the trait
//
// Example:
// ```
// use interpose::{proxy, InvocationHandler};
//
// #[proxy]
// pub trait Greeter {
//     fn greet(&self, name: String) -> String;
// }
//
// let greeter: Arc<GreeterProxy> = GreeterProxy::new(InvocationHandler::passthrough())?;
// ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, GenericParam, Ident, ItemTrait, WherePredicate};

mod base;
mod inherit;
mod metadata;
mod model;
mod proxy;

use model::TraitModel;

/// Generates an interception proxy for a trait.
///
/// For `trait Calc`, generates `CalcProxy<T, S>` implementing `Calc`, where
/// `T` is the target type (defaults to `dyn Calc + Send + Sync` when the
/// trait is dyn-compatible) and `S` the synthesis strategy (`Eager` by
/// default, or `Lazy`). Construct with `CalcProxy::new(handler)` or
/// `CalcProxy::with_target(target, handler)`.
///
/// A trait with at least one provided method body is treated like a class:
/// without a target, proceeding runs the provided body. Otherwise it is an
/// interface and proceeding yields `Default::default()`.
///
/// Method attributes:
/// - `#[proxy(skip)]`: never intercepted; calls go straight through
/// - `#[proxy(property)]`: marks a getter `fn x(&self) -> T` or a setter
///   `fn set_x(&self, value: T)`
///
/// Async methods need `#[async_trait]` placed below `#[proxy]`.
///
/// Supertraits other than `Send`, `Sync` and `'static` must themselves be
/// non-generic `#[proxy]` traits declared in the same crate; the proxy then
/// implements them too and their members dispatch through the same handler.
/// Only one level of inheritance is supported.
///
/// By-value and `&mut` parameter types must be `Clone + Send + 'static`
/// (`&T` parameters need an owned form that is), and return types must be
/// `Default + Send + 'static`, since a handler may proceed any number of
/// times and may skip proceeding entirely.
///
/// # Example
///
/// ```ignore
/// #[proxy]
/// pub trait Calc {
///     fn sum(&self, a: i32, b: i32) -> i32 {
///         a + b
///     }
///
///     #[proxy(property)]
///     fn precision(&self) -> u8;
/// }
/// ```
#[proc_macro_attribute]
pub fn proxy(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[proxy] takes no arguments on a trait",
        )
        .to_compile_error()
        .into();
    }

    let input = parse_macro_input!(item as ItemTrait);
    proxy::expand_proxy(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

pub(crate) fn source_ident(trait_ident: &Ident) -> Ident {
    format_ident!("{}Source", trait_ident)
}

pub(crate) fn base_trait_ident(trait_ident: &Ident) -> Ident {
    format_ident!("__{}Base", trait_ident)
}

pub(crate) fn forwarder_ident(trait_ident: &Ident) -> Ident {
    format_ident!("__interpose_inherit_{}", trait_ident)
}

/// Generated item names and the trait's generics in the forms the
/// generators splice in
pub(crate) struct Names {
    pub proxy: Ident,
    pub source: Ident,
    pub base: Ident,
    /// Macro implementing the trait for a child trait's proxy
    pub forwarder: Ident,
    /// Trait generic parameters with bounds, defaults removed
    pub generic_params: Vec<GenericParam>,
    trait_ident: Ident,
    type_params: Vec<Ident>,
    predicates: Vec<WherePredicate>,
}

impl Names {
    pub fn new(model: &TraitModel) -> Self {
        let ident = &model.item.ident;
        let generic_params = model
            .item
            .generics
            .params
            .iter()
            .cloned()
            .map(|mut param| {
                if let GenericParam::Type(tp) = &mut param {
                    tp.eq_token = None;
                    tp.default = None;
                }
                param
            })
            .collect();
        let predicates = model
            .item
            .generics
            .where_clause
            .as_ref()
            .map(|wc| wc.predicates.iter().cloned().collect())
            .unwrap_or_default();

        Self {
            proxy: format_ident!("{}Proxy", ident),
            source: source_ident(ident),
            base: base_trait_ident(ident),
            forwarder: forwarder_ident(ident),
            generic_params,
            trait_ident: ident.clone(),
            type_params: model.type_params.clone(),
            predicates,
        }
    }

    /// `<T, U>`, or nothing
    pub fn generic_args(&self) -> TokenStream2 {
        if self.type_params.is_empty() {
            quote!()
        } else {
            let params = &self.type_params;
            quote!(<#(#params),*>)
        }
    }

    /// `<T: Bound, U>`, or nothing
    pub fn generic_decl(&self) -> TokenStream2 {
        if self.generic_params.is_empty() {
            quote!()
        } else {
            let params = &self.generic_params;
            quote!(<#(#params),*>)
        }
    }

    /// `Trait<T, U>`
    pub fn trait_path(&self) -> TokenStream2 {
        let ident = &self.trait_ident;
        let args = self.generic_args();
        quote!(#ident #args)
    }

    /// The trait's own where-clause predicates
    pub fn where_predicates(&self) -> &[WherePredicate] {
        &self.predicates
    }
}
