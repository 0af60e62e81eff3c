// Trait model for #[proxy]
//
// Parses a trait into the pieces the generators need and rejects the
// signatures a proxy cannot carry through dispatch.

use proc_macro2::{TokenStream, TokenTree};
use quote::{quote, ToTokens};
use syn::visit_mut::{self, VisitMut};
use syn::{
    Attribute, Block, FnArg, GenericParam, Ident, ItemTrait, Lifetime, Pat, Result, ReturnType,
    Signature, TraitBoundModifier, TraitItem, Type, TypeImplTrait, TypeParamBound, TypePath,
    TypeReference,
};

use crate::{base_trait_ident, forwarder_ident, source_ident};

/// How a parameter is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Value,
    Shared,
    Mut,
}

impl Mode {
    pub fn variant(&self) -> Ident {
        let name = match self {
            Mode::Value => "Value",
            Mode::Shared => "Shared",
            Mode::Mut => "Mut",
        };
        Ident::new(name, proc_macro2::Span::call_site())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Get,
    Set,
}

pub struct Param {
    pub name: Ident,
    /// Type as written
    pub ty: Type,
    /// `T` for `&T` / `&mut T`, otherwise the type itself
    pub referent: Type,
    pub mode: Mode,
}

impl Param {
    /// Type stored in the argument container
    pub fn stored(&self) -> TokenStream {
        let referent = &self.referent;
        match self.mode {
            Mode::Value | Mode::Mut => quote!(#referent),
            Mode::Shared => quote!(<#referent as ::interpose::__private::ToOwned>::Owned),
        }
    }

    /// Type name recorded in metadata
    pub fn type_name(&self) -> String {
        self.referent.to_token_stream().to_string()
    }
}

pub struct Method {
    pub index: usize,
    /// Signature as written, patterns included
    pub sig: Signature,
    pub body: Option<Block>,
    /// Attributes carried over to the base copy
    pub attrs: Vec<Attribute>,
    pub params: Vec<Param>,
    /// `None` for unit
    pub ret: Option<Type>,
    pub is_async: bool,
    pub is_static: bool,
    pub skip: bool,
    pub property: Option<(String, AccessorKind)>,
    pub generics: Vec<Ident>,
}

impl Method {
    pub fn ident(&self) -> &Ident {
        &self.sig.ident
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn is_void(&self) -> bool {
        self.ret.is_none()
    }

    pub fn ret_type(&self) -> TokenStream {
        match &self.ret {
            Some(ty) => quote!(#ty),
            None => quote!(()),
        }
    }

    pub fn ret_name(&self) -> String {
        match &self.ret {
            Some(ty) => ty.to_token_stream().to_string(),
            None => "()".to_string(),
        }
    }

    pub fn turbofish(&self) -> TokenStream {
        if self.generics.is_empty() {
            quote!()
        } else {
            let generics = &self.generics;
            quote!(::<#(#generics),*>)
        }
    }

    /// Whether a type refers to one of this method's own generic parameters
    pub fn mentions_generics(&self, ty: &impl ToTokens) -> bool {
        !self.generics.is_empty() && mentions(ty.to_token_stream(), &self.generics)
    }
}

fn mentions(tokens: TokenStream, idents: &[Ident]) -> bool {
    tokens.into_iter().any(|tt| match tt {
        TokenTree::Ident(ident) => idents.contains(&ident),
        TokenTree::Group(group) => mentions(group.stream(), idents),
        _ => false,
    })
}

/// A supertrait that is itself a `#[proxy]` trait
pub struct Parent {
    /// Trait path as written
    pub path: syn::Path,
    pub ident: Ident,
    /// Module path leading to the trait, `::`-terminated, or empty
    prefix: TokenStream,
}

impl Parent {
    fn sibling(&self, name: Ident) -> TokenStream {
        let prefix = &self.prefix;
        quote!(#prefix #name)
    }

    /// Path of the parent's metadata marker
    pub fn source(&self) -> TokenStream {
        self.sibling(source_ident(&self.ident))
    }

    /// Path of the parent's hidden base trait
    pub fn base(&self) -> TokenStream {
        self.sibling(base_trait_ident(&self.ident))
    }

    /// Path of the macro that implements the parent trait for a child proxy
    pub fn forwarder(&self) -> TokenStream {
        self.sibling(forwarder_ident(&self.ident))
    }
}

/// Derivable std traits a proxy cannot implement through dispatch
const STD_TRAITS: &[&str] = &[
    "Clone", "Copy", "Sized", "Default", "Debug", "Display", "PartialEq", "Eq", "PartialOrd",
    "Ord", "Hash", "Any",
];

pub struct TraitModel {
    /// The trait with helper attributes stripped
    pub item: ItemTrait,
    pub async_attr: Option<Attribute>,
    pub methods: Vec<Method>,
    pub is_class: bool,
    pub dyn_compatible: bool,
    pub type_params: Vec<Ident>,
    /// Parent `#[proxy]` traits, in declaration order
    pub parents: Vec<Parent>,
}

impl TraitModel {
    pub fn parse(mut item: ItemTrait) -> Result<Self> {
        if item.unsafety.is_some() {
            return Err(syn::Error::new_spanned(
                &item.unsafety,
                "#[proxy] does not support unsafe traits",
            ));
        }

        let mut type_params = Vec::new();
        for param in &item.generics.params {
            match param {
                GenericParam::Type(tp) => type_params.push(tp.ident.clone()),
                GenericParam::Lifetime(_) => {
                    return Err(syn::Error::new_spanned(
                        param,
                        "#[proxy] does not support lifetime parameters on the trait",
                    ))
                }
                GenericParam::Const(_) => {
                    return Err(syn::Error::new_spanned(
                        param,
                        "#[proxy] does not support const parameters on the trait",
                    ))
                }
            }
        }

        let mut parents = Vec::new();
        for bound in &item.supertraits {
            if !is_marker_bound(bound) {
                parents.push(parse_parent(bound)?);
            }
        }

        let async_attr = item
            .attrs
            .iter()
            .find(|attr| {
                attr.path()
                    .segments
                    .last()
                    .is_some_and(|segment| segment.ident == "async_trait")
            })
            .cloned();

        let mut methods = Vec::new();
        for trait_item in &mut item.items {
            match trait_item {
                TraitItem::Fn(func) => {
                    let (skip, property) = take_helper_attrs(&mut func.attrs)?;
                    let method = parse_method(
                        methods.len(),
                        &func.sig,
                        func.default.clone(),
                        &func.attrs,
                        skip,
                        property,
                        async_attr.is_some(),
                    )?;
                    methods.push(method);
                }
                TraitItem::Type(ty) => {
                    return Err(syn::Error::new_spanned(
                        ty,
                        "#[proxy] does not support associated types",
                    ))
                }
                TraitItem::Const(c) => {
                    return Err(syn::Error::new_spanned(
                        c,
                        "#[proxy] does not support associated consts",
                    ))
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "#[proxy] supports only methods in the trait body",
                    ))
                }
            }
        }

        let is_class = methods.iter().any(Method::has_body);
        let dyn_compatible = methods
            .iter()
            .all(|m| !m.is_static && m.generics.is_empty());

        Ok(Self {
            item,
            async_attr,
            methods,
            is_class,
            dyn_compatible,
            type_params,
            parents,
        })
    }
}

fn is_marker_bound(bound: &TypeParamBound) -> bool {
    match bound {
        TypeParamBound::Lifetime(lifetime) => lifetime.ident == "static",
        TypeParamBound::Trait(tb) => {
            tb.lifetimes.is_none()
                && tb.path.segments.last().is_some_and(|segment| {
                    segment.arguments.is_none()
                        && (segment.ident == "Send" || segment.ident == "Sync")
                })
        }
        _ => false,
    }
}

fn parse_parent(bound: &TypeParamBound) -> Result<Parent> {
    let unsupported = || {
        syn::Error::new_spanned(
            bound,
            "#[proxy] supports only Send, Sync, 'static and other #[proxy] traits as supertraits",
        )
    };
    let TypeParamBound::Trait(tb) = bound else {
        return Err(unsupported());
    };
    if tb.lifetimes.is_some()
        || tb.paren_token.is_some()
        || !matches!(tb.modifier, TraitBoundModifier::None)
    {
        return Err(unsupported());
    }
    if tb.path.segments.iter().any(|segment| !segment.arguments.is_none()) {
        return Err(syn::Error::new_spanned(
            &tb.path,
            "#[proxy] does not support generic parent traits",
        ));
    }

    let Some(last) = tb.path.segments.last() else {
        return Err(unsupported());
    };
    let ident = last.ident.clone();
    if STD_TRAITS.iter().any(|name| ident == *name) {
        return Err(syn::Error::new_spanned(
            &tb.path,
            "parent traits of a #[proxy] trait must themselves be #[proxy] traits",
        ));
    }

    let leading = &tb.path.leading_colon;
    let modules = tb
        .path
        .segments
        .iter()
        .take(tb.path.segments.len() - 1)
        .map(|segment| &segment.ident);
    let prefix = quote!(#leading #(#modules ::)*);

    Ok(Parent {
        path: tb.path.clone(),
        ident,
        prefix,
    })
}

/// Strip `#[proxy(...)]` helper attributes, returning (skip, property)
fn take_helper_attrs(attrs: &mut Vec<Attribute>) -> Result<(bool, bool)> {
    let mut skip = false;
    let mut property = false;
    let mut result = Ok(());

    attrs.retain(|attr| {
        if !attr.path().is_ident("proxy") {
            return true;
        }
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else if meta.path.is_ident("property") {
                property = true;
                Ok(())
            } else {
                Err(meta.error("expected `skip` or `property`"))
            }
        });
        if let Err(e) = parsed {
            result = Err(e);
        }
        false
    });

    result.map(|()| (skip, property))
}

fn parse_method(
    index: usize,
    sig: &Signature,
    body: Option<Block>,
    attrs: &[Attribute],
    skip: bool,
    property: bool,
    has_async_trait: bool,
) -> Result<Method> {
    if sig.constness.is_some() || sig.unsafety.is_some() || sig.abi.is_some() {
        return Err(syn::Error::new_spanned(
            sig,
            "#[proxy] does not support const, unsafe or extern methods",
        ));
    }
    if let Some(variadic) = &sig.variadic {
        return Err(syn::Error::new_spanned(
            variadic,
            "#[proxy] does not support variadic methods",
        ));
    }

    let is_async = sig.asyncness.is_some();
    if is_async && !has_async_trait {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            "async methods need #[async_trait] placed below #[proxy]",
        ));
    }

    let mut generics = Vec::new();
    for param in &sig.generics.params {
        match param {
            GenericParam::Type(tp) => generics.push(tp.ident.clone()),
            GenericParam::Lifetime(_) => {
                return Err(syn::Error::new_spanned(
                    param,
                    "#[proxy] does not support explicit lifetime parameters \
                     (if this came from #[async_trait], place #[proxy] above it)",
                ))
            }
            GenericParam::Const(_) => {
                return Err(syn::Error::new_spanned(
                    param,
                    "#[proxy] does not support const generic methods",
                ))
            }
        }
    }

    let mut is_static = true;
    let mut params = Vec::new();
    for (i, input) in sig.inputs.iter().enumerate() {
        match input {
            FnArg::Receiver(receiver) => {
                if receiver.colon_token.is_some() {
                    return Err(syn::Error::new_spanned(
                        receiver,
                        "#[proxy] does not support typed receivers",
                    ));
                }
                match &receiver.reference {
                    None => {
                        return Err(syn::Error::new_spanned(
                            receiver,
                            "#[proxy] does not support by-value `self`",
                        ))
                    }
                    Some((_, Some(lifetime))) => {
                        return Err(syn::Error::new_spanned(
                            lifetime,
                            "#[proxy] does not support explicit receiver lifetimes",
                        ))
                    }
                    Some((_, None)) => {}
                }
                if receiver.mutability.is_some() {
                    return Err(syn::Error::new_spanned(
                        receiver,
                        "#[proxy] does not support `&mut self`; proxies are shared",
                    ));
                }
                is_static = false;
            }
            FnArg::Typed(pt) => {
                let name = match &*pt.pat {
                    Pat::Ident(pi) if pi.by_ref.is_none() && pi.subpat.is_none() => {
                        pi.ident.clone()
                    }
                    _ => quote::format_ident!("__arg{}", i),
                };
                params.push(parse_param(name, &pt.ty)?);
            }
        }
    }

    let ret = match &sig.output {
        ReturnType::Default => None,
        ReturnType::Type(_, ty) => match &**ty {
            Type::Tuple(tuple) if tuple.elems.is_empty() => None,
            ty => {
                let scan = TypeScan::of(ty);
                if scan.borrowed {
                    return Err(syn::Error::new_spanned(
                        ty,
                        "#[proxy] does not support borrowed return types",
                    ));
                }
                scan.check(ty)?;
                Some(ty.clone())
            }
        },
    };

    let property = if property {
        Some(accessor(sig, &params, ret.is_none())?)
    } else {
        None
    };

    let carried = attrs
        .iter()
        .filter(|attr| !attr.path().is_ident("doc"))
        .cloned()
        .collect();

    Ok(Method {
        index,
        sig: sig.clone(),
        body,
        attrs: carried,
        params,
        ret,
        is_async,
        is_static,
        skip,
        property,
        generics,
    })
}

fn parse_param(name: Ident, ty: &Type) -> Result<Param> {
    if let Type::Reference(reference) = ty {
        if !is_static_lifetime(&reference.lifetime) {
            let referent = (*reference.elem).clone();
            let scan = TypeScan::of(&referent);
            if scan.borrowed {
                return Err(syn::Error::new_spanned(
                    ty,
                    "#[proxy] does not support nested borrowed parameter types",
                ));
            }
            scan.check(&referent)?;
            let mode = if reference.mutability.is_some() {
                Mode::Mut
            } else {
                Mode::Shared
            };
            return Ok(Param {
                name,
                ty: ty.clone(),
                referent,
                mode,
            });
        }
    }

    let scan = TypeScan::of(ty);
    if scan.borrowed {
        return Err(syn::Error::new_spanned(
            ty,
            "#[proxy] does not support nested borrowed parameter types",
        ));
    }
    scan.check(ty)?;
    Ok(Param {
        name,
        ty: ty.clone(),
        referent: ty.clone(),
        mode: Mode::Value,
    })
}

/// Getter: `fn x(&self) -> T`; setter: `fn set_x(&self, value: T)`
fn accessor(sig: &Signature, params: &[Param], is_void: bool) -> Result<(String, AccessorKind)> {
    let name = sig.ident.to_string();
    match (name.strip_prefix("set_"), params.len(), is_void) {
        (Some(property), 1, true) => Ok((property.to_string(), AccessorKind::Set)),
        (_, 0, false) => Ok((name, AccessorKind::Get)),
        _ => Err(syn::Error::new_spanned(
            &sig.ident,
            "property accessors must look like `fn x(&self) -> T` or `fn set_x(&self, value: T)`",
        )),
    }
}

fn is_static_lifetime(lifetime: &Option<Lifetime>) -> bool {
    lifetime.as_ref().is_some_and(|l| l.ident == "static")
}

#[derive(Default)]
struct TypeScan {
    impl_trait: bool,
    self_type: bool,
    borrowed: bool,
}

impl TypeScan {
    fn of(ty: &Type) -> Self {
        let mut scan = TypeScan::default();
        scan.visit_type_mut(&mut ty.clone());
        scan
    }

    fn check(&self, ty: &Type) -> Result<()> {
        if self.impl_trait {
            return Err(syn::Error::new_spanned(
                ty,
                "#[proxy] does not support `impl Trait` in member signatures",
            ));
        }
        if self.self_type {
            return Err(syn::Error::new_spanned(
                ty,
                "#[proxy] does not support `Self` in member signatures",
            ));
        }
        Ok(())
    }
}

impl VisitMut for TypeScan {
    fn visit_type_impl_trait_mut(&mut self, node: &mut TypeImplTrait) {
        self.impl_trait = true;
        visit_mut::visit_type_impl_trait_mut(self, node);
    }

    fn visit_type_path_mut(&mut self, node: &mut TypePath) {
        if node.qself.is_none()
            && node
                .path
                .segments
                .first()
                .is_some_and(|segment| segment.ident == "Self")
        {
            self.self_type = true;
        }
        visit_mut::visit_type_path_mut(self, node);
    }

    fn visit_type_reference_mut(&mut self, node: &mut TypeReference) {
        if !is_static_lifetime(&node.lifetime) {
            self.borrowed = true;
        }
        visit_mut::visit_type_reference_mut(self, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_class_detection() {
        let item: ItemTrait = parse_quote! {
            trait Calc {
                fn sum(&self, a: i32, b: i32) -> i32 { a + b }
                fn name(&self) -> String;
            }
        };
        let model = TraitModel::parse(item).unwrap();
        assert!(model.is_class);
        assert!(model.dyn_compatible);
        assert!(model.methods[0].has_body());
        assert!(!model.methods[1].has_body());
    }

    #[test]
    fn test_param_modes() {
        let item: ItemTrait = parse_quote! {
            trait Swap {
                fn swap(&self, a: &mut String, b: &str, c: u8, d: &'static str);
            }
        };
        let model = TraitModel::parse(item).unwrap();
        let modes: Vec<_> = model.methods[0].params.iter().map(|p| p.mode).collect();
        assert_eq!(modes, vec![Mode::Mut, Mode::Shared, Mode::Value, Mode::Value]);
        assert_eq!(model.methods[0].params[1].type_name(), "str");
        assert!(model.methods[0].is_void());
    }

    #[test]
    fn test_helper_attributes() {
        let item: ItemTrait = parse_quote! {
            trait Settings {
                #[proxy(property)]
                fn precision(&self) -> u8;
                #[proxy(property)]
                fn set_precision(&self, value: u8);
                #[proxy(skip)]
                fn reset(&self) {}
            }
        };
        let model = TraitModel::parse(item).unwrap();
        assert_eq!(
            model.methods[0].property,
            Some(("precision".to_string(), AccessorKind::Get))
        );
        assert_eq!(
            model.methods[1].property,
            Some(("precision".to_string(), AccessorKind::Set))
        );
        assert!(model.methods[2].skip);

        let TraitItem::Fn(func) = &model.item.items[0] else {
            panic!("expected a method");
        };
        assert!(func.attrs.is_empty());
    }

    #[test]
    fn test_generic_method_is_not_dyn_compatible() {
        let item: ItemTrait = parse_quote! {
            trait Store {
                fn echo<U: Clone + Default + Send + 'static>(&self, value: U) -> U;
            }
        };
        let model = TraitModel::parse(item).unwrap();
        assert!(!model.dyn_compatible);
        let method = &model.methods[0];
        assert!(method.mentions_generics(&method.params[0].ty));
    }

    #[test]
    fn test_parent_traits() {
        let item: ItemTrait = parse_quote! {
            trait Greeter: Named + crate::people::Aged + Send + Sync + 'static {
                fn greet(&self) -> String;
            }
        };
        let model = TraitModel::parse(item).unwrap();
        let parents: Vec<_> = model.parents.iter().map(|p| p.ident.to_string()).collect();
        assert_eq!(parents, vec!["Named", "Aged"]);
        assert_eq!(model.parents[0].source().to_string(), "NamedSource");
        assert_eq!(
            model.parents[1].forwarder().to_string(),
            "crate :: people :: __interpose_inherit_Aged"
        );
        assert_eq!(model.parents[1].base().to_string(), "crate :: people :: __AgedBase");
    }

    fn rejects(item: ItemTrait, needle: &str) {
        let err = TraitModel::parse(item).err().expect("expected a compile error");
        assert!(err.to_string().contains(needle), "{}", err);
    }

    #[test]
    fn test_rejected_signatures() {
        rejects(
            parse_quote!(trait A { fn f(&self) -> &str; }),
            "borrowed return types",
        );
        rejects(
            parse_quote!(trait A { fn f(&self, x: impl Into<String>); }),
            "`impl Trait`",
        );
        rejects(parse_quote!(trait A { fn f(self); }), "by-value `self`");
        rejects(parse_quote!(trait A { fn f(&mut self); }), "`&mut self`");
        rejects(parse_quote!(trait A { fn f(&self) -> Self; }), "`Self`");
        rejects(parse_quote!(trait A { type Item; }), "associated types");
        rejects(parse_quote!(trait A: Clone {}), "must themselves be #[proxy] traits");
        rejects(parse_quote!(trait A: Store<u8> {}), "generic parent traits");
        rejects(parse_quote!(trait A: ?Sized {}), "supertraits");
        rejects(parse_quote!(trait A { async fn f(&self); }), "#[async_trait]");
        rejects(
            parse_quote!(trait A { #[proxy(property)] fn f(&self, a: u8, b: u8); }),
            "property accessors",
        );
    }
}
