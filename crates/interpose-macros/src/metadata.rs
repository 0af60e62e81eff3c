// Source metadata and the build-time dispatch plan
//
// Both describe the trait's methods in declaration order, followed by each
// parent trait's members. The lazy strategy synthesizes from `source_type()`,
// the eager one binds `eager_plan()`; the plan below applies the same rules
// the runtime synthesizer does.

use proc_macro2::TokenStream;
use quote::quote;

use crate::model::{AccessorKind, Method, TraitModel};
use crate::Names;

/// Expands the metadata marker type and its `ProxySource` impl
pub fn expand_source(model: &TraitModel, names: &Names) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let vis = &model.item.vis;
    let source = &names.source;
    let type_params = &model.type_params;
    let args = names.generic_args();
    let trait_name = model.item.ident.to_string();
    let doc = format!("Proxy metadata for [`{}`]", trait_name);

    let kind = if model.is_class {
        quote!(class)
    } else {
        quote!(interface)
    };
    let generic_names = type_params.iter().map(|p| p.to_string());
    let members = model.methods.iter().map(member_decl);
    let plans = model.methods.iter().map(|m| entry_plan(model, m));
    let own = model.methods.len();
    let parents: Vec<_> = model.parents.iter().map(|p| p.source()).collect();

    let marker = if type_params.is_empty() {
        quote! {
            #[doc = #doc]
            #[allow(dead_code)]
            #vis struct #source;
        }
    } else {
        quote! {
            #[doc = #doc]
            #[allow(dead_code)]
            #vis struct #source #args(#rt::PhantomData<fn() -> (#(#type_params,)*)>);
        }
    };

    quote! {
        #marker

        impl<#(#type_params: 'static),*> #rt::ProxySource for #source #args {
            const MEMBERS: usize = #own #(+ <#parents as #rt::ProxySource>::MEMBERS)*;

            fn source_type() -> #rt::SourceType {
                #rt::SourceType::#kind(#trait_name)
                    #(.generic(#generic_names))*
                    #(.member(#members))*
                    #(.parent(<#parents as #rt::ProxySource>::source_type()))*
            }

            fn eager_plan() -> #rt::Vec<#rt::EntryPlan> {
                #[allow(unused_mut)]
                let mut plan = #rt::Vec::from([#(#plans),*]);
                #(plan.extend(<#parents as #rt::ProxySource>::eager_plan());)*
                plan
            }
        }
    }
}

fn member_decl(method: &Method) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let name = method.ident().to_string();
    let ret = method.ret_name();

    let params = method.params.iter().map(|p| {
        let pname = p.name.to_string();
        let ty = p.type_name();
        let mode = p.mode.variant();
        quote!(.param(#pname, #ty, #rt::ParamMode::#mode))
    });
    let generics = method.generics.iter().map(|g| {
        let g = g.to_string();
        quote!(.generic(#g))
    });

    let mut modifiers = Vec::new();
    if method.is_async {
        modifiers.push(quote!(.asynchronous()));
    }
    if !method.has_body() {
        modifiers.push(quote!(.abstract_member()));
    }
    if method.is_static {
        modifiers.push(quote!(.static_member()));
    }
    if method.skip {
        modifiers.push(quote!(.sealed()));
    }
    if let Some((property, accessor)) = &method.property {
        let accessor = match accessor {
            AccessorKind::Get => quote!(Get),
            AccessorKind::Set => quote!(Set),
        };
        modifiers.push(quote!(.property(#property, #rt::Accessor::#accessor)));
    }

    quote! {
        #rt::MemberDecl::method(#name)
            #(#params)*
            #(#generics)*
            .returns(#ret)
            #(#modifiers)*
    }
}

fn entry_plan(model: &TraitModel, method: &Method) -> TokenStream {
    let rt = quote!(::interpose::__private);
    let name = method.ident().to_string();
    let arity = method.generics.len();

    let params = method.params.iter().map(|p| {
        let ty = p.type_name();
        let mode = p.mode.variant();
        quote!(.param(#ty, #rt::ParamMode::#mode))
    });

    let fallback = if model.is_class && method.has_body() {
        quote!(Base)
    } else {
        quote!(Default)
    };

    let flags = match (method.is_void(), method.is_async) {
        (false, false) => quote!(#rt::InvocationFlags::NONE),
        (true, false) => quote!(#rt::InvocationFlags::VOID),
        (false, true) => quote!(#rt::InvocationFlags::ASYNC),
        (true, true) => quote!(#rt::InvocationFlags::VOID | #rt::InvocationFlags::ASYNC),
    };

    let intercepted = !method.is_static && !method.skip;

    quote! {
        #rt::EntryPlan {
            signature: #rt::MemberSignature::new(#name)
                #(#params)*
                .generics(#arity),
            fallback: #rt::Fallback::#fallback,
            flags: #flags,
            intercepted: #intercepted,
        }
    }
}
