//! Derive macro for di-registry option structs.
//!
//! `#[derive(Options)]` generates `Options::bind` from `#[flag(...)]` field
//! attributes, so an option struct declares its flags next to its fields:
//!
//! ```rust,ignore
//! use di_registry::Options;
//! use std::time::Duration;
//!
//! #[derive(Clone, Default, Options)]
//! struct ServerOptions {
//!     #[flag(default = "8080", usage = "listen port")]
//!     port: u16,
//!     #[flag(name = "read-timeout", default = "5s")]
//!     timeout: Duration,
//!     #[flag(required, usage = "public hostname")]
//!     host_name: String,
//!     #[flag(nested, name = "tls", usage = "tls ")]
//!     tls: TlsOptions,
//!     // no #[flag]: not bound
//!     request_count: u64,
//! }
//! ```
//!
//! The struct above binds `port`, `read-timeout`, `host-name` and every flag
//! of `TlsOptions` as `tls-<name>`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input};

/// Derive `di_registry::flag::Options` for a struct with named fields.
///
/// # Attributes
///
/// - `#[flag]` - bind the field under its identifier, lower-cased with `_`
///   turned into `-`
/// - `#[flag(name = "...")]` - explicit flag name
/// - `#[flag(default = "...")]` - literal applied at registration while the
///   field holds its zero value
/// - `#[flag(usage = "...")]` - help text
/// - `#[flag(required)]` - validation fails while the field is zero
/// - `#[flag(text)]` - parse with `FromStr`, render with `Display`
/// - `#[flag(var)]` - the field type implements `di_registry::flag::Value`
/// - `#[flag(nested)]` - a nested option struct, or `Option<Box<_>>` of one;
///   without a name its flags flatten into the parent
///
/// Fields without `#[flag]` are left alone.
#[proc_macro_derive(Options, attributes(flag))]
pub fn derive_options(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_options(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_options(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Options can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Options can only be derived for structs",
            ));
        }
    };

    let mut calls = Vec::new();
    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let Some(attr) = parse_flag_attr(&field.attrs)? else {
            continue;
        };
        calls.push(bind_call(ident, &field.ty, attr));
    }

    Ok(quote! {
        impl #impl_generics ::di_registry::flag::Options for #name #ty_generics #where_clause {
            fn bind<__R: ::core::marker::Send + ::core::marker::Sync + 'static>(
                binder: &mut ::di_registry::flag::Binder<'_, __R, Self>,
            ) -> ::di_registry::Result<()> {
                #(#calls)*
                ::core::result::Result::Ok(())
            }
        }
    })
}

// =============================================================================
// #[flag(...)] parsing
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Field,
    Text,
    Var,
    Nested,
}

struct FlagAttr {
    name: Option<LitStr>,
    default: Option<LitStr>,
    usage: Option<LitStr>,
    required: bool,
    kind: Kind,
    span: proc_macro2::Span,
}

fn parse_flag_attr(attrs: &[Attribute]) -> syn::Result<Option<FlagAttr>> {
    let Some(attr) = attrs.iter().find(|a| a.path().is_ident("flag")) else {
        return Ok(None);
    };

    let mut parsed = FlagAttr {
        name: None,
        default: None,
        usage: None,
        required: false,
        kind: Kind::Field,
        span: proc_macro2::Span::call_site(),
    };
    if attr.meta.require_path_only().is_ok() {
        return Ok(Some(parsed));
    }

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("name") {
            parsed.name = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("default") {
            parsed.default = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("usage") {
            parsed.usage = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("required") {
            parsed.required = true;
        } else if let Some(kind) = kind_of(&meta.path) {
            if parsed.kind != Kind::Field {
                return Err(meta.error("only one of `text`, `var` and `nested` is allowed"));
            }
            parsed.kind = kind;
            parsed.span = meta.path.span();
        } else {
            return Err(meta.error(
                "expected `name`, `default`, `usage`, `required`, `text`, `var` or `nested`",
            ));
        }
        Ok(())
    })?;

    if parsed.kind == Kind::Nested && (parsed.default.is_some() || parsed.required) {
        return Err(syn::Error::new(
            parsed.span,
            "`default` and `required` apply to leaf flags, not nested structs",
        ));
    }
    Ok(Some(parsed))
}

fn kind_of(path: &syn::Path) -> Option<Kind> {
    if path.is_ident("text") {
        Some(Kind::Text)
    } else if path.is_ident("var") {
        Some(Kind::Var)
    } else if path.is_ident("nested") {
        Some(Kind::Nested)
    } else {
        None
    }
}

// =============================================================================
// Code generation
// =============================================================================

fn bind_call(ident: &Ident, ty: &Type, attr: FlagAttr) -> TokenStream2 {
    let name = match (&attr.name, attr.kind) {
        (Some(name), _) => name.value(),
        (None, Kind::Nested) => String::new(),
        (None, _) => flag_name(ident),
    };

    let mut spec = quote! { ::di_registry::flag::FlagSpec::new(#name) };
    if let Some(default) = &attr.default {
        spec = quote! { #spec.default_value(#default) };
    }
    if let Some(usage) = &attr.usage {
        spec = quote! { #spec.usage(#usage) };
    }
    if attr.required {
        spec = quote! { #spec.required() };
    }

    let method = match attr.kind {
        Kind::Field => quote! { field },
        Kind::Text => quote! { text },
        Kind::Var => quote! { var },
        Kind::Nested if option_box_inner(ty).is_some() => quote! { nested_boxed },
        Kind::Nested => quote! { nested },
    };

    quote! {
        binder.#method(#spec, |o| &mut o.#ident)?;
    }
}

/// `max_idle_conns` -> `max-idle-conns`.
fn flag_name(ident: &Ident) -> String {
    let raw = ident.to_string();
    raw.strip_prefix("r#")
        .unwrap_or(&raw)
        .to_lowercase()
        .replace('_', "-")
}

/// `T` from `Option<Box<T>>`.
fn option_box_inner(ty: &Type) -> Option<&Type> {
    let option = generic_arg(ty, "Option")?;
    generic_arg(option, "Box")
}

fn generic_arg<'t>(ty: &'t Type, wrapper: &str) -> Option<&'t Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}
