//! Expansion logic for `#[derive(Error)]`.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr};

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match try_expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn try_expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let variants = match &input.data {
        Data::Enum(e) => &e.variants,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive only supports enums",
            ))
        }
    };

    let mut display_arms = Vec::new();
    let mut from_impls = Vec::new();

    for variant in variants {
        let ident = &variant.ident;
        let message = error_message(variant)?;

        match &variant.fields {
            Fields::Unit => display_arms.push(quote! {
                Self::#ident => write!(f, #message),
            }),
            Fields::Unnamed(fields) => {
                let binds: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| format_ident!("f{}", i))
                    .collect();
                let fmt = positional_to_named(&message, fields.unnamed.len());
                display_arms.push(quote! {
                    Self::#ident(#(#binds),*) => write!(f, #fmt, #(#binds = #binds),*),
                });
                if let Some(field) = from_field(variant)? {
                    let ty = &field.ty;
                    from_impls.push(quote! {
                        impl ::std::convert::From<#ty> for #name {
                            fn from(source: #ty) -> Self {
                                Self::#ident(source)
                            }
                        }
                    });
                }
            }
            Fields::Named(fields) => {
                let binds: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                display_arms.push(quote! {
                    Self::#ident { #(#binds),* } => write!(f, #message, #(#binds = #binds),*),
                });
            }
        }
    }

    Ok(quote! {
        impl ::std::fmt::Display for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#display_arms)*
                }
            }
        }

        impl ::std::error::Error for #name {}

        #(#from_impls)*
    })
}

/// Pulls the message out of a variant's `#[error("...")]` attribute.
fn error_message(variant: &syn::Variant) -> syn::Result<String> {
    for attr in &variant.attrs {
        if attr.path().is_ident("error") {
            let lit: LitStr = attr.parse_args()?;
            return Ok(lit.value());
        }
    }
    Err(syn::Error::new_spanned(
        variant,
        format!("variant `{}` is missing #[error(\"...\")]", variant.ident),
    ))
}

/// Finds the tuple field marked `#[from]`, if any. Only single-field tuple
/// variants may use it.
fn from_field(variant: &syn::Variant) -> syn::Result<Option<&syn::Field>> {
    let fields = match &variant.fields {
        Fields::Unnamed(f) => &f.unnamed,
        _ => return Ok(None),
    };
    for field in fields {
        if field.attrs.iter().any(|a| a.path().is_ident("from")) {
            if fields.len() != 1 {
                return Err(syn::Error::new_spanned(
                    variant,
                    "#[from] requires exactly one field",
                ));
            }
            return Ok(Some(field));
        }
    }
    Ok(None)
}

/// Rewrites `{0}`-style positions to the `{f0}` names used by the match binds.
fn positional_to_named(fmt: &str, count: usize) -> String {
    let mut out = fmt.to_string();
    for i in (0..count).rev() {
        out = out.replace(&format!("{{{}}}", i), &format!("{{f{}}}", i));
        out = out.replace(&format!("{{{}:", i), &format!("{{f{}:", i));
    }
    out
}
