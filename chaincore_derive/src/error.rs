//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations
//! from `#[error("...")]` attributes, replacing the `thiserror` crate.
//!
//! ```ignore
//! #[derive(Debug, Error)]
//! pub enum LedgerError {
//!     #[error("output not found: {0}")]
//!     MissingOutput(String),
//!
//!     #[error("value mismatch: spent {spent}, created {created}")]
//!     ValueMismatch { spent: u64, created: u64 },
//! }
//! ```
//!
//! Tuple fields interpolate positionally (`{0}`, `{1}`), named fields by
//! name (`{field}`).

use proc_macro::TokenStream;
use quote::{quote, ToTokens};
use syn::{parse_macro_input, Data, DeriveInput, Fields, Lit, Meta};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let display_body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let ident = &variant.ident;
                    let message = message_from_attrs(
                        &variant.attrs,
                        ident,
                        &format!("variant `{}`", ident),
                    )?;

                    Ok(match &variant.fields {
                        Fields::Unit => quote! {
                            Self::#ident => write!(f, #message),
                        },
                        Fields::Unnamed(fields) => {
                            let binds: Vec<_> = (0..fields.unnamed.len())
                                .map(|i| quote::format_ident!("f{}", i))
                                .collect();
                            let message = positional_to_named(&message, binds.len());
                            quote! {
                                Self::#ident(#(#binds),*) =>
                                    write!(f, #message, #(#binds = #binds),*),
                            }
                        }
                        Fields::Named(fields) => {
                            let binds: Vec<_> =
                                fields.named.iter().map(|f| &f.ident).collect();
                            quote! {
                                Self::#ident { #(#binds),* } =>
                                    write!(f, #message, #(#binds = #binds),*),
                            }
                        }
                    })
                })
                .collect::<syn::Result<Vec<_>>>()?;

            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data) => {
            let message =
                message_from_attrs(&input.attrs, name, &format!("type `{}`", name))?;

            match &data.fields {
                Fields::Unit => quote! { write!(f, #message) },
                Fields::Named(fields) => {
                    let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                    quote! { write!(f, #message, #(#names = self.#names),*) }
                }
                Fields::Unnamed(fields) => {
                    let binds: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| quote::format_ident!("f{}", i))
                        .collect();
                    let indices: Vec<_> =
                        (0..fields.unnamed.len()).map(syn::Index::from).collect();
                    let message = positional_to_named(&message, binds.len());
                    quote! { write!(f, #message, #(#binds = self.#indices),*) }
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Extracts the string from an `#[error("...")]` attribute.
fn message_from_attrs<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }

        if let Meta::List(list) = &attr.meta {
            if let Ok(Lit::Str(lit)) = syn::parse2::<Lit>(list.tokens.clone()) {
                return Ok(lit.value());
            }
        }

        return Err(syn::Error::new_spanned(
            &attr.meta,
            "invalid #[error] attribute: expected #[error(\"message\")] with a string literal",
        ));
    }

    Err(syn::Error::new_spanned(
        target,
        format!("missing #[error(\"...\")] attribute on {target_desc}"),
    ))
}

/// Rewrites positional format args `{0}` as named args `{f0}` so tuple
/// fields can be bound by identifier in the generated match arms.
fn positional_to_named(message: &str, field_count: usize) -> String {
    let mut out = message.to_string();
    for i in (0..field_count).rev() {
        out = out.replace(&format!("{{{i}}}"), &format!("{{f{i}}}"));
    }
    out
}
