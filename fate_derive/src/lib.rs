//! Derive macros for the fate crate.
//!
//! Provides `#[derive(Error)]`, which generates `Display`, `std::error::Error`
//! and `From` implementations for error enums.

mod error;

use proc_macro::TokenStream;

/// Implements `Display` and `Error` for an error enum.
///
/// Every variant must carry an `#[error("...")]` attribute giving its display
/// message; `{0}`/`{1}` interpolate tuple fields and `{name}` interpolates
/// named fields. A single tuple field marked `#[from]` additionally generates
/// a `From<FieldType>` impl for the enum.
#[proc_macro_derive(Error, attributes(error, from))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::expand(input)
}
