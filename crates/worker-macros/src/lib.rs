#![deny(unsafe_code)]

//! Procedural macros for the aiVLE runner worker.
//!
//! - `#[derive(Redact)]` — auto-redact sensitive fields in `Debug` output.

extern crate proc_macro;

mod redact;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// Derive macro for redacting sensitive fields in `Debug` output.
///
/// Fields annotated with `#[redact]` display as `[REDACTED]` in the
/// generated `Debug` implementation.
///
/// # Example
///
/// ```ignore
/// use worker_macros::Redact;
///
/// #[derive(Redact)]
/// struct Credentials {
///     pub username: String,
///     #[redact]
///     pub password: String,
/// }
/// ```
#[proc_macro_derive(Redact, attributes(redact))]
pub fn derive_redact(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match redact::expand(input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}
