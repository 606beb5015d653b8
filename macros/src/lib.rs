//! Procedural macros for on-device TAP tests in wifi-provisioner-esp32.
//!
//! Provides `#[tap_test]`, which registers a function with the crate's
//! `testing` harness so the `device-tests` binary can run it on hardware
//! and report results in TAP format over the serial console.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType};

/// Register a function as a TAP test.
///
/// The test may return `()` (a panic is a failure) or a `Result` (an `Err`
/// is a failure).
///
/// ```ignore
/// use wifi_provisioner_esp32_macros::tap_test;
///
/// #[tap_test]
/// fn nvs_opens() {
///     assert!(NvsCredentialStore::open().is_ok());
/// }
///
/// #[tap_test(should_panic = "capacity")]
/// fn zero_capacity_rejected() {
///     PrepareWriteBuffer::new(0);
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let expectation = if attr.is_empty() {
        Expectation::Pass
    } else {
        match syn::parse::<Meta>(attr) {
            Ok(meta) => match parse_expectation(&meta) {
                Ok(e) => e,
                Err(err) => return err.to_compile_error().into(),
            },
            Err(err) => return err.to_compile_error().into(),
        }
    };

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(_, _));

    let register_call = match expectation {
        Expectation::Pass if returns_result => quote! {
            runner.run(#fn_name_str, #fn_name);
        },
        Expectation::Pass => quote! {
            runner.run_assert(#fn_name_str, #fn_name);
        },
        Expectation::Panic(None) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, None);
        },
        Expectation::Panic(Some(msg)) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg));
        },
    };

    let expanded = quote! {
        #input_fn

        ::inventory::submit! {
            ::wifi_provisioner_esp32::testing::TapTestEntry::new(
                #fn_name_str,
                |runner: &mut ::wifi_provisioner_esp32::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum Expectation {
    Pass,
    Panic(Option<String>),
}

fn parse_expectation(meta: &Meta) -> Result<Expectation, syn::Error> {
    match meta {
        Meta::Path(path) if path.is_ident("should_panic") => Ok(Expectation::Panic(None)),
        Meta::NameValue(nv) if nv.path.is_ident("should_panic") => match &nv.value {
            Expr::Lit(ExprLit {
                lit: Lit::Str(s), ..
            }) => Ok(Expectation::Panic(Some(s.value()))),
            other => Err(syn::Error::new_spanned(
                other,
                "tap_test: should_panic expects a string literal",
            )),
        },
        _ => Err(syn::Error::new(
            Span::call_site(),
            "tap_test: supported forms are #[tap_test], #[tap_test(should_panic)] \
             and #[tap_test(should_panic = \"message\")]",
        )),
    }
}
