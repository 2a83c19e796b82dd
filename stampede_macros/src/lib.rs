//! Attribute macros turning plain `async fn`s into stampede actions and hooks.
use proc_macro::TokenStream;
use proc_macro2::{Ident, Span};
use quote::quote;
use syn::{ItemFn, parse_macro_input};

extern crate proc_macro;

/// `snake_case` function name to the `CamelCase` name of its unit struct.
fn struct_name(fn_name: &Ident) -> Ident {
    let camel: String = fn_name
        .to_string()
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    Ident::new(&camel, Span::call_site())
}

fn require_async(item: &ItemFn) -> Result<(), syn::Error> {
    if item.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            item.sig.fn_token,
            "expected an `async fn`",
        ));
    }
    if item.sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &item.sig.inputs,
            "expected exactly one argument: `&mut UserContext`",
        ));
    }
    Ok(())
}

/// Declares an action from `async fn name(ctx: &mut UserContext) -> ActionResult`.
///
/// The function stays as written; next to it comes a unit struct named after
/// it in `CamelCase` that implements `Action` by calling it:
///
/// ```ignore
/// #[action]
/// async fn health_check(ctx: &mut UserContext) -> ActionResult {
///     ctx.request("/health", Request::get("/health")).send().await;
///     Ok(Step::Completed)
/// }
///
/// UserClass::new("citizen").weighted("health", 1, HealthCheck);
/// ```
#[proc_macro_attribute]
pub fn action(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    if let Err(err) = require_async(&item) {
        return err.to_compile_error().into();
    }
    let vis = &item.vis;
    let fn_name = &item.sig.ident;
    let struct_name = struct_name(fn_name);

    let expanded = quote! {
        #item

        #[derive(Debug, Clone, Copy, Default)]
        #vis struct #struct_name;

        #[::stampede::async_trait]
        impl ::stampede::Action for #struct_name {
            async fn execute(
                &self,
                ctx: &mut ::stampede::UserContext,
            ) -> ::stampede::ActionResult {
                #fn_name(ctx).await
            }
        }
    };
    TokenStream::from(expanded)
}

/// Declares a start or stop hook from
/// `async fn name(ctx: &mut UserContext) -> Result<(), ActionError>`, the same
/// way [`macro@action`] declares actions.
#[proc_macro_attribute]
pub fn hook(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    if let Err(err) = require_async(&item) {
        return err.to_compile_error().into();
    }
    let vis = &item.vis;
    let fn_name = &item.sig.ident;
    let struct_name = struct_name(fn_name);

    let expanded = quote! {
        #item

        #[derive(Debug, Clone, Copy, Default)]
        #vis struct #struct_name;

        #[::stampede::async_trait]
        impl ::stampede::Hook for #struct_name {
            async fn run(
                &self,
                ctx: &mut ::stampede::UserContext,
            ) -> ::std::result::Result<(), ::stampede::ActionError> {
                #fn_name(ctx).await
            }
        }
    };
    TokenStream::from(expanded)
}
