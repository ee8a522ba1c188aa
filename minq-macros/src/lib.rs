#[warn(clippy::pedantic)]
#[allow(clippy::too_many_lines)]
mod derive_document;
mod derive_embedded;
mod prelude;
mod utils;

fn expand<F: FnOnce(proc_macro2::TokenStream) -> syn::Result<proc_macro2::TokenStream>>(
    fun: F,
    input: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    fun(input.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[proc_macro_derive(Document, attributes(document, minq))]
pub fn document(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    expand(derive_document::derive_document, input)
}

#[proc_macro_derive(Embedded, attributes(minq))]
pub fn embedded(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    expand(derive_embedded::derive_embedded, input)
}
