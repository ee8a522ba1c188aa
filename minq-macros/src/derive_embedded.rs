use crate::{
    prelude::*,
    utils::{build_field_scan, build_fields_enum, extract_named_fields, parse_field_configs},
};

pub fn derive_embedded(item: TokenStream) -> Result<TokenStream> {
    let input = parse2::<DeriveInput>(item)?;

    let fields_named = extract_named_fields(input.span(), input.data)?;
    let configs = parse_field_configs(fields_named.named.iter())?;

    let krate = krate();
    let ident = &input.ident;
    let vis = &input.vis;
    let mod_ident = Ident::new(&ident.to_string().to_snake_case(), Span::call_site());

    let fields_enum = build_fields_enum(&krate, ident, &configs);
    let field_scan = build_field_scan(&krate, ident, &configs);

    Ok(quote! {
        #vis mod #mod_ident {
            use super::*;

            impl #krate::Embedded for #ident {}

            #field_scan

            #fields_enum
        }
    })
}
