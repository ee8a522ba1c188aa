use crate::{
    prelude::*,
    utils::{
        FieldConfig, build_field_scan, build_fields_enum, extract_named_fields,
        extract_serde_rename, parse_field_configs,
    },
};

#[derive(FromAttributes)]
#[darling(attributes(document))]
struct Attributes {
    collection: String,
    #[darling(default)]
    projections: HashMap<Ident, PathList>,
}

pub fn derive_document(item: TokenStream) -> Result<TokenStream> {
    let input = parse2::<DeriveInput>(item)?;

    let attributes = Attributes::from_attributes(&input.attrs)?;

    if attributes.collection.is_empty() {
        return Err(Error::new(
            input.ident.span(),
            "collection name must not be empty",
        ));
    }

    let fields_named = extract_named_fields(input.span(), input.data)?;

    if !fields_named
        .named
        .iter()
        .any(|field| field.ident.as_ref().unwrap() == "base")
    {
        return Err(Error::new(
            fields_named.span(),
            "a document must have a `base: DocumentBase` field",
        ));
    }

    let all_fields = fields_named
        .named
        .iter()
        .map(|field| {
            (
                field.ident.clone().unwrap(),
                field.ty.clone(),
                extract_serde_rename(field),
            )
        })
        .collect_vec();

    let configs = parse_field_configs(
        fields_named
            .named
            .iter()
            .filter(|field| field.ident.as_ref().unwrap() != "base"),
    )?;

    let projections = attributes
        .projections
        .into_iter()
        .map(|(ident, projected_fields)| {
            let mut members = vec![];

            for projected_field in projected_fields.iter() {
                let projected_field_ident = projected_field
                    .get_ident()
                    .cloned()
                    .ok_or_else(|| Error::new_spanned(projected_field, "expected ident"))?;

                let Some((_, ty, rename)) = all_fields
                    .iter()
                    .find(|(field_ident, ..)| *field_ident == projected_field_ident)
                else {
                    return Err(Error::new_spanned(projected_field_ident, "unknown field"));
                };

                members.push((projected_field_ident, ty.clone(), rename.clone()));
            }

            Ok(ProjectionConfig { ident, members })
        })
        .try_collect::<_, Vec<_>, _>()?;

    let output = build(
        &input.vis,
        &input.ident,
        &attributes.collection,
        &configs,
        &projections,
    );

    Ok(output)
}

struct ProjectionConfig {
    ident: Ident,
    members: Vec<(Ident, Type, Option<String>)>,
}

fn build(
    vis: &Visibility,
    ident: &Ident,
    collection: &str,
    configs: &[FieldConfig],
    projections: &[ProjectionConfig],
) -> TokenStream {
    let krate = krate();

    let mod_ident = Ident::new(&ident.to_string().to_snake_case(), Span::call_site());
    let collection_lit = LitStr::new(collection, Span::call_site());

    let fields_enum = build_fields_enum(&krate, ident, configs);
    let field_scan = build_field_scan(&krate, ident, configs);

    let projection_impls = projections.iter().map(|config| {
        let projection_ident = &config.ident;

        let member_tokens = config
            .members
            .iter()
            .map(|(member, ty, rename)| {
                if member == "base" {
                    quote! {
                        #[serde(flatten)]
                        pub #member: #ty
                    }
                } else if let Some(rename) = rename {
                    let rename = LitStr::new(rename, Span::call_site());
                    quote! {
                        #[serde(rename = #rename)]
                        pub #member: #ty
                    }
                } else {
                    quote! { pub #member: #ty }
                }
            })
            .collect_vec();

        let member_idents = config
            .members
            .iter()
            .map(|(member, ..)| member)
            .collect_vec();

        // The base envelope contributes its two persisted storage keys.
        let keys = config
            .members
            .iter()
            .flat_map(|(member, _, rename)| {
                if member == "base" {
                    vec!["_id".to_owned(), "created".to_owned()]
                } else {
                    vec![rename.clone().unwrap_or_else(|| member.to_string())]
                }
            })
            .map(|key| LitStr::new(&key, Span::call_site()))
            .collect_vec();

        quote! {
            #[derive(::std::fmt::Debug, ::serde::Serialize, ::serde::Deserialize)]
            pub struct #projection_ident {
                #( #member_tokens ),*
            }

            impl #krate::Projection<#ident> for #projection_ident {
                const FIELDS: ::std::option::Option<&'static [&'static str]> =
                    ::std::option::Option::Some(&[ #( #keys ),* ]);
            }

            impl ::std::convert::From<#ident> for #projection_ident {
                fn from(value: #ident) -> Self {
                    Self {
                        #( #member_idents: value.#member_idents ),*
                    }
                }
            }
        }
    });

    quote! {
        #vis mod #mod_ident {
            use super::*;

            impl #krate::Document for #ident {
                type Fields = Fields;

                const COLLECTION_NAME: &'static str = #collection_lit;

                fn base(&self) -> &#krate::DocumentBase {
                    &self.base
                }

                fn base_mut(&mut self) -> &mut #krate::DocumentBase {
                    &mut self.base
                }
            }

            impl #krate::Projection<Self> for #ident {
                const FIELDS: ::std::option::Option<&'static [&'static str]> =
                    ::std::option::Option::None;
            }

            #field_scan

            #fields_enum

            #( #projection_impls )*

            #krate::register_document!(#ident);
        }
    }
}
