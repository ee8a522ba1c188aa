use crate::prelude::*;
use proc_macro_crate::{FoundCrate, crate_name};

pub fn extract_named_fields(span: Span, data: Data) -> Result<FieldsNamed> {
    let Data::Struct(data_struct) = data else {
        return Err(Error::new(span, "expected struct"));
    };

    match data_struct.fields {
        Fields::Named(named_fields) => Ok(named_fields),
        other => Err(Error::new_spanned(other, "expected named fields")),
    }
}

pub fn extract_serde_rename(field: &Field) -> Option<String> {
    #[derive(FromAttributes)]
    #[darling(attributes(serde), allow_unknown_fields)]
    struct SerdeAttribute {
        rename: String,
    }

    let serde_attribute = SerdeAttribute::from_attributes(&field.attrs).ok();

    serde_attribute.map(|attribute| attribute.rename)
}

/// The per-field `#[minq(...)]` attribute surface.
#[derive(FromAttributes, Default)]
#[darling(attributes(minq))]
pub struct FieldAttrs {
    #[darling(default)]
    pub indexed: bool,
    #[darling(default)]
    pub unique: bool,
    #[darling(default)]
    pub descending: bool,
    #[darling(default)]
    pub group: Option<String>,
    #[darling(default)]
    pub priority: Option<i32>,
    #[darling(default)]
    pub text: bool,
    #[darling(default)]
    pub nested: bool,
}

pub struct FieldConfig {
    pub ty: Type,
    pub variant: Ident,
    pub key: LitStr,
    pub attrs: FieldAttrs,
    pub is_string: bool,
    pub nested_module: Option<Ident>,
}

pub fn parse_field_configs<'a>(
    fields: impl Iterator<Item = &'a Field>,
) -> Result<Vec<FieldConfig>> {
    fields
        .map(|field| {
            let attrs = FieldAttrs::from_attributes(&field.attrs)?;
            let ident = field.ident.clone().unwrap();

            if attrs.unique && !attrs.indexed {
                return Err(Error::new_spanned(field, "`unique` requires `indexed`"));
            }

            if attrs.priority.is_some() && attrs.group.is_none() {
                return Err(Error::new_spanned(field, "`priority` requires `group`"));
            }

            if attrs.nested && (attrs.indexed || attrs.text || attrs.group.is_some()) {
                return Err(Error::new_spanned(
                    field,
                    "`nested` cannot be combined with index attributes",
                ));
            }

            let nested_module = if attrs.nested {
                Some(embedded_module(&field.ty)?)
            } else {
                None
            };

            let key = extract_serde_rename(field).unwrap_or_else(|| ident.to_string());

            Ok(FieldConfig {
                variant: Ident::new(&ident.to_string().to_upper_camel_case(), Span::call_site()),
                key: LitStr::new(&key, Span::call_site()),
                is_string: is_string(&field.ty),
                ty: field.ty.clone(),
                attrs,
                nested_module,
            })
        })
        .try_collect()
}

fn is_string(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        type_path.qself.is_none()
            && type_path
                .path
                .get_ident()
                .is_some_and(|ident| ident == "String")
    } else {
        false
    }
}

fn embedded_module(ty: &Type) -> Result<Ident> {
    let Type::Path(type_path) = ty else {
        return Err(Error::new_spanned(ty, "nested fields must have a path type"));
    };

    let segment = type_path
        .path
        .segments
        .last()
        .ok_or_else(|| Error::new_spanned(ty, "nested fields must have a path type"))?;

    Ok(Ident::new(
        &segment.ident.to_string().to_snake_case(),
        Span::call_site(),
    ))
}

pub fn build_fields_enum(krate: &TokenStream, owner: &Ident, configs: &[FieldConfig]) -> TokenStream {
    let variants = configs
        .iter()
        .map(|config| {
            let variant = &config.variant;
            match &config.nested_module {
                Some(module) => quote! { #variant(#module::Fields) },
                None => quote! { #variant },
            }
        })
        .collect_vec();

    let display_arms = configs
        .iter()
        .map(|config| {
            let variant = &config.variant;
            let key = &config.key;
            match &config.nested_module {
                Some(_) => quote! {
                    Self::#variant(inner) => ::std::write!(f, "{}.{}", #key, inner)
                },
                None => quote! { Self::#variant => f.write_str(#key) },
            }
        })
        .collect_vec();

    let display_body = if display_arms.is_empty() {
        quote! {
            let _ = f;
            match *self {}
        }
    } else {
        quote! {
            match self {
                #( #display_arms ),*
            }
        }
    };

    quote! {
        #[derive(::std::fmt::Debug)]
        pub enum Fields {
            #( #variants ),*
        }

        impl ::std::fmt::Display for Fields {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #krate::FieldKey<#owner> for Fields {}
    }
}

pub fn build_field_scan(krate: &TokenStream, owner: &Ident, configs: &[FieldConfig]) -> TokenStream {
    let index_statements = configs
        .iter()
        .flat_map(|config| scan_index_statements(krate, config))
        .collect_vec();

    let string_statements = configs
        .iter()
        .filter_map(|config| scan_string_statement(krate, config))
        .collect_vec();

    quote! {
        impl #krate::FieldScan for #owner {
            fn scan_indexes(
                _prefix: ::std::option::Option<&str>,
                _depth: u8,
                _out: &mut ::std::vec::Vec<#krate::IndexFragment>,
            ) {
                #( #index_statements )*
            }

            fn scan_strings(
                _prefix: ::std::option::Option<&str>,
                _depth: u8,
                _out: &mut ::std::vec::Vec<::std::string::String>,
            ) {
                #( #string_statements )*
            }
        }
    }
}

fn scan_index_statements(krate: &TokenStream, config: &FieldConfig) -> Vec<TokenStream> {
    let key = &config.key;

    if config.attrs.nested {
        let ty = &config.ty;
        return vec![quote! {
            {
                let path = #krate::field::join_key(_prefix, #key);
                if _depth == 0 {
                    #krate::field::scan_depth_exceeded(&path);
                } else {
                    <#ty as #krate::FieldScan>::scan_indexes(
                        ::std::option::Option::Some(&path),
                        _depth - 1,
                        _out,
                    );
                }
            }
        }];
    }

    let mut statements = vec![];
    let ascending = !config.attrs.descending;

    if config.attrs.indexed {
        let unique = config.attrs.unique;
        statements.push(quote! {
            _out.push(#krate::IndexFragment::Simple {
                key: #krate::field::join_key(_prefix, #key),
                unique: #unique,
                ascending: #ascending,
            });
        });
    }

    if let Some(group) = &config.attrs.group {
        let group = LitStr::new(group, Span::call_site());
        let priority = config.attrs.priority.unwrap_or(0);
        statements.push(quote! {
            _out.push(#krate::IndexFragment::CompoundKey {
                group: ::std::borrow::ToOwned::to_owned(#group),
                key: #krate::field::join_key(_prefix, #key),
                priority: #priority,
                ascending: #ascending,
            });
        });
    }

    if config.attrs.text {
        statements.push(quote! {
            _out.push(#krate::IndexFragment::Text {
                key: #krate::field::join_key(_prefix, #key),
            });
        });
    }

    statements
}

fn scan_string_statement(krate: &TokenStream, config: &FieldConfig) -> Option<TokenStream> {
    let key = &config.key;

    if config.attrs.nested {
        let ty = &config.ty;
        return Some(quote! {
            {
                let path = #krate::field::join_key(_prefix, #key);
                if _depth == 0 {
                    #krate::field::scan_depth_exceeded(&path);
                } else {
                    <#ty as #krate::FieldScan>::scan_strings(
                        ::std::option::Option::Some(&path),
                        _depth - 1,
                        _out,
                    );
                }
            }
        });
    }

    config.is_string.then(|| {
        quote! {
            _out.push(#krate::field::join_key(_prefix, #key));
        }
    })
}

pub fn krate() -> TokenStream {
    match crate_name("minq").unwrap() {
        FoundCrate::Itself => quote! { crate },
        FoundCrate::Name(name) => {
            let ident = Ident::new(&name, Span::call_site());
            quote! { ::#ident }
        }
    }
}
