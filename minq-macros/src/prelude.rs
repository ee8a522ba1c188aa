pub(crate) use crate::utils::krate;
pub use darling::{FromAttributes, util::PathList};
pub use heck::{ToSnakeCase, ToUpperCamelCase};
pub use itertools::Itertools;
pub use proc_macro2::{Span, TokenStream};
pub use quote::quote;
pub use std::collections::HashMap;
pub use syn::{
    Data, DeriveInput, Error, Field, Fields, FieldsNamed, Ident, LitStr, Result, Type, Visibility,
    parse2, spanned::Spanned,
};
