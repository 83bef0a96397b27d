use proc_macro2::TokenStream;
use quote::quote;
use syn::{parse_quote, DeriveInput};

pub fn expand(ast: &DeriveInput, name: &str) -> TokenStream {
    let struct_ident = &ast.ident;
    let (impl_generics, ty_generics, _) = ast.generics.split_for_impl();
    let mut where_clause = ast.generics.where_clause.clone().unwrap_or_else(|| parse_quote!(where));
    for param in ast.generics.type_params() {
        let ident = &param.ident;
        where_clause.predicates.push(parse_quote!(#ident: 'static));
    }

    quote! {
        impl #impl_generics ::dirtybit::Message for #struct_ident #ty_generics #where_clause {
            fn message_name() -> &'static str {
                #name
            }
        }

        impl #impl_generics ::dirtybit::FieldValue for #struct_ident #ty_generics #where_clause {
            fn value_kind() -> ::dirtybit::ValueKind {
                ::dirtybit::ValueKind::Message
            }
            fn kind(&self) -> ::dirtybit::ValueKind {
                ::dirtybit::ValueKind::Message
            }
            fn to_value(&self, plain: bool) -> Result<::dirtybit::Value, ::dirtybit::AppError> {
                ::dirtybit::message::to_value(self, plain)
            }
            fn load_value(&mut self, value: ::dirtybit::Value) -> Result<(), ::dirtybit::AppError> {
                ::dirtybit::message::load_value(self, value)
            }
            fn to_cache(&self) -> Result<::dirtybit::CacheValue, ::dirtybit::AppError> {
                ::dirtybit::message::to_cache(self)
            }
            fn load_cache(&mut self, cached: ::dirtybit::CacheValue) -> Result<(), ::dirtybit::AppError> {
                ::dirtybit::message::load_cache(self, cached)
            }
        }
    }
}
