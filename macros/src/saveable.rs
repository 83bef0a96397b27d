use crate::field_parser::{PersistedDef, SaveableDef, Tag};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{parse_quote, DeriveInput, WhereClause};

fn where_clause(ast: &DeriveInput, def: &SaveableDef) -> WhereClause {
    let mut clause = ast.generics.where_clause.clone().unwrap_or_else(|| parse_quote!(where));
    if ast.generics.params.is_empty() {
        return clause;
    }
    for param in ast.generics.type_params() {
        let ident = &param.ident;
        clause.predicates.push(parse_quote!(#ident: 'static));
    }
    for p in def.persisted.iter().filter(|p| p.unsupported.is_none()) {
        let ty = &p.field.tpe;
        clause.predicates.push(parse_quote!(#ty: ::dirtybit::FieldValue));
    }
    clause
}

fn field_descriptor(p: &PersistedDef) -> TokenStream {
    let ident = p.field.name.to_string();
    let index = p.index;
    let plain = p.plain;
    let public = p.public;
    let tag = match p.tag {
        Tag::Db => quote!(::dirtybit::FieldTag::Db),
        Tag::Child => quote!(::dirtybit::FieldTag::Child),
    };
    let rename = match &p.rename {
        Some(name) => quote!(Some(#name)),
        None => quote!(None),
    };
    let (kind, dynamic_map, nested) = match &p.unsupported {
        Some(ty) => (quote!(::dirtybit::ValueKind::Unsupported(#ty)), quote!(false), quote!(None)),
        None => {
            let ty = &p.field.tpe;
            (
                quote!(<#ty as ::dirtybit::FieldValue>::value_kind()),
                quote!(<#ty as ::dirtybit::FieldValue>::is_dynamic_map()),
                quote!(<#ty as ::dirtybit::FieldValue>::nested_descriptor()),
            )
        }
    };
    quote! {
        ::dirtybit::FieldDescriptor {
            ident: #ident,
            index: #index,
            tag: #tag,
            rename: #rename,
            plain: #plain,
            public: #public,
            kind: #kind,
            dynamic_map: #dynamic_map,
            nested: #nested,
        }
    }
}

pub fn expand(ast: &DeriveInput, def: &SaveableDef) -> TokenStream {
    let struct_ident = &ast.ident;
    let type_name = struct_ident.to_string();
    let (impl_generics, ty_generics, _) = ast.generics.split_for_impl();
    let where_clause = where_clause(ast, def);
    let is_component = def.component.is_some();

    let descriptors: Vec<TokenStream> = def.persisted.iter().map(field_descriptor).collect();
    let accessible: Vec<&PersistedDef> = def.persisted.iter().filter(|p| p.unsupported.is_none()).collect();
    let indexes: Vec<usize> = accessible.iter().map(|p| p.index).collect();
    let idents: Vec<&syn::Ident> = accessible.iter().map(|p| &p.field.name).collect();

    let (mark, mark_mut) = match &def.mark {
        Some(m) => {
            let ident = &m.name;
            (
                quote!(Some(::dirtybit::AsMark::as_mark(&self.#ident))),
                quote!(Some(::dirtybit::AsMark::as_mark_mut(&mut self.#ident))),
            )
        }
        None => (quote!(None), quote!(None)),
    };

    let loader = if def.loader {
        quote! {
            fn bytes_map_loader(&mut self) -> Option<&mut dyn ::dirtybit::BytesMapLoader> {
                Some(self)
            }
        }
    } else {
        quote!()
    };

    let value_ops = match accessible.iter().find(|p| p.tag == Tag::Db) {
        Some(db) => {
            let ident = &db.field.name;
            quote! {
                fn to_value(&self, plain: bool) -> Result<::dirtybit::Value, ::dirtybit::AppError> {
                    ::dirtybit::FieldValue::to_value(&self.#ident, plain)
                }
                fn load_value(&mut self, value: ::dirtybit::Value) -> Result<(), ::dirtybit::AppError> {
                    ::dirtybit::FieldValue::load_value(&mut self.#ident, value)
                }
                fn to_cache(&self) -> Result<::dirtybit::CacheValue, ::dirtybit::AppError> {
                    ::dirtybit::FieldValue::to_cache(&self.#ident)
                }
                fn load_cache(&mut self, cached: ::dirtybit::CacheValue) -> Result<(), ::dirtybit::AppError> {
                    ::dirtybit::FieldValue::load_cache(&mut self.#ident, cached)
                }
            }
        }
        None => {
            let msg = format!("{} has no db field", type_name);
            quote! {
                fn to_value(&self, _plain: bool) -> Result<::dirtybit::Value, ::dirtybit::AppError> {
                    Err(::dirtybit::AppError::NotSaveable(#msg.to_string()))
                }
                fn load_value(&mut self, _value: ::dirtybit::Value) -> Result<(), ::dirtybit::AppError> {
                    Err(::dirtybit::AppError::NotSaveable(#msg.to_string()))
                }
                fn to_cache(&self) -> Result<::dirtybit::CacheValue, ::dirtybit::AppError> {
                    Err(::dirtybit::AppError::NotSaveable(#msg.to_string()))
                }
                fn load_cache(&mut self, _cached: ::dirtybit::CacheValue) -> Result<(), ::dirtybit::AppError> {
                    Err(::dirtybit::AppError::NotSaveable(#msg.to_string()))
                }
            }
        }
    };

    let component_impl = match &def.component {
        Some(c) => {
            let ident = &c.name;
            quote! {
                impl #impl_generics ::dirtybit::Component for #struct_ident #ty_generics #where_clause {
                    fn base(&self) -> &::dirtybit::BaseComponent {
                        &self.#ident
                    }
                    fn base_mut(&mut self) -> &mut ::dirtybit::BaseComponent {
                        &mut self.#ident
                    }
                    fn as_persistable(&self) -> &dyn ::dirtybit::Persistable {
                        self
                    }
                    fn as_persistable_mut(&mut self) -> &mut dyn ::dirtybit::Persistable {
                        self
                    }
                }
            }
        }
        None => quote!(),
    };

    quote! {
        impl #impl_generics ::dirtybit::Describe for #struct_ident #ty_generics #where_clause {
            fn describe() -> ::dirtybit::StructDescriptor {
                ::dirtybit::StructDescriptor {
                    type_name: #type_name,
                    component: #is_component,
                    fields: vec![#(#descriptors),*],
                }
            }
        }

        impl #impl_generics ::dirtybit::Persistable for #struct_ident #ty_generics #where_clause {
            fn descriptor(&self) -> ::dirtybit::StructDescriptor {
                <Self as ::dirtybit::Describe>::describe()
            }
            fn schema_type_id(&self) -> ::std::any::TypeId {
                ::std::any::TypeId::of::<Self>()
            }
            fn field(&self, index: usize) -> Option<&dyn ::dirtybit::FieldValue> {
                match index {
                    #(#indexes => Some(&self.#idents),)*
                    _ => None,
                }
            }
            fn field_mut(&mut self, index: usize) -> Option<&mut dyn ::dirtybit::FieldValue> {
                match index {
                    #(#indexes => Some(&mut self.#idents),)*
                    _ => None,
                }
            }
            fn mark(&self) -> Option<::dirtybit::MarkRef<'_>> {
                #mark
            }
            fn mark_mut(&mut self) -> Option<::dirtybit::MarkMut<'_>> {
                #mark_mut
            }
            #loader
            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }

        impl #impl_generics ::dirtybit::FieldValue for #struct_ident #ty_generics #where_clause {
            fn value_kind() -> ::dirtybit::ValueKind {
                ::dirtybit::ValueKind::Struct
            }
            fn nested_descriptor() -> Option<fn() -> ::dirtybit::StructDescriptor> {
                Some(<Self as ::dirtybit::Describe>::describe)
            }
            fn kind(&self) -> ::dirtybit::ValueKind {
                ::dirtybit::ValueKind::Struct
            }
            fn nested(&self) -> Option<&dyn ::dirtybit::Persistable> {
                Some(self)
            }
            fn nested_mut(&mut self) -> Option<&mut dyn ::dirtybit::Persistable> {
                Some(self)
            }
            #value_ops
        }

        #component_impl
    }
}

#[cfg(test)]
mod saveable_tests {
    use super::*;
    use crate::field_parser::parse_saveable;

    fn expand_str(ast: DeriveInput) -> String {
        let def = parse_saveable(&ast).expect("parse");
        expand(&ast, &def).to_string()
    }

    #[test]
    fn component_gets_component_impl_and_mark_accessors() {
        let out = expand_str(parse_quote! {
            struct Info {
                #[component] base: BaseComponent,
                #[mark] mark: BaseDirtyMark,
                #[db(plain)] pub info: PlayerInfo,
            }
        });
        assert!(out.contains(":: dirtybit :: Component for Info"));
        assert!(out.contains("as_mark (& self . mark)"));
        assert!(out.contains("component : true"));
        assert!(!out.contains("bytes_map_loader"));
    }

    #[test]
    fn unsupported_fields_get_no_accessor() {
        let out = expand_str(parse_quote! {
            struct Odd {
                #[db] pub callback: fn(i32),
            }
        });
        assert!(out.contains("ValueKind :: Unsupported"));
        assert!(!out.contains("Some (& self . callback)"));
        assert!(out.contains("has no db field"));
    }

    #[test]
    fn generic_params_are_bounded() {
        let out = expand_str(parse_quote! {
            #[saveable(loader)]
            struct Wrapper<M> {
                #[db] pub value: M,
                #[mark] mark: BaseDirtyMark,
            }
        });
        assert!(out.contains("M : 'static"));
        assert!(out.contains("M : :: dirtybit :: FieldValue"));
        assert!(out.contains("bytes_map_loader"));
    }
}
