use crate::macro_utils;
use proc_macro2::Ident;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::token::Comma;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Type, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Db,
    Child,
}

#[derive(Clone)]
pub struct FieldDef {
    pub name: Ident,
    pub tpe: Type,
}

#[derive(Clone)]
pub struct PersistedDef {
    pub field: FieldDef,
    pub index: usize,
    pub tag: Tag,
    pub rename: Option<String>,
    pub plain: bool,
    pub public: bool,
    pub unsupported: Option<String>,
}

pub struct SaveableDef {
    pub persisted: Vec<PersistedDef>,
    pub mark: Option<FieldDef>,
    pub component: Option<FieldDef>,
    pub loader: bool,
}

pub fn get_named_fields(ast: &DeriveInput) -> Result<Punctuated<syn::Field, Comma>, syn::Error> {
    match &ast.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(fields_named) => Ok(fields_named.named.clone()),
            _ => Err(syn::Error::new(ast.span(), "`#[derive(Saveable)]` only supports structs with named fields.")),
        },
        _ => Err(syn::Error::new(ast.span(), "`#[derive(Saveable)]` only supports structs.")),
    }
}

fn parse_options(attr: &Attribute, tag: Tag) -> Result<(bool, Option<String>), syn::Error> {
    let mut plain = false;
    let mut rename = None;
    if matches!(attr.meta, syn::Meta::Path(_)) {
        return Ok((plain, rename));
    }
    attr.parse_nested_meta(|nested| {
        if nested.path.is_ident("plain") {
            plain = true;
            Ok(())
        } else if nested.path.is_ident("name") {
            let lit: LitStr = nested.value()?.parse()?;
            if lit.value().is_empty() {
                return Err(nested.error("name must not be empty"));
            }
            rename = Some(lit.value());
            Ok(())
        } else {
            Err(nested.error(format!("unsupported {:?} option, expected `plain` or `name = \"..\"`", tag)))
        }
    })?;
    Ok((plain, rename))
}

pub fn parse_loader(ast: &DeriveInput) -> Result<bool, syn::Error> {
    let mut loader = false;
    for attr in ast.attrs.iter().filter(|a| a.path().is_ident("saveable")) {
        attr.parse_nested_meta(|nested| {
            if nested.path.is_ident("loader") {
                loader = true;
                Ok(())
            } else {
                Err(nested.error("unsupported saveable option, expected `loader`"))
            }
        })?;
    }
    Ok(loader)
}

pub fn parse_saveable(ast: &DeriveInput) -> Result<SaveableDef, syn::Error> {
    let fields = get_named_fields(ast)?;
    let mut persisted: Vec<PersistedDef> = Vec::new();
    let mut mark: Option<FieldDef> = None;
    let mut component: Option<FieldDef> = None;

    for field in fields.iter() {
        let name = field.ident.clone().ok_or_else(|| syn::Error::new(field.span(), "Unnamed fields not supported"))?;
        let field_def = FieldDef { name, tpe: field.ty.clone() };
        let mut tagged: Option<(Tag, bool, Option<String>)> = None;
        for attr in &field.attrs {
            let tag = if attr.path().is_ident("db") {
                Tag::Db
            } else if attr.path().is_ident("child") {
                Tag::Child
            } else if attr.path().is_ident("mark") {
                if mark.replace(field_def.clone()).is_some() {
                    return Err(syn::Error::new(attr.span(), "only one #[mark] field is allowed"));
                }
                continue;
            } else if attr.path().is_ident("component") {
                if component.replace(field_def.clone()).is_some() {
                    return Err(syn::Error::new(attr.span(), "only one #[component] field is allowed"));
                }
                continue;
            } else {
                continue;
            };
            if tagged.is_some() {
                return Err(syn::Error::new(attr.span(), "a field is either #[db] or #[child], once"));
            }
            let (plain, rename) = parse_options(attr, tag)?;
            tagged = Some((tag, plain, rename));
        }
        if let Some((tag, plain, rename)) = tagged {
            persisted.push(PersistedDef {
                field: field_def.clone(),
                index: persisted.len(),
                tag,
                rename,
                plain,
                public: !matches!(field.vis, Visibility::Inherited),
                unsupported: macro_utils::unsupported_type(&field.ty),
            });
        }
    }
    Ok(SaveableDef { persisted, mark, component, loader: parse_loader(ast)? })
}

/// Discriminator of `#[derive(Message)]`, the type name unless `#[message(name = "..")]` is given.
pub fn parse_message_name(ast: &DeriveInput) -> Result<String, syn::Error> {
    let mut name = ast.ident.to_string();
    for attr in ast.attrs.iter().filter(|a| a.path().is_ident("message")) {
        attr.parse_nested_meta(|nested| {
            if nested.path.is_ident("name") {
                let lit: LitStr = nested.value()?.parse()?;
                name = lit.value();
                Ok(())
            } else {
                Err(nested.error("unsupported message option, expected `name = \"..\"`"))
            }
        })?;
    }
    Ok(name)
}

#[cfg(test)]
mod field_parser_tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn collects_tags_in_declaration_order() {
        let ast: DeriveInput = parse_quote! {
            #[saveable(loader)]
            struct Bag {
                #[component] base: BaseComponent,
                #[mark] mark: BaseDirtyMark,
                #[db(plain, name = "Items")] pub items: HashMap<i32, i32>,
                ignored: u32,
                #[child] count: Option<Box<Count>>,
                #[child(name = "Ptr")] pub ptr: fn(i32),
            }
        };
        let def = parse_saveable(&ast).expect("parse");
        assert!(def.loader);
        assert_eq!(def.mark.expect("mark").name.to_string(), "mark");
        assert_eq!(def.component.expect("component").name.to_string(), "base");
        assert_eq!(def.persisted.len(), 3);

        let items = &def.persisted[0];
        assert_eq!((items.index, items.tag, items.plain, items.public), (0, Tag::Db, true, true));
        assert_eq!(items.rename.as_deref(), Some("Items"));
        assert!(items.unsupported.is_none());

        let count = &def.persisted[1];
        assert_eq!((count.index, count.tag, count.public), (1, Tag::Child, false));

        let ptr = &def.persisted[2];
        assert!(ptr.unsupported.is_some());
    }

    #[test]
    fn rejects_unknown_options() {
        let ast: DeriveInput = parse_quote! {
            struct Bad { #[db(compressed)] pub v: u32 }
        };
        assert!(parse_saveable(&ast).is_err());
    }

    #[test]
    fn rejects_double_tagging_and_tuple_structs() {
        let both: DeriveInput = parse_quote! {
            struct Both { #[db] #[child] pub v: u32 }
        };
        assert!(parse_saveable(&both).is_err());
        let tuple: DeriveInput = parse_quote! { struct Tuple(u32); };
        assert!(parse_saveable(&tuple).is_err());
    }

    #[test]
    fn message_name_defaults_to_ident() {
        let plain: DeriveInput = parse_quote! { struct Sword { damage: u32 } };
        assert_eq!(parse_message_name(&plain).expect("name"), "Sword");
        let renamed: DeriveInput = parse_quote! { #[message(name = "item1")] struct Sword { damage: u32 } };
        assert_eq!(parse_message_name(&renamed).expect("name"), "item1");
    }
}
