extern crate proc_macro;
mod field_parser;
mod macro_utils;
mod message;
mod saveable;

use proc_macro::TokenStream;
use proc_macro_error::proc_macro_error;
use syn::{parse_macro_input, DeriveInput};

/// Persistable object: `#[db]` single field or `#[child]` sub-objects, `#[mark]` dirty marker,
/// `#[component]` base component, `#[saveable(loader)]` for dynamic maps.
#[proc_macro_derive(Saveable, attributes(db, child, mark, component, saveable))]
#[proc_macro_error]
pub fn derive_saveable(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let struct_ident = &ast.ident;

    let stream = match field_parser::parse_saveable(&ast) {
        Ok(def) => saveable::expand(&ast, &def),
        Err(e) => return e.to_compile_error().into(),
    };
    macro_utils::finish_expansion(stream, "saveable", struct_ident)
}

#[proc_macro_derive(Message, attributes(message))]
#[proc_macro_error]
pub fn derive_message(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let struct_ident = &ast.ident;

    let stream = match field_parser::parse_message_name(&ast) {
        Ok(name) => message::expand(&ast, &name),
        Err(e) => return e.to_compile_error().into(),
    };
    macro_utils::finish_expansion(stream, "message", struct_ident)
}
