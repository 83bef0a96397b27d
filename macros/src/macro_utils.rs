use proc_macro::TokenStream;
use proc_macro2::Ident;
use quote::ToTokens;
use std::env;
use std::path::{Path, PathBuf};
use syn::{GenericArgument, PathArguments, Type};

const CHANNEL_TYPES: [&str; 3] = ["Sender", "SyncSender", "Receiver"];

fn last_segment_args(ty: &Type) -> Option<(&Ident, Vec<&Type>)> {
    if let Type::Path(tp) = ty {
        let seg = tp.path.segments.last()?;
        let args = match &seg.arguments {
            PathArguments::AngleBracketed(args) => args
                .args
                .iter()
                .filter_map(|arg| match arg {
                    GenericArgument::Type(t) => Some(t),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        Some((&seg.ident, args))
    } else {
        None
    }
}

/// Field types that can never be persisted, reported at schema discovery instead of failing the build.
pub fn unsupported_type(ty: &Type) -> Option<String> {
    let describe = || ty.to_token_stream().to_string();
    match ty {
        Type::BareFn(_) | Type::Ptr(_) | Type::TraitObject(_) | Type::ImplTrait(_) | Type::Never(_) | Type::Reference(_) => {
            Some(describe())
        }
        Type::Tuple(_) => Some(describe()),
        Type::Paren(p) => unsupported_type(&p.elem),
        Type::Group(g) => unsupported_type(&g.elem),
        Type::Path(_) => {
            let (ident, args) = last_segment_args(ty)?;
            if CHANNEL_TYPES.iter().any(|c| ident == c) {
                return Some(describe());
            }
            if ident == "Box" && args.iter().any(|a| matches!(a, Type::TraitObject(_))) {
                return Some(describe());
            }
            None
        }
        _ => None,
    }
}

/// Pretty printed expansion written to `<dir>/<ident>.rs`.
fn dump_expansion(stream: &proc_macro2::TokenStream, dir: &Path, ident: &Ident) -> std::io::Result<PathBuf> {
    let code = match syn::parse2::<syn::File>(stream.clone()) {
        Ok(ast) => prettyplease::unparse(&ast),
        Err(_) => stream.to_string(),
    };
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.rs", ident));
    std::fs::write(&path, code)?;
    Ok(path)
}

/// Hands the expansion to the compiler, dumping it under `target/macros/<derive>` when
/// `DIRTYBIT_EXPAND` is set.
pub fn finish_expansion(stream: proc_macro2::TokenStream, derive: &str, ident: &Ident) -> TokenStream {
    if env::var_os("DIRTYBIT_EXPAND").is_some() {
        let dir = Path::new("target").join("macros").join(derive);
        if let Err(e) = dump_expansion(&stream, &dir, ident) {
            eprintln!("cannot dump {} expansion of {}: {}", derive, ident, e);
        }
    }
    stream.into()
}
