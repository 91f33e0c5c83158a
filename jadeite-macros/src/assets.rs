use glob::glob;
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use syn::{LitStr, parse_macro_input};

/// glob 模式中不含通配符的前缀目录，模板名称相对于它计算
fn static_prefix(pattern: &str) -> PathBuf {
    pattern
        .split('/')
        .take_while(|part| !part.contains(['*', '?', '[', '{']))
        .collect::<Vec<_>>()
        .join("/")
        .into()
}

fn template_name(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let name = relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    Some(name)
}

pub fn template_assets_impl(input: TokenStream) -> TokenStream {
    let pattern = parse_macro_input!(input as LitStr);
    let pattern_str = pattern.value();

    // 相对于调用方 crate 根目录解析模式
    let root = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            return syn::Error::new(pattern.span(), "CARGO_MANIFEST_DIR is not set")
                .to_compile_error()
                .into();
        }
    };
    let base = root.join(static_prefix(&pattern_str));
    let full_pattern = root.join(&pattern_str);

    let paths = match glob(&full_pattern.to_string_lossy()) {
        Ok(paths) => paths,
        Err(e) => {
            return syn::Error::new(pattern.span(), format!("invalid glob pattern: {}", e))
                .to_compile_error()
                .into();
        }
    };

    let mut files: Vec<(String, String)> = paths
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let name = template_name(&path, &base)?;
            Some((name, path.to_string_lossy().into_owned()))
        })
        .collect();
    files.sort();

    // include_str! 让模板在编译期进入二进制，修改后触发重新编译
    let assets: Vec<proc_macro2::TokenStream> = files
        .iter()
        .map(|(name, file)| quote! { (#name, include_str!(#file)) })
        .collect();

    // 同一 crate 内多次调用时以模式哈希区分注册函数
    let mut hasher = DefaultHasher::new();
    pattern_str.hash(&mut hasher);
    let fn_name = format_ident!("__jadeite_register_templates_{}", hasher.finish());

    let output = quote! {
        #[jadeite::ctor::ctor]
        fn #fn_name() {
            jadeite::loader::register_assets(&[
                #(#assets),*
            ]);
        }
    };
    output.into()
}
