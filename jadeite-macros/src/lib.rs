use proc_macro::TokenStream;

mod assets;

/// 在编译期嵌入匹配 glob 模式的模板文件，并在 main 之前注册到 `jadeite::loader::embedded()`
///
/// ```ignore
/// jadeite::template_assets!("templates/**/*.jade");
/// ```
#[proc_macro]
pub fn template_assets(input: TokenStream) -> TokenStream {
    assets::template_assets_impl(input)
}
