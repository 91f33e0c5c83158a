pub mod ast;
pub mod cache;
mod lexer;
pub mod parser;
mod render;
mod render_context;
pub mod template;
pub mod token;

pub use cache::TemplateCache;
pub use lexer::tokenize;
pub use template::CompiledTemplate;
