pub mod configuration;
pub mod error;
pub mod expr;
pub mod filter;
pub mod html;
pub mod loader;
pub mod model;
pub mod models;
pub mod tpl;

#[doc(hidden)]
pub use ctor;
pub use jadeite_macros::template_assets;

pub use configuration::Configuration;
pub use error::{Result, TemplateError};
pub use loader::{FileTemplateLoader, MemoryTemplateLoader, TemplateLoader};
pub use model::{Model, Value};
pub use models::{Mode, TemplateOptions};
pub use tpl::CompiledTemplate;
