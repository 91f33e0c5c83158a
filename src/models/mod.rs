pub mod mode;
pub mod options;

pub use mode::Mode;
pub use options::{MAX_ENTRIES, TemplateOptions};
