use thiserror::Error;

/// 模板编译与渲染过程中可能出现的错误
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Lex error in {template} at {line}:{column}: {message}")]
    Lex {
        template: String,
        line: usize,
        column: usize,
        message: String,
    },
    #[error("Parse error in {template} at line {line}: {message}")]
    Parse {
        template: String,
        line: usize,
        message: String,
    },
    #[error("Expression error in `{expression}`: {message}")]
    Expression { expression: String, message: String },
    #[error("Render error in {template}: {message}")]
    Render { template: String, message: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Template not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TemplateError>;

impl TemplateError {
    pub(crate) fn expression(expression: &str, message: impl Into<String>) -> Self {
        TemplateError::Expression {
            expression: expression.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn render(template: &str, message: impl Into<String>) -> Self {
        TemplateError::Render {
            template: template.to_string(),
            message: message.into(),
        }
    }
}

impl serde::ser::Error for TemplateError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        TemplateError::Configuration(msg.to_string())
    }
}
