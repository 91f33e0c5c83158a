use crate::error::TemplateError;
use std::fmt;
use std::str::FromStr;

/// 输出模式，决定空元素与布尔属性的序列化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Html,
    Xhtml,
    Xml,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Html => "html",
            Mode::Xhtml => "xhtml",
            Mode::Xml => "xml",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Mode::Html),
            "xhtml" => Ok(Mode::Xhtml),
            "xml" => Ok(Mode::Xml),
            other => Err(TemplateError::Configuration(format!(
                "invalid mode `{}`, expected html, xhtml or xml",
                other
            ))),
        }
    }
}
