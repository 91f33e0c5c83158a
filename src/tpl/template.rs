use crate::error::{Result, TemplateError};
use crate::expr::ExpressionHandler;
use crate::loader::TemplateLoader;
use crate::model::Model;
use crate::models::{Mode, TemplateOptions};
use crate::tpl::ast::{Mixin, Node};
use crate::tpl::parser::{self, Document};
use crate::tpl::render;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// 编译后的模板，构造后不可变，可被并发渲染共享
#[derive(Debug)]
pub struct CompiledTemplate {
    name: String,
    token: String,
    root: Vec<Node>,
    mixins: HashMap<String, Arc<Mixin>>,
    pretty_print: bool,
    mode: Mode,
}

impl CompiledTemplate {
    /// 读取过期标记并解析模板
    pub fn compile(name: &str, loader: &dyn TemplateLoader, options: &TemplateOptions) -> Result<Self> {
        let token = loader.staleness_token(name)?;
        Self::compile_with_token(name, token, loader, options)
    }

    pub(crate) fn compile_with_token(
        name: &str,
        token: String,
        loader: &dyn TemplateLoader,
        options: &TemplateOptions,
    ) -> Result<Self> {
        let started = Instant::now();
        let document = parser::parse(name, loader, ExpressionHandler::new(options.caching))?;
        info!(
            template = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "template compiled"
        );
        Ok(Self::from_document(name, token, document, options))
    }

    pub(crate) fn from_document(
        name: &str,
        token: String,
        document: Document,
        options: &TemplateOptions,
    ) -> Self {
        Self {
            name: name.to_string(),
            token,
            root: document.nodes,
            mixins: document.mixins,
            pretty_print: options.pretty_print,
            mode: options.mode,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn staleness_token(&self) -> &str {
        &self.token
    }

    pub fn root(&self) -> &[Node] {
        &self.root
    }

    pub fn mixin(&self, name: &str) -> Option<&Mixin> {
        self.mixins.get(name).map(|m| m.as_ref())
    }

    pub fn pretty_print(&self) -> bool {
        self.pretty_print
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 渲染到内存字符串
    pub fn render(&self, model: &Model<'_>) -> Result<String> {
        let mut out = String::new();
        render::render(self, model, &mut out)?;
        Ok(out)
    }

    /// 流式写入调用方提供的输出，失败时可能已写出部分内容
    pub fn render_to(&self, model: &Model<'_>, out: &mut dyn io::Write) -> Result<()> {
        let mut sink = IoSink { inner: out, error: None };
        let result = render::render(self, model, &mut sink);
        match sink.error.take() {
            Some(e) => Err(TemplateError::render(&self.name, format!("write failed: {}", e))),
            None => result,
        }
    }
}

struct IoSink<'a> {
    inner: &'a mut dyn io::Write,
    error: Option<io::Error>,
}

impl fmt::Write for IoSink<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.inner.write_all(s.as_bytes()).map_err(|e| {
            self.error = Some(e);
            fmt::Error
        })
    }
}
