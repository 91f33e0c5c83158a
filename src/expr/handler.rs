use crate::error::{Result, TemplateError};
use crate::expr::Variables;
use crate::expr::ast::Expr;
use crate::expr::{eval, parser};
use crate::model::Value;
use dashmap::DashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// 已编译的表达式
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    expr: Expr,
}

impl CompiledExpr {
    pub fn compile(source: &str) -> Result<Self> {
        let expr = parser::parse_expression(source)
            .map_err(|message| TemplateError::expression(source, message))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn evaluate(&self, vars: &dyn Variables) -> Result<Value> {
        eval::eval(&self.expr, vars).map_err(|message| TemplateError::expression(&self.source, message))
    }
}

/// 表达式文本到编译结果的进程级缓存
static EXPRESSION_CACHE: LazyLock<DashMap<String, Arc<CompiledExpr>>> =
    LazyLock::new(DashMap::new);

/// 表达式编译入口，是否使用缓存由显式标志决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionHandler {
    caching: bool,
}

impl Default for ExpressionHandler {
    fn default() -> Self {
        Self { caching: true }
    }
}

impl ExpressionHandler {
    pub fn new(caching: bool) -> Self {
        Self { caching }
    }

    pub fn compile(&self, source: &str) -> Result<Arc<CompiledExpr>> {
        if !self.caching {
            debug!(expression = source, "expression cache bypassed");
            return Ok(Arc::new(CompiledExpr::compile(source)?));
        }

        if let Some(cached) = EXPRESSION_CACHE.get(source) {
            return Ok(cached.clone());
        }

        let compiled = Arc::new(CompiledExpr::compile(source)?);
        EXPRESSION_CACHE.insert(source.to_string(), compiled.clone());
        Ok(compiled)
    }

    pub fn evaluate(&self, source: &str, vars: &dyn Variables) -> Result<Value> {
        self.compile(source)?.evaluate(vars)
    }

    /// 表达式是否已在进程级缓存中
    pub fn is_cached(source: &str) -> bool {
        EXPRESSION_CACHE.contains_key(source)
    }
}
