pub mod ast;
mod builtins;
mod eval;
mod handler;
mod lexer;
mod parser;

use crate::model::Value;
use std::collections::{BTreeMap, HashMap};

pub use handler::{CompiledExpr, ExpressionHandler};

/// 表达式求值时的变量来源
pub trait Variables {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Variables for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Variables for BTreeMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}
