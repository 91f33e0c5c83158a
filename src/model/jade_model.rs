use crate::expr::{ExpressionHandler, Variables};
use crate::filter::FilterRegistry;
use crate::model::value::Value;
use std::collections::HashMap;

/// 单次渲染使用的数据模型：共享变量被本次调用的局部变量覆盖
pub struct Model<'a> {
    variables: HashMap<String, Value>,
    filters: &'a FilterRegistry,
    expressions: ExpressionHandler,
}

impl<'a> Model<'a> {
    pub fn new(filters: &'a FilterRegistry) -> Self {
        Self {
            variables: HashMap::new(),
            filters,
            expressions: ExpressionHandler::default(),
        }
    }

    /// 以共享变量为底，再叠加局部变量
    pub fn with_variables<'v>(
        mut self,
        shared: impl IntoIterator<Item = (&'v String, &'v Value)>,
        locals: HashMap<String, Value>,
    ) -> Self {
        for (k, v) in shared {
            self.variables.insert(k.clone(), v.clone());
        }
        self.variables.extend(locals);
        self
    }

    pub fn expressions(mut self, expressions: ExpressionHandler) -> Self {
        self.expressions = expressions;
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn filters(&self) -> &FilterRegistry {
        self.filters
    }

    pub fn expression_handler(&self) -> ExpressionHandler {
        self.expressions
    }
}

impl Variables for Model<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locals_override_shared() {
        let filters = FilterRegistry::default();
        let mut shared = HashMap::new();
        shared.insert("title".to_string(), Value::from("shared"));
        shared.insert("site".to_string(), Value::from("example"));

        let mut locals = HashMap::new();
        locals.insert("title".to_string(), Value::from("local"));

        let model = Model::new(&filters).with_variables(&shared, locals);
        assert_eq!(model.lookup("title"), Some(&Value::from("local")));
        assert_eq!(model.lookup("site"), Some(&Value::from("example")));
        assert_eq!(model.lookup("missing"), None);
    }
}
