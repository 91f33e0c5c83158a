use crate::error::{Result, TemplateError};
use crate::expr::ExpressionHandler;
use crate::filter::{Filter, FilterRegistry};
use crate::loader::{self, TemplateLoader};
use crate::model::{Model, Value, to_value};
use crate::models::{Mode, TemplateOptions};
use crate::tpl::{CompiledTemplate, TemplateCache};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tracing::{debug, info};

/// 模板引擎入口：组合配置、共享变量、过滤器、加载器与编译缓存
pub struct Configuration {
    options: TemplateOptions,
    shared: DashMap<String, Value>,
    filters: FilterRegistry,
    loader: Arc<dyn TemplateLoader>,
    cache: TemplateCache,
}

impl Configuration {
    pub fn new(loader: impl TemplateLoader + 'static) -> Self {
        Self::with_options(loader, TemplateOptions::default())
    }

    pub fn with_options(loader: impl TemplateLoader + 'static, options: TemplateOptions) -> Self {
        Self {
            cache: TemplateCache::new(options.cache_capacity),
            options,
            shared: DashMap::new(),
            filters: FilterRegistry::default(),
            loader: Arc::new(loader),
        }
    }

    /// 使用 `template_assets!` 嵌入的模板
    pub fn embedded() -> Self {
        Self::new(loader::embedded())
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    /// 获取编译后的模板；开启缓存时按过期标记复用
    pub fn get_template(&self, name: &str) -> Result<Arc<CompiledTemplate>> {
        let token = self.loader.staleness_token(name)?;
        if !self.options.caching {
            debug!(template = name, "template cache disabled, compiling");
            return Ok(Arc::new(self.compile(name, token)?));
        }
        let compute_token = token.clone();
        self.cache
            .get_or_compute(name, &token, move || self.compile(name, compute_token))
    }

    fn compile(&self, name: &str, token: String) -> Result<CompiledTemplate> {
        CompiledTemplate::compile_with_token(name, token, self.loader.as_ref(), &self.options)
    }

    fn model(&self, locals: HashMap<String, Value>) -> Model<'_> {
        let shared: HashMap<String, Value> = self
            .shared
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Model::new(&self.filters)
            .with_variables(&shared, locals)
            .expressions(ExpressionHandler::new(self.options.caching))
    }

    /// 渲染已编译的模板，局部变量覆盖共享变量
    pub fn render_template(&self, template: &CompiledTemplate, locals: HashMap<String, Value>) -> Result<String> {
        template.render(&self.model(locals))
    }

    pub fn render_template_to(
        &self,
        template: &CompiledTemplate,
        locals: HashMap<String, Value>,
        out: &mut dyn io::Write,
    ) -> Result<()> {
        template.render_to(&self.model(locals), out)
    }

    /// 按名称渲染，数据模型来自任意可序列化的结构体或映射
    pub fn render<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> Result<String> {
        let locals = match to_value(data)? {
            Value::Map(map) => map.into_iter().collect(),
            Value::Null => HashMap::new(),
            other => {
                return Err(TemplateError::Configuration(format!(
                    "template model must serialize to a map, got {}",
                    other.type_name()
                )));
            }
        };
        let template = self.get_template(name)?;
        self.render_template(&template, locals)
    }

    pub fn template_exists(&self, name: &str) -> bool {
        self.loader.exists(name)
    }

    /// 编译加载器列出的全部模板并写入缓存，返回编译数量
    pub fn precompile(&self) -> Result<usize> {
        let names = self.loader.list();
        for name in &names {
            self.get_template(name)?;
        }
        info!(count = names.len(), "templates precompiled");
        Ok(names.len())
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn set_filter(&self, name: &str, filter: impl Filter + 'static) {
        self.filters.register(name, filter);
    }

    pub fn remove_filter(&self, name: &str) -> bool {
        self.filters.remove(name)
    }

    pub fn set_shared_variable(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.shared.insert(name.into(), value.into());
    }

    pub fn set_shared_variables(&self, variables: HashMap<String, Value>) {
        for (name, value) in variables {
            self.shared.insert(name, value);
        }
    }

    pub fn shared_variable(&self, name: &str) -> Option<Value> {
        self.shared.get(name).map(|v| v.value().clone())
    }

    pub fn clear_shared_variables(&self) {
        self.shared.clear();
    }

    pub fn is_caching(&self) -> bool {
        self.options.caching
    }

    /// 关闭缓存时同时绕过表达式编译缓存
    pub fn set_caching(&mut self, caching: bool) {
        self.options.caching = caching;
        if !caching {
            self.cache.clear();
        }
    }

    pub fn is_pretty_print(&self) -> bool {
        self.options.pretty_print
    }

    pub fn set_pretty_print(&mut self, pretty_print: bool) {
        if self.options.pretty_print != pretty_print {
            self.options.pretty_print = pretty_print;
            self.cache.clear();
        }
    }

    pub fn mode(&self) -> Mode {
        self.options.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.options.mode != mode {
            self.options.mode = mode;
            self.cache.clear();
        }
    }

    pub fn set_template_loader(&mut self, loader: impl TemplateLoader + 'static) {
        self.loader = Arc::new(loader);
        self.cache.clear();
    }

    pub fn template_loader(&self) -> &dyn TemplateLoader {
        self.loader.as_ref()
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryTemplateLoader;
    use serde::Serialize;

    fn memory(templates: &[(&str, &str)]) -> MemoryTemplateLoader {
        let loader = MemoryTemplateLoader::new();
        for (name, source) in templates {
            loader.insert(name, source);
        }
        loader
    }

    #[derive(Serialize)]
    struct Page<'a> {
        title: &'a str,
        items: Vec<i32>,
    }

    #[test]
    fn test_render_serializable_model() {
        let config = Configuration::new(memory(&[(
            "page",
            "h1= title\nul\n  each i in items\n    li= i",
        )]));
        let out = config
            .render(
                "page",
                &Page {
                    title: "Hi",
                    items: vec![1, 2],
                },
            )
            .unwrap();
        assert_eq!(out, "<h1>Hi</h1><ul><li>1</li><li>2</li></ul>");
    }

    #[test]
    fn test_non_map_model_is_rejected() {
        let config = Configuration::new(memory(&[("page", "p")]));
        assert!(matches!(
            config.render("page", &42),
            Err(TemplateError::Configuration(_))
        ));
    }

    #[test]
    fn test_locals_override_shared_variables() {
        let config = Configuration::new(memory(&[("page", "p #{site} #{title}")]));
        config.set_shared_variable("site", "jadeite");
        config.set_shared_variable("title", "shared");
        let template = config.get_template("page").unwrap();
        let locals = HashMap::from([("title".to_string(), Value::from("local"))]);
        assert_eq!(
            config.render_template(&template, locals).unwrap(),
            "<p>jadeite local</p>"
        );
    }

    #[test]
    fn test_caching_toggle() {
        let mut config = Configuration::new(memory(&[("page", "p")]));
        let a = config.get_template("page").unwrap();
        let b = config.get_template("page").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        config.set_caching(false);
        let c = config.get_template("page").unwrap();
        let d = config.get_template("page").unwrap();
        assert!(!Arc::ptr_eq(&c, &d));
        assert!(config.cache().is_empty());
    }

    #[test]
    fn test_mode_change_recompiles() {
        let mut config = Configuration::new(memory(&[("page", "br")]));
        assert_eq!(config.render("page", &()).unwrap(), "<br>");
        config.set_mode(Mode::Xhtml);
        assert_eq!(config.render("page", &()).unwrap(), "<br/>");
    }

    #[test]
    fn test_precompile_and_exists() {
        let config = Configuration::new(memory(&[("a", "p"), ("b", "p"), ("style.css", "x")]));
        assert_eq!(config.precompile().unwrap(), 2);
        assert_eq!(config.cache().len(), 2);
        assert!(config.template_exists("a"));
        assert!(!config.template_exists("c"));
    }

    #[test]
    fn test_custom_filter() {
        let config = Configuration::new(memory(&[("page", ":shout\n  hi")]));
        assert!(config.render("page", &()).is_err());
        config.set_filter("shout", |s: &str, _: &crate::filter::FilterOptions| s.to_uppercase());
        assert_eq!(config.render("page", &()).unwrap(), "HI");
        assert!(config.remove_filter("shout"));
    }
}
