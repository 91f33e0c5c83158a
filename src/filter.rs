use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const FILTER_PLAIN: &str = "plain";
pub const FILTER_CDATA: &str = "cdata";

/// 过滤器选项，如 `:markdown(flavor=gfm)`
pub type FilterOptions = BTreeMap<String, String>;

/// 纯文本转换：接收原始内容，输出不再转义
pub trait Filter: Send + Sync {
    fn convert(&self, source: &str, options: &FilterOptions) -> String;
}

impl<F> Filter for F
where
    F: Fn(&str, &FilterOptions) -> String + Send + Sync,
{
    fn convert(&self, source: &str, options: &FilterOptions) -> String {
        self(source, options)
    }
}

pub struct PlainFilter;

impl Filter for PlainFilter {
    fn convert(&self, source: &str, _options: &FilterOptions) -> String {
        source.to_string()
    }
}

pub struct CdataFilter;

impl Filter for CdataFilter {
    fn convert(&self, source: &str, _options: &FilterOptions) -> String {
        format!("<![CDATA[\n{}\n]]>", source)
    }
}

/// 过滤器注册表，可并发读写
pub struct FilterRegistry {
    filters: DashMap<String, Arc<dyn Filter>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let registry = Self::empty();
        registry.register(FILTER_PLAIN, PlainFilter);
        registry.register(FILTER_CDATA, CdataFilter);
        registry
    }
}

impl FilterRegistry {
    pub fn empty() -> Self {
        Self {
            filters: DashMap::new(),
        }
    }

    pub fn register(&self, name: &str, filter: impl Filter + 'static) {
        self.filters.insert(name.to_string(), Arc::new(filter));
    }

    pub fn remove(&self, name: &str) -> bool {
        self.filters.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.filters.get(name).map(|f| f.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters() {
        let registry = FilterRegistry::default();
        let opts = FilterOptions::new();
        let plain = registry.get(FILTER_PLAIN).unwrap();
        assert_eq!(plain.convert("<b>x</b>", &opts), "<b>x</b>");
        let cdata = registry.get(FILTER_CDATA).unwrap();
        assert_eq!(cdata.convert("a < b", &opts), "<![CDATA[\na < b\n]]>");
    }

    #[test]
    fn test_register_closure_and_remove() {
        let registry = FilterRegistry::empty();
        registry.register("shout", |s: &str, _: &FilterOptions| s.to_uppercase());
        assert_eq!(
            registry.get("shout").unwrap().convert("hi", &FilterOptions::new()),
            "HI"
        );
        assert!(registry.remove("shout"));
        assert!(!registry.contains("shout"));
    }
}
