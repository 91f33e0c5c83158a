use crate::models::mode::Mode;

/// 编译缓存的默认容量
pub const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateOptions {
    pub pretty_print: bool,
    /// 同时控制模板缓存与表达式编译缓存
    pub caching: bool,
    pub mode: Mode,
    pub cache_capacity: usize,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        TemplateOptions {
            pretty_print: false,
            caching: true,
            mode: Mode::Html,
            cache_capacity: MAX_ENTRIES,
        }
    }
}

impl TemplateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty_print(mut self, pretty_print: bool) -> Self {
        self.pretty_print = pretty_print;
        self
    }

    pub fn caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }
}
