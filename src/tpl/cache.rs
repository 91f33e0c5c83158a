use crate::error::Result;
use crate::models::MAX_ENTRIES;
use crate::tpl::template::CompiledTemplate;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// 编译结果缓存：键为模板名加过期标记，超出容量时淘汰最久未使用的条目
pub struct TemplateCache {
    entries: Mutex<LruCache<String, Arc<CompiledTemplate>>>,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(MAX_ENTRIES)
    }
}

fn cache_key(name: &str, token: &str) -> String {
    format!("{}-{}", name, token)
}

impl TemplateCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, name: &str, token: &str) -> Option<Arc<CompiledTemplate>> {
        self.entries.lock().get(&cache_key(name, token)).cloned()
    }

    /// 命中时直接返回；未命中时在锁外编译再写入，失败的编译不会写入缓存。
    /// 同一个键的并发未命中可能各自编译一次，后写入者覆盖先写入者。
    pub fn get_or_compute<F>(&self, name: &str, token: &str, compute: F) -> Result<Arc<CompiledTemplate>>
    where
        F: FnOnce() -> Result<CompiledTemplate>,
    {
        let key = cache_key(name, token);
        if let Some(hit) = self.entries.lock().get(&key).cloned() {
            debug!(template = name, "template cache hit");
            return Ok(hit);
        }

        debug!(template = name, "template cache miss");
        let compiled = Arc::new(compute()?);
        if let Some((evicted, _)) = self.entries.lock().push(key, compiled.clone()) {
            if evicted != cache_key(name, token) {
                debug!(key = %evicted, "template evicted from cache");
            }
        }
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryTemplateLoader;
    use crate::models::TemplateOptions;
    use std::cell::Cell;

    fn compile(loader: &MemoryTemplateLoader, name: &str) -> Result<CompiledTemplate> {
        CompiledTemplate::compile(name, loader, &TemplateOptions::default())
    }

    #[test]
    fn test_hit_skips_compute() {
        let loader = MemoryTemplateLoader::new();
        loader.insert("a", "p a");
        let cache = TemplateCache::new(4);
        let calls = Cell::new(0);
        let fetch = || {
            cache.get_or_compute("a", "1", || {
                calls.set(calls.get() + 1);
                compile(&loader, "a")
            })
        };
        let first = fetch().unwrap();
        let second = fetch().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_new_token_recompiles() {
        let loader = MemoryTemplateLoader::new();
        loader.insert("a", "p a");
        let cache = TemplateCache::new(4);
        let first = cache.get_or_compute("a", "1", || compile(&loader, "a")).unwrap();
        let second = cache.get_or_compute("a", "2", || compile(&loader, "a")).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        // 旧条目被遮蔽而非删除
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_eviction() {
        let loader = MemoryTemplateLoader::new();
        for name in ["a", "b", "c"] {
            loader.insert(name, "p");
        }
        let cache = TemplateCache::new(2);
        cache.get_or_compute("a", "t", || compile(&loader, "a")).unwrap();
        cache.get_or_compute("b", "t", || compile(&loader, "b")).unwrap();
        // 访问 a 使 b 成为最久未使用
        assert!(cache.get("a", "t").is_some());
        cache.get_or_compute("c", "t", || compile(&loader, "c")).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b", "t").is_none());
        assert!(cache.get("a", "t").is_some());
        assert!(cache.get("c", "t").is_some());
    }

    #[test]
    fn test_failed_compile_not_cached() {
        let loader = MemoryTemplateLoader::new();
        loader.insert("bad", "div\n \tp");
        let cache = TemplateCache::new(2);
        assert!(cache.get_or_compute("bad", "t", || compile(&loader, "bad")).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_falls_back_to_one() {
        assert_eq!(TemplateCache::new(0).capacity(), 1);
    }
}
