use crate::error::{Result, TemplateError};
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const TEMPLATE_EXTENSION: &str = "jade";

/// 模板源码加载器
pub trait TemplateLoader: Send + Sync {
    /// 读取模板源码
    fn content(&self, name: &str) -> Result<String>;

    /// 过期标记：值变化即表示缓存的编译结果已过期
    fn staleness_token(&self, name: &str) -> Result<String>;

    fn exists(&self, name: &str) -> bool {
        self.content(name).is_ok()
    }

    /// 列出所有可加载的模板名称，用于预编译
    fn list(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<T: TemplateLoader + ?Sized> TemplateLoader for &T {
    fn content(&self, name: &str) -> Result<String> {
        (**self).content(name)
    }

    fn staleness_token(&self, name: &str) -> Result<String> {
        (**self).staleness_token(name)
    }

    fn exists(&self, name: &str) -> bool {
        (**self).exists(name)
    }

    fn list(&self) -> Vec<String> {
        (**self).list()
    }
}

fn has_extension(name: &str) -> bool {
    Path::new(name).extension().is_some()
}

/// 从文件系统目录加载模板
#[derive(Debug, Clone)]
pub struct FileTemplateLoader {
    base_dir: PathBuf,
}

impl FileTemplateLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        let name = name.trim_start_matches('/');
        if has_extension(name) {
            self.base_dir.join(name)
        } else {
            self.base_dir.join(format!("{}.{}", name, TEMPLATE_EXTENSION))
        }
    }

    fn io_error(name: &str, e: io::Error) -> TemplateError {
        if e.kind() == io::ErrorKind::NotFound {
            TemplateError::NotFound(name.to_string())
        } else {
            TemplateError::Io(e)
        }
    }
}

impl TemplateLoader for FileTemplateLoader {
    fn content(&self, name: &str) -> Result<String> {
        fs::read_to_string(self.path(name)).map_err(|e| Self::io_error(name, e))
    }

    fn staleness_token(&self, name: &str) -> Result<String> {
        let modified = fs::metadata(self.path(name))
            .and_then(|m| m.modified())
            .map_err(|e| Self::io_error(name, e))?;
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Ok(millis.to_string())
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn list(&self) -> Vec<String> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.base_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != TEMPLATE_EXTENSION) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.base_dir) else {
                continue;
            };
            let name = relative
                .with_extension("")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            names.push(name);
        }
        names.sort();
        names
    }
}

/// 内存模板加载器，过期标记为内容哈希
#[derive(Debug, Default)]
pub struct MemoryTemplateLoader {
    templates: DashMap<String, String>,
}

impl MemoryTemplateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str) -> &str {
        let name = name.trim_start_matches('/');
        name.strip_suffix(".jade").unwrap_or(name)
    }

    pub fn insert(&self, name: &str, source: &str) {
        self.templates
            .insert(Self::key(name).to_string(), source.to_string());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.templates.remove(Self::key(name)).is_some()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateLoader for MemoryTemplateLoader {
    fn content(&self, name: &str) -> Result<String> {
        self.templates
            .get(Self::key(name))
            .map(|t| t.value().clone())
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    fn staleness_token(&self, name: &str) -> Result<String> {
        let source = self
            .templates
            .get(Self::key(name))
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        let mut hasher = DefaultHasher::new();
        source.value().hash(&mut hasher);
        Ok(format!("{:x}", hasher.finish()))
    }

    fn exists(&self, name: &str) -> bool {
        self.templates.contains_key(Self::key(name))
    }

    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .templates
            .iter()
            .filter(|t| !has_extension(t.key()))
            .map(|t| t.key().clone())
            .collect();
        names.sort();
        names
    }
}

static EMBEDDED: LazyLock<MemoryTemplateLoader> = LazyLock::new(MemoryTemplateLoader::new);

/// 通过 `template_assets!` 编译进二进制的模板
pub fn embedded() -> &'static MemoryTemplateLoader {
    &EMBEDDED
}

/// 注册嵌入的模板资源（由 `template_assets!` 生成的代码在 main 之前调用）
#[doc(hidden)]
pub fn register_assets(assets: &[(&str, &str)]) {
    for (name, source) in assets {
        if name.is_empty() {
            warn!("skipping embedded template with empty name");
            continue;
        }
        if EMBEDDED.exists(name) {
            warn!(template = %name, "embedded template registered twice, replacing");
        }
        EMBEDDED.insert(name, source);
        debug!(template = %name, "embedded template registered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_loader_token_follows_content() {
        let loader = MemoryTemplateLoader::new();
        loader.insert("page.jade", "p one");
        assert!(loader.exists("page"));
        let first = loader.staleness_token("page").unwrap();
        assert_eq!(first, loader.staleness_token("page").unwrap());
        loader.insert("page", "p two");
        assert_ne!(first, loader.staleness_token("page").unwrap());
        assert_eq!(loader.content("page").unwrap(), "p two");
    }

    #[test]
    fn test_memory_loader_not_found() {
        let loader = MemoryTemplateLoader::new();
        assert!(matches!(loader.content("nope"), Err(TemplateError::NotFound(_))));
        assert!(matches!(
            loader.staleness_token("nope"),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn test_file_loader() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("partials")).unwrap();
        let mut f = fs::File::create(dir.path().join("index.jade")).unwrap();
        writeln!(f, "p hello").unwrap();
        fs::write(dir.path().join("partials/nav.jade"), "nav").unwrap();
        fs::write(dir.path().join("site.css"), "a{}").unwrap();

        let loader = FileTemplateLoader::new(dir.path());
        assert_eq!(loader.content("index").unwrap(), "p hello\n");
        assert_eq!(loader.content("site.css").unwrap(), "a{}");
        assert!(loader.exists("partials/nav"));
        assert!(!loader.exists("missing"));
        assert!(loader.staleness_token("index").unwrap().parse::<u128>().is_ok());
        assert!(matches!(loader.content("missing"), Err(TemplateError::NotFound(_))));
        assert_eq!(loader.list(), vec!["index".to_string(), "partials/nav".to_string()]);
    }
}
