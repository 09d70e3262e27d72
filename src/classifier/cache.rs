//! Кэш ответов внешних сервисов
//!
//! JSON-файл `{version, entries}`: ключ запроса → ответ. Запись в файл
//! идёт под тем же мьютексом, что и карта, поэтому ключ пишется не
//! больше одного раза.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use okpd_common::CodeEntry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ClassificationClient, WebSearch};
use crate::error::Result;
use crate::workbook::temp_path_for;

pub const CLASSIFIER_CACHE_FILE: &str = "okpd2-cache.json";
pub const SEARCH_CACHE_FILE: &str = "search-cache.json";

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile<V> {
    version: u32,
    entries: HashMap<String, V>,
}

impl<V> Default for CacheFile<V> {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            entries: HashMap::new(),
        }
    }
}

pub struct JsonCache<V> {
    path: PathBuf,
    file: Mutex<CacheFile<V>>,
}

impl<V> JsonCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Читает кэш; битый файл или другая версия дают пустой кэш
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = Self::read(&path).unwrap_or_default();
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    fn read(path: &Path) -> Option<CacheFile<V>> {
        if !path.exists() {
            return None;
        }
        let reader = BufReader::new(File::open(path).ok()?);
        match serde_json::from_reader::<_, CacheFile<V>>(reader) {
            Ok(cache) if cache.version == CURRENT_VERSION => Some(cache),
            Ok(_) => {
                warn!("Версия кэша {} не совпадает, кэш создаётся заново", path.display());
                None
            }
            Err(e) => {
                warn!("Кэш {} не прочитан: {}", path.display(), e);
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheFile<V>> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, file: &CacheFile<V>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = temp_path_for(&self.path);
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(writer, file)?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().entries.get(key).cloned()
    }

    /// Добавляет запись, если ключа ещё нет; `true` если добавлено
    pub fn insert(&self, key: &str, value: V) -> Result<bool> {
        let mut file = self.lock();
        if file.entries.contains_key(key) {
            return Ok(false);
        }
        file.entries.insert(key.to_string(), value);
        self.persist(&file)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Очищает кэш и удаляет файл
    pub fn clear(&self) -> Result<()> {
        let mut file = self.lock();
        file.entries.clear();
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Классификатор с кэшем ответов
pub struct CachedClassifier<C> {
    inner: C,
    cache: JsonCache<Vec<CodeEntry>>,
}

impl<C: ClassificationClient> CachedClassifier<C> {
    pub fn new(inner: C, cache: JsonCache<Vec<CodeEntry>>) -> Self {
        Self { inner, cache }
    }

    pub fn in_dir(inner: C, cache_dir: &Path) -> Self {
        Self::new(inner, JsonCache::load(cache_dir.join(CLASSIFIER_CACHE_FILE)))
    }

    pub fn cache(&self) -> &JsonCache<Vec<CodeEntry>> {
        &self.cache
    }
}

impl<C: ClassificationClient> ClassificationClient for CachedClassifier<C> {
    async fn classify(&self, texts: &[String]) -> Result<HashMap<String, Vec<CodeEntry>>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        for text in texts {
            match self.cache.get(text) {
                Some(entries) => {
                    found.insert(text.clone(), entries);
                }
                None => missing.push(text.clone()),
            }
        }
        debug!("Кэш классификатора: {} найдено, {} запросов", found.len(), missing.len());

        if !missing.is_empty() {
            for (text, entries) in self.inner.classify(&missing).await? {
                if let Err(e) = self.cache.insert(&text, entries.clone()) {
                    warn!("Кэш классификатора не записан: {}", e);
                }
                found.insert(text, entries);
            }
        }
        Ok(found)
    }
}

/// Поиск с кэшем ответов
pub struct CachedSearch<S> {
    inner: S,
    cache: JsonCache<Vec<String>>,
}

impl<S: WebSearch> CachedSearch<S> {
    pub fn new(inner: S, cache: JsonCache<Vec<String>>) -> Self {
        Self { inner, cache }
    }

    pub fn in_dir(inner: S, cache_dir: &Path) -> Self {
        Self::new(inner, JsonCache::load(cache_dir.join(SEARCH_CACHE_FILE)))
    }
}

impl<S: WebSearch> WebSearch for CachedSearch<S> {
    async fn search(&self, query: &str) -> Result<Vec<String>> {
        if let Some(snippets) = self.cache.get(query) {
            return Ok(snippets);
        }
        let snippets = self.inner.search(query).await?;
        if let Err(e) = self.cache.insert(query, snippets.clone()) {
            warn!("Кэш поиска не записан: {}", e);
        }
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn test_insert_once_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache: JsonCache<Vec<String>> = JsonCache::load(&path);
        assert!(cache.is_empty());
        assert!(cache.insert("болт", vec!["a".into()]).unwrap());
        assert!(!cache.insert("болт", vec!["b".into()]).unwrap());

        let reloaded: JsonCache<Vec<String>> = JsonCache::load(&path);
        assert_eq!(reloaded.get("болт"), Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_version_mismatch_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"version": 99, "entries": {"x": ["y"]}}"#).unwrap();

        let cache: JsonCache<Vec<String>> = JsonCache::load(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache: JsonCache<Vec<String>> = JsonCache::load(&path);
        cache.insert("k", vec![]).unwrap();
        assert!(path.exists());
        cache.clear().unwrap();
        assert!(!path.exists());
        assert!(cache.is_empty());
    }

    struct CountingClassifier(AtomicUsize);

    impl ClassificationClient for CountingClassifier {
        async fn classify(&self, texts: &[String]) -> Result<HashMap<String, Vec<CodeEntry>>> {
            self.0.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| (t.clone(), vec![CodeEntry::new("25.94.11.120", "Болты")]))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_cached_classifier_asks_once() {
        let dir = tempdir().unwrap();
        let classifier = CachedClassifier::in_dir(CountingClassifier(AtomicUsize::new(0)), dir.path());

        let texts = vec!["болт".to_string()];
        let first = classifier.classify(&texts).await.unwrap();
        let second = classifier.classify(&texts).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(classifier.inner.0.load(Ordering::SeqCst), 1);
        assert_eq!(classifier.cache().len(), 1);
    }
}
