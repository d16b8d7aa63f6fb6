//! Where source table lists come from.
//!
//! Table discovery happens upstream; this module only defines the interface
//! and two simple sources, plus a cache that lives for one provisioning run.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Supplies the ordered list of tables to copy (`schema.table` or bare).
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Stable key used to memoize results within one run.
    fn cache_key(&self) -> String;

    /// Returns the tables, in copy order.
    async fn tables(&self) -> Result<Vec<String>>;
}

/// A fixed list, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTableSource {
    tables: Vec<String>,
}

impl StaticTableSource {
    /// Creates a source over `tables`.
    pub fn new(tables: Vec<String>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl TableSource for StaticTableSource {
    fn cache_key(&self) -> String {
        format!("static:{}", self.tables.join(","))
    }

    async fn tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.clone())
    }
}

/// A text file with one table per line. Blank lines and `#` comments are
/// ignored.
#[derive(Debug, Clone)]
pub struct FileTableSource {
    path: PathBuf,
}

impl FileTableSource {
    /// Creates a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parses file contents into table identifiers.
    #[must_use]
    pub fn parse(contents: &str) -> Vec<String> {
        contents
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl TableSource for FileTableSource {
    fn cache_key(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Config(format!(
                "cannot read tables file {}: {e}",
                self.path.display()
            ))
        })?;
        let tables = Self::parse(&contents);
        debug!("{} tables read from {}", tables.len(), self.path.display());
        Ok(tables)
    }
}

/// Table lists discovered during one provisioning run, keyed by source.
///
/// Create one per run and pass it down; it is never shared between runs.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    tables: Mutex<HashMap<String, Vec<String>>>,
}

impl DiscoveryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tables of `source`, asking it only on first use.
    ///
    /// # Errors
    ///
    /// Propagates the source's error; failures are not cached.
    pub async fn tables(&self, source: &dyn TableSource) -> Result<Vec<String>> {
        let key = source.cache_key();
        let mut cache = self.tables.lock().await;
        if let Some(tables) = cache.get(&key) {
            debug!("table list for {} served from cache", key);
            return Ok(tables.clone());
        }
        let tables = source.tables().await?;
        cache.insert(key, tables.clone());
        Ok(tables)
    }

    /// Number of cached sources.
    pub async fn len(&self) -> usize {
        self.tables.lock().await.len()
    }

    /// True when nothing has been cached yet.
    pub async fn is_empty(&self) -> bool {
        self.tables.lock().await.is_empty()
    }
}
