use crate::error::EsbError;
use crate::model::UsageData;
use crate::source::UsageSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Development cache around a usage source.
///
/// With `use_cache` set and the file present, readings come from the file and the
/// portal is left alone. Otherwise every successful live fetch is written to the file.
pub struct CachedSource {
    inner: Arc<dyn UsageSource>,
    path: PathBuf,
    use_cache: bool,
}

impl CachedSource {
    pub fn new(inner: Arc<dyn UsageSource>, path: PathBuf, use_cache: bool) -> Self {
        Self {
            inner,
            path,
            use_cache,
        }
    }
}

/// Cache file of one meter: the MPRN is appended to the stem of the configured path,
/// so `esb_cache.json` becomes `esb_cache_{mprn}.json` in the same directory.
pub fn meter_cache_path(base: &Path, mprn: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match base.extension() {
        Some(ext) => format!("{}_{}.{}", stem, mprn, ext.to_string_lossy()),
        None => format!("{}_{}", stem, mprn),
    };
    base.with_file_name(file_name)
}

fn load(path: &Path) -> Result<UsageData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn store(path: &Path, data: &UsageData) -> Result<()> {
    let content = serde_json::to_string_pretty(data).context("Failed to serialize usage data")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[async_trait]
impl UsageSource for CachedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_usage(&self) -> Result<UsageData, EsbError> {
        if self.use_cache && self.path.exists() {
            match load(&self.path) {
                Ok(data) => {
                    tracing::info!(
                        source = %self.name(),
                        readings = data.readings.len(),
                        path = %self.path.display(),
                        "Using cached ESB data"
                    );
                    return Ok(data);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to load cache, fetching fresh data")
                }
            }
        }

        let data = self.inner.fetch_usage().await?;

        if !self.use_cache {
            match store(&self.path, &data) {
                Ok(()) => tracing::info!(
                    readings = data.readings.len(),
                    path = %self.path.display(),
                    "Cached readings"
                ),
                Err(err) => tracing::warn!(error = %err, "Failed to cache data"),
            }
        }
        Ok(data)
    }
}
