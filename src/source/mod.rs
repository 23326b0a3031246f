//! Sources of usage data and the decorators layered over them.

mod cached;
mod guarded;

use crate::error::EsbError;
use crate::model::UsageData;
use async_trait::async_trait;

pub use cached::{meter_cache_path, CachedSource};
pub use guarded::GuardedSource;

/// Something that can produce the interval readings of one meter.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Name used in logs, normally the MPRN.
    fn name(&self) -> &str;

    async fn fetch_usage(&self) -> Result<UsageData, EsbError>;
}
