use crate::error::EsbError;
use crate::login_guard::LoginGuard;
use crate::model::UsageData;
use crate::source::UsageSource;
use async_trait::async_trait;
use std::sync::Arc;

/// A wrapper that puts a [`LoginGuard`] in front of any usage source.
pub struct GuardedSource {
    /// The source being protected
    inner: Arc<dyn UsageSource>,
    guard: LoginGuard,
}

impl GuardedSource {
    pub fn new(inner: Arc<dyn UsageSource>, guard: LoginGuard) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl UsageSource for GuardedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    /// Fetches through the guard.
    ///
    /// While logins are suspended the inner source is not called and
    /// [`EsbError::Suspended`] is returned instead.
    async fn fetch_usage(&self) -> Result<UsageData, EsbError> {
        if !self.guard.attempt_allowed().await {
            tracing::debug!(source = %self.name(), "Logins suspended, skipping fetch");
            return Err(EsbError::Suspended {
                mprn: self.name().to_string(),
            });
        }

        match self.inner.fetch_usage().await {
            Ok(data) => {
                self.guard.record_success().await;
                Ok(data)
            }
            Err(err) => {
                self.guard.record_failure().await;
                tracing::warn!(
                    source = %self.name(),
                    error = %err,
                    "Fetch failed, login guard recorded failure"
                );
                Err(err)
            }
        }
    }
}
