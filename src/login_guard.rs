use crate::config::LoginGuardSettings;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Where a meter's login attempts currently stand.
#[derive(Debug, Clone)]
pub enum GuardState {
    /// Logins proceed normally
    Open {
        /// Consecutive failed fetches so far
        failure_count: u32,
    },
    /// Too many failures; logins are held back
    Suspended {
        /// When the suspension began
        since: Instant,
    },
    /// Cooldown elapsed; one trial login decides what happens next
    Trial,
}

#[derive(Debug, Clone)]
pub struct LoginGuardConfig {
    /// Consecutive failures that suspend logins
    pub failure_threshold: u32,
    /// How long logins stay suspended
    pub cooldown: Duration,
}

impl From<&LoginGuardSettings> for LoginGuardConfig {
    fn from(settings: &LoginGuardSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: Duration::from_secs(settings.cooldown_seconds),
        }
    }
}

/// Holds back repeated sign-ins after consecutive failures.
///
/// The identity provider locks accounts that fail too often, so after
/// `failure_threshold` failed fetches in a row the meter is left alone for
/// `cooldown`, then a single trial fetch either resumes normal operation or
/// starts another cooldown.
#[derive(Debug, Clone)]
pub struct LoginGuard {
    state: Arc<Mutex<GuardState>>,
    config: LoginGuardConfig,
    mprn: String,
}

impl LoginGuard {
    pub fn new(mprn: impl Into<String>, config: LoginGuardConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(GuardState::Open { failure_count: 0 })),
            config,
            mprn: mprn.into(),
        }
    }

    /// Whether a login may be attempted now.
    pub async fn attempt_allowed(&self) -> bool {
        let mut state = self.state.lock().await;

        match &*state {
            GuardState::Open { .. } | GuardState::Trial => true,
            GuardState::Suspended { since } => {
                if since.elapsed() >= self.config.cooldown {
                    tracing::info!(mprn = %self.mprn, "Login cooldown over, allowing a trial login");
                    *state = GuardState::Trial;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, GuardState::Trial) {
            tracing::info!(mprn = %self.mprn, "Trial login succeeded, resuming updates");
        }
        *state = GuardState::Open { failure_count: 0 };
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;

        match &*state {
            GuardState::Open { failure_count } => {
                let failure_count = failure_count + 1;
                if failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        mprn = %self.mprn,
                        failure_count,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "Suspending logins after repeated failures"
                    );
                    *state = GuardState::Suspended {
                        since: Instant::now(),
                    };
                } else {
                    *state = GuardState::Open { failure_count };
                }
            }
            GuardState::Trial => {
                tracing::warn!(mprn = %self.mprn, "Trial login failed, suspending again");
                *state = GuardState::Suspended {
                    since: Instant::now(),
                };
            }
            GuardState::Suspended { .. } => {
                tracing::warn!(mprn = %self.mprn, "Failure recorded while logins are suspended");
            }
        }
    }
}
