use rand::Rng;
use std::ops::RangeInclusive;
use tokio::time::{sleep, Duration};

/// Pause after the sign-in page loads, before posting credentials.
pub const AFTER_SIGN_IN_PAGE: RangeInclusive<u64> = 10..=20;
/// Pause after the confirmation page, before completing the handshake.
pub const AFTER_CONFIRMATION: RangeInclusive<u64> = 2..=5;
/// Pause after the portal home page.
pub const AFTER_PORTAL: RangeInclusive<u64> = 3..=8;
/// Pause after the consumption page, before asking for the download token.
pub const AFTER_CONSUMPTION_PAGE: RangeInclusive<u64> = 2..=5;

/// Human-looking random pauses between steps of the portal walk.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    enabled: bool,
}

impl Pacing {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub async fn pause(&self, seconds: RangeInclusive<u64>) {
        if !self.enabled {
            return;
        }
        let secs = pick_seconds(seconds);
        tracing::debug!(seconds = secs, "Pausing between portal requests");
        sleep(Duration::from_secs(secs)).await;
    }
}

fn pick_seconds(range: RangeInclusive<u64>) -> u64 {
    rand::thread_rng().gen_range(range)
}
