use crate::{config::RateLimitSettings, routes::CallbackError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::time::Instant;

/// A single fixed-window counter for the whole service. At most `max_requests` are
/// admitted between two resets, however they are spread over the window.
pub struct GlobalRateLimiter {
    max_requests: u32,
    window: Duration,
    current: Mutex<Window>,
}

struct Window {
    started: Instant,
    admitted: u32,
}

impl GlobalRateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            max_requests: settings.max_requests.get(),
            window: settings.window,
            current: Mutex::new(Window {
                started: Instant::now(),
                admitted: 0,
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if now.duration_since(current.started) >= self.window {
            *current = Window {
                started: now,
                admitted: 0,
            };
        }
        if current.admitted >= self.max_requests {
            return false;
        }
        current.admitted += 1;
        true
    }
}

pub async fn enforce_rate_limit(
    State(limiter): State<Arc<GlobalRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.try_acquire() {
        return CallbackError::RateLimited.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::GlobalRateLimiter;
    use crate::config::RateLimitSettings;
    use googletest::prelude::*;
    use std::{num::NonZeroU32, time::Duration};
    use tokio::time::advance;

    const WINDOW: Duration = Duration::from_secs(60 * 60);

    fn limiter(max_requests: u32) -> GlobalRateLimiter {
        GlobalRateLimiter::new(&RateLimitSettings {
            max_requests: NonZeroU32::new(max_requests).unwrap(),
            window: WINDOW,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn allows_requests_up_to_cap() -> Result<()> {
        let limiter = limiter(5);

        let admitted = (0..5).filter(|_| limiter.try_acquire()).count();

        verify_that!(admitted, eq(5))
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_requests_beyond_cap_within_window() -> Result<()> {
        let limiter = limiter(5);
        for _ in 0..5 {
            limiter.try_acquire();
        }

        verify_that!(limiter.try_acquire(), eq(false))
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_rejecting_until_window_has_elapsed() -> Result<()> {
        let limiter = limiter(4);
        for _ in 0..4 {
            limiter.try_acquire();
        }

        advance(WINDOW / 4).await;
        let after_a_quarter = limiter.try_acquire();
        advance(WINDOW / 2).await;
        let after_three_quarters = limiter.try_acquire();

        verify_that!(after_a_quarter, eq(false))?;
        verify_that!(after_three_quarters, eq(false))
    }

    #[tokio::test(start_paused = true)]
    async fn admits_a_full_batch_again_after_window() -> Result<()> {
        let limiter = limiter(3);
        for _ in 0..3 {
            limiter.try_acquire();
        }

        advance(WINDOW).await;
        let admitted = (0..4).filter(|_| limiter.try_acquire()).count();

        verify_that!(admitted, eq(3))
    }

    #[tokio::test(start_paused = true)]
    async fn default_settings_admit_two_hundred_requests() -> Result<()> {
        let limiter = GlobalRateLimiter::new(&RateLimitSettings::default());

        let admitted = (0..201).filter(|_| limiter.try_acquire()).count();

        verify_that!(admitted, eq(200))
    }
}
