// Rate limiting for research requests, backed by governor

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::warn;

use crate::models::AppState;
use crate::types::{AppError, AppResult};

/// Process-wide limiter for session starts. A zero quota disables it.
pub struct ResearchRateLimiter {
    inner: Option<DefaultDirectRateLimiter>,
    per_minute: u32,
}

impl ResearchRateLimiter {
    pub fn new(per_minute: u32) -> Self {
        let inner = NonZeroU32::new(per_minute).map(|n| RateLimiter::direct(Quota::per_minute(n)));
        Self { inner, per_minute }
    }

    pub fn check(&self) -> AppResult<()> {
        match &self.inner {
            Some(limiter) if limiter.check().is_err() => Err(AppError::RateLimited(format!(
                "at most {} research requests per minute",
                self.per_minute
            ))),
            _ => Ok(()),
        }
    }
}

pub async fn rate_limiter_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Err(e) = state.rate_limiter.check() {
        warn!(path = %req.uri().path(), "Rate limit exceeded");
        return Err(e);
    }
    Ok(next.run(req).await)
}
