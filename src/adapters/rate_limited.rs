//! Request throttling for model-backed providers.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{FieldSpec, RateLimitConfig, RawCandidate};
use crate::domain::ports::{
    ExtractionInput, ExtractionProvider, GenerationContext, GenerationProvider, ProviderError, TextModel,
};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket quota for the configured rate and burst.
pub fn quota(config: &RateLimitConfig) -> Quota {
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
    let rps = config.requests_per_second;
    let period = if rps.is_finite() && rps > 0.0 {
        Duration::from_secs_f64(1.0 / rps)
    } else {
        Duration::from_secs(1)
    };
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
        .allow_burst(burst)
}

/// Wraps a provider so every call first waits for a rate-limit permit.
///
/// Clones share one limiter.
pub struct RateLimited<P: ?Sized> {
    limiter: Arc<DirectLimiter>,
    inner: Arc<P>,
}

impl<P: ?Sized> Clone for RateLimited<P> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ?Sized> RateLimited<P> {
    pub fn new(inner: Arc<P>, config: &RateLimitConfig) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota(config))),
            inner,
        }
    }

    /// Share `limiter` with another wrapped provider.
    pub fn sharing<Q: ?Sized>(inner: Arc<P>, other: &RateLimited<Q>) -> Self {
        Self {
            limiter: Arc::clone(&other.limiter),
            inner,
        }
    }

    async fn permit(&self) {
        self.limiter.until_ready().await;
    }
}

#[async_trait]
impl<P> ExtractionProvider for RateLimited<P>
where
    P: ExtractionProvider + ?Sized,
{
    async fn extract_once(&self, input: &ExtractionInput) -> Result<Vec<RawCandidate>, ProviderError> {
        self.permit().await;
        self.inner.extract_once(input).await
    }
}

#[async_trait]
impl<P> GenerationProvider for RateLimited<P>
where
    P: GenerationProvider + ?Sized,
{
    async fn generate_field(&self, spec: &FieldSpec, context: &GenerationContext) -> Result<String, ProviderError> {
        self.permit().await;
        self.inner.generate_field(spec, context).await
    }
}

#[async_trait]
impl<P> TextModel for RateLimited<P>
where
    P: TextModel + ?Sized,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        self.permit().await;
        self.inner.complete(system, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::ScriptedGenerationProvider;
    use crate::domain::models::WordCountRange;

    #[test]
    fn test_quota_from_config() {
        let config = RateLimitConfig {
            requests_per_second: 4.0,
            burst_size: 3,
        };
        let quota = quota(&config);
        assert_eq!(quota.burst_size().get(), 3);
        assert_eq!(quota.replenish_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_quota_tolerates_bad_values() {
        let config = RateLimitConfig {
            requests_per_second: 0.0,
            burst_size: 0,
        };
        let quota = quota(&config);
        assert_eq!(quota.burst_size().get(), 1);
        assert_eq!(quota.replenish_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_calls_pass_through_within_burst() {
        let inner = Arc::new(ScriptedGenerationProvider::always("a lantern of green jade"));
        let limited = RateLimited::new(Arc::clone(&inner), &RateLimitConfig::default());
        let spec = FieldSpec::new("PROP_LANTERN.description", "PROP_LANTERN", "describe", WordCountRange::new(1, 10));

        for _ in 0..3 {
            let text = limited.generate_field(&spec, &GenerationContext::new()).await.unwrap();
            assert_eq!(text, "a lantern of green jade");
        }
        assert_eq!(inner.calls(), 3);
    }
}
