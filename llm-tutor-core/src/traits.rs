use async_trait::async_trait;

use crate::domain::{GenerationRequest, GenerationResponse, RequestContext};
use crate::error::{ClassifiedError, ProviderError};

/// Overrides the default retry decision.
pub trait RetryCondition: Send + Sync {
    fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool;
}

impl<F> RetryCondition for F
where
    F: Fn(&ClassifiedError, u32) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool {
        self(error, attempt)
    }
}

/// Produces the substitute text returned when the primary path gives up.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        context: &RequestContext,
        error: &ClassifiedError,
    ) -> anyhow::Result<String>;
}

/// Scores a response in `0.0..=1.0`.
pub trait QualityChecker: Send + Sync {
    fn score(&self, response: &str, context: &RequestContext) -> f64;
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ProviderError>;
}
