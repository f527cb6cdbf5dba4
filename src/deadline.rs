use std::future::Future;
use std::time::Duration;

use crate::gemini::GenerationError;

/// Wall-clock bound for a single image generation call.
pub const IMAGE_CALL_LIMIT: Duration = Duration::from_secs(60);

/// Races `call` against a timer. On expiry the call is dropped locally and
/// `Timeout` is returned; the remote side may still finish the work.
pub async fn with_deadline<F, T>(limit: Duration, call: F) -> Result<T, GenerationError>
where
    F: Future<Output = Result<T, GenerationError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout(limit)),
    }
}
