use std::time::Duration;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::deadline::with_deadline;
use crate::gemini::GenerationClient;
use crate::models::{GenerationOutcome, GenerationRequest};

/// Issues every request concurrently, each raced against `limit`, and waits for
/// all of them to settle. Returns one outcome per request; callers correlate by
/// label, never by position. One failure never affects its siblings.
pub async fn run_batch(
    client: &dyn GenerationClient,
    requests: Vec<GenerationRequest>,
    limit: Duration,
) -> Vec<GenerationOutcome> {
    info!("🚀 Dispatching batch of {} generation request(s)", requests.len());

    let calls = requests.into_iter().map(move |request| async move {
        let GenerationRequest { label, prompt, reference_images } = request;
        match with_deadline(limit, client.generate_image(&prompt, &reference_images)).await {
            Ok(result_url) => {
                info!("✅ Generated '{}'", label);
                GenerationOutcome::Success { label, result_url }
            }
            Err(e) => {
                warn!("❌ Failed to generate '{}': {}", label, e);
                GenerationOutcome::Failure { label, reason: e.to_string() }
            }
        }
    });

    let outcomes = join_all(calls).await;
    let failed: Vec<&str> = outcomes.iter().filter(|o| !o.is_success()).map(GenerationOutcome::label).collect();
    info!("📦 Batch settled: {} succeeded, {} failed {:?}", outcomes.len() - failed.len(), failed.len(), failed);
    outcomes
}

/// `(label, result_url)` pairs of the successful outcomes.
pub fn successes(outcomes: &[GenerationOutcome]) -> impl Iterator<Item = (&str, &str)> {
    outcomes.iter().filter_map(|o| match o {
        GenerationOutcome::Success { label, result_url } => Some((label.as_str(), result_url.as_str())),
        GenerationOutcome::Failure { .. } => None,
    })
}

pub fn all_failed(outcomes: &[GenerationOutcome]) -> bool {
    !outcomes.iter().any(GenerationOutcome::is_success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::IMAGE_CALL_LIMIT;
    use crate::fake::{FakeClient, ImageBehavior};
    use crate::gemini::GenerationError;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn request(label: &str) -> GenerationRequest {
        GenerationRequest { label: label.into(), prompt: format!("style: {label}"), reference_images: Vec::new() }
    }

    fn labels(outcomes: &[GenerationOutcome]) -> HashSet<&str> {
        outcomes.iter().map(GenerationOutcome::label).collect()
    }

    #[tokio::test]
    async fn one_outcome_per_request_matched_by_label() {
        let fake = FakeClient::new();
        fake.on_prompt("Quiff", ImageBehavior::Fail(GenerationError::NoImageProduced));
        let input = ["Crew Cut", "Undercut", "Quiff", "Buzz Cut"];

        let outcomes = run_batch(&*fake, input.iter().map(|l| request(l)).collect(), IMAGE_CALL_LIMIT).await;

        assert_eq!(outcomes.len(), input.len());
        assert_eq!(labels(&outcomes), input.iter().copied().collect::<HashSet<_>>());
        let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).map(|o| o.label()).collect();
        assert_eq!(failed, vec!["Quiff"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_request_does_not_hold_back_siblings() {
        let fake = FakeClient::new();
        fake.on_prompt("Pompadour", ImageBehavior::Stall);
        fake.on_prompt("Undercut", ImageBehavior::SucceedAfter(Duration::from_secs(2)));
        let started = tokio::time::Instant::now();

        let outcomes = run_batch(
            &*fake,
            vec![request("Pompadour"), request("Undercut"), request("Crew Cut")],
            IMAGE_CALL_LIMIT,
        )
        .await;

        let stalled = outcomes.iter().find(|o| o.label() == "Pompadour").unwrap();
        assert_eq!(
            stalled,
            &GenerationOutcome::Failure {
                label: "Pompadour".into(),
                reason: GenerationError::Timeout(IMAGE_CALL_LIMIT).to_string(),
            }
        );
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 2);

        let completed = fake.completed.lock();
        assert_eq!(completed.len(), 2);
        for (_, finished_at) in completed.iter() {
            assert!(finished_at.duration_since(started) < IMAGE_CALL_LIMIT);
        }
    }

    #[tokio::test]
    async fn all_failures_are_still_reported() {
        let fake = FakeClient::new();
        fake.on_prompt("style", ImageBehavior::Fail(GenerationError::Transport("offline".into())));

        let outcomes = run_batch(&*fake, vec![request("Braids"), request("Ponytail")], IMAGE_CALL_LIMIT).await;

        assert_eq!(outcomes.len(), 2);
        assert!(all_failed(&outcomes));
        assert_eq!(successes(&outcomes).count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_yields_no_outcomes() {
        let fake = FakeClient::new();
        let outcomes = run_batch(&*fake, Vec::new(), IMAGE_CALL_LIMIT).await;
        assert!(outcomes.is_empty());
        assert_eq!(fake.image_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
