//! The engine's entry point: `request_profile_update`, usable synchronously or
//! fire-and-check-later.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::profile::builder::ProfileBuilder;
use crate::profile::coordinator::{update_key, CoordinatorStats, UpdateCoordinator, UpdateOutcome};
use crate::profile::error::ProfileError;
use crate::profile::models::{CandidateProfile, ProfileTrigger};
use crate::profile::store::ProfileStore;

#[derive(Clone)]
pub struct ProfileService {
    builder: ProfileBuilder,
    coordinator: Arc<UpdateCoordinator>,
    store: Arc<dyn ProfileStore>,
}

impl ProfileService {
    pub fn new(
        builder: ProfileBuilder,
        coordinator: Arc<UpdateCoordinator>,
        store: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            builder,
            coordinator,
            store,
        }
    }

    /// Produces (or reuses) the profile version for `trigger`.
    ///
    /// Concurrent calls for the same candidate and trigger share one build.
    /// A repeat within the idempotency window returns the cached version.
    pub async fn request_profile_update(
        &self,
        candidate_id: Uuid,
        trigger: ProfileTrigger,
    ) -> UpdateOutcome {
        trigger.validate()?;
        let key = update_key(candidate_id, &trigger);
        let builder = self.builder.clone();

        let outcome = self
            .coordinator
            .run(&key, move || async move { builder.build(candidate_id, &trigger).await })
            .await;

        match &outcome {
            Ok(profile) => info!(
                %candidate_id,
                key = %key,
                version = profile.version,
                "profile update resolved"
            ),
            Err(err) => warn!(
                %candidate_id,
                key = %key,
                kind = ?err.kind(),
                error = %err,
                "profile update failed"
            ),
        }
        outcome
    }

    /// Starts the update in the background. Poll `latest` for the result.
    pub fn spawn_profile_update(&self, candidate_id: Uuid, trigger: ProfileTrigger) -> Result<(), ProfileError> {
        trigger.validate()?;
        let service = self.clone();
        tokio::spawn(async move {
            // outcome is logged by request_profile_update
            let _ = service.request_profile_update(candidate_id, trigger).await;
        });
        Ok(())
    }

    pub async fn latest(&self, candidate_id: Uuid) -> Result<CandidateProfile, ProfileError> {
        self.store
            .latest_by_candidate(candidate_id)
            .await?
            .ok_or_else(|| ProfileError::NotFound(format!("profile for candidate {candidate_id}")))
    }

    pub async fn history(&self, candidate_id: Uuid) -> Result<Vec<CandidateProfile>, ProfileError> {
        Ok(self.store.list_by_candidate(candidate_id).await?)
    }

    pub fn coordinator_stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::profile::coordinator::CoordinatorConfig;
    use crate::profile::error::ErrorKind;
    use crate::profile::invoker::InvokerConfig;
    use crate::profile::models::ProfileStage;
    use crate::profile::test_support::{analysis_json, Harness, Script};

    fn service(h: &Harness) -> ProfileService {
        ProfileService::new(
            h.builder(),
            Arc::new(UpdateCoordinator::new(CoordinatorConfig::default())),
            h.store.clone(),
        )
    }

    fn slow_analysis() -> Script {
        Script::Delayed(Duration::from_secs(2), analysis_json(68))
    }

    /// Versions 1 (resume) and 2 (after round 1) already exist.
    async fn through_round_one(h: &Harness, service: &ProfileService) {
        service
            .request_profile_update(h.candidate_id, ProfileTrigger::Resume)
            .await
            .unwrap();
        let round_one = h.add_interview(1);
        service
            .request_profile_update(
                h.candidate_id,
                ProfileTrigger::Interview {
                    interview_id: round_one.interview_id,
                    round: 1,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_round_two_submissions_create_one_version() {
        let h = Harness::new(vec![slow_analysis()]);
        let service = service(&h);
        through_round_one(&h, &service).await;
        assert_eq!(h.store.versions(h.candidate_id), vec![1, 2]);

        let round_two = h.add_interview(2);
        let trigger = ProfileTrigger::Interview {
            interview_id: round_two.interview_id,
            round: 2,
        };
        let calls_before = h.provider.calls();

        let (first, second) = tokio::join!(
            service.request_profile_update(h.candidate_id, trigger.clone()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                service.request_profile_update(h.candidate_id, trigger.clone()).await
            }
        );

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.version, 3);
        assert_eq!(first.stage, ProfileStage::AfterInterview(2));
        assert!(Arc::ptr_eq(&first, &second), "second caller joined the first");
        assert_eq!(h.provider.calls() - calls_before, 1, "one build");
        assert_eq!(h.store.versions(h.candidate_id), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_within_window_is_served_from_cache() {
        let h = Harness::new(vec![Script::Respond(analysis_json(70))]);
        let service = service(&h);

        let first = service
            .request_profile_update(h.candidate_id, ProfileTrigger::Resume)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        let again = service
            .request_profile_update(h.candidate_id, ProfileTrigger::Resume)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.store.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_versions_stay_contiguous_across_rounds() {
        let h = Harness::new(vec![Script::Respond(analysis_json(66))]);
        let service = service(&h);
        through_round_one(&h, &service).await;

        // Both analyses finish together, so both writers first aim for version 3.
        h.provider.push(Script::Delayed(Duration::from_secs(1), analysis_json(66)));
        h.provider.push(Script::Delayed(Duration::from_secs(1), analysis_json(66)));
        let creates_before = h.store.create_calls();

        let round_two = h.add_interview(2);
        let round_three = h.add_interview(3);
        let (two, three) = tokio::join!(
            service.request_profile_update(
                h.candidate_id,
                ProfileTrigger::Interview {
                    interview_id: round_two.interview_id,
                    round: 2,
                },
            ),
            service.request_profile_update(
                h.candidate_id,
                ProfileTrigger::Interview {
                    interview_id: round_three.interview_id,
                    round: 3,
                },
            )
        );
        let mut overlapped = vec![two.unwrap().version, three.unwrap().version];
        overlapped.sort_unstable();
        assert_eq!(overlapped, vec![3, 4]);
        assert_eq!(
            h.store.create_calls() - creates_before,
            3,
            "one of the two writers retried after a version conflict"
        );

        service
            .request_profile_update(h.candidate_id, ProfileTrigger::FinalEvaluation)
            .await
            .unwrap();

        assert_eq!(h.store.versions(h.candidate_id), vec![1, 2, 3, 4, 5]);
        let latest = service.latest(h.candidate_id).await.unwrap();
        assert_eq!(latest.stage, ProfileStage::FinalEvaluation);
        assert!(latest.data_sources.contains(&"after_interview_3".to_string()));
    }

    /// A builder whose analysis call never returns within the test.
    fn hanging_service(h: &Harness) -> (ProfileService, Arc<UpdateCoordinator>) {
        let coordinator = Arc::new(UpdateCoordinator::new(CoordinatorConfig::default()));
        let builder = h.builder_with(InvokerConfig {
            attempt_timeout: Duration::from_secs(3600),
            max_retries: 0,
            backoff_step: Duration::from_millis(100),
        });
        let service = ProfileService::new(builder, Arc::clone(&coordinator), h.store.clone());
        (service, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_joiner_of_hung_build_times_out_and_key_is_freed() {
        let h = Harness::new(vec![Script::Hang]);
        let (service, coordinator) = hanging_service(&h);
        let key = update_key(h.candidate_id, &ProfileTrigger::Resume);

        service.spawn_profile_update(h.candidate_id, ProfileTrigger::Resume).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(coordinator.stats().in_flight, 1);

        let err = service
            .request_profile_update(h.candidate_id, ProfileTrigger::Resume)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WaitTimeout);
        assert!(
            coordinator.acquire_or_join(&key).is_owner(),
            "stale lock discarded, a new owner is accepted"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_frees_key_of_hung_build() {
        let h = Harness::new(vec![Script::Hang]);
        let (service, coordinator) = hanging_service(&h);
        let key = update_key(h.candidate_id, &ProfileTrigger::Resume);

        service.spawn_profile_update(h.candidate_id, ProfileTrigger::Resume).unwrap();
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(coordinator.stats().in_flight, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(coordinator.stats().in_flight, 0, "swept at 60s");
        assert!(coordinator.acquire_or_join(&key).is_owner());
        assert_eq!(h.store.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_trigger_is_rejected_before_coordination() {
        let h = Harness::new(vec![Script::Respond(analysis_json(70))]);
        let service = service(&h);
        let err = service
            .request_profile_update(
                h.candidate_id,
                ProfileTrigger::Interview {
                    interview_id: Uuid::new_v4(),
                    round: 0,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(service.coordinator_stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_check_later() {
        let h = Harness::new(vec![Script::Respond(analysis_json(70))]);
        let service = service(&h);

        assert!(matches!(
            service.latest(h.candidate_id).await,
            Err(ProfileError::NotFound(_))
        ));
        service.spawn_profile_update(h.candidate_id, ProfileTrigger::Resume).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let latest = service.latest(h.candidate_id).await.unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(service.history(h.candidate_id).await.unwrap().len(), 1);
    }
}
