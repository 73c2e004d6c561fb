//! One-time challenge issuance and consumption, plus signature counter checks.

use chrono::{Duration, Utc};
use std::sync::Arc;

use super::error::{CoreError, StoreError};
use super::redis::ChallengeStore;
use crate::models::{Challenge, ChallengePurpose, EmailAddress};
use crate::utils::generate_token;

#[derive(Clone)]
pub struct ChallengeService {
    store: Arc<dyn ChallengeStore>,
    ttl: Duration,
    enrolment_ttl: Duration,
}

impl ChallengeService {
    pub fn new(store: Arc<dyn ChallengeStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            enrolment_ttl: Duration::hours(24),
        }
    }

    pub fn with_enrolment_ttl(mut self, enrolment_ttl: Duration) -> Self {
        self.enrolment_ttl = enrolment_ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_for(&self, purpose: ChallengePurpose) -> Duration {
        match purpose {
            ChallengePurpose::Enrolment => self.enrolment_ttl,
            ChallengePurpose::Registration | ChallengePurpose::Authentication => self.ttl,
        }
    }

    /// Issue a fresh challenge, replacing any unconsumed one for the same
    /// email and purpose.
    pub async fn issue_challenge(
        &self,
        email: &EmailAddress,
        purpose: ChallengePurpose,
    ) -> Result<Challenge, CoreError> {
        let ttl = self.ttl_for(purpose);
        let challenge = Challenge::new(generate_token(), email.clone(), purpose, ttl);
        self.store
            .put(&challenge, ttl.num_seconds())
            .await
            .map_err(|e| CoreError::Store(StoreError::Backend(e)))?;
        tracing::debug!(purpose = purpose.as_str(), "Challenge issued");
        Ok(challenge)
    }

    /// Consume the outstanding challenge. Succeeds at most once per issuance;
    /// an expired challenge counts as consumed.
    pub async fn consume_challenge(
        &self,
        email: &EmailAddress,
        purpose: ChallengePurpose,
    ) -> Result<String, CoreError> {
        let key = Challenge::key_for(email, purpose);
        let taken = self
            .store
            .take(&key)
            .await
            .map_err(|e| CoreError::Store(StoreError::Backend(e)))?;

        match taken {
            Some(challenge) if !challenge.is_expired_at(Utc::now()) => Ok(challenge.value),
            Some(_) => {
                tracing::info!(purpose = purpose.as_str(), "Expired challenge presented");
                Err(CoreError::ChallengeExpiredOrConsumed)
            }
            None => Err(CoreError::ChallengeExpiredOrConsumed),
        }
    }
}

/// An assertion is only fresh if its counter moved strictly forward.
pub fn check_counter(stored: u32, presented: u32) -> Result<(), CoreError> {
    if presented > stored {
        Ok(())
    } else {
        Err(CoreError::ReplayDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::redis::MockChallengeStore;

    fn service(ttl: Duration) -> ChallengeService {
        ChallengeService::new(Arc::new(MockChallengeStore::new()), ttl)
    }

    fn email() -> EmailAddress {
        EmailAddress::parse("dr@example.com").unwrap()
    }

    #[tokio::test]
    async fn challenge_is_consumed_once() {
        let svc = service(Duration::minutes(5));
        let issued = svc
            .issue_challenge(&email(), ChallengePurpose::Authentication)
            .await
            .unwrap();

        let value = svc
            .consume_challenge(&email(), ChallengePurpose::Authentication)
            .await
            .unwrap();
        assert_eq!(value, issued.value);

        assert!(matches!(
            svc.consume_challenge(&email(), ChallengePurpose::Authentication)
                .await,
            Err(CoreError::ChallengeExpiredOrConsumed)
        ));
    }

    #[tokio::test]
    async fn reissue_replaces_outstanding_challenge() {
        let svc = service(Duration::minutes(5));
        let first = svc
            .issue_challenge(&email(), ChallengePurpose::Registration)
            .await
            .unwrap();
        let second = svc
            .issue_challenge(&email(), ChallengePurpose::Registration)
            .await
            .unwrap();
        assert_ne!(first.value, second.value);

        let value = svc
            .consume_challenge(&email(), ChallengePurpose::Registration)
            .await
            .unwrap();
        assert_eq!(value, second.value);
    }

    #[tokio::test]
    async fn purposes_do_not_share_challenges() {
        let svc = service(Duration::minutes(5));
        svc.issue_challenge(&email(), ChallengePurpose::Registration)
            .await
            .unwrap();
        assert!(svc
            .consume_challenge(&email(), ChallengePurpose::Authentication)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn expired_challenge_counts_as_consumed() {
        let svc = service(Duration::seconds(-1));
        svc.issue_challenge(&email(), ChallengePurpose::Authentication)
            .await
            .unwrap();
        assert!(matches!(
            svc.consume_challenge(&email(), ChallengePurpose::Authentication)
                .await,
            Err(CoreError::ChallengeExpiredOrConsumed)
        ));
    }

    #[tokio::test]
    async fn enrolment_tokens_outlive_ceremony_challenges() {
        let svc = service(Duration::seconds(-1)).with_enrolment_ttl(Duration::hours(1));
        let issued = svc
            .issue_challenge(&email(), ChallengePurpose::Enrolment)
            .await
            .unwrap();
        assert!(issued.expiry_utc > Utc::now() + Duration::minutes(59));

        let value = svc
            .consume_challenge(&email(), ChallengePurpose::Enrolment)
            .await
            .unwrap();
        assert_eq!(value, issued.value);
    }

    #[test]
    fn counter_must_strictly_increase() {
        assert!(check_counter(5, 6).is_ok());
        assert!(matches!(check_counter(5, 5), Err(CoreError::ReplayDetected)));
        assert!(matches!(check_counter(5, 4), Err(CoreError::ReplayDetected)));
        assert!(matches!(check_counter(0, 0), Err(CoreError::ReplayDetected)));
    }
}
