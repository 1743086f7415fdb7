//! Client-side bookkeeping for one multipart upload

use crate::UploadError;
use parcel_core::{CompletedPart, PartPlan, PartResult, SessionState};
use std::collections::BTreeMap;

/// One in-progress transfer, owned by the coordinator alone
#[derive(Debug)]
pub struct UploadSession {
    plan: PartPlan,
    state: SessionState,
    results: BTreeMap<u32, PartResult>,
}

impl UploadSession {
    pub fn new(plan: PartPlan) -> Self {
        UploadSession {
            plan,
            state: SessionState::Planning,
            results: BTreeMap::new(),
        }
    }

    pub fn plan(&self) -> &PartPlan {
        &self.plan
    }

    pub fn file_size(&self) -> u64 {
        self.plan.file_size()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) -> Result<(), UploadError> {
        if !self.state.can_transition_to(next) {
            return Err(UploadError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record a finished part.
    ///
    /// Returns false, leaving the session untouched, for a part number
    /// that is outside the plan or already recorded.
    pub fn record(&mut self, result: PartResult) -> bool {
        if self.state != SessionState::Active || self.plan.part(result.part_number).is_none() {
            return false;
        }
        if self.results.contains_key(&result.part_number) {
            return false;
        }
        self.results.insert(result.part_number, result);
        true
    }

    pub fn completed_count(&self) -> u32 {
        self.results.len() as u32
    }

    /// Every planned part has a result
    pub fn is_complete(&self) -> bool {
        self.completed_count() == self.plan.len()
    }

    /// (partNumber, ETag) pairs in ascending part order
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.results.values().map(PartResult::completed_part).collect()
    }

    pub fn into_results(self) -> Vec<PartResult> {
        self.results.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::{ContentDigest, ETag};

    fn session() -> UploadSession {
        UploadSession::new(PartPlan::new(25, 10).unwrap())
    }

    fn result(part_number: u32) -> PartResult {
        PartResult {
            part_number,
            etag: ETag::new(format!("etag-{}", part_number)),
            attempts: 1,
            byte_length: 10,
            digest: ContentDigest::new(&[part_number as u8]),
        }
    }

    #[test]
    fn test_records_once_per_part() {
        let mut session = session();
        session.transition(SessionState::Active).unwrap();

        assert!(session.record(result(2)));
        assert!(!session.record(result(2)));
        assert!(!session.record(result(4)));
        assert!(session.record(result(3)));
        assert!(session.record(result(1)));

        assert!(session.is_complete());
        let numbers: Vec<u32> = session.completed_parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_no_recording_outside_active() {
        let mut session = session();
        assert!(!session.record(result(1)));

        session.transition(SessionState::Active).unwrap();
        session.transition(SessionState::Aborting).unwrap();
        assert!(!session.record(result(1)));
    }

    #[test]
    fn test_commit_and_abort_are_exclusive() {
        let mut session = session();
        session.transition(SessionState::Active).unwrap();
        session.transition(SessionState::Completing).unwrap();

        assert!(matches!(
            session.transition(SessionState::Aborting),
            Err(UploadError::InvalidState { .. })
        ));
        session.transition(SessionState::Committed).unwrap();
        assert!(session.transition(SessionState::Aborted).is_err());
        assert_eq!(session.state(), SessionState::Committed);
    }
}
