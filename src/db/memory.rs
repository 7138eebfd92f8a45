//! Process-local case registry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::db::CaseStore;
use crate::error::StoreError;
use crate::legal::case::{CaseId, CaseRecord, ConversationTurn, Drained, PendingCounts};

#[derive(Debug, Default)]
struct RegistryState {
    cases: HashMap<CaseId, CaseRecord>,
    active_case: Option<CaseId>,
}

impl RegistryState {
    fn record_mut(&mut self, case_id: &CaseId) -> &mut CaseRecord {
        self.cases.entry(case_id.clone()).or_default()
    }
}

/// In-memory [`CaseStore`]. Nothing survives a restart.
///
/// The case map and the active-case pointer share one lock, and the lock is
/// never held across an `.await`, so each operation is atomic with respect to
/// every other request.
#[derive(Debug, Default)]
pub struct InMemoryCaseStore {
    state: Mutex<RegistryState>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panic mid-operation cannot leave a half-applied record behind
        // (every mutation is a single push/take), so poisoning is ignored.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of known cases.
    pub fn len(&self) -> usize {
        self.lock().cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the case record, creating an empty one on first reference.
    pub fn get_or_create(&self, case_id: &CaseId) -> CaseRecord {
        self.lock().record_mut(case_id).clone()
    }

    /// Current record without creating it.
    pub fn snapshot(&self, case_id: &CaseId) -> Option<CaseRecord> {
        self.lock().cases.get(case_id).cloned()
    }

    /// Most recently referenced case, if any.
    pub fn active_case(&self) -> Option<CaseId> {
        self.lock().active_case.clone()
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn append(
        &self,
        case_id: &CaseId,
        turns: &[ConversationTurn],
    ) -> Result<PendingCounts, StoreError> {
        let mut state = self.lock();
        state.active_case = Some(case_id.clone());
        let counts = state.record_mut(case_id).append(turns);
        tracing::debug!(
            case_id = %case_id,
            defense = counts.defense,
            prosecutor = counts.prosecutor,
            "Buffered conversation turns"
        );
        Ok(counts)
    }

    async fn drain(&self, case_id: Option<&CaseId>) -> Result<Drained, StoreError> {
        let mut state = self.lock();
        let case_id = match case_id {
            Some(id) => id.clone(),
            None => state.active_case.clone().ok_or(StoreError::NoActiveCase)?,
        };
        let record = state
            .cases
            .get_mut(&case_id)
            .ok_or_else(|| StoreError::CaseNotFound {
                case_id: case_id.to_string(),
            })?;
        let drained = record.drain(case_id);
        tracing::debug!(
            case_id = %drained.case_id,
            thread_id = drained.thread_id,
            "Drained conversation buffers"
        );
        Ok(drained)
    }

    async fn clear(&self, case_id: &CaseId) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.active_case = Some(case_id.clone());
        *state.record_mut(case_id) = CaseRecord::default();
        tracing::debug!(case_id = %case_id, "Cleared case conversation");
        Ok(())
    }
}
