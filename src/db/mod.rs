//! Case registry abstraction.
//!
//! Handlers only see `Arc<dyn CaseStore>`. The in-memory backend holds all
//! state inside the process; a shared backend (e.g. a key-value cache) can be
//! dropped in as long as it keeps `drain` atomic: read both buffers, empty
//! them and advance the thread counter as one step.

pub mod memory;

pub use memory::InMemoryCaseStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::legal::case::{CaseId, ConversationTurn, Drained, PendingCounts};

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Buffer `turns` for the case and mark it as the active case.
    async fn append(
        &self,
        case_id: &CaseId,
        turns: &[ConversationTurn],
    ) -> Result<PendingCounts, StoreError>;

    /// Deliver and empty the buffers of `case_id`, or of the active case when
    /// `None`. Fails when the case does not exist.
    async fn drain(&self, case_id: Option<&CaseId>) -> Result<Drained, StoreError>;

    /// Reset the case to a fresh record and mark it as the active case.
    async fn clear(&self, case_id: &CaseId) -> Result<(), StoreError>;
}
