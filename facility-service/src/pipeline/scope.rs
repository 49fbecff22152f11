use std::collections::HashMap;

use crate::models::{AccessLevel, ExternalSession, FailedAuthorization};
use crate::reconciler::Projector;
use crate::store::{Query, StoreError, Tx};

/// A write that must outlive the request transaction. The pipeline applies
/// it after that transaction has committed or rolled back.
#[derive(Debug, Clone)]
pub enum DurableWrite {
    Failure(FailedAuthorization),
    SpendSession(i64),
}

impl DurableWrite {
    pub async fn apply(self, tx: &mut Tx) -> Result<(), StoreError> {
        match self {
            DurableWrite::Failure(mut failure) => {
                tx.insert(&mut failure).await?;
            }
            DurableWrite::SpendSession(id) => {
                // Already gone when the request committed.
                tx.delete_where::<ExternalSession>(Query::new().eq("id", id))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Everything a request mutates: its transaction and its host command
/// queue. Both are committed or discarded together by the pipeline.
pub struct RequestScope {
    pub tx: Tx,
    pub projector: Projector,
    access: HashMap<(i64, i64), AccessLevel>,
    deferred: Vec<DurableWrite>,
}

impl RequestScope {
    pub fn new(tx: Tx, projector: Projector) -> Self {
        Self {
            tx,
            projector,
            access: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn cached_access(&self, user_id: i64, project_id: i64) -> Option<AccessLevel> {
        self.access.get(&(user_id, project_id)).copied()
    }

    pub fn cache_access(&mut self, user_id: i64, project_id: i64, level: AccessLevel) {
        self.access.insert((user_id, project_id), level);
    }

    /// Drops cached levels after a change to memberships or permissions.
    pub fn forget_access(&mut self) {
        self.access.clear();
    }

    pub fn defer(&mut self, write: DurableWrite) {
        self.deferred.push(write);
    }

    pub fn take_deferred(&mut self) -> Vec<DurableWrite> {
        std::mem::take(&mut self.deferred)
    }

    pub fn into_parts(self) -> (Tx, Projector) {
        (self.tx, self.projector)
    }
}
