use std::sync::Arc;
use tracing::debug;

use crate::error::EngineResult;
use crate::kv::AtomicKvStore;
use crate::types::JobId;

const RESERVED: &str = "in-progress";
const DONE: &str = "done";

/// Observed state of a side-effect reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Absent,
    Reserved,
    Done,
}

/// Atomic reservation fence for externally visible side effects.
///
/// The broker delivers at least once (redelivery after crash, lease expiry,
/// or retry), so the effect itself must be fenced separately from job-level
/// retry bookkeeping. Exactly one attempt per job id ever wins `reserve`;
/// every other attempt sees `false` and treats the job as already handled.
pub struct SideEffectGuard {
    store: Arc<dyn AtomicKvStore>,
}

impl SideEffectGuard {
    pub fn new(store: Arc<dyn AtomicKvStore>) -> Self {
        Self { store }
    }

    /// Atomically move the reservation from absent to reserved. Returns
    /// `true` iff this caller won the reservation.
    pub async fn reserve(&self, job_id: &JobId) -> EngineResult<bool> {
        let won = self
            .store
            .set_if_absent(&reservation_key(job_id), RESERVED)
            .await?;
        debug!(job_id = %job_id, won, "side-effect reservation attempt");
        Ok(won)
    }

    /// Mark the reservation as done. Unconditional and idempotent.
    pub async fn mark_done(&self, job_id: &JobId) -> EngineResult<()> {
        self.store.set(&reservation_key(job_id), DONE).await
    }

    /// Inspect the reservation state. A reservation stuck at `Reserved` is a
    /// never-confirmed side effect (worker crashed between reserving and
    /// marking done).
    pub async fn reservation_state(&self, job_id: &JobId) -> EngineResult<ReservationState> {
        let state = match self.store.get(&reservation_key(job_id)).await?.as_deref() {
            None => ReservationState::Absent,
            Some(DONE) => ReservationState::Done,
            Some(_) => ReservationState::Reserved,
        };
        Ok(state)
    }
}

fn reservation_key(job_id: &JobId) -> String {
    format!("side-effect:{job_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn guard() -> SideEffectGuard {
        SideEffectGuard::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn first_reserve_wins_second_loses() {
        let guard = guard();
        let id = JobId::from("job-1");

        assert!(guard.reserve(&id).await.unwrap());
        assert!(!guard.reserve(&id).await.unwrap());
        assert_eq!(
            guard.reservation_state(&id).await.unwrap(),
            ReservationState::Reserved
        );
    }

    #[tokio::test]
    async fn mark_done_is_idempotent_and_blocks_reservation() {
        let guard = guard();
        let id = JobId::from("job-1");

        guard.reserve(&id).await.unwrap();
        guard.mark_done(&id).await.unwrap();
        guard.mark_done(&id).await.unwrap();

        assert_eq!(
            guard.reservation_state(&id).await.unwrap(),
            ReservationState::Done
        );
        assert!(!guard.reserve(&id).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_reservations_have_exactly_one_winner() {
        let guard = Arc::new(guard());
        let id = JobId::from("contended");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            let id = id.clone();
            handles.push(tokio::spawn(
                async move { guard.reserve(&id).await.unwrap() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
