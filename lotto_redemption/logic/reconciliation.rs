//! Replay of the redemption attempts recorded by a scanning device while offline.

use crate::error::{RedemptionError, StateError, StorageError};
use crate::ledger::RedemptionLedger;
use crate::store::{load, KeyValueStore};
use crate::types::*;
use crate::{ClientSeq, DeviceId, TicketId, Timestamp};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::time::Duration;
use log::{debug, error, info, warn};
use scale::Encode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    /// total number of calls for one attempt, the first one included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// time to wait before the given retry (0 based)
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_backoff)
    }
}

fn queue_key(device_id: &str) -> Vec<u8> {
    let mut key = b"queue/".to_vec();
    key.extend_from_slice(device_id.as_bytes());
    key
}

/// Attempts recorded by a device, in client sequence order
#[derive(Debug, Clone, Eq, PartialEq, scale::Encode, scale::Decode)]
pub struct OfflineQueue {
    device_id: DeviceId,
    next_client_seq: ClientSeq,
    pending: Vec<RedemptionAttempt>,
}

impl OfflineQueue {
    /// Empty queue numbering attempts from 1.
    /// `(device_id, client_seq)` identifies an attempt in the ledger, so a device
    /// must resume its queue with `load` rather than open a new one, otherwise a
    /// new attempt reusing a sequence number is taken for a retry of the old one.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            next_client_seq: 1,
            pending: Vec::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn pending(&self) -> &[RedemptionAttempt] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record a scan made while offline
    pub fn record(
        &mut self,
        ticket_id: TicketId,
        claimed: ClaimedOutcome,
        attempted_at: Timestamp,
    ) -> Result<RedemptionAttempt, RedemptionError> {
        let client_seq = self.next_client_seq;
        self.next_client_seq = client_seq
            .checked_add(1)
            .ok_or(RedemptionError::AddOverFlow)?;

        let attempt = RedemptionAttempt {
            ticket_id,
            device_id: self.device_id.clone(),
            attempted_at,
            client_seq,
            claimed,
        };
        self.pending.push(attempt.clone());
        debug!("{}: attempt #{client_seq} queued", self.device_id);
        Ok(attempt)
    }

    /// Save the queue in the device local store
    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), StorageError> {
        store.put(&queue_key(&self.device_id), self.encode())?;
        Ok(())
    }

    /// Reload the queue saved by the device, or an empty one.
    /// The numbering goes on from the last recorded attempt.
    pub fn load<S: KeyValueStore + ?Sized>(
        store: &S,
        device_id: DeviceId,
    ) -> Result<Self, StorageError> {
        let saved: Option<(_, OfflineQueue)> = load(store, &queue_key(&device_id))?;
        Ok(saved
            .map(|(_, queue)| queue)
            .unwrap_or_else(|| OfflineQueue::new(device_id)))
    }
}

/// What happened to the claim of the device for a replayed attempt
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Verdict {
    /// this attempt holds the redemption
    Honored(RedemptionOutcome),
    /// an earlier attempt of the same device holds the redemption
    HeldByEarlierAttempt(Redeemer),
    /// an attempt of another device holds the redemption
    Superseded(Redeemer),
    Voided,
    /// the draw is not settled yet, the attempt stays queued
    Deferred(RedemptionError),
    /// the attempt is refused and will not be replayed
    Rejected(RedemptionError),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReplayedAttempt {
    pub attempt: RedemptionAttempt,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReplayReport {
    pub device_id: DeviceId,
    pub replayed: Vec<ReplayedAttempt>,
    /// set when the replay stopped on a transient failure, the remaining attempts are still queued
    pub interrupted: Option<RedemptionError>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }
}

fn awaits_settlement(error: &RedemptionError) -> bool {
    matches!(error, RedemptionError::State(StateError::DrawNotSettled))
}

fn verdict_of(attempt: &RedemptionAttempt, result: &RedemptionResult) -> Verdict {
    match (&result.outcome, &result.redeemer) {
        (RedemptionOutcome::Voided, _) => Verdict::Voided,
        (RedemptionOutcome::AlreadyRedeemed, Some(holder)) => {
            if holder.device_id == attempt.device_id {
                Verdict::HeldByEarlierAttempt(holder.clone())
            } else {
                Verdict::Superseded(holder.clone())
            }
        }
        (RedemptionOutcome::AlreadyRedeemed, None) => {
            Verdict::Rejected(StorageError::Corrupted.into())
        }
        (outcome, _) => Verdict::Honored(*outcome),
    }
}

pub struct Reconciler<S> {
    ledger: Arc<RedemptionLedger<S>>,
    retry: RetryPolicy,
}

impl<S: KeyValueStore> Reconciler<S> {
    pub fn new(ledger: Arc<RedemptionLedger<S>>, retry: RetryPolicy) -> Self {
        Self { ledger, retry }
    }

    /// Redeem the attempt, retrying transient failures with the same attempt
    fn redeem_with_retry(
        &self,
        attempt: &RedemptionAttempt,
    ) -> Result<RedemptionResult, RedemptionError> {
        let mut retry = 0;
        loop {
            match self.ledger.redeem(attempt) {
                Err(e) if e.is_transient() && retry + 1 < self.retry.max_attempts => {
                    let wait = self.retry.backoff(retry);
                    warn!(
                        "{}: attempt #{} failed ({e:?}), retry in {wait:?}",
                        attempt.device_id, attempt.client_seq
                    );
                    std::thread::sleep(wait);
                    retry += 1;
                }
                result => return result,
            }
        }
    }

    /// Replay the queue in client sequence order.
    /// Each attempt is removed from the queue once the ledger answered, except
    /// the attempts on a draw not settled yet, which stay queued for the next replay.
    pub fn replay(&self, queue: &mut OfflineQueue) -> ReplayReport {
        queue.pending.sort_by_key(|attempt| attempt.client_seq);

        let mut report = ReplayReport {
            device_id: queue.device_id.clone(),
            replayed: Vec::new(),
            interrupted: None,
        };

        let mut kept = Vec::new();
        let mut pending = core::mem::take(&mut queue.pending).into_iter();
        while let Some(attempt) = pending.next() {
            let verdict = match self.redeem_with_retry(&attempt) {
                Ok(result) => verdict_of(&attempt, &result),
                Err(e) if e.is_transient() => {
                    error!(
                        "{}: replay interrupted at attempt #{}: {e:?}",
                        queue.device_id, attempt.client_seq
                    );
                    report.interrupted = Some(e);
                    kept.push(attempt);
                    kept.extend(pending);
                    break;
                }
                Err(e) if awaits_settlement(&e) => {
                    debug!(
                        "{}: attempt #{} kept until the draw is settled",
                        queue.device_id, attempt.client_seq
                    );
                    kept.push(attempt.clone());
                    Verdict::Deferred(e)
                }
                Err(e) => Verdict::Rejected(e),
            };
            report.replayed.push(ReplayedAttempt { attempt, verdict });
        }
        queue.pending = kept;

        info!(
            "{}: {} attempts replayed, {} still queued",
            queue.device_id,
            report.replayed.len(),
            queue.pending.len()
        );
        report
    }

    /// Replay the queues of several devices at the same time
    pub fn replay_all(&self, queues: &mut [OfflineQueue]) -> Vec<ReplayReport> {
        std::thread::scope(|s| {
            let handles: Vec<_> = queues
                .iter_mut()
                .map(|queue| s.spawn(move || self.replay(queue)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TicketIssuer;
    use crate::config::Config;
    use crate::draw::DrawRegistry;
    use crate::error::ValidationError;
    use crate::store::{InMemoryStore, Version, Versioned};
    use core::sync::atomic::{AtomicUsize, Ordering};

    /// store failing the next `failures` reads
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn fail_next(&self, failures: usize) {
            self.failures.store(failures, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StorageError> {
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1));
            match failed {
                Ok(_) => Err(StorageError::Unavailable),
                Err(_) => Ok(()),
            }
        }
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &[u8]) -> Result<Option<Versioned>, StorageError> {
            self.check()?;
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Version, StorageError> {
            self.inner.put(key, value)
        }

        fn compare_and_swap(
            &self,
            key: &[u8],
            expected: Option<Version>,
            value: Vec<u8>,
        ) -> Result<Version, StorageError> {
            self.inner.compare_and_swap(key, expected, value)
        }
    }

    struct Fixture {
        store: Arc<FlakyStore>,
        ledger: Arc<RedemptionLedger<FlakyStore>>,
        ticket_id: TicketId,
        other_ticket_id: TicketId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FlakyStore::default());
        let config = Config::new(5, 1, 50).unwrap();
        let registry = Arc::new(DrawRegistry::new(store.clone(), config).unwrap());
        let draw = registry
            .create_draw(DrawSpec {
                winning_numbers: None,
                tiers: vec![PrizeTier {
                    matches: 5,
                    payout: 100,
                    split: SplitPolicy::FirstClaimant,
                }],
                open_at: 0,
                close_at: 1_000,
            })
            .unwrap();
        let issuer = TicketIssuer::from_seed(&[2; 32]);
        let ledger = Arc::new(RedemptionLedger::new(
            store.clone(),
            registry.clone(),
            issuer.public_key(),
            8,
        ));
        let ticket_id = ledger
            .register(&issuer.issue(draw.id, vec![3, 7, 9, 21, 33], 10))
            .unwrap();
        let other_ticket_id = ledger
            .register(&issuer.issue(draw.id, vec![1, 2, 3, 4, 5], 10))
            .unwrap();
        registry.close_draw(draw.id).unwrap();
        registry.settle_draw(draw.id, vec![3, 7, 9, 21, 33]).unwrap();
        Fixture {
            store,
            ledger,
            ticket_id,
            other_ticket_id,
        }
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_secs(1));
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn test_record() {
        let mut queue = OfflineQueue::new("x".into());
        let first = queue.record([1; 32], ClaimedOutcome::Won, 10).unwrap();
        let second = queue.record([1; 32], ClaimedOutcome::Pending, 20).unwrap();
        assert_eq!(first.client_seq, 1);
        assert_eq!(second.client_seq, 2);
        assert_eq!(queue.pending(), &[first, second]);
    }

    #[test]
    fn test_save_and_load_queue() {
        let store = InMemoryStore::new();
        let mut queue = OfflineQueue::new("x".into());
        queue.record([1; 32], ClaimedOutcome::Won, 10).unwrap();
        queue.save(&store).unwrap();

        assert_eq!(OfflineQueue::load(&store, "x".into()), Ok(queue));
        assert_eq!(
            OfflineQueue::load(&store, "y".into()),
            Ok(OfflineQueue::new("y".into()))
        );
    }

    #[test]
    fn test_sole_device() {
        let f = fixture();
        let reconciler = Reconciler::new(f.ledger.clone(), no_wait(1));

        let mut queue = OfflineQueue::new("x".into());
        queue.record(f.ticket_id, ClaimedOutcome::Won, 10).unwrap();
        queue.record(f.ticket_id, ClaimedOutcome::Won, 20).unwrap();
        queue.record(f.other_ticket_id, ClaimedOutcome::Lost, 30).unwrap();

        let report = reconciler.replay(&mut queue);
        assert!(report.is_complete());
        assert!(queue.is_empty());
        assert_eq!(report.replayed.len(), 3);

        let verdicts: Vec<Verdict> = report.replayed.into_iter().map(|r| r.verdict).collect();
        assert!(matches!(verdicts[0], Verdict::Honored(RedemptionOutcome::Won(_))));
        match &verdicts[1] {
            Verdict::HeldByEarlierAttempt(holder) => assert_eq!(holder.client_seq, 1),
            v => panic!("unexpected verdict {v:?}"),
        }
        assert_eq!(verdicts[2], Verdict::Honored(RedemptionOutcome::Lost));
    }

    #[test]
    fn test_replay_order_within_queue() {
        let f = fixture();
        let reconciler = Reconciler::new(f.ledger.clone(), no_wait(1));

        let mut queue = OfflineQueue::new("x".into());
        queue.record(f.ticket_id, ClaimedOutcome::Won, 10).unwrap();
        queue.record(f.other_ticket_id, ClaimedOutcome::Lost, 20).unwrap();
        // queue reloaded in another order
        queue.pending.reverse();

        let report = reconciler.replay(&mut queue);
        let seqs: Vec<ClientSeq> = report.replayed.iter().map(|r| r.attempt.client_seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_concurrent_devices() {
        let f = fixture();
        let reconciler = Reconciler::new(f.ledger.clone(), no_wait(1));

        // x scanned at 10:00:01, y at 10:00:00
        let mut x = OfflineQueue::new("x".into());
        x.record(f.ticket_id, ClaimedOutcome::Won, 36_001_000).unwrap();
        let mut y = OfflineQueue::new("y".into());
        y.record(f.ticket_id, ClaimedOutcome::Won, 36_000_000).unwrap();

        let mut queues = vec![x, y];
        let reports = reconciler.replay_all(&mut queues);
        assert_eq!(reports.len(), 2);
        assert!(queues.iter().all(|q| q.is_empty()));

        let holder = f.ledger.entry(&f.ticket_id).unwrap().redeemer.unwrap();
        assert_eq!(holder.device_id, "y");

        // the y claim is always honored
        assert!(matches!(
            reports[1].replayed[0].verdict,
            Verdict::Honored(RedemptionOutcome::Won(_))
        ));
        // replaying x again tells it was superseded
        let mut again = OfflineQueue::new("x".into());
        again.record(f.ticket_id, ClaimedOutcome::Won, 36_001_000).unwrap();
        let report = reconciler.replay(&mut again);
        assert_eq!(report.replayed[0].verdict, Verdict::Superseded(holder));
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let f = fixture();
        let reconciler = Reconciler::new(f.ledger.clone(), no_wait(5));

        let mut queue = OfflineQueue::new("x".into());
        queue.record(f.ticket_id, ClaimedOutcome::Won, 10).unwrap();

        f.store.fail_next(3);
        let report = reconciler.replay(&mut queue);
        assert!(report.is_complete());
        assert!(matches!(
            report.replayed[0].verdict,
            Verdict::Honored(RedemptionOutcome::Won(_))
        ));
        assert_eq!(f.ledger.entry(&f.ticket_id).unwrap().sequence, 2);
    }

    #[test]
    fn test_interrupted_replay_resumes() {
        let f = fixture();
        let reconciler = Reconciler::new(f.ledger.clone(), no_wait(2));

        let mut queue = OfflineQueue::new("x".into());
        queue.record(f.ticket_id, ClaimedOutcome::Won, 10).unwrap();
        queue.record(f.other_ticket_id, ClaimedOutcome::Lost, 20).unwrap();

        // connectivity lost
        f.store.fail_next(usize::MAX);
        let report = reconciler.replay(&mut queue);
        assert_eq!(report.interrupted, Some(StorageError::Unavailable.into()));
        assert!(report.replayed.is_empty());
        assert_eq!(queue.pending().len(), 2);

        // connectivity back
        f.store.fail_next(0);
        let report = reconciler.replay(&mut queue);
        assert!(report.is_complete());
        assert_eq!(report.replayed.len(), 2);
        assert!(queue.is_empty());

        // replaying an acknowledged attempt again has no effect
        let entry = f.ledger.entry(&f.ticket_id).unwrap();
        let mut again = OfflineQueue::new("x".into());
        again.record(f.ticket_id, ClaimedOutcome::Won, 10).unwrap();
        reconciler.replay(&mut again);
        assert_eq!(f.ledger.entry(&f.ticket_id).unwrap(), entry);
    }

    #[test]
    fn test_rejected_attempt() {
        let f = fixture();
        let reconciler = Reconciler::new(f.ledger.clone(), no_wait(1));

        let mut queue = OfflineQueue::new("x".into());
        queue.record([0; 32], ClaimedOutcome::Won, 10).unwrap();
        queue.record(f.ticket_id, ClaimedOutcome::Won, 20).unwrap();

        let report = reconciler.replay(&mut queue);
        assert!(report.is_complete());
        assert_eq!(
            report.replayed[0].verdict,
            Verdict::Rejected(ValidationError::UnknownTicket.into())
        );
        assert!(matches!(report.replayed[1].verdict, Verdict::Honored(_)));
    }

    #[test]
    fn test_voided_ticket() {
        let f = fixture();
        let reconciler = Reconciler::new(f.ledger.clone(), no_wait(1));
        f.ledger.void(&f.ticket_id, "stolen").unwrap();

        let mut queue = OfflineQueue::new("x".into());
        queue.record(f.ticket_id, ClaimedOutcome::Won, 10).unwrap();

        let report = reconciler.replay(&mut queue);
        assert_eq!(report.replayed[0].verdict, Verdict::Voided);
    }

    #[test]
    fn test_attempt_before_settlement_stays_queued() {
        let store = Arc::new(FlakyStore::default());
        let config = Config::new(5, 1, 50).unwrap();
        let registry = Arc::new(DrawRegistry::new(store.clone(), config).unwrap());
        let draw = registry
            .create_draw(DrawSpec {
                winning_numbers: None,
                tiers: vec![PrizeTier {
                    matches: 5,
                    payout: 100,
                    split: SplitPolicy::EqualShare,
                }],
                open_at: 0,
                close_at: 1_000,
            })
            .unwrap();
        let issuer = TicketIssuer::from_seed(&[3; 32]);
        let ledger = Arc::new(RedemptionLedger::new(
            store.clone(),
            registry.clone(),
            issuer.public_key(),
            8,
        ));
        let ticket_id = ledger
            .register(&issuer.issue(draw.id, vec![3, 7, 9, 21, 33], 10))
            .unwrap();
        registry.close_draw(draw.id).unwrap();
        let reconciler = Reconciler::new(ledger.clone(), no_wait(1));

        // x scanned between the close and the settlement
        let mut x = OfflineQueue::new("x".into());
        x.record(ticket_id, ClaimedOutcome::Pending, 100).unwrap();
        let report = reconciler.replay(&mut x);
        assert!(report.is_complete());
        assert_eq!(
            report.replayed[0].verdict,
            Verdict::Deferred(StateError::DrawNotSettled.into())
        );
        assert_eq!(x.pending().len(), 1);

        registry.settle_draw(draw.id, vec![3, 7, 9, 21, 33]).unwrap();

        // y scanned later but reconnects first
        let mut y = OfflineQueue::new("y".into());
        y.record(ticket_id, ClaimedOutcome::Won, 500).unwrap();
        reconciler.replay(&mut y);

        let report = reconciler.replay(&mut x);
        assert!(x.is_empty());
        assert!(matches!(
            report.replayed[0].verdict,
            Verdict::Honored(RedemptionOutcome::Won(_))
        ));
        let holder = ledger.entry(&ticket_id).unwrap().redeemer.unwrap();
        assert_eq!((holder.device_id.as_str(), holder.attempted_at), ("x", 100));
    }

    #[test]
    fn test_resumed_queue_keeps_numbering() {
        let f = fixture();
        let reconciler = Reconciler::new(f.ledger.clone(), no_wait(1));
        let device_store = InMemoryStore::new();

        let mut queue = OfflineQueue::load(&device_store, "x".into()).unwrap();
        queue.record(f.ticket_id, ClaimedOutcome::Won, 10).unwrap();
        reconciler.replay(&mut queue);
        queue.save(&device_store).unwrap();

        // next offline session of the same device
        let mut queue = OfflineQueue::load(&device_store, "x".into()).unwrap();
        let attempt = queue.record(f.ticket_id, ClaimedOutcome::Won, 20).unwrap();
        assert_eq!(attempt.client_seq, 2);

        let report = reconciler.replay(&mut queue);
        match &report.replayed[0].verdict {
            Verdict::HeldByEarlierAttempt(holder) => assert_eq!(holder.client_seq, 1),
            v => panic!("unexpected verdict {v:?}"),
        }
    }
}
