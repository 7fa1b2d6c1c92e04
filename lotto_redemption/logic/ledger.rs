//! Redemption ledger: authoritative state of each ticket.
//!
//! Calls on the same ticket are serialized by a lock shard chosen from the
//! ticket id, and every write is a single compare and swap on the entry, so a
//! crash leaves an entry either before or after a transition.
//! Calls on tickets of different shards never wait for each other.

use crate::codec::{self, IssuerKey};
use crate::draw::DrawRegistry;
use crate::error::{RedemptionError, StateError, StorageError, ValidationError};
use crate::store::{load, swap, KeyValueStore, Version, MAX_CAS_RETRIES};
use crate::types::*;
use crate::TicketId;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::Ordering;
use log::{debug, info, warn};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_LOCK_SHARDS: usize = 64;

fn ticket_key(ticket_id: &TicketId) -> Vec<u8> {
    let mut key = b"ticket/".to_vec();
    key.extend_from_slice(ticket_id);
    key
}

fn outcome_of(tier: Option<PrizeTier>) -> RedemptionOutcome {
    match tier {
        Some(tier) => RedemptionOutcome::Won(tier),
        None => RedemptionOutcome::Lost,
    }
}

fn result_of(entry: &LedgerEntry, outcome: RedemptionOutcome) -> RedemptionResult {
    RedemptionResult {
        ticket_id: entry.ticket_id,
        outcome,
        redeemer: entry.redeemer.clone(),
        sequence: entry.sequence,
    }
}

fn next_sequence(entry: &LedgerEntry) -> Result<u64, RedemptionError> {
    entry
        .sequence
        .checked_add(1)
        .ok_or(RedemptionError::AddOverFlow)
}

pub struct RedemptionLedger<S> {
    store: Arc<S>,
    registry: Arc<DrawRegistry<S>>,
    issuer_key: IssuerKey,
    shards: Vec<Mutex<()>>,
}

impl<S: KeyValueStore> RedemptionLedger<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<DrawRegistry<S>>,
        issuer_key: IssuerKey,
        nb_shards: usize,
    ) -> Self {
        let shards = (0..nb_shards.max(1)).map(|_| Mutex::new(())).collect();
        Self {
            store,
            registry,
            issuer_key,
            shards,
        }
    }

    pub fn registry(&self) -> &Arc<DrawRegistry<S>> {
        &self.registry
    }

    pub fn issuer_key(&self) -> &IssuerKey {
        &self.issuer_key
    }

    fn shard(&self, ticket_id: &TicketId) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&ticket_id[..8]);
        (u64::from_le_bytes(prefix) % self.shards.len() as u64) as usize
    }

    fn lock(&self, ticket_id: &TicketId) -> MutexGuard<'_, ()> {
        // the guarded value is (), a poisoned shard is still usable
        self.shards[self.shard(ticket_id)]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_entry(&self, ticket_id: &TicketId) -> Result<(Version, LedgerEntry), RedemptionError> {
        load(&*self.store, &ticket_key(ticket_id))?
            .ok_or_else(|| ValidationError::UnknownTicket.into())
    }

    pub fn entry(&self, ticket_id: &TicketId) -> Result<LedgerEntry, RedemptionError> {
        self.load_entry(ticket_id).map(|(_, entry)| entry)
    }

    /// Register an issued ticket.
    /// Registering again the same ticket is a no-op.
    pub fn register(&self, ticket: &Ticket) -> Result<TicketId, RedemptionError> {
        if !codec::verify(ticket, &self.issuer_key) {
            warn!("Ticket for draw {} rejected: invalid signature", ticket.draw_id);
            return Err(ValidationError::InvalidSignature.into());
        }

        let draw = self.registry.get_draw(ticket.draw_id)?;
        self.registry.config().check_numbers(&ticket.numbers)?;
        if ticket.issued_at < draw.open_at || ticket.issued_at > draw.close_at {
            return Err(ValidationError::IssuedOutsideDraw.into());
        }

        let ticket_id = codec::ticket_id(ticket);
        let _guard = self.lock(&ticket_id);

        let entry = LedgerEntry {
            ticket_id,
            ticket: ticket.clone(),
            state: TicketState::Issued,
            tier: None,
            redeemer: None,
            void_reason: None,
            sequence: 1,
        };

        match swap(&*self.store, &ticket_key(&ticket_id), None, &entry) {
            Ok(_) => {
                info!("Ticket {} registered for draw {}", hex::encode(ticket_id), ticket.draw_id);
                Ok(ticket_id)
            }
            Err(StorageError::VersionConflict) => {
                let (_, existing) = self.load_entry(&ticket_id)?;
                if existing.ticket != *ticket {
                    return Err(RedemptionError::DuplicateTicket);
                }
                debug!("Ticket {} already registered", hex::encode(ticket_id));
                Ok(ticket_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Redeem the ticket for the given attempt.
    ///
    /// The redemption is held by the lowest attempt by
    /// `(attempted_at, client_seq, device_id)` among all the attempts seen for
    /// this ticket, whatever the order of arrival. The other attempts get
    /// `AlreadyRedeemed` with the holder.
    pub fn redeem(&self, attempt: &RedemptionAttempt) -> Result<RedemptionResult, RedemptionError> {
        let ticket_id = attempt.ticket_id;
        let challenger = attempt.redeemer();
        let _guard = self.lock(&ticket_id);

        for _ in 0..MAX_CAS_RETRIES {
            let (version, entry) = self.load_entry(&ticket_id)?;

            if entry.state == TicketState::Void {
                debug!("Ticket {} is void", hex::encode(ticket_id));
                return Ok(result_of(&entry, RedemptionOutcome::Voided));
            }

            let draw = self.registry.get_draw(entry.ticket.draw_id)?;
            if draw.status != DrawStatus::Settled {
                return Err(StateError::DrawNotSettled.into());
            }

            let mut updated = entry.clone();
            match (&entry.state, &entry.redeemer) {
                (TicketState::Redeemed, Some(holder)) => {
                    if holder.is_same_attempt(&challenger) {
                        // retry of the attempt holding the redemption
                        return Ok(result_of(&entry, outcome_of(entry.tier)));
                    }
                    if attempt_order(&challenger, holder) != Ordering::Less {
                        return Ok(result_of(&entry, RedemptionOutcome::AlreadyRedeemed));
                    }
                    info!(
                        "Ticket {}: attempt {}#{} supersedes {}#{}",
                        hex::encode(ticket_id),
                        challenger.device_id,
                        challenger.client_seq,
                        holder.device_id,
                        holder.client_seq
                    );
                }
                (TicketState::Redeemed, None) => return Err(StorageError::Corrupted.into()),
                _ => {
                    updated.state = TicketState::Redeemed;
                    updated.tier = draw.match_tier(&entry.ticket.numbers);
                }
            }
            updated.redeemer = Some(challenger.clone());
            updated.sequence = next_sequence(&entry)?;

            match swap(&*self.store, &ticket_key(&ticket_id), Some(version), &updated) {
                Ok(_) => {
                    info!(
                        "Ticket {} redeemed by {}#{} (tier: {:?})",
                        hex::encode(ticket_id),
                        challenger.device_id,
                        challenger.client_seq,
                        updated.tier
                    );
                    return Ok(result_of(&updated, outcome_of(updated.tier)));
                }
                Err(StorageError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::VersionConflict.into())
    }

    /// Void the ticket. Voiding again with the same reason is a no-op.
    pub fn void(&self, ticket_id: &TicketId, reason: &str) -> Result<LedgerEntry, RedemptionError> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingReason.into());
        }
        let _guard = self.lock(ticket_id);

        for _ in 0..MAX_CAS_RETRIES {
            let (version, entry) = self.load_entry(ticket_id)?;

            if entry.state == TicketState::Void {
                if entry.void_reason.as_deref() != Some(reason) {
                    return Err(StateError::AlreadyVoided.into());
                }
                return Ok(entry);
            }

            let mut updated = entry.clone();
            updated.state = TicketState::Void;
            updated.void_reason = Some(String::from(reason));
            updated.sequence = next_sequence(&entry)?;

            match swap(&*self.store, &ticket_key(ticket_id), Some(version), &updated) {
                Ok(_) => {
                    info!("Ticket {} voided: {reason}", hex::encode(ticket_id));
                    return Ok(updated);
                }
                Err(StorageError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::VersionConflict.into())
    }
}
