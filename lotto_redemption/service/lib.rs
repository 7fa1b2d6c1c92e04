//! Entry point used by the admin console and the scanning devices.
//! Each mutating call checks the session of the caller before reaching the ledger or the registry.

pub mod config;

use crate::config::ServiceConfig;
use log::{debug, info};
use lotto_redemption::authorization::{AdminSession, Authorizer, Capability, Clock};
use lotto_redemption::codec::{self, SymbolImage, TicketCodec};
use lotto_redemption::draw::DrawRegistry;
use lotto_redemption::error::{RedemptionError, ValidationError};
use lotto_redemption::ledger::RedemptionLedger;
use lotto_redemption::reconciliation::{OfflineQueue, Reconciler, ReplayReport};
use lotto_redemption::store::KeyValueStore;
use lotto_redemption::types::*;
use lotto_redemption::{ClientSeq, DeviceId, DrawNumber, Number, TicketId};
use std::sync::Arc;

pub use lotto_redemption;

pub struct RedemptionService<S, C> {
    store: Arc<S>,
    registry: Arc<DrawRegistry<S>>,
    ledger: Arc<RedemptionLedger<S>>,
    reconciler: Reconciler<S>,
    authorizer: Authorizer<C>,
    codec: TicketCodec,
}

impl<S: KeyValueStore, C: Clock> RedemptionService<S, C> {
    pub fn new(store: Arc<S>, config: &ServiceConfig, clock: C) -> Result<Self, RedemptionError> {
        let registry = Arc::new(DrawRegistry::new(store.clone(), config.numbers)?);
        let ledger = Arc::new(RedemptionLedger::new(
            store.clone(),
            registry.clone(),
            config.issuer_key,
            config.lock_shards,
        ));
        let reconciler = Reconciler::new(ledger.clone(), config.retry);
        Ok(Self {
            store,
            registry,
            ledger,
            reconciler,
            authorizer: Authorizer::new(clock),
            codec: TicketCodec::new(config.qr_module_size),
        })
    }

    pub fn create_draw(
        &self,
        session: &AdminSession,
        spec: DrawSpec,
    ) -> Result<Draw, RedemptionError> {
        self.authorizer.authorize(session, Capability::CreateDraw)?;
        let draw = self.registry.create_draw(spec)?;
        info!("{} created the draw {}", session.operator, draw.id);
        Ok(draw)
    }

    pub fn close_draw(
        &self,
        session: &AdminSession,
        draw_id: DrawNumber,
    ) -> Result<Draw, RedemptionError> {
        self.authorizer.authorize(session, Capability::CloseDraw)?;
        let draw = self.registry.close_draw(draw_id)?;
        info!("{} closed the draw {draw_id}", session.operator);
        Ok(draw)
    }

    pub fn settle_draw(
        &self,
        session: &AdminSession,
        draw_id: DrawNumber,
        winning_numbers: Vec<Number>,
    ) -> Result<Draw, RedemptionError> {
        self.authorizer.authorize(session, Capability::SettleDraw)?;
        let draw = self.registry.settle_draw(draw_id, winning_numbers)?;
        info!(
            "{} settled the draw {draw_id} with {:?}",
            session.operator, draw.winning_numbers
        );
        Ok(draw)
    }

    pub fn get_draw(&self, draw_id: DrawNumber) -> Result<Draw, RedemptionError> {
        self.registry.get_draw(draw_id)
    }

    pub fn register(
        &self,
        session: &AdminSession,
        ticket: &Ticket,
    ) -> Result<TicketId, RedemptionError> {
        self.authorizer.authorize(session, Capability::RegisterTicket)?;
        self.ledger.register(ticket)
    }

    pub fn redeem(
        &self,
        session: &AdminSession,
        attempt: &RedemptionAttempt,
    ) -> Result<RedemptionResult, RedemptionError> {
        self.authorizer.authorize(session, Capability::Redeem)?;
        self.ledger.redeem(attempt)
    }

    pub fn void(
        &self,
        session: &AdminSession,
        ticket_id: &TicketId,
        reason: &str,
    ) -> Result<LedgerEntry, RedemptionError> {
        self.authorizer.authorize(session, Capability::VoidTicket)?;
        let entry = self.ledger.void(ticket_id, reason)?;
        info!(
            "{} voided the ticket 0x{}: {reason}",
            session.operator,
            hex::encode(ticket_id)
        );
        Ok(entry)
    }

    pub fn entry(&self, ticket_id: &TicketId) -> Result<LedgerEntry, RedemptionError> {
        self.ledger.entry(ticket_id)
    }

    /// Render the symbol printed on the ticket
    pub fn symbol(&self, ticket: &Ticket) -> Result<SymbolImage, RedemptionError> {
        self.codec.encode(ticket)
    }

    /// Read the symbol captured by a device and redeem the ticket at once.
    /// The ticket is registered first if the ledger does not know it yet.
    pub fn scan(
        &self,
        session: &AdminSession,
        symbol: &SymbolImage,
        device_id: DeviceId,
        client_seq: ClientSeq,
    ) -> Result<RedemptionResult, RedemptionError> {
        self.authorizer.authorize(session, Capability::RegisterTicket)?;
        self.authorizer.authorize(session, Capability::Redeem)?;

        let ticket = self.codec.decode(symbol)?;
        if !codec::verify(&ticket, self.ledger.issuer_key()) {
            return Err(ValidationError::InvalidSignature.into());
        }
        let ticket_id = self.ledger.register(&ticket)?;
        debug!(
            "{device_id} scanned the ticket 0x{} (#{client_seq})",
            hex::encode(ticket_id)
        );

        let attempt = RedemptionAttempt {
            ticket_id,
            device_id,
            attempted_at: self.authorizer.now(),
            client_seq,
            claimed: ClaimedOutcome::Pending,
        };
        self.ledger.redeem(&attempt)
    }

    pub fn replay(
        &self,
        session: &AdminSession,
        queue: &mut OfflineQueue,
    ) -> Result<ReplayReport, RedemptionError> {
        self.authorizer.authorize(session, Capability::Redeem)?;
        Ok(self.reconciler.replay(queue))
    }

    pub fn replay_all(
        &self,
        session: &AdminSession,
        queues: &mut [OfflineQueue],
    ) -> Result<Vec<ReplayReport>, RedemptionError> {
        self.authorizer.authorize(session, Capability::Redeem)?;
        Ok(self.reconciler.replay_all(queues))
    }

    /// Replay the queue a device saved in the store and save back what is left.
    pub fn replay_saved(
        &self,
        session: &AdminSession,
        device_id: &str,
    ) -> Result<ReplayReport, RedemptionError> {
        self.authorizer.authorize(session, Capability::Redeem)?;
        let mut queue = OfflineQueue::load(self.store.as_ref(), device_id.into())?;
        let report = self.reconciler.replay(&mut queue);
        queue.save(self.store.as_ref())?;
        Ok(report)
    }
}
