use crate::{Balance, ClientSeq, DeviceId, DrawNumber, LedgerSeq, Number, TicketId, Timestamp};
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

#[derive(Default, Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum DrawStatus {
    #[default]
    Open,
    Closed,
    Settled,
}

/// How the payout of a tier is shared between the winners of this tier.
/// The ledger never applies it, the caller does.
#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum SplitPolicy {
    EqualShare,
    FirstClaimant,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct PrizeTier {
    /// number of matching numbers required to win this tier
    pub matches: u8,
    pub payout: Balance,
    pub split: SplitPolicy,
}

/// Parameters given by an admin to create a draw
#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct DrawSpec {
    /// winning numbers committed before the draw is published, if any
    pub winning_numbers: Option<Vec<Number>>,
    pub tiers: Vec<PrizeTier>,
    pub open_at: Timestamp,
    pub close_at: Timestamp,
}

#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct Draw {
    pub id: DrawNumber,
    /// empty until the numbers are committed or the draw is settled
    pub winning_numbers: Vec<Number>,
    pub tiers: Vec<PrizeTier>,
    pub open_at: Timestamp,
    pub close_at: Timestamp,
    pub status: DrawStatus,
}

impl Draw {
    /// number of played numbers found in the winning set
    pub fn count_matches(&self, numbers: &[Number]) -> usize {
        numbers
            .iter()
            .filter(|n| self.winning_numbers.contains(n))
            .count()
    }

    /// return the tier won by the given numbers, if any
    pub fn match_tier(&self, numbers: &[Number]) -> Option<PrizeTier> {
        if self.status != DrawStatus::Settled || self.winning_numbers.is_empty() {
            return None;
        }
        let matches = self.count_matches(numbers);
        self.tiers
            .iter()
            .find(|tier| tier.matches as usize == matches)
            .copied()
    }
}

/// A signed claim of played numbers against a draw
#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct Ticket {
    pub draw_id: DrawNumber,
    pub numbers: Vec<Number>,
    pub issued_at: Timestamp,
    /// sr25519 signature over the claim, see `codec::signing_message`
    pub signature: [u8; 64],
}

/// Outcome claimed locally by the scanning device
#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum ClaimedOutcome {
    Pending,
    Won,
    Lost,
    Void,
}

#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct RedemptionAttempt {
    pub ticket_id: TicketId,
    pub device_id: DeviceId,
    pub attempted_at: Timestamp,
    pub client_seq: ClientSeq,
    pub claimed: ClaimedOutcome,
}

impl RedemptionAttempt {
    pub fn redeemer(&self) -> Redeemer {
        Redeemer {
            device_id: self.device_id.clone(),
            attempted_at: self.attempted_at,
            client_seq: self.client_seq,
            claimed: self.claimed,
        }
    }
}

/// The attempt holding the redemption of a ticket
#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct Redeemer {
    pub device_id: DeviceId,
    pub attempted_at: Timestamp,
    pub client_seq: ClientSeq,
    pub claimed: ClaimedOutcome,
}

impl Redeemer {
    /// same attempt, i.e. the same idempotency key
    pub fn is_same_attempt(&self, other: &Redeemer) -> bool {
        self.device_id == other.device_id && self.client_seq == other.client_seq
    }
}

/// Total order between attempts: (attempted_at, client_seq, device_id).
/// The lowest attempt holds the redemption.
pub fn attempt_order(a: &Redeemer, b: &Redeemer) -> Ordering {
    a.attempted_at
        .cmp(&b.attempted_at)
        .then(a.client_seq.cmp(&b.client_seq))
        .then_with(|| a.device_id.cmp(&b.device_id))
}

#[derive(Default, Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum TicketState {
    #[default]
    Issued,
    Redeemed,
    Void,
}

#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct LedgerEntry {
    pub ticket_id: TicketId,
    pub ticket: Ticket,
    pub state: TicketState,
    pub tier: Option<PrizeTier>,
    pub redeemer: Option<Redeemer>,
    pub void_reason: Option<String>,
    /// incremented on each write of this entry
    pub sequence: LedgerSeq,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum RedemptionOutcome {
    /// this attempt holds the redemption and the ticket wins the tier
    Won(PrizeTier),
    /// this attempt holds the redemption and the ticket wins nothing
    Lost,
    /// another attempt holds the redemption
    AlreadyRedeemed,
    Voided,
}

#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct RedemptionResult {
    pub ticket_id: TicketId,
    pub outcome: RedemptionOutcome,
    /// the attempt holding the redemption
    pub redeemer: Option<Redeemer>,
    pub sequence: LedgerSeq,
}
