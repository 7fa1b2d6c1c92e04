use crate::error::ValidationError::{self, *};
use crate::types::{PrizeTier, SplitPolicy};
use crate::Balance;
use alloc::vec::Vec;
use serde::Deserialize;

/// DTO used for deserializing the prize table sent by the admin surface
#[derive(Deserialize, Clone, Debug, PartialEq)]
struct PrizeTableDto<'a> {
    #[serde(borrow)]
    tiers: Vec<TierDto<'a>>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
struct TierDto<'a> {
    matches: u8,
    payout: Balance,
    split: &'a str,
}

pub struct PrizeTable;

impl PrizeTable {
    /// Parse a prize table like
    /// `{"tiers":[{"matches":5,"payout":1000000,"split":"equal_share"}]}`
    pub fn from_json(json: &[u8]) -> Result<Vec<PrizeTier>, ValidationError> {
        let (table, _): (PrizeTableDto, usize) = serde_json_core::from_slice(json).map_err(|e| {
            log::warn!("prize table cannot be parsed: {e:?}");
            IncorrectPrizeTable
        })?;

        table
            .tiers
            .iter()
            .map(|tier| {
                let split = match tier.split {
                    "equal_share" => SplitPolicy::EqualShare,
                    "first_claimant" => SplitPolicy::FirstClaimant,
                    _ => return Err(IncorrectPrizeTable),
                };
                Ok(PrizeTier {
                    matches: tier.matches,
                    payout: tier.payout,
                    split,
                })
            })
            .collect()
    }
}
