use crate::config::Config;
use crate::error::{RedemptionError, StateError, StorageError, ValidationError};
use crate::store::{load, swap, KeyValueStore, Version, MAX_CAS_RETRIES};
use crate::types::{Draw, DrawSpec, DrawStatus, PrizeTier};
use crate::{DrawNumber, Number};
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, info};
use scale::Encode;

const DRAW_COUNTER_KEY: &[u8] = b"draw:counter";

fn draw_key(draw_id: DrawNumber) -> Vec<u8> {
    let mut key = b"draw/".to_vec();
    draw_id.encode_to(&mut key);
    key
}

fn same_numbers(a: &[Number], b: &[Number]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

/// Holds the draws. Only the registry moves the status of a draw, and only forward.
pub struct DrawRegistry<S> {
    store: Arc<S>,
    config: Config,
}

impl<S: KeyValueStore> DrawRegistry<S> {
    pub fn new(store: Arc<S>, config: Config) -> Result<Self, RedemptionError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn create_draw(&self, spec: DrawSpec) -> Result<Draw, RedemptionError> {
        if spec.close_at <= spec.open_at {
            return Err(ValidationError::IncorrectSchedule.into());
        }
        self.check_tiers(&spec.tiers)?;
        if let Some(numbers) = &spec.winning_numbers {
            self.config.check_numbers(numbers)?;
        }

        let id = self.next_draw_number()?;
        let draw = Draw {
            id,
            winning_numbers: spec.winning_numbers.unwrap_or_default(),
            tiers: spec.tiers,
            open_at: spec.open_at,
            close_at: spec.close_at,
            status: DrawStatus::Open,
        };
        swap(&*self.store, &draw_key(id), None, &draw)?;

        info!("Draw {id} created, open from {} to {}", draw.open_at, draw.close_at);
        Ok(draw)
    }

    pub fn get_draw(&self, draw_id: DrawNumber) -> Result<Draw, RedemptionError> {
        self.load_draw(draw_id).map(|(_, draw)| draw)
    }

    /// Close the draw. Closing a draw already closed (or settled) is a no-op.
    pub fn close_draw(&self, draw_id: DrawNumber) -> Result<Draw, RedemptionError> {
        self.update(draw_id, |draw| {
            if draw.status != DrawStatus::Open {
                debug!("Draw {draw_id} already closed");
                return Ok(None);
            }
            let mut closed = draw.clone();
            closed.status = DrawStatus::Closed;
            info!("Draw {draw_id} closed");
            Ok(Some(closed))
        })
    }

    /// Fix the winning numbers of a closed draw.
    /// Settling again with the same numbers is a no-op.
    pub fn settle_draw(
        &self,
        draw_id: DrawNumber,
        winning_numbers: Vec<Number>,
    ) -> Result<Draw, RedemptionError> {
        self.config.check_numbers(&winning_numbers)?;

        self.update(draw_id, |draw| match draw.status {
            DrawStatus::Open => Err(StateError::DrawStillOpen.into()),
            DrawStatus::Settled => {
                if !same_numbers(&draw.winning_numbers, &winning_numbers) {
                    return Err(StateError::DifferentResults.into());
                }
                debug!("Draw {draw_id} already settled");
                Ok(None)
            }
            DrawStatus::Closed => {
                // numbers committed at creation cannot be changed
                if !draw.winning_numbers.is_empty()
                    && !same_numbers(&draw.winning_numbers, &winning_numbers)
                {
                    return Err(StateError::DifferentResults.into());
                }
                let mut settled = draw.clone();
                settled.winning_numbers = winning_numbers.clone();
                settled.status = DrawStatus::Settled;
                info!("Draw {draw_id} settled with numbers {winning_numbers:?}");
                Ok(Some(settled))
            }
        })
    }

    fn check_tiers(&self, tiers: &[PrizeTier]) -> Result<(), ValidationError> {
        if tiers.is_empty() {
            return Err(ValidationError::IncorrectTiers);
        }
        for (i, tier) in tiers.iter().enumerate() {
            if tier.matches == 0 || tier.matches > self.config.nb_numbers {
                return Err(ValidationError::IncorrectTiers);
            }
            if tiers[..i].iter().any(|t| t.matches == tier.matches) {
                return Err(ValidationError::IncorrectTiers);
            }
        }
        Ok(())
    }

    fn load_draw(&self, draw_id: DrawNumber) -> Result<(Version, Draw), RedemptionError> {
        load(&*self.store, &draw_key(draw_id))?
            .ok_or_else(|| ValidationError::UnknownDraw.into())
    }

    /// Apply the transition with a compare and swap, re-reading the draw on conflict.
    /// The transition returns `None` when there is nothing to write.
    fn update<F>(&self, draw_id: DrawNumber, transition: F) -> Result<Draw, RedemptionError>
    where
        F: Fn(&Draw) -> Result<Option<Draw>, RedemptionError>,
    {
        for _ in 0..MAX_CAS_RETRIES {
            let (version, draw) = self.load_draw(draw_id)?;
            let updated = match transition(&draw)? {
                None => return Ok(draw),
                Some(updated) => updated,
            };
            match swap(&*self.store, &draw_key(draw_id), Some(version), &updated) {
                Ok(_) => return Ok(updated),
                Err(StorageError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::VersionConflict.into())
    }

    fn next_draw_number(&self) -> Result<DrawNumber, RedemptionError> {
        for _ in 0..MAX_CAS_RETRIES {
            let current: Option<(Version, DrawNumber)> = load(&*self.store, DRAW_COUNTER_KEY)?;
            let (version, last) = match current {
                Some((version, last)) => (Some(version), last),
                None => (None, 0),
            };
            let next = last.checked_add(1).ok_or(RedemptionError::AddOverFlow)?;
            match swap(&*self.store, DRAW_COUNTER_KEY, version, &next) {
                Ok(_) => return Ok(next),
                Err(StorageError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::VersionConflict.into())
    }
}
