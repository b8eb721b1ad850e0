//! Validator sets and weighted round-robin proposer selection.

use crate::{block::Address, merkle::root_of, merkle::Hash};
use alloy_rlp::encode;
use alloy_rlp_derive::RlpEncodable;
use getset::Getters;
use serde::{Deserialize, Serialize};
use sha3::Keccak256;

/// Upper bound on the total voting power of a set. Leaves room for priorities to stay in `i64`.
pub const MAX_TOTAL_VOTING_POWER: u64 = (i64::MAX / 8) as u64;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("cannot remove unknown validator {0}")]
    UnknownValidator(Address),
    #[error("duplicate validator update for {0}")]
    DuplicateUpdate(Address),
    #[error("applying updates would leave the validator set empty")]
    EmptySet,
    #[error("total voting power exceeds {}", MAX_TOTAL_VOTING_POWER)]
    TotalVotingPowerTooLarge,
}

/// Sum of `powers`, or `None` if it exceeds [`MAX_TOTAL_VOTING_POWER`].
pub fn checked_total_power(powers: impl IntoIterator<Item = u64>) -> Option<u64> {
    powers
        .into_iter()
        .try_fold(0u64, |total, power| total.checked_add(power))
        .filter(|total| *total <= MAX_TOTAL_VOTING_POWER)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub voting_power: u64,
    pub proposer_priority: i64,
}

impl Validator {
    pub fn new(address: Address, voting_power: u64) -> Self {
        Self { address, voting_power, proposer_priority: 0 }
    }
}

/// Part of a validator that is committed to by the validator set hash.
#[derive(RlpEncodable)]
struct SimpleValidator {
    address: Address,
    voting_power: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Change to the validator set requested by the application. A power of 0 removes the validator.
pub struct ValidatorUpdate {
    pub address: Address,
    pub power: u64,
}

impl ValidatorUpdate {
    pub fn new(address: Address, power: u64) -> Self {
        Self { address, power }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct ValidatorSet {
    /// Members, sorted by address.
    validators: Vec<Validator>,
    /// Proposer chosen by the latest priority increment.
    proposer: Option<Address>,
}

impl ValidatorSet {
    /// Builds a set and selects its first proposer.
    pub fn new(mut validators: Vec<Validator>) -> Self {
        validators.retain(|v| v.voting_power > 0);
        validators.sort_by_key(|v| v.address);
        let mut set = Self { validators, proposer: None };
        set.increment_proposer_priority(1);
        set
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn get_by_address(&self, address: &Address) -> Option<(usize, &Validator)> {
        self.validators.iter().enumerate().find(|(_, v)| &v.address == address)
    }

    pub fn has_address(&self, address: &Address) -> bool {
        self.get_by_address(address).is_some()
    }

    /// Saturates instead of overflowing; sets built through genesis or updates stay below
    /// [`MAX_TOTAL_VOTING_POWER`].
    pub fn total_voting_power(&self) -> u64 {
        self.validators.iter().fold(0u64, |total, v| total.saturating_add(v.voting_power))
    }

    pub fn hash(&self) -> Hash {
        let preimages = self
            .validators
            .iter()
            .map(|v| encode(SimpleValidator { address: v.address, voting_power: v.voting_power }))
            .collect();
        root_of::<Keccak256>(preimages)
    }

    /// Validator expected to propose the next block.
    pub fn get_proposer(&self) -> Option<&Validator> {
        let proposer = self.proposer?;
        self.get_by_address(&proposer).map(|(_, v)| v)
    }

    /// Runs `times` rounds of the weighted round-robin: every round adds each validator's
    /// power to its priority, the highest priority (lowest address on ties) becomes proposer
    /// and pays the total power back.
    pub fn increment_proposer_priority(&mut self, times: u32) {
        if self.validators.is_empty() {
            return;
        }
        self.shift_by_avg_proposer_priority();

        let total = i64::try_from(self.total_voting_power()).unwrap_or(i64::MAX);
        for _ in 0..times {
            for v in self.validators.iter_mut() {
                let power = i64::try_from(v.voting_power).unwrap_or(i64::MAX);
                v.proposer_priority = v.proposer_priority.saturating_add(power);
            }
            let mut idx = 0;
            for (i, v) in self.validators.iter().enumerate() {
                if v.proposer_priority > self.validators[idx].proposer_priority {
                    idx = i;
                }
            }
            let chosen = &mut self.validators[idx];
            chosen.proposer_priority = chosen.proposer_priority.saturating_sub(total);
            self.proposer = Some(self.validators[idx].address);
        }
    }

    pub fn copy_increment_proposer_priority(&self, times: u32) -> Self {
        let mut copy = self.clone();
        copy.increment_proposer_priority(times);
        copy
    }

    fn shift_by_avg_proposer_priority(&mut self) {
        let n = self.validators.len() as i128;
        let sum: i128 = self.validators.iter().map(|v| v.proposer_priority as i128).sum();
        let avg = (sum / n) as i64;
        for v in self.validators.iter_mut() {
            v.proposer_priority = v.proposer_priority.saturating_sub(avg);
        }
    }

    /// Applies validator updates. New validators start with a negative priority so that
    /// joining does not make them propose right away.
    pub fn update_with_change_set(&mut self, updates: &[ValidatorUpdate]) -> Result<(), Error> {
        let mut seen = Vec::with_capacity(updates.len());
        for update in updates {
            if seen.contains(&update.address) {
                return Err(Error::DuplicateUpdate(update.address));
            }
            seen.push(update.address);
        }

        let mut validators = self.validators.clone();
        for update in updates.iter().filter(|u| u.power == 0) {
            let before = validators.len();
            validators.retain(|v| v.address != update.address);
            if validators.len() == before {
                return Err(Error::UnknownValidator(update.address));
            }
        }

        let total_after = {
            let unchanged = validators
                .iter()
                .filter(|v| !updates.iter().any(|u| u.address == v.address))
                .map(|v| v.voting_power);
            let updated = updates.iter().map(|u| u.power);
            checked_total_power(unchanged.chain(updated)).ok_or(Error::TotalVotingPowerTooLarge)?
        };
        // bounded by MAX_TOTAL_VOTING_POWER, so this stays within i64
        let join_priority = -((total_after + total_after / 8) as i64);

        for update in updates.iter().filter(|u| u.power > 0) {
            match validators.iter_mut().find(|v| v.address == update.address) {
                Some(existing) => existing.voting_power = update.power,
                None => validators.push(Validator {
                    address: update.address,
                    voting_power: update.power,
                    proposer_priority: join_priority,
                }),
            }
        }
        if validators.is_empty() {
            return Err(Error::EmptySet);
        }

        validators.sort_by_key(|v| v.address);
        self.validators = validators;
        self.shift_by_avg_proposer_priority();
        Ok(())
    }
}
