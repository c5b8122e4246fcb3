// crates/tally-core/src/reputation.rs
//
// The reputation codec: domain keys and values in their fixed-width wire
// form, plus the delta/decay arithmetic applied during log replay.
//
// A reputation entry is addressed by (colony, skill, user) and carries
// (amount, uid). The zero user address denotes the colony-wide entry for a
// skill. Amounts are capped to [0, 2^127 - 1]; uids are assigned once at
// first insertion and never change.

use primitive_types::{U256, U512};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{hash_bytes, Digest};
use crate::error::TallyError;

/// Upper bound on a reputation amount: 2^127 - 1.
pub const MAX_AMOUNT: u128 = (1u128 << 127) - 1;

/// Encoded width of a [`ReputationKey`]: 20 + 32 + 20 bytes.
pub const ENCODED_KEY_LEN: usize = 72;

/// Encoded width of a [`ReputationValue`]: two 32-byte words.
pub const ENCODED_VALUE_LEN: usize = 64;

/// A 20-byte account address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address. Denotes a colony-wide, non-user-specific entry.
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Stable numeric identifier of a skill in the external skill hierarchy.
pub type SkillId = u64;

/// Address of one reputation entry: (colony, skill, user).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ReputationKey {
    pub colony: Address,
    pub skill: SkillId,
    pub user: Address,
}

impl ReputationKey {
    pub fn new(colony: Address, skill: SkillId, user: Address) -> Self {
        Self {
            colony,
            skill,
            user,
        }
    }

    /// The colony-wide entry for this key's (colony, skill).
    pub fn colony_wide(&self) -> Self {
        Self {
            colony: self.colony,
            skill: self.skill,
            user: Address::ZERO,
        }
    }

    /// Serialize to the fixed 72-byte wire form:
    /// colony (20) || skill as 32-byte big-endian word || user (20).
    pub fn encode(&self) -> [u8; ENCODED_KEY_LEN] {
        let mut out = [0u8; ENCODED_KEY_LEN];
        out[..20].copy_from_slice(&self.colony.0);
        out[44..52].copy_from_slice(&self.skill.to_be_bytes());
        out[52..].copy_from_slice(&self.user.0);
        out
    }

    /// Parse the fixed 72-byte wire form. Any other length, or a skill word
    /// that does not fit in 64 bits, is malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self, TallyError> {
        if bytes.len() != ENCODED_KEY_LEN {
            return Err(TallyError::Malformed(format!(
                "reputation key must be {} bytes, got {}",
                ENCODED_KEY_LEN,
                bytes.len()
            )));
        }
        if bytes[20..44].iter().any(|b| *b != 0) {
            return Err(TallyError::Malformed(
                "skill id exceeds 64 bits".to_string(),
            ));
        }
        let mut colony = [0u8; 20];
        colony.copy_from_slice(&bytes[..20]);
        let mut skill_word = [0u8; 8];
        skill_word.copy_from_slice(&bytes[44..52]);
        let mut user = [0u8; 20];
        user.copy_from_slice(&bytes[52..]);
        Ok(Self {
            colony: Address(colony),
            skill: u64::from_be_bytes(skill_word),
            user: Address(user),
        })
    }

    /// Digest of the encoded key. Trie placement and adjacency ordering use
    /// this digest, never the numeric key value.
    pub fn digest(&self) -> Digest {
        hash_bytes(&self.encode())
    }
}

impl fmt::Display for ReputationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.colony, self.skill, self.user)
    }
}

/// Stored payload of one reputation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationValue {
    /// Reputation amount, always in [0, 2^127 - 1].
    pub amount: u128,
    /// Insertion-order identifier, assigned once and never reused.
    pub uid: u64,
}

impl ReputationValue {
    pub fn new(amount: u128, uid: u64) -> Self {
        Self { amount, uid }
    }

    /// Serialize as two 32-byte big-endian words: amount || uid.
    pub fn encode(&self) -> [u8; ENCODED_VALUE_LEN] {
        let mut out = [0u8; ENCODED_VALUE_LEN];
        out[16..32].copy_from_slice(&self.amount.to_be_bytes());
        out[56..64].copy_from_slice(&self.uid.to_be_bytes());
        out
    }

    /// Parse the 64-byte wire form, rejecting amounts above the cap and
    /// words that overflow their in-memory widths.
    pub fn decode(bytes: &[u8]) -> Result<Self, TallyError> {
        if bytes.len() != ENCODED_VALUE_LEN {
            return Err(TallyError::Malformed(format!(
                "reputation value must be {} bytes, got {}",
                ENCODED_VALUE_LEN,
                bytes.len()
            )));
        }
        if bytes[..16].iter().any(|b| *b != 0) {
            return Err(TallyError::Malformed(
                "amount word exceeds 128 bits".to_string(),
            ));
        }
        if bytes[32..56].iter().any(|b| *b != 0) {
            return Err(TallyError::Malformed("uid word exceeds 64 bits".to_string()));
        }
        let mut amount_word = [0u8; 16];
        amount_word.copy_from_slice(&bytes[16..32]);
        let amount = u128::from_be_bytes(amount_word);
        if amount > MAX_AMOUNT {
            return Err(TallyError::Malformed(format!(
                "amount {} exceeds cap 2^127 - 1",
                amount
            )));
        }
        let mut uid_word = [0u8; 8];
        uid_word.copy_from_slice(&bytes[56..64]);
        Ok(Self {
            amount,
            uid: u64::from_be_bytes(uid_word),
        })
    }
}

/// Per-cycle decay constants supplied by the external arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayRate {
    pub numerator: u128,
    pub denominator: u128,
}

/// Apply a signed delta to an existing amount.
///
/// A first write never goes negative: with no existing entry the new amount
/// is max(delta, 0). An existing amount is clamped to [0, 2^127 - 1].
pub fn apply_delta(existing: Option<u128>, delta: i128) -> u128 {
    match existing {
        None => {
            if delta <= 0 {
                0
            } else {
                (delta as u128).min(MAX_AMOUNT)
            }
        }
        Some(amount) => {
            if delta >= 0 {
                amount.saturating_add(delta as u128).min(MAX_AMOUNT)
            } else {
                amount.saturating_sub(delta.unsigned_abs())
            }
        }
    }
}

/// One decay step: floor(amount * numerator / denominator).
///
/// The intermediate product exceeds 128 bits for realistic rates, so the
/// multiplication widens through U512 before dividing.
pub fn decay_amount(amount: u128, rate: &DecayRate) -> Result<u128, TallyError> {
    if rate.denominator == 0 {
        return Err(TallyError::Malformed(
            "decay denominator must be non-zero".to_string(),
        ));
    }
    let product: U512 = U256::from(amount).full_mul(U256::from(rate.numerator));
    let quotient = product / U512::from(rate.denominator);
    Ok(narrow_capped(quotient))
}

/// Proportional share used for negative-delta propagation:
/// floor(amount * target / origin), 0 when the origin value is 0.
pub fn proportional_amount(amount: u128, target: u128, origin: u128) -> u128 {
    if origin == 0 {
        return 0;
    }
    let product: U512 = U256::from(amount).full_mul(U256::from(target));
    narrow_capped(product / U512::from(origin))
}

fn narrow_capped(wide: U512) -> u128 {
    if wide > U512::from(MAX_AMOUNT) {
        MAX_AMOUNT
    } else {
        wide.as_u128()
    }
}
