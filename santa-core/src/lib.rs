use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

pub type GameId = u64;
pub type ParticipantId = u64;

/// Fewest participants a draw accepts. With two people the only derangement
/// is a mutual swap, which spoils the surprise.
pub const MIN_PARTICIPANTS: usize = 3;

/// Shortest join code worth handing out; below this codes collide quickly.
pub const MIN_CODE_LENGTH: usize = 4;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Open,
    Locked,
    Assigned,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Open => "open",
            GameStatus::Locked => "locked",
            GameStatus::Assigned => "assigned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub budget: String,
    pub code: String,
    pub owner: String,
    pub host_token: String,
    pub status: GameStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub game_id: GameId,
    pub identity: String,
    pub name: String,
    pub handle: Option<String>,
    /// Secret issued on join. Private reads such as the receiver lookup and
    /// the inbox require it.
    pub token: String,
    pub joined_at: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Pairing {
    pub giver_id: ParticipantId,
    pub receiver_id: ParticipantId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("need at least 3 participants, found {found}")]
    InsufficientParticipants { found: usize },
    #[error("participant {0} listed twice")]
    DuplicateParticipant(ParticipantId),
    #[error("participant {0} paired with themselves")]
    SelfPairing(ParticipantId),
    #[error("participant {0} gives more than once")]
    DuplicateGiver(ParticipantId),
    #[error("participant {0} receives more than once")]
    DuplicateReceiver(ParticipantId),
    #[error("participant {0} is not part of this game")]
    UnknownParticipant(ParticipantId),
    #[error("pairings cover {paired} of {expected} participants")]
    IncompleteCover { paired: usize, expected: usize },
}

/// Shuffles the participants and links each one to the next, closing the
/// loop at the end. The result is a single cycle, so nobody draws themselves
/// and everyone gives and receives exactly once.
pub fn generate_pairings<R: Rng + ?Sized>(
    participant_ids: &[ParticipantId],
    rng: &mut R,
) -> Result<Vec<Pairing>, PairingError> {
    let mut seen = HashSet::with_capacity(participant_ids.len());
    for id in participant_ids {
        if !seen.insert(*id) {
            return Err(PairingError::DuplicateParticipant(*id));
        }
    }

    if participant_ids.len() < MIN_PARTICIPANTS {
        return Err(PairingError::InsufficientParticipants {
            found: participant_ids.len(),
        });
    }

    let mut order = participant_ids.to_vec();
    order.shuffle(rng);

    let n = order.len();
    Ok((0..n)
        .map(|i| Pairing {
            giver_id: order[i],
            receiver_id: order[(i + 1) % n],
        })
        .collect())
}

pub fn generate(participant_ids: &[ParticipantId]) -> Result<Vec<Pairing>, PairingError> {
    generate_pairings(participant_ids, &mut thread_rng())
}

/// Checks that `pairings` is a permutation without fixed points over exactly
/// `participant_ids`.
pub fn validate_pairings(
    participant_ids: &[ParticipantId],
    pairings: &[Pairing],
) -> Result<(), PairingError> {
    let members: HashSet<ParticipantId> = participant_ids.iter().copied().collect();
    let mut givers = HashSet::with_capacity(pairings.len());
    let mut receivers = HashSet::with_capacity(pairings.len());

    for pairing in pairings {
        if pairing.giver_id == pairing.receiver_id {
            return Err(PairingError::SelfPairing(pairing.giver_id));
        }
        for id in [pairing.giver_id, pairing.receiver_id] {
            if !members.contains(&id) {
                return Err(PairingError::UnknownParticipant(id));
            }
        }
        if !givers.insert(pairing.giver_id) {
            return Err(PairingError::DuplicateGiver(pairing.giver_id));
        }
        if !receivers.insert(pairing.receiver_id) {
            return Err(PairingError::DuplicateReceiver(pairing.receiver_id));
        }
    }

    if givers.len() != members.len() || receivers.len() != members.len() {
        return Err(PairingError::IncompleteCover {
            paired: givers.len(),
            expected: members.len(),
        });
    }

    Ok(())
}

pub fn generate_join_code<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
