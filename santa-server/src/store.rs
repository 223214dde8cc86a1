use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use santa_core::{
    validate_pairings, Game, GameId, GameStatus, Pairing, PairingError, Participant,
    ParticipantId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("game not found")]
    GameNotFound,
    #[error("participant not found")]
    ParticipantNotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid pairing set: {0}")]
    InvalidPairings(#[from] PairingError),
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot encoding: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl StoreError {
    /// The write was refused because it would break a uniqueness or pairing
    /// invariant, as opposed to failing to reach the snapshot.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::InvalidPairings(_))
    }
}

#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    /// Participants of a game in join order.
    async fn list_participants(&self, game_id: GameId) -> Result<Vec<Participant>, StoreError>;
    async fn find_participant(
        &self,
        game_id: GameId,
        identity: &str,
    ) -> Result<Option<Participant>, StoreError>;
}

#[async_trait]
pub trait PairingStore: Send + Sync {
    async fn find_receiver_for(
        &self,
        game_id: GameId,
        giver_id: ParticipantId,
    ) -> Result<Option<Participant>, StoreError>;
    /// Swaps the game's pairings for `pairings` without touching its status.
    async fn replace_pairings(
        &self,
        game_id: GameId,
        pairings: &[Pairing],
    ) -> Result<(), StoreError>;
    /// Replaces every pairing of the game and marks it assigned. Either all of
    /// it lands or none of it does.
    async fn commit_draw(&self, game_id: GameId, pairings: &[Pairing]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait GameStatusStore: Send + Sync {
    async fn get_game(&self, game_id: GameId) -> Result<Option<Game>, StoreError>;
    async fn set_status(&self, game_id: GameId, status: GameStatus) -> Result<(), StoreError>;
}

pub trait AssignmentStore: ParticipantDirectory + PairingStore + GameStatusStore {}

impl<T> AssignmentStore for T where T: ParticipantDirectory + PairingStore + GameStatusStore {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct PairingRow {
    game_id: GameId,
    giver_id: ParticipantId,
    receiver_id: ParticipantId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    next_game_id: GameId,
    next_participant_id: ParticipantId,
    games: BTreeMap<GameId, Game>,
    participants: BTreeMap<ParticipantId, Participant>,
    pairings: Vec<PairingRow>,
}

impl Tables {
    fn game(&self, game_id: GameId) -> Result<&Game, StoreError> {
        self.games.get(&game_id).ok_or(StoreError::GameNotFound)
    }

    fn participants_of(&self, game_id: GameId) -> Vec<Participant> {
        self.participants
            .values()
            .filter(|p| p.game_id == game_id)
            .cloned()
            .collect()
    }

    fn participant_by_identity(&self, game_id: GameId, identity: &str) -> Option<&Participant> {
        self.participants
            .values()
            .find(|p| p.game_id == game_id && p.identity == identity)
    }
}

/// A staged set of changes holding the store's write lock. Nothing is visible
/// to readers until [`Transaction::commit`]; dropping it discards the changes.
pub struct Transaction<'a> {
    guard: RwLockWriteGuard<'a, Tables>,
    staged: Tables,
    persist_path: Option<&'a Path>,
}

impl Transaction<'_> {
    pub fn game(&self, game_id: GameId) -> Result<&Game, StoreError> {
        self.staged.game(game_id)
    }

    pub fn game_by_code(&self, code: &str) -> Option<&Game> {
        self.staged.games.values().find(|g| g.code == code)
    }

    pub fn participant(&self, game_id: GameId, identity: &str) -> Option<&Participant> {
        self.staged.participant_by_identity(game_id, identity)
    }

    pub fn insert_game(
        &mut self,
        name: &str,
        budget: &str,
        owner: &str,
        code: &str,
        host_token: &str,
    ) -> Result<Game, StoreError> {
        if self.staged.games.values().any(|g| g.code == code) {
            return Err(StoreError::Conflict(format!("join code {code} in use")));
        }

        self.staged.next_game_id += 1;
        let game = Game {
            id: self.staged.next_game_id,
            name: name.to_string(),
            budget: budget.to_string(),
            code: code.to_string(),
            owner: owner.to_string(),
            host_token: host_token.to_string(),
            status: GameStatus::Open,
        };
        self.staged.games.insert(game.id, game.clone());
        Ok(game)
    }

    pub fn insert_participant(
        &mut self,
        game_id: GameId,
        identity: &str,
        name: &str,
        handle: Option<&str>,
        token: &str,
        joined_at: u64,
    ) -> Result<Participant, StoreError> {
        self.staged.game(game_id)?;
        if self.staged.participant_by_identity(game_id, identity).is_some() {
            return Err(StoreError::Conflict(format!(
                "{identity} already joined game {game_id}"
            )));
        }

        self.staged.next_participant_id += 1;
        let participant = Participant {
            id: self.staged.next_participant_id,
            game_id,
            identity: identity.to_string(),
            name: name.to_string(),
            handle: handle.map(str::to_string),
            token: token.to_string(),
            joined_at,
        };
        self.staged
            .participants
            .insert(participant.id, participant.clone());
        Ok(participant)
    }

    /// Removes the participant together with every pairing that names them.
    pub fn remove_participant(
        &mut self,
        game_id: GameId,
        identity: &str,
    ) -> Result<Participant, StoreError> {
        let id = self
            .staged
            .participant_by_identity(game_id, identity)
            .map(|p| p.id)
            .ok_or(StoreError::ParticipantNotFound)?;

        self.staged
            .pairings
            .retain(|row| row.giver_id != id && row.receiver_id != id);
        self.staged
            .participants
            .remove(&id)
            .ok_or(StoreError::ParticipantNotFound)
    }

    pub fn set_status(&mut self, game_id: GameId, status: GameStatus) -> Result<(), StoreError> {
        let game = self
            .staged
            .games
            .get_mut(&game_id)
            .ok_or(StoreError::GameNotFound)?;
        game.status = status;
        Ok(())
    }

    /// Drops the game's current pairings and stores `pairings` instead. The new
    /// set must be a derangement over the participants present right now.
    pub fn replace_pairings(
        &mut self,
        game_id: GameId,
        pairings: &[Pairing],
    ) -> Result<(), StoreError> {
        self.staged.game(game_id)?;
        let members: Vec<ParticipantId> = self
            .staged
            .participants_of(game_id)
            .iter()
            .map(|p| p.id)
            .collect();
        validate_pairings(&members, pairings)?;

        self.staged.pairings.retain(|row| row.game_id != game_id);
        self.staged
            .pairings
            .extend(pairings.iter().map(|p| PairingRow {
                game_id,
                giver_id: p.giver_id,
                receiver_id: p.receiver_id,
            }));
        Ok(())
    }

    pub fn delete_game(&mut self, game_id: GameId) -> Result<Game, StoreError> {
        self.staged.pairings.retain(|row| row.game_id != game_id);
        self.staged.participants.retain(|_, p| p.game_id != game_id);
        self.staged
            .games
            .remove(&game_id)
            .ok_or(StoreError::GameNotFound)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        let Transaction {
            mut guard,
            staged,
            persist_path,
        } = self;

        if let Some(path) = persist_path {
            if let Err(err) = write_snapshot(path, &staged).await {
                error!(path = %path.display(), error = %err, "snapshot write failed, rolling back");
                return Err(err);
            }
        }

        *guard = staged;
        Ok(())
    }
}

async fn write_snapshot(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(tables)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// `state.json` stages through `state.json.tmp`, so snapshots that differ only
/// by extension never share a temp file.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Loads the snapshot at `path` if there is one; every later commit
    /// rewrites it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Tables::default(),
            Err(err) => return Err(err.into()),
        };
        info!(
            path = %path.display(),
            games = tables.games.len(),
            "store opened"
        );

        Ok(Self {
            tables: RwLock::new(tables),
            persist_path: Some(path),
        })
    }

    pub async fn begin(&self) -> Transaction<'_> {
        let guard = self.tables.write().await;
        let staged = guard.clone();
        Transaction {
            guard,
            staged,
            persist_path: self.persist_path.as_deref(),
        }
    }

    pub async fn game_by_code(&self, code: &str) -> Option<Game> {
        let tables = self.tables.read().await;
        tables.games.values().find(|g| g.code == code).cloned()
    }

    pub async fn count_participants(&self, game_id: GameId) -> usize {
        let tables = self.tables.read().await;
        tables
            .participants
            .values()
            .filter(|p| p.game_id == game_id)
            .count()
    }

    pub async fn participant_by_token(&self, game_id: GameId, token: &str) -> Option<Participant> {
        let tables = self.tables.read().await;
        tables
            .participants
            .values()
            .find(|p| p.game_id == game_id && p.token == token)
            .cloned()
    }

    /// Games organized by `identity`, newest first.
    pub async fn games_owned_by(&self, identity: &str) -> Vec<Game> {
        let tables = self.tables.read().await;
        tables
            .games
            .values()
            .rev()
            .filter(|g| g.owner == identity)
            .cloned()
            .collect()
    }

    /// Games `identity` has joined, newest first.
    pub async fn games_joined_by(&self, identity: &str) -> Vec<Game> {
        let tables = self.tables.read().await;
        tables
            .games
            .values()
            .rev()
            .filter(|g| tables.participant_by_identity(g.id, identity).is_some())
            .cloned()
            .collect()
    }

    pub async fn pairings_of(&self, game_id: GameId) -> Vec<Pairing> {
        let tables = self.tables.read().await;
        tables
            .pairings
            .iter()
            .filter(|row| row.game_id == game_id)
            .map(|row| Pairing {
                giver_id: row.giver_id,
                receiver_id: row.receiver_id,
            })
            .collect()
    }
}

#[async_trait]
impl ParticipantDirectory for MemoryStore {
    async fn list_participants(&self, game_id: GameId) -> Result<Vec<Participant>, StoreError> {
        let tables = self.tables.read().await;
        tables.game(game_id)?;
        Ok(tables.participants_of(game_id))
    }

    async fn find_participant(
        &self,
        game_id: GameId,
        identity: &str,
    ) -> Result<Option<Participant>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.participant_by_identity(game_id, identity).cloned())
    }
}

#[async_trait]
impl PairingStore for MemoryStore {
    async fn find_receiver_for(
        &self,
        game_id: GameId,
        giver_id: ParticipantId,
    ) -> Result<Option<Participant>, StoreError> {
        let tables = self.tables.read().await;
        let receiver = tables
            .pairings
            .iter()
            .find(|row| row.game_id == game_id && row.giver_id == giver_id)
            .and_then(|row| tables.participants.get(&row.receiver_id))
            .cloned();
        debug!(game_id, giver_id, found = receiver.is_some(), "receiver lookup");
        Ok(receiver)
    }

    async fn replace_pairings(
        &self,
        game_id: GameId,
        pairings: &[Pairing],
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await;
        tx.replace_pairings(game_id, pairings)?;
        tx.commit().await
    }

    async fn commit_draw(&self, game_id: GameId, pairings: &[Pairing]) -> Result<(), StoreError> {
        let mut tx = self.begin().await;
        tx.replace_pairings(game_id, pairings)?;
        tx.set_status(game_id, GameStatus::Assigned)?;
        tx.commit().await?;
        info!(game_id, pairings = pairings.len(), "draw committed");
        Ok(())
    }
}

#[async_trait]
impl GameStatusStore for MemoryStore {
    async fn get_game(&self, game_id: GameId) -> Result<Option<Game>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.games.get(&game_id).cloned())
    }

    async fn set_status(&self, game_id: GameId, status: GameStatus) -> Result<(), StoreError> {
        let mut tx = self.begin().await;
        tx.set_status(game_id, status)?;
        tx.commit().await
    }
}
