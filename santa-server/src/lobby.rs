use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::thread_rng;
use santa_core::{generate_join_code, Game, GameId, GameStatus, Participant, MIN_CODE_LENGTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{GameStatusStore, MemoryStore, ParticipantDirectory, StoreError};

const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("game not found")]
    NotFound,
    #[error("game is not accepting participants")]
    Closed,
    #[error("already joined")]
    AlreadyJoined,
    #[error("not a participant")]
    NotJoined,
    #[error("the organizer cannot leave their own game")]
    OwnerCannotLeave,
    #[error("game already drawn")]
    AlreadyDrawn,
    #[error("name required")]
    InvalidName,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LobbyError {
    pub fn reason(&self) -> &'static str {
        match self {
            LobbyError::NotFound => "not_found",
            LobbyError::Closed => "closed",
            LobbyError::AlreadyJoined => "already_joined",
            LobbyError::NotJoined => "not_joined",
            LobbyError::OwnerCannotLeave => "owner_cannot_leave",
            LobbyError::AlreadyDrawn => "already_drawn",
            LobbyError::InvalidName => "invalid_name",
            LobbyError::Store(_) => "storage_error",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Player,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GameInfo {
    pub id: GameId,
    pub name: String,
    pub budget: String,
    pub code: String,
    pub status: GameStatus,
    pub participants: usize,
}

/// Game and membership bookkeeping around the draw.
pub struct Lobby {
    store: Arc<MemoryStore>,
    code_length: usize,
}

impl Lobby {
    pub fn new(store: Arc<MemoryStore>, code_length: usize) -> Self {
        Self {
            store,
            code_length: code_length.max(MIN_CODE_LENGTH),
        }
    }

    pub async fn create_game(
        &self,
        name: &str,
        budget: &str,
        owner: &str,
    ) -> Result<Game, LobbyError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LobbyError::InvalidName);
        }

        let host_token = Uuid::new_v4().to_string();
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_join_code(&mut thread_rng(), self.code_length);
            let mut tx = self.store.begin().await;
            match tx.insert_game(name, budget.trim(), owner, &code, &host_token) {
                Ok(game) => {
                    tx.commit().await?;
                    info!(game_id = game.id, owner, "game created");
                    return Ok(game);
                }
                Err(err) if err.is_conflict() => {
                    warn!(code = %code, "join code collision, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::Conflict("no free join code".into()).into())
    }

    pub async fn game_info(&self, game_id: GameId) -> Result<GameInfo, LobbyError> {
        let game = self.game(game_id).await?;
        let participants = self.store.count_participants(game_id).await;
        Ok(GameInfo {
            id: game.id,
            name: game.name,
            budget: game.budget,
            code: game.code,
            status: game.status,
            participants,
        })
    }

    pub async fn game(&self, game_id: GameId) -> Result<Game, LobbyError> {
        self.store
            .get_game(game_id)
            .await?
            .ok_or(LobbyError::NotFound)
    }

    pub async fn participants(&self, game_id: GameId) -> Result<Vec<Participant>, LobbyError> {
        match self.store.list_participants(game_id).await {
            Ok(participants) => Ok(participants),
            Err(StoreError::GameNotFound) => Err(LobbyError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// The participant of `game_id` holding `token`, if any.
    pub async fn participant_by_token(&self, game_id: GameId, token: &str) -> Option<Participant> {
        self.store.participant_by_token(game_id, token).await
    }

    pub async fn games_for(&self, identity: &str, role: Role) -> Vec<Game> {
        match role {
            Role::Owner => self.store.games_owned_by(identity).await,
            Role::Player => self.store.games_joined_by(identity).await,
        }
    }

    /// Read-only check of whether `identity` could join with `code` right now.
    pub async fn precheck_join(&self, code: &str, identity: &str) -> Result<Game, LobbyError> {
        let game = self
            .store
            .game_by_code(code)
            .await
            .ok_or(LobbyError::NotFound)?;
        if game.status != GameStatus::Open {
            return Err(LobbyError::Closed);
        }
        if self.store.find_participant(game.id, identity).await?.is_some() {
            return Err(LobbyError::AlreadyJoined);
        }
        Ok(game)
    }

    pub async fn join_by_code(
        &self,
        code: &str,
        identity: &str,
        name: &str,
        handle: Option<&str>,
    ) -> Result<Participant, LobbyError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LobbyError::InvalidName);
        }
        let handle = handle
            .map(|h| h.trim().trim_start_matches('@'))
            .filter(|h| !h.is_empty());

        let mut tx = self.store.begin().await;
        let game = tx.game_by_code(code).ok_or(LobbyError::NotFound)?;
        if game.status != GameStatus::Open {
            return Err(LobbyError::Closed);
        }
        let game_id = game.id;
        if tx.participant(game_id, identity).is_some() {
            return Err(LobbyError::AlreadyJoined);
        }

        let joined_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let token = Uuid::new_v4().to_string();
        let participant =
            tx.insert_participant(game_id, identity, name, handle, &token, joined_at)?;
        tx.commit().await?;

        info!(game_id, participant_id = participant.id, "participant joined");
        Ok(participant)
    }

    pub async fn leave(&self, game_id: GameId, identity: &str) -> Result<(), LobbyError> {
        let mut tx = self.store.begin().await;
        let game = tx.game(game_id).map_err(|_| LobbyError::NotFound)?;
        if game.owner == identity {
            return Err(LobbyError::OwnerCannotLeave);
        }
        let gone = tx
            .remove_participant(game_id, identity)
            .map_err(|_| LobbyError::NotJoined)?;
        tx.commit().await?;

        info!(game_id, participant_id = gone.id, "participant left");
        Ok(())
    }

    /// Flips between `open` and `locked`. An assigned game stays assigned.
    pub async fn set_open(&self, game_id: GameId, open: bool) -> Result<GameStatus, LobbyError> {
        let mut tx = self.store.begin().await;
        let game = tx.game(game_id).map_err(|_| LobbyError::NotFound)?;
        if game.status == GameStatus::Assigned {
            return Err(LobbyError::AlreadyDrawn);
        }

        let status = if open {
            GameStatus::Open
        } else {
            GameStatus::Locked
        };
        tx.set_status(game_id, status)?;
        tx.commit().await?;

        info!(game_id, status = status.as_str(), "game status changed");
        Ok(status)
    }

    pub async fn delete_game(&self, game_id: GameId) -> Result<(), LobbyError> {
        let mut tx = self.store.begin().await;
        tx.delete_game(game_id).map_err(|_| LobbyError::NotFound)?;
        tx.commit().await?;

        info!(game_id, "game deleted");
        Ok(())
    }
}
