use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use santa_core::{generate_pairings, GameId, GameStatus, PairingError, Participant, ParticipantId};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::notify::Notifier;
use crate::store::{AssignmentStore, StoreError};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrawReason {
    Ok,
    NotFound,
    NotEnough,
    AlreadyDrawn,
    Conflict,
    StorageError,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DrawResult {
    pub ok: bool,
    pub reason: DrawReason,
    pub delivered: usize,
    pub failed: usize,
}

impl DrawResult {
    fn rejected(reason: DrawReason) -> Self {
        Self {
            ok: false,
            reason,
            delivered: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LookupReason {
    Ok,
    NotFound,
    NotJoined,
    NotDrawn,
    StorageError,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MyReceiverResult {
    pub ok: bool,
    pub reason: LookupReason,
    pub receiver_name: Option<String>,
    pub receiver_handle: Option<String>,
}

impl MyReceiverResult {
    fn rejected(reason: LookupReason) -> Self {
        Self {
            ok: false,
            reason,
            receiver_name: None,
            receiver_handle: None,
        }
    }
}

pub fn receiver_message(receiver: &Participant) -> String {
    match &receiver.handle {
        Some(handle) => format!("Your Secret Santa receiver: {} (@{handle})", receiver.name),
        None => format!("Your Secret Santa receiver: {}", receiver.name),
    }
}

fn storage_failure(err: &StoreError) -> DrawReason {
    match err {
        StoreError::GameNotFound => DrawReason::NotFound,
        err if err.is_conflict() => DrawReason::Conflict,
        _ => DrawReason::StorageError,
    }
}

pub struct AssignmentService<S: ?Sized> {
    store: Arc<S>,
    allow_redraw: bool,
}

impl<S: AssignmentStore + ?Sized> AssignmentService<S> {
    pub fn new(store: Arc<S>, allow_redraw: bool) -> Self {
        Self {
            store,
            allow_redraw,
        }
    }

    pub async fn draw(&self, game_id: GameId, notifier: &dyn Notifier) -> DrawResult {
        self.draw_seeded(game_id, notifier, None).await
    }

    /// Runs a draw end to end: pair everyone, commit the pairings and the
    /// `assigned` status together, then tell each giver who they give to.
    /// Only the commit can fail the draw; delivery failures are counted.
    pub async fn draw_seeded(
        &self,
        game_id: GameId,
        notifier: &dyn Notifier,
        seed: Option<u64>,
    ) -> DrawResult {
        let game = match self.store.get_game(game_id).await {
            Ok(Some(game)) => game,
            Ok(None) => return DrawResult::rejected(DrawReason::NotFound),
            Err(err) => {
                error!(game_id, error = %err, "loading game for draw failed");
                return DrawResult::rejected(DrawReason::StorageError);
            }
        };

        if game.status == GameStatus::Assigned && !self.allow_redraw {
            warn!(game_id, "draw refused, game already assigned");
            return DrawResult::rejected(DrawReason::AlreadyDrawn);
        }

        let participants = match self.store.list_participants(game_id).await {
            Ok(participants) => participants,
            Err(err) => {
                error!(game_id, error = %err, "listing participants failed");
                return DrawResult::rejected(storage_failure(&err));
            }
        };

        let ids: Vec<ParticipantId> = participants.iter().map(|p| p.id).collect();
        let mut rng = seed
            .map(ChaCha8Rng::seed_from_u64)
            .unwrap_or_else(ChaCha8Rng::from_entropy);
        let pairings = match generate_pairings(&ids, &mut rng) {
            Ok(pairings) => pairings,
            Err(PairingError::InsufficientParticipants { found }) => {
                info!(game_id, found, "not enough participants to draw");
                return DrawResult::rejected(DrawReason::NotEnough);
            }
            Err(err) => {
                warn!(game_id, error = %err, "participant list rejected");
                return DrawResult::rejected(DrawReason::Conflict);
            }
        };

        if let Err(err) = self.store.commit_draw(game_id, &pairings).await {
            error!(game_id, error = %err, "draw not persisted, previous assignment kept");
            return DrawResult::rejected(storage_failure(&err));
        }

        let by_id: HashMap<ParticipantId, &Participant> =
            participants.iter().map(|p| (p.id, p)).collect();
        let deliveries = pairings.iter().map(|pairing| {
            let giver = by_id.get(&pairing.giver_id).copied();
            let receiver = by_id.get(&pairing.receiver_id).copied();
            async move {
                let (Some(giver), Some(receiver)) = (giver, receiver) else {
                    return false;
                };
                match notifier
                    .notify(&giver.identity, &receiver_message(receiver))
                    .await
                {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(
                            game_id,
                            giver = giver.id,
                            error = %err,
                            "notification not delivered"
                        );
                        false
                    }
                }
            }
        });
        let outcomes = join_all(deliveries).await;

        let delivered = outcomes.iter().filter(|delivered| **delivered).count();
        let failed = outcomes.len() - delivered;
        info!(game_id, delivered, failed, "draw complete");

        DrawResult {
            ok: true,
            reason: DrawReason::Ok,
            delivered,
            failed,
        }
    }

    pub async fn lookup_my_receiver(&self, game_id: GameId, identity: &str) -> MyReceiverResult {
        match self.store.get_game(game_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return MyReceiverResult::rejected(LookupReason::NotFound),
            Err(err) => {
                error!(game_id, error = %err, "loading game for lookup failed");
                return MyReceiverResult::rejected(LookupReason::StorageError);
            }
        }

        let me = match self.store.find_participant(game_id, identity).await {
            Ok(Some(me)) => me,
            Ok(None) => return MyReceiverResult::rejected(LookupReason::NotJoined),
            Err(err) => {
                error!(game_id, error = %err, "participant lookup failed");
                return MyReceiverResult::rejected(LookupReason::StorageError);
            }
        };

        match self.store.find_receiver_for(game_id, me.id).await {
            Ok(Some(receiver)) => MyReceiverResult {
                ok: true,
                reason: LookupReason::Ok,
                receiver_name: Some(receiver.name),
                receiver_handle: receiver.handle,
            },
            Ok(None) => MyReceiverResult::rejected(LookupReason::NotDrawn),
            Err(err) => {
                error!(game_id, error = %err, "receiver lookup failed");
                MyReceiverResult::rejected(LookupReason::StorageError)
            }
        }
    }
}
