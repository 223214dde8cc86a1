use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use santa_core::{GameId, GameStatus, Participant, ParticipantId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub mod assignment;
pub mod config;
pub mod lobby;
pub mod notify;
pub mod store;

pub use assignment::{AssignmentService, DrawReason, DrawResult, LookupReason, MyReceiverResult};
pub use config::Config;
pub use lobby::{GameInfo, Lobby, LobbyError, Role};
pub use notify::{InboxNotifier, Notice, Notifier};
pub use store::{MemoryStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    lobby: Arc<Lobby>,
    assignments: Arc<AssignmentService<MemoryStore>>,
    notifier: Arc<InboxNotifier>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default(), MemoryStore::default())
    }
}

impl AppState {
    pub fn new(config: Config, store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            lobby: Arc::new(Lobby::new(store.clone(), config.code_length)),
            assignments: Arc::new(AssignmentService::new(store, config.allow_redraw)),
            notifier: Arc::new(InboxNotifier::default()),
            config: Arc::new(config),
        }
    }

    /// Opens the snapshot named in `config` when there is one.
    pub async fn from_config(config: Config) -> Result<Self, StoreError> {
        let store = match &config.persist_path {
            Some(path) => MemoryStore::open(path.clone()).await?,
            None => MemoryStore::default(),
        };
        Ok(Self::new(config, store))
    }

    pub fn notifier(&self) -> &InboxNotifier {
        &self.notifier
    }

    /// Subscribes to the private inbox of whoever holds `token` in `game_id`.
    /// Returns their identity with the receiver, or `None` for a stranger.
    pub async fn open_inbox(
        &self,
        game_id: GameId,
        token: &str,
    ) -> Option<(String, broadcast::Receiver<Notice>)> {
        let participant = self.lobby.participant_by_token(game_id, token).await?;
        let rx = self.notifier.subscribe(&participant.identity).await;
        Some((participant.identity, rx))
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/game", post(create_game))
        .route("/game/:id", get(get_game).delete(delete_game))
        .route("/game/:id/participants", get(list_participants))
        .route("/game/:id/lock", post(lock_game))
        .route("/game/:id/open", post(open_game))
        .route("/game/:id/draw", post(draw))
        .route("/game/:id/receiver", get(my_receiver))
        .route("/game/:id/leave", post(leave_game))
        .route("/join/:code", get(precheck_join).post(join_game))
        .route("/games", get(list_games))
        .route("/ws/:id/:token", get(ws_handler))
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateGameRequest {
    name: String,
    #[serde(default)]
    budget: String,
    owner: String,
}

#[derive(Serialize)]
struct CreateGameResponse {
    game_id: GameId,
    code: String,
    host_token: String,
}

#[derive(Deserialize)]
struct JoinRequest {
    identity: String,
    name: String,
    handle: Option<String>,
}

#[derive(Serialize)]
struct JoinResponse {
    participant_id: ParticipantId,
    game_id: GameId,
    token: String,
}

#[derive(Deserialize)]
struct IdentityRequest {
    identity: String,
}

#[derive(Deserialize)]
struct GamesParams {
    identity: String,
    role: Role,
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: GameStatus,
}

#[derive(Serialize)]
struct ParticipantView {
    id: ParticipantId,
    name: String,
    handle: Option<String>,
    joined_at: u64,
}

#[derive(Serialize)]
struct GameSummary {
    id: GameId,
    name: String,
    code: String,
    status: GameStatus,
}

fn lobby_error(err: LobbyError) -> Response {
    let status = match &err {
        LobbyError::NotFound | LobbyError::NotJoined => StatusCode::NOT_FOUND,
        LobbyError::Closed | LobbyError::AlreadyJoined | LobbyError::AlreadyDrawn => {
            StatusCode::CONFLICT
        }
        LobbyError::OwnerCannotLeave => StatusCode::FORBIDDEN,
        LobbyError::InvalidName => StatusCode::BAD_REQUEST,
        LobbyError::Store(store_err) => {
            warn!(error = %store_err, "store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.reason() }))).into_response()
}

fn draw_status(reason: DrawReason) -> StatusCode {
    match reason {
        DrawReason::Ok => StatusCode::OK,
        DrawReason::NotFound => StatusCode::NOT_FOUND,
        DrawReason::NotEnough | DrawReason::AlreadyDrawn | DrawReason::Conflict => {
            StatusCode::CONFLICT
        }
        DrawReason::StorageError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn lookup_status(reason: LookupReason) -> StatusCode {
    match reason {
        LookupReason::Ok => StatusCode::OK,
        LookupReason::NotFound | LookupReason::NotJoined => StatusCode::NOT_FOUND,
        LookupReason::NotDrawn => StatusCode::CONFLICT,
        LookupReason::StorageError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Private reads carry the participant's own token in `x-participant-token`.
async fn authorize_participant(
    state: &AppState,
    game_id: GameId,
    headers: &HeaderMap,
) -> Result<Participant, Response> {
    state.lobby.game(game_id).await.map_err(lobby_error)?;

    let Some(token_val) = headers
        .get("x-participant-token")
        .and_then(|v| v.to_str().ok())
    else {
        return Err((StatusCode::UNAUTHORIZED, "participant token required").into_response());
    };

    state
        .lobby
        .participant_by_token(game_id, token_val)
        .await
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "invalid participant token").into_response())
}

/// Admin operations carry the game's host token in `x-host-token`.
async fn authorize_host(
    state: &AppState,
    game_id: GameId,
    headers: &HeaderMap,
) -> Result<(), Response> {
    let game = state.lobby.game(game_id).await.map_err(lobby_error)?;

    let Some(token_val) = headers.get("x-host-token").and_then(|v| v.to_str().ok()) else {
        return Err((StatusCode::UNAUTHORIZED, "host token required").into_response());
    };

    if token_val != game.host_token {
        return Err((StatusCode::UNAUTHORIZED, "invalid host token").into_response());
    }
    Ok(())
}

async fn create_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateGameRequest>,
) -> impl IntoResponse {
    let provided = headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != state.config.admin_password {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }

    if payload.owner.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "owner required").into_response();
    }

    match state
        .lobby
        .create_game(&payload.name, &payload.budget, payload.owner.trim())
        .await
    {
        Ok(game) => (
            StatusCode::CREATED,
            Json(CreateGameResponse {
                game_id: game.id,
                code: game.code,
                host_token: game.host_token,
            }),
        )
            .into_response(),
        Err(err) => lobby_error(err),
    }
}

async fn get_game(State(state): State<AppState>, Path(game_id): Path<GameId>) -> Response {
    match state.lobby.game_info(game_id).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(err) => lobby_error(err),
    }
}

async fn delete_game(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    headers: HeaderMap,
) -> Response {
    if let Err(res) = authorize_host(&state, game_id, &headers).await {
        return res;
    }
    match state.lobby.delete_game(game_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => lobby_error(err),
    }
}

async fn list_participants(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
) -> Response {
    match state.lobby.participants(game_id).await {
        Ok(participants) => {
            let view: Vec<ParticipantView> = participants
                .into_iter()
                .map(|p| ParticipantView {
                    id: p.id,
                    name: p.name,
                    handle: p.handle,
                    joined_at: p.joined_at,
                })
                .collect();
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(err) => lobby_error(err),
    }
}

async fn lock_game(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    headers: HeaderMap,
) -> Response {
    toggle(state, game_id, headers, false).await
}

async fn open_game(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    headers: HeaderMap,
) -> Response {
    toggle(state, game_id, headers, true).await
}

async fn toggle(state: AppState, game_id: GameId, headers: HeaderMap, open: bool) -> Response {
    if let Err(res) = authorize_host(&state, game_id, &headers).await {
        return res;
    }
    match state.lobby.set_open(game_id, open).await {
        Ok(status) => (StatusCode::OK, Json(StatusResponse { status })).into_response(),
        Err(err) => lobby_error(err),
    }
}

async fn draw(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    headers: HeaderMap,
    Query(params): Query<DrawParams>,
) -> Response {
    if let Err(res) = authorize_host(&state, game_id, &headers).await {
        return res;
    }

    let result = state
        .assignments
        .draw_seeded(game_id, state.notifier.as_ref(), params.seed)
        .await;
    (draw_status(result.reason), Json(result)).into_response()
}

async fn my_receiver(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    headers: HeaderMap,
) -> Response {
    let participant = match authorize_participant(&state, game_id, &headers).await {
        Ok(participant) => participant,
        Err(res) => return res,
    };

    let result = state
        .assignments
        .lookup_my_receiver(game_id, &participant.identity)
        .await;
    (lookup_status(result.reason), Json(result)).into_response()
}

async fn leave_game(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    headers: HeaderMap,
) -> Response {
    let participant = match authorize_participant(&state, game_id, &headers).await {
        Ok(participant) => participant,
        Err(res) => return res,
    };

    match state.lobby.leave(game_id, &participant.identity).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => lobby_error(err),
    }
}

async fn precheck_join(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<IdentityRequest>,
) -> Response {
    match state.lobby.precheck_join(&code, &params.identity).await {
        Ok(game) => (
            StatusCode::OK,
            Json(GameSummary {
                id: game.id,
                name: game.name,
                code: game.code,
                status: game.status,
            }),
        )
            .into_response(),
        Err(err) => lobby_error(err),
    }
}

async fn join_game(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<JoinRequest>,
) -> Response {
    let identity = payload.identity.trim();
    if identity.is_empty() {
        return (StatusCode::BAD_REQUEST, "identity required").into_response();
    }

    match state
        .lobby
        .join_by_code(&code, identity, &payload.name, payload.handle.as_deref())
        .await
    {
        Ok(participant) => (
            StatusCode::OK,
            Json(JoinResponse {
                participant_id: participant.id,
                game_id: participant.game_id,
                token: participant.token,
            }),
        )
            .into_response(),
        Err(err) => lobby_error(err),
    }
}

async fn list_games(State(state): State<AppState>, Query(params): Query<GamesParams>) -> Response {
    let games: Vec<GameSummary> = state
        .lobby
        .games_for(&params.identity, params.role)
        .await
        .into_iter()
        .map(|g| GameSummary {
            id: g.id,
            name: g.name,
            code: g.code,
            status: g.status,
        })
        .collect();
    (StatusCode::OK, Json(games)).into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((game_id, token)): Path<(GameId, String)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, game_id, token))
}

async fn handle_socket(stream: WebSocket, state: AppState, game_id: GameId, token: String) {
    let (mut sender, mut receiver) = stream.split();
    let Some((identity, mut rx)) = state.open_inbox(game_id, &token).await else {
        let _ = sender
            .send(Message::Text("unknown participant".into()))
            .await;
        return;
    };

    // Forward private notices until the client goes away
    let mut send_task = tokio::spawn(async move {
        while let Ok(notice) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&notice) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => {
            // the receiver lives in send_task; wait for it to drop
            send_task.abort();
            let _ = send_task.await;
        }
    }
    state.notifier.release(&identity).await;
    debug!(identity = %identity, "inbox session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn json_body(res: Response) -> Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_app() -> (Router, AppState) {
        let state = AppState::default();
        (app(state.clone()), state)
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn host_post(uri: &str, host_token: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("x-host-token", host_token)
            .body(Body::empty())
            .unwrap()
    }

    fn as_participant(method: Method, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-participant-token", token)
            .body(Body::empty())
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    /// Creates a game and returns (game_id, code, host_token).
    async fn create(app: &Router) -> (u64, String, String) {
        let res = send(
            app,
            Request::builder()
                .method(Method::POST)
                .uri("/game")
                .header("x-admin-password", "changeme")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "name": "Office", "budget": "20 EUR", "owner": "org" }).to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        (
            body["game_id"].as_u64().unwrap(),
            body["code"].as_str().unwrap().to_string(),
            body["host_token"].as_str().unwrap().to_string(),
        )
    }

    async fn join(app: &Router, code: &str, identity: &str) -> Response {
        send(
            app,
            post_json(
                &format!("/join/{code}"),
                json!({ "identity": identity, "name": identity.to_uppercase() }),
            ),
        )
        .await
    }

    /// Joins and returns the participant token.
    async fn join_token(app: &Router, code: &str, identity: &str) -> String {
        let res = join(app, code, identity).await;
        assert_eq!(res.status(), StatusCode::OK);
        json_body(res).await["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_game_requires_admin_password() {
        let (app, _) = test_app();
        let res = send(
            &app,
            post_json("/game", json!({ "name": "Office", "owner": "org" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_game_returns_code_and_token() {
        let (app, _) = test_app();
        let (game_id, code, host_token) = create(&app).await;
        assert_eq!(code.len(), 8);
        assert!(!host_token.is_empty());

        let res = send(&app, get(&format!("/game/{game_id}"))).await;
        assert_eq!(res.status(), StatusCode::OK);
        let info = json_body(res).await;
        assert_eq!(info["status"], "open");
        assert_eq!(info["participants"], 0);
        assert!(info.get("host_token").is_none());

        let res = send(&app, get("/game/999")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn draw_flow_with_lookup() {
        let (app, _) = test_app();
        let (game_id, code, host_token) = create(&app).await;
        let ann = join_token(&app, &code, "ann").await;
        for who in ["bo", "cy"] {
            assert_eq!(join(&app, &code, who).await.status(), StatusCode::OK);
        }
        assert_eq!(join(&app, &code, "ann").await.status(), StatusCode::CONFLICT);
        let receiver_uri = format!("/game/{game_id}/receiver");
        let res = send(&app, get(&format!("/join/{code}?identity=dee"))).await;
        assert_eq!(json_body(res).await["id"], game_id);
        let res = send(&app, get(&format!("/join/{code}?identity=bo"))).await;
        assert_eq!(json_body(res).await["error"], "already_joined");

        let res = send(&app, as_participant(Method::GET, &receiver_uri, &ann)).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(res).await["reason"], "not_drawn");

        // no host token
        let res = send(
            &app,
            Request::builder()
                .method(Method::POST)
                .uri(format!("/game/{game_id}/draw"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = send(&app, host_post(&format!("/game/{game_id}/draw?seed=9"), &host_token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["reason"], "ok");
        // nobody has an open inbox
        assert_eq!(body["delivered"], 0);
        assert_eq!(body["failed"], 3);

        let res = send(&app, as_participant(Method::GET, &receiver_uri, &ann)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let name = body["receiver_name"].as_str().unwrap();
        assert!(name == "BO" || name == "CY");

        let res = send(&app, as_participant(Method::GET, "/game/999/receiver", &ann)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let info = json_body(send(&app, get(&format!("/game/{game_id}"))).await).await;
        assert_eq!(info["status"], "assigned");
    }

    #[tokio::test]
    async fn draw_needs_three_participants() {
        let (app, _) = test_app();
        let (game_id, code, host_token) = create(&app).await;
        join(&app, &code, "ann").await;
        join(&app, &code, "bo").await;

        let res = send(&app, host_post(&format!("/game/{game_id}/draw"), &host_token)).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let body = json_body(res).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["reason"], "not_enough");

        let info = json_body(send(&app, get(&format!("/game/{game_id}"))).await).await;
        assert_eq!(info["status"], "open");
    }

    #[tokio::test]
    async fn open_inbox_receives_private_notice() {
        let (app, state) = test_app();
        let (game_id, code, host_token) = create(&app).await;
        let mut tokens = Vec::new();
        for who in ["ann", "bo", "cy", "dee"] {
            tokens.push(join_token(&app, &code, who).await);
        }
        let bo = &tokens[1];
        let (identity, mut inbox) = state.open_inbox(game_id, bo).await.unwrap();
        assert_eq!(identity, "bo");

        let res = send(&app, host_post(&format!("/game/{game_id}/draw"), &host_token)).await;
        let body = json_body(res).await;
        assert_eq!(body["delivered"], 1);
        assert_eq!(body["failed"], 3);

        let Notice::Private { text } = inbox.recv().await.unwrap();
        let uri = format!("/game/{game_id}/receiver");
        let lookup = json_body(send(&app, as_participant(Method::GET, &uri, bo)).await).await;
        let receiver = lookup["receiver_name"].as_str().unwrap();
        assert!(text.contains(receiver));
    }

    #[tokio::test]
    async fn lock_blocks_joins_and_assigned_games_stay_closed() {
        let (app, _) = test_app();
        let (game_id, code, host_token) = create(&app).await;
        for who in ["ann", "bo", "cy"] {
            join(&app, &code, who).await;
        }

        let res = send(&app, host_post(&format!("/game/{game_id}/lock"), "wrong")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = send(&app, host_post(&format!("/game/{game_id}/lock"), &host_token)).await;
        assert_eq!(json_body(res).await["status"], "locked");
        let res = join(&app, &code, "dee").await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(res).await["error"], "closed");

        send(&app, host_post(&format!("/game/{game_id}/draw"), &host_token)).await;
        let res = send(&app, host_post(&format!("/game/{game_id}/open"), &host_token)).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(res).await["error"], "already_drawn");

        // re-draw is allowed by default and keeps one pairing per person
        let res = send(&app, host_post(&format!("/game/{game_id}/draw"), &host_token)).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn leave_list_and_delete() {
        let (app, _) = test_app();
        let (game_id, code, host_token) = create(&app).await;
        let org = join_token(&app, &code, "org").await;
        let ann = join_token(&app, &code, "ann").await;
        join(&app, &code, "bo").await;
        let leave_uri = format!("/game/{game_id}/leave");

        let res = send(&app, post_json(&leave_uri, json!({ "identity": "bo" }))).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = send(&app, as_participant(Method::POST, &leave_uri, &ann)).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let res = send(&app, as_participant(Method::POST, &leave_uri, &org)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let list = json_body(send(&app, get(&format!("/game/{game_id}/participants"))).await).await;
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1]["name"], "BO");
        assert!(list[1].get("token").is_none());

        let owned = json_body(send(&app, get("/games?identity=org&role=owner")).await).await;
        assert_eq!(owned.as_array().unwrap().len(), 1);
        let joined = json_body(send(&app, get("/games?identity=bo&role=player")).await).await;
        assert_eq!(joined[0]["code"], code.as_str());

        let res = send(
            &app,
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/game/{game_id}"))
                .header("x-host-token", host_token.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let res = send(&app, get(&format!("/game/{game_id}/participants"))).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn receiver_stays_private_without_own_token() {
        let (app, state) = test_app();
        let (game_id, code, host_token) = create(&app).await;
        let mut tokens = Vec::new();
        for who in ["ann", "bo", "cy"] {
            tokens.push(join_token(&app, &code, who).await);
        }
        let (other_id, other_code, _) = create(&app).await;
        let outsider = join_token(&app, &other_code, "zed").await;

        // guessing an identity opens nothing
        assert!(state.open_inbox(game_id, "ann").await.is_none());
        assert!(state.open_inbox(game_id, &outsider).await.is_none());
        assert!(state.open_inbox(other_id, &tokens[0]).await.is_none());

        send(&app, host_post(&format!("/game/{game_id}/draw"), &host_token)).await;

        let uri = format!("/game/{game_id}/receiver");
        let res = send(&app, get(&format!("{uri}?identity=ann"))).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = send(&app, as_participant(Method::GET, &uri, "ann")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = send(&app, as_participant(Method::GET, &uri, &outsider)).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = send(&app, as_participant(Method::GET, &uri, &tokens[0])).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["ok"], true);
    }

    #[tokio::test]
    async fn closed_inbox_is_released() {
        let (app, state) = test_app();
        let (game_id, code, _) = create(&app).await;
        let ann = join_token(&app, &code, "ann").await;

        let (identity, rx) = state.open_inbox(game_id, &ann).await.unwrap();
        assert!(!state.notifier().release(&identity).await);
        drop(rx);
        assert!(state.notifier().release(&identity).await);
        assert!(state.notifier().notify("ann", "late").await.is_err());
    }

    #[tokio::test]
    async fn persistence_writes_and_loads_games() {
        let path = std::env::temp_dir().join(format!("santa_state_{}.json", Uuid::new_v4()));
        let config = Config {
            persist_path: Some(path.clone()),
            ..Config::default()
        };
        let state = AppState::from_config(config.clone()).await.unwrap();
        let app = app(state);

        let (game_id, code, _) = create(&app).await;
        join(&app, &code, "ann").await;
        assert!(tokio::fs::metadata(&path).await.is_ok());

        let loaded = app_from(config).await;
        let info = json_body(send(&loaded, get(&format!("/game/{game_id}"))).await).await;
        assert_eq!(info["code"], code.as_str());
        assert_eq!(info["participants"], 1);

        let _ = tokio::fs::remove_file(&path).await;
    }

    async fn app_from(config: Config) -> Router {
        app(AppState::from_config(config).await.unwrap())
    }
}
