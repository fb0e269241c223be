use crate::config::load_seed_entrants;
use crate::error::BracketError;
use crate::tournament::Tournament;
use crate::types::*;

use axum::{
    extract::{Path as AxumPath, Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{path::PathBuf, sync::MutexGuard};
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

// ── State ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ServerState {
    pub tournament: SharedTournament,
    /// Entrant list read by `POST /admin/build` when the body has none.
    pub seed_path: PathBuf,
}

impl ServerState {
    fn lock(&self) -> MutexGuard<'_, Tournament> {
        self.tournament.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Errors ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }
}

pub fn error_status(err: &BracketError) -> StatusCode {
    match err {
        BracketError::MatchNotFound(_) | BracketError::RoundNotFound(_) | BracketError::NotBuilt => {
            StatusCode::NOT_FOUND
        }
        BracketError::NoActiveMatches | BracketError::VoteRejected(_) => StatusCode::CONFLICT,
        BracketError::InvalidSize(_)
        | BracketError::UnsupportedBracketShape { .. }
        | BracketError::NotEnoughEntrants { .. }
        | BracketError::DuplicateEntrant(_) => StatusCode::BAD_REQUEST,
        BracketError::InconsistentState(_) | BracketError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<BracketError> for ApiError {
    fn from(err: BracketError) -> Self {
        ApiError::new(error_status(&err), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn no_store_json<T: Serialize>(payload: &T) -> ApiResult {
    let body = serde_json::to_string(payload)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((
        [
            ("Content-Type", "application/json"),
            ("Cache-Control", "no-store"),
            ("Pragma", "no-cache"),
            ("Expires", "0"),
        ],
        body,
    )
        .into_response())
}

// ── Request and response bodies ────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub voter_id: String,
    pub voted_for: EntrantId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterRequest {
    pub voter_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterQuery {
    pub voter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub bracket_size: usize,
    #[serde(default)]
    pub field_size: Option<usize>,
    #[serde(default)]
    pub entrants: Option<Vec<Entrant>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineRequest {
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchupsPayload {
    current_round: u32,
    round_name: String,
    wave: Option<WaveInfo>,
    matches: Vec<Match>,
    winner: Option<EntrantId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchupPayload {
    #[serde(flatten)]
    info: Match,
    round_name: String,
    your_vote: Option<EntrantId>,
    locked: bool,
}

// ── Public handlers ────────────────────────────────────────────────────

async fn get_bracket(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let overview = state.lock().overview()?;
    no_store_json(&overview)
}

fn matchups_payload(tournament: &Tournament) -> Result<MatchupsPayload, BracketError> {
    let current_round = tournament.current_round()?;
    Ok(MatchupsPayload {
        current_round,
        round_name: tournament.round_name(current_round)?,
        wave: tournament.wave_info()?,
        matches: tournament.active_matches()?,
        winner: tournament.tournament_winner()?,
    })
}

async fn get_matchups(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let payload = matchups_payload(&state.lock())?;
    no_store_json(&payload)
}

async fn get_matchup(
    AxumState(state): AxumState<ServerState>,
    AxumPath(match_id): AxumPath<MatchId>,
    Query(query): Query<VoterQuery>,
) -> ApiResult {
    let payload = {
        let tournament = state.lock();
        let info = tournament.get_match(match_id)?;
        let voter = query.voter.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let (your_vote, locked) = match voter {
            Some(voter) => (
                tournament.has_voted(match_id, voter)?,
                tournament.voter_locked(voter, Utc::now())?,
            ),
            None => (None, false),
        };
        MatchupPayload {
            round_name: tournament.round_name(info.round)?,
            info,
            your_vote,
            locked,
        }
    };
    no_store_json(&payload)
}

/// Tallies stay private until the admin reveals the match's round.
async fn get_matchup_results(
    AxumState(state): AxumState<ServerState>,
    AxumPath(match_id): AxumPath<MatchId>,
) -> ApiResult {
    let results = {
        let tournament = state.lock();
        let info = tournament.get_match(match_id)?;
        if !tournament.is_revealed(info.round)? {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                format!("results for round {} are not revealed", info.round),
            ));
        }
        tournament.match_results(match_id)?
    };
    no_store_json(&results)
}

async fn post_vote(
    AxumState(state): AxumState<ServerState>,
    AxumPath(match_id): AxumPath<MatchId>,
    Json(request): Json<VoteRequest>,
) -> ApiResult {
    state
        .lock()
        .cast_vote(match_id, &request.voter_id, request.voted_for, Utc::now())?;
    no_store_json(&json!({ "ok": true, "matchId": match_id, "votedFor": request.voted_for }))
}

async fn post_finalize(AxumState(state): AxumState<ServerState>, Json(request): Json<VoterRequest>) -> ApiResult {
    let newly = state.lock().finalize_voter(&request.voter_id)?;
    no_store_json(&json!({ "finalized": true, "alreadyFinalized": !newly }))
}

async fn get_results(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let rounds = state.lock().revealed_results()?;
    no_store_json(&json!({ "rounds": rounds }))
}

async fn get_wave(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let payload = {
        let tournament = state.lock();
        let current_round = tournament.current_round()?;
        json!({
            "currentRound": current_round,
            "roundName": tournament.round_name(current_round)?,
            "wave": tournament.wave_info()?,
        })
    };
    no_store_json(&payload)
}

// ── Admin handlers ─────────────────────────────────────────────────────

async fn get_dashboard(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let stats = state.lock().dashboard()?;
    no_store_json(&stats)
}

async fn post_build(AxumState(state): AxumState<ServerState>, Json(request): Json<BuildRequest>) -> ApiResult {
    let entrants = match request.entrants {
        Some(entrants) => entrants,
        None => load_seed_entrants(&state.seed_path).map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?,
    };
    let field_size = request.field_size.unwrap_or(request.bracket_size);
    let mut tournament = state.lock();
    let bracket = tournament.build_with_field(&entrants, field_size, request.bracket_size)?;
    no_store_json(bracket)
}

async fn post_advance(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let report = state.lock().advance_round()?;
    no_store_json(&report)
}

async fn post_reset_wave(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let cleared = state.lock().reset_wave()?;
    no_store_json(&json!({ "cleared": cleared }))
}

async fn post_reset_round(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let reset = state.lock().reset_round()?;
    no_store_json(&reset)
}

async fn post_reset(AxumState(state): AxumState<ServerState>) -> ApiResult {
    let opened = state.lock().reset_tournament()?;
    no_store_json(&json!({ "opened": opened }))
}

async fn post_reveal(AxumState(state): AxumState<ServerState>, AxumPath(round): AxumPath<u32>) -> ApiResult {
    state.lock().reveal_round(round)?;
    no_store_json(&json!({ "round": round, "revealed": true }))
}

async fn post_hide(AxumState(state): AxumState<ServerState>, AxumPath(round): AxumPath<u32>) -> ApiResult {
    state.lock().hide_round(round)?;
    no_store_json(&json!({ "round": round, "revealed": false }))
}

async fn post_deadline(
    AxumState(state): AxumState<ServerState>,
    Json(request): Json<DeadlineRequest>,
) -> ApiResult {
    state.lock().set_deadline(request.deadline)?;
    no_store_json(&json!({ "votingDeadline": request.deadline }))
}

// ── Router ─────────────────────────────────────────────────────────────

pub fn router(state: ServerState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/bracket", get(get_bracket))
        .route("/matchups", get(get_matchups))
        .route("/matchups/:id", get(get_matchup))
        .route("/matchups/:id/results", get(get_matchup_results))
        .route("/matchups/:id/vote", post(post_vote))
        .route("/voters/finalize", post(post_finalize))
        .route("/results", get(get_results))
        .route("/wave", get(get_wave))
        .route("/admin/dashboard", get(get_dashboard))
        .route("/admin/build", post(post_build))
        .route("/admin/advance", post(post_advance))
        .route("/admin/reset-wave", post(post_reset_wave))
        .route("/admin/reset-round", post(post_reset_round))
        .route("/admin/reset", post(post_reset))
        .route("/admin/reveal/:round", post(post_reveal))
        .route("/admin/hide/:round", post(post_hide))
        .route("/admin/deadline", post(post_deadline));

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    app.layer(TraceLayer::new_for_http()).with_state(state)
}

pub async fn serve(state: ServerState, static_dir: Option<PathBuf>, addr: &str) -> Result<(), String> {
    let app = router(state, static_dir);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;
    info!("bracket server listening at http://{addr}/");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("server error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    fn test_state(seed_path: PathBuf) -> ServerState {
        let tournament = Tournament::open(Box::new(MemoryStore::new())).unwrap();
        ServerState {
            tournament: Arc::new(Mutex::new(tournament)),
            seed_path,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn four_years() -> Value {
        json!({
            "bracketSize": 4,
            "entrants": [
                {"id": 2001, "score": 70.0},
                {"id": 1999, "score": 90.0},
                {"id": 2000, "score": 80.0},
                {"id": 2002, "score": 60.0}
            ]
        })
    }

    #[tokio::test]
    async fn unbuilt_tournament_is_not_found() {
        let app = router(test_state(PathBuf::from("/nonexistent/entrants.json")), None);
        let (status, body) = call(&app, "GET", "/matchups", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "tournament has not been built yet");
    }

    #[tokio::test]
    async fn build_vote_and_advance() {
        let app = router(test_state(PathBuf::from("/nonexistent/entrants.json")), None);
        let (status, body) = call(&app, "POST", "/admin/build", Some(four_years())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["numRounds"], 2);

        let (_, matchups) = call(&app, "GET", "/matchups", None).await;
        assert_eq!(matchups["roundName"], "Semifinals");
        assert_eq!(matchups["matches"].as_array().unwrap().len(), 2);
        assert_eq!(matchups["matches"][0]["slotA"], 1999);
        assert_eq!(matchups["matches"][0]["slotB"], 2002);

        let vote = json!({"voterId": "alice", "votedFor": 2002});
        let (status, _) = call(&app, "POST", "/matchups/1/vote", Some(vote)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, matchup) = call(&app, "GET", "/matchups/1?voter=alice", None).await;
        assert_eq!(matchup["yourVote"], 2002);
        assert_eq!(matchup["locked"], false);

        let (status, report) = call(&app, "POST", "/admin/advance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["currentRound"], 2);
        assert_eq!(report["decided"][0]["winner"], 2002);

        let (_, bracket) = call(&app, "GET", "/bracket", None).await;
        assert_eq!(bracket["matches"][2]["slotA"], 2002);
        assert!(bracket["entrants"][0].get("seed").is_none());
    }

    #[tokio::test]
    async fn vote_rule_violations_conflict() {
        let app = router(test_state(PathBuf::from("/nonexistent/entrants.json")), None);
        call(&app, "POST", "/admin/build", Some(four_years())).await;

        let bad = json!({"voterId": "bob", "votedFor": 2000});
        let (status, body) = call(&app, "POST", "/matchups/1/vote", Some(bad)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Invalid candidate for this match");

        let pending = json!({"voterId": "bob", "votedFor": 1999});
        let (status, _) = call(&app, "POST", "/matchups/3/vote", Some(pending)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, "POST", "/voters/finalize", Some(json!({"voterId": "bob"}))).await;
        assert_eq!(status, StatusCode::OK);
        let locked = json!({"voterId": "bob", "votedFor": 1999});
        let (_, body) = call(&app, "POST", "/matchups/1/vote", Some(locked)).await;
        assert_eq!(body["error"], "Your votes are finalised");

        let (status, _) = call(&app, "POST", "/matchups/42/vote", Some(json!({"voterId": "c", "votedFor": 1}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_builds_are_rejected() {
        let app = router(test_state(PathBuf::from("/nonexistent/entrants.json")), None);
        let (status, _) = call(&app, "POST", "/admin/build", Some(json!({"bracketSize": 6, "entrants": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, "POST", "/admin/build", Some(json!({"bracketSize": 4}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("read seed file"));

        let (status, _) = call(&app, "POST", "/admin/advance", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn build_reads_seed_file_when_body_has_no_entrants() {
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("entrants.json");
        let entrants: Vec<Value> = (0..8).map(|i| json!({"id": 1980 + i, "score": 50.0 + i as f64})).collect();
        std::fs::write(&seed_path, Value::Array(entrants).to_string()).unwrap();

        let app = router(test_state(seed_path), None);
        let (status, body) = call(&app, "POST", "/admin/build", Some(json!({"bracketSize": 8}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entrants"][0]["id"], 1987);
        assert_eq!(body["entrants"][0]["seed"], 1);
    }

    #[tokio::test]
    async fn results_follow_reveal() {
        let app = router(test_state(PathBuf::from("/nonexistent/entrants.json")), None);
        call(&app, "POST", "/admin/build", Some(four_years())).await;
        call(&app, "POST", "/admin/advance", None).await;

        let (status, _) = call(&app, "GET", "/matchups/1/results", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (_, results) = call(&app, "GET", "/results", None).await;
        assert_eq!(results["rounds"].as_array().unwrap().len(), 0);

        let (status, _) = call(&app, "POST", "/admin/reveal/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, tally) = call(&app, "GET", "/matchups/1/results", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tally["total"], 0);
        let (_, results) = call(&app, "GET", "/results", None).await;
        assert_eq!(results["rounds"][0]["name"], "Semifinals");

        let (status, _) = call(&app, "POST", "/admin/reveal/9", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_resets_and_dashboard() {
        let app = router(test_state(PathBuf::from("/nonexistent/entrants.json")), None);
        call(&app, "POST", "/admin/build", Some(four_years())).await;
        call(&app, "POST", "/matchups/2/vote", Some(json!({"voterId": "a", "votedFor": 2000}))).await;

        let (_, dashboard) = call(&app, "GET", "/admin/dashboard", None).await;
        assert_eq!(dashboard["totalVotes"], 1);
        assert_eq!(dashboard["uniqueVoters"], 1);
        assert_eq!(dashboard["seeds"][0]["seed"], 1);

        let (status, body) = call(&app, "POST", "/admin/reset-wave", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], json!([1, 2]));

        call(&app, "POST", "/admin/advance", None).await;
        let (status, reset) = call(&app, "POST", "/admin/reset-round", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reset["round"], 2);

        let (status, body) = call(&app, "POST", "/admin/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["opened"], json!([1, 2]));
        let (_, wave) = call(&app, "GET", "/wave", None).await;
        assert_eq!(wave["currentRound"], 1);
        assert_eq!(wave["wave"], Value::Null);
    }

    #[tokio::test]
    async fn deadline_locks_voting() {
        let app = router(test_state(PathBuf::from("/nonexistent/entrants.json")), None);
        call(&app, "POST", "/admin/build", Some(four_years())).await;
        let (status, _) = call(
            &app,
            "POST",
            "/admin/deadline",
            Some(json!({"deadline": "2000-01-01T00:00:00Z"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "POST", "/matchups/1/vote", Some(json!({"voterId": "z", "votedFor": 1999}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Your votes are finalised");
    }
}
