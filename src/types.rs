use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};

use crate::tournament::Tournament;

// ── Constants ──────────────────────────────────────────────────────────

/// Rounds with more matches than this are opened in waves of this size.
pub const WAVE_SIZE: usize = 4;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:17900";
pub const RECORD_FILE_NAME: &str = "tournament.json";

// ── Shared state type aliases ──────────────────────────────────────────

pub type MatchId = u32;
pub type EntrantId = u32;
pub type SharedTournament = Arc<Mutex<Tournament>>;

// ── Bracket domain types ───────────────────────────────────────────────

/// Something being ranked. `id` is the year in the original contest but any
/// unique key works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entrant {
    pub id: EntrantId,
    pub score: f64,
    /// 1-based rank by score. Zero until the bracket builder assigns it.
    #[serde(default)]
    pub seed: u32,
}

impl Entrant {
    pub fn new(id: EntrantId, score: f64) -> Self {
        Entrant { id, score, seed: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub match_id: MatchId,
    pub round: u32,
    pub position: u32,
    pub slot_a: Option<EntrantId>,
    pub slot_b: Option<EntrantId>,
    pub winner: Option<EntrantId>,
    pub next_match_id: Option<MatchId>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchPhase {
    /// Not open for votes. Later-round matches sit here until both slots fill.
    Pending,
    Open,
    Decided,
}

impl Match {
    pub fn phase(&self) -> MatchPhase {
        match (self.winner, self.is_active) {
            (Some(_), _) => MatchPhase::Decided,
            (None, true) => MatchPhase::Open,
            (None, false) => MatchPhase::Pending,
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase() == MatchPhase::Open
    }

    pub fn is_decided(&self) -> bool {
        self.winner.is_some()
    }

    pub fn slots_filled(&self) -> bool {
        self.slot_a.is_some() && self.slot_b.is_some()
    }

    pub fn holds(&self, entrant: EntrantId) -> bool {
        self.slot_a == Some(entrant) || self.slot_b == Some(entrant)
    }
}

/// Process-wide tournament record. Every commit bumps `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentState {
    pub current_round: u32,
    #[serde(default)]
    pub revealed_rounds: BTreeSet<u32>,
    #[serde(default)]
    pub voting_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Default for TournamentState {
    fn default() -> Self {
        TournamentState {
            current_round: 1,
            revealed_rounds: BTreeSet::new(),
            voting_deadline: None,
            version: 0,
        }
    }
}

impl TournamentState {
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.voting_deadline.map(|deadline| now > deadline).unwrap_or(false)
    }
}

// ── Engine reports ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecidedMatch {
    pub match_id: MatchId,
    pub slot_a: EntrantId,
    pub slot_b: EntrantId,
    pub votes_a: u32,
    pub votes_b: u32,
    pub winner: EntrantId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceReport {
    pub decided: Vec<DecidedMatch>,
    /// Matches opened by this call, either the next wave or the next round.
    pub opened: Vec<MatchId>,
    pub current_round: u32,
    pub tournament_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveInfo {
    pub current_wave: u32,
    pub total_waves: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReset {
    pub round: u32,
    pub cleared_matches: Vec<MatchId>,
    /// `(match_id, entrant)` pairs blanked in the following round.
    pub blanked_slots: Vec<(MatchId, EntrantId)>,
    pub reopened: Vec<MatchId>,
}

// ── Reporting payloads ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResults {
    pub slot_a: Option<EntrantId>,
    pub slot_b: Option<EntrantId>,
    pub votes_a: u32,
    pub votes_b: u32,
    pub pct_a: f64,
    pub pct_b: f64,
    pub total: u32,
}

/// A match together with its tallies. Counts stay zero while undecided in
/// the public overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    #[serde(flatten)]
    pub info: Match,
    pub round_name: String,
    pub votes_a: u32,
    pub votes_b: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicEntrant {
    pub id: EntrantId,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketOverview {
    pub matches: Vec<MatchView>,
    pub entrants: Vec<PublicEntrant>,
    pub current_round: u32,
    pub winner: Option<EntrantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResults {
    pub round: u32,
    pub name: String,
    pub matches: Vec<MatchView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub current_round: u32,
    pub round_name: String,
    pub wave: Option<WaveInfo>,
    pub active: Vec<MatchView>,
    pub completed: Vec<MatchView>,
    pub winner: Option<EntrantId>,
    pub total_votes: usize,
    pub unique_voters: usize,
    pub seeds: Vec<Entrant>,
    pub voting_deadline: Option<DateTime<Utc>>,
    pub revealed_rounds: Vec<u32>,
    pub version: u64,
}
