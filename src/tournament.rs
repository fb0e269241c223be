use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::bracket::{self, Bracket};
use crate::error::{BracketError, BracketResult};
use crate::round_engine;
use crate::store::{Persistence, TournamentRecord};
use crate::types::{
  AdvanceReport, BracketOverview, DashboardStats, Entrant, EntrantId, Match, MatchId, MatchResults,
  MatchView, PublicEntrant, RoundReset, RoundResults, WaveInfo,
};
use crate::voting::{self, VoteTally};

/// The tournament as callers see it. Each mutating call clones the committed
/// record, applies the change to the clone, saves it and only then swaps it
/// in, so a failed step never leaves a half-applied record behind.
pub struct Tournament {
  store: Box<dyn Persistence>,
  record: Option<TournamentRecord>,
}

impl Tournament {
  pub fn open(store: Box<dyn Persistence>) -> BracketResult<Self> {
    let record = store.load()?;
    if let Some(record) = &record {
      round_engine::check_tree(&record.tree)?;
      info!(
        store = %store.describe(),
        round = record.state.current_round,
        version = record.state.version,
        "loaded tournament"
      );
    } else {
      info!(store = %store.describe(), "no tournament stored yet");
    }
    Ok(Tournament { store, record })
  }

  pub fn is_built(&self) -> bool {
    self.record.is_some()
  }

  pub fn record(&self) -> BracketResult<&TournamentRecord> {
    self.record.as_ref().ok_or(BracketError::NotBuilt)
  }

  fn commit<R, F>(&mut self, action: &str, apply: F) -> BracketResult<R>
  where
    F: FnOnce(&mut TournamentRecord) -> BracketResult<R>,
  {
    let mut next = self.record()?.clone();
    let out = apply(&mut next)?;
    next.state.version += 1;
    if let Err(e) = self.store.save(&next) {
      error!(action, error = %e, "commit failed; keeping previous state");
      return Err(e);
    }
    self.record = Some(next);
    Ok(out)
  }

  // ── Construction ───────────────────────────────────────────────────

  pub fn build(&mut self, entrants: &[Entrant], bracket_size: usize) -> BracketResult<&Bracket> {
    self.build_with_field(entrants, bracket_size, bracket_size)
  }

  /// Seed a new bracket and open round one. Replaces any existing
  /// tournament, votes included.
  pub fn build_with_field(
    &mut self,
    entrants: &[Entrant],
    field_size: usize,
    bracket_size: usize,
  ) -> BracketResult<&Bracket> {
    let bracket = bracket::build_with_field(entrants, field_size, bracket_size)?;
    let previous_version = self.record.as_ref().map(|record| record.state.version);
    if let Some(version) = previous_version {
      warn!(version, "rebuilding bracket over an existing tournament");
    }
    let (tree, mut state) = round_engine::initialize(&bracket);
    state.version = previous_version.unwrap_or(0) + 1;
    let record = TournamentRecord {
      bracket,
      tree,
      state,
      votes: voting::VoteBook::new(),
    };
    self.store.save(&record)?;
    info!(
      bracket_size,
      matches = record.tree.len(),
      rounds = record.bracket.num_rounds,
      "built bracket"
    );
    let record = self.record.insert(record);
    Ok(&record.bracket)
  }

  // ── Round engine ───────────────────────────────────────────────────

  pub fn advance_round(&mut self) -> BracketResult<AdvanceReport> {
    let report = self.commit("advance_round", |record| {
      round_engine::advance_round(&mut record.tree, &mut record.state, &record.votes)
    })?;
    info!(
      decided = report.decided.len(),
      opened = report.opened.len(),
      round = report.current_round,
      complete = report.tournament_complete,
      "advanced"
    );
    if report.tournament_complete {
      if let Ok(Some(winner)) = self.tournament_winner() {
        info!(winner, "tournament complete");
      }
    }
    Ok(report)
  }

  pub fn wave_info(&self) -> BracketResult<Option<WaveInfo>> {
    let record = self.record()?;
    Ok(round_engine::wave_info(&record.tree, &record.state))
  }

  pub fn reset_wave(&mut self) -> BracketResult<Vec<MatchId>> {
    let cleared = self.commit("reset_wave", |record| {
      round_engine::reset_wave(&record.tree, &record.state, &mut record.votes)
    })?;
    info!(matches = ?cleared, "cleared votes for open wave");
    Ok(cleared)
  }

  pub fn reset_round(&mut self) -> BracketResult<RoundReset> {
    let reset = self.commit("reset_round", |record| {
      round_engine::reset_round(&mut record.tree, &record.state, &mut record.votes)
    })?;
    info!(
      round = reset.round,
      cleared = reset.cleared_matches.len(),
      blanked = reset.blanked_slots.len(),
      "rolled back round"
    );
    Ok(reset)
  }

  /// Full rollback to the freshly built bracket. Voter locks go too.
  pub fn reset_tournament(&mut self) -> BracketResult<Vec<MatchId>> {
    let opened = self.commit("reset_tournament", |record| {
      record.votes.clear_finalizations();
      Ok(round_engine::reset_tournament(
        &mut record.tree,
        &mut record.state,
        &record.bracket,
        &mut record.votes,
      ))
    })?;
    warn!(opened = opened.len(), "tournament reset to round 1");
    Ok(opened)
  }

  // ── Reveal and deadline ────────────────────────────────────────────

  pub fn reveal_round(&mut self, round: u32) -> BracketResult<()> {
    self.require_round(round)?;
    self.commit("reveal_round", |record| {
      record.state.revealed_rounds.insert(round);
      Ok(())
    })?;
    info!(round, "revealed round results");
    Ok(())
  }

  pub fn hide_round(&mut self, round: u32) -> BracketResult<()> {
    self.require_round(round)?;
    self.commit("hide_round", |record| {
      record.state.revealed_rounds.remove(&round);
      Ok(())
    })?;
    info!(round, "hid round results");
    Ok(())
  }

  pub fn is_revealed(&self, round: u32) -> BracketResult<bool> {
    Ok(self.record()?.state.revealed_rounds.contains(&round))
  }

  pub fn set_deadline(&mut self, deadline: Option<DateTime<Utc>>) -> BracketResult<()> {
    self.commit("set_deadline", |record| {
      record.state.voting_deadline = deadline;
      Ok(())
    })?;
    info!(deadline = ?deadline, "voting deadline updated");
    Ok(())
  }

  // ── Voting ─────────────────────────────────────────────────────────

  pub fn cast_vote(
    &mut self,
    match_id: MatchId,
    voter_id: &str,
    voted_for: EntrantId,
    now: DateTime<Utc>,
  ) -> BracketResult<()> {
    self.commit("cast_vote", |record| {
      let game = record.tree.require(match_id)?;
      voting::cast_vote(&mut record.votes, &record.state, game, voter_id, voted_for, now)
    })
  }

  pub fn finalize_voter(&mut self, voter_id: &str) -> BracketResult<bool> {
    let voter_id = voter_id.trim();
    if voter_id.is_empty() {
      return Err(BracketError::VoteRejected("Missing voter id".to_string()));
    }
    self.commit("finalize_voter", |record| Ok(record.votes.finalize(voter_id)))
  }

  pub fn voter_locked(&self, voter_id: &str, now: DateTime<Utc>) -> BracketResult<bool> {
    let record = self.record()?;
    Ok(voting::voter_locked(&record.votes, &record.state, voter_id, now))
  }

  pub fn has_voted(&self, match_id: MatchId, voter_id: &str) -> BracketResult<Option<EntrantId>> {
    let record = self.record()?;
    record.tree.require(match_id)?;
    Ok(record.votes.choice(match_id, voter_id))
  }

  pub fn match_results(&self, match_id: MatchId) -> BracketResult<MatchResults> {
    let record = self.record()?;
    let game = record.tree.require(match_id)?;
    Ok(voting::match_results(&record.votes, game))
  }

  // ── Read accessors ─────────────────────────────────────────────────

  pub fn current_round(&self) -> BracketResult<u32> {
    Ok(self.record()?.state.current_round)
  }

  pub fn round_name(&self, round: u32) -> BracketResult<String> {
    self.require_round(round)?;
    Ok(self.record()?.bracket.round_name(round))
  }

  pub fn get_match(&self, match_id: MatchId) -> BracketResult<Match> {
    self.record()?.tree.require(match_id).cloned()
  }

  /// Open matches in position order.
  pub fn active_matches(&self) -> BracketResult<Vec<Match>> {
    Ok(self.record()?.tree.iter().filter(|m| m.is_open()).cloned().collect())
  }

  /// Decided matches with their final tallies, optionally for one round.
  pub fn completed_matches(&self, round: Option<u32>) -> BracketResult<Vec<MatchView>> {
    if let Some(round) = round {
      self.require_round(round)?;
    }
    let record = self.record()?;
    Ok(
      record
        .tree
        .iter()
        .filter(|m| m.is_decided() && round.map_or(true, |r| m.round == r))
        .map(|m| match_view(record, m, true))
        .collect(),
    )
  }

  pub fn tournament_winner(&self) -> BracketResult<Option<EntrantId>> {
    Ok(self.record()?.tree.final_match().and_then(|m| m.winner))
  }

  /// Every match ordered by `(round, position)`. Tallies are filled in for
  /// decided matches only; seeds are left out.
  pub fn overview(&self) -> BracketResult<BracketOverview> {
    let record = self.record()?;
    let matches = record
      .tree
      .iter()
      .map(|m| match_view(record, m, m.is_decided()))
      .collect();
    let entrants = record
      .bracket
      .entrants
      .iter()
      .map(|e| PublicEntrant {
        id: e.id,
        score: e.score,
      })
      .collect();
    Ok(BracketOverview {
      matches,
      entrants,
      current_round: record.state.current_round,
      winner: self.tournament_winner()?,
    })
  }

  /// Completed matches grouped by round, for revealed rounds only.
  pub fn revealed_results(&self) -> BracketResult<Vec<RoundResults>> {
    let record = self.record()?;
    let mut out = Vec::new();
    for round in record.state.revealed_rounds.iter().copied() {
      let matches: Vec<MatchView> = record
        .tree
        .round(round)
        .filter(|m| m.is_decided())
        .map(|m| match_view(record, m, true))
        .collect();
      if matches.is_empty() {
        continue;
      }
      out.push(RoundResults {
        round,
        name: record.bracket.round_name(round),
        matches,
      });
    }
    Ok(out)
  }

  pub fn dashboard(&self) -> BracketResult<DashboardStats> {
    let record = self.record()?;
    let current_round = record.state.current_round;
    Ok(DashboardStats {
      current_round,
      round_name: record.bracket.round_name(current_round),
      wave: round_engine::wave_info(&record.tree, &record.state),
      active: record
        .tree
        .iter()
        .filter(|m| m.is_open())
        .map(|m| match_view(record, m, true))
        .collect(),
      completed: self.completed_matches(None)?,
      winner: self.tournament_winner()?,
      total_votes: record.votes.total_votes(),
      unique_voters: record.votes.unique_voters(),
      seeds: record.bracket.entrants.clone(),
      voting_deadline: record.state.voting_deadline,
      revealed_rounds: record.state.revealed_rounds.iter().copied().collect(),
      version: record.state.version,
    })
  }

  fn require_round(&self, round: u32) -> BracketResult<()> {
    let record = self.record()?;
    if round == 0 || round > record.bracket.num_rounds {
      return Err(BracketError::RoundNotFound(round));
    }
    Ok(())
  }
}

fn match_view(record: &TournamentRecord, m: &Match, with_counts: bool) -> MatchView {
  let count = |slot: Option<EntrantId>| match (with_counts, slot) {
    (true, Some(id)) => record.votes.count_for(m.match_id, id),
    _ => 0,
  };
  MatchView {
    info: m.clone(),
    round_name: record.bracket.round_name(m.round),
    votes_a: count(m.slot_a),
    votes_b: count(m.slot_b),
  }
}
