use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BracketError, BracketResult};
use crate::types::{EntrantId, Match, MatchId, MatchResults, TournamentState};

/// Vote storage as seen by the round engine. Counting is read-only; the only
/// mutation the engine performs is clearing a match during rollbacks.
pub trait VoteTally {
  fn count_for(&self, match_id: MatchId, candidate: EntrantId) -> u32;
  fn clear(&mut self, match_id: MatchId);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVote {
  pub voted_for: EntrantId,
  pub voted_at: DateTime<Utc>,
}

/// One vote per voter per match, plus the set of voters who locked their
/// picks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteBook {
  #[serde(default)]
  votes: BTreeMap<MatchId, BTreeMap<String, CastVote>>,
  #[serde(default)]
  finalized: BTreeSet<String>,
}

impl VoteTally for VoteBook {
  fn count_for(&self, match_id: MatchId, candidate: EntrantId) -> u32 {
    self
      .votes
      .get(&match_id)
      .map(|ballots| ballots.values().filter(|vote| vote.voted_for == candidate).count() as u32)
      .unwrap_or(0)
  }

  fn clear(&mut self, match_id: MatchId) {
    self.votes.remove(&match_id);
  }
}

impl VoteBook {
  pub fn new() -> Self {
    VoteBook::default()
  }

  /// Record or replace `voter_id`'s pick. Caller has already checked that
  /// voting is allowed.
  pub fn record(&mut self, match_id: MatchId, voter_id: &str, voted_for: EntrantId, now: DateTime<Utc>) {
    self.votes.entry(match_id).or_default().insert(
      voter_id.to_string(),
      CastVote {
        voted_for,
        voted_at: now,
      },
    );
  }

  pub fn choice(&self, match_id: MatchId, voter_id: &str) -> Option<EntrantId> {
    self
      .votes
      .get(&match_id)
      .and_then(|ballots| ballots.get(voter_id))
      .map(|vote| vote.voted_for)
  }

  pub fn is_finalized(&self, voter_id: &str) -> bool {
    self.finalized.contains(voter_id)
  }

  pub fn finalize(&mut self, voter_id: &str) -> bool {
    self.finalized.insert(voter_id.to_string())
  }

  pub fn clear_finalizations(&mut self) {
    self.finalized.clear();
  }

  pub fn total_votes(&self) -> usize {
    self.votes.values().map(|ballots| ballots.len()).sum()
  }

  pub fn unique_voters(&self) -> usize {
    self
      .votes
      .values()
      .flat_map(|ballots| ballots.keys())
      .collect::<BTreeSet<_>>()
      .len()
  }
}

/// True once a voter locked their picks or the deadline passed.
pub fn voter_locked(votes: &VoteBook, state: &TournamentState, voter_id: &str, now: DateTime<Utc>) -> bool {
  votes.is_finalized(voter_id) || state.deadline_passed(now)
}

/// Apply the casting rules for one ballot and record it.
pub fn cast_vote(
  votes: &mut VoteBook,
  state: &TournamentState,
  game: &Match,
  voter_id: &str,
  voted_for: EntrantId,
  now: DateTime<Utc>,
) -> BracketResult<()> {
  let voter_id = voter_id.trim();
  if voter_id.is_empty() {
    return Err(BracketError::VoteRejected("Missing voter id".to_string()));
  }
  if !game.is_open() {
    return Err(BracketError::VoteRejected("Match is not active".to_string()));
  }
  if voter_locked(votes, state, voter_id, now) {
    return Err(BracketError::VoteRejected("Your votes are finalised".to_string()));
  }
  if !game.holds(voted_for) {
    return Err(BracketError::VoteRejected("Invalid candidate for this match".to_string()));
  }
  votes.record(game.match_id, voter_id, voted_for, now);
  Ok(())
}

/// Tallies for both slots with percentages rounded to one decimal.
pub fn match_results<V: VoteTally + ?Sized>(votes: &V, game: &Match) -> MatchResults {
  let votes_a = game.slot_a.map(|id| votes.count_for(game.match_id, id)).unwrap_or(0);
  let votes_b = game.slot_b.map(|id| votes.count_for(game.match_id, id)).unwrap_or(0);
  let total = votes_a + votes_b;
  MatchResults {
    slot_a: game.slot_a,
    slot_b: game.slot_b,
    votes_a,
    votes_b,
    pct_a: percent(votes_a, total),
    pct_b: percent(votes_b, total),
    total,
  }
}

fn percent(part: u32, total: u32) -> f64 {
  if total == 0 {
    return 0.0;
  }
  (part as f64 / total as f64 * 1000.0).round() / 10.0
}
