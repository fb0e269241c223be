//! Round advancement over a match tree.
//!
//! Every function here mutates the tree, state and tally it is handed and
//! may bail out halfway on error. Callers run them against a working copy
//! and only commit the copy on success (see `Tournament::commit`).

use std::collections::{HashMap, HashSet};

use crate::bracket::{Bracket, MatchTree};
use crate::error::{BracketError, BracketResult};
use crate::types::{
  AdvanceReport, DecidedMatch, EntrantId, MatchId, RoundReset, TournamentState, WaveInfo, WAVE_SIZE,
};
use crate::voting::VoteTally;

/// Fresh tree from a build with round one's first wave open.
pub fn initialize(bracket: &Bracket) -> (MatchTree, TournamentState) {
  let mut tree = MatchTree::from(bracket.matches.clone());
  let state = TournamentState::default();
  open_wave(&mut tree, state.current_round);
  (tree, state)
}

/// Open up to `WAVE_SIZE` pending matches of `round` in position order,
/// counting matches that are already open against the cap.
pub fn open_wave(tree: &mut MatchTree, round: u32) -> Vec<MatchId> {
  let already_open = tree.round(round).filter(|m| m.is_open()).count();
  let ready = tree
    .round(round)
    .filter(|m| !m.is_active && !m.is_decided() && m.slots_filled())
    .map(|m| m.match_id)
    .take(WAVE_SIZE.saturating_sub(already_open))
    .collect::<Vec<_>>();
  for match_id in &ready {
    if let Some(m) = tree.get_mut(*match_id) {
      m.is_active = true;
    }
  }
  ready
}

/// Decide every open match of the current round, push winners forward and
/// open whatever comes next: the following wave of this round, or the next
/// round once this one is fully decided.
pub fn advance_round<V: VoteTally + ?Sized>(
  tree: &mut MatchTree,
  state: &mut TournamentState,
  votes: &V,
) -> BracketResult<AdvanceReport> {
  let round = state.current_round;
  let open = tree
    .round(round)
    .filter(|m| m.is_open())
    .map(|m| m.match_id)
    .collect::<Vec<_>>();
  if open.is_empty() {
    return Err(BracketError::NoActiveMatches);
  }

  let mut decided = Vec::with_capacity(open.len());
  for match_id in open {
    let (slot_a, slot_b, next_match_id) = {
      let m = tree.require(match_id)?;
      match (m.slot_a, m.slot_b) {
        (Some(a), Some(b)) => (a, b, m.next_match_id),
        _ => {
          return Err(BracketError::InconsistentState(format!(
            "match {match_id} is open with an empty slot"
          )))
        }
      }
    };
    let votes_a = votes.count_for(match_id, slot_a);
    let votes_b = votes.count_for(match_id, slot_b);
    // Ties go to whoever sits in slot A, whatever their seed.
    let winner = if votes_a >= votes_b { slot_a } else { slot_b };

    let m = tree.require_mut(match_id)?;
    m.winner = Some(winner);
    m.is_active = false;

    if let Some(next_id) = next_match_id {
      propagate_winner(tree, match_id, next_id, winner)?;
    }
    decided.push(DecidedMatch {
      match_id,
      slot_a,
      slot_b,
      votes_a,
      votes_b,
      winner,
    });
  }

  let round_finished = tree.round(round).all(|m| m.is_decided());
  let mut tournament_complete = false;
  let opened = if !round_finished {
    let opened = open_wave(tree, round);
    if opened.is_empty() {
      return Err(BracketError::InconsistentState(format!(
        "round {round} has undecided matches that cannot be opened"
      )));
    }
    opened
  } else if tree.round_len(round + 1) > 0 {
    state.current_round = round + 1;
    open_wave(tree, round + 1)
  } else {
    tournament_complete = true;
    Vec::new()
  };

  Ok(AdvanceReport {
    decided,
    opened,
    current_round: state.current_round,
    tournament_complete,
  })
}

/// Write `winner` into the first empty slot of its successor. The tree shape
/// guarantees a free slot; finding none is a corrupted tree.
fn propagate_winner(
  tree: &mut MatchTree,
  from: MatchId,
  next_id: MatchId,
  winner: EntrantId,
) -> BracketResult<()> {
  let next = tree.require_mut(next_id)?;
  if next.slot_a.is_none() {
    next.slot_a = Some(winner);
  } else if next.slot_b.is_none() {
    next.slot_b = Some(winner);
  } else {
    return Err(BracketError::InconsistentState(format!(
      "match {next_id} is already full when placing the winner of match {from}"
    )));
  }
  Ok(())
}

/// `None` unless the current round is large enough to run in waves.
pub fn wave_info(tree: &MatchTree, state: &TournamentState) -> Option<WaveInfo> {
  let in_round = tree.round_len(state.current_round);
  if in_round <= WAVE_SIZE {
    return None;
  }
  let total_waves = in_round.div_ceil(WAVE_SIZE) as u32;
  let decided = tree
    .round(state.current_round)
    .filter(|m| m.is_decided())
    .count();
  let current_wave = ((decided / WAVE_SIZE) as u32 + 1).min(total_waves);
  Some(WaveInfo {
    current_wave,
    total_waves,
  })
}

/// Throw away the votes on the currently open matches. They stay open.
pub fn reset_wave<V: VoteTally + ?Sized>(
  tree: &MatchTree,
  state: &TournamentState,
  votes: &mut V,
) -> BracketResult<Vec<MatchId>> {
  let open = tree
    .round(state.current_round)
    .filter(|m| m.is_open())
    .map(|m| m.match_id)
    .collect::<Vec<_>>();
  if open.is_empty() {
    return Err(BracketError::NoActiveMatches);
  }
  for match_id in &open {
    votes.clear(*match_id);
  }
  Ok(open)
}

/// Void every result of the current round, pull its winners back out of the
/// following round and reopen the round's first wave.
pub fn reset_round<V: VoteTally + ?Sized>(
  tree: &mut MatchTree,
  state: &TournamentState,
  votes: &mut V,
) -> BracketResult<RoundReset> {
  let round = state.current_round;
  let ids = tree.round_ids(round);
  if ids.is_empty() {
    return Err(BracketError::RoundNotFound(round));
  }

  let mut blanked_slots = Vec::new();
  for match_id in &ids {
    votes.clear(*match_id);
    let (winner, next_match_id) = {
      let m = tree.require_mut(*match_id)?;
      let out = (m.winner.take(), m.next_match_id);
      m.is_active = false;
      out
    };
    let (Some(winner), Some(next_id)) = (winner, next_match_id) else {
      continue;
    };
    let next = tree.require_mut(next_id)?;
    if next.is_active || next.is_decided() {
      return Err(BracketError::InconsistentState(format!(
        "match {next_id} already started while round {round} is current"
      )));
    }
    if next.slot_a == Some(winner) {
      next.slot_a = None;
    } else if next.slot_b == Some(winner) {
      next.slot_b = None;
    } else {
      return Err(BracketError::InconsistentState(format!(
        "winner {winner} of match {match_id} is missing from match {next_id}"
      )));
    }
    blanked_slots.push((next_id, winner));
  }

  let reopened = open_wave(tree, round);
  Ok(RoundReset {
    round,
    cleared_matches: ids,
    blanked_slots,
    reopened,
  })
}

/// Back to the moment after the build: every vote gone, later rounds blank,
/// round one restored from the build record with its first wave open.
pub fn reset_tournament<V: VoteTally + ?Sized>(
  tree: &mut MatchTree,
  state: &mut TournamentState,
  bracket: &Bracket,
  votes: &mut V,
) -> Vec<MatchId> {
  for m in tree.iter() {
    votes.clear(m.match_id);
  }
  for m in &bracket.matches {
    votes.clear(m.match_id);
  }
  let (fresh_tree, fresh_state) = initialize(bracket);
  *tree = fresh_tree;
  *state = TournamentState {
    version: state.version,
    ..fresh_state
  };
  tree
    .round(1)
    .filter(|m| m.is_open())
    .map(|m| m.match_id)
    .collect()
}

/// Structural checks on a loaded tree. Any failure means the stored record
/// was tampered with or written by a buggy build.
pub fn check_tree(tree: &MatchTree) -> BracketResult<()> {
  if tree.is_empty() {
    return Err(BracketError::InconsistentState("match tree is empty".to_string()));
  }
  let mut ids = HashSet::new();
  if let Some(dup) = tree.iter().find(|m| !ids.insert(m.match_id)) {
    return Err(BracketError::InconsistentState(format!(
      "match id {} appears more than once",
      dup.match_id
    )));
  }
  let finals = tree.iter().filter(|m| m.next_match_id.is_none()).count();
  if finals != 1 {
    return Err(BracketError::InconsistentState(format!(
      "expected exactly one final, found {finals}"
    )));
  }
  let mut feeders: HashMap<MatchId, Vec<EntrantId>> = HashMap::new();
  for m in tree.iter() {
    if m.is_decided() && m.is_active {
      return Err(BracketError::InconsistentState(format!(
        "match {} is decided but still active",
        m.match_id
      )));
    }
    if let Some(winner) = m.winner {
      if !m.holds(winner) {
        return Err(BracketError::InconsistentState(format!(
          "winner {winner} of match {} is not in either slot",
          m.match_id
        )));
      }
    }
    if let Some(next_id) = m.next_match_id {
      let next = tree.require(next_id)?;
      if next.round != m.round + 1 {
        return Err(BracketError::InconsistentState(format!(
          "match {} feeds match {next_id} outside the next round",
          m.match_id
        )));
      }
      if let Some(winner) = m.winner {
        feeders.entry(next_id).or_default().push(winner);
      }
    }
  }
  for m in tree.iter().filter(|m| m.round > 1) {
    let expected = feeders.remove(&m.match_id).unwrap_or_default();
    for slot in [m.slot_a, m.slot_b].into_iter().flatten() {
      if !expected.contains(&slot) {
        return Err(BracketError::InconsistentState(format!(
          "match {} holds {slot}, which did not win a feeding match",
          m.match_id
        )));
      }
    }
  }
  Ok(())
}
