use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{BracketError, BracketResult};
use crate::seeding::{check_size, round_count, seed_positions};
use crate::types::{Entrant, EntrantId, Match, MatchId};

/// Output of [`build`]: the seeded field and the untouched match tree. Kept
/// alongside the live tree so a full reset can restore round one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
  pub bracket_size: usize,
  pub num_rounds: u32,
  pub round_names: Vec<String>,
  pub entrants: Vec<Entrant>,
  pub matches: Vec<Match>,
}

impl Bracket {
  pub fn round_name(&self, round: u32) -> String {
    round_name(self.bracket_size, round)
  }
}

/// Index-addressable match table. Successor lookups are table reads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Match>", into = "Vec<Match>")]
pub struct MatchTree {
  matches: Vec<Match>,
  index: HashMap<MatchId, usize>,
}

impl From<Vec<Match>> for MatchTree {
  fn from(mut matches: Vec<Match>) -> Self {
    matches.sort_by_key(|m| (m.round, m.position));
    let index = matches
      .iter()
      .enumerate()
      .map(|(idx, m)| (m.match_id, idx))
      .collect::<HashMap<_, _>>();
    MatchTree { matches, index }
  }
}

impl From<MatchTree> for Vec<Match> {
  fn from(tree: MatchTree) -> Self {
    tree.matches
  }
}

impl MatchTree {
  pub fn get(&self, match_id: MatchId) -> Option<&Match> {
    self.index.get(&match_id).and_then(|idx| self.matches.get(*idx))
  }

  pub fn get_mut(&mut self, match_id: MatchId) -> Option<&mut Match> {
    let idx = *self.index.get(&match_id)?;
    self.matches.get_mut(idx)
  }

  pub fn require(&self, match_id: MatchId) -> BracketResult<&Match> {
    self.get(match_id).ok_or(BracketError::MatchNotFound(match_id))
  }

  pub fn require_mut(&mut self, match_id: MatchId) -> BracketResult<&mut Match> {
    self.get_mut(match_id).ok_or(BracketError::MatchNotFound(match_id))
  }

  /// All matches ordered by `(round, position)`.
  pub fn iter(&self) -> impl Iterator<Item = &Match> {
    self.matches.iter()
  }

  pub fn len(&self) -> usize {
    self.matches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.matches.is_empty()
  }

  /// Matches of one round in position order.
  pub fn round(&self, round: u32) -> impl Iterator<Item = &Match> {
    self.matches.iter().filter(move |m| m.round == round)
  }

  pub fn round_ids(&self, round: u32) -> Vec<MatchId> {
    self.round(round).map(|m| m.match_id).collect()
  }

  pub fn round_len(&self, round: u32) -> usize {
    self.round(round).count()
  }

  /// The unique match without a successor.
  pub fn final_match(&self) -> Option<&Match> {
    self.matches.iter().find(|m| m.next_match_id.is_none())
  }
}

/// Display name for a round given how many entrants are still alive in it.
pub fn round_name(bracket_size: usize, round: u32) -> String {
  let remaining = round
    .checked_sub(1)
    .and_then(|shift| bracket_size.checked_shr(shift))
    .unwrap_or(0);
  match remaining {
    2 => "Final".to_string(),
    4 => "Semifinals".to_string(),
    8 => "Quarterfinals".to_string(),
    _ => format!("Round of {remaining}"),
  }
}

/// Seed the top `bracket_size` entrants by score into a full bracket.
pub fn build(entrants: &[Entrant], bracket_size: usize) -> BracketResult<Bracket> {
  build_with_field(entrants, bracket_size, bracket_size)
}

/// Select `field_size` entrants and seed them into a `bracket_size` bracket.
/// Only `field_size == bracket_size` is supported: a larger field would need
/// play-in rounds and a smaller one byes.
pub fn build_with_field(
  entrants: &[Entrant],
  field_size: usize,
  bracket_size: usize,
) -> BracketResult<Bracket> {
  check_size(bracket_size)?;
  if entrants.len() < field_size {
    return Err(BracketError::NotEnoughEntrants {
      needed: field_size,
      available: entrants.len(),
    });
  }
  if field_size != bracket_size {
    return Err(BracketError::UnsupportedBracketShape {
      field: field_size,
      bracket_size,
    });
  }

  let positions = seed_positions(bracket_size)?;
  let mut ranked = entrants.to_vec();
  ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
  ranked.truncate(field_size);

  let mut seen = HashSet::new();
  for (idx, entrant) in ranked.iter_mut().enumerate() {
    if !seen.insert(entrant.id) {
      return Err(BracketError::DuplicateEntrant(entrant.id));
    }
    entrant.seed = idx as u32 + 1;
  }

  let num_rounds = round_count(bracket_size);
  let round_one_count = (bracket_size / 2) as u32;
  let mut matches = Vec::with_capacity(bracket_size - 1);
  let mut next_id: MatchId = 1;

  for pair in positions.chunks(2) {
    let seed_a = pair[0] as usize;
    let seed_b = pair[1] as usize;
    let position = next_id;
    let next_match_id = if num_rounds > 1 {
      Some(round_one_count + (position + 1) / 2)
    } else {
      None
    };
    push_match(
      &mut matches,
      &mut next_id,
      1,
      position,
      Some(ranked[seed_a - 1].id),
      Some(ranked[seed_b - 1].id),
      next_match_id,
    );
  }

  let mut offset = round_one_count;
  for round in 2..=num_rounds {
    let in_round = (bracket_size >> round) as u32;
    let next_offset = offset + in_round;
    for position in 1..=in_round {
      let next_match_id = if round < num_rounds {
        Some(next_offset + (position + 1) / 2)
      } else {
        None
      };
      push_match(&mut matches, &mut next_id, round, position, None, None, next_match_id);
    }
    offset = next_offset;
  }

  let round_names = (1..=num_rounds)
    .map(|round| round_name(bracket_size, round))
    .collect();

  Ok(Bracket {
    bracket_size,
    num_rounds,
    round_names,
    entrants: ranked,
    matches,
  })
}

fn push_match(
  matches: &mut Vec<Match>,
  next_id: &mut MatchId,
  round: u32,
  position: u32,
  slot_a: Option<EntrantId>,
  slot_b: Option<EntrantId>,
  next_match_id: Option<MatchId>,
) -> MatchId {
  let match_id = *next_id;
  *next_id += 1;
  matches.push(Match {
    match_id,
    round,
    position,
    slot_a,
    slot_b,
    winner: None,
    next_match_id,
    is_active: false,
  });
  match_id
}
