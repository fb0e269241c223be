use crate::types::{EntrantId, MatchId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BracketError {
  #[error("bracket size {0} must be a power of two and at least 2")]
  InvalidSize(usize),
  #[error("{field} entrants cannot fill a {bracket_size}-slot bracket; play-in and bye rounds are not supported")]
  UnsupportedBracketShape { field: usize, bracket_size: usize },
  #[error("not enough entrants: need {needed}, have {available}")]
  NotEnoughEntrants { needed: usize, available: usize },
  #[error("entrant {0} appears more than once")]
  DuplicateEntrant(EntrantId),
  #[error("no active matches to advance")]
  NoActiveMatches,
  #[error("match {0} not found")]
  MatchNotFound(MatchId),
  #[error("round {0} not found")]
  RoundNotFound(u32),
  #[error("tournament has not been built yet")]
  NotBuilt,
  #[error("inconsistent bracket state: {0}")]
  InconsistentState(String),
  #[error("{0}")]
  VoteRejected(String),
  #[error("storage: {0}")]
  Storage(String),
}

impl BracketError {
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      BracketError::MatchNotFound(_) | BracketError::RoundNotFound(_) | BracketError::NotBuilt
    )
  }
}

pub type BracketResult<T> = Result<T, BracketError>;
