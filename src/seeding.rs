use crate::error::{BracketError, BracketResult};

/// Tennis-style seed order for a `size`-slot bracket. Adjacent pairs are the
/// first-round pairings: `[1, 4, 2, 3]` means 1v4 and 2v3.
///
/// Each doubling replaces seed `s` with `(s, 2L + 1 - s)`, so in a `2^k`
/// bracket the top `2^m` seeds land in distinct sub-brackets and cannot meet
/// before round `k - m + 1`.
pub fn seed_positions(size: usize) -> BracketResult<Vec<u32>> {
  check_size(size)?;
  let mut seeds = vec![1u32, 2];
  while seeds.len() < size {
    let n = seeds.len() as u32;
    let mut next = Vec::with_capacity(seeds.len() * 2);
    for seed in seeds.iter().copied() {
      next.push(seed);
      next.push(n * 2 + 1 - seed);
    }
    seeds = next;
  }
  Ok(seeds)
}

/// Largest bracket whose seeds still fit in a `u32`.
pub const MAX_BRACKET_SIZE: usize = 1 << 31;

/// Cheap shape check, run before anything is allocated for `size`.
pub fn check_size(size: usize) -> BracketResult<()> {
  if size < 2 || !size.is_power_of_two() || size > MAX_BRACKET_SIZE {
    return Err(BracketError::InvalidSize(size));
  }
  Ok(())
}

/// `log2(size)` for a power-of-two bracket.
pub fn round_count(size: usize) -> u32 {
  size.trailing_zeros()
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Round in which two seeds meet when every higher seed wins.
  fn meeting_round(positions: &[u32], a: u32, b: u32) -> u32 {
    let pa = positions.iter().position(|s| *s == a).unwrap();
    let pb = positions.iter().position(|s| *s == b).unwrap();
    let mut round = 1;
    let (mut ia, mut ib) = (pa / 2, pb / 2);
    while ia != ib {
      ia /= 2;
      ib /= 2;
      round += 1;
    }
    round
  }

  #[test]
  fn small_brackets_match_known_orderings() {
    assert_eq!(seed_positions(2).unwrap(), vec![1, 2]);
    assert_eq!(seed_positions(4).unwrap(), vec![1, 4, 2, 3]);
    assert_eq!(seed_positions(8).unwrap(), vec![1, 8, 4, 5, 2, 7, 3, 6]);
  }

  #[test]
  fn rejects_sizes_that_are_not_powers_of_two() {
    for size in [0, 1, 3, 6, 12, 33] {
      assert_eq!(seed_positions(size), Err(BracketError::InvalidSize(size)));
    }
  }

  #[test]
  fn rejects_sizes_beyond_u32_seeds() {
    assert_eq!(check_size(MAX_BRACKET_SIZE), Ok(()));
    assert_eq!(
      seed_positions(MAX_BRACKET_SIZE * 2),
      Err(BracketError::InvalidSize(MAX_BRACKET_SIZE * 2))
    );
    assert_eq!(seed_positions(1 << 40), Err(BracketError::InvalidSize(1 << 40)));
  }

  #[test]
  fn every_size_is_a_permutation() {
    for k in 1..=7 {
      let size = 1usize << k;
      let mut seeds = seed_positions(size).unwrap();
      seeds.sort_unstable();
      let expected: Vec<u32> = (1..=size as u32).collect();
      assert_eq!(seeds, expected, "size {size}");
    }
  }

  #[test]
  fn top_seeds_are_kept_apart_until_late_rounds() {
    for k in 2..=6u32 {
      let size = 1usize << k;
      let positions = seed_positions(size).unwrap();
      for m in 1..k {
        let top = 1u32 << m;
        for a in 1..=top {
          for b in (a + 1)..=top {
            // 2^m entrants remain at the start of round k - m + 1.
            let round = meeting_round(&positions, a, b);
            assert!(
              round >= k - m + 1,
              "seeds {a} and {b} meet in round {round} of a {size} bracket"
            );
          }
        }
      }
      assert_eq!(meeting_round(&positions, 1, 2), k);
    }
  }

  #[test]
  fn round_count_is_log2() {
    assert_eq!(round_count(2), 1);
    assert_eq!(round_count(32), 5);
  }
}
