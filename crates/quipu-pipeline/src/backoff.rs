//! Retry backoff schedule for transient submission failures.

use std::time::Duration;

/// `base * 2^(attempt-1)`, capped. `attempt` is 1-based (the attempt that
/// just failed). The schedule is strictly increasing until the cap, which
/// keeps `next_run_at` strictly increasing as the job store requires.
pub fn backoff(base: Duration, attempt: u32, cap: Duration) -> Duration {
  let factor = 1u32 << attempt.saturating_sub(1).min(16);
  base.saturating_mul(factor).min(cap)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn doubles_per_attempt() {
    let base = Duration::from_secs(30);
    let cap = Duration::from_secs(3600);
    assert_eq!(backoff(base, 1, cap), Duration::from_secs(30));
    assert_eq!(backoff(base, 2, cap), Duration::from_secs(60));
    assert_eq!(backoff(base, 3, cap), Duration::from_secs(120));
    assert_eq!(backoff(base, 4, cap), Duration::from_secs(240));
  }

  #[test]
  fn caps_at_maximum_interval() {
    let base = Duration::from_secs(30);
    let cap = Duration::from_secs(300);
    assert_eq!(backoff(base, 10, cap), cap);
    // And never overflows for absurd attempt counts.
    assert_eq!(backoff(base, 1000, cap), cap);
  }

  #[test]
  fn strictly_increases_below_the_cap() {
    let base = Duration::from_secs(30);
    let cap = Duration::from_secs(86_400);
    let mut previous = Duration::ZERO;
    for attempt in 1..=8 {
      let next = backoff(base, attempt, cap);
      assert!(next > previous, "attempt {attempt} did not increase");
      previous = next;
    }
  }
}
