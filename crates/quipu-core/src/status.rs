//! The document compliance state machine.
//!
//! Statuses are monotonic except for the explicit retry path: a document in
//! `Error` (and, after re-derivation, `Rejected`) re-enters `Signed` so a
//! fresh submission job can pick it up. `Accepted` and `Canceled` are
//! terminal; nothing overrides them short of the audited privileged re-sign.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle status of a [`FiscalDocument`](crate::document::FiscalDocument).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
  Draft,
  Signed,
  Sent,
  Accepted,
  Rejected,
  /// Accepted by the authority with warnings attached.
  Observed,
  Error,
  Canceled,
}

impl DocumentStatus {
  /// The discriminant string stored in the `status` column.
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Draft => "draft",
      Self::Signed => "signed",
      Self::Sent => "sent",
      Self::Accepted => "accepted",
      Self::Rejected => "rejected",
      Self::Observed => "observed",
      Self::Error => "error",
      Self::Canceled => "canceled",
    }
  }

  /// Terminal states never advance again.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Accepted | Self::Canceled)
  }

  /// States from which an operator `retry` may resume the flow.
  pub fn is_retryable(self) -> bool {
    matches!(self, Self::Error | Self::Rejected)
  }

  /// The legal transition table.
  ///
  /// `Error -> Signed` and `Rejected -> Signed` are the retry re-entries; a
  /// retry reuses the existing signed artifact rather than re-signing.
  /// `Canceled` is reachable from every non-terminal state via void.
  pub fn can_transition(self, to: DocumentStatus) -> bool {
    use DocumentStatus::*;
    match (self, to) {
      (Draft, Signed) => true,
      (Signed, Sent) | (Signed, Error) => true,
      (Sent, Accepted) | (Sent, Rejected) | (Sent, Observed) | (Sent, Error) => true,
      (Error, Signed) | (Rejected, Signed) => true,
      (from, Canceled) if !from.is_terminal() => true,
      _ => false,
    }
  }

  /// Guarded transition; the only path by which a status may change.
  pub fn transition(self, to: DocumentStatus) -> Result<DocumentStatus> {
    if self.can_transition(to) {
      Ok(to)
    } else {
      Err(Error::IllegalTransition { from: self, to })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::DocumentStatus::*;

  #[test]
  fn happy_path_is_legal() {
    assert!(Draft.can_transition(Signed));
    assert!(Signed.can_transition(Sent));
    assert!(Sent.can_transition(Accepted));
    assert!(Sent.can_transition(Observed));
  }

  #[test]
  fn draft_is_never_revisited() {
    for from in [Signed, Sent, Accepted, Rejected, Observed, Error, Canceled] {
      assert!(!from.can_transition(Draft), "{from:?} -> Draft must be illegal");
    }
  }

  #[test]
  fn terminal_states_never_leave() {
    for to in [Draft, Signed, Sent, Rejected, Observed, Error, Canceled] {
      assert!(!Accepted.can_transition(to), "Accepted -> {to:?}");
    }
    for to in [Draft, Signed, Sent, Accepted, Rejected, Observed, Error] {
      assert!(!Canceled.can_transition(to), "Canceled -> {to:?}");
    }
  }

  #[test]
  fn retry_reenters_signed() {
    assert!(Error.can_transition(Signed));
    assert!(Rejected.can_transition(Signed));
    assert!(!Sent.can_transition(Signed));
  }

  #[test]
  fn void_reaches_canceled_from_non_terminal_only() {
    for from in [Draft, Signed, Sent, Rejected, Observed, Error] {
      assert!(from.can_transition(Canceled), "{from:?} -> Canceled");
    }
    assert!(!Accepted.can_transition(Canceled));
  }

  #[test]
  fn transition_error_carries_both_ends() {
    let err = Accepted.transition(Sent).unwrap_err();
    assert!(matches!(
      err,
      crate::Error::IllegalTransition { from: Accepted, to: Sent }
    ));
  }
}
