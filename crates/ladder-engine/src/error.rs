//! Error type for `ladder-engine`.

use ladder_core::store::StoreError;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Domain(#[from] ladder_core::Error),

  #[error("store error: {0}")]
  Store(#[source] BoxError),

  /// The external scheduler rejected a request; the local ledger entry was
  /// released.
  #[error("review scheduler failed for {schedule}: {source}")]
  ExternalScheduleFailure {
    schedule: String,
    #[source]
    source:   BoxError,
  },
}

impl Error {
  /// Lift a backend error, keeping domain errors typed.
  pub fn store<E: StoreError>(e: E) -> Self {
    match e.into_domain() {
      Ok(domain) => Self::Domain(domain),
      Err(other) => Self::Store(Box::new(other)),
    }
  }

  pub fn schedule<E>(schedule: impl Into<String>, e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::ExternalScheduleFailure { schedule: schedule.into(), source: Box::new(e) }
  }

  /// The domain error, if this is one.
  pub fn as_domain(&self) -> Option<&ladder_core::Error> {
    match self {
      Self::Domain(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
