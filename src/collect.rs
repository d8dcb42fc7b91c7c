//! Archive slots and the per-(URL, slot) result record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// An archive service the relay can write to or look up from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    /// Internet Archive Wayback Machine.
    Ia,
    /// archive.today and its mirrors.
    Is,
    /// IPFS via a local daemon.
    Ip,
    /// Telegraph pages.
    Ph,
    /// Time Travel memento aggregator (lookup only).
    Tt,
    /// Google cache (lookup only).
    Gc,
}

/// Enabled flag per slot, as consumed by the dispatcher.
pub type Slots = BTreeMap<Slot, bool>;

impl Slot {
    /// Slots that accept new archives.
    pub const WRITABLE: [Slot; 4] = [Slot::Ia, Slot::Is, Slot::Ip, Slot::Ph];

    /// Slots queried by playback.
    pub const PLAYBACK: [Slot; 6] = [Slot::Ia, Slot::Is, Slot::Ip, Slot::Ph, Slot::Tt, Slot::Gc];

    /// Short lowercase identifier, used in env vars and CLI input.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Slot::Ia => "ia",
            Slot::Is => "is",
            Slot::Ip => "ip",
            Slot::Ph => "ph",
            Slot::Tt => "tt",
            Slot::Gc => "gc",
        }
    }

    /// Human readable service name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Slot::Ia => "Internet Archive",
            Slot::Is => "archive.today",
            Slot::Ip => "IPFS",
            Slot::Ph => "Telegraph",
            Slot::Tt => "Time Travel",
            Slot::Gc => "Google Cache",
        }
    }

    /// Homepage of the service, carried on every collect as its extra tag.
    #[must_use]
    pub const fn extra(self) -> &'static str {
        match self {
            Slot::Ia => "https://web.archive.org/",
            Slot::Is => "https://archive.today/",
            Slot::Ip => "https://ipfs.io/",
            Slot::Ph => "https://telegra.ph/",
            Slot::Tt => "https://timetravel.mementoweb.org/",
            Slot::Gc => "https://webcache.googleusercontent.com/",
        }
    }

    #[must_use]
    pub fn is_writable(self) -> bool {
        Self::WRITABLE.contains(&self)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown archive slot: {0}")]
pub struct UnknownSlot(pub String);

impl FromStr for Slot {
    type Err = UnknownSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ia" => Ok(Slot::Ia),
            "is" => Ok(Slot::Is),
            "ip" => Ok(Slot::Ip),
            "ph" => Ok(Slot::Ph),
            "tt" => Ok(Slot::Tt),
            "gc" => Ok(Slot::Gc),
            _ => Err(UnknownSlot(s.to_string())),
        }
    }
}

/// Failure of a single backend call. Always recorded, never escalated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("not found")]
    NotFound,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("upstream responded with status {0}")]
    Status(u16),
    #[error("upstream returned an empty destination")]
    EmptyDestination,
    #[error("{0} is not available for this operation")]
    Unsupported(Slot),
    #[error("{0}")]
    Failed(String),
}

impl From<anyhow::Error> for BackendError {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(format!("{e:#}"))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::DeadlineExceeded;
        }
        match e.status() {
            Some(status) => Self::Status(status.as_u16()),
            None => Self::Failed(e.to_string()),
        }
    }
}

/// What happened to one (URL, slot) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Location of the archived copy.
    Archived(String),
    Failed(BackendError),
}

/// The result unit of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collect {
    /// Source URL as submitted.
    pub src: String,
    pub slot: Slot,
    pub outcome: Outcome,
    /// Extra identifier, the slot's homepage.
    pub ext: String,
}

impl Collect {
    #[must_use]
    pub fn new(src: impl Into<String>, slot: Slot, outcome: Outcome) -> Self {
        Self {
            src: src.into(),
            slot,
            outcome,
            ext: slot.extra().to_string(),
        }
    }

    /// Destination rendered as text; failures render their error message.
    ///
    /// Never empty.
    #[must_use]
    pub fn destination(&self) -> String {
        match &self.outcome {
            Outcome::Archived(dst) => dst.clone(),
            Outcome::Failed(e) => e.to_string(),
        }
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        matches!(self.outcome, Outcome::Archived(_))
    }
}
