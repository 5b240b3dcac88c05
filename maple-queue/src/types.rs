use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

const FILE_EXTENSION: &str = ".job";
const FILENAME_DIGITS: usize = 20;

/// Identifier of a queued email job.
///
/// Ids are assigned from a monotonically increasing counter starting at 1, so
/// a larger id was always enqueued later. On disk they are zero-padded to 20
/// digits so that lexicographic and numeric order agree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Name of the file holding this job, e.g. `00000000000000000042.job`.
    #[must_use]
    pub fn filename(self) -> String {
        format!("{:0width$}{FILE_EXTENSION}", self.0, width = FILENAME_DIGITS)
    }

    /// Parse a job file name produced by [`JobId::filename`].
    ///
    /// Anything else, including names with path separators or a missing
    /// extension, yields `None`. Only exact 20-digit stems are accepted.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') {
            return None;
        }

        let stem = filename.strip_suffix(FILE_EXTENSION)?;
        if stem.len() != FILENAME_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        stem.parse().ok().filter(|&id| id > 0).map(Self)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Lifecycle state of a job.
///
/// Stores only ever persist `Pending` and `Sent`. `Dead` is the derived state
/// of a pending job whose retry budget is spent; see
/// [`EmailJob::effective_status`](crate::EmailJob::effective_status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Sent,
    Dead,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "dead" => Ok(Self::Dead),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}
