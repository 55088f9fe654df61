//! Blob file names.
//!
//! A blob's lifecycle state lives in its file name, so every state change is
//! a single rename:
//!
//! ```text
//! 2025-01-15T143022.123456-<id>.blob.tmp                              staged
//! 2025-01-15T143022.123456-<id>.blob                                  committed
//! 2025-01-15T143022.123456-<id>.blob@2025-01-15T143032.123456.lock    leased
//! ```
//!
//! Timestamps are UTC with microsecond precision in a fixed-width, sortable
//! pattern, so a lexical sort of committed names is a sort by creation time.
//! The creation timestamp is located by width rather than by searching for
//! `-`, and ids are restricted to ASCII alphanumerics, so neither the date
//! separators nor the id can be mistaken for a field boundary.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use thiserror::Error;

/// strftime pattern for every timestamp embedded in a name.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S%.6f";

/// Length of a formatted timestamp, e.g. `2025-01-15T143022.123456`.
pub const TIMESTAMP_LEN: usize = 24;

pub const BLOB_EXTENSION: &str = ".blob";
pub const STAGED_SUFFIX: &str = ".tmp";
pub const LEASE_SUFFIX: &str = ".lock";
pub const LEASE_SEPARATOR: char = '@';
const ID_SEPARATOR: char = '-';

/// Errors from parsing or building a blob name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("missing .blob extension: {0}")]
    MissingExtension(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid blob id: {0:?}")]
    InvalidId(String),

    #[error("malformed lease suffix: {0}")]
    MalformedLease(String),
}

/// Lifecycle state encoded in the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    /// Written but not yet renamed into place. Invisible to readers.
    Staged,
    /// Available to any consumer.
    Committed,
    /// Claimed until the given instant.
    Leased { until: DateTime<Utc> },
}

/// Parsed blob file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobName {
    created: DateTime<Utc>,
    id: String,
    state: BlobState,
}

impl BlobName {
    /// Build a committed name. `created` is truncated to microseconds.
    pub fn new(created: DateTime<Utc>, id: impl Into<String>) -> Result<Self, NameError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(BlobName {
            created: created.trunc_subsecs(6),
            id,
            state: BlobState::Committed,
        })
    }

    /// Fresh committed name with a random id.
    pub fn generate(created: DateTime<Utc>) -> Self {
        BlobName {
            created: created.trunc_subsecs(6),
            id: uuid::Uuid::new_v4().simple().to_string(),
            state: BlobState::Committed,
        }
    }

    /// Parse a bare file name (no directory components).
    pub fn parse(file_name: &str) -> Result<Self, NameError> {
        let (body, state) = if let Some(body) = file_name.strip_suffix(STAGED_SUFFIX) {
            (body, BlobState::Staged)
        } else if let Some(rest) = file_name.strip_suffix(LEASE_SUFFIX) {
            let (body, expiry) = rest
                .rsplit_once(LEASE_SEPARATOR)
                .ok_or_else(|| NameError::MalformedLease(file_name.to_string()))?;
            let until = parse_timestamp(expiry)?;
            (body, BlobState::Leased { until })
        } else {
            (file_name, BlobState::Committed)
        };

        let stem = body
            .strip_suffix(BLOB_EXTENSION)
            .ok_or_else(|| NameError::MissingExtension(file_name.to_string()))?;

        if stem.len() <= TIMESTAMP_LEN + 1 || !stem.is_char_boundary(TIMESTAMP_LEN) {
            return Err(NameError::InvalidTimestamp(stem.to_string()));
        }
        let (timestamp, rest) = stem.split_at(TIMESTAMP_LEN);
        let created = parse_timestamp(timestamp)?;
        let id = rest
            .strip_prefix(ID_SEPARATOR)
            .ok_or_else(|| NameError::InvalidId(rest.to_string()))?;
        validate_id(id)?;

        Ok(BlobName {
            created,
            id: id.to_string(),
            state,
        })
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> BlobState {
        self.state
    }

    /// Lease expiry, if leased.
    pub fn lease_expiry(&self) -> Option<DateTime<Utc>> {
        match self.state {
            BlobState::Leased { until } => Some(until),
            _ => None,
        }
    }

    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        self.lease_expiry().is_some_and(|until| until > now)
    }

    /// Same blob in committed form.
    pub fn committed(&self) -> Self {
        self.with_state(BlobState::Committed)
    }

    /// Same blob in staged form.
    pub fn staged(&self) -> Self {
        self.with_state(BlobState::Staged)
    }

    /// Same blob leased until `until` (truncated to microseconds).
    pub fn leased(&self, until: DateTime<Utc>) -> Self {
        self.with_state(BlobState::Leased {
            until: until.trunc_subsecs(6),
        })
    }

    fn with_state(&self, state: BlobState) -> Self {
        BlobName {
            created: self.created,
            id: self.id.clone(),
            state,
        }
    }

    /// Render the file name.
    pub fn file_name(&self) -> String {
        let base = format!(
            "{}{}{}{}",
            format_timestamp(self.created),
            ID_SEPARATOR,
            self.id,
            BLOB_EXTENSION
        );
        match self.state {
            BlobState::Committed => base,
            BlobState::Staged => format!("{}{}", base, STAGED_SUFFIX),
            BlobState::Leased { until } => format!(
                "{}{}{}{}",
                base,
                LEASE_SEPARATOR,
                format_timestamp(until),
                LEASE_SUFFIX
            ),
        }
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl FromStr for BlobName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlobName::parse(s)
    }
}

/// Format a timestamp in the fixed name pattern.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp produced by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, NameError> {
    if s.len() != TIMESTAMP_LEN {
        return Err(NameError::InvalidTimestamp(s.to_string()));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H%M%S%.f")
        .map_err(|_| NameError::InvalidTimestamp(s.to_string()))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn validate_id(id: &str) -> Result<(), NameError> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(NameError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn test_committed_name_format() {
        let name = BlobName::new(ts("2025-01-15T143022.123456"), "abc123").unwrap();
        assert_eq!(name.file_name(), "2025-01-15T143022.123456-abc123.blob");
        assert_eq!(name.state(), BlobState::Committed);
    }

    #[test]
    fn test_staged_and_leased_names() {
        let name = BlobName::new(ts("2025-01-15T143022.000001"), "ff").unwrap();
        assert_eq!(
            name.staged().file_name(),
            "2025-01-15T143022.000001-ff.blob.tmp"
        );
        let leased = name.leased(ts("2025-01-15T143032.500000"));
        assert_eq!(
            leased.file_name(),
            "2025-01-15T143022.000001-ff.blob@2025-01-15T143032.500000.lock"
        );
        assert_eq!(leased.committed(), name);
    }

    #[test]
    fn test_parse_leased() {
        let parsed =
            BlobName::parse("2025-01-15T143022.123456-abc.blob@2025-01-15T143122.000000.lock")
                .unwrap();
        assert_eq!(parsed.id(), "abc");
        assert_eq!(parsed.created(), ts("2025-01-15T143022.123456"));
        assert_eq!(parsed.lease_expiry(), Some(ts("2025-01-15T143122.000000")));
        assert!(parsed.is_leased_at(ts("2025-01-15T143100.000000")));
        assert!(!parsed.is_leased_at(ts("2025-01-15T143122.000000")));
    }

    #[test]
    fn test_parse_staged() {
        let parsed = BlobName::parse("2025-01-15T143022.123456-abc.blob.tmp").unwrap();
        assert_eq!(parsed.state(), BlobState::Staged);
    }

    #[test]
    fn test_generated_id_has_no_separators() {
        let name = BlobName::generate(Utc::now());
        assert!(!name.id().contains('-'));
        assert!(!name.id().contains('@'));
        assert_eq!(BlobName::parse(&name.file_name()).unwrap(), name);
    }

    #[test]
    fn test_rejects_foreign_files() {
        assert!(matches!(
            BlobName::parse("notes.txt"),
            Err(NameError::MissingExtension(_))
        ));
        assert!(BlobName::parse("garbage.blob").is_err());
        assert!(BlobName::parse("2025-01-15T143022.123456.blob").is_err());
        assert!(BlobName::parse("2025-01-15T143022.123456-.blob").is_err());
        assert!(BlobName::parse("2025-01-15T143022.123456-a-b.blob").is_err());
        assert!(matches!(
            BlobName::parse("2025-01-15T143022.123456-abc.blob.lock"),
            Err(NameError::MalformedLease(_))
        ));
        assert!(BlobName::parse("2025-13-15T143022.123456-abc.blob").is_err());
    }

    #[test]
    fn test_new_rejects_bad_id() {
        assert!(BlobName::new(Utc::now(), "has-dash").is_err());
        assert!(BlobName::new(Utc::now(), "").is_err());
    }

    #[test]
    fn test_names_sort_by_creation() {
        let a = BlobName::new(ts("2025-01-15T090000.000000"), "zzz").unwrap();
        let b = BlobName::new(ts("2025-01-15T100000.000000"), "aaa").unwrap();
        assert!(a.file_name() < b.file_name());
    }

    #[test]
    fn test_created_truncated_to_micros() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let name = BlobName::new(precise, "x").unwrap();
        assert_eq!(name.created().timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(BlobName::parse(&name.file_name()).unwrap(), name);
    }
}
