//! Core traits and types for the harvest state machine.
//!
//! - Protocol verbs via [`Verb`]
//! - Paged list operations via [`ListVerb`]
//! - Selective-harvest parameters via [`ListOptions`]
//! - The closed error taxonomy rooted at [`HarvestError`]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::harvest::dates::Granularity;
use crate::harvest::parser::OaiParser;
use crate::model::{ListPage, MetadataFormat, Record, SetInfo};
use crate::traits::TransportFault;

// ============================================================================
// Verbs
// ============================================================================

/// Operation requested from the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Identify,
    ListSets,
    ListMetadataFormats,
    ListRecords,
    ListIdentifiers,
    GetRecord,
}

impl Verb {
    /// Wire name of the verb, as sent in the `verb` parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Identify => "Identify",
            Verb::ListSets => "ListSets",
            Verb::ListMetadataFormats => "ListMetadataFormats",
            Verb::ListRecords => "ListRecords",
            Verb::ListIdentifiers => "ListIdentifiers",
            Verb::GetRecord => "GetRecord",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// List Verb Trait
// ============================================================================

/// A paged list operation: which verb to send and how to parse one page.
///
/// The pagination loop in [`crate::harvest::pipeline`] is generic over this
/// trait, so every list verb shares the same continuation-token handling.
pub trait ListVerb: Send + Sync {
    /// Item yielded for each entry of a page
    type Item: Send;

    /// Verb sent on every request of the harvest
    const VERB: Verb;

    /// Parses one response body into a page of items.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Protocol`] for an in-body error marker and
    /// [`HarvestError::Response`] for malformed or incomplete documents.
    fn parse_page(parser: &OaiParser, body: &str) -> Result<ListPage<Self::Item>, HarvestError>;
}

/// `ListRecords`: full records with flattened metadata.
#[derive(Debug, Clone, Copy)]
pub struct ListRecords;

/// `ListIdentifiers`: header-only records.
#[derive(Debug, Clone, Copy)]
pub struct ListIdentifiers;

/// `ListSets`
#[derive(Debug, Clone, Copy)]
pub struct ListSets;

/// `ListMetadataFormats`
#[derive(Debug, Clone, Copy)]
pub struct ListMetadataFormats;

impl ListVerb for ListRecords {
    type Item = Record;
    const VERB: Verb = Verb::ListRecords;

    fn parse_page(parser: &OaiParser, body: &str) -> Result<ListPage<Record>, HarvestError> {
        parser.parse_records(body)
    }
}

impl ListVerb for ListIdentifiers {
    type Item = Record;
    const VERB: Verb = Verb::ListIdentifiers;

    fn parse_page(parser: &OaiParser, body: &str) -> Result<ListPage<Record>, HarvestError> {
        parser.parse_identifiers(body)
    }
}

impl ListVerb for ListSets {
    type Item = SetInfo;
    const VERB: Verb = Verb::ListSets;

    fn parse_page(parser: &OaiParser, body: &str) -> Result<ListPage<SetInfo>, HarvestError> {
        parser.parse_sets(body)
    }
}

impl ListVerb for ListMetadataFormats {
    type Item = MetadataFormat;
    const VERB: Verb = Verb::ListMetadataFormats;

    fn parse_page(
        parser: &OaiParser,
        body: &str,
    ) -> Result<ListPage<MetadataFormat>, HarvestError> {
        parser.parse_metadata_formats(body)
    }
}

// ============================================================================
// Selective Harvest Options
// ============================================================================

/// Selection parameters for `ListRecords` / `ListIdentifiers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Metadata format to disseminate (required, e.g. `"oai_dc"`)
    pub metadata_prefix: String,

    /// Restrict to one set spec
    pub set: Option<String>,

    /// Lower datestamp bound, `YYYY-MM-DD` or `YYYY-MM-DDThh:mm:ssZ`
    pub from: Option<String>,

    /// Upper datestamp bound, same granularity as `from`
    pub until: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self::new("oai_dc")
    }
}

impl ListOptions {
    pub fn new(metadata_prefix: impl Into<String>) -> Self {
        Self {
            metadata_prefix: metadata_prefix.into(),
            set: None,
            from: None,
            until: None,
        }
    }

    pub fn with_set(mut self, set: impl Into<String>) -> Self {
        self.set = Some(set.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_until(mut self, until: impl Into<String>) -> Self {
        self.until = Some(until.into());
        self
    }

    /// Names of the selection filters that are set, in wire spelling.
    pub fn active_filters(&self) -> Vec<&'static str> {
        [
            ("set", self.set.is_some()),
            ("from", self.from.is_some()),
            ("until", self.until.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, active)| active.then_some(name))
        .collect()
    }
}

/// Non-fatal condition noticed while building a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageWarning {
    /// A resumption token was supplied together with selection filters; the
    /// token wins and the filters were not sent.
    TokenOverridesFilters { ignored: Vec<&'static str> },
}

impl fmt::Display for PageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageWarning::TokenOverridesFilters { ignored } => write!(
                f,
                "resumption token provided; ignoring {}",
                ignored.join(", ")
            ),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Top-level error for every harvester operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarvestError {
    /// Caller input rejected before any request was sent
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Network fault or HTTP failure, after retries
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Error marker returned in the response body
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Malformed or structurally incomplete response
    #[error(transparent)]
    Response(#[from] ResponseError),
}

/// Malformed or inconsistent caller input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingParameter(&'static str),

    #[error("invalid {field} date '{value}': use YYYY-MM-DD or YYYY-MM-DDThh:mm:ssZ")]
    InvalidDate { field: &'static str, value: String },

    #[error("from and until dates must use the same granularity, got {from} and {until}")]
    GranularityMismatch {
        from: Granularity,
        until: Granularity,
    },

    #[error("from date ({from}) must be <= until date ({until})")]
    InvertedRange { from: String, until: String },

    #[error("invalid base URL '{0}': must start with http:// or https://")]
    InvalidBaseUrl(String),

    #[error("request timeout must be greater than zero")]
    InvalidTimeout,
}

/// Request failure after the retry budget was spent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("request failed after {attempts} attempt(s): {source}")]
pub struct TransportError {
    /// Total attempts made, including the first
    pub attempts: u32,

    /// Fault seen on the last attempt
    pub source: TransportFault,
}

/// In-body protocol errors, one variant per code defined by OAI-PMH 2.0.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("[badArgument] {message}")]
    BadArgument { message: String },

    #[error("[badVerb] {message}")]
    BadVerb { message: String },

    #[error("[badResumptionToken] {message}")]
    BadResumptionToken { message: String },

    #[error("[cannotDisseminateFormat] {message}")]
    CannotDisseminateFormat { message: String },

    #[error("[idDoesNotExist] {message}")]
    IdDoesNotExist { message: String },

    #[error("[noRecordsMatch] {message}")]
    NoRecordsMatch { message: String },

    #[error("[noMetadataFormats] {message}")]
    NoMetadataFormats { message: String },

    #[error("[noSetHierarchy] {message}")]
    NoSetHierarchy { message: String },

    /// Code outside the fixed table
    #[error("[{code}] {message}")]
    Other { code: String, message: String },
}

impl ProtocolError {
    /// Maps a wire error code to its variant.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "badArgument" => ProtocolError::BadArgument { message },
            "badVerb" => ProtocolError::BadVerb { message },
            "badResumptionToken" => ProtocolError::BadResumptionToken { message },
            "cannotDisseminateFormat" => ProtocolError::CannotDisseminateFormat { message },
            "idDoesNotExist" => ProtocolError::IdDoesNotExist { message },
            "noRecordsMatch" => ProtocolError::NoRecordsMatch { message },
            "noMetadataFormats" => ProtocolError::NoMetadataFormats { message },
            "noSetHierarchy" => ProtocolError::NoSetHierarchy { message },
            other => ProtocolError::Other {
                code: other.to_string(),
                message,
            },
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ProtocolError::BadArgument { .. } => "badArgument",
            ProtocolError::BadVerb { .. } => "badVerb",
            ProtocolError::BadResumptionToken { .. } => "badResumptionToken",
            ProtocolError::CannotDisseminateFormat { .. } => "cannotDisseminateFormat",
            ProtocolError::IdDoesNotExist { .. } => "idDoesNotExist",
            ProtocolError::NoRecordsMatch { .. } => "noRecordsMatch",
            ProtocolError::NoMetadataFormats { .. } => "noMetadataFormats",
            ProtocolError::NoSetHierarchy { .. } => "noSetHierarchy",
            ProtocolError::Other { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProtocolError::BadArgument { message }
            | ProtocolError::BadVerb { message }
            | ProtocolError::BadResumptionToken { message }
            | ProtocolError::CannotDisseminateFormat { message }
            | ProtocolError::IdDoesNotExist { message }
            | ProtocolError::NoRecordsMatch { message }
            | ProtocolError::NoMetadataFormats { message }
            | ProtocolError::NoSetHierarchy { message }
            | ProtocolError::Other { message, .. } => message,
        }
    }
}

/// Response that could not be turned into the expected structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("malformed XML response: {0}")]
    Malformed(String),

    #[error("{0} element not found in response")]
    MissingElement(&'static str),

    #[error("record not found: {0}")]
    RecordNotFound(String),
}

// ============================================================================
// Tests
// ============================================================================
