//! OAI-PMH harvesting.
//!
//! - **Traits**: verbs, list options and the error taxonomy
//! - **Dates**: datestamp granularity and range checks
//! - **Parser**: response decoding and metadata flattening
//! - **Pipeline**: [`Harvester`] and the resumption-token [`Paginator`]

pub mod dates;
pub mod parser;
pub mod pipeline;
pub mod traits;

pub use traits::{
    HarvestError, ListIdentifiers, ListMetadataFormats, ListOptions, ListRecords, ListSets,
    ListVerb, PageWarning, ProtocolError, ResponseError, TransportError, ValidationError, Verb,
};

pub use dates::Granularity;
pub use parser::OaiParser;
pub use pipeline::{Harvester, PageResult, Paginator, RawResponse, RecordStream};
