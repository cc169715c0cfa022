//! Export of harvested records to a DSpace repository.
//!
//! - [`dspace`]: field mapping and item/patch shapes
//! - [`client`]: REST client that creates items in a collection
//! - [`csv`]: flat one-row-per-record rendering

pub mod client;
pub mod csv;
pub mod dspace;

pub use client::{
    CollectionInfo, DSpaceClient, DSpaceConfig, ItemSink, UploadError, UploadFailure, UploadReport,
};
pub use csv::to_csv;
pub use dspace::{
    normalize_field_name, DSpaceExporter, DSpaceItem, DSpaceMetadata, ExportError, FieldMapping,
    MetadataEntry, PatchOperation, DEFAULT_MAPPING, DEFAULT_SECTION,
};
