//! Field-mapping export to the DSpace 7+ REST item shape.
//!
//! Source keys are resolved through a [`FieldMapping`]: the built-in default
//! table with caller entries merged on top. Keys missing from the mapping are
//! normalized (`dc:`/`dcterms:` keys become `dc.<local>`, other prefixed keys
//! `prefix.local`, bare keys `local.<key>`).

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::info;

use crate::model::{Metadata, Record};

/// Confidence value the destination reads as "unset".
pub const CONFIDENCE_UNSET: i32 = -1;

/// Submission section used when none is given.
pub const DEFAULT_SECTION: &str = "traditionalpageone";

/// Prefixes treated as Dublin Core when normalizing unmapped keys.
const DC_PREFIXES: [&str; 2] = ["dc", "dcterms"];

/// Built-in source key -> destination field table.
pub const DEFAULT_MAPPING: &[(&str, &str)] = &[
    // Dublin Core
    ("dc:title", "dc.title"),
    ("dcterms:title", "dc.title"),
    ("title", "dc.title"),
    ("dc:creator", "dc.contributor.author"),
    ("dcterms:creator", "dc.contributor.author"),
    ("creator", "dc.contributor.author"),
    ("dc:contributor", "dc.contributor.other"),
    ("dcterms:contributor", "dc.contributor.other"),
    ("contributor", "dc.contributor.other"),
    ("dc:subject", "dc.subject"),
    ("dcterms:subject", "dc.subject"),
    ("subject", "dc.subject"),
    ("dc:description", "dc.description"),
    ("dcterms:description", "dc.description"),
    ("description", "dc.description"),
    ("dcterms:abstract", "dc.description.abstract"),
    ("dc:publisher", "dc.publisher"),
    ("dcterms:publisher", "dc.publisher"),
    ("publisher", "dc.publisher"),
    ("dc:date", "dc.date.issued"),
    ("dcterms:date", "dc.date.issued"),
    ("dcterms:issued", "dc.date.issued"),
    ("date", "dc.date.issued"),
    ("dc:type", "dc.type"),
    ("dcterms:type", "dc.type"),
    ("type", "dc.type"),
    ("dc:format", "dc.format"),
    ("dcterms:format", "dc.format"),
    ("format", "dc.format"),
    ("dc:identifier", "dc.identifier"),
    ("dcterms:identifier", "dc.identifier.uri"),
    ("identifier", "dc.identifier"),
    ("dc:source", "dc.source"),
    ("dcterms:source", "dc.source"),
    ("source", "dc.source"),
    ("dc:language", "dc.language.iso"),
    ("dcterms:language", "dc.language.iso"),
    ("language", "dc.language.iso"),
    ("dc:rights", "dc.rights"),
    ("dcterms:rights", "dc.rights"),
    ("dcterms:license", "dc.rights.license"),
    ("dcterms:accessRights", "dc.rights.accessRights"),
    ("rights", "dc.rights"),
    ("dc:relation", "dc.relation"),
    ("dcterms:relation", "dc.relation"),
    ("relation", "dc.relation"),
    ("dc:coverage", "dc.coverage"),
    ("dcterms:coverage", "dc.coverage"),
    ("dcterms:spatial", "dc.coverage.spatial"),
    ("dcterms:temporal", "dc.coverage.temporal"),
    // OpenAIRE
    ("oaire:resourceType", "dc.type"),
    ("oaire:version", "dc.description.version"),
    ("oaire:citationTitle", "oaire.citation.title"),
    ("oaire:citationVolume", "oaire.citation.volume"),
    ("oaire:citationIssue", "oaire.citation.issue"),
    ("oaire:citationStartPage", "oaire.citation.startPage"),
    ("oaire:citationEndPage", "oaire.citation.endPage"),
    ("oaire:file", "dc.identifier.uri"),
    ("oaire:fundingStream", "oaire.fundingStream"),
    ("oaire:awardNumber", "oaire.awardNumber"),
    ("oaire:awardTitle", "oaire.awardTitle"),
    ("oaire:awardURI", "oaire.awardURI"),
    // DataCite
    ("datacite:identifier", "dc.identifier"),
    ("datacite:creator", "dc.contributor.author"),
    ("datacite:title", "dc.title"),
    ("datacite:subject", "dc.subject"),
    ("datacite:date", "dc.date.issued"),
    ("datacite:rights", "dc.rights"),
];

// ============================================================================
// Field Mapping
// ============================================================================

/// Immutable source-key -> destination-field table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    fields: HashMap<String, String>,
}

impl FieldMapping {
    /// The built-in table, built once and shared.
    pub fn defaults() -> Arc<FieldMapping> {
        static DEFAULTS: OnceLock<Arc<FieldMapping>> = OnceLock::new();
        DEFAULTS
            .get_or_init(|| {
                Arc::new(FieldMapping {
                    fields: DEFAULT_MAPPING
                        .iter()
                        .map(|(source, target)| (source.to_string(), target.to_string()))
                        .collect(),
                })
            })
            .clone()
    }

    /// A new table with `overrides` layered on top of this one.
    pub fn merged<I, K, V>(&self, overrides: I) -> FieldMapping
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields = self.fields.clone();
        fields.extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
        FieldMapping { fields }
    }

    pub fn get(&self, source_key: &str) -> Option<&str> {
        self.fields.get(source_key).map(String::as_str)
    }

    /// Destination field for `source_key`, normalizing unmapped keys.
    pub fn resolve(&self, source_key: &str) -> String {
        match self.get(source_key) {
            Some(target) => target.to_string(),
            None => normalize_field_name(source_key),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Destination name for a key absent from the mapping.
pub fn normalize_field_name(key: &str) -> String {
    match key.split_once(':') {
        Some((prefix, local)) if DC_PREFIXES.contains(&prefix) => format!("dc.{local}"),
        Some((prefix, local)) => format!("{prefix}.{local}"),
        None => format!("local.{key}"),
    }
}

// ============================================================================
// Destination Shapes
// ============================================================================

/// One destination metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub value: String,
    pub language: Option<String>,
    pub authority: Option<String>,
    pub confidence: i32,
}

/// Destination fields in the order they were first produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DSpaceMetadata {
    fields: Vec<(String, Vec<MetadataEntry>)>,
    index: HashMap<String, usize>,
}

impl DSpaceMetadata {
    fn push(&mut self, field: String, entry: MetadataEntry) {
        match self.index.get(&field) {
            Some(&pos) => self.fields[pos].1.push(entry),
            None => {
                self.index.insert(field.clone(), self.fields.len());
                self.fields.push((field, vec![entry]));
            }
        }
    }

    pub fn get(&self, field: &str) -> &[MetadataEntry] {
        self.index
            .get(field)
            .map(|&pos| self.fields[pos].1.as_slice())
            .unwrap_or(&[])
    }

    /// Values of `field` as plain strings.
    pub fn values(&self, field: &str) -> Vec<&str> {
        self.get(field).iter().map(|e| e.value.as_str()).collect()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MetadataEntry])> {
        self.fields
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for DSpaceMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, entries) in &self.fields {
            map.serialize_entry(name, entries)?;
        }
        map.end()
    }
}

/// Body for `POST /api/core/collections/{uuid}/items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DSpaceItem {
    pub name: String,
    pub metadata: DSpaceMetadata,
    pub in_archive: bool,
    pub discoverable: bool,
    pub withdrawn: bool,
    #[serde(rename = "type")]
    pub item_type: String,
}

/// One JSON Patch `add` against a workspace item submission section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    pub value: Vec<MetadataEntry>,
}

/// Errors from serializing or writing exported items.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error while writing export: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Exporter
// ============================================================================

/// Projects harvested metadata onto DSpace fields.
///
/// Records are exported independently; values are never merged across source
/// keys, even when several keys resolve to the same destination field.
#[derive(Debug, Clone)]
pub struct DSpaceExporter {
    mapping: Arc<FieldMapping>,
}

impl Default for DSpaceExporter {
    fn default() -> Self {
        Self::new(FieldMapping::defaults())
    }
}

impl DSpaceExporter {
    pub fn new(mapping: Arc<FieldMapping>) -> Self {
        Self { mapping }
    }

    /// Exporter over the default table extended by `custom`.
    pub fn with_custom_mapping<I, K, V>(custom: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(Arc::new(FieldMapping::defaults().merged(custom)))
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    /// Destination metadata for one record.
    pub fn build_metadata(&self, metadata: &Metadata) -> DSpaceMetadata {
        let mut out = DSpaceMetadata::default();
        for (source_key, values) in metadata.iter() {
            let target = self.mapping.resolve(source_key);
            for value in values {
                out.push(
                    target.clone(),
                    MetadataEntry {
                        value: value.value().to_string(),
                        language: value.language().map(str::to_string),
                        authority: None,
                        confidence: CONFIDENCE_UNSET,
                    },
                );
            }
        }
        out
    }

    pub fn export_record(&self, record: &Record) -> DSpaceItem {
        DSpaceItem {
            name: record.title().unwrap_or_default().to_string(),
            metadata: self.build_metadata(record.metadata()),
            in_archive: true,
            discoverable: true,
            withdrawn: false,
            item_type: "item".to_string(),
        }
    }

    pub fn export_records<'a, I>(&self, records: I) -> Vec<DSpaceItem>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        records.into_iter().map(|r| self.export_record(r)).collect()
    }

    /// `add` operations for `PATCH /api/submission/workspaceitems/{id}`.
    pub fn to_workspace_patch(&self, record: &Record, section: &str) -> Vec<PatchOperation> {
        self.build_metadata(record.metadata())
            .fields
            .into_iter()
            .map(|(field, values)| PatchOperation {
                op: "add".to_string(),
                path: format!("/sections/{section}/{field}"),
                value: values,
            })
            .collect()
    }

    /// Pretty-printed JSON array of exported items.
    pub fn to_json(&self, records: &[Record]) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(&self.export_records(records))?)
    }

    pub fn save_json(&self, records: &[Record], path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json(records)?)?;
        info!(records = records.len(), path = %path.display(), "Saved export");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeaderInfo, MetadataValue};

    fn record(entries: &[(&str, &str, Option<&str>)]) -> Record {
        let mut metadata = Metadata::new();
        for (key, value, lang) in entries {
            metadata.add(
                *key,
                MetadataValue::new(*value, None, None, lang.map(str::to_string)),
            );
        }
        Record::new(
            HeaderInfo {
                identifier: "oai:x:1".to_string(),
                datestamp: "2024-01-01".to_string(),
                ..HeaderInfo::default()
            },
            metadata,
        )
    }

    #[test]
    fn test_dcterms_and_bare_title_map_to_dc_title() {
        let exporter = DSpaceExporter::default();
        let a = exporter.export_record(&record(&[("dcterms:title", "A", None)]));
        let b = exporter.export_record(&record(&[("title", "B", None)]));

        assert_eq!(a.metadata.values("dc.title"), vec!["A"]);
        assert_eq!(b.metadata.values("dc.title"), vec!["B"]);
    }

    #[test]
    fn test_normalization_rule() {
        assert_eq!(normalize_field_name("custom:widget"), "custom.widget");
        assert_eq!(normalize_field_name("foo"), "local.foo");
        assert_eq!(normalize_field_name("dcterms:extent"), "dc.extent");
        assert_eq!(normalize_field_name("dc:audience"), "dc.audience");

        let exporter = DSpaceExporter::default();
        let item =
            exporter.export_record(&record(&[("custom:widget", "w", None), ("foo", "f", None)]));
        assert_eq!(item.metadata.values("custom.widget"), vec!["w"]);
        assert_eq!(item.metadata.values("local.foo"), vec!["f"]);
    }

    #[test]
    fn test_values_append_in_source_key_order_without_merging() {
        let exporter = DSpaceExporter::default();
        let item = exporter.export_record(&record(&[
            ("dc:title", "Same", Some("en")),
            ("dcterms:title", "Same", None),
            ("title", "Other", None),
        ]));

        assert_eq!(item.metadata.values("dc.title"), vec!["Same", "Same", "Other"]);
        let first = &item.metadata.get("dc.title")[0];
        assert_eq!(first.language.as_deref(), Some("en"));
        assert_eq!(first.authority, None);
        assert_eq!(first.confidence, CONFIDENCE_UNSET);
    }

    #[test]
    fn test_many_fields_keep_first_seen_order() {
        let entries: Vec<(String, String)> = (0..200)
            .flat_map(|i| {
                let key = format!("x:f{i}");
                [(key.clone(), format!("a{i}")), (key, format!("b{i}"))]
            })
            .collect();
        let borrowed: Vec<(&str, &str, Option<&str>)> =
            entries.iter().map(|(k, v)| (k.as_str(), v.as_str(), None)).collect();
        let item = DSpaceExporter::default().export_record(&record(&borrowed));

        assert_eq!(item.metadata.len(), 200);
        assert_eq!(item.metadata.fields().next(), Some("x.f0"));
        assert_eq!(item.metadata.fields().last(), Some("x.f199"));
        assert_eq!(item.metadata.values("x.f150"), vec!["a150", "b150"]);
        assert!(item.metadata.get("x.missing").is_empty());
    }

    #[test]
    fn test_custom_mapping_overrides_and_extends() {
        let exporter = DSpaceExporter::with_custom_mapping([
            ("oaire:citationVolume", "local.citation.volume"),
            ("local:category", "local.category"),
        ]);
        let item = exporter.export_record(&record(&[
            ("oaire:citationVolume", "15", None),
            ("local:category", "thesis", None),
            ("dc:creator", "Ada", None),
        ]));

        assert_eq!(item.metadata.values("local.citation.volume"), vec!["15"]);
        assert_eq!(item.metadata.values("local.category"), vec!["thesis"]);
        assert_eq!(item.metadata.values("dc.contributor.author"), vec!["Ada"]);

        // the shared defaults are untouched
        assert_eq!(
            FieldMapping::defaults().get("oaire:citationVolume"),
            Some("oaire.citation.volume")
        );
        assert_eq!(exporter.mapping().len(), DEFAULT_MAPPING.len() + 1);
    }

    #[test]
    fn test_item_envelope() {
        let exporter = DSpaceExporter::default();
        let item = exporter.export_record(&record(&[("dc:title", "Paper", None)]));
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["name"], "Paper");
        assert_eq!(json["inArchive"], true);
        assert_eq!(json["discoverable"], true);
        assert_eq!(json["withdrawn"], false);
        assert_eq!(json["type"], "item");
        assert_eq!(json["metadata"]["dc.title"][0]["value"], "Paper");
        assert_eq!(json["metadata"]["dc.title"][0]["confidence"], -1);
        assert!(json["metadata"]["dc.title"][0]["authority"].is_null());

        let untitled = exporter.export_record(&record(&[("dc:creator", "Ada", None)]));
        assert_eq!(untitled.name, "");
    }

    #[test]
    fn test_workspace_patch_reuses_field_resolution() {
        let exporter = DSpaceExporter::default();
        let rec = record(&[
            ("dc:title", "T", None),
            ("dc:creator", "A", None),
            ("dc:creator", "B", None),
        ]);
        let ops = exporter.to_workspace_patch(&rec, DEFAULT_SECTION);

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op, "add");
        assert_eq!(ops[0].path, "/sections/traditionalpageone/dc.title");
        assert_eq!(ops[1].path, "/sections/traditionalpageone/dc.contributor.author");
        assert_eq!(ops[1].value.len(), 2);
        assert_eq!(
            ops[1].value,
            exporter.export_record(&rec).metadata.get("dc.contributor.author")
        );
    }

    #[test]
    fn test_export_records_and_save_json() {
        let exporter = DSpaceExporter::default();
        let records = vec![
            record(&[("dc:title", "One", None)]),
            record(&[("dc:title", "Two", None)]),
        ];

        let items = exporter.export_records(&records);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].name, "Two");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        exporter.save_json(&records, &path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.as_array().unwrap().len(), 2);
        assert_eq!(written[0]["metadata"]["dc.title"][0]["value"], "One");
    }
}
