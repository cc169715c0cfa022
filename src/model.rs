//! Harvested data model.
//!
//! Metadata is kept deliberately generic: every leaf element of a record's
//! metadata subtree becomes a [`MetadataValue`] stored under its qualified key
//! (`prefix:localname` or a bare `localname`). Convenience accessors for the
//! common Dublin Core families sit on top of that store via [`Field`].

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ============================================================================
// Metadata Values
// ============================================================================

/// A single metadata value together with its namespace information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataValue {
    value: String,
    namespace: Option<String>,
    prefix: Option<String>,
    language: Option<String>,
}

impl MetadataValue {
    pub fn new(
        value: impl Into<String>,
        namespace: Option<String>,
        prefix: Option<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            value: value.into(),
            namespace,
            prefix,
            language,
        }
    }

    /// Shorthand for a value with no namespace, prefix or language.
    pub fn plain(value: impl Into<String>) -> Self {
        Self::new(value, None, None, None)
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Full namespace URI, e.g. `http://purl.org/dc/terms/`
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Namespace prefix as written in the source document, e.g. `dcterms`
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Value of the `xml:lang` attribute, if present
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ============================================================================
// Logical Fields
// ============================================================================

/// Logical Dublin Core field families with a fixed lookup chain.
///
/// Each family is looked up under `dcterms:<name>`, then `dc:<name>`, then the
/// bare `<name>`, followed by the family's legacy aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Creator,
    Contributor,
    Subject,
    Description,
    Publisher,
    Date,
    Type,
    Identifier,
    Language,
    Rights,
    Source,
    Relation,
}

/// Prefixes tried, in order, for every [`Field`]. The empty prefix is the
/// unqualified key.
const FIELD_PREFIXES: [&str; 3] = ["dcterms", "dc", ""];

impl Field {
    pub fn local_name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Creator => "creator",
            Field::Contributor => "contributor",
            Field::Subject => "subject",
            Field::Description => "description",
            Field::Publisher => "publisher",
            Field::Date => "date",
            Field::Type => "type",
            Field::Identifier => "identifier",
            Field::Language => "language",
            Field::Rights => "rights",
            Field::Source => "source",
            Field::Relation => "relation",
        }
    }

    /// Extra keys consulted after the standard prefixes.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Description => &["dcterms:abstract"],
            Field::Date => &["dcterms:issued"],
            Field::Rights => &["dcterms:license"],
            _ => &[],
        }
    }

    /// Every key for this field in lookup priority order.
    pub fn lookup_keys(self) -> Vec<String> {
        let local = self.local_name();
        FIELD_PREFIXES
            .iter()
            .map(|prefix| {
                if prefix.is_empty() {
                    local.to_string()
                } else {
                    format!("{prefix}:{local}")
                }
            })
            .chain(self.aliases().iter().map(|alias| alias.to_string()))
            .collect()
    }
}

// ============================================================================
// Metadata Container
// ============================================================================

/// Flat, multi-valued metadata store keyed by qualified name.
///
/// Keys keep the order in which they were first seen, and values under a key
/// keep document order. Nothing is deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, Vec<MetadataValue>)>,
    /// Key -> position in `entries`
    index: HashMap<String, usize>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` under `key`.
    pub fn add(&mut self, key: impl Into<String>, value: MetadataValue) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1.push(value),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, vec![value]));
            }
        }
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_values(key).first().map(MetadataValue::value)
    }

    /// First value stored under `key`, or `default` when there is none.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// All values under `key` as plain strings.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.get_values(key)
            .iter()
            .map(MetadataValue::value)
            .collect()
    }

    pub fn get_values(&self, key: &str) -> &[MetadataValue] {
        self.index
            .get(key)
            .map(|&pos| self.entries[pos].1.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Iterates `(key, values)` pairs in first-seen key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MetadataValue])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First value of the first key in the field's lookup chain that has one.
    pub fn first(&self, field: Field) -> Option<&str> {
        field
            .lookup_keys()
            .iter()
            .find_map(|key| self.get(key))
    }

    pub fn first_or<'a>(&'a self, field: Field, default: &'a str) -> &'a str {
        self.first(field).unwrap_or(default)
    }

    /// Values from every key in the field's lookup chain, in priority order.
    pub fn all(&self, field: Field) -> Vec<&str> {
        field
            .lookup_keys()
            .iter()
            .flat_map(|key| self.get_all(key))
            .collect()
    }

    /// Every key with all of its values.
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.entries
            .iter()
            .map(|(k, values)| {
                (
                    k.clone(),
                    values.iter().map(|v| v.value().to_string()).collect(),
                )
            })
            .collect()
    }

    /// Every key with only its first value.
    pub fn to_flat_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(k, values)| {
                values
                    .first()
                    .map(|v| (k.clone(), v.value().to_string()))
            })
            .collect()
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, values) in &self.entries {
            let plain: Vec<&str> = values.iter().map(MetadataValue::value).collect();
            map.serialize_entry(key, &plain)?;
        }
        map.end()
    }
}

// ============================================================================
// Records
// ============================================================================

/// Parsed record header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub identifier: String,
    pub datestamp: String,
    pub set_specs: Vec<String>,
    pub deleted: bool,
}

/// One harvested record: a header plus its flattened metadata.
///
/// A deleted record never carries metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(flatten)]
    header: HeaderInfo,
    metadata: Metadata,
    #[serde(skip)]
    raw_xml: Option<String>,
}

impl Record {
    /// Builds a record. Metadata passed for a deleted header is discarded.
    pub fn new(header: HeaderInfo, metadata: Metadata) -> Self {
        let metadata = if header.deleted {
            Metadata::new()
        } else {
            metadata
        };
        Self {
            header,
            metadata,
            raw_xml: None,
        }
    }

    /// A header-only record, as produced by `ListIdentifiers`.
    pub fn from_header(header: HeaderInfo) -> Self {
        Self::new(header, Metadata::new())
    }

    pub fn with_raw_xml(mut self, raw: impl Into<String>) -> Self {
        self.raw_xml = Some(raw.into());
        self
    }

    pub fn header(&self) -> &HeaderInfo {
        &self.header
    }

    pub fn identifier(&self) -> &str {
        &self.header.identifier
    }

    pub fn datestamp(&self) -> &str {
        &self.header.datestamp
    }

    pub fn set_specs(&self) -> &[String] {
        &self.header.set_specs
    }

    pub fn is_deleted(&self) -> bool {
        self.header.deleted
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Original XML of the `<record>` element when the parser preserved it.
    pub fn raw_xml(&self) -> Option<&str> {
        self.raw_xml.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.first(Field::Title)
    }

    pub fn titles(&self) -> Vec<&str> {
        self.metadata.all(Field::Title)
    }

    pub fn creators(&self) -> Vec<&str> {
        self.metadata.all(Field::Creator)
    }

    pub fn contributors(&self) -> Vec<&str> {
        self.metadata.all(Field::Contributor)
    }

    pub fn subjects(&self) -> Vec<&str> {
        self.metadata.all(Field::Subject)
    }

    /// First description, falling back to `dcterms:abstract`.
    pub fn description(&self) -> Option<&str> {
        self.metadata.first(Field::Description)
    }

    pub fn descriptions(&self) -> Vec<&str> {
        self.metadata.all(Field::Description)
    }

    pub fn publisher(&self) -> Option<&str> {
        self.metadata.first(Field::Publisher)
    }

    /// First date, falling back to `dcterms:issued`.
    pub fn date(&self) -> Option<&str> {
        self.metadata.first(Field::Date)
    }

    pub fn dates(&self) -> Vec<&str> {
        self.metadata.all(Field::Date)
    }

    pub fn types(&self) -> Vec<&str> {
        self.metadata.all(Field::Type)
    }

    /// DOIs, URIs, ISBNs and any other identifier values.
    pub fn identifiers(&self) -> Vec<&str> {
        self.metadata.all(Field::Identifier)
    }

    pub fn languages(&self) -> Vec<&str> {
        self.metadata.all(Field::Language)
    }

    pub fn rights(&self) -> Vec<&str> {
        self.metadata.all(Field::Rights)
    }

    pub fn sources(&self) -> Vec<&str> {
        self.metadata.all(Field::Source)
    }

    pub fn relations(&self) -> Vec<&str> {
        self.metadata.all(Field::Relation)
    }

    /// Identifier, datestamp and the first value of every metadata key.
    pub fn to_flat_map(&self) -> BTreeMap<String, String> {
        let mut flat = self.metadata.to_flat_map();
        flat.insert("identifier".to_string(), self.header.identifier.clone());
        flat.insert("datestamp".to_string(), self.header.datestamp.clone());
        flat
    }
}

// ============================================================================
// Pages
// ============================================================================

/// Pagination state carried by a list response.
///
/// `complete_list_size` and `cursor` are informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumptionInfo {
    pub token: Option<String>,
    pub complete_list_size: Option<u64>,
    pub cursor: Option<u64>,
}

impl ResumptionInfo {
    /// Trims the token and treats an empty one as absent.
    pub fn new(
        token: Option<String>,
        complete_list_size: Option<u64>,
        cursor: Option<u64>,
    ) -> Self {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self {
            token,
            complete_list_size,
            cursor,
        }
    }

    /// A page with no continuation, i.e. the last one.
    pub fn terminal() -> Self {
        Self::default()
    }

    pub fn has_more(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// One page of a list response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub resumption: ResumptionInfo,
}

/// A page of records from `ListRecords`, `ListIdentifiers` or `GetRecord`.
pub type RecordSet = ListPage<Record>;

impl<T> ListPage<T> {
    pub fn new(items: Vec<T>, resumption: ResumptionInfo) -> Self {
        Self { items, resumption }
    }

    /// True iff a non-empty resumption token is present.
    pub fn has_more(&self) -> bool {
        self.resumption.has_more()
    }

    pub fn resumption_token(&self) -> Option<&str> {
        self.resumption.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn complete_list_size(&self) -> Option<u64> {
        self.resumption.complete_list_size
    }

    pub fn cursor(&self) -> Option<u64> {
        self.resumption.cursor
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl ListPage<Record> {
    pub fn records(&self) -> &[Record] {
        &self.items
    }
}

impl<T> IntoIterator for ListPage<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a ListPage<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// ============================================================================
// Repository Descriptors
// ============================================================================

/// Repository description returned by `Identify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub repository_name: Option<String>,
    pub base_url: Option<String>,
    pub protocol_version: Option<String>,
    pub admin_emails: Vec<String>,
    pub earliest_datestamp: Option<String>,
    pub deleted_record: Option<String>,
    pub granularity: Option<String>,
}

/// A set advertised by `ListSets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetInfo {
    pub set_spec: String,
    pub set_name: Option<String>,
}

/// A metadata format advertised by `ListMetadataFormats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFormat {
    pub prefix: String,
    pub schema: Option<String>,
    pub namespace: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dc(prefix: &str, value: &str) -> MetadataValue {
        MetadataValue::new(value, None, Some(prefix.to_string()), None)
    }

    #[test]
    fn test_values_accumulate_in_document_order() {
        let mut metadata = Metadata::new();
        metadata.add("dc:creator", dc("dc", "Author One"));
        metadata.add("dc:title", dc("dc", "Title"));
        metadata.add("dc:creator", dc("dc", "Author Two"));
        metadata.add("dc:creator", dc("dc", "Author One"));

        assert_eq!(
            metadata.get_all("dc:creator"),
            vec!["Author One", "Author Two", "Author One"]
        );
        assert_eq!(metadata.keys().collect::<Vec<_>>(), vec!["dc:creator", "dc:title"]);
        assert_eq!(metadata.len(), 2);
    }

    #[test]
    fn test_interleaved_keys_keep_first_seen_order() {
        let mut metadata = Metadata::new();
        for i in 0..100 {
            metadata.add(format!("k{}", i % 10), MetadataValue::plain(format!("v{i}")));
        }

        assert_eq!(metadata.len(), 10);
        assert_eq!(metadata.keys().collect::<Vec<_>>()[..3], ["k0", "k1", "k2"]);
        assert_eq!(metadata.get_values("k3").len(), 10);
        assert_eq!(metadata.get_all("k3")[..2], ["v3", "v13"]);
        assert!(metadata.contains_key("k9"));
        assert!(!metadata.contains_key("k10"));
    }

    #[test]
    fn test_get_or_falls_back_to_default() {
        let metadata = Metadata::new();
        assert_eq!(metadata.get("dc:title"), None);
        assert_eq!(metadata.get_or("dc:title", "untitled"), "untitled");
        assert!(metadata.get_values("dc:title").is_empty());
    }

    #[test]
    fn test_dcterms_wins_over_dc_for_singular_access() {
        let mut metadata = Metadata::new();
        metadata.add("dc:title", dc("dc", "A"));
        metadata.add("dcterms:title", dc("dcterms", "B"));

        assert_eq!(metadata.first(Field::Title), Some("B"));
        assert_eq!(metadata.all(Field::Title), vec!["B", "A"]);
    }

    #[test]
    fn test_plural_access_includes_unprefixed_and_aliases() {
        let mut metadata = Metadata::new();
        metadata.add("dcterms:abstract", dc("dcterms", "Abstract"));
        metadata.add("description", MetadataValue::plain("Bare"));
        metadata.add("dc:description", dc("dc", "Prefixed"));
        metadata.add("dc:description", dc("dc", "Prefixed"));

        assert_eq!(
            metadata.all(Field::Description),
            vec!["Prefixed", "Prefixed", "Bare", "Abstract"]
        );
        assert_eq!(metadata.first(Field::Description), Some("Prefixed"));
    }

    #[test]
    fn test_alias_used_only_when_standard_keys_missing() {
        let mut metadata = Metadata::new();
        metadata.add("dcterms:issued", dc("dcterms", "2020-01-01"));
        assert_eq!(metadata.first(Field::Date), Some("2020-01-01"));

        metadata.add("date", MetadataValue::plain("2019"));
        assert_eq!(metadata.first(Field::Date), Some("2019"));
        assert_eq!(metadata.first_or(Field::Publisher, "unknown"), "unknown");
    }

    #[test]
    fn test_deleted_record_drops_metadata() {
        let mut metadata = Metadata::new();
        metadata.add("dc:title", dc("dc", "Ghost"));
        let header = HeaderInfo {
            identifier: "oai:x:1".to_string(),
            datestamp: "2024-01-01".to_string(),
            set_specs: vec![],
            deleted: true,
        };

        let record = Record::new(header, metadata);
        assert!(record.is_deleted());
        assert!(record.metadata().is_empty());
        assert_eq!(record.title(), None);
    }

    #[test]
    fn test_record_accessors_delegate_to_metadata() {
        let mut metadata = Metadata::new();
        metadata.add("dc:creator", dc("dc", "Ada"));
        metadata.add("dcterms:license", dc("dcterms", "CC-BY"));
        metadata.add("dc:rights", dc("dc", "Open"));
        let record = Record::new(
            HeaderInfo {
                identifier: "oai:x:2".to_string(),
                ..HeaderInfo::default()
            },
            metadata,
        );

        assert_eq!(record.creators(), vec!["Ada"]);
        assert_eq!(record.rights(), vec!["Open", "CC-BY"]);
        assert_eq!(record.title(), None);

        let flat = record.to_flat_map();
        assert_eq!(flat.get("identifier").map(String::as_str), Some("oai:x:2"));
        assert_eq!(flat.get("dc:creator").map(String::as_str), Some("Ada"));
    }

    #[test]
    fn test_resumption_token_normalization() {
        assert!(!ResumptionInfo::new(Some("   ".to_string()), None, None).has_more());
        assert!(!ResumptionInfo::new(None, Some(10), Some(0)).has_more());

        let info = ResumptionInfo::new(Some(" T1 \n".to_string()), Some(3), Some(0));
        assert!(info.has_more());
        assert_eq!(info.token.as_deref(), Some("T1"));

        let page: RecordSet = ListPage::new(vec![], ResumptionInfo::terminal());
        assert!(!page.has_more());
        assert!(page.is_empty());
    }

    #[test]
    fn test_record_serialization_flattens_header() {
        let mut metadata = Metadata::new();
        metadata.add("dc:title", dc("dc", "T"));
        let record = Record::new(
            HeaderInfo {
                identifier: "oai:x:3".to_string(),
                datestamp: "2024-02-02".to_string(),
                set_specs: vec!["col_1".to_string()],
                deleted: false,
            },
            metadata,
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["identifier"], "oai:x:3");
        assert_eq!(json["set_specs"][0], "col_1");
        assert_eq!(json["deleted"], false);
        assert_eq!(json["metadata"]["dc:title"][0], "T");
    }
}
