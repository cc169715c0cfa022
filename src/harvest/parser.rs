//! Schema-agnostic OAI-PMH response parser.
//!
//! A response body is read once into a lightweight element tree (namespace
//! URI, prefix, local name, attributes, leading text, children and the byte
//! span of the element in the source). Protocol envelopes are then located by
//! OAI namespace + local name, while record metadata is flattened without any
//! knowledge of the schema in use:
//!
//! - an element with non-empty text and no child elements is a *value leaf*
//!   and becomes one [`MetadataValue`] under its qualified key;
//! - an element with children is only traversed. Any text it holds next to
//!   those children is dropped.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::ops::Range;

use crate::harvest::traits::{HarvestError, ProtocolError, ResponseError};
use crate::model::{
    HeaderInfo, Identify, ListPage, Metadata, MetadataFormat, MetadataValue, Record, RecordSet,
    ResumptionInfo, SetInfo,
};

/// OAI-PMH 2.0 envelope namespace.
pub const OAI_NS: &str = "http://www.openarchives.org/OAI/2.0/";

const XML_LANG: &str = "xml:lang";

// ============================================================================
// Element Tree
// ============================================================================

#[derive(Debug, Clone, Default)]
struct XmlNode {
    namespace: Option<String>,
    prefix: Option<String>,
    local_name: String,
    attributes: Vec<(String, String)>,
    /// Text before the first child element
    text: String,
    children: Vec<XmlNode>,
    span: Range<usize>,
}

impl XmlNode {
    fn is_oai(&self, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(OAI_NS)
    }

    /// `prefix:local` or bare `local`.
    fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, local_name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.is_oai(local_name))
    }

    fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.is_oai(local_name))
    }

    /// Trimmed text of the first matching child, if any.
    fn child_text(&self, local_name: &str) -> Option<String> {
        self.child(local_name).map(|c| c.text.trim().to_string())
    }

    /// Depth-first, document-order search over all descendants.
    fn descendants_named<'a>(&'a self, local_name: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.is_oai(local_name) {
                out.push(child);
            }
            child.descendants_named(local_name, out);
        }
    }

    fn first_descendant(&self, local_name: &str) -> Option<&XmlNode> {
        let mut found = Vec::new();
        self.descendants_named(local_name, &mut found);
        found.into_iter().next()
    }
}

fn malformed(e: impl std::fmt::Display) -> HarvestError {
    ResponseError::Malformed(e.to_string()).into()
}

fn utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn open_node(
    resolved: ResolveResult<'_>,
    start: &BytesStart<'_>,
    begin: usize,
) -> Result<XmlNode, HarvestError> {
    let namespace = match resolved {
        ResolveResult::Bound(ns) => Some(utf8(ns.as_ref())),
        ResolveResult::Unbound => None,
        ResolveResult::Unknown(prefix) => {
            return Err(malformed(format!(
                "undeclared namespace prefix '{}'",
                utf8(&prefix)
            )))
        }
    };

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let value = attr.unescape_value().map_err(malformed)?;
        attributes.push((utf8(attr.key.as_ref()), value.into_owned()));
    }

    Ok(XmlNode {
        namespace,
        prefix: start.name().prefix().map(|p| utf8(p.as_ref())),
        local_name: utf8(start.local_name().as_ref()),
        attributes,
        text: String::new(),
        children: Vec::new(),
        span: begin..begin,
    })
}

/// Reads a whole document into an element tree and returns its root.
fn read_tree(xml: &str) -> Result<XmlNode, HarvestError> {
    let mut reader = NsReader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let begin = reader.buffer_position() as usize;
        let (resolved, event) = reader.read_resolved_event().map_err(malformed)?;
        match event {
            Event::Start(start) => {
                stack.push(open_node(resolved, &start, begin)?);
            }
            Event::Empty(start) => {
                let mut node = open_node(resolved, &start, begin)?;
                node.span.end = reader.buffer_position() as usize;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let mut node = stack
                    .pop()
                    .ok_or_else(|| malformed("unexpected closing tag"))?;
                node.span.end = reader.buffer_position() as usize;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?;
                append_text(&mut stack, &text);
            }
            Event::CData(cdata) => {
                let text = utf8(&cdata.into_inner());
                append_text(&mut stack, &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document"));
    }
    root.ok_or_else(|| malformed("document has no root element"))
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), HarvestError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(malformed("multiple root elements")),
    }
    Ok(())
}

fn append_text(stack: &mut [XmlNode], text: &str) {
    if let Some(node) = stack.last_mut() {
        if node.children.is_empty() {
            node.text.push_str(text);
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parses OAI-PMH responses into typed results.
///
/// Every entry point checks for an in-body `<error>` marker before looking at
/// anything else.
#[derive(Debug, Clone, Default)]
pub struct OaiParser {
    preserve_raw: bool,
}

impl OaiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the original XML of each `<record>` on the parsed [`Record`].
    pub fn with_preserve_raw(mut self, preserve_raw: bool) -> Self {
        self.preserve_raw = preserve_raw;
        self
    }

    fn parse_document(&self, xml: &str) -> Result<XmlNode, HarvestError> {
        let root = read_tree(xml)?;
        check_protocol_error(&root)?;
        Ok(root)
    }

    /// Parses a `ListRecords` or `GetRecord` response.
    pub fn parse_records(&self, xml: &str) -> Result<RecordSet, HarvestError> {
        let root = self.parse_document(xml)?;

        let mut elements = Vec::new();
        root.descendants_named("record", &mut elements);

        let records = elements
            .into_iter()
            .filter_map(|element| self.parse_record(element, xml))
            .collect();

        Ok(ListPage::new(records, resumption_info(&root)))
    }

    /// Parses a `ListIdentifiers` response into header-only records.
    pub fn parse_identifiers(&self, xml: &str) -> Result<RecordSet, HarvestError> {
        let root = self.parse_document(xml)?;

        let mut headers = Vec::new();
        root.descendants_named("header", &mut headers);

        let records = headers
            .into_iter()
            .map(|header| Record::from_header(parse_header(header)))
            .collect();

        Ok(ListPage::new(records, resumption_info(&root)))
    }

    pub fn parse_identify(&self, xml: &str) -> Result<Identify, HarvestError> {
        let root = self.parse_document(xml)?;
        let identify = root
            .child("Identify")
            .ok_or(ResponseError::MissingElement("Identify"))?;

        Ok(Identify {
            repository_name: identify.child_text("repositoryName"),
            base_url: identify.child_text("baseURL"),
            protocol_version: identify.child_text("protocolVersion"),
            admin_emails: identify
                .children_named("adminEmail")
                .map(|e| e.text.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
            earliest_datestamp: identify.child_text("earliestDatestamp"),
            deleted_record: identify.child_text("deletedRecord"),
            granularity: identify.child_text("granularity"),
        })
    }

    pub fn parse_sets(&self, xml: &str) -> Result<ListPage<SetInfo>, HarvestError> {
        let root = self.parse_document(xml)?;
        let list = root
            .child("ListSets")
            .ok_or(ResponseError::MissingElement("ListSets"))?;

        let sets = list
            .children_named("set")
            .map(|set| SetInfo {
                set_spec: set.child_text("setSpec").unwrap_or_default(),
                set_name: set.child_text("setName"),
            })
            .collect();

        Ok(ListPage::new(sets, resumption_info(&root)))
    }

    pub fn parse_metadata_formats(
        &self,
        xml: &str,
    ) -> Result<ListPage<MetadataFormat>, HarvestError> {
        let root = self.parse_document(xml)?;
        let list = root
            .child("ListMetadataFormats")
            .ok_or(ResponseError::MissingElement("ListMetadataFormats"))?;

        let formats = list
            .children_named("metadataFormat")
            .map(|format| MetadataFormat {
                prefix: format.child_text("metadataPrefix").unwrap_or_default(),
                schema: format.child_text("schema"),
                namespace: format.child_text("metadataNamespace"),
            })
            .collect();

        Ok(ListPage::new(formats, resumption_info(&root)))
    }

    /// Records without a header are skipped.
    fn parse_record(&self, element: &XmlNode, source: &str) -> Option<Record> {
        let header = parse_header(element.child("header")?);

        let mut metadata = Metadata::new();
        if !header.deleted {
            if let Some(container) = element.child("metadata") {
                flatten(container, &mut metadata);
            }
        }

        let record = Record::new(header, metadata);
        if self.preserve_raw {
            if let Some(raw) = source.get(element.span.clone()) {
                return Some(record.with_raw_xml(raw));
            }
        }
        Some(record)
    }
}

/// Raises the first top-level `<error>` element as a [`ProtocolError`].
fn check_protocol_error(root: &XmlNode) -> Result<(), ProtocolError> {
    match root.child("error") {
        Some(error) => {
            let code = error.attr("code").unwrap_or("unknown");
            Err(ProtocolError::from_code(code, error.text.trim()))
        }
        None => Ok(()),
    }
}

fn parse_header(header: &XmlNode) -> HeaderInfo {
    HeaderInfo {
        identifier: header.child_text("identifier").unwrap_or_default(),
        datestamp: header.child_text("datestamp").unwrap_or_default(),
        set_specs: header
            .children_named("setSpec")
            .map(|s| s.text.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        deleted: header.attr("status") == Some("deleted"),
    }
}

fn resumption_info(root: &XmlNode) -> ResumptionInfo {
    match root.first_descendant("resumptionToken") {
        Some(token) => ResumptionInfo::new(
            Some(token.text.clone()),
            token
                .attr("completeListSize")
                .and_then(|v| v.trim().parse().ok()),
            token.attr("cursor").and_then(|v| v.trim().parse().ok()),
        ),
        None => ResumptionInfo::terminal(),
    }
}

/// Depth-first flattening of a metadata subtree into `metadata`.
fn flatten(node: &XmlNode, metadata: &mut Metadata) {
    for child in &node.children {
        if child.children.is_empty() {
            let text = child.text.trim();
            if !text.is_empty() {
                let value = MetadataValue::new(
                    text,
                    child.namespace.clone(),
                    child.prefix.clone(),
                    child.attr(XML_LANG).map(str::to_string),
                );
                metadata.add(child.qualified_name(), value);
            }
        } else {
            flatten(child, metadata);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
