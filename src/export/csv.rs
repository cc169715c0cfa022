//! Flat CSV rendering of harvested records.

use crate::model::Record;

pub const CSV_HEADER: [&str; 6] = [
    "identifier",
    "datestamp",
    "title",
    "creators",
    "date",
    "description",
];

/// Quotes a field when it holds a comma, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn row(record: &Record) -> String {
    let creators = record.creators().join("; ");
    let cells = [
        record.identifier(),
        record.datestamp(),
        record.title().unwrap_or_default(),
        creators.as_str(),
        record.date().unwrap_or_default(),
        record.description().unwrap_or_default(),
    ];
    cells.iter().map(|c| escape(c)).collect::<Vec<_>>().join(",")
}

/// Header line plus one line per record, `\n`-terminated.
pub fn to_csv(records: &[Record]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for record in records {
        out.push_str(&row(record));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HeaderInfo, Metadata, MetadataValue};

    fn record(metadata: &[(&str, &str)]) -> Record {
        let mut md = Metadata::new();
        for (key, value) in metadata {
            md.add(*key, MetadataValue::plain(*value));
        }
        Record::new(
            HeaderInfo {
                identifier: "oai:x:1".to_string(),
                datestamp: "2024-02-01".to_string(),
                ..HeaderInfo::default()
            },
            md,
        )
    }

    #[test]
    fn test_plain_row() {
        let csv = to_csv(&[record(&[("dc:title", "Plain"), ("dc:date", "2020")])]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "identifier,datestamp,title,creators,date,description");
        assert_eq!(lines[1], "oai:x:1,2024-02-01,Plain,,2020,");
    }

    #[test]
    fn test_quoting_and_creator_join() {
        let csv = to_csv(&[record(&[
            ("dc:title", "Say \"hi\", world"),
            ("dc:creator", "Lovelace, Ada"),
            ("dc:creator", "Babbage"),
            ("dc:description", "line one\nline two"),
        ])]);

        assert!(csv.contains(r#""Say ""hi"", world""#));
        assert!(csv.contains(r#""Lovelace, Ada; Babbage""#));
        assert!(csv.contains("\"line one\nline two\""));
    }

    #[test]
    fn test_empty_input_is_header_only() {
        assert_eq!(to_csv(&[]), "identifier,datestamp,title,creators,date,description\n");
    }
}
