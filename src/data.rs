//! Stimulus data for `exec_on_data`. Rows arrive as JSON: values are
//! numbers or radix-prefixed strings, and output pins may carry
//! `{"expected": …}` assertions.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Deserialize;

use crate::bits::{self, Radix, Word};
use crate::error::{ErrorKind, HdlError};
use crate::pin::{PinSpec, Row};

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonLiteral {
    Num(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonEntry {
    Assert { expected: JsonLiteral },
    Plain(JsonLiteral),
}

/// One stimulus cell: an input value to drive, or an output value to
/// check after evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowEntry {
    Value(Word),
    Expected(Word),
}

pub type DataRow = BTreeMap<String, RowEntry>;

fn literal_to_word(lit: &JsonLiteral) -> Result<Word, HdlError> {
    match lit {
        JsonLiteral::Num(n) => {
            if (-32768..=65535).contains(n) {
                Ok(*n as Word)
            } else {
                Err(HdlError {
                    msg: format!("Numeric literal {} does not fit in 16 bits.", n),
                    kind: ErrorKind::InvalidLiteral,
                })
            }
        }
        JsonLiteral::Text(s) => bits::parse_literal(s),
    }
}

/// Parses a JSON array of stimulus rows.
pub fn parse_rows(json: &str) -> Result<Vec<DataRow>, HdlError> {
    let raw: Vec<BTreeMap<String, JsonEntry>> =
        serde_json::from_str(json).map_err(|e| HdlError {
            msg: format!("Unable to parse stimulus rows: {}", e),
            kind: ErrorKind::InvalidLiteral,
        })?;

    raw.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(name, entry)| {
                    let converted = match entry {
                        JsonEntry::Plain(lit) => RowEntry::Value(literal_to_word(&lit)?),
                        JsonEntry::Assert { expected } => {
                            RowEntry::Expected(literal_to_word(&expected)?)
                        }
                    };
                    Ok((name, converted))
                })
                .collect()
        })
        .collect()
}

fn column_width(pin: &PinSpec, radix: Radix) -> usize {
    let value_width = match radix {
        Radix::Bin => pin.size,
        Radix::Hex => 4,
        Radix::Dec => 6,
    };
    pin.name.len().max(value_width)
}

/// Renders a truth table as plain text, one column per pin in the
/// given order. Color and paging belong to the CLI, not here.
pub fn render_table(pins: &[PinSpec], rows: &[Row], radix: Radix) -> String {
    let widths: Vec<usize> = pins.iter().map(|p| column_width(p, radix)).collect();

    let mut s = String::new();
    write!(s, "|").unwrap();
    for (pin, w) in pins.iter().zip(&widths) {
        write!(s, " {:>width$} |", pin.name, width = w).unwrap();
    }
    writeln!(s).unwrap();

    for row in rows {
        write!(s, "|").unwrap();
        for (pin, w) in pins.iter().zip(&widths) {
            let value = row.get(&pin.name).copied().unwrap_or(0);
            let formatted = bits::format_word(value, radix, pin.size);
            write!(s, " {:>width$} |", formatted, width = w).unwrap();
        }
        writeln!(s).unwrap();
    }
    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_rows_numbers_and_strings() {
        let rows = parse_rows(r#"[{"a": 1, "b": "0b10", "c": "%XFF", "d": -1}]"#).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["a"], RowEntry::Value(1));
        assert_eq!(rows[0]["b"], RowEntry::Value(2));
        assert_eq!(rows[0]["c"], RowEntry::Value(0xFF));
        assert_eq!(rows[0]["d"], RowEntry::Value(0xFFFF));
    }

    #[test]
    fn test_parse_rows_expected_entries() {
        let rows = parse_rows(r#"[{"a": 1, "out": {"expected": "0b1"}}]"#).unwrap();
        assert_eq!(rows[0]["out"], RowEntry::Expected(1));
    }

    #[test]
    fn test_parse_rows_rejects_bad_literals() {
        let e = parse_rows(r#"[{"a": 70000}]"#).unwrap_err();
        assert!(matches!(e.kind, ErrorKind::InvalidLiteral));
        assert!(parse_rows(r#"[{"a": "zebra"}]"#).is_err());
        assert!(parse_rows("not json").is_err());
    }

    #[test]
    fn test_render_table() {
        let pins = vec![
            PinSpec::bit("a"),
            PinSpec::bit("b"),
            PinSpec::new("out", 16),
        ];
        let mut row = Row::new();
        row.insert(String::from("a"), 1);
        row.insert(String::from("b"), 0);
        row.insert(String::from("out"), 0xBEEF);

        let hex = render_table(&pins, &[row.clone()], Radix::Hex);
        let lines: Vec<&str> = hex.lines().collect();
        assert_eq!(lines[0], "|    a |    b |  out |");
        // Hex cells are always four zero-padded digits.
        assert_eq!(lines[1], "| 0001 | 0000 | BEEF |");

        let bin = render_table(&pins, &[row], Radix::Bin);
        assert!(bin.contains("1011111011101111"));
    }
}
