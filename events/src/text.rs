//! The legacy tab-separated event format
//!
//! One header line of parameter names, then one line per event of single-precision
//! values. Blank lines are skipped.

use crate::datatype::NumericWidth;
use crate::error::{EventError, Result};
use crate::table::{EventTable, ParameterInfo};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// An extra 0/1 column appended on export, typically one gate's inclusion flags
#[derive(Debug, Clone, Copy)]
pub struct FlagColumn<'a> {
    pub name: &'a str,
    pub flags: &'a [u8],
}

/// Parses tab-separated event text into a single-precision table
/// # Errors
/// Will return `Err` if the header is missing or repeats a name, a line has the wrong
/// number of fields, or a value is not a number
pub fn parse_text_events(text: &str) -> Result<EventTable> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty());

    let (header_line, header) = lines
        .next()
        .ok_or_else(|| EventError::parse(1, "missing header line"))?;
    let names: Vec<&str> = header.split('\t').map(str::trim).collect();
    if let Some(position) = names.iter().position(|name| name.is_empty()) {
        return Err(EventError::parse(
            header_line,
            format!("empty parameter name in column {}", position + 1),
        ));
    }

    let capacity = bytecount::count(text.as_bytes(), b'\n');
    let mut columns: Vec<Vec<f32>> = names.iter().map(|_| Vec::with_capacity(capacity)).collect();

    for (line_number, line) in lines {
        let mut fields = 0;
        for (column, field) in line.split('\t').enumerate() {
            if column >= names.len() {
                fields = column + 1;
                break;
            }
            let value: f32 = field.trim().parse().map_err(|_| {
                EventError::parse(line_number, format!("invalid number '{}' in column {}", field.trim(), column + 1))
            })?;
            columns[column].push(value);
            fields = column + 1;
        }
        if fields != names.len() {
            return Err(EventError::parse(
                line_number,
                format!("expected {} fields, found {}", names.len(), line.split('\t').count()),
            ));
        }
    }

    let table = EventTable::from_parts(
        names.into_iter().map(ParameterInfo::new).collect(),
        crate::EventColumns::Float(columns),
    )?;
    debug!(
        "Parsed {} events over {} parameters",
        table.number_of_events(),
        table.number_of_parameters()
    );
    Ok(table)
}

/// Reads tab-separated event text from any reader
/// # Errors
/// Will return `Err` on I/O failure or if the text cannot be parsed
pub fn read_text_events<R: Read>(mut reader: R) -> Result<EventTable> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_text_events(&text)
}

/// Reads a tab-separated event file
/// # Errors
/// Will return `Err` on I/O failure or if the file cannot be parsed
pub fn read_text_events_from_path(path: impl AsRef<Path>) -> Result<EventTable> {
    let path = path.as_ref();
    info!("Reading events from {}", path.display());
    read_text_events(File::open(path)?)
}

/// Writes a table as tab-separated single-precision text, followed by any flag columns
/// # Errors
/// Will return `Err` on I/O failure or if a flag column has the wrong length
pub fn write_text_events<W: Write>(writer: W, table: &EventTable, flag_columns: &[FlagColumn<'_>]) -> Result<()> {
    let events = table.number_of_events();
    for column in flag_columns {
        if column.flags.len() != events {
            return Err(EventError::LengthMismatch {
                parameter: column.name.to_string(),
                expected: events,
                actual: column.flags.len(),
            });
        }
    }

    let mut out = BufWriter::new(writer);
    let header: Vec<&str> = table
        .parameter_names()
        .chain(flag_columns.iter().map(|c| c.name))
        .collect();
    writeln!(out, "{}", header.join("\t"))?;

    let narrowed: Vec<Vec<f32>> = match table.width() {
        NumericWidth::Float => table.typed_columns::<f32>().map(<[Vec<f32>]>::to_vec).unwrap_or_default(),
        NumericWidth::Double => table
            .typed_columns::<f64>()
            .unwrap_or_default()
            .iter()
            .map(|column| column.iter().map(|v| *v as f32).collect())
            .collect(),
    };

    let mut row = String::new();
    for event in 0..events {
        row.clear();
        for (index, column) in narrowed.iter().enumerate() {
            if index > 0 {
                row.push('\t');
            }
            row.push_str(&column[event].to_string());
        }
        for (index, column) in flag_columns.iter().enumerate() {
            if index > 0 || !narrowed.is_empty() {
                row.push('\t');
            }
            row.push(if column.flags[event] != 0 { '1' } else { '0' });
        }
        writeln!(out, "{row}")?;
    }
    out.flush()?;
    Ok(())
}

/// Writes a tab-separated event file
/// # Errors
/// Will return `Err` on I/O failure or if a flag column has the wrong length
pub fn write_text_events_to_path(
    path: impl AsRef<Path>,
    table: &EventTable,
    flag_columns: &[FlagColumn<'_>],
) -> Result<()> {
    let path = path.as_ref();
    info!("Writing {} events to {}", table.number_of_events(), path.display());
    write_text_events(File::create(path)?, table, flag_columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_blank_lines() {
        let text = "FSC-A\tSSC-A\n1\t2.5\n\n3\t-4\n";
        let table = parse_text_events(text).unwrap();
        assert_eq!(table.number_of_events(), 2);
        assert_eq!(table.column::<f32>(1).unwrap(), &[2.5, -4.0]);
        assert_eq!(table.width(), NumericWidth::Float);
    }

    #[test]
    fn test_parse_reports_line_numbers() {
        let err = parse_text_events("A\tB\n1\t2\n3\n").unwrap_err();
        assert!(matches!(err, EventError::Parse { line: 3, .. }));

        let err = parse_text_events("A\tB\n1\tx\n").unwrap_err();
        assert!(matches!(err, EventError::Parse { line: 2, .. }));

        let err = parse_text_events("A\tB\n1\t2\t3\n").unwrap_err();
        assert!(matches!(err, EventError::Parse { line: 2, .. }));

        assert!(parse_text_events("\n\n").is_err());
    }

    #[test]
    fn test_write_appends_flag_columns() {
        let table = EventTable::from_columns(["X"], vec![vec![0.5f64, 2.0]]).unwrap();
        let flags = [1u8, 0];
        let mut buffer = Vec::<u8>::new();
        write_text_events(&mut buffer, &table, &[FlagColumn { name: "Lymphocytes", flags: &flags }]).unwrap();
        let written = String::from_utf8(buffer).unwrap();
        assert_eq!(written, "X\tLymphocytes\n0.5\t1\n2\t0\n");
    }

    #[test]
    fn test_write_rejects_short_flag_column() {
        let table = EventTable::from_columns(["X"], vec![vec![1.0f32, 2.0]]).unwrap();
        let result = write_text_events(Vec::<u8>::new(), &table, &[FlagColumn { name: "G", flags: &[1] }]);
        assert!(matches!(result, Err(EventError::LengthMismatch { .. })));
    }
}
