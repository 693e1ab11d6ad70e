// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::dataset::column::ColumnBuilder;
use crate::dataset::frame::Frame;
use crate::dataset::{DatasetError, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Column names may carry embedded control characters from spreadsheet
/// exports; they would corrupt digests and reply markers downstream.
fn sanitise_column_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn import_csv_path(path: &Path, name: &str) -> Result<Frame> {
    let file = File::open(path)?;
    import_csv_reader(file, name)
}

pub fn import_csv_reader<R: Read>(reader: R, name: &str) -> Result<Frame> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(sanitise_column_name)
        .collect();
    if headers.is_empty() {
        return Err(DatasetError::InvalidOperation(
            "dataset has no columns".to_string(),
        ));
    }

    let mut builders: Vec<ColumnBuilder> = headers.iter().map(|_| ColumnBuilder::new()).collect();
    let mut row_count = 0usize;
    for record in csv_reader.records() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(DatasetError::Parse(format!(
                "row {}: expected {} fields, got {}",
                row_count + 1,
                headers.len(),
                record.len()
            )));
        }
        for (builder, field) in builders.iter_mut().zip(record.iter()) {
            builder.push(field);
        }
        row_count += 1;
    }

    let mut frame = Frame::new(name);
    for (header, builder) in headers.into_iter().zip(builders) {
        frame.add_column(header, builder.build()?)?;
    }
    info!(
        rows = row_count,
        columns = frame.column_count(),
        dataset = name,
        "Imported dataset snapshot"
    );
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataType;
    use std::io::Write;

    const CSV: &str = "date,region,amount\n2024-01-03,North,120.5\n2024-01-04,South,80\n";

    #[test]
    fn imports_typed_columns() {
        let frame = import_csv_reader(CSV.as_bytes(), "sales").unwrap();
        assert_eq!(frame.row_count(), 2);
        assert_eq!(
            frame.get_column("amount").unwrap().data_type(),
            DataType::Float64
        );
        assert_eq!(
            frame.get_column("region").unwrap().data_type(),
            DataType::String
        );
    }

    #[test]
    fn strips_control_characters_from_headers() {
        let csv = "\"reg\tion\",\"amo\runt\"\na,1\n";
        let frame = import_csv_reader(csv.as_bytes(), "noisy").unwrap();
        assert_eq!(frame.column_names(), ["region", "amount"]);
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();
        let frame = import_csv_path(file.path(), "sales").unwrap();
        assert_eq!(frame.column_count(), 3);
    }

    #[test]
    fn rejects_ragged_rows() {
        let csv = "a,b\n1\n";
        assert!(import_csv_reader(csv.as_bytes(), "ragged").is_err());
    }
}
