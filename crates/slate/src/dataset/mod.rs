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

use thiserror::Error;

pub mod column;
pub mod frame;
pub mod import;

pub use column::{Column, ColumnBuilder, DataType};
pub use frame::{Frame, FrameMeta};
pub use import::{import_csv_path, import_csv_reader};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Row index out of bounds: {0}")]
    OutOfBounds(usize),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, DatasetError>;
