//! Проход по строкам листа: классификация и сбор наименований

use std::collections::BTreeSet;

use okpd_common::{ColumnMap, Item, RowClass, RowFilter};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::OkpdError;
use crate::workbook::{Cell, Sheet};

/// Счётчики строк по классам
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub header: usize,
    pub empty: usize,
    pub noise: usize,
    pub data: usize,
    pub read_errors: usize,
}

impl RowCounts {
    pub fn add(&mut self, other: &RowCounts) {
        self.header += other.header;
        self.empty += other.empty;
        self.noise += other.noise;
        self.data += other.data;
        self.read_errors += other.read_errors;
    }
}

/// Результат прохода по листу
#[derive(Debug, Clone)]
pub struct SheetScan {
    pub sheet_index: usize,
    pub sheet_name: String,
    pub columns: ColumnMap,
    pub items: Vec<Item>,
    /// Строки, которые никогда не получают результат (заголовок, шум, ошибки чтения)
    pub excluded_rows: BTreeSet<u32>,
    pub counts: RowCounts,
}

/// Смещение строки листа: строка 2 имеет смещение 0
pub fn row_offset(row: u32) -> Option<usize> {
    row.checked_sub(2).map(|o| o as usize)
}

fn read_item_cell(sheet: &Sheet, row: u32, col: u32) -> Result<Option<String>, OkpdError> {
    match sheet.cell(row, col) {
        Some(Cell::Error(code)) => Err(OkpdError::RowRead {
            sheet: sheet.name().to_string(),
            row,
            reason: format!("ошибка в ячейке: {}", code),
        }),
        // вычисляемое наименование не сопоставить с текстом при записи
        Some(Cell::Formula(_)) => Ok(None),
        Some(cell) => Ok(cell.display()),
        None => Ok(None),
    }
}

/// Классифицирует строки листа и собирает наименования
pub fn scan_sheet(sheet: &Sheet, sheet_index: usize, columns: ColumnMap, filter: &RowFilter) -> SheetScan {
    let mut items = Vec::new();
    let mut excluded_rows = BTreeSet::new();
    let mut counts = RowCounts::default();

    for row in 1..=sheet.max_row() {
        let value = match read_item_cell(sheet, row, columns.item_column) {
            Ok(value) => value,
            Err(e) => {
                warn!("{}", e);
                counts.read_errors += 1;
                excluded_rows.insert(row);
                continue;
            }
        };

        let class = match row_offset(row) {
            None => RowClass::Header,
            Some(_) if row <= columns.header_row => RowClass::Header,
            Some(offset) => {
                let doc = columns.doc_column.and_then(|col| sheet.text(row, col));
                filter.classify_with_doc(offset, value.as_deref(), doc.as_deref())
            }
        };

        match class {
            RowClass::Header => {
                counts.header += 1;
                excluded_rows.insert(row);
            }
            RowClass::Empty => counts.empty += 1,
            RowClass::Noise(reason) => {
                debug!("'{}' строка {}: шум ({:?})", sheet.name(), row, reason);
                counts.noise += 1;
                excluded_rows.insert(row);
            }
            RowClass::Data => {
                counts.data += 1;
                if let Some(text) = value {
                    items.push(Item::new(sheet.name(), row, text.trim()));
                }
            }
        }
    }

    info!(
        "Лист '{}': данных {}, шум {}, пустых {}, заголовок {}, ошибок {}",
        sheet.name(),
        counts.data,
        counts.noise,
        counts.empty,
        counts.header,
        counts.read_errors
    );

    SheetScan {
        sheet_index,
        sheet_name: sheet.name().to_string(),
        columns,
        items,
        excluded_rows,
        counts,
    }
}
