//! Поиск колонок листа: наименование, код ОКПД2, первичный документ
//!
//! Сначала по тексту заголовков в окне 15×20, затем по плотности
//! длинных текстов в первых колонках.

use okpd_common::ColumnMap;
use tracing::{debug, info, warn};

use crate::error::{OkpdError, Result};
use crate::workbook::{Cell, Sheet, Workbook};

/// Заголовок, который ставится в созданную колонку кода
pub const CODE_HEADER: &str = "Код ОКП/ОКПД2";

const HEADER_WINDOW_ROWS: u32 = 15;
const HEADER_WINDOW_COLS: u32 = 20;
const PROBE_COLUMNS: u32 = 4;
const PROBE_ROWS: u32 = 9;
const DENSITY_COLS: u32 = 10;
const DENSITY_ROWS: u32 = 20;
const DENSITY_MIN_LEN: usize = 5;
const DENSITY_MIN_HITS: usize = 3;

/// Что нашлось в заголовках
#[derive(Debug, Default, Clone, Copy)]
struct HeaderHits {
    item: Option<(u32, u32)>,
    code: Option<u32>,
    doc: Option<u32>,
}

fn is_item_header(text: &str) -> bool {
    text.contains("наименов")
}

fn is_code_header(text: &str) -> bool {
    text.contains("код") && text.contains("окп")
}

fn is_doc_header(text: &str) -> bool {
    (text.contains("первич") && text.contains("докум")) || text.contains("договор")
}

fn scan_headers(sheet: &Sheet) -> HeaderHits {
    let mut hits = HeaderHits::default();
    let max_row = sheet.max_row().min(HEADER_WINDOW_ROWS);
    let max_col = sheet.max_column().min(HEADER_WINDOW_COLS);

    for row in 1..=max_row {
        for col in 1..=max_col {
            let Some(text) = sheet.text(row, col) else {
                continue;
            };
            let lower = text.to_lowercase();
            if is_item_header(&lower) {
                hits.item = Some((row, col));
            }
            if is_code_header(&lower) {
                hits.code = Some(col);
            }
            if hits.doc.is_none() && is_doc_header(&lower) {
                hits.doc = Some(col);
            }
            if hits.item.is_some() && hits.code.is_some() {
                return hits;
            }
        }
    }
    hits
}

/// Первая из следующих колонок, пустая во всех пробных строках
fn probe_empty_column(sheet: &Sheet, item_column: u32, header_rows: u32) -> Option<u32> {
    let first_row = header_rows + 1;
    let last_row = header_rows + PROBE_ROWS;
    (item_column + 1..=item_column + PROBE_COLUMNS)
        .find(|&col| (first_row..=last_row).all(|row| sheet.is_blank(row, col)))
}

/// Колонка с наибольшим числом длинных текстов; при равенстве левая
fn density_column(sheet: &Sheet) -> Option<u32> {
    let max_col = sheet.max_column().min(DENSITY_COLS);
    let max_row = sheet.max_row().min(DENSITY_ROWS);

    let mut best: Option<(u32, usize)> = None;
    for col in 1..=max_col {
        let hits = (1..=max_row)
            .filter(|&row| match sheet.cell(row, col) {
                Some(Cell::Text(text)) => text.trim().chars().count() > DENSITY_MIN_LEN,
                _ => false,
            })
            .count();
        if best.map_or(true, |(_, best_hits)| hits > best_hits) {
            best = Some((col, hits));
        }
    }

    best.filter(|(_, hits)| *hits >= DENSITY_MIN_HITS).map(|(col, _)| col)
}

/// Определяет колонки листа без изменения книги
pub fn detect(sheet: &Sheet, header_rows_to_skip: usize) -> Result<ColumnMap> {
    let hits = scan_headers(sheet);
    let header_rows = header_rows_to_skip as u32;

    if let Some((header_row, item_column)) = hits.item {
        if let Some(code_column) = hits.code {
            debug!(
                "Лист '{}': наименование в колонке {}, код в колонке {}",
                sheet.name(),
                item_column,
                code_column
            );
            return Ok(ColumnMap {
                item_column,
                code_column,
                doc_column: hits.doc,
                header_row,
                code_synthesized: false,
            });
        }

        let code_column = probe_empty_column(sheet, item_column, header_rows).unwrap_or_else(|| {
            warn!(
                "Лист '{}': нет пустой колонки рядом с наименованием, код пишется в колонку {}",
                sheet.name(),
                item_column + 1
            );
            item_column + 1
        });
        return Ok(ColumnMap {
            item_column,
            code_column,
            doc_column: hits.doc,
            header_row,
            code_synthesized: true,
        });
    }

    if let Some(item_column) = density_column(sheet) {
        info!(
            "Лист '{}': заголовок не найден, наименования по содержимому в колонке {}",
            sheet.name(),
            item_column
        );
        return Ok(ColumnMap {
            item_column,
            code_column: hits.code.unwrap_or(item_column + 1),
            doc_column: hits.doc,
            header_row: 0,
            code_synthesized: hits.code.is_none(),
        });
    }

    Err(OkpdError::SchemaNotFound {
        sheet: sheet.name().to_string(),
    })
}

/// Строка для заголовка созданной колонки кода
///
/// Первая строка в пределах заголовка, где у колонки наименований есть
/// значение; иначе строка с найденным заголовком или строка 1.
pub fn synthetic_header_row(sheet: &Sheet, map: &ColumnMap, header_rows_to_skip: usize) -> u32 {
    let limit = (header_rows_to_skip as u32).max(1);
    (1..=limit)
        .find(|&row| sheet.text(row, map.item_column).is_some())
        .unwrap_or(map.header_row.max(1))
}

/// Находит колонки и при необходимости добавляет заголовок колонки кода
pub fn discover(workbook: &mut Workbook, sheet_index: usize, header_rows_to_skip: usize) -> Result<ColumnMap> {
    let sheet = workbook
        .sheet(sheet_index)
        .ok_or_else(|| OkpdError::InvalidWorkbook(format!("нет листа с индексом {}", sheet_index)))?;
    let map = detect(sheet, header_rows_to_skip)?;

    if map.code_synthesized {
        let row = synthetic_header_row(sheet, &map, header_rows_to_skip);
        if sheet.is_blank(row, map.code_column) {
            let name = sheet.name().to_string();
            workbook.set_text(sheet_index, row, map.code_column, CODE_HEADER)?;
            info!("Лист '{}': добавлена колонка кода {} (строка {})", name, map.code_column, row);
        }
    }

    Ok(map)
}
