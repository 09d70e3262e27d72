//! Запись результатов обратно в книгу
//!
//! Строка для записи ищется по тексту наименования среди всех листов:
//! точное совпадение нормализованного текста, затем вариант без пробелов,
//! затем нечёткое совпадение. Первая найденная при сканировании строка
//! выигрывает. Формулы не перезаписываются.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use okpd_common::text::{fuzzy_best_match, normalize_cell_text, without_spaces};
use okpd_common::{ClassificationResult, Group};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::error::{OkpdError, Result};
use crate::scanner::SheetScan;
use crate::workbook::Workbook;

pub const LABEL_HEADER: &str = "Название кода";
pub const COMMENT_HEADER: &str = "Комментарий";

/// Строка листа
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub sheet_index: usize,
    pub row: u32,
}

/// Как найдена строка
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Exact,
    NoSpace,
    Fuzzy(f64),
}

/// Индекс текст → строка по всем листам
#[derive(Debug, Default)]
pub struct CellLookup {
    /// Ключи в порядке сканирования (для нечёткого поиска)
    keys: Vec<(String, Location)>,
    index: HashMap<String, Location>,
}

impl CellLookup {
    /// Сканирует листы по порядку, каждый по своей колонке наименований
    pub fn build(workbook: &Workbook, scans: &[SheetScan]) -> Self {
        let mut lookup = Self::default();
        for scan in scans {
            let Some(sheet) = workbook.sheet(scan.sheet_index) else {
                continue;
            };
            for row in 1..=sheet.max_row() {
                if scan.excluded_rows.contains(&row) {
                    continue;
                }
                let Some(cell) = sheet.cell(row, scan.columns.item_column) else {
                    continue;
                };
                if cell.is_formula() {
                    continue;
                }
                let Some(text) = cell.display() else {
                    continue;
                };
                let location = Location {
                    sheet_index: scan.sheet_index,
                    row,
                };
                let normalized = normalize_cell_text(&text);
                if normalized.is_empty() {
                    continue;
                }
                let compact = without_spaces(&normalized);
                lookup.insert(normalized, location);
                lookup.insert(compact, location);
            }
        }
        debug!("Индекс строк: {} ключей", lookup.index.len());
        lookup
    }

    fn insert(&mut self, key: String, location: Location) {
        if self.index.contains_key(&key) {
            return;
        }
        self.index.insert(key.clone(), location);
        self.keys.push((key, location));
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Ищет строку для текста наименования
    pub fn resolve(&self, text: &str) -> Option<(Location, MatchKind)> {
        let normalized = normalize_cell_text(text);
        if normalized.is_empty() {
            return None;
        }
        if let Some(location) = self.index.get(&normalized) {
            return Some((*location, MatchKind::Exact));
        }
        if let Some(location) = self.index.get(&without_spaces(&normalized)) {
            return Some((*location, MatchKind::NoSpace));
        }
        let candidates = self.keys.iter().map(|(key, location)| (key.as_str(), *location));
        fuzzy_best_match(&normalized, candidates).map(|(location, ratio)| (location, MatchKind::Fuzzy(ratio)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Писать название кода и комментарий в две колонки справа от кода
    pub label_columns: bool,
}

/// Итог записи
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub cells_written: usize,
    pub not_found: usize,
    pub formula_skipped: usize,
    pub fuzzy_matches: usize,
}

impl WriteReport {
    pub fn add(&mut self, other: &WriteReport) {
        self.cells_written += other.cells_written;
        self.not_found += other.not_found;
        self.formula_skipped += other.formula_skipped;
        self.fuzzy_matches += other.fuzzy_matches;
    }
}

pub struct ReconciliationWriter<'a> {
    scans: HashMap<usize, &'a SheetScan>,
    lookup: CellLookup,
    options: WriteOptions,
}

impl<'a> ReconciliationWriter<'a> {
    pub fn new(workbook: &Workbook, scans: &'a [SheetScan], options: WriteOptions) -> Self {
        Self {
            scans: scans.iter().map(|s| (s.sheet_index, s)).collect(),
            lookup: CellLookup::build(workbook, scans),
            options,
        }
    }

    pub fn lookup(&self) -> &CellLookup {
        &self.lookup
    }

    /// Записывает результаты групп; отмена проверяется между группами
    pub fn write_all(
        &self,
        workbook: &mut Workbook,
        results: &[(Group, ClassificationResult)],
        cancel: &CancelToken,
    ) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        if self.options.label_columns {
            self.ensure_label_headers(workbook)?;
        }
        for (group, result) in results {
            if cancel.is_cancelled() {
                info!("Запись прервана: отмена");
                return Err(OkpdError::Cancelled);
            }
            self.write_group(workbook, group, result, &mut report)?;
        }
        info!(
            "Записано ячеек: {}, не найдено строк: {}, формул пропущено: {}",
            report.cells_written, report.not_found, report.formula_skipped
        );
        Ok(report)
    }

    /// Записывает результат всем элементам группы
    pub fn write_group(
        &self,
        workbook: &mut Workbook,
        group: &Group,
        result: &ClassificationResult,
        report: &mut WriteReport,
    ) -> Result<()> {
        for item in &group.members {
            let Some((location, kind)) = self.lookup.resolve(&item.raw_text) else {
                let err = OkpdError::WriteBackNotFound {
                    item: item.raw_text.clone(),
                };
                warn!("{}", err);
                report.not_found += 1;
                continue;
            };
            if let MatchKind::Fuzzy(ratio) = kind {
                debug!("'{}': нечёткое совпадение {:.2}", item.raw_text, ratio);
                report.fuzzy_matches += 1;
            }
            let Some(scan) = self.scans.get(&location.sheet_index) else {
                continue;
            };

            let code_column = scan.columns.code_column;
            let mut cells = vec![(code_column, result.code.as_str())];
            if self.options.label_columns {
                cells.push((scan.columns.label_column(), result.label.as_str()));
                cells.push((scan.columns.comment_column(), result.comment.as_str()));
            }

            for (col, value) in cells {
                if workbook.set_text(location.sheet_index, location.row, col, value)? {
                    if col == code_column {
                        report.cells_written += 1;
                    }
                } else {
                    warn!(
                        "'{}' строка {}, колонка {}: формула, запись пропущена",
                        scan.sheet_name, location.row, col
                    );
                    report.formula_skipped += 1;
                }
            }
        }
        Ok(())
    }

    fn ensure_label_headers(&self, workbook: &mut Workbook) -> Result<()> {
        let mut scans: Vec<&&SheetScan> = self.scans.values().collect();
        scans.sort_by_key(|s| s.sheet_index);
        for scan in scans {
            let Some(sheet) = workbook.sheet(scan.sheet_index) else {
                continue;
            };
            let headers = [
                (scan.columns.label_column(), LABEL_HEADER),
                (scan.columns.comment_column(), COMMENT_HEADER),
            ];
            let missing: Vec<(u32, &str)> = headers
                .into_iter()
                .filter(|(col, _)| sheet.is_blank(1, *col))
                .collect();
            for (col, title) in missing {
                workbook.set_text(scan.sheet_index, 1, col, title)?;
            }
        }
        Ok(())
    }
}

/// Запасной путь сохранения: `<имя>.backup.xlsx`
pub fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    path.with_file_name(format!("{}.backup.xlsx", stem))
}

/// Сохраняет книгу на место; при ошибке одна попытка в запасной файл
pub fn save_workbook(workbook: &Workbook, path: &Path) -> Result<PathBuf> {
    match workbook.save_to(path) {
        Ok(()) => {
            info!("Книга сохранена: {}", path.display());
            Ok(path.to_path_buf())
        }
        Err(first) => {
            let backup = backup_path(path);
            warn!(
                "Не удалось сохранить {}: {}. Сохраняю в {}",
                path.display(),
                first,
                backup.display()
            );
            match workbook.save_to(&backup) {
                Ok(()) => Ok(backup),
                Err(second) => {
                    error!("Запасное сохранение тоже не удалось: {}", second);
                    Err(OkpdError::WorkbookSave {
                        path: path.display().to_string(),
                        reason: format!("{}; запасной файл: {}", first, second),
                    })
                }
            }
        }
    }
}
