//! Чекпоинты: промежуточное сохранение результатов
//!
//! Чекпоинт это обычная книга xlsx:
//! - листы обработанной книги с проставленными кодами
//! - `__results`: строка → результат по каждой зафиксированной группе
//! - `__progress`: счётчики, отпечаток входного файла, режим, время
//!
//! Пишется во временный файл и переименовывается, так что читатель
//! никогда не видит наполовину записанный файл.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use okpd_common::ClassificationResult;
use rust_xlsxwriter::Worksheet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{OkpdError, Result};
use crate::scanner::SheetScan;
use crate::workbook::{format_number, temp_path_for, Cell, Workbook};
use crate::writer::backup_path;

pub const RESULTS_SHEET: &str = "__results";
pub const PROGRESS_SHEET: &str = "__progress";

const RESULTS_HEADER: [&str; 8] = [
    "sheet",
    "row",
    "group",
    "representative",
    "item",
    "code",
    "label",
    "comment",
];

/// Результат для одной строки листа
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub sheet: String,
    pub row: u32,
    /// Номер группы в порядке обработки
    pub group: usize,
    pub representative: String,
    pub item: String,
    pub result: ClassificationResult,
}

/// Снимок прогресса
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointRecord {
    pub groups_done: usize,
    pub groups_total: usize,
    pub input_sha256: String,
    pub mode: String,
    pub saved_at: String,
    pub entries: Vec<CheckpointEntry>,
}

impl CheckpointRecord {
    /// Номера зафиксированных групп
    pub fn committed_groups(&self) -> BTreeSet<usize> {
        self.entries.iter().map(|e| e.group).collect()
    }

    /// Представитель группы → результат (для продолжения)
    pub fn results_by_representative(&self) -> HashMap<String, ClassificationResult> {
        let mut map = HashMap::new();
        for entry in &self.entries {
            map.entry(entry.representative.clone())
                .or_insert_with(|| entry.result.clone());
        }
        map
    }
}

/// SHA-256 файла в hex
pub fn file_fingerprint(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub struct CheckpointManager {
    path: PathBuf,
    interval: usize,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>, interval: usize) -> Self {
        Self {
            path: path.into(),
            interval: interval.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Пора ли сохранять после `groups_done` групп
    pub fn is_due(&self, groups_done: usize) -> bool {
        groups_done > 0 && groups_done % self.interval == 0
    }

    /// Сохраняет чекпоинт; при ошибке пробует `<имя>.backup.xlsx`
    pub fn save(&self, workbook: Option<&Workbook>, scans: &[SheetScan], record: &CheckpointRecord) -> Result<PathBuf> {
        match self.write_to(&self.path, workbook, scans, record) {
            Ok(()) => {
                info!(
                    "Чекпоинт сохранён: {} ({}/{} групп)",
                    self.path.display(),
                    record.groups_done,
                    record.groups_total
                );
                Ok(self.path.clone())
            }
            Err(first) => {
                let backup = backup_path(&self.path);
                warn!(
                    "Не удалось сохранить чекпоинт {}: {}. Пробую {}",
                    self.path.display(),
                    first,
                    backup.display()
                );
                self.write_to(&backup, workbook, scans, record)
                    .map_err(|second| OkpdError::Checkpoint(format!("{}; запасной файл: {}", first, second)))?;
                info!("Чекпоинт сохранён в запасной файл: {}", backup.display());
                Ok(backup)
            }
        }
    }

    fn write_to(
        &self,
        target: &Path,
        workbook: Option<&Workbook>,
        scans: &[SheetScan],
        record: &CheckpointRecord,
    ) -> Result<()> {
        let mut replaced: BTreeSet<String> = scans.iter().map(|s| s.sheet_name.clone()).collect();
        replaced.insert(RESULTS_SHEET.to_string());
        replaced.insert(PROGRESS_SHEET.to_string());

        let carried = if target.exists() {
            match read_other_sheets(target, &replaced) {
                Ok(sheets) => sheets,
                Err(e) => {
                    warn!("Старый чекпоинт не прочитан, листы не переносятся: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut book = rust_xlsxwriter::Workbook::new();

        if let Some(workbook) = workbook {
            for scan in scans {
                let Some(sheet) = workbook.sheet(scan.sheet_index) else {
                    continue;
                };
                let ws = book.add_worksheet();
                ws.set_name(&scan.sheet_name)?;
                for ((row, col), cell) in sheet.cells() {
                    write_cell(ws, row, col, cell)?;
                }
                let code_column = scan.columns.code_column;
                for entry in record.entries.iter().filter(|e| e.sheet == scan.sheet_name) {
                    if sheet.cell(entry.row, code_column).is_some_and(Cell::is_formula) {
                        continue;
                    }
                    write_cell(
                        ws,
                        entry.row,
                        code_column,
                        &Cell::Text(entry.result.code.clone()),
                    )?;
                }
            }
        }

        for (name, cells) in &carried {
            let ws = book.add_worksheet();
            ws.set_name(name)?;
            for ((row, col), cell) in cells {
                write_cell(ws, *row, *col, cell)?;
            }
            debug!("Лист '{}' перенесён из прежнего чекпоинта", name);
        }

        let ws = book.add_worksheet();
        ws.set_name(RESULTS_SHEET)?;
        for (col, title) in RESULTS_HEADER.iter().enumerate() {
            ws.write_string(0, col as u16, *title)?;
        }
        for (i, entry) in record.entries.iter().enumerate() {
            let row = i as u32 + 1;
            ws.write_string(row, 0, &entry.sheet)?;
            ws.write_number(row, 1, entry.row as f64)?;
            ws.write_number(row, 2, entry.group as f64)?;
            ws.write_string(row, 3, &entry.representative)?;
            ws.write_string(row, 4, &entry.item)?;
            ws.write_string(row, 5, &entry.result.code)?;
            ws.write_string(row, 6, &entry.result.label)?;
            ws.write_string(row, 7, &entry.result.comment)?;
        }

        let ws = book.add_worksheet();
        ws.set_name(PROGRESS_SHEET)?;
        let progress = [
            ("groups_done", record.groups_done.to_string()),
            ("groups_total", record.groups_total.to_string()),
            ("input_sha256", record.input_sha256.clone()),
            ("mode", record.mode.clone()),
            ("saved_at", record.saved_at.clone()),
        ];
        for (i, (key, value)) in progress.iter().enumerate() {
            ws.write_string(i as u32, 0, *key)?;
            ws.write_string(i as u32, 1, value)?;
        }

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = temp_path_for(target);
        book.save(&tmp)?;
        if let Err(e) = std::fs::rename(&tmp, target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Читает чекпоинт
    pub fn load(path: &Path) -> Result<CheckpointRecord> {
        if !path.exists() {
            return Err(OkpdError::FileNotFound(path.display().to_string()));
        }
        let mut excel: Xlsx<_> = open_workbook(path)?;

        let mut record = CheckpointRecord::default();
        let progress = excel
            .worksheet_range(PROGRESS_SHEET)
            .map_err(|e| OkpdError::Checkpoint(format!("нет листа {}: {}", PROGRESS_SHEET, e)))?;
        for row in progress.rows() {
            let key = row.first().map(data_text).unwrap_or_default();
            let value = row.get(1).map(data_text).unwrap_or_default();
            match key.as_str() {
                "groups_done" => record.groups_done = parse_count(&key, &value)?,
                "groups_total" => record.groups_total = parse_count(&key, &value)?,
                "input_sha256" => record.input_sha256 = value,
                "mode" => record.mode = value,
                "saved_at" => record.saved_at = value,
                _ => {}
            }
        }

        let results = excel
            .worksheet_range(RESULTS_SHEET)
            .map_err(|e| OkpdError::Checkpoint(format!("нет листа {}: {}", RESULTS_SHEET, e)))?;
        for row in results.rows().skip(1) {
            let cell = |i: usize| row.get(i).map(data_text).unwrap_or_default();
            if cell(0).is_empty() {
                continue;
            }
            record.entries.push(CheckpointEntry {
                sheet: cell(0),
                row: parse_count("row", &cell(1))? as u32,
                group: parse_count("group", &cell(2))?,
                representative: cell(3),
                item: cell(4),
                result: ClassificationResult::new(cell(5), cell(6), cell(7)),
            });
        }

        debug!(
            "Чекпоинт {}: {}/{} групп, {} строк",
            path.display(),
            record.groups_done,
            record.groups_total,
            record.entries.len()
        );
        Ok(record)
    }
}

fn data_text(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => format_number(*f),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| OkpdError::Checkpoint(format!("некорректное значение {}: '{}'", key, value)))
}

fn write_cell(ws: &mut Worksheet, row: u32, col: u32, cell: &Cell) -> Result<()> {
    let (r, c) = (row.saturating_sub(1), col.saturating_sub(1) as u16);
    match cell {
        Cell::Text(text) => {
            ws.write_string(r, c, text)?;
        }
        Cell::Number(n) => {
            ws.write_number(r, c, *n)?;
        }
        Cell::Bool(b) => {
            ws.write_boolean(r, c, *b)?;
        }
        Cell::Formula(f) => {
            ws.write_formula(r, c, f.as_str())?;
        }
        Cell::Error(e) => {
            ws.write_string(r, c, e)?;
        }
    }
    Ok(())
}

type CarriedSheet = (String, Vec<((u32, u32), Cell)>);

/// Листы прежнего чекпоинта, которые не заменяются
fn read_other_sheets(path: &Path, replaced: &BTreeSet<String>) -> Result<Vec<CarriedSheet>> {
    let mut excel: Xlsx<_> = open_workbook(path)?;
    let mut sheets = Vec::new();
    for name in excel.sheet_names() {
        if replaced.contains(&name) {
            continue;
        }
        let range = excel.worksheet_range(&name)?;
        let mut cells = Vec::new();
        if let Some((start_row, start_col)) = range.start() {
            for (r, c, value) in range.used_cells() {
                let cell = match value {
                    Data::String(s) => Cell::Text(s.clone()),
                    Data::Float(f) => Cell::Number(*f),
                    Data::Int(i) => Cell::Number(*i as f64),
                    Data::Bool(b) => Cell::Bool(*b),
                    other => Cell::Text(other.to_string()),
                };
                cells.push(((start_row + r as u32 + 1, start_col + c as u32 + 1), cell));
            }
        }
        sheets.push((name, cells));
    }
    Ok(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Sheet;
    use okpd_common::ColumnMap;
    use tempfile::tempdir;

    fn entry(group: usize, row: u32, item: &str, code: &str) -> CheckpointEntry {
        CheckpointEntry {
            sheet: "Лист1".into(),
            row,
            group,
            representative: item.into(),
            item: item.into(),
            result: ClassificationResult::new(code, "Название", ""),
        }
    }

    fn scan() -> SheetScan {
        SheetScan {
            sheet_index: 0,
            sheet_name: "Лист1".into(),
            columns: ColumnMap {
                item_column: 1,
                code_column: 2,
                doc_column: None,
                header_row: 1,
                code_synthesized: false,
            },
            items: Vec::new(),
            excluded_rows: Default::default(),
            counts: Default::default(),
        }
    }

    #[test]
    fn test_is_due() {
        let manager = CheckpointManager::new("cp.xlsx", 10);
        assert!(!manager.is_due(0));
        assert!(!manager.is_due(9));
        assert!(manager.is_due(10));
        assert!(manager.is_due(20));
        assert!(CheckpointManager::new("cp.xlsx", 0).is_due(1));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.xlsx");

        let mut sheet = Sheet::new("Лист1");
        sheet.insert(1, 1, Cell::Text("Наименование".into()));
        sheet.insert(2, 1, Cell::Text("Болт М6".into()));
        sheet.insert(3, 1, Cell::Text("Гайка М8".into()));
        let workbook = Workbook::from_sheets(vec![sheet]);

        let record = CheckpointRecord {
            groups_done: 2,
            groups_total: 5,
            input_sha256: "abc".into(),
            mode: "shared".into(),
            saved_at: "2026-01-01T00:00:00+03:00".into(),
            entries: vec![entry(0, 2, "Болт М6", "25.94.11.120"), entry(1, 3, "Гайка М8", "25.94.12.120")],
        };
        let manager = CheckpointManager::new(&path, 10);
        let saved = manager.save(Some(&workbook), &[scan()], &record).unwrap();
        assert_eq!(saved, path);

        let loaded = CheckpointManager::load(&path).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.committed_groups().len(), 2);

        let reopened = Workbook::open(&path).unwrap();
        let sheet = &reopened.sheets()[0];
        assert_eq!(sheet.name(), "Лист1");
        assert_eq!(sheet.text(2, 2).as_deref(), Some("25.94.11.120"));
    }

    #[test]
    fn test_rewrite_keeps_other_sheets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.xlsx");

        let mut book = rust_xlsxwriter::Workbook::new();
        let ws = book.add_worksheet();
        ws.set_name("Заметки").unwrap();
        ws.write_string(0, 0, "не трогать").unwrap();
        let ws = book.add_worksheet();
        ws.set_name("Лист1").unwrap();
        ws.write_string(0, 0, "старое").unwrap();
        book.save(&path).unwrap();

        let mut sheet = Sheet::new("Лист1");
        sheet.insert(1, 1, Cell::Text("новое".into()));
        let workbook = Workbook::from_sheets(vec![sheet]);
        let manager = CheckpointManager::new(&path, 10);
        manager
            .save(Some(&workbook), &[scan()], &CheckpointRecord::default())
            .unwrap();

        let reopened = Workbook::open(&path).unwrap();
        let names: Vec<&str> = reopened.sheets().iter().map(|s| s.name()).collect();
        assert!(names.contains(&"Заметки"));
        assert!(names.contains(&RESULTS_SHEET));
        let notes = &reopened.sheets()[reopened.sheet_index("Заметки").unwrap()];
        assert_eq!(notes.text(1, 1).as_deref(), Some("не трогать"));
        let main = &reopened.sheets()[reopened.sheet_index("Лист1").unwrap()];
        assert_eq!(main.text(1, 1).as_deref(), Some("новое"));
    }

    #[test]
    fn test_results_by_representative() {
        let record = CheckpointRecord {
            entries: vec![entry(0, 2, "Болт М6", "1.1"), entry(0, 3, "Болт М6", "1.1")],
            ..Default::default()
        };
        let map = record.results_by_representative();
        assert_eq!(map.len(), 1);
        assert_eq!(map["Болт М6"].code, "1.1");
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        std::fs::write(&a, b"one").unwrap();
        let first = file_fingerprint(&a).unwrap();
        assert_eq!(first.len(), 64);
        std::fs::write(&a, b"two").unwrap();
        assert_ne!(first, file_fingerprint(&a).unwrap());
    }

    #[test]
    fn test_formula_code_cell_not_overlaid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.xlsx");

        let mut sheet = Sheet::new("Лист1");
        sheet.insert(1, 1, Cell::Text("Наименование".into()));
        sheet.insert(2, 1, Cell::Text("Болт М6".into()));
        sheet.insert(2, 2, Cell::Formula("=1+1".into()));
        sheet.insert(3, 1, Cell::Text("Гайка М8".into()));
        let workbook = Workbook::from_sheets(vec![sheet]);
        let record = CheckpointRecord {
            groups_done: 2,
            groups_total: 2,
            entries: vec![entry(0, 2, "Болт М6", "25.94.11.120"), entry(1, 3, "Гайка М8", "25.94.12.120")],
            ..Default::default()
        };
        CheckpointManager::new(&path, 10)
            .save(Some(&workbook), &[scan()], &record)
            .unwrap();

        let reopened = Workbook::open(&path).unwrap();
        let sheet = &reopened.sheets()[0];
        assert_eq!(sheet.cell(2, 2), Some(&Cell::Formula("=1+1".into())));
        assert_eq!(sheet.text(3, 2).as_deref(), Some("25.94.12.120"));
        assert_eq!(CheckpointManager::load(&path).unwrap().entries.len(), 2);
    }

    #[test]
    fn test_save_falls_back_to_backup() {
        let dir = tempdir().unwrap();
        // каталог на месте файла: переименование не удаётся
        let path = dir.path().join("checkpoint.xlsx");
        std::fs::create_dir(&path).unwrap();

        let record = CheckpointRecord {
            groups_done: 1,
            groups_total: 3,
            entries: vec![entry(0, 2, "Болт М6", "25.94.11.120")],
            ..Default::default()
        };
        let saved = CheckpointManager::new(&path, 10).save(None, &[], &record).unwrap();

        assert_eq!(saved, dir.path().join("checkpoint.backup.xlsx"));
        assert!(path.is_dir());
        assert_eq!(CheckpointManager::load(&saved).unwrap(), record);
    }

    #[test]
    fn test_save_fails_when_backup_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("файл");
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("checkpoint.xlsx");

        let err = CheckpointManager::new(&path, 10)
            .save(None, &[], &CheckpointRecord::default())
            .unwrap_err();
        assert!(matches!(err, OkpdError::Checkpoint(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = CheckpointManager::load(Path::new("/nonexistent/cp.xlsx")).unwrap_err();
        assert!(matches!(err, OkpdError::FileNotFound(_)));
    }
}
