//! Книга Excel в памяти
//!
//! Чтение через calamine (значения и формулы), запись через точечную
//! правку исходного пакета (см. `package`).

pub mod package;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use tracing::{debug, info};

use crate::error::{OkpdError, Result};
use package::{CellEdits, XlsxPackage};

/// Содержимое ячейки
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Bool(bool),
    /// Формула с ведущим `=`
    Formula(String),
    /// Ошибка Excel (#DIV/0! и т.п.)
    Error(String),
}

impl Cell {
    /// Формулы не перезаписываются никогда
    pub fn is_formula(&self) -> bool {
        match self {
            Cell::Formula(_) => true,
            Cell::Text(text) => text.starts_with('='),
            _ => false,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Cell::Text(_))
    }

    /// Текст для сравнения; для ошибок `None`
    pub fn display(&self) -> Option<String> {
        match self {
            Cell::Text(text) | Cell::Formula(text) => Some(text.clone()),
            Cell::Number(n) => Some(format_number(*n)),
            Cell::Bool(b) => Some(if *b { "ИСТИНА" } else { "ЛОЖЬ" }.to_string()),
            Cell::Error(_) => None,
        }
    }
}

/// Целые числа без ".0"
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Лист: разреженная сетка (строка, колонка) с 1
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    name: String,
    cells: BTreeMap<(u32, u32), Cell>,
    max_row: u32,
    max_column: u32,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_row(&self) -> u32 {
        self.max_row
    }

    pub fn max_column(&self) -> u32 {
        self.max_column
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    /// Текст ячейки; пустая строка считается отсутствующим значением
    pub fn text(&self, row: u32, col: u32) -> Option<String> {
        self.cell(row, col)
            .and_then(Cell::display)
            .filter(|t| !t.trim().is_empty())
    }

    pub fn is_blank(&self, row: u32, col: u32) -> bool {
        match self.cell(row, col) {
            None => true,
            Some(Cell::Text(text)) => text.trim().is_empty(),
            Some(_) => false,
        }
    }

    pub fn insert(&mut self, row: u32, col: u32, cell: Cell) {
        self.max_row = self.max_row.max(row);
        self.max_column = self.max_column.max(col);
        self.cells.insert((row, col), cell);
    }

    /// Строка как в листе: заполненные ячейки по колонкам
    pub fn row_cells(&self, row: u32) -> impl Iterator<Item = (u32, &Cell)> {
        self.cells
            .range((row, 0)..=(row, u32::MAX))
            .map(|((_, col), cell)| (*col, cell))
    }

    pub fn cells(&self) -> impl Iterator<Item = ((u32, u32), &Cell)> {
        self.cells.iter().map(|(k, v)| (*k, v))
    }
}

/// Книга с отложенными правками
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    source: Option<PathBuf>,
    sheets: Vec<Sheet>,
    edits: BTreeMap<String, CellEdits>,
}

impl Workbook {
    /// Загружает все листы файла
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(OkpdError::FileNotFound(path.display().to_string()));
        }

        let mut excel: Xlsx<_> = open_workbook(path)?;
        let mut sheets = Vec::new();
        for name in excel.sheet_names() {
            let mut sheet = Sheet::new(&name);

            let range = excel.worksheet_range(&name)?;
            if let Some((start_row, start_col)) = range.start() {
                for (r, c, value) in range.used_cells() {
                    let row = start_row + r as u32 + 1;
                    let col = start_col + c as u32 + 1;
                    if let Some(cell) = convert_cell(value) {
                        sheet.insert(row, col, cell);
                    }
                }
            }

            // формулы поверх значений
            if let Ok(formulas) = excel.worksheet_formula(&name) {
                if let Some((start_row, start_col)) = formulas.start() {
                    for (r, c, formula) in formulas.used_cells() {
                        if formula.is_empty() {
                            continue;
                        }
                        let row = start_row + r as u32 + 1;
                        let col = start_col + c as u32 + 1;
                        sheet.insert(row, col, Cell::Formula(format!("={}", formula)));
                    }
                }
            }

            debug!(
                "Лист '{}': {} строк, {} колонок",
                sheet.name(),
                sheet.max_row(),
                sheet.max_column()
            );
            sheets.push(sheet);
        }

        info!("Загружена книга {} ({} листов)", path.display(), sheets.len());
        Ok(Self {
            source: Some(path.to_path_buf()),
            sheets,
            edits: BTreeMap::new(),
        })
    }

    /// Книга без файла (для проверки логики без диска)
    pub fn from_sheets(sheets: Vec<Sheet>) -> Self {
        Self {
            source: None,
            sheets,
            edits: BTreeMap::new(),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name() == name)
    }

    /// Записывает текст в ячейку; формулу не трогает и возвращает `false`
    pub fn set_text(&mut self, sheet: usize, row: u32, col: u32, text: &str) -> Result<bool> {
        let target = self
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| OkpdError::InvalidWorkbook(format!("нет листа с индексом {}", sheet)))?;

        if target.cell(row, col).is_some_and(Cell::is_formula) {
            return Ok(false);
        }

        target.insert(row, col, Cell::Text(text.to_string()));
        self.edits
            .entry(target.name().to_string())
            .or_default()
            .insert((row, col), text.to_string());
        Ok(true)
    }

    /// Число изменённых ячеек
    pub fn pending_edits(&self) -> usize {
        self.edits.values().map(|cells| cells.len()).sum()
    }

    /// Сохраняет книгу: исходный пакет плюс все правки
    ///
    /// Пишет во временный файл рядом с целью и переименовывает его.
    pub fn save_to(&self, target: &Path) -> Result<()> {
        let source = self
            .source
            .as_deref()
            .ok_or_else(|| OkpdError::InvalidWorkbook("у книги нет исходного файла".into()))?;

        let mut pkg = XlsxPackage::read(source)?;
        pkg.apply_edits(&self.edits)?;
        let bytes = pkg.to_bytes()?;

        let tmp = temp_path_for(target);
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!("Книга сохранена: {} (правок: {})", target.display(), self.pending_edits());
        Ok(())
    }
}

fn convert_cell(value: &Data) -> Option<Cell> {
    match value {
        Data::Empty => None,
        Data::String(s) => Some(Cell::Text(s.clone())),
        Data::Float(f) => Some(Cell::Number(*f)),
        Data::Int(i) => Some(Cell::Number(*i as f64)),
        Data::Bool(b) => Some(Cell::Bool(*b)),
        Data::Error(e) => Some(Cell::Error(e.to_string())),
        other => Some(Cell::Text(other.to_string())),
    }
}

/// Временный файл в том же каталоге: `.<имя>.tmp`
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook.xlsx".to_string());
    target.with_file_name(format!(".{}.tmp", name))
}
