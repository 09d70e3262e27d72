//! Тестовые книги xlsx
#![allow(dead_code)]

use std::path::Path;

use okpd_rust::workbook::{Cell, Workbook};
use rust_xlsxwriter::Format;

#[derive(Default)]
pub struct BookBuilder {
    sheets: Vec<(String, Vec<(u32, u16, String)>)>,
}

impl BookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, name: &str) -> Self {
        self.sheets.push((name.to_string(), Vec::new()));
        self
    }

    /// Строка листа (с 1); пустые строки пропускаются
    pub fn row(mut self, row: u32, cells: &[&str]) -> Self {
        let sheet = self.sheets.last_mut().expect("сначала sheet()");
        for (i, value) in cells.iter().enumerate() {
            if !value.is_empty() {
                sheet.1.push((row, i as u16 + 1, value.to_string()));
            }
        }
        self
    }

    pub fn save(self, path: &Path) {
        let mut book = rust_xlsxwriter::Workbook::new();
        let bold = Format::new().set_bold();
        for (name, cells) in &self.sheets {
            let ws = book.add_worksheet();
            ws.set_name(name).expect("имя листа");
            for (row, col, value) in cells {
                let (r, c) = (row - 1, col - 1);
                if value.starts_with('=') {
                    ws.write_formula(r, c, value.as_str()).expect("формула");
                } else if r == 0 {
                    ws.write_string_with_format(r, c, value, &bold).expect("заголовок");
                } else {
                    ws.write_string(r, c, value).expect("строка");
                }
            }
        }
        book.save(path).expect("сохранение книги");
    }
}

/// Текст ячейки после повторного открытия файла
pub fn cell_text(path: &Path, sheet: &str, row: u32, col: u32) -> Option<String> {
    let workbook = Workbook::open(path).expect("открытие книги");
    let index = workbook.sheet_index(sheet).expect("лист");
    workbook.sheets()[index].text(row, col)
}

pub fn cell(path: &Path, sheet: &str, row: u32, col: u32) -> Option<Cell> {
    let workbook = Workbook::open(path).expect("открытие книги");
    let index = workbook.sheet_index(sheet).expect("лист");
    workbook.sheets()[index].cell(row, col).cloned()
}
