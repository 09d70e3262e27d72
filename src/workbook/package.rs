//! Точечная правка ячеек внутри пакета xlsx
//!
//! Книга не пересобирается: меняются только XML листов, в которых есть
//! правки, и только затронутые `<c>`. Стили, объединения, ширины колонок
//! и формулы остаются как были.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, warn};

use crate::error::{OkpdError, Result};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";

/// Правки одного листа: (строка, колонка) → текст
pub type CellEdits = BTreeMap<(u32, u32), String>;

/// Все части архива в исходном порядке
pub struct XlsxPackage {
    parts: Vec<(String, Vec<u8>)>,
}

impl XlsxPackage {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            parts.push((name, data));
        }
        Ok(Self { parts })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|(n, _)| n == name) {
            Some(part) => part.1 = data,
            None => self.parts.push((name.to_string(), data)),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let cursor = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in &self.parts {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }

    /// Имя листа → путь части с его XML
    pub fn sheet_parts(&self) -> Result<Vec<(String, String)>> {
        let workbook = self
            .part(WORKBOOK_PART)
            .ok_or_else(|| OkpdError::InvalidWorkbook(format!("нет части {}", WORKBOOK_PART)))?;
        let rels = self
            .part(WORKBOOK_RELS_PART)
            .ok_or_else(|| OkpdError::InvalidWorkbook(format!("нет части {}", WORKBOOK_RELS_PART)))?;

        let targets = parse_relationships(rels)?;
        let mut sheets = Vec::new();
        for (name, rel_id) in parse_sheet_entries(workbook)? {
            match targets.get(&rel_id) {
                Some(target) => sheets.push((name, resolve_target(target))),
                None => warn!("Лист '{}' ссылается на неизвестную связь {}", name, rel_id),
            }
        }
        Ok(sheets)
    }

    /// Применяет правки по именам листов
    pub fn apply_edits(&mut self, edits: &BTreeMap<String, CellEdits>) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }
        let sheet_parts: BTreeMap<String, String> = self.sheet_parts()?.into_iter().collect();

        for (sheet, cells) in edits {
            if cells.is_empty() {
                continue;
            }
            let part_name = sheet_parts
                .get(sheet)
                .ok_or_else(|| OkpdError::InvalidWorkbook(format!("лист '{}' не найден в пакете", sheet)))?;
            let original = self
                .part(part_name)
                .ok_or_else(|| OkpdError::InvalidWorkbook(format!("нет части {}", part_name)))?;
            let patched = patch_worksheet_xml(original, cells)?;
            debug!("Лист '{}': изменено ячеек {}", sheet, cells.len());
            self.set_part(part_name, patched);
        }
        Ok(())
    }
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

fn parse_sheet_entries(xml: &[u8]) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = attr.key.as_ref();
                    if key == b"name" {
                        name = Some(attr.unescape_value()?.into_owned());
                    } else if local_name(key) == b"id" && key != b"id" {
                        rel_id = Some(attr.unescape_value()?.into_owned());
                    }
                }
                if let (Some(name), Some(rel_id)) = (name, rel_id) {
                    sheets.push((name, rel_id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_relationships(xml: &[u8]) -> Result<BTreeMap<String, String>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut targets = BTreeMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                        b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

/// Номер колонки (с 1) → буквы: 1 → A, 27 → AA
pub fn column_name(mut col: u32) -> String {
    let mut name = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        name.push(b'A' + rem);
        col = (col - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Адрес A1 → (строка, колонка), обе с 1
pub fn parse_a1(reference: &str) -> Option<(u32, u32)> {
    let reference = reference.replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        col = col.checked_mul(26)?.checked_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, col))
}

fn parse_row_number(row: &BytesStart<'_>) -> Result<Option<u32>> {
    for attr in row.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"r" {
            return Ok(attr.unescape_value()?.parse::<u32>().ok());
        }
    }
    Ok(None)
}

/// (строка, колонка) и стиль ячейки
fn parse_cell_attrs(cell: &BytesStart<'_>) -> Result<(Option<(u32, u32)>, Option<String>)> {
    let mut position = None;
    let mut style = None;
    for attr in cell.attributes() {
        let attr = attr?;
        match local_name(attr.key.as_ref()) {
            b"r" => position = parse_a1(&attr.unescape_value()?),
            b"s" => style = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    Ok((position, style))
}

/// Копия `<row>` без `spans`: после вставки ячеек подсказка может стать неверной
fn row_without_spans(row: &BytesStart<'_>) -> Result<BytesStart<'static>> {
    let mut out = BytesStart::new("row");
    for attr in row.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"spans" {
            continue;
        }
        out.push_attribute(attr);
    }
    Ok(out.into_owned())
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

fn write_inline_cell(writer: &mut Writer<Vec<u8>>, row: u32, col: u32, text: &str, style: Option<&str>) {
    let style_attr = style.map(|s| format!(r#" s="{}""#, escape_xml(s))).unwrap_or_default();
    let xml = format!(
        r#"<c r="{}{}"{} t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        column_name(col),
        row,
        style_attr,
        escape_xml(text)
    );
    writer.get_mut().extend_from_slice(xml.as_bytes());
}

fn write_new_row(writer: &mut Writer<Vec<u8>>, row: u32, cells: &[(u32, &str)]) -> Result<()> {
    let mut start = BytesStart::new("row");
    start.push_attribute(("r", row.to_string().as_str()));
    writer.write_event(Event::Start(start))?;
    for (col, text) in cells {
        write_inline_cell(writer, row, *col, text, None);
    }
    writer.write_event(Event::End(BytesEnd::new("row")))?;
    Ok(())
}

fn edits_by_row(edits: &CellEdits) -> BTreeMap<u32, Vec<(u32, &str)>> {
    let mut rows: BTreeMap<u32, Vec<(u32, &str)>> = BTreeMap::new();
    for ((row, col), text) in edits {
        rows.entry(*row).or_default().push((*col, text.as_str()));
    }
    rows
}

/// Переписывает XML листа с правками ячеек
pub fn patch_worksheet_xml(original: &[u8], edits: &CellEdits) -> Result<Vec<u8>> {
    let rows = edits_by_row(edits);
    let mut pending: Vec<u32> = rows.keys().copied().collect();
    pending.reverse();

    let mut reader = Reader::from_reader(original);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(original.len() + edits.len() * 96));
    let mut buf = Vec::new();
    let mut in_sheet_data = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                in_sheet_data = true;
                writer.write_event(Event::Start(e.into_owned()))?;
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                if pending.is_empty() {
                    writer.write_event(Event::Empty(e.into_owned()))?;
                } else {
                    writer.write_event(Event::Start(e.into_owned()))?;
                    while let Some(row) = pending.pop() {
                        write_new_row(&mut writer, row, &rows[&row])?;
                    }
                    writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
                }
            }
            Event::Start(e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                let row_start = e.into_owned();
                let Some(row_num) = parse_row_number(&row_start)? else {
                    writer.write_event(Event::Start(row_start))?;
                    buf.clear();
                    continue;
                };
                flush_rows_before(&mut writer, &mut pending, &rows, row_num)?;
                if pending.last() == Some(&row_num) {
                    pending.pop();
                    writer.write_event(Event::Start(row_without_spans(&row_start)?))?;
                    patch_row(&mut reader, &mut writer, row_num, &rows[&row_num])?;
                } else {
                    writer.write_event(Event::Start(row_start))?;
                }
            }
            Event::Empty(e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                let row_empty = e.into_owned();
                let Some(row_num) = parse_row_number(&row_empty)? else {
                    writer.write_event(Event::Empty(row_empty))?;
                    buf.clear();
                    continue;
                };
                flush_rows_before(&mut writer, &mut pending, &rows, row_num)?;
                if pending.last() == Some(&row_num) {
                    pending.pop();
                    writer.write_event(Event::Start(row_without_spans(&row_empty)?))?;
                    for (col, text) in &rows[&row_num] {
                        write_inline_cell(&mut writer, row_num, *col, text, None);
                    }
                    writer.write_event(Event::End(BytesEnd::new("row")))?;
                } else {
                    writer.write_event(Event::Empty(row_empty))?;
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                while let Some(row) = pending.pop() {
                    write_new_row(&mut writer, row, &rows[&row])?;
                }
                in_sheet_data = false;
                writer.write_event(Event::End(e.into_owned()))?;
            }
            Event::Eof => break,
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    if !pending.is_empty() {
        return Err(OkpdError::InvalidWorkbook("в листе нет sheetData".into()));
    }
    Ok(writer.into_inner())
}

fn flush_rows_before(
    writer: &mut Writer<Vec<u8>>,
    pending: &mut Vec<u32>,
    rows: &BTreeMap<u32, Vec<(u32, &str)>>,
    row_num: u32,
) -> Result<()> {
    while let Some(&row) = pending.last() {
        if row >= row_num {
            break;
        }
        pending.pop();
        write_new_row(writer, row, &rows[&row])?;
    }
    Ok(())
}

/// Копирует содержимое `<row>` до закрывающего тега, вставляя правки по порядку колонок
fn patch_row<R: std::io::BufRead>(
    reader: &mut Reader<R>,
    writer: &mut Writer<Vec<u8>>,
    row_num: u32,
    cells: &[(u32, &str)],
) -> Result<()> {
    let mut buf = Vec::new();
    let mut next = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"c" => {
                let cell_start = e.into_owned();
                let (position, style) = parse_cell_attrs(&cell_start)?;
                let Some((_, col)) = position else {
                    writer.write_event(Event::Start(cell_start))?;
                    buf.clear();
                    continue;
                };

                while next < cells.len() && cells[next].0 < col {
                    write_inline_cell(writer, row_num, cells[next].0, cells[next].1, None);
                    next += 1;
                }

                if next < cells.len() && cells[next].0 == col {
                    let text = cells[next].1;
                    next += 1;

                    let inner = read_cell_body(reader)?;
                    if inner.iter().any(is_formula_event) {
                        warn!("{}{}: формула не перезаписывается", column_name(col), row_num);
                        writer.write_event(Event::Start(cell_start))?;
                        for ev in inner {
                            writer.write_event(ev)?;
                        }
                    } else {
                        write_inline_cell(writer, row_num, col, text, style.as_deref());
                    }
                } else {
                    writer.write_event(Event::Start(cell_start))?;
                }
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"c" => {
                let cell_empty = e.into_owned();
                let (position, style) = parse_cell_attrs(&cell_empty)?;
                let Some((_, col)) = position else {
                    writer.write_event(Event::Empty(cell_empty))?;
                    buf.clear();
                    continue;
                };

                while next < cells.len() && cells[next].0 < col {
                    write_inline_cell(writer, row_num, cells[next].0, cells[next].1, None);
                    next += 1;
                }

                if next < cells.len() && cells[next].0 == col {
                    write_inline_cell(writer, row_num, col, cells[next].1, style.as_deref());
                    next += 1;
                } else {
                    writer.write_event(Event::Empty(cell_empty))?;
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"row" => {
                while next < cells.len() {
                    write_inline_cell(writer, row_num, cells[next].0, cells[next].1, None);
                    next += 1;
                }
                writer.write_event(Event::End(e.into_owned()))?;
                return Ok(());
            }
            Event::Eof => {
                return Err(OkpdError::InvalidWorkbook(format!(
                    "строка {} не закрыта",
                    row_num
                )))
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }
}

/// События внутри `<c>` вместе с закрывающим `</c>`
fn read_cell_body<R: std::io::BufRead>(reader: &mut Reader<R>) -> Result<Vec<Event<'static>>> {
    let mut buf = Vec::new();
    let mut events = Vec::new();
    let mut depth = 1usize;
    loop {
        let ev = reader.read_event_into(&mut buf)?.into_owned();
        match &ev {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    events.push(ev);
                    return Ok(events);
                }
            }
            Event::Eof => return Err(OkpdError::InvalidWorkbook("ячейка не закрыта".into())),
            _ => {}
        }
        events.push(ev);
        buf.clear();
    }
}

fn is_formula_event(ev: &Event<'_>) -> bool {
    match ev {
        Event::Start(e) | Event::Empty(e) => local_name(e.name().as_ref()) == b"f",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edits(items: &[((u32, u32), &str)]) -> CellEdits {
        items.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    fn patch(xml: &str, items: &[((u32, u32), &str)]) -> String {
        let out = patch_worksheet_xml(xml.as_bytes(), &edits(items)).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_column_name() {
        assert_eq!(column_name(1), "A");
        assert_eq!(column_name(26), "Z");
        assert_eq!(column_name(27), "AA");
        assert_eq!(column_name(703), "AAA");
    }

    #[test]
    fn test_parse_a1() {
        assert_eq!(parse_a1("A1"), Some((1, 1)));
        assert_eq!(parse_a1("$C$12"), Some((12, 3)));
        assert_eq!(parse_a1("AA7"), Some((7, 27)));
        assert_eq!(parse_a1("7"), None);
        assert_eq!(parse_a1("B0"), None);
    }

    #[test]
    fn test_patch_existing_cell_keeps_style() {
        let xml = r#"<worksheet><sheetData><row r="2" spans="1:2"><c r="A2" t="s"><v>0</v></c><c r="B2" s="4"/></row></sheetData></worksheet>"#;
        let out = patch(xml, &[((2, 2), "25.94.11.120")]);
        assert!(out.contains(r#"<c r="A2" t="s"><v>0</v></c>"#));
        assert!(out.contains(r#"<c r="B2" s="4" t="inlineStr"><is><t xml:space="preserve">25.94.11.120</t></is></c>"#));
        assert!(!out.contains("spans"));
    }

    #[test]
    fn test_patch_inserts_cells_in_column_order() {
        let xml = r#"<worksheet><sheetData><row r="3"><c r="A3"><v>1</v></c><c r="D3"><v>2</v></c></row></sheetData></worksheet>"#;
        let out = patch(xml, &[((3, 2), "x"), ((3, 5), "y")]);
        let a = out.find(r#"r="A3""#).unwrap();
        let b = out.find(r#"r="B3""#).unwrap();
        let d = out.find(r#"r="D3""#).unwrap();
        let e = out.find(r#"r="E3""#).unwrap();
        assert!(a < b && b < d && d < e);
    }

    #[test]
    fn test_patch_never_overwrites_formula() {
        let xml = r#"<worksheet><sheetData><row r="2"><c r="B2" s="1"><f>SUM(1,2)</f><v>3</v></c></row></sheetData></worksheet>"#;
        let out = patch(xml, &[((2, 2), "25.94.11.120")]);
        assert!(out.contains("<f>SUM(1,2)</f>"));
        assert!(!out.contains("25.94.11.120"));
    }

    #[test]
    fn test_patch_adds_missing_rows() {
        let xml = r#"<worksheet><sheetData><row r="2"><c r="A2"><v>1</v></c></row><row r="5"/></sheetData></worksheet>"#;
        let out = patch(xml, &[((1, 1), "Заголовок"), ((4, 2), "a"), ((5, 1), "b"), ((9, 1), "c")]);
        let r1 = out.find(r#"<row r="1">"#).unwrap();
        let r2 = out.find(r#"<row r="2">"#).unwrap();
        let r4 = out.find(r#"<row r="4">"#).unwrap();
        let r5 = out.find(r#"<row r="5">"#).unwrap();
        let r9 = out.find(r#"<row r="9">"#).unwrap();
        assert!(r1 < r2 && r2 < r4 && r4 < r5 && r5 < r9);
        assert!(out.contains("Заголовок"));
    }

    #[test]
    fn test_patch_empty_sheet_data() {
        let out = patch("<worksheet><sheetData/></worksheet>", &[((1, 1), "a & b")]);
        assert!(out.contains("<sheetData><row r=\"1\">"));
        assert!(out.contains("a &amp; b"));
    }

    #[test]
    fn test_sheet_parts_resolution() {
        let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Лист1" sheetId="1" r:id="rId1"/><sheet name="Итог" sheetId="2" r:id="rId2"/></sheets></workbook>"#;
        let rels = r#"<Relationships><Relationship Id="rId1" Type="ws" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="ws" Target="/xl/worksheets/sheet2.xml"/></Relationships>"#;
        let package = XlsxPackage {
            parts: vec![
                (WORKBOOK_PART.to_string(), workbook.as_bytes().to_vec()),
                (WORKBOOK_RELS_PART.to_string(), rels.as_bytes().to_vec()),
            ],
        };
        let parts = package.sheet_parts().unwrap();
        assert_eq!(
            parts,
            vec![
                ("Лист1".to_string(), "xl/worksheets/sheet1.xml".to_string()),
                ("Итог".to_string(), "xl/worksheets/sheet2.xml".to_string()),
            ]
        );
    }
}
