//! Офлайн-классификатор по справочнику ОКПД2
//!
//! Справочник: CSV (`код;название` или `код,название`) либо xlsx, где в
//! первой колонке код, во второй название. Кандидаты подбираются по
//! совпадению основ слов.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use okpd_common::{extract_code, normalize_cell_text, CodeEntry};
use tracing::info;

use super::ClassificationClient;
use crate::error::{OkpdError, Result};
use crate::workbook::Workbook;

const STEM_LEN: usize = 4;
const MIN_WORD_LEN: usize = 3;
const MAX_CANDIDATES: usize = 10;

fn stems(text: &str) -> HashSet<String> {
    normalize_cell_text(text)
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_WORD_LEN && !w.chars().all(|c| c.is_ascii_digit()))
        .map(|w| w.chars().take(STEM_LEN).collect())
        .collect()
}

fn strip_quotes(field: &str) -> &str {
    field.trim().trim_matches('"').trim()
}

/// Строка справочника, если первое поле целиком код
fn parse_line(line: &str) -> Option<CodeEntry> {
    let separator = if line.contains(';') { ';' } else { ',' };
    let (code, name) = line.split_once(separator)?;
    let code = strip_quotes(code);
    let name = strip_quotes(name);
    if name.is_empty() || extract_code(code) != Some(code) {
        return None;
    }
    Some(CodeEntry::new(code, name))
}

pub struct CatalogClassifier {
    entries: Vec<CodeEntry>,
    stems: Vec<HashSet<String>>,
}

impl CatalogClassifier {
    pub fn from_entries(entries: Vec<CodeEntry>) -> Self {
        let stems = entries.iter().map(|e| stems(&e.name)).collect();
        Self { entries, stems }
    }

    pub fn from_csv(content: &str) -> Self {
        Self::from_entries(content.lines().filter_map(parse_line).collect())
    }

    /// Загружает справочник; формат по расширению
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(OkpdError::FileNotFound(path.display().to_string()));
        }
        let is_xlsx = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_lowercase().as_str(), "xlsx" | "xlsm"))
            .unwrap_or(false);

        let catalog = if is_xlsx {
            let workbook = Workbook::open(path)?;
            let sheet = workbook
                .sheets()
                .first()
                .ok_or_else(|| OkpdError::InvalidWorkbook(path.display().to_string()))?;
            let entries = (1..=sheet.max_row())
                .filter_map(|row| {
                    let code = sheet.text(row, 1)?;
                    let name = sheet.text(row, 2)?;
                    parse_line(&format!("{};{}", code.trim(), name.trim()))
                })
                .collect();
            Self::from_entries(entries)
        } else {
            Self::from_csv(&std::fs::read_to_string(path)?)
        };

        info!("Справочник ОКПД2: {} кодов из {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// До десяти кандидатов по числу общих основ; при равенстве более
    /// детальный код, затем порядок справочника
    pub fn candidates(&self, text: &str) -> Vec<CodeEntry> {
        let query = stems(text);
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, usize)> = self
            .stems
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let score = query.intersection(entry).count();
                (score > 0).then_some((i, score))
            })
            .collect();
        scored.sort_by(|(a, score_a), (b, score_b)| {
            score_b
                .cmp(score_a)
                .then_with(|| self.entries[*b].code.len().cmp(&self.entries[*a].code.len()))
                .then_with(|| a.cmp(b))
        });

        scored
            .into_iter()
            .take(MAX_CANDIDATES)
            .map(|(i, _)| self.entries[i].clone())
            .collect()
    }
}

impl ClassificationClient for CatalogClassifier {
    async fn classify(&self, texts: &[String]) -> Result<HashMap<String, Vec<CodeEntry>>> {
        Ok(texts
            .iter()
            .map(|text| (text.clone(), self.candidates(text)))
            .collect())
    }
}
