//! Разбор ответов текстовой модели
//!
//! Извлекает код ОКПД2 из ответа модели, чистит контекст поиска от ссылок
//! и достаёт JSON-массив из ответа CLI.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

lazy_static! {
    static ref CODE_RE: Regex = Regex::new(r"\b\d+(?:\.\d+){1,}\b").unwrap();
    static ref LINK_RE: Regex = Regex::new(r"https?://\S+").unwrap();
}

/// Первый код вида `25.94.11.120` в ответе модели
///
/// # Examples
/// ```
/// use okpd_common::extract_code;
///
/// assert_eq!(extract_code("Код: 25.94.11.120"), Some("25.94.11.120"));
/// assert_eq!(extract_code("не знаю"), None);
/// ```
pub fn extract_code(response: &str) -> Option<&str> {
    CODE_RE.find(response).map(|m| m.as_str())
}

/// Убирает ссылки из текста
pub fn remove_links(text: &str) -> String {
    LINK_RE.replace_all(text, "").to_string()
}

/// Извлекает JSON из ответа
///
/// Порядок поиска:
/// 1. блок ```json ... ```
/// 2. голый массив [...]
pub fn extract_json(response: &str) -> Result<&str> {
    if let Some(start_marker) = response.find("```json") {
        let start = start_marker + 7; // длина "```json"
        if let Some(end_offset) = response[start..].find("```") {
            let end = start + end_offset;
            return Ok(response[start..end].trim());
        }
    }

    if let Some(start) = response.find('[') {
        if let Some(end) = response.rfind(']') {
            if end >= start {
                return Ok(&response[start..=end]);
            }
        }
    }

    Err(Error::Parse("JSON не найден".into()))
}

/// Список строк из ответа модели (JSON-массив, иначе построчно)
pub fn parse_string_list(response: &str) -> Vec<String> {
    if let Ok(json) = extract_json(response) {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(json.trim()) {
            return list.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }
    response
        .lines()
        .map(|l| l.trim().trim_start_matches(['-', '*', '•']).trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Ответ модели на упрощение термина: первая непустая строка без кавычек
pub fn clean_simplified_term(response: &str) -> Option<String> {
    let line = response.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_matches(|c| matches!(c, '"' | '\'' | '«' | '»' | '`')).trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_lowercase())
    }
}
