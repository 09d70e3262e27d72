//! Нормализация текста ячеек и нечёткое сравнение
//!
//! Поиск строки при записи сравнивает наименования через
//! `normalize_cell_text`.

use lazy_static::lazy_static;
use regex::Regex;

/// Минимальная длина ключа для нечёткого сравнения (в символах)
pub const FUZZY_MIN_KEY_LEN: usize = 5;
/// Минимальная доля длины короткой строки от длинной
pub const FUZZY_MIN_RATIO: f64 = 0.80;

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"[a-zA-Zа-яА-ЯёЁ]+").unwrap();
    static ref GOODS_PREFIX_RE: Regex = Regex::new(r"[Тт]овар:? ?").unwrap();
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Символы форматирования, которые не видны в Excel, но ломают сравнение
fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
            | '\u{E000}'..='\u{F8FF}'
    )
}

fn is_printable(c: char) -> bool {
    c == ' ' || !(c.is_control() || c.is_whitespace() || is_format_char(c))
}

/// Приводит текст ячейки к виду для сравнения
///
/// NBSP → пробел, схлопывание пробелов, удаление непечатаемых символов,
/// `- _ . ,` → пробел, повторное схлопывание, нижний регистр.
pub fn normalize_cell_text(text: &str) -> String {
    let text = collapse_whitespace(&text.replace('\u{00A0}', " "));
    let text: String = text.chars().filter(|c| is_printable(*c)).collect();
    let text: String = text
        .chars()
        .map(|c| match c {
            '-' | '_' | '.' | ',' => ' ',
            other => other,
        })
        .collect();
    collapse_whitespace(&text).to_lowercase()
}

/// Вариант ключа без пробелов ("болт м 6" и "болтм6" совпадут)
pub fn without_spaces(normalized: &str) -> String {
    normalized.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Первый токен через пробел; пустая строка для пустого текста
pub fn first_token(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// Отношение длин, если одна строка содержит другую
pub fn containment_ratio(a: &str, b: &str) -> Option<f64> {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return None;
    }
    let (shorter, longer, len_short, len_long) = if len_a <= len_b {
        (a, b, len_a, len_b)
    } else {
        (b, a, len_b, len_a)
    };
    if !longer.contains(shorter) {
        return None;
    }
    Some(len_short as f64 / len_long as f64)
}

/// Нечёткий поиск ключа среди кандидатов
///
/// Ключи короче `FUZZY_MIN_KEY_LEN` не участвуют, длина цели не
/// ограничена. Побеждает наибольшее
/// отношение не ниже `FUZZY_MIN_RATIO`; при равенстве первый по порядку.
pub fn fuzzy_best_match<'a, T>(
    target: &str,
    candidates: impl IntoIterator<Item = (&'a str, T)>,
) -> Option<(T, f64)> {
    let mut best: Option<(T, f64)> = None;
    for (key, value) in candidates {
        if key.chars().count() < FUZZY_MIN_KEY_LEN {
            continue;
        }
        let Some(ratio) = containment_ratio(target, key) else {
            continue;
        };
        if ratio < FUZZY_MIN_RATIO {
            continue;
        }
        let better = match &best {
            Some((_, best_ratio)) => ratio > *best_ratio,
            None => true,
        };
        if better {
            best = Some((value, ratio));
        }
    }
    best
}

/// Упрощение наименования перед запросом к классификатору
///
/// Оставляет только буквенные слова длиннее двух символов и убирает
/// префикс "Товар:".
pub fn normalize_term(term: &str) -> String {
    let words: Vec<&str> = WORD_RE
        .find_iter(term)
        .map(|m| m.as_str())
        .filter(|w| w.chars().count() > 2)
        .collect();
    let joined = words.join(" ");
    GOODS_PREFIX_RE.replace_all(&joined, "").trim().to_string()
}
