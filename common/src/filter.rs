//! Классификация строк ведомости: заголовок / пустая / шум / данные

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::Result;

/// Шаблоны служебных строк (итоги, разделы, подзаголовки)
///
/// Порядок важен: в журнал пишется индекс первого совпавшего шаблона.
pub const DEFAULT_NOISE_PATTERNS: &[&str] = &[
    r"ВСЕГО\s+по\s+разделу(\s+\d+)?",
    r"ИТОГО\s+по\s+разделу(\s+\d+)?",
    r"ВСЕГО\s+\d+",
    r"ИТОГО\s+\d+",
    r"Сырье\s+и\s+основные\s+материалы",
    r"Вспомогательные\s+материалы",
    r"Возвратные\s+отходы",
    r"Приобретение\s+комплектующих\s+изделий",
    r"Покупные\s+комплектующие\s+изделия",
    r"Возвратные\s+отходы\s+\(вычитаются\)",
    r"Раздел\s+\d+",
    r"^\s*№\s*п/п\s*$",
    r"\bНаименование\s+показателя\b",
    r"\bИТОГО\b",
    r"\bВСЕГО\b",
    r"\bСырье\b",
    r"\bВспомогательные(\s+материалы)?\b",
    r"\bВозвратные(\s+отходы)?\b",
    r"\bПриобретение\b",
    r"\bПокупные\b",
    r"\bОтходы\b",
    r"\bМатериалы\b",
    r"\bКомплектующие\b",
    r"\bПолуфабрикаты\b",
    r"\bИзделия\b",
    r"Код\s+ОКП",
    r"Код\s+ОКПД",
    r"Единица\s+измерения",
    r"\bТС\b",
    r"\bШт\b$",
];

/// Число строк заголовка по умолчанию
pub const DEFAULT_HEADER_ROWS: usize = 5;

/// Маркер ссылки на приложение в колонке первичного документа
const APPENDIX_MARKER: &str = "прил";

lazy_static! {
    static ref DEFAULT_NOISE: Vec<Regex> = DEFAULT_NOISE_PATTERNS
        .iter()
        .map(|p| compile_pattern(p).unwrap())
        .collect();
}

fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("(?i){}", pattern))
}

/// Почему строка признана шумом
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseReason {
    /// Совпал шаблон с данным индексом
    Pattern(usize),
    /// В колонке документа ссылка на приложение
    Appendix,
}

/// Класс строки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    Header,
    Empty,
    Noise(NoiseReason),
    Data,
}

impl RowClass {
    pub fn is_data(&self) -> bool {
        matches!(self, RowClass::Data)
    }

    /// Строка никогда не получает результат при записи
    pub fn is_excluded(&self) -> bool {
        matches!(self, RowClass::Header | RowClass::Noise(_))
    }
}

/// Фильтр строк; набор шаблонов неизменен после создания
#[derive(Debug, Clone)]
pub struct RowFilter {
    header_rows_to_skip: usize,
    sources: Vec<String>,
    patterns: Vec<Regex>,
}

impl RowFilter {
    /// Фильтр с шаблонами по умолчанию
    pub fn with_defaults(header_rows_to_skip: usize) -> Self {
        Self {
            header_rows_to_skip,
            sources: DEFAULT_NOISE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            patterns: DEFAULT_NOISE.clone(),
        }
    }

    /// Фильтр со своими шаблонами (без учёта регистра)
    pub fn new<S: AsRef<str>>(header_rows_to_skip: usize, patterns: &[S]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        let mut sources = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            compiled.push(compile_pattern(pattern.as_ref())?);
            sources.push(pattern.as_ref().to_string());
        }
        Ok(Self {
            header_rows_to_skip,
            sources,
            patterns: compiled,
        })
    }

    pub fn header_rows_to_skip(&self) -> usize {
        self.header_rows_to_skip
    }

    /// Исходный текст шаблона по индексу
    pub fn pattern(&self, index: usize) -> Option<&str> {
        self.sources.get(index).map(|s| s.as_str())
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Индекс первого совпавшего шаблона
    pub fn noise_match(&self, text: &str) -> Option<usize> {
        self.patterns.iter().position(|re| re.is_match(text))
    }

    /// Классифицирует строку по смещению (0 = строка под заголовком) и значению
    pub fn classify(&self, offset: usize, value: Option<&str>) -> RowClass {
        self.classify_with_doc(offset, value, None)
    }

    /// То же, с учётом колонки первичного документа
    pub fn classify_with_doc(&self, offset: usize, value: Option<&str>, doc: Option<&str>) -> RowClass {
        if offset < self.header_rows_to_skip {
            return RowClass::Header;
        }

        let text = value.map(str::trim).unwrap_or("");
        if is_empty_value(text) {
            return RowClass::Empty;
        }

        if let Some(index) = self.noise_match(text) {
            debug!(
                "Шум: '{}' (шаблон #{}: {})",
                text,
                index,
                self.sources.get(index).map(String::as_str).unwrap_or("")
            );
            return RowClass::Noise(NoiseReason::Pattern(index));
        }

        if let Some(doc) = doc {
            if doc.to_lowercase().contains(APPENDIX_MARKER) {
                debug!("Шум: '{}' (ссылка на приложение: {})", text, doc.trim());
                return RowClass::Noise(NoiseReason::Appendix);
            }
        }

        RowClass::Data
    }
}

/// Пусто, один символ или короткое число (номер позиции)
fn is_empty_value(text: &str) -> bool {
    let len = text.chars().count();
    if len <= 1 {
        return true;
    }
    len <= 3 && text.chars().all(char::is_numeric)
}
