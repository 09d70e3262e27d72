//! Типы данных сверки
//!
//! Общие для конвейера и адаптеров:
//! - Item / Group: строки ведомости и группы похожих наименований
//! - CodeEntry: кандидат из классификатора
//! - ClassificationResult: итог по группе (код, название, комментарий)
//! - ColumnMap: найденные колонки листа

use serde::{Deserialize, Serialize};

use crate::text::normalize_cell_text;

/// Код, который ставится, когда классификация не удалась
pub const FALLBACK_CODE: &str = "32.99.59.000";
/// Название резервного кода
pub const FALLBACK_LABEL: &str = "Изделия различные прочие, не включенные в другие группировки";
/// Комментарий при резервном коде
pub const FALLBACK_COMMENT: &str = "(fallback)";

/// Кандидат из классификатора ОКПД2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub code: String,
    pub name: String,
}

impl CodeEntry {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// Результат классификации группы
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub comment: String,
}

impl ClassificationResult {
    pub fn new(code: impl Into<String>, label: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
            comment: comment.into(),
        }
    }

    /// Резервный результат: 32.99.59.000 с комментарием "(fallback)"
    pub fn fallback() -> Self {
        Self::new(FALLBACK_CODE, FALLBACK_LABEL, FALLBACK_COMMENT)
    }

    /// Выбран первый кандидат вместо ответа модели
    pub fn from_first_candidate(entry: &CodeEntry) -> Self {
        Self::new(&entry.code, &entry.name, FALLBACK_COMMENT)
    }

    pub fn is_fallback(&self) -> bool {
        self.comment == FALLBACK_COMMENT
    }
}

/// Строка данных листа
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub sheet: String,
    /// Номер строки листа (с 1)
    pub row: u32,
    pub raw_text: String,
    pub normalized_text: String,
}

impl Item {
    pub fn new(sheet: impl Into<String>, row: u32, raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let normalized_text = normalize_cell_text(&raw_text);
        Self {
            sheet: sheet.into(),
            row,
            raw_text,
            normalized_text,
        }
    }
}

/// Группа строк с одинаковым ключом
///
/// Представитель группы всегда первый встреченный элемент.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub key: String,
    pub members: Vec<Item>,
}

impl Group {
    pub fn representative(&self) -> &Item {
        // группа создаётся только вместе с первым элементом
        &self.members[0]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Колонки листа (номера с 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub item_column: u32,
    pub code_column: u32,
    pub doc_column: Option<u32>,
    /// Строка заголовка с наименованием; 0, если колонка найдена по содержимому
    pub header_row: u32,
    /// Колонка кода создана заново
    pub code_synthesized: bool,
}

impl ColumnMap {
    pub fn label_column(&self) -> u32 {
        self.code_column + 1
    }

    pub fn comment_column(&self) -> u32 {
        self.code_column + 2
    }
}

/// Сообщение для текстовой модели
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
