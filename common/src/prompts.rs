//! Промпты для текстовой модели
//!
//! - build_simplify_prompt: упрощение наименования до типа товара
//! - build_choose_prompt: выбор одного кода из кандидатов
//! - build_search_prompt: краткое описание товара (контекст для выбора)

use crate::types::{CodeEntry, Message};

/// Системный промпт
pub const SYSTEM_PROMPT: &str =
    "Ты помогаешь выбрать один код для военной компании, которая занимается производством и работает с различным металом.";

/// Контекст, если поиск не дал результата
pub fn context_fallback(query: &str) -> String {
    format!("Информация о '{}' для промышленного применения", query)
}

/// Промпт упрощения наименования
///
/// Модель убирает размеры и числовые параметры и приводит товар к типу,
/// по которому классификатор находит кандидатов.
pub fn build_simplify_prompt(term: &str) -> Vec<Message> {
    let user = format!(
        r#"Перефразируй название товара, удалив все размеры и числовые параметры, преобразовав тип товара.
Если встречаешь металлические изделия, то прибавляй "алюминиевый".
Если слово 'лист' -> 'профиль алюминиевый', если слово 'круг' -> 'профиль алюминиевый', если слово 'болт' или 'винт' -> 'болты и винты', если слово 'гвоздь' -> 'гвоздь', если слово 'доска' или 'брусок' -> 'пиломатериалы', если слово 'жгут' -> 'жгуты синтетические', если слово 'бензин' -> 'бензин'.
Если встречаешь слово на английском языке, ничего не меняй. Например: 'Isolontape 500 3005 VB D LM' -> 'Isolontape'.
Если слова нет в примерах, сделай по аналогии.

Название: {term}
Выведи только товар:"#
    );
    vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
}

/// Варианты в виде "код — название" построчно
pub fn format_options(entries: &[CodeEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{} — {}", e.code, e.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Промпт выбора кода
pub fn build_choose_prompt(simplified: &str, context: &str, entries: &[CodeEntry]) -> Vec<Message> {
    let options = format_options(entries);
    let user = format!(
        r#"Ты составляешь таблицу закупок товаров для военной компании, которая занимается производством и работает с различным металом.
Твоя задача выбрать подходящий код для товара, отталкиваясь от специфики военного предприятия, где используются различные ЧЕРНЫЕ МЕТАЛЛЫ, АЛЮМИНИЙ.
Тебе ЗАПРЕЩЕНО указывать коды: медицина, мебель медицинская, гипс.

Товар: {simplified}
Контекст: {context}
Варианты:
{options}
Выведи только код:"#
    );
    vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
}

/// Промпт краткого описания товара для контекста выбора
pub fn build_search_prompt(query: &str) -> Vec<Message> {
    let user = format!(
        r#"Найди краткие сведения о товаре "{query}": что это, из какого материала, где применяется в промышленности.
Выведи JSON-массив из 1-3 коротких строк без ссылок."#
    );
    vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
}

/// Склеивает сообщения в один текст для CLI, которое принимает только промпт
pub fn render_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
