//! Группировка похожих наименований
//!
//! Ключ группы: первое слово наименования как есть, с регистром и
//! знаками препинания. Порядок групп и элементов совпадает с порядком
//! появления, представитель группы первый элемент. Наименования с разным
//! первым словом никогда не объединяются.

use std::collections::HashMap;

use crate::text::first_token;
use crate::types::{Group, Item};

/// Ключ группировки: первое слово до пробела
///
/// "Болт-М6" и "Болт М8" попадают в разные группы, как и "Болт" и "болт".
pub fn group_key(text: &str) -> String {
    first_token(text.trim()).to_string()
}

/// Разбивает элементы на группы за один проход
pub fn group_items(items: Vec<Item>) -> Vec<Group> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();

    for item in items {
        let key = group_key(&item.raw_text);
        match index.get(&key) {
            Some(&i) => groups[i].members.push(item),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(Group {
                    key,
                    members: vec![item],
                });
            }
        }
    }

    groups
}
