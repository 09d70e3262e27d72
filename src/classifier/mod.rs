//! Классификация групп
//!
//! Внешние участники описаны трейтами:
//! - ClassificationClient: текст → кандидаты ОКПД2
//! - WebSearch: контекст из поиска
//! - TextModel: упрощение термина и выбор кода
//!
//! `Decider` проводит одну группу через все шаги и никогда не падает:
//! при любой ошибке участника ставится резервный результат.

pub mod cache;
pub mod catalog;
pub mod cli_model;

use std::collections::HashMap;

use okpd_common::prompts::{build_choose_prompt, build_simplify_prompt, context_fallback};
use okpd_common::parser::clean_simplified_term;
use okpd_common::types::{FALLBACK_CODE, FALLBACK_LABEL};
use okpd_common::{extract_code, normalize_term, remove_links, ClassificationResult, CodeEntry, Message};
use tracing::{debug, warn};

use crate::error::{OkpdError, Result};

pub use cache::{CachedClassifier, CachedSearch, JsonCache};
pub use catalog::CatalogClassifier;
pub use cli_model::{CliTextModel, CliWebSearch};

/// Поиск кандидатов ОКПД2; повторный вызов с тем же текстом допустим
#[allow(async_fn_in_trait)]
pub trait ClassificationClient {
    async fn classify(&self, texts: &[String]) -> Result<HashMap<String, Vec<CodeEntry>>>;
}

#[allow(async_fn_in_trait)]
pub trait WebSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>>;
}

#[allow(async_fn_in_trait)]
pub trait TextModel {
    async fn generate(&self, messages: &[Message]) -> Result<String>;
}

/// Поиск отключён: всегда пустой результат
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSearch;

impl WebSearch for NoSearch {
    async fn search(&self, _query: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Итог по группе
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub result: ClassificationResult,
    /// Термин после упрощения моделью
    pub simplified: String,
    /// Код не выбран моделью из кандидатов
    pub fallback: bool,
}

pub struct Decider<C, S, M> {
    classifier: C,
    search: S,
    model: M,
}

impl<C, S, M> Decider<C, S, M>
where
    C: ClassificationClient,
    S: WebSearch,
    M: TextModel,
{
    pub fn new(classifier: C, search: S, model: M) -> Self {
        Self {
            classifier,
            search,
            model,
        }
    }

    async fn simplify(&self, normalized: &str) -> String {
        match self.model.generate(&build_simplify_prompt(normalized)).await {
            Ok(response) => clean_simplified_term(&response).unwrap_or_else(|| normalized.to_string()),
            Err(e) => {
                warn!("Не удалось упростить '{}': {}", normalized, e);
                normalized.to_string()
            }
        }
    }

    async fn context(&self, query: &str) -> String {
        match self.search.search(query).await {
            Ok(snippets) => {
                let text = remove_links(&snippets.join(" "));
                let text = text.trim();
                if text.is_empty() {
                    context_fallback(query)
                } else {
                    text.to_string()
                }
            }
            Err(e) => {
                warn!("Поиск по '{}' не удался: {}", query, e);
                context_fallback(query)
            }
        }
    }

    /// Классифицирует группу по её представителю
    pub async fn decide(&self, representative: &str) -> Decision {
        let normalized = match normalize_term(representative) {
            n if n.is_empty() => representative.trim().to_string(),
            n => n,
        };
        let simplified = self.simplify(&normalized).await;
        debug!("'{}' → '{}'", representative, simplified);

        let entries = match self.classifier.classify(std::slice::from_ref(&simplified)).await {
            Ok(mut found) => match found.remove(&simplified) {
                Some(entries) => entries,
                None if found.len() == 1 => found.into_values().next().unwrap_or_default(),
                None => Vec::new(),
            },
            Err(e) => {
                let error = OkpdError::ClassificationService {
                    term: simplified.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", error);
                return Decision {
                    result: ClassificationResult::fallback(),
                    simplified,
                    fallback: true,
                };
            }
        };

        if entries.is_empty() {
            debug!("Нет кандидатов для '{}'", simplified);
            return Decision {
                result: ClassificationResult::new(FALLBACK_CODE, FALLBACK_LABEL, ""),
                simplified,
                fallback: true,
            };
        }

        let context = self.context(representative).await;
        let chosen = match self
            .model
            .generate(&build_choose_prompt(&simplified, &context, &entries))
            .await
        {
            Ok(response) => extract_code(&response).map(str::to_string),
            Err(e) => {
                warn!("Модель не выбрала код для '{}': {}", simplified, e);
                None
            }
        };

        if let Some(entry) = chosen
            .as_deref()
            .and_then(|code| entries.iter().find(|e| e.code == code))
        {
            return Decision {
                result: ClassificationResult::new(&entry.code, &entry.name, ""),
                simplified,
                fallback: false,
            };
        }

        Decision {
            result: ClassificationResult::from_first_candidate(&entries[0]),
            simplified,
            fallback: true,
        }
    }
}
