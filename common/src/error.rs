//! Ошибки общей библиотеки

use thiserror::Error;

/// Общая ошибка чистой логики (фильтры, разбор ответов модели)
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Псевдоним Result
pub type Result<T> = std::result::Result<T, Error>;
