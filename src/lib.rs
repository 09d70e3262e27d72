//! okpd-rust: проставление кодов ОКПД2 в Excel-ведомостях
//!
//! Поиск колонок, отсев шума, группировка похожих наименований,
//! классификация с чекпоинтами и запись кодов обратно в исходный файл.

pub mod ai_provider;
pub mod cancel;
pub mod checkpoint;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod scanner;
pub mod schema;
pub mod workbook;
pub mod writer;

pub use cancel::CancelToken;
pub use error::{OkpdError, Result};
pub use orchestrator::{Orchestrator, PipelineState, ProgressEvent, RunReport, RunStats};
