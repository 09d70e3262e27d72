use crate::error::{OkpdError, Result};
use clap::ValueEnum;
use okpd_common::{RowFilter, DEFAULT_HEADER_ROWS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Режим обработки многолистовой книги
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    /// Все листы сканируются, затем один общий проход группировки и записи
    #[default]
    Shared,
    /// Отдельный проход на каждый лист
    PerSheet,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Shared => "shared",
            ProcessingMode::PerSheet => "per-sheet",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "shared" => Some(ProcessingMode::Shared),
            "per-sheet" => Some(ProcessingMode::PerSheet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ai_provider: String,
    pub model_timeout_seconds: u64,
    pub checkpoint_name: String,
    pub save_interval: usize,
    pub header_rows: usize,
    pub mode: ProcessingMode,
    pub label_columns: bool,
    pub web_search: bool,
    pub cache_dir: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
    /// Свои шаблоны шума вместо стандартных
    pub noise_patterns: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default_config())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| OkpdError::Config("Домашний каталог не найден".into()))?;
        Ok(home.join(".config").join("okpd").join("config.json"))
    }

    /// Каталог кэшей: из настроек или ~/.cache/okpd
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let base = dirs::cache_dir()
            .ok_or_else(|| OkpdError::Config("Каталог кэша не найден".into()))?;
        Ok(base.join("okpd"))
    }

    fn default_config() -> Self {
        Self {
            ai_provider: "claude".into(),
            model_timeout_seconds: 90,
            checkpoint_name: "checkpoint.xlsx".into(),
            save_interval: 10,
            header_rows: DEFAULT_HEADER_ROWS,
            mode: ProcessingMode::Shared,
            label_columns: false,
            web_search: true,
            cache_dir: None,
            catalog_path: None,
            noise_patterns: None,
        }
    }
}

/// Неизменяемые параметры одного запуска
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub header_rows_to_skip: usize,
    pub save_interval: usize,
    /// Явный путь чекпоинта; иначе `<имя>.<checkpoint_name>` рядом с входным файлом
    pub checkpoint_path: Option<PathBuf>,
    pub checkpoint_name: String,
    pub noise_patterns: Option<Vec<String>>,
    pub mode: ProcessingMode,
    pub label_columns: bool,
    /// Куда положить копию результата
    pub output_path: Option<PathBuf>,
    pub resume: bool,
    pub backup_original: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            header_rows_to_skip: config.header_rows,
            save_interval: config.save_interval.max(1),
            checkpoint_path: None,
            checkpoint_name: config.checkpoint_name.clone(),
            noise_patterns: config.noise_patterns.clone(),
            mode: config.mode,
            label_columns: config.label_columns,
            output_path: None,
            resume: false,
            backup_original: true,
        }
    }

    /// Чекпоинт файла: явный путь или `<имя>.<checkpoint_name>` рядом с ним
    ///
    /// У каждого входного файла свой чекпоинт, файлы одного каталога
    /// не затирают прогресс друг друга.
    pub fn checkpoint_path_for(&self, input: &Path) -> PathBuf {
        match &self.checkpoint_path {
            Some(path) => path.clone(),
            None => {
                let stem = input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                input
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(format!("{}.{}", stem, self.checkpoint_name))
            }
        }
    }

    pub fn build_filter(&self) -> Result<RowFilter> {
        match &self.noise_patterns {
            Some(patterns) => Ok(RowFilter::new(self.header_rows_to_skip, patterns)?),
            None => Ok(RowFilter::with_defaults(self.header_rows_to_skip)),
        }
    }
}
