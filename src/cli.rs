use clap::{Parser, Subcommand};
use crate::ai_provider::AiProvider;
use crate::config::ProcessingMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "okpd")]
#[command(about = "Проставление кодов ОКПД2 в Excel-ведомостях", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Подробный лог
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// AI-провайдер (по умолчанию из настроек)
    #[arg(long, global = true)]
    pub ai_provider: Option<AiProvider>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Проставить коды в книге или во всех книгах папки
    Run {
        /// Файл .xlsx или папка
        #[arg(required = true)]
        input: PathBuf,

        /// Копия результата (для папки: каталог)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Путь чекпоинта для одного файла (по умолчанию `<имя>.checkpoint.xlsx` рядом с ним)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Сохранять чекпоинт каждые N групп
        #[arg(long)]
        save_interval: Option<usize>,

        /// Сколько строк после первой считать заголовком
        #[arg(long)]
        header_rows: Option<usize>,

        /// Режим обработки листов
        #[arg(short, long)]
        mode: Option<ProcessingMode>,

        /// Писать название кода и комментарий
        #[arg(long)]
        labels: bool,

        /// Продолжить с чекпоинта
        #[arg(long)]
        resume: bool,

        /// Справочник ОКПД2 (CSV или xlsx)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Не искать контекст
        #[arg(long)]
        no_search: bool,

        /// Не кэшировать ответы
        #[arg(long)]
        no_cache: bool,

        /// Подпапки тоже
        #[arg(short = 'r', long)]
        recursive: bool,
    },

    /// Показать найденные колонки и разбор строк без классификации
    Inspect {
        #[arg(required = true)]
        input: PathBuf,

        /// Сколько строк после первой считать заголовком
        #[arg(long)]
        header_rows: Option<usize>,

        /// Показать строки данных
        #[arg(long)]
        rows: bool,
    },

    /// Показать состояние чекпоинта
    Checkpoint {
        #[arg(required = true)]
        path: PathBuf,
    },

    /// Показать или изменить настройки
    Config {
        /// Показать настройки
        #[arg(long)]
        show: bool,

        /// Справочник ОКПД2 по умолчанию
        #[arg(long)]
        set_catalog: Option<PathBuf>,

        /// Интервал чекпоинта по умолчанию
        #[arg(long)]
        set_save_interval: Option<usize>,

        /// Режим обработки по умолчанию
        #[arg(long)]
        set_mode: Option<ProcessingMode>,
    },

    /// Управление кэшем
    Cache {
        /// Удалить кэш
        #[arg(long)]
        clear: bool,

        /// Показать сведения о кэше
        #[arg(long)]
        info: bool,
    },
}
