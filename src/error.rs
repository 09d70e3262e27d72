use thiserror::Error;

#[derive(Error, Debug)]
pub enum OkpdError {
    #[error("Ошибка настроек: {0}")]
    Config(String),

    #[error("Файл не найден: {0}")]
    FileNotFound(String),

    #[error("Не найдена колонка наименований на листе '{sheet}'")]
    SchemaNotFound { sheet: String },

    #[error("Ни на одном листе не найдена колонка наименований: {0}")]
    NoUsableSheet(String),

    #[error("Не удалось прочитать строку {row} листа '{sheet}': {reason}")]
    RowRead { sheet: String, row: u32, reason: String },

    #[error("Ошибка сервиса классификации для '{term}': {reason}")]
    ClassificationService { term: String, reason: String },

    #[error("Строка '{item}' не найдена ни на одном листе")]
    WriteBackNotFound { item: String },

    #[error("Не удалось сохранить книгу {path}: {reason}")]
    WorkbookSave { path: String, reason: String },

    #[error("Обработка остановлена пользователем")]
    Cancelled,

    #[error("Ошибка чекпоинта: {0}")]
    Checkpoint(String),

    #[error("Ошибка запуска CLI: {0}")]
    CliExecution(String),

    #[error("Некорректный файл Excel: {0}")]
    InvalidWorkbook(String),

    #[error("Ошибка чтения Excel: {0}")]
    XlsxRead(#[from] calamine::XlsxError),

    #[error("Ошибка записи Excel: {0}")]
    XlsxWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("Ошибка архива xlsx: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Ошибка XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Ошибка атрибута XML: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    #[error("Ошибка разбора JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] okpd_common::Error),
}

pub type Result<T> = std::result::Result<T, OkpdError>;
