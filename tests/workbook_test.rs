//! Чтение книг: колонки, справочник, ошибки

mod fixtures;

use fixtures::{cell_text, BookBuilder};
use okpd_rust::checkpoint::CheckpointManager;
use okpd_rust::classifier::CatalogClassifier;
use okpd_rust::config::Config;
use okpd_rust::workbook::Workbook;
use okpd_rust::writer::save_workbook;
use okpd_rust::{schema, OkpdError};
use tempfile::tempdir;

/// Созданный заголовок колонки кода сохраняется в файле
#[test]
fn test_synthesized_code_header_saved() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("ведомость.xlsx");
    BookBuilder::new()
        .sheet("Лист1")
        .row(1, &["Наименование", "Ед."])
        .row(2, &["Болт М6", "шт"])
        .row(3, &["Гайка М8", "шт"])
        .row(4, &["Шайба 10", "шт"])
        .save(&path);

    let mut workbook = Workbook::open(&path).expect("открытие книги");
    let map = schema::discover(&mut workbook, 0, 1).expect("колонки");
    assert!(map.code_synthesized);
    assert_eq!(map.code_column, 3);

    save_workbook(&workbook, &path).expect("сохранение");
    assert_eq!(cell_text(&path, "Лист1", 1, 3).as_deref(), Some("Код ОКП/ОКПД2"));
    assert_eq!(cell_text(&path, "Лист1", 2, 1).as_deref(), Some("Болт М6"));
}

/// Лист без колонки наименований
#[test]
fn test_schema_not_found() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("пусто.xlsx");
    BookBuilder::new()
        .sheet("Лист1")
        .row(1, &["1", "2"])
        .save(&path);

    let mut workbook = Workbook::open(&path).expect("открытие книги");
    let err = schema::discover(&mut workbook, 0, 0).unwrap_err();
    assert!(matches!(err, OkpdError::SchemaNotFound { .. }));
    assert_eq!(workbook.pending_edits(), 0);
}

/// Справочник из xlsx: код в первой колонке, название во второй
#[tokio::test]
async fn test_catalog_from_workbook() {
    use okpd_rust::classifier::ClassificationClient;

    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("окпд2.xlsx");
    BookBuilder::new()
        .sheet("Коды")
        .row(1, &["Код", "Наименование"])
        .row(2, &["25.94.11.120", "Болты и винты из черных металлов"])
        .row(3, &["25.94.12.110", "Гайки из черных металлов"])
        .save(&path);

    let catalog = CatalogClassifier::load(&path).expect("справочник");
    assert_eq!(catalog.len(), 2);

    let found = catalog
        .classify(&["Гайки стальные".to_string()])
        .await
        .expect("поиск");
    let entries = &found["Гайки стальные"];
    assert_eq!(entries[0].code, "25.94.12.110");
}

#[test]
fn test_missing_files() {
    let dir = tempdir().expect("Failed to create temp dir");
    let missing = dir.path().join("нет.xlsx");

    assert!(matches!(Workbook::open(&missing), Err(OkpdError::FileNotFound(_))));
    assert!(matches!(CatalogClassifier::load(&missing), Err(OkpdError::FileNotFound(_))));
    assert!(matches!(CheckpointManager::load(&missing), Err(OkpdError::FileNotFound(_))));
}

/// Обычная книга не является чекпоинтом
#[test]
fn test_checkpoint_requires_bookkeeping_sheets() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("книга.xlsx");
    BookBuilder::new()
        .sheet("Лист1")
        .row(1, &["Наименование"])
        .save(&path);

    let err = CheckpointManager::load(&path).unwrap_err();
    assert!(matches!(err, OkpdError::Checkpoint(_)));
}

#[test]
fn test_broken_files() {
    let dir = tempdir().expect("Failed to create temp dir");
    let book = dir.path().join("битый.xlsx");
    std::fs::write(&book, b"not a zip").expect("запись");
    assert!(Workbook::open(&book).is_err());

    let config = dir.path().join("config.json");
    std::fs::write(&config, "{ broken").expect("запись");
    assert!(matches!(Config::load_from(&config), Err(OkpdError::JsonParse(_))));
}

#[test]
fn test_error_messages() {
    let err = OkpdError::from(std::io::Error::new(std::io::ErrorKind::Other, "диск"));
    assert!(matches!(err, OkpdError::Io(_)));

    let err = OkpdError::SchemaNotFound { sheet: "Лист2".into() };
    assert!(err.to_string().contains("Лист2"));

    let err = OkpdError::from(okpd_common::Error::Config("шаблон".into()));
    assert!(err.to_string().contains("шаблон"));
}
