//! Конвейер целиком на настоящих файлах xlsx
//!
//! Классификатор и модель заменены детерминированными заглушками.

mod fixtures;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fixtures::{cell, cell_text, BookBuilder};
use okpd_common::types::{FALLBACK_CODE, FALLBACK_COMMENT, FALLBACK_LABEL};
use okpd_common::{CodeEntry, Message};
use okpd_rust::checkpoint::CheckpointManager;
use okpd_rust::classifier::{ClassificationClient, Decider, NoSearch, TextModel};
use okpd_rust::config::{PipelineConfig, ProcessingMode};
use okpd_rust::orchestrator::{Orchestrator, PipelineState, ProgressEvent};
use okpd_rust::workbook::Cell;
use okpd_rust::{CancelToken, OkpdError, Result};
use tempfile::tempdir;

/// Код зависит только от длины термина
fn code_for(term: &str) -> String {
    format!("25.{}.11.120", term.chars().count())
}

#[derive(Clone, Default)]
struct MockClassifier {
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockClassifier {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ClassificationClient for MockClassifier {
    async fn classify(&self, texts: &[String]) -> Result<HashMap<String, Vec<CodeEntry>>> {
        self.calls.lock().unwrap().extend(texts.iter().cloned());
        if let Some(bad) = texts.iter().find(|t| t.contains("неизвестный")) {
            return Err(OkpdError::ClassificationService {
                term: bad.clone(),
                reason: "503".into(),
            });
        }
        Ok(texts
            .iter()
            .map(|t| (t.clone(), vec![CodeEntry::new(code_for(t), format!("Код для {}", t))]))
            .collect())
    }
}

/// Упрощение возвращает термин как есть, выбор берёт первый вариант
struct EchoModel;

impl TextModel for EchoModel {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let prompt = &messages.last().expect("сообщение").content;
        if let Some(options) = prompt.split("Варианты:\n").nth(1) {
            return Ok(options.split(" — ").next().unwrap_or_default().to_string());
        }
        Ok(prompt
            .split("Название: ")
            .nth(1)
            .and_then(|s| s.lines().next())
            .unwrap_or_default()
            .to_string())
    }
}

fn config(dir: &Path, header_rows: usize) -> PipelineConfig {
    PipelineConfig {
        header_rows_to_skip: header_rows,
        checkpoint_path: Some(dir.join("checkpoint.xlsx")),
        ..PipelineConfig::default()
    }
}

fn orchestrator(
    config: PipelineConfig,
    classifier: MockClassifier,
) -> Orchestrator<MockClassifier, NoSearch, EchoModel> {
    Orchestrator::new(config, Decider::new(classifier, NoSearch, EchoModel))
}

fn simple_book(path: &Path, items: &[&str]) {
    let mut builder = BookBuilder::new().sheet("Лист1").row(1, &["Наименование", "Код ОКПД2"]);
    for (i, item) in items.iter().enumerate() {
        builder = builder.row(i as u32 + 2, &[*item]);
    }
    builder.save(path);
}

/// Заголовок 5 строк и строка итога: коды получают только данные
#[tokio::test]
async fn test_header_skip_and_noise_row() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("заказ.xlsx");
    BookBuilder::new()
        .sheet("Лист1")
        .row(1, &["№", "Наименование", "Код ОКПД2"])
        .row(2, &["", "Раздел 1. Материалы"])
        .row(3, &["", "Поставщик ООО Ромашка"])
        .row(4, &["", "Договор 15"])
        .row(5, &["", "Склад основной"])
        .row(6, &["", "Единицы измерения"])
        .row(7, &["1", "Лист алюминиевый 2мм"])
        .row(8, &["", "ВСЕГО по разделу 1"])
        .row(9, &["2", "Болт М6"])
        .save(&input);

    let mut orchestrator = orchestrator(config(dir.path(), 5), MockClassifier::default());
    let report = orchestrator.run(&input).await;

    assert_eq!(report.final_state, PipelineState::Done, "{:?}", report.failure);
    assert_eq!(report.stats.rows.noise, 1);
    assert_eq!(report.stats.groups, 2);
    assert_eq!(cell_text(&input, "Лист1", 7, 3).as_deref(), Some("25.16.11.120"));
    assert_eq!(cell_text(&input, "Лист1", 8, 3), None);
    assert_eq!(cell_text(&input, "Лист1", 9, 3).as_deref(), Some("25.4.11.120"));
    for row in 2..=6 {
        assert_eq!(cell_text(&input, "Лист1", row, 3), None, "строка {}", row);
    }
    assert!(dir.path().join("заказ_original.xlsx").exists());
}

/// "Болт М6" и "Болт М8" одна группа и один запрос
#[tokio::test]
async fn test_one_group_one_request() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("болты.xlsx");
    simple_book(&input, &["Болт М6", "Болт М8"]);

    let classifier = MockClassifier::default();
    let mut orchestrator = orchestrator(config(dir.path(), 0), classifier.clone());
    let report = orchestrator.run(&input).await;

    assert!(report.is_success());
    assert_eq!(report.stats.groups, 1);
    assert_eq!(classifier.calls(), vec!["болт".to_string()]);
    let first = cell_text(&input, "Лист1", 2, 2);
    assert_eq!(first.as_deref(), Some("25.4.11.120"));
    assert_eq!(cell_text(&input, "Лист1", 3, 2), first);
}

fn three_sheet_book(path: &Path) {
    BookBuilder::new()
        .sheet("Лист1")
        .row(1, &["Наименование", "Код ОКПД2"])
        .row(2, &["Гайка М8"])
        .sheet("Лист2")
        .row(1, &["Наименование", "Код ОКПД2"])
        .row(2, &["Шайба плоская"])
        .row(3, &["Гайка М8"])
        .sheet("Лист3")
        .row(1, &["Наименование", "Код ОКПД2"])
        .row(2, &["Труба стальная"])
        .save(path);
}

/// Строка второго листа находится, повтор текста уходит в первое вхождение
#[tokio::test]
async fn test_three_sheets_first_match() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("три листа.xlsx");
    three_sheet_book(&input);

    let mut orchestrator = orchestrator(config(dir.path(), 0), MockClassifier::default());
    let report = orchestrator.run(&input).await;

    assert!(report.is_success());
    assert_eq!(report.stats.sheets_scanned, 3);
    assert_eq!(cell_text(&input, "Лист2", 2, 2).as_deref(), Some("25.13.11.120"));
    assert_eq!(cell_text(&input, "Лист1", 2, 2).as_deref(), Some("25.5.11.120"));
    assert_eq!(cell_text(&input, "Лист2", 3, 2), None);
    assert_eq!(cell_text(&input, "Лист3", 2, 2).as_deref(), Some("25.14.11.120"));
}

/// Отдельный проход на лист, поиск при записи по всей книге
#[tokio::test]
async fn test_per_sheet_mode() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("по листам.xlsx");
    three_sheet_book(&input);

    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = states.clone();
    let mut cfg = config(dir.path(), 0);
    cfg.mode = ProcessingMode::PerSheet;
    let classifier = MockClassifier::default();
    let mut orchestrator = orchestrator(cfg, classifier.clone()).with_progress(move |event| {
        if let ProgressEvent::State(state) = event {
            seen.lock().unwrap().push(*state);
        }
    });
    let report = orchestrator.run(&input).await;

    assert!(report.is_success());
    assert_eq!(report.stats.groups, 4);
    assert_eq!(classifier.calls().len(), 4);
    assert_eq!(cell_text(&input, "Лист2", 3, 2), None);
    let classifying = states
        .lock()
        .unwrap()
        .iter()
        .filter(|s| **s == PipelineState::Classifying)
        .count();
    assert_eq!(classifying, 3);
}

const TEN_ITEMS: [&str; 10] = [
    "Болт М6",
    "Гайка М8",
    "Шайба 10",
    "Труба стальная",
    "Лист алюминиевый",
    "Уголок 50х50",
    "Швеллер 10П",
    "Проволока 2мм",
    "Краска белая",
    "Доска обрезная",
];

/// Запуск с отменой после `stop` групп
async fn cancel_after(cfg: PipelineConfig, input: &Path, stop: usize) -> okpd_rust::RunReport {
    let token = CancelToken::new();
    let trigger = token.clone();
    let mut orchestrator = orchestrator(cfg, MockClassifier::default())
        .with_cancel_token(token)
        .with_progress(move |event| {
            if let ProgressEvent::Group { done, .. } = event {
                if *done == stop {
                    trigger.cancel();
                }
            }
        });
    orchestrator.run(input).await
}

async fn cancel_after_three(dir: &Path, input: &Path) -> okpd_rust::RunReport {
    cancel_after(config(dir, 0), input, 3).await
}

/// Отмена после 3 из 10 групп: в чекпоинте ровно 3 группы
#[tokio::test]
async fn test_cancel_keeps_committed_groups() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("десять.xlsx");
    simple_book(&input, &TEN_ITEMS);

    let report = cancel_after_three(dir.path(), &input).await;

    assert_eq!(report.final_state, PipelineState::Cancelled);
    assert!(report.failure.is_none());
    assert_eq!(report.stats.groups_done, 3);
    let checkpoint = report.checkpoint_path.expect("чекпоинт");

    let record = CheckpointManager::load(&checkpoint).expect("чтение чекпоинта");
    assert_eq!(record.committed_groups(), BTreeSet::from([0, 1, 2]));
    assert_eq!(record.entries.len(), 3);
    assert_eq!(record.groups_done, 3);
    assert_eq!(record.groups_total, 10);

    assert_eq!(cell_text(&checkpoint, "Лист1", 2, 2).as_deref(), Some("25.4.11.120"));
    assert_eq!(cell_text(&checkpoint, "Лист1", 5, 2), None);
    assert_eq!(cell_text(&checkpoint, "Лист1", 5, 1).as_deref(), Some("Труба стальная"));

    // исходный файл не тронут
    for row in 2..=11 {
        assert_eq!(cell_text(&input, "Лист1", row, 2), None);
    }
}

/// Продолжение с чекпоинта не спрашивает готовые группы повторно
#[tokio::test]
async fn test_resume_skips_committed_groups() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("десять.xlsx");
    simple_book(&input, &TEN_ITEMS);
    cancel_after_three(dir.path(), &input).await;

    let mut cfg = config(dir.path(), 0);
    cfg.resume = true;
    let classifier = MockClassifier::default();
    let mut orchestrator = orchestrator(cfg, classifier.clone());
    let report = orchestrator.run(&input).await;

    assert!(report.is_success());
    assert_eq!(report.stats.groups_resumed, 3);
    assert_eq!(classifier.calls().len(), 7);
    assert!(!classifier.calls().contains(&"болт".to_string()));
    for row in 2..=11 {
        assert!(cell_text(&input, "Лист1", row, 2).is_some(), "строка {}", row);
    }
}

/// Продолжение с частым сохранением: чекпоинт только растёт
#[tokio::test]
async fn test_resumed_checkpoint_keeps_earlier_groups() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("десять.xlsx");
    simple_book(&input, &TEN_ITEMS);
    let first = cancel_after_three(dir.path(), &input).await;
    let checkpoint = first.checkpoint_path.expect("чекпоинт");

    let mut cfg = config(dir.path(), 0);
    cfg.resume = true;
    cfg.save_interval = 1;

    // отмена сразу после первой восстановленной группы
    let report = cancel_after(cfg.clone(), &input, 1).await;
    assert_eq!(report.final_state, PipelineState::Cancelled);
    let record = CheckpointManager::load(&checkpoint).expect("чтение чекпоинта");
    assert_eq!(record.committed_groups(), BTreeSet::from([0, 1, 2]));
    assert_eq!(record.groups_done, 3);
    assert_eq!(record.entries.len(), 3);

    // две новые группы дописываются к прежним
    let report = cancel_after(cfg, &input, 5).await;
    assert_eq!(report.final_state, PipelineState::Cancelled);
    assert_eq!(report.stats.groups_resumed, 3);
    let record = CheckpointManager::load(&checkpoint).expect("чтение чекпоинта");
    assert_eq!(record.committed_groups(), BTreeSet::from([0, 1, 2, 3, 4]));
    assert_eq!(record.groups_done, 5);
    assert_eq!(record.entries.len(), 5);
    assert_eq!(cell_text(&checkpoint, "Лист1", 6, 2).as_deref(), Some("25.16.11.120"));
}

/// Файлы одного каталога пишут каждый свой чекпоинт
#[tokio::test]
async fn test_checkpoint_per_input_file() {
    let dir = tempdir().expect("Failed to create temp dir");
    let first = dir.path().join("a.xlsx");
    let second = dir.path().join("b.xlsx");
    simple_book(&first, &TEN_ITEMS);
    simple_book(&second, &["Болт М6"]);
    let cfg = PipelineConfig {
        header_rows_to_skip: 0,
        ..PipelineConfig::default()
    };

    let report_a = cancel_after(cfg.clone(), &first, 3).await;
    let mut orchestrator = orchestrator(cfg, MockClassifier::default());
    let report_b = orchestrator.run(&second).await;

    assert!(report_b.is_success());
    let checkpoint_a = report_a.checkpoint_path.expect("чекпоинт a");
    let checkpoint_b = report_b.checkpoint_path.expect("чекпоинт b");
    assert_eq!(checkpoint_a, dir.path().join("a.checkpoint.xlsx"));
    assert_eq!(checkpoint_b, dir.path().join("b.checkpoint.xlsx"));

    let record = CheckpointManager::load(&checkpoint_a).expect("чтение чекпоинта");
    assert_eq!(record.committed_groups(), BTreeSet::from([0, 1, 2]));
    assert_eq!(record.groups_total, 10);
    let record = CheckpointManager::load(&checkpoint_b).expect("чтение чекпоинта");
    assert_eq!(record.groups_total, 1);
}

/// Книгу не удалось сохранить: аварийный чекпоинт и отчёт об ошибке
#[tokio::test]
async fn test_failed_save_leaves_checkpoint() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("заказ.xlsx");
    simple_book(&input, &["Болт М6", "Гайка М8"]);

    // исходный файл исчезает перед записью, сохранять не из чего
    let doomed = input.clone();
    let mut orchestrator = orchestrator(config(dir.path(), 0), MockClassifier::default()).with_progress(
        move |event| {
            if let ProgressEvent::State(PipelineState::WriteBack) = event {
                let _ = std::fs::remove_file(&doomed);
            }
        },
    );
    let report = orchestrator.run(&input).await;

    assert_eq!(report.final_state, PipelineState::Failed);
    assert!(matches!(report.failure, Some(OkpdError::WorkbookSave { .. })));
    assert!(report.result_path.is_none());
    let checkpoint = report.checkpoint_path.expect("чекпоинт");
    assert_eq!(checkpoint, dir.path().join("checkpoint.xlsx"));

    let record = CheckpointManager::load(&checkpoint).expect("чтение чекпоинта");
    assert_eq!(record.committed_groups(), BTreeSet::from([0, 1]));
    assert_eq!(cell_text(&checkpoint, "Лист1", 3, 2).as_deref(), Some("25.5.11.120"));
}

/// Ошибка сервиса даёт резервный код, название и комментарий
#[tokio::test]
async fn test_service_error_fallback() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("неизвестное.xlsx");
    simple_book(&input, &["неизвестный болт"]);

    let mut cfg = config(dir.path(), 0);
    cfg.label_columns = true;
    let mut orchestrator = orchestrator(cfg, MockClassifier::default());
    let report = orchestrator.run(&input).await;

    assert!(report.is_success());
    assert_eq!(report.stats.fallbacks, 1);
    assert_eq!(cell_text(&input, "Лист1", 2, 2).as_deref(), Some(FALLBACK_CODE));
    assert_eq!(cell_text(&input, "Лист1", 2, 3).as_deref(), Some(FALLBACK_LABEL));
    assert_eq!(cell_text(&input, "Лист1", 2, 4).as_deref(), Some(FALLBACK_COMMENT));
    assert_eq!(cell_text(&input, "Лист1", 1, 3).as_deref(), Some("Название кода"));
    assert_eq!(cell_text(&input, "Лист1", 1, 4).as_deref(), Some("Комментарий"));
}

/// Формула в колонке кода остаётся формулой
#[tokio::test]
async fn test_formula_code_cell_is_kept() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("формулы.xlsx");
    BookBuilder::new()
        .sheet("Лист1")
        .row(1, &["Наименование", "Код ОКПД2"])
        .row(2, &["Болт М6", "=1+1"])
        .row(3, &["Гайка М8"])
        .save(&input);

    let mut orchestrator = orchestrator(config(dir.path(), 0), MockClassifier::default());
    let report = orchestrator.run(&input).await;

    assert!(report.is_success());
    assert_eq!(report.stats.write.formula_skipped, 1);
    assert_eq!(cell(&input, "Лист1", 2, 2), Some(Cell::Formula("=1+1".into())));
    assert_eq!(cell_text(&input, "Лист1", 3, 2).as_deref(), Some("25.5.11.120"));
}

/// Переходы состояний и копия результата
#[tokio::test]
async fn test_states_and_output_copy() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("заказ.xlsx");
    simple_book(&input, &["Болт М6"]);

    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = states.clone();
    let mut cfg = config(dir.path(), 0);
    let output: PathBuf = dir.path().join("out").join("результат.xlsx");
    cfg.output_path = Some(output.clone());
    let mut orchestrator = orchestrator(cfg, MockClassifier::default()).with_progress(move |event| {
        if let ProgressEvent::State(state) = event {
            seen.lock().unwrap().push(*state);
        }
    });
    let report = orchestrator.run(&input).await;

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            PipelineState::SchemaDiscovery,
            PipelineState::RowScan,
            PipelineState::Grouping,
            PipelineState::Classifying,
            PipelineState::WriteBack,
            PipelineState::Done,
        ]
    );
    assert_eq!(report.output_path.as_deref(), Some(output.as_path()));
    assert_eq!(cell_text(&output, "Лист1", 2, 2).as_deref(), Some("25.4.11.120"));
    assert!(report.checkpoint_path.is_some());
}

/// Нет ни одного листа с наименованиями
#[tokio::test]
async fn test_no_usable_sheet_fails() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("пусто.xlsx");
    BookBuilder::new().sheet("Лист1").row(1, &["a", "b"]).save(&input);

    let mut orchestrator = orchestrator(config(dir.path(), 0), MockClassifier::default());
    let report = orchestrator.run(&input).await;

    assert_eq!(report.final_state, PipelineState::Failed);
    assert!(matches!(report.failure, Some(OkpdError::NoUsableSheet(_))));
    assert!(report.checkpoint_path.is_none());
}

/// Несуществующий файл
#[tokio::test]
async fn test_missing_input_fails() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut orchestrator = orchestrator(config(dir.path(), 0), MockClassifier::default());
    let report = orchestrator.run(&dir.path().join("нет.xlsx")).await;

    assert_eq!(report.final_state, PipelineState::Failed);
    assert!(matches!(report.failure, Some(OkpdError::FileNotFound(_))));
}
