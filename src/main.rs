use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use okpd_common::{group_items, CodeEntry};
use okpd_rust::ai_provider::AiProvider;
use okpd_rust::checkpoint::CheckpointManager;
use okpd_rust::classifier::cache::{CLASSIFIER_CACHE_FILE, SEARCH_CACHE_FILE};
use okpd_rust::classifier::{
    CachedClassifier, CachedSearch, CatalogClassifier, ClassificationClient, CliTextModel, CliWebSearch, Decider,
    JsonCache, NoSearch, WebSearch,
};
use okpd_rust::cli::{Cli, Commands};
use okpd_rust::config::{Config, PipelineConfig};
use okpd_rust::orchestrator::{Orchestrator, PipelineState, ProgressEvent, RunReport};
use okpd_rust::scanner::scan_sheet;
use okpd_rust::workbook::Workbook;
use okpd_rust::{schema, CancelToken};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

fn setup_tracing(verbose: bool) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Классификатор с кэшем или без
enum Classifier {
    Cached(CachedClassifier<CatalogClassifier>),
    Plain(CatalogClassifier),
}

impl ClassificationClient for Classifier {
    async fn classify(&self, texts: &[String]) -> okpd_rust::Result<HashMap<String, Vec<CodeEntry>>> {
        match self {
            Classifier::Cached(inner) => inner.classify(texts).await,
            Classifier::Plain(inner) => inner.classify(texts).await,
        }
    }
}

enum Search {
    Off(NoSearch),
    Cached(CachedSearch<CliWebSearch>),
    Plain(CliWebSearch),
}

impl WebSearch for Search {
    async fn search(&self, query: &str) -> okpd_rust::Result<Vec<String>> {
        match self {
            Search::Off(inner) => inner.search(query).await,
            Search::Cached(inner) => inner.search(query).await,
            Search::Plain(inner) => inner.search(query).await,
        }
    }
}

/// Книги для обработки; служебные файлы пропускаются
fn collect_inputs(input: &Path, recursive: bool, checkpoint_name: &str) -> anyhow::Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("Файл не найден: {}", input.display());
    }

    let checkpoint_suffix = format!(".{}", checkpoint_name.to_lowercase());
    let depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let lower = name.to_lowercase();
            lower.ends_with(".xlsx")
                && !lower.ends_with("_original.xlsx")
                && !lower.ends_with(".backup.xlsx")
                && !lower.ends_with(&checkpoint_suffix)
                && !name.starts_with('.')
                && !name.starts_with("~$")
                && name != checkpoint_name
        })
        .collect();
    files.sort();
    Ok(files)
}

fn print_report(input: &Path, report: &RunReport) {
    let stats = &report.stats;
    let mark = match report.final_state {
        PipelineState::Done => "✔",
        PipelineState::Cancelled => "⏹",
        _ => "✘",
    };
    println!("{} {}: {}", mark, input.display(), report.final_state.label());
    println!(
        "  листов: {} (пропущено {}), строк данных: {}, шум: {}, пустых: {}, ошибок чтения: {}",
        stats.sheets_scanned,
        stats.sheets_skipped,
        stats.rows.data,
        stats.rows.noise,
        stats.rows.empty,
        stats.rows.read_errors
    );
    println!(
        "  групп: {}/{} (из чекпоинта {}), резервных кодов: {}",
        stats.groups_done, stats.groups, stats.groups_resumed, stats.fallbacks
    );
    println!(
        "  записано: {}, не найдено: {}, формул пропущено: {}",
        stats.write.cells_written, stats.write.not_found, stats.write.formula_skipped
    );
    if let Some(path) = &report.result_path {
        println!("  результат: {}", path.display());
    }
    if let Some(path) = &report.output_path {
        println!("  копия: {}", path.display());
    }
    if let Some(path) = &report.checkpoint_path {
        println!("  чекпоинт: {}", path.display());
    }
    if let Some(failure) = &report.failure {
        println!("  ошибка: {}", failure);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);
    let mut config = Config::load()?;

    match cli.command {
        Commands::Run {
            input,
            output,
            checkpoint,
            save_interval,
            header_rows,
            mode,
            labels,
            resume,
            catalog,
            no_search,
            no_cache,
            recursive,
        } => {
            let provider = cli
                .ai_provider
                .or_else(|| AiProvider::from_name(&config.ai_provider))
                .unwrap_or(AiProvider::Claude);

            let mut pipeline = PipelineConfig::from_config(&config);
            pipeline.checkpoint_path = checkpoint;
            if let Some(interval) = save_interval {
                pipeline.save_interval = interval.max(1);
            }
            if let Some(rows) = header_rows {
                pipeline.header_rows_to_skip = rows;
            }
            if let Some(mode) = mode {
                pipeline.mode = mode;
            }
            pipeline.label_columns |= labels;
            pipeline.resume = resume;

            let files = collect_inputs(&input, recursive, &pipeline.checkpoint_name)?;
            if files.is_empty() {
                bail!("В {} нет файлов .xlsx", input.display());
            }
            if files.len() > 1 && pipeline.checkpoint_path.is_some() {
                bail!("--checkpoint задаётся только для одного файла: у каждого файла свой чекпоинт");
            }

            let catalog_path = catalog
                .or_else(|| config.catalog_path.clone())
                .context("Не задан справочник ОКПД2: --catalog или `okpd config --set-catalog`")?;
            let catalog = CatalogClassifier::load(&catalog_path)?;

            let cache_dir = config.cache_dir()?;
            let model = CliTextModel::new(provider, Duration::from_secs(config.model_timeout_seconds));
            let classifier = if no_cache {
                Classifier::Plain(catalog)
            } else {
                Classifier::Cached(CachedClassifier::in_dir(catalog, &cache_dir))
            };
            let search = match (no_search || !config.web_search, no_cache) {
                (true, _) => Search::Off(NoSearch),
                (false, true) => Search::Plain(CliWebSearch::new(model.clone())),
                (false, false) => Search::Cached(CachedSearch::in_dir(CliWebSearch::new(model.clone()), &cache_dir)),
            };

            println!("📄 okpd - {} файл(ов), AI: {}\n", files.len(), provider.command_name());

            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("=> "),
            );
            let callback_bar = bar.clone();

            let cancel = CancelToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal_token.cancel();
                }
            });

            let mut orchestrator = Orchestrator::new(pipeline, Decider::new(classifier, search, model))
                .with_cancel_token(cancel.clone())
                .with_progress(move |event| match event {
                    ProgressEvent::State(state) => callback_bar.set_message(state.label()),
                    ProgressEvent::Group { done, total, label } => {
                        callback_bar.set_length(*total as u64);
                        callback_bar.set_position(*done as u64);
                        callback_bar.set_message(label.clone());
                    }
                });

            let output_is_dir = files.len() > 1 || output.as_deref().is_some_and(Path::is_dir);
            let mut failed = 0;
            for file in &files {
                let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                let target = output.as_ref().map(|out| if output_is_dir { out.join(&name) } else { out.clone() });
                orchestrator.set_output_path(target);

                bar.reset();
                bar.set_prefix(name);
                let report = orchestrator.run(file).await;
                bar.finish_and_clear();

                print_report(file, &report);
                match report.final_state {
                    PipelineState::Done => {}
                    PipelineState::Cancelled => {
                        println!("\nОстановлено пользователем");
                        break;
                    }
                    _ => failed += 1,
                }
            }

            if failed > 0 {
                bail!("Не обработано файлов: {}", failed);
            }
            println!("\n✅ Готово");
        }

        Commands::Inspect { input, header_rows, rows } => {
            let mut pipeline = PipelineConfig::from_config(&config);
            if let Some(rows) = header_rows {
                pipeline.header_rows_to_skip = rows;
            }
            let filter = pipeline.build_filter()?;
            let workbook = Workbook::open(&input)?;

            for (index, sheet) in workbook.sheets().iter().enumerate() {
                let columns = match schema::detect(sheet, pipeline.header_rows_to_skip) {
                    Ok(columns) => columns,
                    Err(e) => {
                        println!("✘ {}", e);
                        continue;
                    }
                };
                let scan = scan_sheet(sheet, index, columns, &filter);
                let groups = group_items(scan.items.clone());
                println!("Лист '{}'", sheet.name());
                println!(
                    "  наименование: колонка {}, код: колонка {}{}, документ: {}",
                    columns.item_column,
                    columns.code_column,
                    if columns.code_synthesized { " (новая)" } else { "" },
                    columns.doc_column.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
                );
                println!(
                    "  строк: данные {}, шум {}, пустые {}, заголовок {}, ошибки {}; групп: {}",
                    scan.counts.data,
                    scan.counts.noise,
                    scan.counts.empty,
                    scan.counts.header,
                    scan.counts.read_errors,
                    groups.len()
                );
                if rows {
                    for item in &scan.items {
                        println!("  {:>5}  {}", item.row, item.raw_text);
                    }
                }
            }
        }

        Commands::Checkpoint { path } => {
            let record = CheckpointManager::load(&path)?;
            println!("Чекпоинт: {}", path.display());
            println!("  групп: {}/{}", record.groups_done, record.groups_total);
            println!("  строк с кодом: {}", record.entries.len());
            println!("  режим: {}", record.mode);
            println!("  SHA-256: {}", record.input_sha256);
            println!("  сохранён: {}", record.saved_at);
        }

        Commands::Config {
            show,
            set_catalog,
            set_save_interval,
            set_mode,
        } => {
            let mut changed = false;
            if let Some(path) = set_catalog {
                config.catalog_path = Some(path);
                changed = true;
            }
            if let Some(interval) = set_save_interval {
                config.save_interval = interval.max(1);
                changed = true;
            }
            if let Some(mode) = set_mode {
                config.mode = mode;
                changed = true;
            }
            if changed {
                config.save()?;
                println!("✔ Настройки сохранены: {}", Config::config_path()?.display());
            }

            if show || !changed {
                println!("Настройки:");
                println!("  AI: {}", config.ai_provider);
                println!("  таймаут модели: {} с", config.model_timeout_seconds);
                println!("  чекпоинт: {} (каждые {} групп)", config.checkpoint_name, config.save_interval);
                println!("  строк заголовка: {}", config.header_rows);
                println!("  режим: {}", config.mode.as_str());
                println!("  название и комментарий: {}", if config.label_columns { "да" } else { "нет" });
                println!("  поиск контекста: {}", if config.web_search { "да" } else { "нет" });
                println!(
                    "  справочник: {}",
                    config
                        .catalog_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "не задан".into())
                );
                println!("  кэш: {}", config.cache_dir()?.display());
            }
        }

        Commands::Cache { clear, info } => {
            let cache_dir = config.cache_dir()?;
            for file in [CLASSIFIER_CACHE_FILE, SEARCH_CACHE_FILE] {
                let cache: JsonCache<serde_json::Value> = JsonCache::load(cache_dir.join(file));
                if clear {
                    cache.clear()?;
                    println!("✔ Удалён кэш: {}", cache.path().display());
                }
                if info || !clear {
                    println!("{}: {} записей", cache.path().display(), cache.len());
                }
            }
        }
    }

    Ok(())
}
