//! Конвейер обработки одного файла
//!
//! Idle → SchemaDiscovery → RowScan → Grouping → Classifying → WriteBack → Done;
//! Cancelled и Failed достижимы из любого незавершённого состояния.
//!
//! В режиме `PerSheet` после записи листа конвейер возвращается в
//! Classifying для следующего листа. Поиск строки при записи всегда идёт
//! по всем листам книги.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use okpd_common::{group_items, ClassificationResult, Group, Item};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::checkpoint::{file_fingerprint, CheckpointEntry, CheckpointManager, CheckpointRecord};
use crate::classifier::{ClassificationClient, Decider, TextModel, WebSearch};
use crate::config::{PipelineConfig, ProcessingMode};
use crate::error::{OkpdError, Result};
use crate::scanner::{scan_sheet, RowCounts, SheetScan};
use crate::schema;
use crate::workbook::Workbook;
use crate::writer::{save_workbook, ReconciliationWriter, WriteOptions, WriteReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    SchemaDiscovery,
    RowScan,
    Grouping,
    Classifying,
    WriteBack,
    Done,
    Cancelled,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Cancelled | PipelineState::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "ожидание",
            PipelineState::SchemaDiscovery => "поиск колонок",
            PipelineState::RowScan => "разбор строк",
            PipelineState::Grouping => "группировка",
            PipelineState::Classifying => "классификация",
            PipelineState::WriteBack => "запись",
            PipelineState::Done => "готово",
            PipelineState::Cancelled => "отменено",
            PipelineState::Failed => "ошибка",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    State(PipelineState),
    /// Обработано `done` групп из `total`; `label` это представитель группы
    Group { done: usize, total: usize, label: String },
}

/// Счётчики запуска
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub sheets_scanned: usize,
    pub sheets_skipped: usize,
    pub rows: RowCounts,
    pub groups: usize,
    pub groups_done: usize,
    pub groups_resumed: usize,
    pub fallbacks: usize,
    pub write: WriteReport,
}

#[derive(Debug)]
pub struct RunReport {
    pub final_state: PipelineState,
    /// Куда сохранена книга (сам файл или запасной `.backup.xlsx`)
    pub result_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
    pub failure: Option<OkpdError>,
    pub stats: RunStats,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.final_state == PipelineState::Done
    }
}

/// Путь нетронутой копии: `<имя>_original.<расширение>`
pub fn original_backup_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}_original.{}", stem, ext.to_string_lossy()),
        None => format!("{}_original", stem),
    };
    input.with_file_name(name)
}

type ProgressFn = Box<dyn FnMut(&ProgressEvent) + Send>;

/// Что нужно для аварийного чекпоинта
#[derive(Default)]
struct RunContext {
    workbook: Option<Workbook>,
    scans: Vec<SheetScan>,
    record: CheckpointRecord,
    manager: Option<CheckpointManager>,
    last_checkpoint: Option<PathBuf>,
    result_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
}

impl RunContext {
    fn save_checkpoint(&mut self) -> Result<()> {
        let Some(manager) = &self.manager else {
            return Ok(());
        };
        self.record.saved_at = chrono::Local::now().to_rfc3339();
        let path = manager.save(self.workbook.as_ref(), &self.scans, &self.record)?;
        self.last_checkpoint = Some(path);
        Ok(())
    }

    /// Чекпоинт при отмене или ошибке; собственная ошибка только в лог
    fn emergency_checkpoint(&mut self) {
        if self.workbook.is_none() || self.scans.is_empty() {
            return;
        }
        if let Err(e) = self.save_checkpoint() {
            error!("Аварийный чекпоинт не сохранён: {}", e);
        }
    }

    fn existing_checkpoint(&self) -> Option<PathBuf> {
        self.last_checkpoint.clone().or_else(|| {
            self.manager
                .as_ref()
                .map(|m| m.path().to_path_buf())
                .filter(|p| p.exists())
        })
    }
}

pub struct Orchestrator<C, S, M> {
    config: PipelineConfig,
    decider: Decider<C, S, M>,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
    state: PipelineState,
}

impl<C, S, M> Orchestrator<C, S, M>
where
    C: ClassificationClient,
    S: WebSearch,
    M: TextModel,
{
    pub fn new(config: PipelineConfig, decider: Decider<C, S, M>) -> Self {
        Self {
            config,
            decider,
            cancel: CancelToken::new(),
            progress: None,
            state: PipelineState::Idle,
        }
    }

    pub fn with_progress(mut self, callback: impl FnMut(&ProgressEvent) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Копия результата для следующего запуска
    pub fn set_output_path(&mut self, path: Option<PathBuf>) {
        self.config.output_path = path;
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn emit(&mut self, event: ProgressEvent) {
        if let Some(callback) = self.progress.as_mut() {
            callback(&event);
        }
    }

    fn transition(&mut self, state: PipelineState) {
        debug!("Состояние: {:?} → {:?}", self.state, state);
        self.state = state;
        self.emit(ProgressEvent::State(state));
    }

    /// Обрабатывает файл; ошибки попадают в отчёт
    pub async fn run(&mut self, input: &Path) -> RunReport {
        let mut ctx = RunContext::default();
        let mut stats = RunStats::default();
        self.state = PipelineState::Idle;

        let outcome = self.execute(input, &mut ctx, &mut stats).await;
        let failure = match outcome {
            Ok(()) => {
                self.transition(PipelineState::Done);
                None
            }
            Err(OkpdError::Cancelled) => {
                warn!("Обработка {} отменена", input.display());
                ctx.emergency_checkpoint();
                self.transition(PipelineState::Cancelled);
                None
            }
            Err(e) => {
                error!("Обработка {} прервана: {}", input.display(), e);
                ctx.emergency_checkpoint();
                self.transition(PipelineState::Failed);
                Some(e)
            }
        };

        RunReport {
            final_state: self.state,
            result_path: ctx.result_path.clone(),
            output_path: ctx.output_path.clone(),
            checkpoint_path: ctx.existing_checkpoint(),
            failure,
            stats,
        }
    }

    async fn execute(&mut self, input: &Path, ctx: &mut RunContext, stats: &mut RunStats) -> Result<()> {
        if !input.exists() {
            return Err(OkpdError::FileNotFound(input.display().to_string()));
        }

        let pristine = original_backup_path(input);
        if self.config.backup_original && !pristine.exists() {
            std::fs::copy(input, &pristine)?;
            info!("Создана копия исходного файла: {}", pristine.display());
        }
        let fingerprint = if pristine.exists() {
            file_fingerprint(&pristine)?
        } else {
            file_fingerprint(input)?
        };

        let checkpoint_path = self.config.checkpoint_path_for(input);
        let mode = self.config.mode.as_str();
        let resumed = match self.load_resume(&checkpoint_path, &fingerprint, mode) {
            Some(record) => {
                let results = record.results_by_representative();
                ctx.record = record;
                results
            }
            None => HashMap::new(),
        };
        let committed = ctx.record.committed_groups();
        ctx.manager = Some(CheckpointManager::new(&checkpoint_path, self.config.save_interval));
        ctx.record.input_sha256 = fingerprint;
        ctx.record.mode = mode.to_string();

        // колонки
        self.transition(PipelineState::SchemaDiscovery);
        let mut workbook = Workbook::open(input)?;
        let mut columns = Vec::new();
        for index in 0..workbook.sheets().len() {
            match schema::discover(&mut workbook, index, self.config.header_rows_to_skip) {
                Ok(map) => columns.push((index, map)),
                Err(e @ OkpdError::SchemaNotFound { .. }) => {
                    warn!("{}: лист пропущен", e);
                    stats.sheets_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if columns.is_empty() {
            return Err(OkpdError::NoUsableSheet(input.display().to_string()));
        }

        // строки
        self.transition(PipelineState::RowScan);
        let filter = self.config.build_filter()?;
        for (index, map) in columns {
            let Some(sheet) = workbook.sheet(index) else {
                continue;
            };
            let scan = scan_sheet(sheet, index, map, &filter);
            stats.rows.add(&scan.counts);
            stats.sheets_scanned += 1;
            ctx.scans.push(scan);
        }
        ctx.workbook = Some(workbook);

        // группы
        self.transition(PipelineState::Grouping);
        let passes = self.build_passes(&ctx.scans);
        let total: usize = passes.iter().map(Vec::len).sum();
        stats.groups = total;
        ctx.record.groups_total = total;
        info!(
            "{}: {} групп, проходов: {} ({})",
            input.display(),
            total,
            passes.len(),
            self.config.mode.as_str()
        );

        let options = WriteOptions {
            label_columns: self.config.label_columns,
        };
        let mut group_index = 0;
        for groups in passes {
            self.transition(PipelineState::Classifying);
            let mut results = Vec::with_capacity(groups.len());
            for group in groups {
                if self.cancel.is_cancelled() {
                    return Err(OkpdError::Cancelled);
                }
                let representative = group.representative().raw_text.clone();
                let result = match resumed.get(&representative) {
                    Some(result) => {
                        stats.groups_resumed += 1;
                        result.clone()
                    }
                    None => {
                        let decision = self.decider.decide(&representative).await;
                        if decision.fallback {
                            stats.fallbacks += 1;
                        }
                        decision.result
                    }
                };

                if !committed.contains(&group_index) {
                    commit_group(&mut ctx.record, group_index, &group, &result);
                }
                group_index += 1;
                stats.groups_done = group_index;
                self.emit(ProgressEvent::Group {
                    done: group_index,
                    total,
                    label: representative,
                });

                if ctx.manager.as_ref().is_some_and(|m| m.is_due(group_index)) {
                    if let Err(e) = ctx.save_checkpoint() {
                        warn!("Промежуточный чекпоинт не сохранён: {}", e);
                    }
                }
                results.push((group, result));
            }

            self.transition(PipelineState::WriteBack);
            let Some(workbook) = ctx.workbook.as_mut() else {
                continue;
            };
            let writer = ReconciliationWriter::new(workbook, &ctx.scans, options);
            let report = writer.write_all(workbook, &results, &self.cancel)?;
            stats.write.add(&report);
        }

        if let Some(workbook) = ctx.workbook.as_ref() {
            ctx.result_path = Some(save_workbook(workbook, input)?);
        }
        if let Err(e) = ctx.save_checkpoint() {
            warn!("Итоговый чекпоинт не сохранён: {}", e);
        }

        if let (Some(output), Some(result)) = (self.config.output_path.as_ref(), ctx.result_path.as_ref()) {
            if output != result {
                if let Some(parent) = output.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::copy(result, output)?;
                info!("Копия результата: {}", output.display());
                ctx.output_path = Some(output.clone());
            }
        }

        Ok(())
    }

    fn build_passes(&self, scans: &[SheetScan]) -> Vec<Vec<Group>> {
        match self.config.mode {
            ProcessingMode::Shared => {
                let items: Vec<Item> = scans.iter().flat_map(|s| s.items.iter().cloned()).collect();
                vec![group_items(items)]
            }
            ProcessingMode::PerSheet => scans
                .iter()
                .map(|s| group_items(s.items.clone()))
                .filter(|groups| !groups.is_empty())
                .collect(),
        }
    }

    /// Прежний чекпоинт, если он от того же файла и режима
    ///
    /// Записи чекпоинта переходят в новый запуск целиком, поэтому
    /// следующий чекпоинт содержит все прежние группы.
    fn load_resume(&self, checkpoint: &Path, fingerprint: &str, mode: &str) -> Option<CheckpointRecord> {
        if !self.config.resume || !checkpoint.exists() {
            return None;
        }
        match CheckpointManager::load(checkpoint) {
            Ok(record) if record.input_sha256 == fingerprint && record.mode == mode => {
                info!(
                    "Продолжение с чекпоинта {}: {} готовых групп",
                    checkpoint.display(),
                    record.committed_groups().len()
                );
                Some(record)
            }
            Ok(record) if record.input_sha256 == fingerprint => {
                warn!(
                    "Чекпоинт {} записан в режиме {}, начинаю заново",
                    checkpoint.display(),
                    record.mode
                );
                None
            }
            Ok(_) => {
                warn!("Чекпоинт {} от другого файла, начинаю заново", checkpoint.display());
                None
            }
            Err(e) => {
                warn!("Чекпоинт {} не прочитан: {}", checkpoint.display(), e);
                None
            }
        }
    }
}

fn commit_group(record: &mut CheckpointRecord, index: usize, group: &Group, result: &ClassificationResult) {
    let representative = &group.representative().raw_text;
    for member in &group.members {
        record.entries.push(CheckpointEntry {
            sheet: member.sheet.clone(),
            row: member.row,
            group: index,
            representative: representative.clone(),
            item: member.raw_text.clone(),
            result: result.clone(),
        });
    }
    record.groups_done = record.groups_done.max(index + 1);
}
