//! Текстовая модель через AI CLI (claude / codex / gemini)

use std::time::Duration;

use okpd_common::parser::parse_string_list;
use okpd_common::prompts::{build_search_prompt, render_messages};
use okpd_common::Message;
use tokio::process::Command;
use tracing::debug;

use super::{TextModel, WebSearch};
use crate::ai_provider::AiProvider;
use crate::error::{OkpdError, Result};

#[derive(Debug, Clone)]
pub struct CliTextModel {
    provider: AiProvider,
    timeout: Duration,
}

impl CliTextModel {
    pub fn new(provider: AiProvider, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider(&self) -> AiProvider {
        self.provider
    }

    async fn run(&self, prompt: &str) -> Result<String> {
        let args = self.provider.prompt_args(prompt);
        let command_name = self.provider.command_name();

        // в Windows через cmd /c
        #[cfg(windows)]
        let mut command = {
            let mut command = Command::new("cmd");
            command.arg("/c").arg(command_name).args(&args);
            command
        };

        #[cfg(not(windows))]
        let mut command = {
            let mut command = Command::new(command_name);
            command.args(&args);
            command
        };

        command.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                OkpdError::CliExecution(format!(
                    "{} не ответил за {} с",
                    command_name,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| OkpdError::CliExecution(format!("{} не запустился: {}", command_name, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OkpdError::CliExecution(format!(
                "{} завершился с кодом {:?}: {}",
                command_name,
                output.status.code(),
                stderr.trim()
            )));
        }

        let response = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let preview: String = response.chars().take(200).collect();
        debug!("Ответ {}: {}", command_name, preview);
        Ok(response)
    }
}

impl TextModel for CliTextModel {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        self.run(&render_messages(messages)).await
    }
}

/// Поиск контекста той же моделью
#[derive(Debug, Clone)]
pub struct CliWebSearch {
    model: CliTextModel,
}

impl CliWebSearch {
    pub fn new(model: CliTextModel) -> Self {
        Self { model }
    }
}

impl WebSearch for CliWebSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>> {
        let response = self.model.generate(&build_search_prompt(query)).await?;
        Ok(parse_string_list(&response))
    }
}
