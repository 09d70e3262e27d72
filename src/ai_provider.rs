use clap::ValueEnum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AiProvider {
    Claude,
    Codex,
    Gemini,
}

impl AiProvider {
    pub fn command_name(&self) -> &'static str {
        match self {
            AiProvider::Claude => "claude",
            AiProvider::Codex => "codex",
            AiProvider::Gemini => "gemini",
        }
    }

    /// Аргументы для одного неинтерактивного запроса
    pub fn prompt_args(&self, prompt: &str) -> Vec<String> {
        match self {
            AiProvider::Claude => vec![
                "-p".into(),
                prompt.into(),
                "--output-format".into(),
                "text".into(),
            ],
            AiProvider::Codex => vec!["exec".into(), prompt.into()],
            AiProvider::Gemini => vec!["-p".into(), prompt.into()],
        }
    }

    /// Имя из конфига (`"claude"`, `"codex"`, `"gemini"`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "claude" => Some(AiProvider::Claude),
            "codex" => Some(AiProvider::Codex),
            "gemini" => Some(AiProvider::Gemini),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(AiProvider::from_name("Claude"), Some(AiProvider::Claude));
        assert_eq!(AiProvider::from_name(" gemini "), Some(AiProvider::Gemini));
        assert_eq!(AiProvider::from_name("gpt"), None);
    }

    #[test]
    fn test_prompt_args_carry_prompt() {
        for provider in [AiProvider::Claude, AiProvider::Codex, AiProvider::Gemini] {
            let args = provider.prompt_args("Болт М6");
            assert!(args.iter().any(|a| a == "Болт М6"));
        }
    }
}
