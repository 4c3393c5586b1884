//! rig-core backed [`ContentGenerator`] for OpenAI-compatible endpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use tracing::debug;

use super::{parse_file_response, parse_plan_response, ContentGenerator, FileRequest};
use crate::config::GeneratorConfig;
use crate::errors::GenerationError;
use crate::prompts;

/// Temperature for summarize/plan/enhance calls; strategies set their own
/// for file generation.
const PLANNING_TEMPERATURE: f64 = 0.2;

pub struct RigGenerator {
    client: openai::CompletionsClient,
    model: String,
    request_timeout: Duration,
}

impl RigGenerator {
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let client = openai::CompletionsClient::builder()
            .api_key(&config.api_key)
            .base_url(&config.url)
            .build()
            .context("Failed to build generator CompletionsClient")?;

        Ok(Self {
            client,
            model: config.model.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    async fn complete(
        &self,
        preamble: &str,
        temperature: f64,
        prompt: String,
    ) -> Result<String, GenerationError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(preamble)
            .temperature(temperature)
            .build();

        match tokio::time::timeout(self.request_timeout, agent.prompt(&prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(GenerationError::Transport(e.to_string())),
            Err(_) => Err(GenerationError::Transport(format!(
                "no response within {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl ContentGenerator for RigGenerator {
    async fn summarize(&self, digest: &str) -> Result<String, GenerationError> {
        let summary = self
            .complete(
                prompts::SUMMARIZER_PREAMBLE,
                PLANNING_TEMPERATURE,
                prompts::summarize_prompt(digest),
            )
            .await?;
        debug!(chars = summary.len(), "repository summarized");
        Ok(summary)
    }

    async fn plan(&self, summary: &str, task: &str) -> Result<Vec<String>, GenerationError> {
        let raw = self
            .complete(
                prompts::PLANNER_PREAMBLE,
                PLANNING_TEMPERATURE,
                prompts::plan_prompt(summary, task),
            )
            .await?;
        parse_plan_response(&raw)
    }

    async fn generate_file(&self, request: FileRequest<'_>) -> Result<String, GenerationError> {
        let prompt = prompts::file_prompt(
            request.path,
            request.existing,
            request.task,
            request.strategy,
        );
        let raw = self
            .complete(
                prompts::FILE_WRITER_PREAMBLE,
                request.strategy.temperature,
                prompt,
            )
            .await?;
        parse_file_response(&raw)
    }

    async fn enhance_task(&self, task: &str) -> Result<String, GenerationError> {
        let enhanced = self
            .complete(
                prompts::ENHANCER_PREAMBLE,
                PLANNING_TEMPERATURE,
                prompts::enhance_prompt(task),
            )
            .await?;
        let enhanced = enhanced.trim();
        if enhanced.is_empty() {
            return Err(GenerationError::Malformed("empty enhanced task".to_string()));
        }
        Ok(enhanced.to_string())
    }
}
