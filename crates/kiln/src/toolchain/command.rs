use super::{ExportRequest, Exporter, ParamGenerator, ParamRequest};
use crate::error::{KilnError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

/// Environment variable carrying the HuggingFace token to external tools.
pub const HF_AUTH_TOKEN_ENV: &str = "HF_AUTH_TOKEN";

/// A program plus leading arguments, e.g. `python -m exporter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Run `command` to completion and return its stdout.
pub(crate) async fn run_tool(tool: &str, command: &mut Command) -> Result<Vec<u8>> {
    debug!(tool, command = ?command.as_std(), "invoking tool");
    let output = command.output().await?;
    if !output.status.success() {
        return Err(KilnError::ToolFailed {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output.stdout)
}

/// Exports a model by running an external command and reading IR from its stdout.
#[derive(Debug, Clone)]
pub struct CommandExporter {
    tool: ToolCommand,
}

impl CommandExporter {
    pub fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }

    pub(crate) fn command(&self, request: &ExportRequest) -> Command {
        let mut command = self.tool.command();
        command
            .arg("--hf_model_name")
            .arg(&request.hf_model_name)
            .arg("--compile_to")
            .arg("torch")
            .arg("--precision")
            .arg(request.precision.as_str());
        if let Some(quantization) = request.quantization.as_deref() {
            command.arg("--quantization").arg(quantization);
        }
        if let Some(format) = &request.weight_format {
            command.arg("--external_weights").arg(format);
        }
        if request.streaming {
            command.arg("--streaming_llm");
        }
        if let Some(token) = &request.auth_token {
            command.env(HF_AUTH_TOKEN_ENV, token);
        }
        command
    }
}

#[async_trait]
impl Exporter for CommandExporter {
    async fn export(&self, request: &ExportRequest) -> Result<String> {
        info!(model = %request.hf_model_name, streaming = request.streaming, "exporting model");
        let stdout = run_tool("exporter", &mut self.command(request)).await?;
        String::from_utf8(stdout)
            .map_err(|e| KilnError::Protocol(format!("exporter produced non UTF-8 IR: {e}")))
    }
}

/// Generates external weights by running an external command.
#[derive(Debug, Clone)]
pub struct CommandParamGenerator {
    tool: ToolCommand,
}

impl CommandParamGenerator {
    pub fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }

    pub(crate) fn command(&self, request: &ParamRequest) -> Command {
        let mut command = self.tool.command();
        command
            .arg("--hf_model_name")
            .arg(&request.hf_model_name)
            .arg("--weight_path")
            .arg(&request.weight_path)
            .arg("--precision")
            .arg(request.precision.as_str());
        if let Some(quantization) = request.quantization.as_deref() {
            command.arg("--quantization").arg(quantization);
        }
        if let Some(token) = &request.auth_token {
            command.env(HF_AUTH_TOKEN_ENV, token);
        }
        command
    }
}

#[async_trait]
impl ParamGenerator for CommandParamGenerator {
    async fn generate(&self, request: &ParamRequest) -> Result<()> {
        run_tool("param generator", &mut self.command(request)).await?;
        if !request.weight_path.exists() {
            return Err(KilnError::MissingArtifact(request.weight_path.clone()));
        }
        Ok(())
    }
}
