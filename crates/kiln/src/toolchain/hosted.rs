//! Runtime host process.
//!
//! The compiled module is executed by a separate host process that owns the
//! device, the loaded blob and its external weights. The host is spawned with
//! `--device <driver> --vmfb <path> --module <name> [--external-weights <path>]`
//! and then serves one request per line on stdin:
//!
//! ```text
//! {"function": "run_forward", "args": [29871]}
//! ```
//!
//! answering each with one line on stdout, either `{"result": [13]}` or
//! `{"error": "message"}`.

use super::command::ToolCommand;
use super::{LoadRequest, Runtime};
use crate::error::{KilnError, Result};
use crate::module::{CompiledModule, entry_point};
use crate::tokenizer::TokenId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct HostRequest<'a> {
    function: &'a str,
    args: &'a [i64],
}

#[derive(Debug, Deserialize)]
struct HostResponse {
    #[serde(default)]
    result: Option<Vec<i64>>,
    #[serde(default)]
    error: Option<String>,
}

/// Loads modules by spawning a runtime host process per module.
#[derive(Debug, Clone)]
pub struct HostedRuntime {
    host: ToolCommand,
}

impl HostedRuntime {
    pub fn new(host: ToolCommand) -> Self {
        Self { host }
    }

    pub(crate) fn command(&self, request: &LoadRequest) -> Command {
        let mut command = self.host.command();
        command
            .arg("--device")
            .arg(&request.driver)
            .arg("--vmfb")
            .arg(&request.vmfb)
            .arg("--module")
            .arg(request.module_name);
        if let Some(weights) = &request.external_weights {
            command.arg("--external-weights").arg(weights);
        }
        command
    }
}

#[async_trait]
impl Runtime for HostedRuntime {
    async fn load(&self, request: &LoadRequest) -> Result<Arc<dyn CompiledModule>> {
        if !request.vmfb.exists() {
            return Err(KilnError::MissingArtifact(request.vmfb.clone()));
        }
        info!(
            driver = %request.driver,
            vmfb = %request.vmfb.display(),
            module = request.module_name,
            "loading compiled module"
        );
        let mut child = self
            .command(request)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| KilnError::Protocol("runtime host has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KilnError::Protocol("runtime host has no stdout".to_string()))?;

        Ok(Arc::new(HostedModule::new(stdin, stdout, Some(child))))
    }
}

struct HostIo<W, R> {
    writer: W,
    reader: BufReader<R>,
    line: String,
}

/// A [`CompiledModule`] whose entry points are served by a host process.
pub(crate) struct HostedModule<W, R> {
    io: Mutex<HostIo<W, R>>,
    // Held so the host is killed when the module is dropped.
    _child: std::sync::Mutex<Option<Child>>,
}

impl<W, R> HostedModule<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    pub(crate) fn new(writer: W, reader: R, child: Option<Child>) -> Self {
        Self {
            io: Mutex::new(HostIo {
                writer,
                reader: BufReader::new(reader),
                line: String::new(),
            }),
            _child: std::sync::Mutex::new(child),
        }
    }

    async fn call(&self, function: &'static str, args: &[i64]) -> Result<Vec<i64>> {
        let mut payload = serde_json::to_vec(&HostRequest { function, args })?;
        payload.push(b'\n');

        let mut io = self.io.lock().await;
        io.writer.write_all(&payload).await?;
        io.writer.flush().await?;

        let HostIo { reader, line, .. } = &mut *io;
        line.clear();
        if reader.read_line(line).await? == 0 {
            return Err(KilnError::Protocol(format!(
                "runtime host closed its output during `{function}`"
            )));
        }
        debug!(function, response = line.trim_end(), "runtime call returned");

        let response: HostResponse = serde_json::from_str(line.trim_end())?;
        match (response.result, response.error) {
            (_, Some(message)) => Err(KilnError::Runtime { function, message }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(KilnError::Protocol(format!(
                "response to `{function}` has neither result nor error"
            ))),
        }
    }

    async fn call_scalar(&self, function: &'static str, args: &[i64]) -> Result<i64> {
        self.call(function, args)
            .await?
            .first()
            .copied()
            .ok_or_else(|| KilnError::Protocol(format!("`{function}` returned no value")))
    }

    async fn call_token(&self, function: &'static str, args: &[i64]) -> Result<TokenId> {
        let value = self.call_scalar(function, args).await?;
        TokenId::try_from(value)
            .map_err(|_| KilnError::Protocol(format!("`{function}` returned invalid token id {value}")))
    }
}

fn to_args(ids: &[TokenId]) -> Vec<i64> {
    ids.iter().map(|&id| i64::from(id)).collect()
}

#[async_trait]
impl<W, R> CompiledModule for HostedModule<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    async fn run_initialize(&self, input_ids: &[TokenId]) -> Result<TokenId> {
        self.call_token(entry_point::RUN_INITIALIZE, &to_args(input_ids)).await
    }

    async fn run_cached_initialize(&self, input_ids: &[TokenId]) -> Result<TokenId> {
        self.call_token(entry_point::RUN_CACHED_INITIALIZE, &to_args(input_ids)).await
    }

    async fn run_forward(&self, token: TokenId) -> Result<TokenId> {
        self.call_token(entry_point::RUN_FORWARD, &[i64::from(token)]).await
    }

    async fn get_seq_step(&self) -> Result<usize> {
        let value = self.call_scalar(entry_point::GET_SEQ_STEP, &[]).await?;
        usize::try_from(value)
            .map_err(|_| KilnError::Protocol(format!("negative sequence step {value}")))
    }

    async fn evict_kvcache_space(&self) -> Result<()> {
        self.call(entry_point::EVICT_KVCACHE_SPACE, &[]).await?;
        Ok(())
    }
}
