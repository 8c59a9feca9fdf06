use crate::device::DeviceTarget;
use crate::models::ModelDescriptor;

const CPU_FLAGS: &[&str] = &["--iree-global-opt-enable-quantized-matmul-reassociation"];
const VULKAN_FLAGS: &[&str] = &["--iree-stream-resource-max-allocation-size=4294967296"];

/// Compiler flags for `descriptor` on `target`.
///
/// Backend flags come first, model flags after, so a model can override a
/// backend default.
pub fn compile_flags(target: &DeviceTarget, descriptor: &ModelDescriptor) -> Vec<String> {
    let backend_flags: &[&str] = if target.is_cpu() {
        CPU_FLAGS
    } else if target.backend == "vulkan" {
        VULKAN_FLAGS
    } else {
        &[]
    };

    backend_flags
        .iter()
        .map(|flag| flag.to_string())
        .chain(descriptor.compile_flags.iter().cloned())
        .collect()
}

#[cfg(feature = "process")]
pub use process::IreeCompiler;

#[cfg(feature = "process")]
mod process {
    use super::super::command::run_tool;
    use super::super::{CompileRequest, Compiler};
    use crate::error::{KilnError, Result};
    use async_trait::async_trait;
    use tokio::process::Command;
    use tracing::info;

    /// Compiles torch-dialect IR with the `iree-compile` binary.
    #[derive(Debug, Clone)]
    pub struct IreeCompiler {
        binary: String,
    }

    impl IreeCompiler {
        pub fn new(binary: impl Into<String>) -> Self {
            Self { binary: binary.into() }
        }

        pub(crate) fn command(&self, request: &CompileRequest) -> Command {
            let mut command = Command::new(&self.binary);
            command
                .arg(&request.ir)
                .arg("--iree-input-type=torch")
                .arg(format!("--iree-hal-target-backends={}", request.target.backend))
                .arg("-o")
                .arg(&request.output)
                .args(&request.flags);
            command
        }
    }

    impl Default for IreeCompiler {
        fn default() -> Self {
            Self::new("iree-compile")
        }
    }

    #[async_trait]
    impl Compiler for IreeCompiler {
        async fn compile(&self, request: &CompileRequest) -> Result<()> {
            info!(
                ir = %request.ir.display(),
                output = %request.output.display(),
                backend = %request.target.backend,
                flags = ?request.flags,
                "compiling module"
            );
            run_tool("iree-compile", &mut self.command(request)).await?;
            if !request.output.exists() {
                return Err(KilnError::MissingArtifact(request.output.clone()));
            }
            Ok(())
        }
    }
}
