//! Compile-if-missing helper for single-function modules, such as the stages
//! of an image generation pipeline.
//!
//! A module is named `{model_name}_{device}`. With caching enabled, a blob
//! already on disk is loaded instead of recompiling, unless a save is
//! explicitly requested. Without caching the module is compiled in memory.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// A module that can be compiled in memory, saved as a blob, or loaded from one.
#[async_trait]
pub trait CompilableModule: Send {
    async fn compile(&mut self, extra_args: &[String]) -> Result<()>;

    /// Compile and write the blob as `{dir}/{name}.vmfb`, returning its path.
    async fn save_module(&mut self, dir: &Path, name: &str, extra_args: &[String]) -> Result<PathBuf>;

    async fn load_module(&mut self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmfbCacheOptions {
    /// Load an existing blob when present.
    pub load_vmfb: bool,
    /// Always compile and overwrite the blob.
    pub save_vmfb: bool,
    pub device: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Loaded(PathBuf),
    Saved(PathBuf),
    Compiled,
}

impl VmfbCacheOptions {
    pub fn extended_name(&self, model_name: &str) -> String {
        format!("{}_{}", model_name, self.device)
    }

    pub fn vmfb_path(&self, model_name: &str) -> PathBuf {
        self.dir.join(format!("{}.vmfb", self.extended_name(model_name)))
    }
}

/// Make `module` ready to run, reusing or producing a cached blob as `options` allow.
pub async fn compile_module<M>(
    options: &VmfbCacheOptions,
    module: &mut M,
    model_name: &str,
    extra_args: &[String],
) -> Result<CacheOutcome>
where
    M: CompilableModule + ?Sized,
{
    if !(options.load_vmfb || options.save_vmfb) {
        module.compile(extra_args).await?;
        return Ok(CacheOutcome::Compiled);
    }

    let extended_name = options.extended_name(model_name);
    let vmfb_path = options.vmfb_path(model_name);
    if options.load_vmfb && vmfb_path.is_file() && !options.save_vmfb {
        info!(path = %vmfb_path.display(), "loading flatbuffer");
        module.load_module(&vmfb_path).await?;
        return Ok(CacheOutcome::Loaded(vmfb_path));
    }

    if options.save_vmfb {
        info!(path = %vmfb_path.display(), "saving flatbuffer");
    } else {
        info!(path = %vmfb_path.display(), "no flatbuffer found, compiling and saving");
    }
    let path = module.save_module(&options.dir, &extended_name, extra_args).await?;
    module.load_module(&path).await?;
    Ok(CacheOutcome::Saved(path))
}
