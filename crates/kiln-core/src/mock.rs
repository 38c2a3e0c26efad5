use crate::pipeline::{FileTree, FsCompiler, ImageBuilder, ImageEngine, PackageReader};
use crate::BuildError;
use kiln_runtime::DiskFormat;
use kiln_schema::{BuildConfig, KernelOptions};
use std::fs::File;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Pipeline stage a [`MockEngine`] can be told to fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Compiler,
    Builder,
    MinimumSize,
    Build,
    Close,
}

/// What the mock pipeline was asked to do.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub compilers: usize,
    pub builders: usize,
    pub default_mtu: Option<u32>,
    pub kernel_options: Option<KernelOptions>,
    pub sizes: Vec<u64>,
    pub builds: Vec<(DiskFormat, BuildConfig)>,
    pub closed_builders: usize,
}

/// Image engine that writes a fixed payload instead of a real image.
pub struct MockEngine {
    fail_at: Option<FailAt>,
    minimum: u64,
    kernel: Option<String>,
    payload: Vec<u8>,
    log: Arc<Mutex<EngineLog>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            fail_at: None,
            minimum: 1024 * 1024,
            kernel: Some("6.1.0-mock".to_owned()),
            payload: b"kiln-mock-image".to_vec(),
            log: Arc::new(Mutex::new(EngineLog::default())),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_at(mut self, stage: FailAt) -> Self {
        self.fail_at = Some(stage);
        self
    }

    #[must_use]
    pub fn minimum_size(mut self, bytes: u64) -> Self {
        self.minimum = bytes;
        self
    }

    #[must_use]
    pub fn kernel(mut self, kernel: Option<&str>) -> Self {
        self.kernel = kernel.map(str::to_owned);
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn log(&self) -> Arc<Mutex<EngineLog>> {
        Arc::clone(&self.log)
    }

    fn fails(&self, stage: FailAt) -> Result<(), BuildError> {
        if self.fail_at == Some(stage) {
            return Err(BuildError::stage("mock", format!("injected failure at {stage:?}")));
        }
        Ok(())
    }
}

struct MockCompiler {
    size: u64,
}

impl FsCompiler for MockCompiler {
    fn compiled_size(&self) -> u64 {
        self.size
    }
}

pub struct MockBuilder {
    compiled: u64,
    minimum: u64,
    size: u64,
    kernel: Option<String>,
    built: bool,
    payload: Vec<u8>,
    fail_at: Option<FailAt>,
    log: Arc<Mutex<EngineLog>>,
}

impl MockBuilder {
    fn fails(&self, stage: FailAt) -> Result<(), BuildError> {
        if self.fail_at == Some(stage) {
            return Err(BuildError::stage("mock", format!("injected failure at {stage:?}")));
        }
        Ok(())
    }
}

impl ImageEngine for MockEngine {
    fn compiler(&self, tree: &dyn FileTree) -> Result<Box<dyn FsCompiler>, BuildError> {
        self.fails(FailAt::Compiler)?;
        if let Ok(mut log) = self.log.lock() {
            log.compilers += 1;
        }
        Ok(Box::new(MockCompiler {
            size: tree.content_size(),
        }))
    }

    fn builder(
        &self,
        compiler: Box<dyn FsCompiler>,
        kernel: KernelOptions,
        default_mtu: u32,
    ) -> Result<Box<dyn ImageBuilder>, BuildError> {
        self.fails(FailAt::Builder)?;
        if let Ok(mut log) = self.log.lock() {
            log.builders += 1;
            log.default_mtu = Some(default_mtu);
            log.kernel_options = Some(kernel);
        }
        Ok(Box::new(MockBuilder {
            compiled: compiler.compiled_size(),
            minimum: self.minimum,
            size: 0,
            kernel: self.kernel.clone(),
            built: false,
            payload: self.payload.clone(),
            fail_at: self.fail_at,
            log: Arc::clone(&self.log),
        }))
    }
}

impl ImageBuilder for MockBuilder {
    fn minimum_size(&self, _config: &BuildConfig) -> Result<u64, BuildError> {
        self.fails(FailAt::MinimumSize)?;
        Ok(self.minimum.max(self.compiled))
    }

    fn set_size(&mut self, bytes: u64) {
        self.size = bytes;
        if let Ok(mut log) = self.log.lock() {
            log.sizes.push(bytes);
        }
    }

    fn build(
        &mut self,
        format: DiskFormat,
        target: &mut File,
        config: &BuildConfig,
    ) -> Result<(), BuildError> {
        // A partial image reaches the disk before the injected failure.
        target.write_all(&self.payload[..self.payload.len() / 2])?;
        self.fails(FailAt::Build)?;
        target.write_all(&self.payload[self.payload.len() / 2..])?;
        if let Ok(mut log) = self.log.lock() {
            log.builds.push((format, config.clone()));
        }
        self.built = true;
        Ok(())
    }

    fn kernel_used(&self) -> Option<String> {
        if self.built {
            self.kernel.clone()
        } else {
            None
        }
    }

    fn close(&mut self) -> Result<(), BuildError> {
        if let Ok(mut log) = self.log.lock() {
            log.closed_builders += 1;
        }
        self.fails(FailAt::Close)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MockTree {
    pub size: u64,
}

impl FileTree for MockTree {
    fn content_size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug, Default)]
pub struct ReaderLog {
    pub tree_requests: usize,
    /// File tree requested after the reader was closed.
    pub used_after_close: usize,
    pub closes: usize,
}

pub struct MockReader {
    tree: MockTree,
    fail_close: bool,
    log: Arc<Mutex<ReaderLog>>,
}

impl MockReader {
    pub fn new(content_size: u64) -> Self {
        Self {
            tree: MockTree { size: content_size },
            fail_close: false,
            log: Arc::new(Mutex::new(ReaderLog::default())),
        }
    }

    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn log(&self) -> Arc<Mutex<ReaderLog>> {
        Arc::clone(&self.log)
    }
}

impl PackageReader for MockReader {
    fn file_tree(&self) -> &dyn FileTree {
        if let Ok(mut log) = self.log.lock() {
            log.tree_requests += 1;
            if log.closes > 0 {
                log.used_after_close += 1;
            }
        }
        &self.tree
    }

    fn close(&mut self) -> io::Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.closes += 1;
        }
        if self.fail_close {
            return Err(io::Error::other("mock reader close failed"));
        }
        Ok(())
    }
}
