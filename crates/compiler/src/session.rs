//! Compiler session orchestration: cache lookup, fallback dispatch and
//! persistence of the selected implementations.

use crate::compiled::CompiledGraph;
use crate::pipeline::{CompilerConfig, CompilerPipeline};
use anyhow::{Context, Result};
use implmap_cache::{discard, persist_with_retry, CacheFile, PersistPolicy};
use implmap_ir::PrimitiveGraph;
use implmap_kernels::{DispatchError, ImplementationRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub cache_path: Option<PathBuf>,
    pub clear_cache: bool,
    pub persist: PersistPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileSource {
    Cache,
    Dispatch,
}

#[derive(Debug)]
pub enum PersistStatus {
    Skipped,
    Written { attempts: u32 },
    Failed(DispatchError),
}

#[derive(Debug)]
pub struct SessionCompile {
    pub graph: CompiledGraph,
    pub source: CompileSource,
    pub persist: PersistStatus,
}

pub struct CompilerSession {
    pipeline: CompilerPipeline,
    options: SessionOptions,
    /// Cache contents whose last write failed; retried on shutdown.
    unsaved: Option<CacheFile>,
}

impl CompilerSession {
    pub fn new(config: CompilerConfig, options: SessionOptions) -> Result<Self> {
        config.validate()?;
        Self::with_pipeline(CompilerPipeline::new(config), options)
    }

    pub fn with_registry(
        config: CompilerConfig,
        registry: Arc<ImplementationRegistry>,
        options: SessionOptions,
    ) -> Result<Self> {
        config.validate()?;
        Self::with_pipeline(CompilerPipeline::with_registry(config, registry), options)
    }

    fn with_pipeline(pipeline: CompilerPipeline, options: SessionOptions) -> Result<Self> {
        if options.clear_cache {
            if let Some(path) = &options.cache_path {
                discard(path)
                    .with_context(|| format!("clearing cache {}", path.display()))?;
                info!(path = %path.display(), "cleared implementation cache");
            }
        }
        Ok(Self {
            pipeline,
            options,
            unsaved: None,
        })
    }

    /// Restore from the cache when it matches `graph`, otherwise dispatch
    /// every node and persist the result. A corrupt cache is discarded; an
    /// unreadable one is skipped and left alone.
    pub fn compile(&mut self, graph: &PrimitiveGraph) -> Result<SessionCompile> {
        let Some(path) = self.options.cache_path.clone() else {
            let compiled = self.pipeline.compile(graph)?;
            return Ok(SessionCompile {
                graph: compiled,
                source: CompileSource::Dispatch,
                persist: PersistStatus::Skipped,
            });
        };

        if let Some(compiled) = self.try_restore(&path, graph)? {
            return Ok(SessionCompile {
                graph: compiled,
                source: CompileSource::Cache,
                persist: PersistStatus::Skipped,
            });
        }

        let compiled = self.pipeline.compile(graph)?;
        let cache = compiled.to_cache();
        let persist = match persist_with_retry(&cache, &path, &self.options.persist) {
            Ok(attempts) => {
                self.unsaved = None;
                PersistStatus::Written { attempts }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "keeping compiled graph in memory only");
                self.unsaved = Some(cache);
                PersistStatus::Failed(err)
            }
        };
        Ok(SessionCompile {
            graph: compiled,
            source: CompileSource::Dispatch,
            persist,
        })
    }

    fn try_restore(&self, path: &Path, graph: &PrimitiveGraph) -> Result<Option<CompiledGraph>> {
        let restored = CacheFile::load(path).and_then(|cache| match cache {
            Some(cache) => self.pipeline.restore(graph, &cache).map(Some),
            None => Ok(None),
        });
        match restored {
            Ok(Some(compiled)) => {
                info!(path = %path.display(), nodes = compiled.len(), "implementation cache hit");
                Ok(Some(compiled))
            }
            Ok(None) => {
                info!(path = %path.display(), "no implementation cache, dispatching");
                Ok(None)
            }
            Err(err @ DispatchError::CacheUnreadable { .. }) => {
                warn!(error = %err, "implementation cache unreadable, dispatching");
                Ok(None)
            }
            Err(err) if err.is_cache_corruption() => {
                warn!(path = %path.display(), error = %err, "discarding corrupt implementation cache");
                if let Err(discard_err) = discard(path) {
                    warn!(path = %path.display(), error = %discard_err, "corrupt cache left in place");
                }
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Retry any cache write that failed during the session.
    pub fn shutdown(&mut self) -> Result<()> {
        if let (Some(cache), Some(path)) = (self.unsaved.take(), &self.options.cache_path) {
            persist_with_retry(&cache, path, &self.options.persist)
                .with_context(|| format!("persisting cache {} on shutdown", path.display()))?;
        }
        info!("compiler session closed");
        Ok(())
    }

    pub fn config(&self) -> &CompilerConfig {
        self.pipeline.config()
    }

    pub fn pipeline(&self) -> &CompilerPipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }
}
