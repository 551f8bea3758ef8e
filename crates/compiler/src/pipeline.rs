//! Compile pipeline: registry, target device and dispatch settings.

use crate::compiled::CompiledGraph;
use crate::init::shared_registry;
use crate::selector::dispatch_graph;
use anyhow::{ensure, Result as AnyResult};
use implmap_cache::CacheFile;
use implmap_ir::PrimitiveGraph;
use implmap_kernels::{BackendKind, DeviceInfo, ImplementationRegistry, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub backend: BackendKind,
    /// Overrides the default device for `backend`.
    pub device: Option<DeviceInfo>,
    pub parallel: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpu,
            device: None,
            parallel: true,
        }
    }
}

impl CompilerConfig {
    pub fn for_backend(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.device
            .clone()
            .unwrap_or_else(|| DeviceInfo::for_backend(self.backend))
    }

    pub fn validate(&self) -> AnyResult<()> {
        if let Some(device) = &self.device {
            ensure!(
                device.backend == self.backend,
                "device `{}` is a {} device but the backend is {}",
                device.name,
                device.backend,
                self.backend
            );
            ensure!(
                device.max_work_group_size > 0,
                "device `{}` reports a zero work-group size",
                device.name
            );
        }
        Ok(())
    }
}

pub struct CompilerPipeline {
    config: CompilerConfig,
    device: DeviceInfo,
    registry: Arc<ImplementationRegistry>,
}

impl CompilerPipeline {
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_registry(config, shared_registry())
    }

    pub fn with_registry(config: CompilerConfig, registry: Arc<ImplementationRegistry>) -> Self {
        let device = config.device_info();
        Self {
            config,
            device,
            registry,
        }
    }

    /// Full dispatch of every node.
    pub fn compile(&self, graph: &PrimitiveGraph) -> Result<CompiledGraph> {
        let started = Instant::now();
        let impls = dispatch_graph(&self.registry, graph, &self.device, self.config.parallel)?;
        info!(
            nodes = impls.len(),
            backend = %self.config.backend,
            device = %self.device.name,
            elapsed_us = started.elapsed().as_micros() as u64,
            "compiled primitive graph"
        );
        Ok(CompiledGraph::new(self.device.clone(), impls))
    }

    /// Rebuild from a cache without consulting the registry.
    pub fn restore(&self, graph: &PrimitiveGraph, cache: &CacheFile) -> Result<CompiledGraph> {
        CompiledGraph::from_cache(graph, cache, &self.device)
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn registry(&self) -> &Arc<ImplementationRegistry> {
        &self.registry
    }
}
