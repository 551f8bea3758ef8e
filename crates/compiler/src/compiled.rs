//! The compiled graph: one ready implementation object per node, in graph
//! order, plus its cache encoding and downstream emission.

use crate::init::load_impl;
use anyhow::{Context, Result as AnyResult};
use implmap_cache::CacheFile;
use implmap_ir::PrimitiveGraph;
use implmap_kernels::{
    BlobWriter, DeviceInfo, DispatchError, DynKernelImpl, ExecutionHandle, KernelImpl,
    ObjectType, Result,
};
use ndarray::ArrayD;
use serde::Serialize;
use tracing::debug;

/// Output of a downstream compiler for one implementation object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledKernel {
    pub node: String,
    pub object_type: ObjectType,
    pub kernel_name: String,
    pub payload: serde_json::Value,
}

/// Downstream consumer of ready implementation objects.
pub trait KernelCompiler {
    fn compile(&self, object: &dyn KernelImpl) -> AnyResult<CompiledKernel>;
}

/// Renders each object's parameters as JSON; used for inspection.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonKernelCompiler;

impl KernelCompiler for JsonKernelCompiler {
    fn compile(&self, object: &dyn KernelImpl) -> AnyResult<CompiledKernel> {
        Ok(CompiledKernel {
            node: object.descriptor().id().to_string(),
            object_type: object.object_type(),
            kernel_name: object.kernel_name().to_string(),
            payload: serde_json::to_value(object.params())?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledGraph {
    device: DeviceInfo,
    impls: Vec<DynKernelImpl>,
}

impl CompiledGraph {
    pub fn new(device: DeviceInfo, impls: Vec<DynKernelImpl>) -> Self {
        Self { device, impls }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn impls(&self) -> &[DynKernelImpl] {
        &self.impls
    }

    pub fn len(&self) -> usize {
        self.impls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.impls.is_empty()
    }

    pub fn get(&self, node: &str) -> Option<&dyn KernelImpl> {
        self.impls
            .iter()
            .find(|object| object.descriptor().id() == node)
            .map(|object| &**object)
    }

    pub fn object_types(&self) -> Vec<ObjectType> {
        self.impls.iter().map(|object| object.object_type()).collect()
    }

    pub fn execute_node(&mut self, node: &str, inputs: &[ArrayD<f32>]) -> Result<ExecutionHandle> {
        let object = self
            .impls
            .iter_mut()
            .find(|object| object.descriptor().id() == node)
            .ok_or_else(|| DispatchError::Execution {
                node: node.to_string(),
                reason: "node is not part of the compiled graph".to_string(),
            })?;
        object.execute(inputs)
    }

    /// Hand every object to `compiler` once, in graph order.
    pub fn emit(&self, compiler: &dyn KernelCompiler) -> AnyResult<Vec<CompiledKernel>> {
        self.impls
            .iter()
            .map(|object| {
                compiler
                    .compile(&**object)
                    .with_context(|| format!("emitting `{}`", object.descriptor().id()))
            })
            .collect()
    }

    pub fn to_cache(&self) -> CacheFile {
        let mut cache = CacheFile::new();
        for object in &self.impls {
            let mut writer = BlobWriter::new();
            object.save(&mut writer);
            cache.push(object.object_type(), writer.into_bytes());
        }
        cache
    }

    /// Rebuild from cache records matched positionally against `graph`.
    /// Any mismatch is a cache corruption.
    pub fn from_cache(graph: &PrimitiveGraph, cache: &CacheFile, device: &DeviceInfo) -> Result<Self> {
        if cache.len() != graph.len() {
            return Err(DispatchError::corruption(format!(
                "cache holds {} record(s) for a graph of {} node(s)",
                cache.len(),
                graph.len()
            )));
        }
        let impls = graph
            .nodes()
            .iter()
            .zip(cache.records())
            .map(|(desc, record)| {
                let object = load_impl(record.object_type, &record.blob, desc)?;
                if object.device() != device {
                    return Err(DispatchError::corruption(format!(
                        "record for `{}` targets device `{}`, expected `{}`",
                        desc.id(),
                        object.device().name,
                        device.name
                    )));
                }
                Ok(object)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(nodes = impls.len(), device = %device.name, "restored compiled graph from cache");
        Ok(Self::new(device.clone(), impls))
    }
}
