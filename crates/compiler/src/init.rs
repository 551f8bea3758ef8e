//! Explicit registry initialization and cache record decoding.

use implmap_backend_cpu::{attach_cpu_impls, CpuKernel};
use implmap_backend_ocl::{attach_ocl_impls, OclKernel};
use implmap_ir::PrimitiveDesc;
use implmap_kernels::{
    to_device_layout, BackendKind, BlobReader, DispatchError, DynKernelImpl,
    ImplementationRegistry, KernelImpl, KernelParams, ObjectType, Result,
};
use std::sync::Arc;
use tracing::debug;

/// Build the registry with every built-in backend attached. Backends are
/// attached in a fixed order, so a later attach overrides an earlier one for
/// the same (kind, backend) key.
pub fn default_registry() -> ImplementationRegistry {
    let mut registry = ImplementationRegistry::new();
    attach_cpu_impls(&mut registry);
    attach_ocl_impls(&mut registry);
    debug!(entries = registry.len(), "implementation registry initialized");
    registry
}

pub fn shared_registry() -> Arc<ImplementationRegistry> {
    Arc::new(default_registry())
}

/// Decode one cache record for `desc`, rejecting records that belong to a
/// different primitive kind or whose parameters no longer match the ones
/// `desc` derives on the recorded device.
pub fn load_impl(
    object_type: ObjectType,
    blob: &[u8],
    desc: &Arc<PrimitiveDesc>,
) -> Result<DynKernelImpl> {
    if object_type.kind != desc.kind() {
        return Err(DispatchError::corruption(format!(
            "record {object_type} does not match {} node `{}`",
            desc.kind(),
            desc.id()
        )));
    }

    let mut reader = BlobReader::new(blob);
    let object: DynKernelImpl = match object_type.backend {
        BackendKind::Cpu => Box::new(CpuKernel::load(&mut reader, Arc::clone(desc))?),
        BackendKind::Ocl => Box::new(OclKernel::load(&mut reader, Arc::clone(desc))?),
    };
    reader.finish()?;
    check_fresh(&*object, desc)?;
    Ok(object)
}

fn check_fresh(object: &dyn KernelImpl, desc: &PrimitiveDesc) -> Result<()> {
    let base = object.params().base();
    if base.layer_id != desc.id() {
        return Err(DispatchError::corruption(format!(
            "record for `{}` found at node `{}`",
            base.layer_id,
            desc.id()
        )));
    }
    let expected: Vec<_> = desc
        .inputs()
        .iter()
        .map(|layout| to_device_layout(layout, object.device()))
        .collect();
    if base.inputs != expected {
        return Err(DispatchError::corruption(format!(
            "stale record for `{}`: input layouts changed",
            desc.id()
        )));
    }
    let current = KernelParams::derive(desc, object.device()).map_err(|err| {
        DispatchError::corruption(format!("stale record for `{}`: {err}", desc.id()))
    })?;
    if *object.params() != current {
        return Err(DispatchError::corruption(format!(
            "stale record for `{}`: attributes changed",
            desc.id()
        )));
    }
    Ok(())
}
