//! Registration of the host reference implementations.

use crate::runtime::CpuKernel;
use implmap_ir::{PrimitiveDesc, PrimitiveKind};
use implmap_kernels::{
    BackendKind, Capabilities, DeviceInfo, DynKernelImpl, ImplementationRegistry, Result,
};
use std::sync::Arc;

fn create_cpu_kernel(desc: &Arc<PrimitiveDesc>, device: &DeviceInfo) -> Result<DynKernelImpl> {
    Ok(Box::new(CpuKernel::create(desc, device)?))
}

/// Register a host implementation for every primitive kind.
pub fn attach_cpu_impls(registry: &mut ImplementationRegistry) {
    for kind in PrimitiveKind::ALL {
        registry.register(
            kind,
            BackendKind::Cpu,
            format!("{kind}_ref"),
            create_cpu_kernel,
            Capabilities::any(),
        );
    }
}
