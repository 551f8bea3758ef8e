//! Registration of the accelerator implementations.

use crate::runtime::OclKernel;
use implmap_ir::{PrimitiveDesc, PrimitiveKind};
use implmap_kernels::{
    BackendKind, Capabilities, DeviceInfo, DynKernelImpl, ImplementationRegistry, Result,
};
use std::sync::Arc;

/// Highest tensor rank the device kernels index.
pub const MAX_KERNEL_RANK: usize = 6;

fn create_ocl_kernel(desc: &Arc<PrimitiveDesc>, device: &DeviceInfo) -> Result<DynKernelImpl> {
    Ok(Box::new(OclKernel::create(desc, device)?))
}

pub fn attach_ocl_impls(registry: &mut ImplementationRegistry) {
    registry.register(
        PrimitiveKind::Permute,
        BackendKind::Ocl,
        "permute_ocl",
        create_ocl_kernel,
        Capabilities::any().with_max_rank(MAX_KERNEL_RANK),
    );
    registry.register(
        PrimitiveKind::Broadcast,
        BackendKind::Ocl,
        "broadcast_ocl",
        create_ocl_kernel,
        Capabilities::any().with_max_rank(MAX_KERNEL_RANK),
    );
    registry.register(
        PrimitiveKind::Convert,
        BackendKind::Ocl,
        "convert_ocl",
        create_ocl_kernel,
        Capabilities::any(),
    );
}
