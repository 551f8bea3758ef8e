//! Accelerator implementations. Parameters are kept in the native axis
//! convention; execution produces a launch request for the device runtime.

use crate::planner::{choose_variant, dispatch_for, DispatchData, KernelVariant};
use implmap_ir::PrimitiveDesc;
use implmap_kernels::{
    BackendKind, BlobReader, BlobWriter, DeviceInfo, DispatchError, DynKernelImpl,
    ExecutionHandle, ImplState, KernelImpl, KernelParams, LaunchRequest, ObjectType, Result,
};
use ndarray::ArrayD;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OclKernel {
    desc: Arc<PrimitiveDesc>,
    device: DeviceInfo,
    params: KernelParams,
    variant: KernelVariant,
    dispatch: DispatchData,
    state: ImplState,
}

impl OclKernel {
    pub fn create(desc: &Arc<PrimitiveDesc>, device: &DeviceInfo) -> Result<Self> {
        if device.backend != BackendKind::Ocl {
            return Err(DispatchError::NotFound {
                kind: desc.kind(),
                backend: device.backend,
                reason: format!("ocl kernels cannot target device `{}`", device.name),
            });
        }
        let params = KernelParams::derive(desc, device)?;
        let variant = choose_variant(&params);
        let dispatch = dispatch_for(variant, &params, device.max_work_group_size);
        debug!(
            node = desc.id(),
            kernel = variant.name(),
            gws = ?dispatch.gws,
            "selected ocl kernel variant"
        );
        Ok(Self {
            desc: Arc::clone(desc),
            device: device.clone(),
            params,
            variant,
            dispatch,
            state: ImplState::Ready,
        })
    }

    /// Rebuild from a cache blob written by [`KernelImpl::save`].
    pub fn load(reader: &mut BlobReader<'_>, desc: Arc<PrimitiveDesc>) -> Result<Self> {
        let device = reader.get_device()?;
        if device.backend != BackendKind::Ocl {
            return Err(DispatchError::corruption(format!(
                "ocl record carries {} device `{}`",
                device.backend, device.name
            )));
        }
        let params = KernelParams::load(desc.kind(), reader)?;
        let name = reader.get_str()?;
        let variant = KernelVariant::from_name(&name)
            .ok_or_else(|| DispatchError::corruption(format!("unknown ocl kernel `{name}`")))?;
        let mut gws = [0usize; 3];
        let mut lws = [0usize; 3];
        for dim in gws.iter_mut().chain(lws.iter_mut()) {
            *dim = reader.get_usize()?;
        }
        Ok(Self {
            desc,
            device,
            params,
            variant,
            dispatch: DispatchData { gws, lws },
            state: ImplState::Ready,
        })
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    pub fn dispatch(&self) -> DispatchData {
        self.dispatch
    }

    fn entry_point(&self) -> String {
        let layer: String = self
            .desc
            .id()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}__{}", self.variant.name(), layer)
    }
}

impl KernelImpl for OclKernel {
    fn object_type(&self) -> ObjectType {
        ObjectType::new(self.params.kind(), BackendKind::Ocl)
    }

    fn kernel_name(&self) -> &str {
        self.variant.name()
    }

    fn descriptor(&self) -> &Arc<PrimitiveDesc> {
        &self.desc
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn params(&self) -> &KernelParams {
        &self.params
    }

    fn state(&self) -> ImplState {
        self.state
    }

    fn clone_impl(&self) -> DynKernelImpl {
        Box::new(Self {
            state: ImplState::Ready,
            ..self.clone()
        })
    }

    fn save(&self, writer: &mut BlobWriter) {
        writer.put_device(&self.device);
        self.params.save(writer);
        writer.put_str(self.variant.name());
        for dim in self.dispatch.gws.iter().chain(self.dispatch.lws.iter()) {
            writer.put_usize(*dim);
        }
    }

    /// Device buffers are bound by the runtime; host inputs are not read.
    fn execute(&mut self, _inputs: &[ArrayD<f32>]) -> Result<ExecutionHandle> {
        let request = LaunchRequest {
            kernel_name: self.variant.name().to_string(),
            entry_point: self.entry_point(),
            gws: self.dispatch.gws,
            lws: self.dispatch.lws,
        };
        self.state = ImplState::Executed;
        Ok(ExecutionHandle::Launch(request))
    }
}
