//! Host reference implementations.

use half::f16;
use implmap_ir::{DataType, PrimitiveDesc};
use implmap_kernels::{
    BackendKind, BlobReader, BlobWriter, BroadcastParams, ConvertParams, DeviceInfo,
    DispatchError, DynKernelImpl, ExecutionHandle, ImplState, KernelImpl, KernelParams,
    ObjectType, PermuteParams, Result,
};
use ndarray::{ArrayD, IxDyn};
use std::sync::Arc;
use tracing::debug;

pub fn kernel_name(params: &KernelParams) -> &'static str {
    match params {
        KernelParams::Permute(_) => "permute_ref",
        KernelParams::Broadcast(_) => "broadcast_ref",
        KernelParams::Convert(_) => "convert_ref",
    }
}

#[derive(Debug, Clone)]
pub struct CpuKernel {
    desc: Arc<PrimitiveDesc>,
    device: DeviceInfo,
    params: KernelParams,
    state: ImplState,
}

impl CpuKernel {
    pub fn create(desc: &Arc<PrimitiveDesc>, device: &DeviceInfo) -> Result<Self> {
        if device.backend != BackendKind::Cpu {
            return Err(DispatchError::NotFound {
                kind: desc.kind(),
                backend: device.backend,
                reason: format!("host kernels cannot target device `{}`", device.name),
            });
        }
        Ok(Self {
            desc: Arc::clone(desc),
            device: device.clone(),
            params: KernelParams::derive(desc, device)?,
            state: ImplState::Ready,
        })
    }

    /// Rebuild from a cache blob written by [`KernelImpl::save`].
    pub fn load(reader: &mut BlobReader<'_>, desc: Arc<PrimitiveDesc>) -> Result<Self> {
        let device = reader.get_device()?;
        if device.backend != BackendKind::Cpu {
            return Err(DispatchError::corruption(format!(
                "cpu record carries {} device `{}`",
                device.backend, device.name
            )));
        }
        let params = KernelParams::load(desc.kind(), reader)?;
        Ok(Self {
            desc,
            device,
            params,
            state: ImplState::Ready,
        })
    }

    fn execution_error(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::Execution {
            node: self.desc.id().to_string(),
            reason: reason.into(),
        }
    }

    fn check_input<'a>(&self, inputs: &'a [ArrayD<f32>]) -> Result<&'a ArrayD<f32>> {
        let [input] = inputs else {
            return Err(self.execution_error(format!("expected 1 input, got {}", inputs.len())));
        };
        let expected = &self.params.base().inputs[0].shape;
        if input.shape() != expected.as_slice() {
            return Err(self.execution_error(format!(
                "input shape {:?} does not match compiled shape {:?}",
                input.shape(),
                expected
            )));
        }
        Ok(input)
    }

    fn run_permute(&self, params: &PermuteParams, input: &ArrayD<f32>) -> ArrayD<f32> {
        let axes: Vec<usize> = params.order.iter().map(|&axis| axis as usize).collect();
        input
            .clone()
            .permuted_axes(IxDyn(&axes))
            .as_standard_layout()
            .into_owned()
    }

    fn run_broadcast(&self, params: &BroadcastParams, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut expanded = vec![1usize; params.target_shape.len()];
        if params.axes_mapping.len() != input.ndim() {
            return Err(self.execution_error(format!(
                "axes mapping {:?} does not fit rank {} input",
                params.axes_mapping,
                input.ndim()
            )));
        }
        for (&dim, &target_axis) in input.shape().iter().zip(&params.axes_mapping) {
            let slot = expanded.get_mut(target_axis).ok_or_else(|| {
                self.execution_error(format!(
                    "axes mapping points at axis {} of rank {} target",
                    target_axis,
                    params.target_shape.len()
                ))
            })?;
            *slot = dim;
        }

        let reshaped = input
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&expanded))
            .map_err(|err| self.execution_error(format!("reshape failed: {err}")))?;
        let output = reshaped
            .broadcast(IxDyn(&params.target_shape))
            .ok_or_else(|| {
                self.execution_error(format!(
                    "cannot broadcast {:?} to {:?}",
                    expanded, params.target_shape
                ))
            })?
            .to_owned();
        Ok(output)
    }

    fn run_convert(&self, params: &ConvertParams, input: &ArrayD<f32>) -> ArrayD<f32> {
        match params.output_dtype {
            DataType::F32 => input.clone(),
            DataType::F16 => input.mapv(|x| f16::from_f32(x).to_f32()),
            // `as` saturates and maps NaN to zero.
            DataType::I32 => input.mapv(|x| x as i32 as f32),
            DataType::I8 => input.mapv(|x| x as i8 as f32),
            DataType::U8 => input.mapv(|x| x as u8 as f32),
        }
    }
}

impl KernelImpl for CpuKernel {
    fn object_type(&self) -> ObjectType {
        ObjectType::new(self.params.kind(), BackendKind::Cpu)
    }

    fn kernel_name(&self) -> &str {
        kernel_name(&self.params)
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
    }

    fn execute(&mut self, inputs: &[ArrayD<f32>]) -> Result<ExecutionHandle> {
        let input = self.check_input(inputs)?;
        let output = match &self.params {
            KernelParams::Permute(params) => self.run_permute(params, input),
            KernelParams::Broadcast(params) => self.run_broadcast(params, input)?,
            KernelParams::Convert(params) => self.run_convert(params, input),
        };
        debug!(
            node = self.desc.id(),
            kernel = self.kernel_name(),
            shape = ?output.shape(),
            "executed host kernel"
        );
        self.state = ImplState::Executed;
        Ok(ExecutionHandle::Host(output))
    }
}
