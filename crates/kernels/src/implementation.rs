//! Capability interface shared by every concrete implementation object.

use crate::codec::BlobWriter;
use crate::config::{DeviceInfo, ImplState, ObjectType};
use crate::error::Result;
use crate::params::KernelParams;
use implmap_ir::PrimitiveDesc;
use ndarray::ArrayD;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Launch description handed to the device runtime for one kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchRequest {
    pub kernel_name: String,
    pub entry_point: String,
    pub gws: [usize; 3],
    pub lws: [usize; 3],
}

#[derive(Debug, Clone)]
pub enum ExecutionHandle {
    /// Result computed on the host.
    Host(ArrayD<f32>),
    /// Work to submit to the device queue.
    Launch(LaunchRequest),
}

impl ExecutionHandle {
    pub fn host(self) -> Option<ArrayD<f32>> {
        match self {
            ExecutionHandle::Host(output) => Some(output),
            ExecutionHandle::Launch(_) => None,
        }
    }

    pub fn launch(self) -> Option<LaunchRequest> {
        match self {
            ExecutionHandle::Launch(request) => Some(request),
            ExecutionHandle::Host(_) => None,
        }
    }
}

/// An instantiated implementation bound to one graph node.
///
/// Objects are created `Ready`; `execute` moves them to `Executed` and may be
/// called again. `save` writes the device context followed by the parameter
/// fields in construction order; the matching `load` lives with each backend.
pub trait KernelImpl: Send + Sync + fmt::Debug {
    fn object_type(&self) -> ObjectType;
    fn kernel_name(&self) -> &str;
    fn descriptor(&self) -> &Arc<PrimitiveDesc>;
    fn device(&self) -> &DeviceInfo;
    fn params(&self) -> &KernelParams;
    fn state(&self) -> ImplState;
    fn clone_impl(&self) -> Box<dyn KernelImpl>;
    fn save(&self, writer: &mut BlobWriter);
    fn execute(&mut self, inputs: &[ArrayD<f32>]) -> Result<ExecutionHandle>;
}

pub type DynKernelImpl = Box<dyn KernelImpl>;

impl Clone for Box<dyn KernelImpl> {
    fn clone(&self) -> Self {
        self.clone_impl()
    }
}
