//! Backend kinds, device context and object-type tags.

use implmap_ir::{AxisConvention, PrimitiveKind};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host reference backend; works in the abstract axis convention.
    Cpu,
    /// Accelerator kernels; work in the native axis convention.
    Ocl,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Cpu, BackendKind::Ocl];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Cpu => "cpu",
            BackendKind::Ocl => "ocl",
        }
    }

    pub fn native_convention(&self) -> AxisConvention {
        match self {
            BackendKind::Cpu => AxisConvention::Abstract,
            BackendKind::Ocl => AxisConvention::Native,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            BackendKind::Cpu => 1,
            BackendKind::Ocl => 2,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|backend| backend.code() == code)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device context an implementation is built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: BackendKind,
    pub max_work_group_size: usize,
    pub supports_fp16: bool,
}

impl DeviceInfo {
    pub fn cpu() -> Self {
        Self {
            name: "host".to_string(),
            backend: BackendKind::Cpu,
            max_work_group_size: 1,
            supports_fp16: true,
        }
    }

    pub fn ocl<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            backend: BackendKind::Ocl,
            max_work_group_size: 256,
            supports_fp16: true,
        }
    }

    pub fn for_backend(backend: BackendKind) -> Self {
        match backend {
            BackendKind::Cpu => Self::cpu(),
            BackendKind::Ocl => Self::ocl("ocl:0"),
        }
    }

    pub fn convention(&self) -> AxisConvention {
        self.backend.native_convention()
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::cpu()
    }
}

fn kind_code(kind: PrimitiveKind) -> u16 {
    match kind {
        PrimitiveKind::Permute => 1,
        PrimitiveKind::Broadcast => 2,
        PrimitiveKind::Convert => 3,
    }
}

fn kind_from_code(code: u16) -> Option<PrimitiveKind> {
    PrimitiveKind::ALL
        .into_iter()
        .find(|kind| kind_code(*kind) == code)
}

/// Identifies a concrete implementation type: primitive kind plus backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectType {
    pub kind: PrimitiveKind,
    pub backend: BackendKind,
}

impl ObjectType {
    pub fn new(kind: PrimitiveKind, backend: BackendKind) -> Self {
        Self { kind, backend }
    }

    /// Fixed-width tag: kind code in the high half, backend code in the low half.
    pub fn tag(&self) -> u32 {
        (u32::from(kind_code(self.kind)) << 16) | u32::from(self.backend.code())
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        let kind = kind_from_code((tag >> 16) as u16)?;
        let backend = BackendKind::from_code((tag & 0xffff) as u16)?;
        Some(Self { kind, backend })
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.backend)
    }
}

/// Per-node dispatch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImplState {
    Unselected,
    Selected,
    Ready,
    Executed,
    Failed,
}

impl ImplState {
    /// Whether the object may be handed to the downstream compiler or run.
    pub fn is_ready(&self) -> bool {
        matches!(self, ImplState::Ready | ImplState::Executed)
    }
}
