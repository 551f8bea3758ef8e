//! Primitive descriptors and tensor layout metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    I32,
    I8,
    U8,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::F32,
        DataType::F16,
        DataType::I32,
        DataType::I8,
        DataType::U8,
    ];

    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::I32 => "i32",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
        }
    }

    /// Stable code used by the binary cache.
    pub fn code(&self) -> u8 {
        match self {
            DataType::F32 => 0,
            DataType::F16 => 1,
            DataType::I32 => 2,
            DataType::I8 => 3,
            DataType::U8 => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|dtype| dtype.code() == code)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis ordering scheme a shape or an axis order is expressed in.
///
/// `Abstract` lists batch, channel, then spatial axes slowest to fastest
/// (`bfyx`). `Native` keeps batch and channel first and stores the spatial
/// axes in the opposite order (`bfxy`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum AxisConvention {
    #[default]
    Abstract,
    Native,
}

impl AxisConvention {
    pub fn code(&self) -> u8 {
        match self {
            AxisConvention::Abstract => 0,
            AxisConvention::Native => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AxisConvention::Abstract),
            1 => Some(AxisConvention::Native),
            _ => None,
        }
    }
}

/// Minimum rank native layouts are padded to.
pub const NATIVE_MIN_RANK: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TensorLayout {
    pub dtype: DataType,
    pub shape: Vec<usize>,
    pub convention: AxisConvention,
}

impl TensorLayout {
    pub fn new(dtype: DataType, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape,
            convention: AxisConvention::Abstract,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn with_dtype(&self, dtype: DataType) -> Self {
        Self {
            dtype,
            ..self.clone()
        }
    }

    /// Re-express the layout in the native convention: trailing unit axes
    /// up to rank 4, spatial axes reversed.
    pub fn to_native(&self) -> Self {
        if self.convention == AxisConvention::Native {
            return self.clone();
        }
        let mut shape = self.shape.clone();
        while shape.len() < NATIVE_MIN_RANK {
            shape.push(1);
        }
        shape[2..].reverse();
        Self {
            dtype: self.dtype,
            shape,
            convention: AxisConvention::Native,
        }
    }
}

impl fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .shape
            .iter()
            .map(|dim| dim.to_string())
            .collect::<Vec<_>>()
            .join("x");
        write!(f, "{}[{}]", self.dtype, dims)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    Permute,
    Broadcast,
    Convert,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 3] = [
        PrimitiveKind::Permute,
        PrimitiveKind::Broadcast,
        PrimitiveKind::Convert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::Permute => "permute",
            PrimitiveKind::Broadcast => "broadcast",
            PrimitiveKind::Convert => "convert",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PrimitiveAttributes {
    Permute {
        order: Vec<u16>,
    },
    /// An empty `axes_mapping` aligns input axes with the trailing target axes.
    Broadcast {
        target_shape: Vec<usize>,
        axes_mapping: Vec<usize>,
    },
    Convert {
        output_dtype: DataType,
    },
}

impl PrimitiveAttributes {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            PrimitiveAttributes::Permute { .. } => PrimitiveKind::Permute,
            PrimitiveAttributes::Broadcast { .. } => PrimitiveKind::Broadcast,
            PrimitiveAttributes::Convert { .. } => PrimitiveKind::Convert,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid descriptor `{node}`: {reason}")]
pub struct DescriptorError {
    pub node: String,
    pub reason: String,
}

impl DescriptorError {
    pub fn new(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

/// One graph node: operator attributes plus the layouts of its inputs.
///
/// Fields are private so a descriptor cannot change once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveDesc {
    id: String,
    attributes: PrimitiveAttributes,
    inputs: Vec<TensorLayout>,
}

impl PrimitiveDesc {
    pub fn new<N: Into<String>>(
        id: N,
        attributes: PrimitiveAttributes,
        inputs: Vec<TensorLayout>,
    ) -> Result<Self, DescriptorError> {
        let desc = Self {
            id: id.into(),
            attributes,
            inputs,
        };
        desc.validate()?;
        Ok(desc)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.attributes.kind()
    }

    pub fn attributes(&self) -> &PrimitiveAttributes {
        &self.attributes
    }

    pub fn inputs(&self) -> &[TensorLayout] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Result<&TensorLayout, DescriptorError> {
        self.inputs.get(index).ok_or_else(|| {
            DescriptorError::new(&self.id, format!("missing input layout #{index}"))
        })
    }

    /// Kind-specific attribute checks.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.inputs.len() != 1 {
            return Err(self.error(format!(
                "{} expects exactly one input, got {}",
                self.kind(),
                self.inputs.len()
            )));
        }
        let input = &self.inputs[0];

        match &self.attributes {
            PrimitiveAttributes::Permute { order } => {
                if !is_permutation(order) {
                    return Err(self.error(format!(
                        "permute order {:?} is not a permutation of 0..{}",
                        order,
                        order.len()
                    )));
                }
                if order.len() > input.rank() {
                    return Err(self.error(format!(
                        "permute order has {} axes but input {} has rank {}",
                        order.len(),
                        input,
                        input.rank()
                    )));
                }
            }
            PrimitiveAttributes::Broadcast {
                target_shape,
                axes_mapping,
            } => {
                resolve_axes_mapping(&input.shape, target_shape, axes_mapping)
                    .map_err(|reason| self.error(reason))?;
            }
            PrimitiveAttributes::Convert { .. } => {}
        }
        Ok(())
    }

    fn error(&self, reason: String) -> DescriptorError {
        DescriptorError::new(&self.id, reason)
    }
}

pub fn is_permutation(order: &[u16]) -> bool {
    let mut seen = vec![false; order.len()];
    for &axis in order {
        match seen.get_mut(axis as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

/// Map each input axis onto a target axis, checking broadcast compatibility.
pub fn resolve_axes_mapping(
    input_shape: &[usize],
    target_shape: &[usize],
    axes_mapping: &[usize],
) -> Result<Vec<usize>, String> {
    if input_shape.len() > target_shape.len() {
        return Err(format!(
            "cannot broadcast rank {} input to rank {} target",
            input_shape.len(),
            target_shape.len()
        ));
    }

    let mapping = if axes_mapping.is_empty() {
        let offset = target_shape.len() - input_shape.len();
        (offset..target_shape.len()).collect::<Vec<_>>()
    } else {
        if axes_mapping.len() != input_shape.len() {
            return Err(format!(
                "axes mapping has {} entries for rank {} input",
                axes_mapping.len(),
                input_shape.len()
            ));
        }
        if axes_mapping.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(format!(
                "axes mapping {:?} must be strictly increasing",
                axes_mapping
            ));
        }
        axes_mapping.to_vec()
    };

    for (input_axis, &target_axis) in mapping.iter().enumerate() {
        let Some(&target_dim) = target_shape.get(target_axis) else {
            return Err(format!(
                "axes mapping points at axis {} of rank {} target",
                target_axis,
                target_shape.len()
            ));
        };
        let dim = input_shape[input_axis];
        if dim != 1 && dim != target_dim {
            return Err(format!(
                "input dim {} (axis {}) is not broadcastable to {}",
                dim, input_axis, target_dim
            ));
        }
    }

    Ok(mapping)
}
