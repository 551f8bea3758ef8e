//! Kernel parameter derivation.
//!
//! Every parameter object starts from [`default_params`], which copies the
//! element type and layouts of the descriptor into the device's native axis
//! convention. Kind-specific builders then override the output layout and add
//! their own fields. Descriptors are only read, never modified.

use crate::codec::{BlobReader, BlobWriter};
use crate::config::DeviceInfo;
use crate::error::{DispatchError, Result};
use crate::layout::{convert_permute_order, pad_order};
use implmap_ir::{
    is_permutation, resolve_axes_mapping, AxisConvention, DataType, PrimitiveAttributes,
    PrimitiveDesc, PrimitiveKind, TensorLayout,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseParams {
    pub layer_id: String,
    pub dtype: DataType,
    pub inputs: Vec<TensorLayout>,
    pub output: TensorLayout,
}

impl BaseParams {
    pub fn save(&self, writer: &mut BlobWriter) {
        writer.put_str(&self.layer_id);
        writer.put_dtype(self.dtype);
        writer.put_u32(self.inputs.len() as u32);
        for input in &self.inputs {
            writer.put_layout(input);
        }
        writer.put_layout(&self.output);
    }

    pub fn load(reader: &mut BlobReader<'_>) -> Result<Self> {
        let layer_id = reader.get_str()?;
        let dtype = reader.get_dtype()?;
        let count = reader.get_u32()? as usize;
        let mut inputs = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            inputs.push(reader.get_layout()?);
        }
        let output = reader.get_layout()?;
        Ok(Self {
            layer_id,
            dtype,
            inputs,
            output,
        })
    }
}

pub fn to_device_layout(layout: &TensorLayout, device: &DeviceInfo) -> TensorLayout {
    match device.convention() {
        AxisConvention::Native => layout.to_native(),
        AxisConvention::Abstract => layout.clone(),
    }
}

/// Kind-independent defaults: output mirrors the first input.
pub fn default_params(desc: &PrimitiveDesc, device: &DeviceInfo) -> Result<BaseParams> {
    let first = desc.input(0)?;
    let inputs = desc
        .inputs()
        .iter()
        .map(|layout| to_device_layout(layout, device))
        .collect();

    Ok(BaseParams {
        layer_id: desc.id().to_string(),
        dtype: first.dtype,
        inputs,
        output: to_device_layout(first, device),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermuteParams {
    pub base: BaseParams,
    /// Axis order in the device convention.
    pub order: Vec<u16>,
}

impl PermuteParams {
    pub fn derive(desc: &PrimitiveDesc, device: &DeviceInfo) -> Result<Self> {
        let PrimitiveAttributes::Permute { order } = desc.attributes() else {
            return Err(wrong_attributes(desc, PrimitiveKind::Permute));
        };
        if !is_permutation(order) {
            return Err(DispatchError::invalid(
                desc.id(),
                format!("permute order {:?} is not a permutation", order),
            ));
        }

        let input = desc.input(0)?;
        let rank = input.rank();
        if order.len() > rank {
            return Err(DispatchError::invalid(
                desc.id(),
                format!("order of {} axes exceeds input rank {}", order.len(), rank),
            ));
        }

        let abstract_order = pad_order(order, rank);
        let output_shape = abstract_order
            .iter()
            .map(|&axis| input.shape[axis as usize])
            .collect::<Vec<_>>();

        let device_order = match device.convention() {
            AxisConvention::Native => convert_permute_order(order, Some(rank)),
            AxisConvention::Abstract => abstract_order,
        };

        let mut base = default_params(desc, device)?;
        base.output = to_device_layout(&TensorLayout::new(input.dtype, output_shape), device);

        Ok(Self {
            base,
            order: device_order,
        })
    }

    pub fn save(&self, writer: &mut BlobWriter) {
        self.base.save(writer);
        writer.put_u16s(&self.order);
    }

    pub fn load(reader: &mut BlobReader<'_>) -> Result<Self> {
        let base = BaseParams::load(reader)?;
        let order = reader.get_u16s()?;
        if !is_permutation(&order) {
            return Err(DispatchError::corruption(format!(
                "cached permute order {:?} is not a permutation",
                order
            )));
        }
        let rank = cached_input(&base)?.rank();
        if order.len() != rank || base.output.rank() != rank {
            return Err(DispatchError::corruption(format!(
                "cached permute order {:?} does not fit rank {} layouts",
                order, rank
            )));
        }
        Ok(Self { base, order })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastParams {
    pub base: BaseParams,
    /// Convention of `target_shape` and `axes_mapping`. Always abstract, since
    /// the mapping refers to the unpadded input axes; `base` may be native.
    pub mapping_convention: AxisConvention,
    pub target_shape: Vec<usize>,
    /// Target axis for each input axis, numpy defaults resolved.
    pub axes_mapping: Vec<usize>,
}

impl BroadcastParams {
    pub fn derive(desc: &PrimitiveDesc, device: &DeviceInfo) -> Result<Self> {
        let PrimitiveAttributes::Broadcast {
            target_shape,
            axes_mapping,
        } = desc.attributes()
        else {
            return Err(wrong_attributes(desc, PrimitiveKind::Broadcast));
        };

        let input = desc.input(0)?;
        let axes_mapping = resolve_axes_mapping(&input.shape, target_shape, axes_mapping)
            .map_err(|reason| DispatchError::invalid(desc.id(), reason))?;

        let mut base = default_params(desc, device)?;
        base.output = to_device_layout(
            &TensorLayout::new(input.dtype, target_shape.clone()),
            device,
        );

        Ok(Self {
            base,
            mapping_convention: AxisConvention::Abstract,
            target_shape: target_shape.clone(),
            axes_mapping,
        })
    }

    pub fn save(&self, writer: &mut BlobWriter) {
        self.base.save(writer);
        writer.put_u8(self.mapping_convention.code());
        writer.put_usizes(&self.target_shape);
        writer.put_usizes(&self.axes_mapping);
    }

    pub fn load(reader: &mut BlobReader<'_>) -> Result<Self> {
        let base = BaseParams::load(reader)?;
        let code = reader.get_u8()?;
        if AxisConvention::from_code(code) != Some(AxisConvention::Abstract) {
            return Err(DispatchError::corruption(format!(
                "cached broadcast mapping has convention code {code}"
            )));
        }
        let target_shape = reader.get_usizes()?;
        let axes_mapping = reader.get_usizes()?;

        let input = cached_input(&base)?;
        let checked = match input.convention {
            AxisConvention::Abstract => {
                resolve_axes_mapping(&input.shape, &target_shape, &axes_mapping).and_then(
                    |resolved| {
                        if resolved == axes_mapping {
                            Ok(())
                        } else {
                            Err(format!("{:?} is not resolved", axes_mapping))
                        }
                    },
                )
            }
            // Padding hides the abstract input rank; check the mapping alone.
            AxisConvention::Native => check_mapping_bounds(&axes_mapping, &target_shape),
        };
        checked.map_err(|reason| {
            DispatchError::corruption(format!("cached broadcast mapping: {reason}"))
        })?;

        let expected_output = TensorLayout::new(base.output.dtype, target_shape.clone());
        let expected_output = match base.output.convention {
            AxisConvention::Abstract => expected_output,
            AxisConvention::Native => expected_output.to_native(),
        };
        if base.output != expected_output {
            return Err(DispatchError::corruption(format!(
                "cached broadcast output {} does not match target {:?}",
                base.output, target_shape
            )));
        }

        Ok(Self {
            base,
            mapping_convention: AxisConvention::Abstract,
            target_shape,
            axes_mapping,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertParams {
    pub base: BaseParams,
    pub output_dtype: DataType,
}

impl ConvertParams {
    pub fn derive(desc: &PrimitiveDesc, device: &DeviceInfo) -> Result<Self> {
        let PrimitiveAttributes::Convert { output_dtype } = desc.attributes() else {
            return Err(wrong_attributes(desc, PrimitiveKind::Convert));
        };
        if *output_dtype == DataType::F16 && !device.supports_fp16 {
            return Err(DispatchError::invalid(
                desc.id(),
                format!("device `{}` has no f16 support", device.name),
            ));
        }

        let mut base = default_params(desc, device)?;
        base.output = base.output.with_dtype(*output_dtype);

        Ok(Self {
            base,
            output_dtype: *output_dtype,
        })
    }

    pub fn save(&self, writer: &mut BlobWriter) {
        self.base.save(writer);
        writer.put_dtype(self.output_dtype);
    }

    pub fn load(reader: &mut BlobReader<'_>) -> Result<Self> {
        let base = BaseParams::load(reader)?;
        let output_dtype = reader.get_dtype()?;
        if base.output.dtype != output_dtype {
            return Err(DispatchError::corruption(format!(
                "cached convert output is {} but target type is {}",
                base.output.dtype, output_dtype
            )));
        }
        Ok(Self { base, output_dtype })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelParams {
    Permute(PermuteParams),
    Broadcast(BroadcastParams),
    Convert(ConvertParams),
}

impl KernelParams {
    /// Run the builder matching the descriptor's kind.
    pub fn derive(desc: &PrimitiveDesc, device: &DeviceInfo) -> Result<Self> {
        Ok(match desc.kind() {
            PrimitiveKind::Permute => KernelParams::Permute(PermuteParams::derive(desc, device)?),
            PrimitiveKind::Broadcast => {
                KernelParams::Broadcast(BroadcastParams::derive(desc, device)?)
            }
            PrimitiveKind::Convert => KernelParams::Convert(ConvertParams::derive(desc, device)?),
        })
    }

    pub fn kind(&self) -> PrimitiveKind {
        match self {
            KernelParams::Permute(_) => PrimitiveKind::Permute,
            KernelParams::Broadcast(_) => PrimitiveKind::Broadcast,
            KernelParams::Convert(_) => PrimitiveKind::Convert,
        }
    }

    pub fn base(&self) -> &BaseParams {
        match self {
            KernelParams::Permute(params) => &params.base,
            KernelParams::Broadcast(params) => &params.base,
            KernelParams::Convert(params) => &params.base,
        }
    }

    pub fn save(&self, writer: &mut BlobWriter) {
        match self {
            KernelParams::Permute(params) => params.save(writer),
            KernelParams::Broadcast(params) => params.save(writer),
            KernelParams::Convert(params) => params.save(writer),
        }
    }

    pub fn load(kind: PrimitiveKind, reader: &mut BlobReader<'_>) -> Result<Self> {
        Ok(match kind {
            PrimitiveKind::Permute => KernelParams::Permute(PermuteParams::load(reader)?),
            PrimitiveKind::Broadcast => KernelParams::Broadcast(BroadcastParams::load(reader)?),
            PrimitiveKind::Convert => KernelParams::Convert(ConvertParams::load(reader)?),
        })
    }
}

fn cached_input(base: &BaseParams) -> Result<&TensorLayout> {
    match base.inputs.as_slice() {
        [input] => Ok(input),
        inputs => Err(DispatchError::corruption(format!(
            "cached params for `{}` hold {} inputs",
            base.layer_id,
            inputs.len()
        ))),
    }
}

fn check_mapping_bounds(
    axes_mapping: &[usize],
    target_shape: &[usize],
) -> std::result::Result<(), String> {
    if axes_mapping.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(format!("{:?} is not strictly increasing", axes_mapping));
    }
    match axes_mapping.last() {
        Some(&axis) if axis >= target_shape.len() => Err(format!(
            "axis {} is out of range for rank {} target",
            axis,
            target_shape.len()
        )),
        _ => Ok(()),
    }
}

fn wrong_attributes(desc: &PrimitiveDesc, expected: PrimitiveKind) -> DispatchError {
    DispatchError::invalid(
        desc.id(),
        format!("expected {} attributes, found {}", expected, desc.kind()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use implmap_ir::{GraphBuilder, PrimitiveGraph};

    fn single(graph: PrimitiveGraph) -> std::sync::Arc<PrimitiveDesc> {
        graph.nodes()[0].clone()
    }

    fn permute_desc(shape: &[usize], order: &[u16]) -> std::sync::Arc<PrimitiveDesc> {
        single(
            GraphBuilder::new()
                .add_permute("permute", TensorLayout::new(DataType::F32, shape.to_vec()), order)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn permute_on_native_device_converts_order() {
        let desc = permute_desc(&[1, 3, 8, 16], &[0, 2, 3, 1]);
        let params = PermuteParams::derive(&desc, &DeviceInfo::ocl("gpu")).unwrap();

        assert_eq!(params.order, vec![0, 3, 2, 1]);
        // Abstract output is [1, 8, 16, 3]; native form reverses spatial dims.
        assert_eq!(params.base.output.shape, vec![1, 8, 3, 16]);
        assert_eq!(params.base.output.convention, AxisConvention::Native);
        assert_eq!(params.base.inputs[0].shape, vec![1, 3, 16, 8]);
    }

    #[test]
    fn permute_on_host_keeps_abstract_order() {
        let desc = permute_desc(&[2, 3, 4], &[1, 0]);
        let params = PermuteParams::derive(&desc, &DeviceInfo::cpu()).unwrap();

        assert_eq!(params.order, vec![1, 0, 2]);
        assert_eq!(params.base.output.shape, vec![3, 2, 4]);
        assert_eq!(params.base.output.convention, AxisConvention::Abstract);
    }

    #[test]
    fn derivation_does_not_touch_descriptor() {
        let desc = permute_desc(&[1, 2, 3, 4], &[0, 1, 3, 2]);
        let before = (*desc).clone();
        let _ = KernelParams::derive(&desc, &DeviceInfo::ocl("gpu")).unwrap();
        assert_eq!(*desc, before);
    }

    #[test]
    fn broadcast_output_is_target_shape() {
        let desc = single(
            GraphBuilder::new()
                .add_broadcast(
                    "expand",
                    TensorLayout::new(DataType::F16, vec![3, 1]),
                    &[2, 3, 5],
                    &[],
                )
                .build()
                .unwrap(),
        );
        let params = BroadcastParams::derive(&desc, &DeviceInfo::cpu()).unwrap();
        assert_eq!(params.axes_mapping, vec![1, 2]);
        assert_eq!(params.base.output.shape, vec![2, 3, 5]);
        assert_eq!(params.base.output.dtype, DataType::F16);
    }

    #[test]
    fn convert_overrides_only_element_type() {
        let desc = single(
            GraphBuilder::new()
                .add_convert(
                    "cast",
                    TensorLayout::new(DataType::F32, vec![1, 4, 2, 2]),
                    DataType::U8,
                )
                .build()
                .unwrap(),
        );
        let params = ConvertParams::derive(&desc, &DeviceInfo::ocl("gpu")).unwrap();
        assert_eq!(params.base.dtype, DataType::F32);
        assert_eq!(params.base.output.dtype, DataType::U8);
        assert_eq!(params.base.output.shape, params.base.inputs[0].shape);
    }

    #[test]
    fn convert_to_f16_requires_device_support() {
        let desc = single(
            GraphBuilder::new()
                .add_convert("half", TensorLayout::new(DataType::F32, vec![4]), DataType::F16)
                .build()
                .unwrap(),
        );
        let mut device = DeviceInfo::ocl("no-fp16");
        device.supports_fp16 = false;
        let err = ConvertParams::derive(&desc, &device).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidDescriptor { .. }));
    }

    #[test]
    fn params_blob_round_trip() {
        let desc = permute_desc(&[1, 3, 8, 16], &[0, 2, 3, 1]);
        let params = KernelParams::derive(&desc, &DeviceInfo::ocl("gpu")).unwrap();

        let mut writer = BlobWriter::new();
        params.save(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = BlobReader::new(&bytes);
        let loaded = KernelParams::load(PrimitiveKind::Permute, &mut reader).unwrap();
        reader.finish().unwrap();
        assert_eq!(loaded, params);
    }
    fn broadcast_blob(device: &DeviceInfo) -> (BroadcastParams, Vec<u8>) {
        let desc = single(
            GraphBuilder::new()
                .add_broadcast(
                    "expand",
                    TensorLayout::new(DataType::F32, vec![3, 1]),
                    &[2, 3, 5],
                    &[],
                )
                .build()
                .unwrap(),
        );
        let params = BroadcastParams::derive(&desc, device).unwrap();
        let mut writer = BlobWriter::new();
        params.save(&mut writer);
        (params, writer.into_bytes())
    }

    #[test]
    fn broadcast_mapping_stays_abstract_on_native_device() {
        let (params, bytes) = broadcast_blob(&DeviceInfo::ocl("gpu"));
        assert_eq!(params.mapping_convention, AxisConvention::Abstract);
        assert_eq!(params.base.output.convention, AxisConvention::Native);
        assert_eq!(params.target_shape, vec![2, 3, 5]);

        let loaded = BroadcastParams::load(&mut BlobReader::new(&bytes)).unwrap();
        assert_eq!(loaded, params);

        let json = serde_json::to_value(KernelParams::Broadcast(params)).unwrap();
        assert_eq!(json["mapping_convention"], "Abstract");
    }

    #[test]
    fn out_of_range_broadcast_mapping_is_corruption() {
        let (params, mut bytes) = broadcast_blob(&DeviceInfo::cpu());
        // Mapping [1, 2] is the trailing 4 + 2 * 8 bytes.
        let first = bytes.len() - 8 * params.axes_mapping.len();
        bytes[first..first + 8].copy_from_slice(&7u64.to_le_bytes());

        let err = BroadcastParams::load(&mut BlobReader::new(&bytes)).unwrap_err();
        assert!(err.is_cache_corruption());
    }

    #[test]
    fn permute_order_must_match_cached_rank() {
        let desc = permute_desc(&[2, 3, 4], &[1, 0]);
        let mut params = PermuteParams::derive(&desc, &DeviceInfo::cpu()).unwrap();
        params.order = vec![1, 0];
        let mut writer = BlobWriter::new();
        params.save(&mut writer);
        let bytes = writer.into_bytes();

        let err = PermuteParams::load(&mut BlobReader::new(&bytes)).unwrap_err();
        assert!(err.is_cache_corruption());
    }

    #[test]
    fn convert_output_type_must_match_target() {
        let desc = single(
            GraphBuilder::new()
                .add_convert("cast", TensorLayout::new(DataType::F32, vec![4]), DataType::U8)
                .build()
                .unwrap(),
        );
        let mut params = ConvertParams::derive(&desc, &DeviceInfo::cpu()).unwrap();
        params.output_dtype = DataType::I32;
        let mut writer = BlobWriter::new();
        params.save(&mut writer);
        let bytes = writer.into_bytes();

        let err = ConvertParams::load(&mut BlobReader::new(&bytes)).unwrap_err();
        assert!(err.is_cache_corruption());
    }
}
