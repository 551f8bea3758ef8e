//! Rule-based kernel variant choice and dispatch sizing.

use implmap_kernels::{ConvertParams, KernelParams, PermuteParams};

pub const TILE_SIZE: usize = 8;
const VECTOR_WIDTH: usize = 4;
const MAX_LOCAL_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelVariant {
    PermuteRef,
    PermuteTiled,
    BroadcastRef,
    ConvertRef,
    ConvertVec4,
}

impl KernelVariant {
    pub const ALL: [KernelVariant; 5] = [
        KernelVariant::PermuteRef,
        KernelVariant::PermuteTiled,
        KernelVariant::BroadcastRef,
        KernelVariant::ConvertRef,
        KernelVariant::ConvertVec4,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KernelVariant::PermuteRef => "permute_ref",
            KernelVariant::PermuteTiled => "permute_tile_8x8",
            KernelVariant::BroadcastRef => "broadcast_ref",
            KernelVariant::ConvertRef => "convert_ref",
            KernelVariant::ConvertVec4 => "convert_vec4",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|variant| variant.name() == name)
    }
}

/// Global and local work sizes for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchData {
    pub gws: [usize; 3],
    pub lws: [usize; 3],
}

pub fn choose_variant(params: &KernelParams) -> KernelVariant {
    match params {
        KernelParams::Permute(params) if permute_is_tileable(params) => KernelVariant::PermuteTiled,
        KernelParams::Permute(_) => KernelVariant::PermuteRef,
        KernelParams::Broadcast(_) => KernelVariant::BroadcastRef,
        KernelParams::Convert(params) if convert_is_vectorizable(params) => {
            KernelVariant::ConvertVec4
        }
        KernelParams::Convert(_) => KernelVariant::ConvertRef,
    }
}

/// The tiled kernel transposes 8x8 blocks along the last native axis; it
/// applies when that axis moves and both sides of the block are full tiles.
fn permute_is_tileable(params: &PermuteParams) -> bool {
    let n = params.order.len();
    if n < 4 {
        return false;
    }
    let fastest = n - 1;
    if params.order[fastest] as usize == fastest {
        return false;
    }
    let input = &params.base.inputs[0].shape;
    let output = &params.base.output.shape;
    input[fastest] % TILE_SIZE == 0 && output[fastest] % TILE_SIZE == 0
}

fn convert_is_vectorizable(params: &ConvertParams) -> bool {
    let elements = params.base.output.element_count();
    elements > 0 && elements % VECTOR_WIDTH == 0
}

pub fn dispatch_for(variant: KernelVariant, params: &KernelParams, max_work_group_size: usize) -> DispatchData {
    let shape = &params.base().output.shape;
    let mut gws = match variant {
        KernelVariant::ConvertVec4 => [shape.iter().product::<usize>() / VECTOR_WIDTH, 1, 1],
        _ => [
            shape.get(2).copied().unwrap_or(1),
            shape.iter().skip(3).product(),
            shape.iter().take(2).product(),
        ],
    };
    if variant == KernelVariant::PermuteTiled {
        gws[0] = gws[0].div_ceil(TILE_SIZE);
    }
    let gws = gws.map(|dim| dim.max(1));

    let limit = max_work_group_size.clamp(1, MAX_LOCAL_SIZE);
    let lws = [largest_divisor_up_to(gws[0], limit), 1, 1];
    DispatchData { gws, lws }
}

fn largest_divisor_up_to(value: usize, limit: usize) -> usize {
    (1..=limit.min(value))
        .rev()
        .find(|candidate| value % candidate == 0)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use implmap_ir::{DataType, GraphBuilder, TensorLayout};
    use implmap_kernels::DeviceInfo;

    fn derive(graph: GraphBuilder) -> KernelParams {
        let graph = graph.build().unwrap();
        KernelParams::derive(&graph.nodes()[0], &DeviceInfo::ocl("gpu")).unwrap()
    }

    #[test]
    fn channel_last_permute_with_full_tiles_uses_tiled_kernel() {
        let params = derive(GraphBuilder::new().add_permute(
            "p",
            TensorLayout::new(DataType::F32, vec![1, 16, 8, 32]),
            &[0, 2, 3, 1],
        ));
        assert_eq!(choose_variant(&params), KernelVariant::PermuteTiled);

        let dispatch = dispatch_for(KernelVariant::PermuteTiled, &params, 256);
        // Native output is [1, 8, 16, 32].
        assert_eq!(dispatch.gws, [2, 32, 8]);
        assert_eq!(dispatch.lws, [2, 1, 1]);
    }

    #[test]
    fn ragged_permute_falls_back_to_reference() {
        let params = derive(GraphBuilder::new().add_permute(
            "p",
            TensorLayout::new(DataType::F32, vec![1, 3, 5, 7]),
            &[0, 2, 3, 1],
        ));
        assert_eq!(choose_variant(&params), KernelVariant::PermuteRef);
    }

    #[test]
    fn convert_vectorizes_multiples_of_four() {
        let params = derive(GraphBuilder::new().add_convert(
            "c",
            TensorLayout::new(DataType::F32, vec![2, 6]),
            DataType::F16,
        ));
        assert_eq!(choose_variant(&params), KernelVariant::ConvertVec4);
        assert_eq!(dispatch_for(KernelVariant::ConvertVec4, &params, 256).gws, [3, 1, 1]);
    }

    #[test]
    fn local_size_divides_global_size() {
        assert_eq!(largest_divisor_up_to(48, 16), 16);
        assert_eq!(largest_divisor_up_to(7, 16), 7);
        assert_eq!(largest_divisor_up_to(17, 16), 1);
    }

    #[test]
    fn variant_names_round_trip() {
        for variant in KernelVariant::ALL {
            assert_eq!(KernelVariant::from_name(variant.name()), Some(variant));
        }
    }
}
