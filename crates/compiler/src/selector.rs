//! Per-node implementation dispatch.
//!
//! Each node moves `Unselected -> Selected -> Ready`, or to `Failed` on the
//! first error. A graph either compiles completely or not at all.

use implmap_ir::{PrimitiveDesc, PrimitiveGraph};
use implmap_kernels::{
    DeviceInfo, DispatchError, DynKernelImpl, ImplState, ImplementationRegistry, Result,
};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn dispatch_node(
    registry: &ImplementationRegistry,
    desc: &Arc<PrimitiveDesc>,
    device: &DeviceInfo,
) -> Result<DynKernelImpl> {
    let node = desc.id();
    let result = registry.select(desc, device.backend).and_then(|entry| {
        debug!(
            node,
            from = ?ImplState::Unselected,
            to = ?ImplState::Selected,
            implementation = entry.name(),
            "implementation selected"
        );
        entry.create(desc, device)
    });

    match result {
        Ok(object) if object.state().is_ready() => {
            debug!(
                node,
                from = ?ImplState::Selected,
                to = ?ImplState::Ready,
                kernel = object.kernel_name(),
                "implementation ready"
            );
            Ok(object)
        }
        Ok(object) => {
            let err = DispatchError::invalid(
                node,
                format!("implementation returned in state {:?}", object.state()),
            );
            warn!(node, to = ?ImplState::Failed, error = %err, "dispatch failed");
            Err(err)
        }
        Err(err) => {
            warn!(node, to = ?ImplState::Failed, error = %err, "dispatch failed");
            Err(err)
        }
    }
}

/// Dispatch every node in graph order. Results keep node order even when
/// dispatched in parallel; the first error aborts the graph.
pub fn dispatch_graph(
    registry: &ImplementationRegistry,
    graph: &PrimitiveGraph,
    device: &DeviceInfo,
    parallel: bool,
) -> Result<Vec<DynKernelImpl>> {
    if parallel {
        graph
            .nodes()
            .par_iter()
            .map(|desc| dispatch_node(registry, desc, device))
            .collect()
    } else {
        graph
            .nodes()
            .iter()
            .map(|desc| dispatch_node(registry, desc, device))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::default_registry;
    use implmap_backend_cpu::attach_cpu_impls;
    use implmap_ir::{DataType, GraphBuilder, PrimitiveKind, TensorLayout};
    use implmap_kernels::BackendKind;

    fn mixed_graph() -> PrimitiveGraph {
        let x = TensorLayout::new(DataType::F32, vec![1, 3, 8, 8]);
        GraphBuilder::new()
            .add_permute("to_nhwc", x.clone(), &[0, 2, 3, 1])
            .add_convert("to_half", x.clone(), DataType::F16)
            .add_broadcast("bias", TensorLayout::new(DataType::F32, vec![3, 1, 1]), &[1, 3, 8, 8], &[])
            .build()
            .unwrap()
    }

    #[test]
    fn parallel_dispatch_keeps_node_order() {
        let registry = default_registry();
        let graph = mixed_graph();
        for parallel in [false, true] {
            let objects = dispatch_graph(&registry, &graph, &DeviceInfo::ocl("gpu"), parallel).unwrap();
            let ids: Vec<_> = objects.iter().map(|o| o.descriptor().id().to_string()).collect();
            assert_eq!(ids, ["to_nhwc", "to_half", "bias"]);
            assert!(objects.iter().all(|o| o.state() == ImplState::Ready));
        }
    }

    #[test]
    fn missing_backend_fails_whole_graph() {
        let mut registry = ImplementationRegistry::new();
        attach_cpu_impls(&mut registry);
        let err = dispatch_graph(&registry, &mixed_graph(), &DeviceInfo::ocl("gpu"), true).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::NotFound {
                backend: BackendKind::Ocl,
                ..
            }
        ));
    }

    #[test]
    fn single_node_dispatch_uses_registered_factory() {
        let registry = default_registry();
        let graph = mixed_graph();
        let object = dispatch_node(&registry, &graph.nodes()[1], &DeviceInfo::cpu()).unwrap();
        assert_eq!(object.object_type().kind, PrimitiveKind::Convert);
        assert_eq!(object.kernel_name(), "convert_ref");
    }
}
