//! Graph builder entrypoints and helpers.

use crate::dialect::{
    DataType, DescriptorError, PrimitiveAttributes, PrimitiveDesc, PrimitiveKind, TensorLayout,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct PendingNode {
    id: String,
    attributes: PrimitiveAttributes,
    inputs: Vec<TensorLayout>,
}

/// Collects nodes; validation happens once in [`GraphBuilder::build`].
#[derive(Debug, Default, Clone)]
pub struct GraphBuilder {
    nodes: Vec<PendingNode>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add_primitive<N: Into<String>>(
        mut self,
        id: N,
        attributes: PrimitiveAttributes,
        inputs: Vec<TensorLayout>,
    ) -> Self {
        self.nodes.push(PendingNode {
            id: id.into(),
            attributes,
            inputs,
        });
        self
    }

    pub fn add_permute<N: Into<String>>(self, id: N, input: TensorLayout, order: &[u16]) -> Self {
        self.add_primitive(
            id,
            PrimitiveAttributes::Permute {
                order: order.to_vec(),
            },
            vec![input],
        )
    }

    pub fn add_broadcast<N: Into<String>>(
        self,
        id: N,
        input: TensorLayout,
        target_shape: &[usize],
        axes_mapping: &[usize],
    ) -> Self {
        self.add_primitive(
            id,
            PrimitiveAttributes::Broadcast {
                target_shape: target_shape.to_vec(),
                axes_mapping: axes_mapping.to_vec(),
            },
            vec![input],
        )
    }

    pub fn add_convert<N: Into<String>>(
        self,
        id: N,
        input: TensorLayout,
        output_dtype: DataType,
    ) -> Self {
        self.add_primitive(
            id,
            PrimitiveAttributes::Convert { output_dtype },
            vec![input],
        )
    }

    pub fn build(self) -> Result<PrimitiveGraph, DescriptorError> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for node in self.nodes {
            if !seen.insert(node.id.clone()) {
                return Err(DescriptorError::new(node.id, "duplicate node id"));
            }
            let desc = PrimitiveDesc::new(node.id, node.attributes, node.inputs)?;
            nodes.push(Arc::new(desc));
        }

        debug!(nodes = nodes.len(), "built primitive graph");
        Ok(PrimitiveGraph { nodes })
    }
}

/// Finalized, read-only sequence of primitive descriptors in node order.
#[derive(Debug, Clone)]
pub struct PrimitiveGraph {
    nodes: Vec<Arc<PrimitiveDesc>>,
}

impl PrimitiveGraph {
    pub fn nodes(&self) -> &[Arc<PrimitiveDesc>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Arc<PrimitiveDesc>> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    pub fn count_kind(&self, kind: PrimitiveKind) -> usize {
        self.nodes.iter().filter(|node| node.kind() == kind).count()
    }
}

pub fn layout(shape: &[usize], dtype: DataType) -> TensorLayout {
    TensorLayout::new(dtype, shape.to_vec())
}
