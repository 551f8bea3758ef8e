//! Implementation registry keyed by (primitive kind, backend kind).

use crate::config::{BackendKind, DeviceInfo};
use crate::error::{DispatchError, Result};
use crate::implementation::DynKernelImpl;
use implmap_ir::{DataType, PrimitiveDesc, PrimitiveKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub type ImplFactory =
    Arc<dyn Fn(&Arc<PrimitiveDesc>, &DeviceInfo) -> Result<DynKernelImpl> + Send + Sync>;

/// Optional restrictions on when an entry applies. Empty means always.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub dtypes: Option<Vec<DataType>>,
    pub max_rank: Option<usize>,
}

impl Capabilities {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_dtypes(mut self, dtypes: &[DataType]) -> Self {
        self.dtypes = Some(dtypes.to_vec());
        self
    }

    pub fn with_max_rank(mut self, rank: usize) -> Self {
        self.max_rank = Some(rank);
        self
    }

    pub fn check(&self, desc: &PrimitiveDesc) -> std::result::Result<(), String> {
        for input in desc.inputs() {
            if let Some(dtypes) = &self.dtypes {
                if !dtypes.contains(&input.dtype) {
                    return Err(format!("input type {} is not supported", input.dtype));
                }
            }
            if let Some(max_rank) = self.max_rank {
                if input.rank() > max_rank {
                    return Err(format!(
                        "input rank {} exceeds supported rank {}",
                        input.rank(),
                        max_rank
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ImplementationEntry {
    name: String,
    factory: ImplFactory,
    capabilities: Capabilities,
}

impl ImplementationEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn create(&self, desc: &Arc<PrimitiveDesc>, device: &DeviceInfo) -> Result<DynKernelImpl> {
        (self.factory)(desc, device)
    }
}

impl fmt::Debug for ImplementationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationEntry")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Populated during initialization through `&mut self`, then shared
/// read-only (typically behind an `Arc`) by every compilation.
#[derive(Default, Clone, Debug)]
pub struct ImplementationRegistry {
    entries: HashMap<(PrimitiveKind, BackendKind), ImplementationEntry>,
}

impl ImplementationRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Install the factory for `(kind, backend)`, replacing any earlier one.
    pub fn register<N, F>(
        &mut self,
        kind: PrimitiveKind,
        backend: BackendKind,
        name: N,
        factory: F,
        capabilities: Capabilities,
    ) where
        N: Into<String>,
        F: Fn(&Arc<PrimitiveDesc>, &DeviceInfo) -> Result<DynKernelImpl> + Send + Sync + 'static,
    {
        let entry = ImplementationEntry {
            name: name.into(),
            factory: Arc::new(factory),
            capabilities,
        };
        match self.entries.insert((kind, backend), entry) {
            Some(previous) => debug!(
                %kind,
                %backend,
                replaced = previous.name(),
                "overriding registered implementation"
            ),
            None => debug!(%kind, %backend, "registered implementation"),
        }
    }

    pub fn lookup(&self, kind: PrimitiveKind, backend: BackendKind) -> Result<&ImplementationEntry> {
        self.entries
            .get(&(kind, backend))
            .ok_or_else(|| DispatchError::not_registered(kind, backend))
    }

    /// Lookup plus capability check against the descriptor's inputs.
    pub fn select(&self, desc: &PrimitiveDesc, backend: BackendKind) -> Result<&ImplementationEntry> {
        let entry = self.lookup(desc.kind(), backend)?;
        entry
            .capabilities
            .check(desc)
            .map_err(|reason| DispatchError::NotFound {
                kind: desc.kind(),
                backend,
                reason: format!("`{}` rejected `{}`: {}", entry.name, desc.id(), reason),
            })?;
        Ok(entry)
    }

    pub fn contains(&self, kind: PrimitiveKind, backend: BackendKind) -> bool {
        self.entries.contains_key(&(kind, backend))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered keys in a stable order.
    pub fn keys(&self) -> Vec<(PrimitiveKind, BackendKind)> {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort();
        keys
    }
}
