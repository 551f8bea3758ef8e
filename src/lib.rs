//! implmap: maps abstract primitive graphs onto backend implementation
//! objects, with a binary cache of the selections.

pub use implmap_backend_cpu as backend_cpu;
pub use implmap_backend_ocl as backend_ocl;
pub use implmap_cache as cache;
pub use implmap_compiler as compiler;
pub use implmap_ir as ir;
pub use implmap_kernels as kernels;
