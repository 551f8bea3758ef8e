use anyhow::Result;
use implmap::cache::CacheFile;
use implmap::compiler::{
    default_registry, CompileSource, CompiledGraph, CompilerConfig, CompilerPipeline,
    CompilerSession, SessionOptions,
};
use implmap::backend_cpu::CpuKernel;
use implmap::ir::{DataType, GraphBuilder, PrimitiveDesc, PrimitiveGraph, PrimitiveKind, TensorLayout};
use implmap::kernels::{
    BackendKind, Capabilities, DeviceInfo, DispatchError, DynKernelImpl, ImplementationRegistry,
    KernelParams, PermuteParams,
};
use ndarray::{ArrayD, IxDyn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("implmap-it-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir.join("impls.bin")
}

fn block() -> Result<PrimitiveGraph> {
    let x = TensorLayout::new(DataType::F32, vec![1, 8, 16, 16]);
    Ok(GraphBuilder::new()
        .add_permute("to_nhwc", x.clone(), &[0, 2, 3, 1])
        .add_broadcast("scale", TensorLayout::new(DataType::F32, vec![8, 1, 1]), &[1, 8, 16, 16], &[])
        .add_convert("to_half", x, DataType::F16)
        .build()?)
}

#[test]
fn channel_last_permute_gets_native_order_on_ocl() -> Result<()> {
    let pipeline = CompilerPipeline::new(CompilerConfig::for_backend(BackendKind::Ocl));
    let compiled = pipeline.compile(&block()?)?;

    let permute = compiled.get("to_nhwc").expect("permute node");
    let KernelParams::Permute(PermuteParams { order, .. }) = permute.params() else {
        panic!("expected permute params");
    };
    assert_eq!(order, &vec![0, 3, 2, 1]);
    assert_eq!(permute.object_type().tag(), 0x0001_0002);
    Ok(())
}

#[test]
fn host_backend_runs_the_whole_block() -> Result<()> {
    let mut compiled = CompilerPipeline::new(CompilerConfig::default()).compile(&block()?)?;
    let input = ArrayD::from_shape_fn(IxDyn(&[1, 8, 16, 16]), |idx| idx[1] as f32);

    let nhwc = compiled.execute_node("to_nhwc", &[input])?.host().expect("host output");
    assert_eq!(nhwc.shape(), &[1, 16, 16, 8]);
    assert_eq!(nhwc[[0, 3, 5, 7]], 7.0);
    Ok(())
}

#[test]
fn unregistered_kind_yields_no_partial_graph() -> Result<()> {
    let mut registry = ImplementationRegistry::new();
    registry.register(
        PrimitiveKind::Permute,
        BackendKind::Cpu,
        "permute_only",
        |desc: &Arc<PrimitiveDesc>, device: &DeviceInfo| -> implmap::kernels::Result<DynKernelImpl> {
            Ok(Box::new(CpuKernel::create(desc, device)?))
        },
        Capabilities::any(),
    );
    let pipeline = CompilerPipeline::with_registry(CompilerConfig::default(), Arc::new(registry));

    let err = pipeline.compile(&block()?).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::NotFound {
            kind: PrimitiveKind::Broadcast | PrimitiveKind::Convert,
            backend: BackendKind::Cpu,
            ..
        }
    ));
    Ok(())
}

#[test]
fn later_registration_overrides_earlier() -> Result<()> {
    let mut registry = default_registry();
    registry.register(
        PrimitiveKind::Convert,
        BackendKind::Cpu,
        "convert_override",
        |desc: &Arc<PrimitiveDesc>, device: &DeviceInfo| -> implmap::kernels::Result<DynKernelImpl> {
            Ok(Box::new(CpuKernel::create(desc, device)?))
        },
        Capabilities::any(),
    );
    assert_eq!(
        registry.lookup(PrimitiveKind::Convert, BackendKind::Cpu)?.name(),
        "convert_override"
    );
    assert_eq!(
        registry.lookup(PrimitiveKind::Permute, BackendKind::Cpu)?.name(),
        "permute_ref"
    );
    Ok(())
}

#[test]
fn clone_matches_a_fresh_compile() -> Result<()> {
    let graph = block()?;
    let pipeline = CompilerPipeline::new(CompilerConfig::for_backend(BackendKind::Ocl));
    let compiled = pipeline.compile(&graph)?;
    let cloned = compiled.clone();
    let fresh = pipeline.compile(&graph)?;

    for ((a, b), c) in compiled.impls().iter().zip(cloned.impls()).zip(fresh.impls()) {
        assert_eq!(a.params(), b.params());
        assert_eq!(b.params(), c.params());
        assert_eq!(b.kernel_name(), c.kernel_name());
    }
    Ok(())
}

#[test]
fn cache_round_trips_every_registered_type() -> Result<()> {
    let graph = block()?;
    for backend in BackendKind::ALL {
        let pipeline = CompilerPipeline::new(CompilerConfig::for_backend(backend));
        let compiled = pipeline.compile(&graph)?;
        let bytes = compiled.to_cache().to_bytes();

        let restored = pipeline.restore(&graph, &CacheFile::from_bytes(&bytes)?)?;
        assert_eq!(restored.object_types(), compiled.object_types());
        for (a, b) in compiled.impls().iter().zip(restored.impls()) {
            assert_eq!(a.params(), b.params());
            assert_eq!(a.device(), b.device());
        }
    }
    Ok(())
}

#[test]
fn truncated_cache_is_discarded_and_rebuilt() -> Result<()> {
    let path = scratch("truncated");
    let options = SessionOptions {
        cache_path: Some(path.clone()),
        ..SessionOptions::default()
    };
    let config = CompilerConfig::for_backend(BackendKind::Ocl);

    CompilerSession::new(config.clone(), options.clone())?.compile(&block()?)?;
    let bytes = fs::read(&path)?;
    fs::write(&path, &bytes[..bytes.len() - 3])?;

    let mut session = CompilerSession::new(config.clone(), options.clone())?;
    let rebuilt = session.compile(&block()?)?;
    assert_eq!(rebuilt.source, CompileSource::Dispatch);
    assert_eq!(rebuilt.graph.len(), 3);

    let mut session = CompilerSession::new(config, options)?;
    assert_eq!(session.compile(&block()?)?.source, CompileSource::Cache);
    session.shutdown()?;
    Ok(())
}

#[test]
fn cache_from_another_graph_is_rejected() -> Result<()> {
    let device = DeviceInfo::cpu();
    let pipeline = CompilerPipeline::new(CompilerConfig::default());
    let cache = pipeline.compile(&block()?)?.to_cache();

    let other = GraphBuilder::new()
        .add_convert("only", TensorLayout::new(DataType::F32, vec![4]), DataType::I8)
        .build()?;
    let err = CompiledGraph::from_cache(&other, &cache, &device).unwrap_err();
    assert!(err.is_cache_corruption());
    Ok(())
}
