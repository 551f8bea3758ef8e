//! CLI wiring for the implmap toolkit.

use crate::compiled::JsonKernelCompiler;
use crate::pipeline::CompilerConfig;
use crate::session::{CompilerSession, PersistStatus, SessionOptions};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use implmap_cache::CacheFile;
use implmap_ir::{DataType, GraphBuilder, PrimitiveGraph, TensorLayout};
use implmap_kernels::{checked_convert_permute_order, BackendKind};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "implmap", about = "Primitive-to-implementation mapping toolkit")]
pub struct Cli {
    /// JSON file holding a `CompilerConfig`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum BackendArg {
    Cpu,
    Ocl,
}

impl From<BackendArg> for BackendKind {
    fn from(value: BackendArg) -> BackendKind {
        match value {
            BackendArg::Cpu => BackendKind::Cpu,
            BackendArg::Ocl => BackendKind::Ocl,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert an abstract permute order to the native convention.
    ConvertOrder {
        #[arg(long, value_delimiter = ',', required = true)]
        order: Vec<u16>,
        /// Minimum rank hint; the result is padded to at least 4.
        #[arg(long)]
        rank: Option<usize>,
    },
    /// Compile a sample graph and print a JSON summary of the selections.
    Compile {
        #[arg(long)]
        cache: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        clear_cache: bool,
    },
    /// List the records of a cache file.
    InspectCache { path: PathBuf },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli {
        config,
        backend,
        command,
    } = cli;
    let mut config = match config {
        Some(path) => load_config(&path)?,
        None => CompilerConfig::default(),
    };
    if let Some(backend) = backend {
        config.backend = backend.into();
    }

    match command {
        Command::ConvertOrder { order, rank } => {
            let converted = convert_order(&order, rank)?;
            println!("{}", serde_json::to_string(&converted)?);
        }
        Command::Compile { cache, clear_cache } => {
            let options = SessionOptions {
                cache_path: cache,
                clear_cache,
                ..SessionOptions::default()
            };
            let mut session = CompilerSession::new(config, options)?;
            let graph = sample_graph()?;
            let result = session.compile(&graph)?;
            let kernels = result.graph.emit(&JsonKernelCompiler)?;

            let persisted = match &result.persist {
                PersistStatus::Skipped => json!(null),
                PersistStatus::Written { attempts } => json!({ "attempts": attempts }),
                PersistStatus::Failed(err) => json!({ "error": err.to_string() }),
            };
            let summary = json!({
                "backend": session.config().backend,
                "device": result.graph.device(),
                "source": result.source,
                "persisted": persisted,
                "nodes": kernels
                    .iter()
                    .map(|kernel| json!({
                        "node": kernel.node,
                        "object_type": kernel.object_type.to_string(),
                        "tag": format!("{:#010x}", kernel.object_type.tag()),
                        "kernel": kernel.kernel_name,
                        "params": kernel.payload,
                    }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            session.shutdown()?;
        }
        Command::InspectCache { path } => {
            let Some(cache) = CacheFile::load(&path)? else {
                bail!("no cache file at {}", path.display());
            };
            info!(path = %path.display(), records = cache.len(), "inspecting cache");
            for (index, record) in cache.records().iter().enumerate() {
                println!(
                    "{index:>4}  {:#010x}  {:<16}  {} bytes",
                    record.object_type.tag(),
                    record.object_type.to_string(),
                    record.blob.len()
                );
            }
        }
    }
    Ok(())
}

fn convert_order(order: &[u16], rank: Option<usize>) -> Result<Vec<u16>> {
    match checked_convert_permute_order(order, rank) {
        Some(converted) => Ok(converted),
        None => bail!(
            "--order {:?} is not a permutation of 0..{}",
            order,
            order.len()
        ),
    }
}

fn load_config(path: &Path) -> Result<CompilerConfig> {
    let blob = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&blob)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

/// A small vision-style block: layout change, bias broadcast and a cast.
pub fn sample_graph() -> Result<PrimitiveGraph> {
    let activations = TensorLayout::new(DataType::F32, vec![1, 16, 32, 32]);
    let graph = GraphBuilder::new()
        .add_permute("stem/to_nhwc", activations.clone(), &[0, 2, 3, 1])
        .add_broadcast(
            "stem/bias",
            TensorLayout::new(DataType::F32, vec![16, 1, 1]),
            &[1, 16, 32, 32],
            &[],
        )
        .add_convert("stem/to_half", activations, DataType::F16)
        .build()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_convert_order_arguments() {
        let cli = Cli::try_parse_from(["implmap", "convert-order", "--order", "0,2,3,1", "--rank", "4"]).unwrap();
        match cli.command {
            Command::ConvertOrder { order, rank } => {
                assert_eq!(order, vec![0, 2, 3, 1]);
                assert_eq!(rank, Some(4));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn convert_order_rejects_out_of_range_axes() {
        let err = convert_order(&[9], None).unwrap_err();
        assert!(err.to_string().contains("not a permutation"));
        assert!(convert_order(&[1, 1], Some(4)).is_err());
        assert_eq!(convert_order(&[0, 2, 3, 1], Some(4)).unwrap(), vec![0, 3, 2, 1]);
    }

    #[test]
    fn sample_graph_compiles_on_both_backends() {
        let graph = sample_graph().unwrap();
        for backend in BackendKind::ALL {
            let mut session =
                CompilerSession::new(CompilerConfig::for_backend(backend), SessionOptions::default()).unwrap();
            assert_eq!(session.compile(&graph).unwrap().graph.len(), 3);
        }
    }
}
