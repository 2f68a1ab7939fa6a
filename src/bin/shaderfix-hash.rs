use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use shaderfix::hash::{bytecode_hash, fnv64};
use shaderfix::store::ArtifactKind;
use shaderfix::{shader_hash, HashMode, ShaderStage};
use shaderfix_dxbc::{DxbcContainer, ShaderModel};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shaderfix-hash",
    about = "Print the identity of compiled shader blobs and the fix file names they resolve to."
)]
struct Args {
    /// Compiled shader blobs (DXBC)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Stage used for file names (defaults to the stage recorded in the bytecode)
    #[arg(long, value_enum)]
    stage: Option<ShaderStage>,

    /// Hash mode used for file names
    #[arg(long, value_enum, default_value = "fnv")]
    mode: HashMode,

    /// Also list the container's sections
    #[arg(long, action = clap::ArgAction::SetTrue)]
    sections: bool,

    /// Emit one JSON object per input instead of text
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    path: PathBuf,
    len: usize,
    model: Option<String>,
    fnv: String,
    embedded: String,
    bytecode: String,
    /// The bytecode hash is the FNV fallback, not a whitelist CRC.
    bytecode_fallback: bool,
    files: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    for path in &args.inputs {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let report = build_report(path, &bytes, args.stage, args.mode)?;

        if args.json {
            println!("{}", serde_json::to_string(&report)?);
            continue;
        }

        println!("{}", report.path.display());
        println!("  size      {} bytes", report.len);
        if let Some(model) = &report.model {
            println!("  model     {model}");
        }
        println!("  fnv       {}", report.fnv);
        println!("  embedded  {}", report.embedded);
        if report.bytecode_fallback {
            println!("  bytecode  {} (fnv fallback)", report.bytecode);
        } else {
            println!("  bytecode  {}", report.bytecode);
        }
        for file in &report.files {
            println!("  -> {file}");
        }
        if args.sections {
            if let Ok(container) = DxbcContainer::parse(&bytes) {
                for line in container.summary().lines() {
                    println!("  {line}");
                }
            }
        }
    }
    Ok(())
}

fn build_report(
    path: &Path,
    bytes: &[u8],
    stage: Option<ShaderStage>,
    mode: HashMode,
) -> anyhow::Result<Report> {
    let container = DxbcContainer::parse(bytes);
    if let Err(err) = &container {
        debug!(path = %path.display(), %err, "not a well-formed DXBC container");
    }
    let model = container
        .as_ref()
        .ok()
        .and_then(|c| ShaderModel::from_container(c).ok());

    let stage = match (stage, model) {
        (Some(stage), _) => stage,
        (None, Some(model)) => ShaderStage::from(model.program),
        (None, None) => bail!(
            "{}: cannot tell the shader stage, pass --stage",
            path.display()
        ),
    };

    let hash = shader_hash(mode, bytes);
    let files = [
        ArtifactKind::HlslBinary,
        ArtifactKind::HlslSource,
        ArtifactKind::AsmBinary,
        ArtifactKind::AsmSource,
    ]
    .into_iter()
    .map(|kind| kind.file_name(hash, stage))
    .collect();

    Ok(Report {
        path: path.to_path_buf(),
        len: bytes.len(),
        model: model.map(|m| m.to_string()),
        fnv: format!("{:016x}", fnv64(bytes)),
        embedded: format!("{:016x}", shader_hash(HashMode::Embedded, bytes)),
        bytecode: format!("{:016x}", shader_hash(HashMode::Bytecode, bytes)),
        bytecode_fallback: bytecode_hash(bytes).is_none(),
        files,
    })
}
