//! patchspec CLI
//!
//! # Usage
//!
//! ```bash
//! # list indirect-call targets
//! patchspec-cli --module image.json --dump-indirect-call
//!
//! # emit call-graph dot edges
//! patchspec-cli --module image.json --dump-call-graph
//!
//! # mine specs from a patch
//! patchspec-cli --module image.json --infer-patch-spec \
//!     --patch fix.patch --output specs.csv
//!
//! # reload specs into checkers
//! patchspec-cli --module image.json --detect-patch-bug \
//!     --specs specs.csv --peer peers.txt --fast-mode
//! ```

use clap::Parser;
use patchspec_ir::features::checkers::CheckerManager;
use patchspec_ir::{
    load_specs, write_specs, AnalysisConfig, ModuleImage, PatchSpecError, PeerTable, Session,
};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "patchspec-cli")]
#[command(about = "Mine bug specifications from patches and reload them as checkers", long_about = None)]
struct Cli {
    /// Module image (IR + SEG) produced by the loader
    #[arg(long)]
    module: PathBuf,

    /// Print every indirect-call target
    #[arg(long)]
    dump_indirect_call: bool,

    /// Emit call-graph dot edges
    #[arg(long)]
    dump_call_graph: bool,

    /// Run spec inference over a patch
    #[arg(long)]
    infer_patch_spec: bool,

    /// The diff file listing +/-<file>:<line> entries
    #[arg(long)]
    patch: Option<PathBuf>,

    /// Output CSV path (sibling .smt files land next to it)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Load a spec CSV and register checkers
    #[arg(long)]
    detect_patch_bug: bool,

    /// Input spec CSV
    #[arg(long)]
    specs: Option<PathBuf>,

    /// Peer-function file (space-separated names per line)
    #[arg(long)]
    peer: Option<PathBuf>,

    /// Widen checkers to peer functions without re-deriving specs
    #[arg(long)]
    fast_mode: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PatchSpecError> {
    let image = load_module_image(&cli.module)?;
    let config = AnalysisConfig {
        fast_mode: cli.fast_mode,
        ..AnalysisConfig::default()
    };
    let mut session = Session::new(image, config);

    let peers = match &cli.peer {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| {
                PatchSpecError::config(format!("cannot read peer file: {}", e))
                    .with_file(path.display().to_string())
            })?;
            PeerTable::load(&text)
        }
        None => PeerTable::new(),
    };

    if cli.dump_indirect_call {
        for line in session.dump_indirect_calls() {
            println!("{}", line);
        }
        return Ok(());
    }

    if cli.dump_call_graph {
        for edge in session.dump_call_graph() {
            println!("{}", edge);
        }
        return Ok(());
    }

    if cli.infer_patch_spec {
        let patch_path = cli
            .patch
            .ok_or_else(|| PatchSpecError::config("--infer-patch-spec requires --patch"))?;
        let output = cli
            .output
            .ok_or_else(|| PatchSpecError::config("--infer-patch-spec requires --output"))?;
        let patch_text = fs::read_to_string(&patch_path).map_err(|e| {
            PatchSpecError::config(format!("cannot read patch file: {}", e))
                .with_file(patch_path.display().to_string())
        })?;

        let specs = session.infer_patch_spec(&patch_text, &peers)?;
        write_specs(&output, &specs)?;
        println!(
            "{} specs written to {}",
            specs.len(),
            output.display()
        );
        return Ok(());
    }

    if cli.detect_patch_bug {
        let specs_path = cli
            .specs
            .ok_or_else(|| PatchSpecError::config("--detect-patch-bug requires --specs"))?;
        let specs = load_specs(&specs_path)?;
        let mut manager = CheckerManager::new();
        manager.register_specs(&specs, &peers, cli.fast_mode);
        println!("{} checkers registered", manager.len());
        return Ok(());
    }

    Err(PatchSpecError::config(
        "nothing to do: pass --dump-indirect-call, --dump-call-graph, \
         --infer-patch-spec or --detect-patch-bug",
    ))
}

fn load_module_image(path: &PathBuf) -> Result<ModuleImage, PatchSpecError> {
    let text = fs::read_to_string(path).map_err(|e| {
        PatchSpecError::config(format!("cannot read module image: {}", e))
            .with_file(path.display().to_string())
    })?;
    let image: ModuleImage = serde_json::from_str(&text)?;
    Ok(image)
}
