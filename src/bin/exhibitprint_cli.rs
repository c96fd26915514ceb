//! ExhibitPrint CLI - Build print-ready exhibit graphics
//!
//! Usage: exhibitprint-cli <deliverable>|all --finalize <mode>
//! Outputs a JSON report to stdout, logs to stderr.
//! Exit codes: 0 success, 2 validation failure, 3 render/export failure, 1 other.

use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use exhibitprint_core::{
    AssetCache, BuildOptions, DirectorySources, FinalizationMode, GraphicsError, GraphicsPipeline, GraphicsSpec,
    Palette,
};

#[derive(Parser)]
#[command(name = "exhibitprint-cli")]
#[command(about = "ExhibitPrint CLI - Print-ready exhibit graphics compiler")]
struct Cli {
    /// Deliverable name, or `all`
    #[arg(required_unless_present = "clear_cache", requires = "finalize")]
    target: Option<String>,

    /// Shared spec JSON. The built-in exhibit spec is used when omitted.
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Brand palette JSON overriding the built-in palette
    #[arg(long)]
    palette: Option<PathBuf>,

    /// Color finalization of the exported PDF. There is no default:
    /// `device-cmyk` for printers that take CMYK, `rgb-for-printer-conversion`
    /// for printers that convert themselves.
    #[arg(long, value_enum)]
    finalize: Option<FinalizationMode>,

    /// Draw trim, safe-area and no-content guides. Never for production files.
    #[arg(long)]
    guides: bool,

    /// Raster density for generated assets
    #[arg(long, default_value_t = 150)]
    dpi: u32,

    /// Proof PNG density
    #[arg(long, default_value_t = 10)]
    proof_dpi: u32,

    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    #[arg(long, default_value = ".cache/exhibitprint")]
    cache_dir: PathBuf,

    /// Directory holding source imagery (face, logo)
    #[arg(long, default_value = "assets")]
    assets_dir: PathBuf,

    /// Remove every cached asset before building
    #[arg(long)]
    clear_cache: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn emit(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!(r#"{{"success": false, "error": "Failed to serialize report: {e}"}}"#),
    }
}

fn fail(err: GraphicsError) -> ExitCode {
    emit(&serde_json::json!({
        "success": false,
        "error": err.to_string(),
    }));
    ExitCode::from(err.exit_code())
}

fn load_palette(path: &Path) -> Result<Palette, GraphicsError> {
    let json = fs::read_to_string(path).map_err(|source| GraphicsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Palette::from_json(&json)?)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .with_target(false)
        .init();

    let cache = match AssetCache::open(&cli.cache_dir) {
        Ok(c) => c,
        Err(e) => return fail(e.into()),
    };

    if cli.clear_cache {
        match cache.clear() {
            Ok(removed) if cli.target.is_none() => {
                emit(&serde_json::json!({ "success": true, "cleared": removed }));
                return ExitCode::SUCCESS;
            }
            Ok(_) => {}
            Err(e) => return fail(e.into()),
        }
    }

    let (Some(target), Some(finalization)) = (cli.target, cli.finalize) else {
        emit(&serde_json::json!({
            "success": false,
            "error": "a target and --finalize are required",
        }));
        return ExitCode::FAILURE;
    };

    let spec = match &cli.spec {
        Some(path) => GraphicsSpec::load(path),
        None => GraphicsSpec::exhibit_default(),
    };
    let spec = match spec {
        Ok(s) => s,
        Err(e) => return fail(e.into()),
    };

    let palette = match &cli.palette {
        Some(path) => match load_palette(path) {
            Ok(p) => Some(p),
            Err(e) => return fail(e),
        },
        None => None,
    };

    let mut options = BuildOptions::new(cli.output_dir, finalization);
    options.dpi = cli.dpi;
    options.proof_dpi = cli.proof_dpi;
    options.guides = cli.guides;

    let pipeline = match GraphicsPipeline::new(spec, cache, DirectorySources::new(cli.assets_dir), options) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let pipeline = match palette {
        Some(palette) => pipeline.with_palette(palette),
        None => pipeline,
    };

    let report = pipeline.build_target(&target);
    emit(&report);
    ExitCode::from(report.exit_code())
}
