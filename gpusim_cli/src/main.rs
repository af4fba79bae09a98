//! Command-line entry point for the Evergreen GPU timing simulator.
//!
//! Stands in for the host driver a real toolchain would provide: it builds
//! a small demonstration kernel directly as a [`DecodedText`] (the external
//! decoder `spec.md` §1 excludes is out of scope here too), launches it
//! through [`Gpu`], runs to completion, and prints the statistics report.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use gpusim_core::config::Config;
use gpusim_core::gpu::Gpu;
use gpusim_core::ndrange::NDRange;
use gpusim_core::occupancy::OccupancyRequest;
use gpusim_core::report::Report;
use gpusim_core::trace::TraceWriter;
use gpusim_isa::{AluBundle, AluSlot, CfInst, DecodedText};

/// Runs a demonstration kernel through the Evergreen timing simulator and
/// prints its statistics report.
#[derive(Parser, Debug)]
#[command(name = "gpusim", about = "Evergreen GPU cycle-timing simulator", long_about = None)]
struct Cli {
    /// Path to a machine configuration file. Defaults to the device's
    /// built-in defaults if omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Total work-items launched across the grid.
    #[arg(long, default_value_t = 1024)]
    global_size: u32,

    /// Work-items per work-group.
    #[arg(long, default_value_t = 64)]
    local_size: u32,

    /// General-purpose registers used per work-item, for the occupancy
    /// calculator.
    #[arg(long, default_value_t = 4)]
    gprs_per_work_item: u32,

    /// Bytes of local (shared) memory requested per work-group.
    #[arg(long, default_value_t = 0)]
    local_mem_per_group: u32,

    /// Stops the run after this many cycles even if the kernel has not
    /// finished.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Emits the statistics report as JSON instead of the sectioned text
    /// format.
    #[arg(long)]
    json: bool,

    /// Writes a line-oriented visualization trace to this file.
    #[arg(long, value_name = "FILE")]
    trace: Option<PathBuf>,
}

/// A kernel with one ALU clause and one TEX clause per wavefront, enough to
/// exercise every engine at least once without needing a real decoder.
fn demo_kernel() -> DecodedText {
    let mut decoded = DecodedText::new();
    let alu_clause = decoded.push_alu_clause(vec![AluBundle::new(vec![
        AluSlot { is_local_mem_access: false },
        AluSlot { is_local_mem_access: true },
    ])]);
    let tex_clause = decoded.push_tex_clause(vec![gpusim_isa::TexInst { is_load: true }]);
    decoded.cf_stream.push(CfInst::AluClause { clause: alu_clause });
    decoded.cf_stream.push(CfInst::TexClause { clause: tex_clause });
    decoded.cf_stream.push(CfInst::Terminator);
    decoded
}

fn main() -> miette::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| miette::miette!("failed to read config {}: {e}", path.display()))?;
            Config::parse(&text)?
        }
        None => Config::default(),
    };

    let mut trace = cli.trace.as_ref().map(|path| {
        let file = fs::File::create(path).expect("create trace file");
        TraceWriter::new(file)
    });

    let mut gpu = Gpu::new(&config).with_budget(cli.max_cycles, None);
    if let Some(t) = trace.as_mut() {
        t.init(config.num_compute_units);
    }

    let decoded = Rc::new(demo_kernel());
    let ndrange = NDRange::new(0, decoded, cli.global_size, cli.local_size, cli.local_mem_per_group, config.wavefront_size);
    if let Some(t) = trace.as_mut() {
        t.new_ndrange(0, ndrange.group_count, ndrange.wavefronts_per_work_group);
    }

    let request = OccupancyRequest {
        work_items_per_group: cli.local_size,
        gprs_per_work_item: cli.gprs_per_work_item,
        local_mem_per_group: cli.local_mem_per_group,
    };
    gpu.launch_ndrange(ndrange, request, &config, Box::new(|| {}))?;

    let reason = loop {
        if let Some(t) = trace.as_mut() {
            t.clock(gpu.cycle + 1);
        }
        if !gpu.step()? {
            break gpu.termination_reason().expect("termination latched");
        }
    };
    log::info!("run terminated: {reason}");

    let report = Report::capture(&gpu, &config);
    if cli.json {
        println!("{}", report.render_json());
    } else {
        print!("{}", report.render_text(&config));
    }

    Ok(())
}
