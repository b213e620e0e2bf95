use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crossflow::core::config::DEFAULT_BYTES_PER_TRANSFER;
use crossflow::{campaign, report};
use crossflow::{
    is_echo_comment, parse_byte_count, parse_transfer_line, DeviceContext, Engine, EngineError,
    Result, RunConfig, SimTopology,
};

fn main() {
    if let Err(e) = run() {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = RunConfig::from_env()?;
    let ctx = build_context(&cfg)?;

    if args.len() <= 1 {
        if !cfg.output_csv {
            display_usage(&args[0]);
        }
        report::print_topology(&ctx, cfg.output_csv);
        return Ok(());
    }

    let num_bytes = match args.get(2) {
        Some(tok) => parse_byte_count(tok)?,
        None => DEFAULT_BYTES_PER_TRANSFER,
    };
    if num_bytes % 4 != 0 {
        return Err(EngineError::Config(format!(
            "bytes per transfer ({}) must be a multiple of 4",
            num_bytes
        )));
    }

    match args[1].as_str() {
        "sweep" | "rsweep" => {
            let gpu_se = arg_usize(&args, 3, 4)?;
            let cpu_se = arg_usize(&args, 4, 4)?;
            campaign::run_sweep(
                &cfg,
                &ctx,
                num_bytes / 4,
                gpu_se,
                cpu_se,
                args[1] == "rsweep",
            )?;
        }
        "p2p" => {
            campaign::run_p2p(&cfg, &ctx, num_bytes / 4)?;
        }
        "scaling" => {
            let max_sub_execs = arg_usize(&args, 3, 32)?;
            let exe_index = arg_usize(&args, 4, 0)?;
            campaign::run_scaling(&cfg, &ctx, num_bytes / 4, exe_index, max_sub_execs)?;
        }
        "a2a" => {
            let num_sub_execs = arg_usize(&args, 3, 4)?;
            campaign::run_a2a(&cfg, &ctx, num_bytes / 4, num_sub_execs)?;
        }
        "cmdline" => {
            if cfg.output_csv {
                println!("{}", report::CSV_HEADER);
            }
            let line = args.get(3..).unwrap_or(&[]).join(" ");
            let mut transfers =
                parse_transfer_line(&line, ctx.num_cpu_devices(), ctx.num_gpu_devices())?;
            if transfers.is_empty() {
                return Ok(());
            }
            run_sized(&cfg, &ctx, num_bytes, &mut transfers, &mut 0)?;
        }
        config_path => {
            let file = File::open(config_path).map_err(|_| {
                EngineError::Config(format!(
                    "unable to open transfer configuration file: [{}]",
                    config_path
                ))
            })?;
            if cfg.output_csv {
                println!("{}", report::CSV_HEADER);
            }
            let mut test_num = 0usize;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if !cfg.output_csv && is_echo_comment(&line) {
                    println!("{}", line);
                }
                let mut transfers =
                    parse_transfer_line(&line, ctx.num_cpu_devices(), ctx.num_gpu_devices())?;
                if transfers.is_empty() {
                    continue;
                }
                run_sized(&cfg, &ctx, num_bytes, &mut transfers, &mut test_num)?;
            }
        }
    }
    Ok(())
}

/// Execute one transfer set at the requested size, or across a geometric
/// range of sizes when zero bytes were requested.
fn run_sized(
    cfg: &RunConfig,
    ctx: &DeviceContext,
    num_bytes: usize,
    transfers: &mut [crossflow::Transfer],
    test_num: &mut usize,
) -> Result<()> {
    let engine = Engine::new(cfg, ctx);
    if num_bytes != 0 {
        *test_num += 1;
        let result = engine.execute_transfers(*test_num, num_bytes / 4, transfers)?;
        report::print_test_result(cfg, &result);
        return Ok(());
    }
    let mut n = 256usize;
    while n <= (1 << 27) {
        let delta = (n / cfg.sampling_factor).max(1);
        let mut curr = n;
        while curr < n * 2 {
            *test_num += 1;
            let result = engine.execute_transfers(*test_num, curr, transfers)?;
            report::print_test_result(cfg, &result);
            curr += delta;
        }
        n *= 2;
    }
    Ok(())
}

fn build_context(cfg: &RunConfig) -> Result<DeviceContext> {
    let topology = match std::env::var("TOPOLOGY_FILE") {
        Ok(path) => SimTopology::from_json_file(Path::new(&path))?,
        Err(_) => SimTopology::default(),
    };
    Ok(DeviceContext::simulated(topology, cfg.use_bus_order))
}

fn arg_usize(args: &[String], pos: usize, default: usize) -> Result<usize> {
    match args.get(pos) {
        Some(tok) => tok.parse().map_err(|_| EngineError::BadToken {
            what: "argument",
            token: tok.clone(),
        }),
        None => Ok(default),
    }
}

fn display_usage(cmd: &str) {
    println!("Crossflow v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!("Usage: {} config <N>", cmd);
    println!("  config: Either:");
    println!("          - Filename of a file containing Transfers to execute");
    println!("          - Name of a preset campaign:");
    println!("              p2p          - Peer-to-peer benchmark tests");
    println!("              sweep/rsweep - Sweep / random sweep across sets of Transfers");
    println!("                             - 3rd optional arg: # GPU sub-executors per Transfer");
    println!("                             - 4th optional arg: # CPU sub-executors per Transfer");
    println!("              scaling      - GPU sub-executor scaling copy test");
    println!("                             - 3rd optional arg: max # of sub-executors to use");
    println!("                             - 4th optional arg: GPU index to use as executor");
    println!("              a2a          - GPU all-to-all benchmark");
    println!("                             - 3rd optional arg: # of sub-executors to use");
    println!("              cmdline      - Read Transfers from command line arguments (after N)");
    println!("  N     : (Optional) Number of bytes to copy per Transfer.");
    println!(
        "          Defaults to {} bytes. Must be a multiple of 4 bytes.",
        DEFAULT_BYTES_PER_TRANSFER
    );
    println!("          If 0 is specified, a range of sizes will be benchmarked.");
    println!("          May append a suffix ('K', 'M', 'G') for kilo/mega/gigabytes.");
    println!();
    println!("Configuration is read from environment variables (NUM_ITERATIONS,");
    println!("NUM_WARMUPS, USE_SINGLE_LAUNCH, UNIT_ORDER, ALWAYS_VALIDATE, ...);");
    println!("set TOPOLOGY_FILE to point at a JSON topology description.");
    println!();
}
