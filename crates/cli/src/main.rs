use clap::Parser;
use faultline_core::sim::asm;
use faultline_core::{step_handler, watch_handler, Debugger, Machine, StopReason, REG_PC, REG_SP};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the target config (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen for a debug host on this port (overrides the config)
    #[arg(short, long)]
    listen: Option<u16>,

    /// Run headless to completion, without a debug session
    #[arg(long)]
    no_listen: bool,

    /// Enable fault-level execution tracing
    #[arg(short, long)]
    trace: bool,

    /// Maximum number of instructions to execute (overrides the config)
    #[arg(long)]
    max_steps: Option<u64>,

    /// Write the final machine state as JSON
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Count executed instructions per address (headless mode)
    #[arg(long)]
    profile: bool,
}

#[derive(serde::Serialize)]
struct Snapshot {
    r#type: &'static str,
    stop_reason: &'static str,
    regs: faultline_core::Regs,
    breakpoint_faults: u64,
}

/// A small countdown loop that stores its counter each trip, so both
/// comparator kinds have something to fire on.
fn demo_program(load_base: u32) -> Vec<u32> {
    let data = load_base + 0x40;
    vec![
        asm::movi(1, 3),
        asm::movi(2, data as u16),
        asm::str(1, 2, 0),
        asm::addi(1, 1, -1),
        asm::bnz(1, -2),
        asm::halt(),
    ]
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    info!("Starting Faultline");

    let config = match &args.config {
        Some(path) => {
            info!("Loading target config: {:?}", path);
            faultline_config::TargetConfig::from_file(path)?
        }
        None => {
            info!("Using default target configuration");
            faultline_config::TargetConfig {
                schema_version: "1.0".into(),
                target: faultline_config::TargetSpec {
                    memory: "64KiB".into(),
                    load_base: 0x8000,
                },
                session: None,
                limits: faultline_config::LimitsSpec::default(),
            }
        }
    };

    let load_base = config.target.load_base;
    // the demo program builds its data address with a 16-bit immediate
    anyhow::ensure!(
        load_base <= 0xffff - 0x40,
        "load_base {:#x} is out of reach of the demo program",
        load_base
    );
    let mut machine = Machine::new(config.memory_bytes()?, load_base);
    machine.load(load_base, &demo_program(load_base))?;
    machine.regs[REG_PC] = load_base;
    machine.regs[REG_SP] = machine.scratch_stack_top();
    info!("Demo program loaded at {:#x}", load_base);

    let mut debugger = Debugger::new(machine);
    debugger.install();

    let port = args
        .listen
        .or_else(|| config.session.as_ref().map(|s| s.port));
    let max_steps = args.max_steps.or(config.limits.max_steps);

    if let (Some(port), false) = (port, args.no_listen) {
        let server = faultline_proto::SessionServer::new(port);
        return server.run(debugger);
    }

    // headless: arm one of each comparator kind against the demo program
    debugger.add_breakpoint(load_base + 0xc, step_handler(|f| {
        info!("breakpoint at {:#x}, counter = {}", f.pc, f.regs[1]);
    }))?;
    debugger.add_watchpoint(load_base + 0x40, watch_handler(|f| {
        let dir = if f.is_load { "load" } else { "store" };
        info!("watchpoint: {} of {:#x} by {:#x}", dir, f.addr, f.pc);
    }))?;

    // per-address execution counts off the mismatch engine
    let hist: Rc<RefCell<HashMap<u32, u64>>> = Rc::new(RefCell::new(HashMap::new()));
    if args.profile {
        let counts = hist.clone();
        debugger.step.install_handler(step_handler(move |f| {
            *counts.borrow_mut().entry(f.pc).or_insert(0) += 1;
        }));
        debugger.step.enable(&mut debugger.machine.dbg);
    }

    let reason = debugger.run(max_steps)?;
    match reason {
        StopReason::Halted => info!("Target halted"),
        StopReason::BudgetExhausted => info!("Step budget exhausted"),
    }
    info!("Final PC: {:#x}", debugger.machine.regs[REG_PC]);
    info!("Breakpoint faults: {}", debugger.breakpoints.num_faults());

    if args.profile {
        let hist = hist.borrow();
        let mut lines: Vec<_> = hist.iter().map(|(&pc, &n)| (pc, n)).collect();
        lines.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        info!("Execution profile ({} addresses):", lines.len());
        for (pc, n) in &lines {
            info!("  {:#010x}: {}", pc, n);
        }
    }

    if let Some(path) = &args.snapshot {
        let snapshot = Snapshot {
            r#type: "faultline_target",
            stop_reason: match reason {
                StopReason::Halted => "halted",
                StopReason::BudgetExhausted => "budget_exhausted",
            },
            regs: debugger.machine.regs,
            breakpoint_faults: debugger.breakpoints.num_faults(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        info!("Snapshot written to {:?}", path);
    }

    Ok(())
}
