use std::{
    fs,
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use mote::{
    ExcType, HeapData, HeapId, MemSpace, MemSpaces, NoIo, NoopTracer, Periodic, RunError, Runner, StdIo, StderrTracer,
    TICK_PERIOD_US, Value, Vm, VmConfig, VmTracer, disassemble, format_report,
};
use tracing_subscriber::EnvFilter;

/// Run a compiled mote image.
#[derive(Debug, Parser)]
#[command(name = "mote", version)]
struct Cli {
    /// Image file holding a module table.
    image: PathBuf,
    /// Module to run as the main thread.
    #[arg(long, default_value = "main")]
    module: String,
    /// Memory space the image is placed in.
    #[arg(long, value_enum, default_value_t = Space::Prog)]
    space: Space,
    /// JSON file with runtime settings; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Heap size in bytes.
    #[arg(long)]
    heap_size: Option<usize>,
    /// Bytes per heap chunk.
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Scheduler timeslice in milliseconds.
    #[arg(long)]
    timeslice_ms: Option<u32>,
    /// Restarts allowed after a failed run; without it the runtime restarts forever.
    #[arg(long)]
    max_restarts: Option<usize>,
    /// Run once and never restart.
    #[arg(long, conflicts_with = "max_restarts")]
    once: bool,
    /// Log every instruction, call and thread switch to stderr.
    #[arg(long)]
    trace: bool,
    /// Disassemble the image instead of running it.
    #[arg(long)]
    dis: bool,
    /// Print heap statistics as JSON when the run ends.
    #[arg(long)]
    stats: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Space {
    Ram,
    Prog,
}

impl From<Space> for MemSpace {
    fn from(space: Space) -> Self {
        match space {
            Space::Ram => Self::Ram,
            Space::Prog => Self::Prog,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let image = match fs::read(&cli.image) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", cli.image.display());
            return ExitCode::FAILURE;
        }
    };
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.dis {
        return match dump(&cli, config, image) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        };
    }
    if cli.trace {
        run(&cli, config, &image, StderrTracer::new)
    } else {
        run(&cli, config, &image, || NoopTracer)
    }
}

/// Reads the `--config` file, then applies the explicit flags on top.
fn load_config(cli: &Cli) -> Result<VmConfig, String> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|err| format!("cannot read {}: {err}", path.display()))?;
            serde_json::from_str(&text).map_err(|err| format!("bad config {}: {err}", path.display()))?
        }
        None => VmConfig::default(),
    };
    if let Some(heap_size) = cli.heap_size {
        config.heap_size = heap_size;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(timeslice_ms) = cli.timeslice_ms {
        config.timeslice_ms = timeslice_ms;
    }
    Ok(config)
}

/// Restart budget for the runner: unlimited unless the command line bounds it.
fn restart_budget(cli: &Cli) -> Option<usize> {
    if cli.once {
        Some(0)
    } else {
        cli.max_restarts
    }
}

fn boot<Tr: VmTracer>(cli: &Cli, config: VmConfig, image: &[u8], tracer: Tr) -> Result<Vm<StdIo, Tr>, RunError> {
    let space = MemSpace::from(cli.space);
    let mem = match space {
        MemSpace::Ram => MemSpaces::new().with_ram(image.to_vec()),
        _ => MemSpaces::new().with_prog(image.to_vec()),
    };
    let mut vm = Vm::with_tracer(config, mem, StdIo::new(), tracer)?;
    vm.load_module_table(space, 0)?;
    start_ticker(&vm.periodic());
    Ok(vm)
}

/// Delivers the periodic tick from a background thread until the runtime is dropped.
fn start_ticker(periodic: &Arc<Periodic>) {
    let periodic = Arc::downgrade(periodic);
    thread::spawn(move || {
        while let Some(periodic) = periodic.upgrade() {
            periodic.tick(TICK_PERIOD_US);
            drop(periodic);
            thread::sleep(Duration::from_micros(u64::from(TICK_PERIOD_US)));
        }
    });
}

fn run<Tr: VmTracer>(cli: &Cli, config: VmConfig, image: &[u8], make_tracer: impl Fn() -> Tr) -> ExitCode {
    let max_restarts = restart_budget(cli);
    let start = Instant::now();
    let runner = Runner::new(cli.module.clone(), || boot(cli, config.clone(), image, make_tracer()))
        .with_max_restarts(max_restarts);
    let finished = match runner.run() {
        Ok(finished) => finished,
        Err(err) => {
            eprintln!("error: runtime failed to start\n{}", format_report(&err));
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(elapsed = ?start.elapsed(), restarts = finished.restarts, "done");
    if cli.stats {
        match serde_json::to_string_pretty(&finished.vm.stats()) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("error: cannot encode heap statistics: {err}"),
        }
    }
    match finished.result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) if err.kind() == ExcType::SystemExit && matches!(err.message(), None | Some("0")) => {
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::FAILURE,
    }
}

/// Prints every module in the image, nested code objects included.
fn dump(cli: &Cli, config: VmConfig, image: Vec<u8>) -> Result<(), String> {
    let space = MemSpace::from(cli.space);
    let mem = match space {
        MemSpace::Ram => MemSpaces::new().with_ram(image),
        _ => MemSpaces::new().with_prog(image),
    };
    let mut vm = Vm::new(config, mem, NoIo).map_err(|err| format_report(&err))?;
    vm.load_module_table(space, 0).map_err(|err| format_report(&err))?;
    for entry in vm.module_table() {
        println!("module {}", String::from_utf8_lossy(&entry.name));
        dump_code(&vm, entry.code, 1)?;
    }
    Ok(())
}

fn dump_code<Tr: VmTracer>(vm: &Vm<NoIo, Tr>, code: HeapId, indent: usize) -> Result<(), String> {
    let HeapData::Code(code) = vm.heap().get(code) else {
        return Ok(());
    };
    let pad = "  ".repeat(indent);
    let name = match vm.heap().get(code.names) {
        HeapData::Tuple(names) => names
            .last()
            .and_then(|v| v.ref_id())
            .and_then(|id| match vm.heap().get(id) {
                HeapData::Str(s) => Some(String::from_utf8_lossy(s).into_owned()),
                _ => None,
            })
            .unwrap_or_default(),
        _ => String::new(),
    };
    println!(
        "{pad}code {name} (argcount {}, nlocals {}, stacksize {}, flags {:#04x}, line {})",
        code.argcount, code.nlocals, code.stacksize, code.flags, code.first_line
    );
    for ins in disassemble(vm.mem(), &code.bytecode).map_err(|err| format_report(&err))? {
        println!("{pad}{ins}");
    }
    if let HeapData::Tuple(consts) = vm.heap().get(code.consts) {
        for nested in consts.iter().filter_map(|v| match v {
            Value::Ref(id) if matches!(vm.heap().get(*id), HeapData::Code(_)) => Some(*id),
            _ => None,
        }) {
            dump_code(vm, nested, indent + 1)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::{Cli, restart_budget};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mote").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn restarts_are_unlimited_by_default() {
        assert_eq!(restart_budget(&parse(&["app.img"])), None);
    }

    #[test]
    fn max_restarts_bounds_the_loop() {
        assert_eq!(restart_budget(&parse(&["app.img", "--max-restarts", "3"])), Some(3));
    }

    #[test]
    fn once_disables_restarts() {
        assert_eq!(restart_budget(&parse(&["app.img", "--once"])), Some(0));
    }

    #[test]
    fn once_conflicts_with_a_budget() {
        let parsed = Cli::try_parse_from(["mote", "app.img", "--once", "--max-restarts", "2"]);
        assert!(parsed.is_err());
    }
}
