//! This is the main command-line utility.

use std::path::Path;
use std::process::exit;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use clap::Parser as ArgParser;

use chipsim::data::{parse_rows, render_table};
use chipsim::{
    link, load_gate, parse_hdl_path, system_clock, ChipAst, EmbedReader, ErrorKind, HdlError,
    HdlProvider, Instance, PinSpec, Radix, Registry,
};

#[derive(ArgParser)]
#[clap(version, about = "HDL simulator for the Nand2Tetris chip set")]
struct Cli {
    /// Gate name or path to an HDL file.
    #[clap(long)]
    gate: Option<String>,

    /// Parse the chip and print its canonical HDL.
    #[clap(long, action)]
    parse: bool,

    /// Print the gate specification and truth table.
    #[clap(long, action)]
    describe: bool,

    /// List the built-in gates.
    #[clap(long, action)]
    list: bool,

    /// JSON stimulus rows, e.g. '[{"a": 1, "b": 0}]'.
    #[clap(long)]
    exec_on_data: Option<String>,

    /// Output radix: bin, hex, or dec.
    #[clap(long, default_value = "bin")]
    format: String,

    /// Execute the stimulus rows one per clock cycle.
    #[clap(long, action)]
    run: bool,

    /// Clock rate in Hz for --run.
    #[clap(long)]
    clock_rate: Option<u32>,
}

fn exit_code(e: &HdlError) -> i32 {
    match e.kind {
        ErrorKind::Parse(_) => 2,
        ErrorKind::UnknownGate(_) => 1,
        ErrorKind::PinNotDeclared(_)
        | ErrorKind::WidthMismatch(_)
        | ErrorKind::SliceOutOfRange(_)
        | ErrorKind::CombinationalLoop(_) => 3,
        _ => 1,
    }
}

/// Loads the gate under test. File paths parse and link from disk;
/// bare names resolve against the registry and then the embedded chip
/// library.
fn load(gate: &str, registry: &Registry) -> Result<(Instance, Option<ChipAst>), HdlError> {
    let path = Path::new(gate);
    if gate.ends_with(".hdl") || path.exists() {
        let (ast, file_reader) = parse_hdl_path(path)?;
        let provider: Rc<dyn HdlProvider> = Rc::new(file_reader);
        let class = link(&ast, registry, &provider)?;
        return Ok((Instance::Composite(class.instantiate()), Some(ast)));
    }

    let provider: Rc<dyn HdlProvider> = Rc::new(EmbedReader);
    let instance = load_gate(gate, registry, &provider)?;
    Ok((instance, None))
}

fn external_pins(instance: &Instance) -> Vec<PinSpec> {
    instance
        .input_specs()
        .iter()
        .chain(instance.output_specs())
        .cloned()
        .collect()
}

fn describe(instance: &mut Instance, registry: &Registry, radix: Radix) -> Result<(), HdlError> {
    println!("Name: {}", instance.name());
    if let Some(class) = registry.get(instance.name()) {
        println!("Description: {}", class.spec.description);
    }
    println!("Inputs:");
    for p in instance.input_specs() {
        println!("\t{}: Width={}", p.name, p.size);
    }
    println!("Outputs:");
    for p in instance.output_specs() {
        println!("\t{}: Width={}", p.name, p.size);
    }

    // Built-in gates carry a precomputed table; composites get one
    // generated on the spot when they are narrow enough.
    let pins = external_pins(instance);
    if let Some(table) = registry.get(instance.name()).and_then(|c| c.spec.truth_table.clone()) {
        println!("\n{}", render_table(&pins, &table, radix));
    } else if !instance.is_sequential() {
        if let Ok(table) = chipsim::full_table(instance) {
            println!("\n{}", render_table(&pins, &table, radix));
        }
    }
    Ok(())
}

fn exec(cli: &Cli, instance: &mut Instance, json: &str, radix: Radix) -> Result<(), HdlError> {
    let rows = parse_rows(json)?;
    let pins = external_pins(instance);

    if cli.run {
        let clock = system_clock();
        if let Some(hz) = cli.clock_rate {
            clock.borrow_mut().set_rate(hz)?;
        }
        let delay = Duration::from_secs_f64(1.0 / clock.borrow().rate() as f64);

        // One row per clock cycle, paced at the clock rate.
        let mut header_printed = false;
        for row in &rows {
            let step = instance.step(row);
            instance.cycle(&clock)?;
            let table = render_table(&pins, &[instance.get_pin_values()], radix);
            let mut lines = table.lines();
            let header = lines.next().unwrap_or("");
            if !header_printed {
                println!("{}", header);
                header_printed = true;
            }
            for line in lines {
                println!("{}", line);
            }
            for c in &step.conflicts {
                println!("conflict: pin {} driven by {:?}", c.pin,
                    c.writers.iter().map(|w| w.part.as_str()).collect::<Vec<_>>());
            }
            thread::sleep(delay);
        }
        return Ok(());
    }

    let result = instance.exec_on_data(&rows);
    print!("{}", render_table(&pins, &result.result, radix));
    for c in &result.conflicts {
        println!(
            "conflict: row {} pin {} driven by {:?}",
            c.row.unwrap_or(0),
            c.pin,
            c.writers.iter().map(|w| w.part.as_str()).collect::<Vec<_>>()
        );
    }
    for m in &result.mismatches {
        println!(
            "mismatch: row {} pin {} expected {} actual {}",
            m.row,
            m.pin,
            chipsim::bits::format_word(m.expected, radix, 16),
            chipsim::bits::format_word(m.actual, radix, 16)
        );
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), HdlError> {
    let registry = Registry::new();

    if cli.list {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let gate = cli.gate.as_ref().ok_or_else(|| {
        HdlError::other("No gate given. Use --gate <name|path>, or --list to see built-ins.")
    })?;
    let radix: Radix = cli.format.parse()?;
    let (mut instance, ast) = load(gate, &registry)?;

    if cli.parse {
        match &ast {
            Some(chip) => print!("{}", chip),
            None => println!("{} is a built-in gate; there is no HDL to parse.", gate),
        }
        return Ok(());
    }

    if cli.describe {
        return describe(&mut instance, &registry, radix);
    }

    if let Some(json) = &cli.exec_on_data {
        return exec(cli, &mut instance, json, radix);
    }

    // Bare --gate is a check: simulate once with all-zero inputs to
    // surface dynamic errors, then report the interface.
    instance.evaluate();
    println!("Name: {}", instance.name());
    println!("Ports:");
    for p in external_pins(&instance) {
        println!("\t{}: Width={}", p.name, p.size);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprint!("{}", e);
        exit(exit_code(&e));
    }
}
