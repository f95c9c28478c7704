//! Built-in gate semantics. Combinational gates compute their outputs
//! from the current pin values; sequential gates sample inputs on
//! `clock_up` and commit state on `clock_down`.

use log::trace;

use crate::bits::{self, Word};
use crate::clock::HalfPhase;
use crate::error::{ErrorKind, HdlError};
use crate::pin::{PinBank, PinSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateKind {
    Nand,
    And,
    Or,
    Not,
    Xor,
    Mux,
    DMux,
    And16,
    Or16,
    Not16,
    Mux16,
    Or8Way,
    Mux4Way16,
    Mux8Way16,
    DMux4Way,
    DMux8Way,
    HalfAdder,
    FullAdder,
    Add16,
    Inc16,
    Alu,
    Dff,
    Bit,
    Register,
    ARegister,
    DRegister,
    Pc,
    Ram8,
    Ram64,
    Ram512,
    Ram4k,
    Ram16k,
    Rom32k,
    Screen,
    Keyboard,
    Cpu,
    Memory,
    Computer,
}

impl GateKind {
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            GateKind::Dff
                | GateKind::Bit
                | GateKind::Register
                | GateKind::ARegister
                | GateKind::DRegister
                | GateKind::Pc
                | GateKind::Ram8
                | GateKind::Ram64
                | GateKind::Ram512
                | GateKind::Ram4k
                | GateKind::Ram16k
                | GateKind::Screen
                | GateKind::Cpu
                | GateKind::Memory
                | GateKind::Computer
        )
    }

    fn ram_cells(self) -> Option<usize> {
        match self {
            GateKind::Ram8 => Some(8),
            GateKind::Ram64 => Some(64),
            GateKind::Ram512 => Some(512),
            GateKind::Ram4k => Some(4096),
            GateKind::Ram16k => Some(16384),
            GateKind::Screen => Some(8192),
            _ => None,
        }
    }
}

/// The Hack ALU. zx/nx pre-modify x, zy/ny pre-modify y, `f` selects
/// add over and, `no` post-inverts. Flags: zr = out == 0, ng = out < 0
/// in two's complement.
pub fn alu(
    mut x: Word,
    mut y: Word,
    zx: bool,
    nx: bool,
    zy: bool,
    ny: bool,
    f: bool,
    no: bool,
) -> (Word, bool, bool) {
    if zx {
        x = 0;
    }
    if nx {
        x = !x;
    }
    if zy {
        y = 0;
    }
    if ny {
        y = !y;
    }
    let mut out = if f { x.wrapping_add(y) } else { x & y };
    if no {
        out = !out;
    }
    (out, out == 0, (out as i16) < 0)
}

#[derive(Clone, Debug, Default)]
struct CpuState {
    a: Word,
    d: Word,
    pc: Word,
    next: Option<(Word, Word, Word)>,
}

/// Combinational CPU outputs for the current register values.
/// Returns (outM, writeM).
fn cpu_outputs(a: Word, d: Word, instruction: Word, in_m: Word) -> (Word, bool) {
    if !bits::bit(instruction, 15) {
        // A-instruction: nothing driven onto the memory bus.
        return (0, false);
    }
    let y = if bits::bit(instruction, 12) { in_m } else { a };
    let (out, _, _) = alu(
        d,
        y,
        bits::bit(instruction, 11),
        bits::bit(instruction, 10),
        bits::bit(instruction, 9),
        bits::bit(instruction, 8),
        bits::bit(instruction, 7),
        bits::bit(instruction, 6),
    );
    (out, bits::bit(instruction, 3))
}

/// Next register values after a rising edge. The jump target is the
/// value A holds during this cycle.
fn cpu_advance(
    a: Word,
    d: Word,
    pc: Word,
    instruction: Word,
    in_m: Word,
    reset: bool,
) -> (Word, Word, Word) {
    let (next_a, next_d, jump) = if !bits::bit(instruction, 15) {
        (instruction, d, false)
    } else {
        let y = if bits::bit(instruction, 12) { in_m } else { a };
        let (out, zr, ng) = alu(
            d,
            y,
            bits::bit(instruction, 11),
            bits::bit(instruction, 10),
            bits::bit(instruction, 9),
            bits::bit(instruction, 8),
            bits::bit(instruction, 7),
            bits::bit(instruction, 6),
        );
        let next_a = if bits::bit(instruction, 5) { out } else { a };
        let next_d = if bits::bit(instruction, 4) { out } else { d };
        let jump = (bits::bit(instruction, 2) && ng)
            || (bits::bit(instruction, 1) && zr)
            || (bits::bit(instruction, 0) && !ng && !zr);
        (next_a, next_d, jump)
    };

    let next_pc = if reset {
        0
    } else if jump {
        a
    } else {
        pc.wrapping_add(1)
    };
    (next_a, next_d, next_pc)
}

#[derive(Clone, Debug)]
struct MemState {
    ram: Vec<Word>,
    screen: Vec<Word>,
    key: Word,
    pending: Option<(usize, Word)>,
}

impl MemState {
    fn new() -> MemState {
        MemState {
            ram: vec![0; 16384],
            screen: vec![0; 8192],
            key: 0,
            pending: None,
        }
    }

    // Address map: 0x0000-0x3FFF RAM, 0x4000-0x5FFF screen,
    // 0x6000 keyboard.
    fn read(&self, addr: usize) -> Word {
        if addr < 0x4000 {
            self.ram[addr]
        } else if addr < 0x6000 {
            self.screen[addr - 0x4000]
        } else if addr == 0x6000 {
            self.key
        } else {
            0
        }
    }

    fn write(&mut self, addr: usize, value: Word) {
        if addr < 0x4000 {
            self.ram[addr] = value;
        } else if addr < 0x6000 {
            self.screen[addr - 0x4000] = value;
        }
        // The keyboard register is read-only.
    }

    fn commit(&mut self) {
        if let Some((addr, value)) = self.pending.take() {
            self.write(addr, value);
        }
    }
}

#[derive(Clone, Debug)]
struct ComputerState {
    cpu: CpuState,
    mem: MemState,
    rom: Vec<Word>,
}

#[derive(Clone, Debug)]
enum SeqState {
    Combinational,
    /// Shadow register for the DFF/Bit/Register/PC family. The
    /// committed value lives on the `out` pin.
    Latch { next: Word },
    Ram {
        cells: Vec<Word>,
        pending: Option<(usize, Word)>,
    },
    Rom { cells: Vec<Word> },
    Keyboard { key: Word },
    Cpu(CpuState),
    Memory(MemState),
    Computer(Box<ComputerState>),
}

/// An instance of a built-in gate: a bank of pins plus whatever state
/// the gate kind carries across clock cycles.
#[derive(Debug)]
pub struct Primitive {
    pub kind: GateKind,
    pub name: &'static str,
    pub pins: PinBank,
    inputs: Vec<PinSpec>,
    outputs: Vec<PinSpec>,
    state: SeqState,
    phase: Option<HalfPhase>,
}

impl Primitive {
    pub fn new(
        kind: GateKind,
        name: &'static str,
        inputs: &[PinSpec],
        outputs: &[PinSpec],
    ) -> Primitive {
        let mut pins = PinBank::from_specs(inputs);
        for o in outputs {
            pins.add(o.clone());
        }
        let state = match kind {
            _ if kind.ram_cells().is_some() => SeqState::Ram {
                cells: vec![0; kind.ram_cells().unwrap()],
                pending: None,
            },
            GateKind::Dff
            | GateKind::Bit
            | GateKind::Register
            | GateKind::ARegister
            | GateKind::DRegister
            | GateKind::Pc => SeqState::Latch { next: 0 },
            GateKind::Rom32k => SeqState::Rom {
                cells: vec![0; 32768],
            },
            GateKind::Keyboard => SeqState::Keyboard { key: 0 },
            GateKind::Cpu => SeqState::Cpu(CpuState::default()),
            GateKind::Memory => SeqState::Memory(MemState::new()),
            GateKind::Computer => SeqState::Computer(Box::new(ComputerState {
                cpu: CpuState::default(),
                mem: MemState::new(),
                rom: vec![0; 32768],
            })),
            _ => SeqState::Combinational,
        };
        Primitive {
            kind,
            name,
            pins,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            state,
            phase: None,
        }
    }

    pub fn input_specs(&self) -> &[PinSpec] {
        &self.inputs
    }

    pub fn output_specs(&self) -> &[PinSpec] {
        &self.outputs
    }

    /// Computes output pins from input pins and committed state.
    /// Total: unset pins read as zero, and no input can make this fail.
    pub fn evaluate(&mut self) {
        let p = &self.pins;
        match self.kind {
            GateKind::Nand => {
                let v = !(p.value_bool("a") && p.value_bool("b"));
                self.pins.set_bool("out", v);
            }
            GateKind::And => {
                let v = p.value_bool("a") && p.value_bool("b");
                self.pins.set_bool("out", v);
            }
            GateKind::Or => {
                let v = p.value_bool("a") || p.value_bool("b");
                self.pins.set_bool("out", v);
            }
            GateKind::Not => {
                let v = !p.value_bool("in");
                self.pins.set_bool("out", v);
            }
            GateKind::Xor => {
                let v = p.value_bool("a") != p.value_bool("b");
                self.pins.set_bool("out", v);
            }
            GateKind::Mux => {
                let v = if p.value_bool("sel") {
                    p.value_bool("b")
                } else {
                    p.value_bool("a")
                };
                self.pins.set_bool("out", v);
            }
            GateKind::DMux => {
                let (input, sel) = (p.value_bool("in"), p.value_bool("sel"));
                self.pins.set_bool("a", input && !sel);
                self.pins.set_bool("b", input && sel);
            }
            GateKind::And16 => {
                let v = p.value("a") & p.value("b");
                self.pins.set("out", v);
            }
            GateKind::Or16 => {
                let v = p.value("a") | p.value("b");
                self.pins.set("out", v);
            }
            GateKind::Not16 => {
                let v = !p.value("in");
                self.pins.set("out", v);
            }
            GateKind::Mux16 => {
                let v = if p.value_bool("sel") {
                    p.value("b")
                } else {
                    p.value("a")
                };
                self.pins.set("out", v);
            }
            GateKind::Or8Way => {
                let v = p.value("in") != 0;
                self.pins.set_bool("out", v);
            }
            GateKind::Mux4Way16 => {
                let v = match p.value("sel") {
                    0 => p.value("a"),
                    1 => p.value("b"),
                    2 => p.value("c"),
                    _ => p.value("d"),
                };
                self.pins.set("out", v);
            }
            GateKind::Mux8Way16 => {
                let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
                let v = p.value(names[p.value("sel") as usize & 7]);
                self.pins.set("out", v);
            }
            GateKind::DMux4Way => {
                let (input, sel) = (p.value_bool("in"), p.value("sel"));
                for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
                    self.pins.set_bool(name, input && sel == i as Word);
                }
            }
            GateKind::DMux8Way => {
                let (input, sel) = (p.value_bool("in"), p.value("sel"));
                for (i, name) in ["a", "b", "c", "d", "e", "f", "g", "h"].iter().enumerate() {
                    self.pins.set_bool(name, input && sel == i as Word);
                }
            }
            GateKind::HalfAdder => {
                let (a, b) = (p.value_bool("a"), p.value_bool("b"));
                self.pins.set_bool("sum", a != b);
                self.pins.set_bool("carry", a && b);
            }
            GateKind::FullAdder => {
                let (a, b, c) = (p.value_bool("a"), p.value_bool("b"), p.value_bool("c"));
                self.pins.set_bool("sum", (a != b) != c);
                self.pins
                    .set_bool("carry", (a && b) || (a && c) || (b && c));
            }
            GateKind::Add16 => {
                let v = p.value("a").wrapping_add(p.value("b"));
                self.pins.set("out", v);
            }
            GateKind::Inc16 => {
                let v = p.value("in").wrapping_add(1);
                self.pins.set("out", v);
            }
            GateKind::Alu => {
                let (out, zr, ng) = alu(
                    p.value("x"),
                    p.value("y"),
                    p.value_bool("zx"),
                    p.value_bool("nx"),
                    p.value_bool("zy"),
                    p.value_bool("ny"),
                    p.value_bool("f"),
                    p.value_bool("no"),
                );
                self.pins.set("out", out);
                self.pins.set_bool("zr", zr);
                self.pins.set_bool("ng", ng);
            }
            // The register family drives `out` from committed state,
            // which already lives on the out pin.
            GateKind::Dff
            | GateKind::Bit
            | GateKind::Register
            | GateKind::ARegister
            | GateKind::DRegister
            | GateKind::Pc => {}
            GateKind::Ram8
            | GateKind::Ram64
            | GateKind::Ram512
            | GateKind::Ram4k
            | GateKind::Ram16k
            | GateKind::Screen => {
                // Reads are asynchronous.
                if let SeqState::Ram { cells, .. } = &self.state {
                    let addr = p.value("address") as usize;
                    let v = cells[addr];
                    self.pins.set("out", v);
                }
            }
            GateKind::Rom32k => {
                if let SeqState::Rom { cells } = &self.state {
                    let v = cells[p.value("address") as usize];
                    self.pins.set("out", v);
                }
            }
            GateKind::Keyboard => {
                if let SeqState::Keyboard { key } = &self.state {
                    let v = *key;
                    self.pins.set("out", v);
                }
            }
            GateKind::Cpu => {
                if let SeqState::Cpu(cpu) = &self.state {
                    let (out_m, write_m) = cpu_outputs(
                        cpu.a,
                        cpu.d,
                        p.value("instruction"),
                        p.value("inM"),
                    );
                    let (a, pc) = (cpu.a, cpu.pc);
                    self.pins.set("outM", out_m);
                    self.pins.set_bool("writeM", write_m);
                    self.pins.set("addressM", a);
                    self.pins.set("pc", pc);
                }
            }
            GateKind::Memory => {
                if let SeqState::Memory(mem) = &self.state {
                    let v = mem.read(p.value("address") as usize);
                    self.pins.set("out", v);
                }
            }
            // The Computer has no output pins; its state advances on
            // clock edges only.
            GateKind::Computer => {}
        }
    }

    fn check_phase(&mut self, expected: HalfPhase) -> Result<(), HdlError> {
        if self.phase == Some(expected) {
            return Err(HdlError {
                msg: format!(
                    "{} handler called twice in a row on {}.",
                    match expected {
                        HalfPhase::High => "clock_up",
                        HalfPhase::Low => "clock_down",
                    },
                    self.name
                ),
                kind: ErrorKind::ClockPhaseViolation,
            });
        }
        self.phase = Some(expected);
        Ok(())
    }

    /// Rising edge: sample inputs into shadow state.
    pub fn clock_up(&mut self) -> Result<(), HdlError> {
        self.check_phase(HalfPhase::High)?;
        let p = &self.pins;
        match (&mut self.state, self.kind) {
            (SeqState::Latch { next }, GateKind::Dff) => {
                *next = p.value("in");
            }
            (SeqState::Latch { next }, GateKind::Pc) => {
                *next = if p.value_bool("reset") {
                    0
                } else if p.value_bool("load") {
                    p.value("in")
                } else if p.value_bool("inc") {
                    p.value("out").wrapping_add(1)
                } else {
                    p.value("out")
                };
            }
            (SeqState::Latch { next }, _) => {
                *next = if p.value_bool("load") {
                    p.value("in")
                } else {
                    p.value("out")
                };
            }
            (SeqState::Ram { pending, .. }, _) => {
                if p.value_bool("load") {
                    *pending = Some((p.value("address") as usize, p.value("in")));
                }
            }
            (SeqState::Cpu(cpu), _) => {
                cpu.next = Some(cpu_advance(
                    cpu.a,
                    cpu.d,
                    cpu.pc,
                    p.value("instruction"),
                    p.value("inM"),
                    p.value_bool("reset"),
                ));
            }
            (SeqState::Memory(mem), _) => {
                if p.value_bool("load") {
                    mem.pending = Some((p.value("address") as usize, p.value("in")));
                }
            }
            (SeqState::Computer(state), _) => {
                let reset = p.value_bool("reset");
                let cpu = &state.cpu;
                let instruction = state.rom[(cpu.pc & 0x7FFF) as usize];
                let addr = (cpu.a & 0x7FFF) as usize;
                let in_m = state.mem.read(addr);
                let (out_m, write_m) = cpu_outputs(cpu.a, cpu.d, instruction, in_m);
                let next = cpu_advance(cpu.a, cpu.d, cpu.pc, instruction, in_m, reset);
                if write_m {
                    state.mem.pending = Some((addr, out_m));
                }
                state.cpu.next = Some(next);
            }
            _ => {}
        }
        Ok(())
    }

    /// Falling edge: commit shadow state to the outputs.
    pub fn clock_down(&mut self) -> Result<(), HdlError> {
        self.check_phase(HalfPhase::Low)?;
        match &mut self.state {
            SeqState::Latch { next } => {
                let v = *next;
                trace!("{} commits {:#06X}", self.name, v);
                self.pins.set("out", v);
            }
            SeqState::Ram { cells, pending } => {
                if let Some((addr, value)) = pending.take() {
                    cells[addr] = value;
                }
                let addr = self.pins.value("address") as usize;
                let v = cells[addr];
                self.pins.set("out", v);
            }
            SeqState::Cpu(cpu) => {
                if let Some((a, d, pc)) = cpu.next.take() {
                    cpu.a = a;
                    cpu.d = d;
                    cpu.pc = pc;
                }
            }
            SeqState::Memory(mem) => {
                mem.commit();
            }
            SeqState::Computer(state) => {
                if let Some((a, d, pc)) = state.cpu.next.take() {
                    state.cpu.a = a;
                    state.cpu.d = d;
                    state.cpu.pc = pc;
                }
                state.mem.commit();
            }
            _ => {}
        }
        self.evaluate();
        Ok(())
    }

    /// Loads a program image into a ROM32K or Computer instance.
    pub fn load_rom(&mut self, image: &[Word]) -> bool {
        let cells = match &mut self.state {
            SeqState::Rom { cells } => cells,
            SeqState::Computer(state) => &mut state.rom,
            _ => return false,
        };
        for (i, w) in image.iter().enumerate().take(cells.len()) {
            cells[i] = *w;
        }
        true
    }

    /// Sets the keyboard scan code on a Keyboard, Memory, or Computer.
    pub fn set_key(&mut self, key: Word) -> bool {
        match &mut self.state {
            SeqState::Keyboard { key: k } => *k = key,
            SeqState::Memory(mem) => mem.key = key,
            SeqState::Computer(state) => state.mem.key = key,
            _ => return false,
        }
        true
    }

    /// Reads a memory cell of a RAM-family gate, Memory, or Computer.
    pub fn memory_at(&self, addr: usize) -> Option<Word> {
        match &self.state {
            SeqState::Ram { cells, .. } | SeqState::Rom { cells } => cells.get(addr).copied(),
            SeqState::Memory(mem) => Some(mem.read(addr)),
            SeqState::Computer(state) => Some(state.mem.read(addr)),
            _ => None,
        }
    }

    /// Program counter of a CPU or Computer instance.
    pub fn counter(&self) -> Option<Word> {
        match &self.state {
            SeqState::Cpu(cpu) => Some(cpu.pc),
            SeqState::Computer(state) => Some(state.cpu.pc),
            _ => None,
        }
    }
}
