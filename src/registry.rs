//! The built-in gate registry: a static table mapping gate names to
//! their specifications and constructors. Canonical truth tables for
//! combinational gates are computed here by exhaustive enumeration.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::bits::{self, Word};
use crate::gates::{GateKind, Primitive};
use crate::pin::{PinSpec, Row};

/// Exhaustive truth tables are generated up to this many input bits;
/// wider gates get a curated sample instead.
const TRUTH_TABLE_MAX_INPUT_BITS: usize = 8;

const SAMPLE_WORDS: [Word; 8] = [
    0x0000, 0xFFFF, 0xAAAA, 0x5555, 0x00FF, 0x1234, 0x8000, 0x0001,
];

#[derive(Clone, Debug, Serialize)]
pub struct GateSpec {
    pub name: String,
    pub description: String,
    pub input_pins: Vec<PinSpec>,
    pub output_pins: Vec<PinSpec>,
    pub truth_table: Option<Vec<Row>>,
}

impl GateSpec {
    pub fn input_width(&self) -> usize {
        self.input_pins.iter().map(|p| p.size).sum()
    }

    /// Copy of this spec without the truth table. Part links keep one
    /// of these; they never need the table.
    pub fn signature(&self) -> GateSpec {
        GateSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_pins: self.input_pins.clone(),
            output_pins: self.output_pins.clone(),
            truth_table: None,
        }
    }
}

pub struct GateClass {
    pub kind: GateKind,
    pub spec: GateSpec,
    name: &'static str,
}

impl GateClass {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sequential(&self) -> bool {
        self.kind.is_sequential()
    }

    /// Fresh instance with all pins at zero.
    pub fn instantiate(&self) -> Primitive {
        Primitive::new(
            self.kind,
            self.name,
            &self.spec.input_pins,
            &self.spec.output_pins,
        )
    }
}

pub struct Registry {
    classes: BTreeMap<&'static str, GateClass>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

fn def(
    classes: &mut BTreeMap<&'static str, GateClass>,
    kind: GateKind,
    name: &'static str,
    description: &'static str,
    inputs: &[(&str, usize)],
    outputs: &[(&str, usize)],
) {
    let spec = GateSpec {
        name: String::from(name),
        description: String::from(description),
        input_pins: inputs.iter().map(|(n, s)| PinSpec::new(*n, *s)).collect(),
        output_pins: outputs.iter().map(|(n, s)| PinSpec::new(*n, *s)).collect(),
        truth_table: None,
    };
    classes.insert(name, GateClass { kind, spec, name });
}

/// Assigns the bits of `value` MSB-first across the input pins in
/// declaration order, runs the gate, and snapshots every pin.
fn row_for_input(class: &GateClass, value: usize) -> Row {
    let mut inst = class.instantiate();
    let mut remaining = class.spec.input_width();
    for pin in &class.spec.input_pins {
        remaining -= pin.size;
        inst.pins
            .set(&pin.name, (value >> remaining) as Word & bits::mask(pin.size));
    }
    inst.evaluate();
    inst.pins.snapshot()
}

fn enumerated_table(class: &GateClass) -> Vec<Row> {
    let n = class.spec.input_width();
    (0..(1usize << n)).map(|i| row_for_input(class, i)).collect()
}

fn sampled_table(class: &GateClass) -> Vec<Row> {
    (0..SAMPLE_WORDS.len())
        .map(|j| {
            let mut inst = class.instantiate();
            for (k, pin) in class.spec.input_pins.iter().enumerate() {
                let v = SAMPLE_WORDS[(j + k) % SAMPLE_WORDS.len()] & bits::mask(pin.size);
                inst.pins.set(&pin.name, v);
            }
            inst.evaluate();
            inst.pins.snapshot()
        })
        .collect()
}

impl Registry {
    pub fn new() -> Registry {
        let mut c = BTreeMap::new();

        def(&mut c, GateKind::Nand, "Nand", "out = !(a & b)",
            &[("a", 1), ("b", 1)], &[("out", 1)]);
        def(&mut c, GateKind::And, "And", "out = a & b",
            &[("a", 1), ("b", 1)], &[("out", 1)]);
        def(&mut c, GateKind::Or, "Or", "out = a | b",
            &[("a", 1), ("b", 1)], &[("out", 1)]);
        def(&mut c, GateKind::Not, "Not", "out = !in",
            &[("in", 1)], &[("out", 1)]);
        def(&mut c, GateKind::Xor, "Xor", "out = a ^ b",
            &[("a", 1), ("b", 1)], &[("out", 1)]);
        def(&mut c, GateKind::Mux, "Mux", "out = sel ? b : a",
            &[("a", 1), ("b", 1), ("sel", 1)], &[("out", 1)]);
        def(&mut c, GateKind::DMux, "DMux",
            "Routes in to a (sel = 0) or b (sel = 1)",
            &[("in", 1), ("sel", 1)], &[("a", 1), ("b", 1)]);
        def(&mut c, GateKind::And16, "And16", "16-bit bitwise And",
            &[("a", 16), ("b", 16)], &[("out", 16)]);
        def(&mut c, GateKind::Or16, "Or16", "16-bit bitwise Or",
            &[("a", 16), ("b", 16)], &[("out", 16)]);
        def(&mut c, GateKind::Not16, "Not16", "16-bit bitwise Not",
            &[("in", 16)], &[("out", 16)]);
        def(&mut c, GateKind::Mux16, "Mux16", "16-bit multiplexor",
            &[("a", 16), ("b", 16), ("sel", 1)], &[("out", 16)]);
        def(&mut c, GateKind::Or8Way, "Or8Way", "out = Or(in[0..7])",
            &[("in", 8)], &[("out", 1)]);
        def(&mut c, GateKind::Mux4Way16, "Mux4Way16",
            "4-way 16-bit multiplexor; sel[0] is the low-order selector",
            &[("a", 16), ("b", 16), ("c", 16), ("d", 16), ("sel", 2)],
            &[("out", 16)]);
        def(&mut c, GateKind::Mux8Way16, "Mux8Way16",
            "8-way 16-bit multiplexor; sel[0] is the low-order selector",
            &[("a", 16), ("b", 16), ("c", 16), ("d", 16),
              ("e", 16), ("f", 16), ("g", 16), ("h", 16), ("sel", 3)],
            &[("out", 16)]);
        def(&mut c, GateKind::DMux4Way, "DMux4Way", "4-way demultiplexor",
            &[("in", 1), ("sel", 2)],
            &[("a", 1), ("b", 1), ("c", 1), ("d", 1)]);
        def(&mut c, GateKind::DMux8Way, "DMux8Way", "8-way demultiplexor",
            &[("in", 1), ("sel", 3)],
            &[("a", 1), ("b", 1), ("c", 1), ("d", 1),
              ("e", 1), ("f", 1), ("g", 1), ("h", 1)]);
        def(&mut c, GateKind::HalfAdder, "HalfAdder",
            "sum = LSB of a + b, carry = MSB",
            &[("a", 1), ("b", 1)], &[("sum", 1), ("carry", 1)]);
        def(&mut c, GateKind::FullAdder, "FullAdder",
            "sum = LSB of a + b + c, carry = MSB",
            &[("a", 1), ("b", 1), ("c", 1)], &[("sum", 1), ("carry", 1)]);
        def(&mut c, GateKind::Add16, "Add16", "out = a + b (mod 2^16)",
            &[("a", 16), ("b", 16)], &[("out", 16)]);
        def(&mut c, GateKind::Inc16, "Inc16", "out = in + 1 (mod 2^16)",
            &[("in", 16)], &[("out", 16)]);
        def(&mut c, GateKind::Alu, "ALU",
            "The Hack ALU: f selects x+y or x&y under the zx/nx/zy/ny/no modifiers",
            &[("x", 16), ("y", 16), ("zx", 1), ("nx", 1),
              ("zy", 1), ("ny", 1), ("f", 1), ("no", 1)],
            &[("out", 16), ("zr", 1), ("ng", 1)]);
        def(&mut c, GateKind::Dff, "DFF",
            "out(t) = in(t-1)",
            &[("in", 1)], &[("out", 1)]);
        def(&mut c, GateKind::Bit, "Bit",
            "1-bit register with load",
            &[("in", 1), ("load", 1)], &[("out", 1)]);
        def(&mut c, GateKind::Register, "Register",
            "16-bit register with load",
            &[("in", 16), ("load", 1)], &[("out", 16)]);
        def(&mut c, GateKind::ARegister, "ARegister",
            "The Hack address register",
            &[("in", 16), ("load", 1)], &[("out", 16)]);
        def(&mut c, GateKind::DRegister, "DRegister",
            "The Hack data register",
            &[("in", 16), ("load", 1)], &[("out", 16)]);
        def(&mut c, GateKind::Pc, "PC",
            "Program counter: reset > load > inc > hold",
            &[("in", 16), ("load", 1), ("inc", 1), ("reset", 1)],
            &[("out", 16)]);
        def(&mut c, GateKind::Ram8, "RAM8", "8-register memory",
            &[("in", 16), ("load", 1), ("address", 3)], &[("out", 16)]);
        def(&mut c, GateKind::Ram64, "RAM64", "64-register memory",
            &[("in", 16), ("load", 1), ("address", 6)], &[("out", 16)]);
        def(&mut c, GateKind::Ram512, "RAM512", "512-register memory",
            &[("in", 16), ("load", 1), ("address", 9)], &[("out", 16)]);
        def(&mut c, GateKind::Ram4k, "RAM4K", "4K-register memory",
            &[("in", 16), ("load", 1), ("address", 12)], &[("out", 16)]);
        def(&mut c, GateKind::Ram16k, "RAM16K", "16K-register memory",
            &[("in", 16), ("load", 1), ("address", 14)], &[("out", 16)]);
        def(&mut c, GateKind::Rom32k, "ROM32K",
            "32K read-only program memory",
            &[("address", 15)], &[("out", 16)]);
        def(&mut c, GateKind::Screen, "Screen",
            "Memory-mapped screen (8K words)",
            &[("in", 16), ("load", 1), ("address", 13)], &[("out", 16)]);
        def(&mut c, GateKind::Keyboard, "Keyboard",
            "Memory-mapped keyboard scan code",
            &[], &[("out", 16)]);
        def(&mut c, GateKind::Cpu, "CPU",
            "The Hack CPU",
            &[("inM", 16), ("instruction", 16), ("reset", 1)],
            &[("outM", 16), ("writeM", 1), ("addressM", 15), ("pc", 15)]);
        def(&mut c, GateKind::Memory, "Memory",
            "The Hack memory: RAM16K + Screen + Keyboard",
            &[("in", 16), ("load", 1), ("address", 15)], &[("out", 16)]);
        def(&mut c, GateKind::Computer, "Computer",
            "The Hack computer: CPU + Memory + ROM32K",
            &[("reset", 1)], &[]);

        // Precompute canonical truth tables for the combinational
        // gates. Exhaustive up to the bit cap, sampled beyond it.
        let names: Vec<&'static str> = c.keys().copied().collect();
        for name in names {
            let table = {
                let class = c.get(name).unwrap();
                if class.sequential() {
                    continue;
                }
                if class.spec.input_width() <= TRUTH_TABLE_MAX_INPUT_BITS {
                    enumerated_table(class)
                } else {
                    sampled_table(class)
                }
            };
            c.get_mut(name).unwrap().spec.truth_table = Some(table);
        }

        Registry { classes: c }
    }

    pub fn get(&self, name: &str) -> Option<&GateClass> {
        self.classes.get(name)
    }

    pub fn list(&self) -> Vec<&'static str> {
        self.classes.keys().copied().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_registry_has_all_builtins() {
        let registry = Registry::new();
        let names = registry.list();
        assert_eq!(names.len(), 38);
        for required in [
            "Nand", "And", "Or", "Not", "Xor", "Mux", "DMux", "And16", "Or16",
            "Not16", "Mux16", "Or8Way", "Mux4Way16", "Mux8Way16", "DMux4Way",
            "DMux8Way", "HalfAdder", "FullAdder", "Add16", "Inc16", "ALU",
            "DFF", "Bit", "Register", "ARegister", "DRegister", "PC", "RAM8",
            "RAM64", "RAM512", "RAM4K", "RAM16K", "ROM32K", "Screen",
            "Keyboard", "CPU", "Memory", "Computer",
        ] {
            assert!(names.contains(&required), "missing {}", required);
        }
        // Lookups are case-sensitive.
        assert!(registry.get("nand").is_none());
    }

    #[test]
    fn test_nand_truth_table_is_canonical() {
        let registry = Registry::new();
        let table = registry
            .get("Nand")
            .unwrap()
            .spec
            .truth_table
            .as_ref()
            .unwrap();
        assert_eq!(table.len(), 4);
        let outs: Vec<Word> = table.iter().map(|r| r["out"]).collect();
        assert_eq!(outs, vec![1, 1, 1, 0]);
        // First input pin carries the MSB of the row index.
        assert_eq!(table[2]["a"], 1);
        assert_eq!(table[2]["b"], 0);
    }

    #[test]
    fn test_truth_table_completeness() {
        let registry = Registry::new();
        for name in registry.list() {
            let class = registry.get(name).unwrap();
            if class.sequential() {
                assert!(class.spec.truth_table.is_none(), "{} is sequential", name);
                continue;
            }
            let table = class.spec.truth_table.as_ref().unwrap();
            let n = class.spec.input_width();
            if n <= TRUTH_TABLE_MAX_INPUT_BITS {
                assert_eq!(table.len(), 1 << n, "{} table incomplete", name);
            } else {
                assert_eq!(table.len(), SAMPLE_WORDS.len(), "{} sample size", name);
            }
            // Every row lists every declared pin.
            for row in table {
                for pin in class.spec.input_pins.iter().chain(&class.spec.output_pins) {
                    assert!(row.contains_key(&pin.name), "{} row missing {}", name, pin.name);
                }
            }
        }
    }

    #[test]
    fn test_mux_truth_table_rows() {
        let registry = Registry::new();
        let table = registry
            .get("Mux")
            .unwrap()
            .spec
            .truth_table
            .as_ref()
            .unwrap();
        // Inputs are (a, b, sel) MSB-first: index 0b100 is a=1, b=0, sel=0.
        assert_eq!(table[0b100]["out"], 1);
        assert_eq!(table[0b101]["out"], 0);
        assert_eq!(table[0b011]["out"], 1);
    }

    #[test]
    fn test_signature_drops_truth_table() {
        let registry = Registry::new();
        let sig = registry.get("And").unwrap().spec.signature();
        assert!(sig.truth_table.is_none());
        assert_eq!(sig.input_pins.len(), 2);
    }

    #[test]
    fn test_specs_are_plausible() {
        let registry = Registry::new();
        let alu = &registry.get("ALU").unwrap().spec;
        assert_eq!(alu.input_width(), 38);
        let cpu = registry.get("CPU").unwrap();
        assert!(cpu.sequential());
        assert_eq!(cpu.spec.output_pins.len(), 4);
    }
}
