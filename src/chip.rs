//! Composite gates: linking parse trees against the gate registry and
//! evaluating the resulting part graph. Parts are walked in dependency
//! order computed from strongly connected components, so feedback
//! through sequential gates is legal while purely combinational cycles
//! are rejected at link time.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use log::debug;
use petgraph::algo::kosaraju_scc;
use petgraph::Graph;
use serde::Serialize;

use crate::bits::{self, Word};
use crate::clock::{ClockHandle, Edge};
use crate::data::{DataRow, RowEntry};
use crate::error::{ErrorKind, HdlError, Location};
use crate::gates::{GateKind, Primitive};
use crate::parser::{Argument, ChipAst, ChipCall, HdlProvider, Parser};
use crate::pin::{PinBank, PinRef, PinSpec, Row};
use crate::registry::{GateSpec, Registry};
use crate::scanner::Scanner;

/// Where an argument's pin reference lands after linking.
#[derive(Clone, Debug)]
pub enum Conn {
    /// An inclusive bit range of a composite-scope signal: an external
    /// input, an external output, or an internal net.
    Net { name: String, from: usize, to: usize },
    /// A `true`/`false` literal widened to the part-side pin width.
    Const { value: Word },
}

#[derive(Clone, Debug)]
pub struct Binding {
    /// Part-side pin name.
    pub pin: String,
    pub width: usize,
    pub conn: Conn,
}

#[derive(Debug)]
enum PartClass {
    Builtin {
        kind: GateKind,
        name: &'static str,
        spec: GateSpec,
    },
    Chip(Rc<CompositeClass>),
}

#[derive(Debug)]
pub struct PartLink {
    pub gate: String,
    class: PartClass,
    pub inputs: Vec<Binding>,
    pub outputs: Vec<Binding>,
    pub line: u32,
    sequential: bool,
}

/// A linked composite gate class: the blueprint shared by every
/// instance of the chip.
#[derive(Debug)]
pub struct CompositeClass {
    pub spec: GateSpec,
    pub internals: Vec<PinSpec>,
    pub parts: Vec<PartLink>,
    /// Part indices in evaluation order.
    pub order: Vec<usize>,
    sequential: bool,
    pub path: Option<PathBuf>,
}

impl CompositeClass {
    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    pub fn instantiate(self: &Rc<Self>) -> Composite {
        let mut nets = PinBank::from_specs(&self.spec.input_pins);
        for p in self.spec.output_pins.iter().chain(&self.internals) {
            nets.add(p.clone());
        }
        let parts = self
            .parts
            .iter()
            .map(|p| match &p.class {
                PartClass::Builtin { kind, name, spec } => Instance::Primitive(Primitive::new(
                    *kind,
                    *name,
                    spec.input_pins.as_slice(),
                    spec.output_pins.as_slice(),
                )),
                PartClass::Chip(class) => Instance::Composite(class.instantiate()),
            })
            .collect();
        Composite {
            class: Rc::clone(self),
            nets,
            parts,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Writer {
    pub part: String,
    pub index: usize,
    pub mask: Word,
    pub value: Word,
}

/// Two parts drove overlapping bits of the same destination with
/// unequal values. Surfaced as data, never as an error; the last
/// writer in evaluation order stays visible.
#[derive(Clone, Debug, Serialize)]
pub struct Conflict {
    pub row: Option<usize>,
    pub pin: String,
    pub writers: Vec<Writer>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Mismatch {
    pub row: usize,
    pub pin: String,
    pub expected: Word,
    pub actual: Word,
}

#[derive(Clone, Debug, Serialize)]
pub struct StepResult {
    pub outputs: Row,
    pub conflicts: Vec<Conflict>,
    pub mismatches: Vec<Mismatch>,
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct ExecResult {
    pub result: Vec<Row>,
    pub conflicts: Vec<Conflict>,
    pub mismatches: Vec<Mismatch>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NetKind {
    Input,
    Output,
    Internal,
}

struct NetEntry {
    size: usize,
    kind: NetKind,
}

struct Linker<'a> {
    ast: &'a ChipAst,
    registry: &'a Registry,
    provider: &'a Rc<dyn HdlProvider>,
    nets: BTreeMap<String, NetEntry>,
}

fn location(ast: &ChipAst, line: u32) -> Option<Location> {
    Some(Location::bare(ast.path.clone(), line))
}

impl<'a> Linker<'a> {
    fn err(&self, kind: ErrorKind, msg: String) -> HdlError {
        HdlError { msg, kind }
    }

    fn resolve_part(
        &self,
        call: &ChipCall,
        cache: &mut HashMap<String, Rc<CompositeClass>>,
        stack: &mut Vec<String>,
    ) -> Result<PartLink, HdlError> {
        if let Some(class) = self.registry.get(&call.name) {
            return Ok(PartLink {
                gate: call.name.clone(),
                sequential: class.sequential(),
                class: PartClass::Builtin {
                    kind: class.kind,
                    name: class.name(),
                    spec: class.spec.signature(),
                },
                inputs: Vec::new(),
                outputs: Vec::new(),
                line: call.line,
            });
        }

        if let Some(chip) = cache.get(&call.name) {
            return Ok(PartLink {
                gate: call.name.clone(),
                sequential: chip.is_sequential(),
                class: PartClass::Chip(Rc::clone(chip)),
                inputs: Vec::new(),
                outputs: Vec::new(),
                line: call.line,
            });
        }

        if stack.iter().any(|n| n == &call.name) {
            return Err(self.err(
                ErrorKind::Other,
                format!("Chip `{}` includes itself.", call.name),
            ));
        }

        let file = format!("{}.hdl", call.name);
        let source = self.provider.get_hdl(&file).map_err(|_| {
            self.err(
                ErrorKind::UnknownGate(location(self.ast, call.line)),
                format!(
                    "`{}` is not a built-in gate, and no file `{}` was found.",
                    call.name, file
                ),
            )
        })?;
        debug!("Resolving part {} from {}", call.name, file);

        let mut scanner = Scanner::new(source.as_str(), self.provider.get_path(&file));
        let ast = Parser::new(&mut scanner).parse()?;
        stack.push(call.name.clone());
        let chip = link_inner(&ast, self.registry, self.provider, cache, stack)?;
        stack.pop();
        cache.insert(call.name.clone(), Rc::clone(&chip));

        Ok(PartLink {
            gate: call.name.clone(),
            sequential: chip.is_sequential(),
            class: PartClass::Chip(chip),
            inputs: Vec::new(),
            outputs: Vec::new(),
            line: call.line,
        })
    }

    fn part_specs(link: &PartLink) -> (&[PinSpec], &[PinSpec]) {
        match &link.class {
            PartClass::Builtin { spec, .. } => (&spec.input_pins, &spec.output_pins),
            PartClass::Chip(chip) => (&chip.spec.input_pins, &chip.spec.output_pins),
        }
    }

    /// Binds an argument whose part-side pin is an output: the pin ref
    /// names a destination, creating internal nets on first write.
    fn bind_output(
        &mut self,
        link: &PartLink,
        arg: &Argument,
        width: usize,
    ) -> Result<Binding, HdlError> {
        let loc = || location(self.ast, arg.line);
        let conn = match &arg.value {
            PinRef::Const(_) => {
                return Err(self.err(
                    ErrorKind::Other,
                    format!(
                        "Chip {} part {}: a constant cannot receive output pin `{}`.",
                        self.ast.name, link.gate, arg.name
                    ),
                ));
            }
            PinRef::Simple(name) => {
                match self.nets.get(name) {
                    Some(net) if net.kind == NetKind::Input => {
                        return Err(self.err(
                            ErrorKind::Other,
                            format!(
                                "Chip {} part {}: output pin `{}` writes to input pin `{}`.",
                                self.ast.name, link.gate, arg.name, name
                            ),
                        ));
                    }
                    Some(net) => {
                        if net.size != width {
                            return Err(self.err(
                                ErrorKind::WidthMismatch(loc()),
                                format!(
                                    "Chip {} part {}: signal `{}` has width {}, not equal to width of pin `{}` which is {}.",
                                    self.ast.name, link.gate, name, net.size, arg.name, width
                                ),
                            ));
                        }
                    }
                    None => {
                        self.nets.insert(
                            name.clone(),
                            NetEntry {
                                size: width,
                                kind: NetKind::Internal,
                            },
                        );
                    }
                }
                Conn::Net {
                    name: name.clone(),
                    from: 0,
                    to: width - 1,
                }
            }
            PinRef::Slice(name, from, to) => {
                let ref_width = to - from + 1;
                if ref_width != width {
                    return Err(self.err(
                        ErrorKind::WidthMismatch(loc()),
                        format!(
                            "Chip {} part {}: slice {} has width {}, not equal to width of pin `{}` which is {}.",
                            self.ast.name, link.gate, arg.value, ref_width, arg.name, width
                        ),
                    ));
                }
                match self.nets.get_mut(name) {
                    Some(net) if net.kind == NetKind::Input => {
                        return Err(self.err(
                            ErrorKind::Other,
                            format!(
                                "Chip {} part {}: output pin `{}` writes to input pin `{}`.",
                                self.ast.name, link.gate, arg.name, name
                            ),
                        ));
                    }
                    Some(net) => {
                        if *to >= net.size {
                            if net.kind == NetKind::Internal && *to < 16 {
                                // Internal nets grow to cover write-once
                                // slices from several parts.
                                net.size = *to + 1;
                            } else {
                                let net_size = net.size;
                                return Err(self.err(
                                    ErrorKind::SliceOutOfRange(loc()),
                                    format!(
                                        "Chip {} part {}: slice {} is outside signal `{}` of width {}.",
                                        self.ast.name, link.gate, arg.value, name, net_size
                                    ),
                                ));
                            }
                        }
                    }
                    None => {
                        if *to >= 16 {
                            return Err(self.err(
                                ErrorKind::SliceOutOfRange(loc()),
                                format!(
                                    "Chip {} part {}: slice {} exceeds the 16-bit word.",
                                    self.ast.name, link.gate, arg.value
                                ),
                            ));
                        }
                        self.nets.insert(
                            name.clone(),
                            NetEntry {
                                size: *to + 1,
                                kind: NetKind::Internal,
                            },
                        );
                    }
                }
                Conn::Net {
                    name: name.clone(),
                    from: *from,
                    to: *to,
                }
            }
        };
        Ok(Binding {
            pin: arg.name.clone(),
            width,
            conn,
        })
    }

    /// Binds an argument whose part-side pin is an input: the pin ref
    /// names a source. Names that nothing drives become internal nets
    /// reading as zero, keeping evaluation total.
    fn bind_input(
        &mut self,
        link: &PartLink,
        arg: &Argument,
        width: usize,
    ) -> Result<Binding, HdlError> {
        let loc = || location(self.ast, arg.line);
        let conn = match &arg.value {
            PinRef::Const(b) => Conn::Const {
                value: if *b { bits::mask(width) } else { 0 },
            },
            PinRef::Simple(name) => {
                match self.nets.get(name) {
                    Some(net) if net.kind == NetKind::Output => {
                        return Err(self.err(
                            ErrorKind::Other,
                            format!(
                                "Chip {} part {}: input pin `{}` reads output pin `{}`.",
                                self.ast.name, link.gate, arg.name, name
                            ),
                        ));
                    }
                    Some(net) => {
                        if net.size != width {
                            return Err(self.err(
                                ErrorKind::WidthMismatch(loc()),
                                format!(
                                    "Chip {} part {}: signal `{}` has width {}, not equal to width of pin `{}` which is {}. Use a slice to select bits.",
                                    self.ast.name, link.gate, name, net.size, arg.name, width
                                ),
                            ));
                        }
                    }
                    None => {
                        debug!(
                            "Chip {}: signal `{}` has no driver, it will read as zero",
                            self.ast.name, name
                        );
                        self.nets.insert(
                            name.clone(),
                            NetEntry {
                                size: width,
                                kind: NetKind::Internal,
                            },
                        );
                    }
                }
                Conn::Net {
                    name: name.clone(),
                    from: 0,
                    to: width - 1,
                }
            }
            PinRef::Slice(name, from, to) => {
                let ref_width = to - from + 1;
                if ref_width != width {
                    return Err(self.err(
                        ErrorKind::WidthMismatch(loc()),
                        format!(
                            "Chip {} part {}: slice {} has width {}, not equal to width of pin `{}` which is {}.",
                            self.ast.name, link.gate, arg.value, ref_width, arg.name, width
                        ),
                    ));
                }
                match self.nets.get(name) {
                    Some(net) => {
                        if *to >= net.size {
                            return Err(self.err(
                                ErrorKind::SliceOutOfRange(loc()),
                                format!(
                                    "Chip {} part {}: slice {} is outside signal `{}` of width {}.",
                                    self.ast.name, link.gate, arg.value, name, net.size
                                ),
                            ));
                        }
                    }
                    None => {
                        if *to >= 16 {
                            return Err(self.err(
                                ErrorKind::SliceOutOfRange(loc()),
                                format!(
                                    "Chip {} part {}: slice {} exceeds the 16-bit word.",
                                    self.ast.name, link.gate, arg.value
                                ),
                            ));
                        }
                        self.nets.insert(
                            name.clone(),
                            NetEntry {
                                size: *to + 1,
                                kind: NetKind::Internal,
                            },
                        );
                    }
                }
                Conn::Net {
                    name: name.clone(),
                    from: *from,
                    to: *to,
                }
            }
        };
        Ok(Binding {
            pin: arg.name.clone(),
            width,
            conn,
        })
    }
}

/// Links a parse tree against the registry, resolving non-built-in
/// part names as `<name>.hdl` through the provider.
pub fn link(
    ast: &ChipAst,
    registry: &Registry,
    provider: &Rc<dyn HdlProvider>,
) -> Result<Rc<CompositeClass>, HdlError> {
    let mut cache = HashMap::new();
    let mut stack = vec![ast.name.clone()];
    link_inner(ast, registry, provider, &mut cache, &mut stack)
}

fn link_inner(
    ast: &ChipAst,
    registry: &Registry,
    provider: &Rc<dyn HdlProvider>,
    cache: &mut HashMap<String, Rc<CompositeClass>>,
    stack: &mut Vec<String>,
) -> Result<Rc<CompositeClass>, HdlError> {
    let mut linker = Linker {
        ast,
        registry,
        provider,
        nets: BTreeMap::new(),
    };

    // External pins seed the net table. Internal nets must not shadow
    // them.
    for (pins, kind) in [(&ast.inputs, NetKind::Input), (&ast.outputs, NetKind::Output)] {
        for p in pins {
            if linker.nets.contains_key(&p.name) {
                return Err(HdlError::other(format!(
                    "Chip {}: pin `{}` is declared twice.",
                    ast.name, p.name
                )));
            }
            linker.nets.insert(
                p.name.clone(),
                NetEntry {
                    size: p.size,
                    kind,
                },
            );
        }
    }

    let mut parts = Vec::new();
    for call in &ast.parts {
        parts.push(linker.resolve_part(call, cache, stack)?);
    }

    // First pass: destinations. Every output argument either names an
    // external output or creates/extends an internal net.
    for (call, link) in ast.parts.iter().zip(parts.iter_mut()) {
        let (ins, outs) = {
            let (i, o) = Linker::part_specs(link);
            (i.to_vec(), o.to_vec())
        };
        for arg in &call.arguments {
            if ins.iter().any(|p| p.name == arg.name) {
                continue;
            }
            match outs.iter().find(|p| p.name == arg.name) {
                Some(pin) => {
                    let b = linker.bind_output(link, arg, pin.size)?;
                    link.outputs.push(b);
                }
                None => {
                    return Err(HdlError {
                        msg: format!(
                            "Chip {} part {}: `{}` is neither an input nor an output of {}.",
                            ast.name, link.gate, arg.name, link.gate
                        ),
                        kind: ErrorKind::PinNotDeclared(location(ast, arg.line)),
                    });
                }
            }
        }
    }

    // Second pass: sources. Runs after all destinations exist so a
    // part may read a net that a later part drives.
    for (call, link) in ast.parts.iter().zip(parts.iter_mut()) {
        let ins = Linker::part_specs(link).0.to_vec();
        for arg in &call.arguments {
            if let Some(pin) = ins.iter().find(|p| p.name == arg.name) {
                let b = linker.bind_input(link, arg, pin.size)?;
                link.inputs.push(b);
            }
        }
    }

    let order = evaluation_order(ast, &parts)?;

    let internals = linker
        .nets
        .iter()
        .filter(|(_, e)| e.kind == NetKind::Internal)
        .map(|(name, e)| PinSpec::new(name.clone(), e.size))
        .collect();

    let sequential = parts.iter().any(|p| p.sequential);
    debug!(
        "Linked chip {}: {} parts, order {:?}",
        ast.name,
        parts.len(),
        order
    );

    Ok(Rc::new(CompositeClass {
        spec: GateSpec {
            name: ast.name.clone(),
            description: format!("Composite chip {}", ast.name),
            input_pins: ast.inputs.clone(),
            output_pins: ast.outputs.clone(),
            truth_table: None,
        },
        internals,
        parts,
        order,
        sequential,
        path: ast.path.clone(),
    }))
}

/// Orders parts producer-before-consumer. Strongly connected
/// components containing a sequential part keep declaration order;
/// purely combinational components of more than one part (or a part
/// feeding itself) are rejected.
fn evaluation_order(ast: &ChipAst, parts: &[PartLink]) -> Result<Vec<usize>, HdlError> {
    let mut graph: Graph<usize, ()> = Graph::new();
    let nodes: Vec<_> = (0..parts.len()).map(|i| graph.add_node(i)).collect();

    let mut writers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, p) in parts.iter().enumerate() {
        for b in &p.outputs {
            if let Conn::Net { name, .. } = &b.conn {
                writers.entry(name).or_default().push(i);
            }
        }
    }

    let mut edges: HashSet<(usize, usize)> = HashSet::new();
    for (i, p) in parts.iter().enumerate() {
        for b in &p.inputs {
            if let Conn::Net { name, .. } = &b.conn {
                if let Some(ws) = writers.get(name.as_str()) {
                    for &w in ws {
                        edges.insert((w, i));
                    }
                }
            }
        }
    }
    for (w, r) in &edges {
        graph.add_edge(nodes[*w], nodes[*r], ());
    }

    let sccs = kosaraju_scc(&graph);

    // Feedback must pass through a sequential part; a purely
    // combinational component of more than one part, or one feeding
    // itself, has no stable evaluation order.
    let mut component_of = vec![0usize; parts.len()];
    let mut components: Vec<Vec<usize>> = Vec::with_capacity(sccs.len());
    for scc in &sccs {
        let cyclic = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
        if cyclic && !scc.iter().any(|n| parts[graph[*n]].sequential) {
            let members: Vec<&str> = scc.iter().map(|n| parts[graph[*n]].gate.as_str()).collect();
            let first = scc.iter().map(|n| graph[*n]).min().unwrap_or(0);
            return Err(HdlError {
                msg: format!(
                    "Chip {}: purely combinational loop through {}.",
                    ast.name,
                    members.join(", ")
                ),
                kind: ErrorKind::CombinationalLoop(location(ast, parts[first].line)),
            });
        }
        let mut members: Vec<usize> = scc.iter().map(|n| graph[*n]).collect();
        members.sort_unstable();
        for &m in &members {
            component_of[m] = components.len();
        }
        components.push(members);
    }

    // Kahn's algorithm over the condensation, always emitting the
    // ready component whose first part was declared earliest. This
    // keeps unrelated parts in declaration order, which pins down the
    // "last writer" of a conflicted net.
    let mut indegree = vec![0usize; components.len()];
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    for (w, r) in &edges {
        let (cw, cr) = (component_of[*w], component_of[*r]);
        if cw != cr && successors[cw].insert(cr) {
            indegree[cr] += 1;
        }
    }

    let mut ready: BTreeSet<(usize, usize)> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(c, _)| (components[c][0], c))
        .collect();
    let mut order = Vec::with_capacity(parts.len());
    while let Some(&(first, c)) = ready.iter().next() {
        ready.remove(&(first, c));
        order.extend(components[c].iter().copied());
        for &succ in &successors[c] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.insert((components[succ][0], succ));
            }
        }
    }
    Ok(order)
}

struct WriteRecord {
    part: usize,
    mask: Word,
    value: Word,
}

/// A runnable composite gate: net values plus one instance per part.
#[derive(Debug)]
pub struct Composite {
    pub class: Rc<CompositeClass>,
    nets: PinBank,
    parts: Vec<Instance>,
}

impl Composite {
    /// One combinational pass in evaluation order. Returns the
    /// conflicts observed; the last writer of each bit stays visible.
    pub fn evaluate(&mut self) -> Vec<Conflict> {
        let class = Rc::clone(&self.class);
        for p in class.spec.output_pins.iter().chain(&class.internals) {
            self.nets.set(&p.name, 0);
        }

        // Nets driven by sequential parts are pre-seeded from their
        // committed outputs, so feedback paths read last cycle's state
        // instead of the cleared zero.
        for &pi in &class.order {
            let link = &class.parts[pi];
            if !link.sequential {
                continue;
            }
            for b in &link.outputs {
                if let Conn::Net { name, from, to } = &b.conn {
                    let v = self.parts[pi].pins().value(&b.pin);
                    self.nets.write(name, *from, *to, v);
                }
            }
        }

        let mut writes: BTreeMap<String, Vec<WriteRecord>> = BTreeMap::new();
        let mut conflicts = Vec::new();

        for &pi in &class.order {
            let link = &class.parts[pi];
            for b in &link.inputs {
                let v = match &b.conn {
                    Conn::Const { value } => *value,
                    Conn::Net { name, from, to } => self.nets.read(name, *from, *to),
                };
                self.parts[pi].pins_mut().set(&b.pin, v);
            }

            for c in self.parts[pi].evaluate() {
                conflicts.push(Conflict {
                    pin: format!("{}.{}", link.gate, c.pin),
                    ..c
                });
            }

            for b in &link.outputs {
                if let Conn::Net { name, from, to } = &b.conn {
                    let v = self.parts[pi].pins().value(&b.pin);
                    self.nets.write(name, *from, *to, v);
                    let m = bits::mask(*to - *from + 1) << *from;
                    writes.entry(name.clone()).or_default().push(WriteRecord {
                        part: pi,
                        mask: m,
                        value: (v << *from) & m,
                    });
                }
            }
        }

        for (net, recs) in &writes {
            let mut involved: BTreeSet<usize> = BTreeSet::new();
            for i in 0..recs.len() {
                for j in (i + 1)..recs.len() {
                    let overlap = recs[i].mask & recs[j].mask;
                    if overlap != 0 && (recs[i].value ^ recs[j].value) & overlap != 0 {
                        involved.insert(i);
                        involved.insert(j);
                    }
                }
            }
            if !involved.is_empty() {
                conflicts.push(Conflict {
                    row: None,
                    pin: net.clone(),
                    writers: involved
                        .iter()
                        .map(|&i| Writer {
                            part: class.parts[recs[i].part].gate.clone(),
                            index: recs[i].part,
                            mask: recs[i].mask,
                            value: recs[i].value,
                        })
                        .collect(),
                });
            }
        }

        conflicts
    }

    fn clock_up(&mut self) -> Result<(), HdlError> {
        for p in &mut self.parts {
            p.clock_up()?;
        }
        Ok(())
    }

    fn clock_down(&mut self) -> Result<(), HdlError> {
        for p in &mut self.parts {
            p.clock_down()?;
        }
        Ok(())
    }
}

/// A runnable gate instance, primitive or composite. This is the type
/// the CLI drives.
#[derive(Debug)]
pub enum Instance {
    Primitive(Primitive),
    Composite(Composite),
}

impl Instance {
    pub fn name(&self) -> &str {
        match self {
            Instance::Primitive(p) => p.name,
            Instance::Composite(c) => &c.class.spec.name,
        }
    }

    pub fn input_specs(&self) -> &[PinSpec] {
        match self {
            Instance::Primitive(p) => p.input_specs(),
            Instance::Composite(c) => &c.class.spec.input_pins,
        }
    }

    pub fn output_specs(&self) -> &[PinSpec] {
        match self {
            Instance::Primitive(p) => p.output_specs(),
            Instance::Composite(c) => &c.class.spec.output_pins,
        }
    }

    pub fn pins(&self) -> &PinBank {
        match self {
            Instance::Primitive(p) => &p.pins,
            Instance::Composite(c) => &c.nets,
        }
    }

    pub fn pins_mut(&mut self) -> &mut PinBank {
        match self {
            Instance::Primitive(p) => &mut p.pins,
            Instance::Composite(c) => &mut c.nets,
        }
    }

    pub fn evaluate(&mut self) -> Vec<Conflict> {
        match self {
            Instance::Primitive(p) => {
                p.evaluate();
                Vec::new()
            }
            Instance::Composite(c) => c.evaluate(),
        }
    }

    pub fn is_sequential(&self) -> bool {
        match self {
            Instance::Primitive(p) => p.kind.is_sequential(),
            Instance::Composite(c) => c.class.is_sequential(),
        }
    }

    pub fn clock_up(&mut self) -> Result<(), HdlError> {
        if !self.is_sequential() {
            return Ok(());
        }
        match self {
            Instance::Primitive(p) => p.clock_up(),
            Instance::Composite(c) => c.clock_up(),
        }
    }

    pub fn clock_down(&mut self) -> Result<(), HdlError> {
        if !self.is_sequential() {
            return Ok(());
        }
        match self {
            Instance::Primitive(p) => p.clock_down(),
            Instance::Composite(c) => c.clock_down(),
        }
    }

    /// Advances the clock one half-phase, drives the matching edge
    /// through every sequential part, and re-propagates.
    pub fn tick(&mut self, clock: &ClockHandle) -> Result<Vec<Conflict>, HdlError> {
        let edge = clock.borrow_mut().tick();
        match edge {
            Edge::Rising => self.clock_up()?,
            Edge::Falling => self.clock_down()?,
        }
        Ok(self.evaluate())
    }

    /// A full clock cycle: Low -> High -> Low.
    pub fn cycle(&mut self, clock: &ClockHandle) -> Result<Vec<Conflict>, HdlError> {
        self.tick(clock)?;
        self.tick(clock)
    }

    pub fn set_pin_values(&mut self, values: &Row) {
        for (name, v) in values {
            self.pins_mut().set(name, *v);
        }
    }

    /// Current values of the externally visible pins.
    pub fn get_pin_values(&self) -> Row {
        let mut row = Row::new();
        for spec in self.input_specs().iter().chain(self.output_specs()) {
            row.insert(spec.name.clone(), self.pins().value(&spec.name));
        }
        row
    }

    fn is_input(&self, name: &str) -> bool {
        self.input_specs().iter().any(|p| p.name == name)
    }

    /// Assigns the row's input values, evaluates once, and reads back
    /// every declared pin. Expected entries are checked against the
    /// outputs.
    pub fn step(&mut self, row: &DataRow) -> StepResult {
        for (name, entry) in row {
            if let RowEntry::Value(v) = entry {
                if self.is_input(name) {
                    self.pins_mut().set(name, *v);
                }
            }
        }
        let conflicts = self.evaluate();

        let outputs = self.get_pin_values();
        let mut mismatches = Vec::new();
        for (name, entry) in row {
            if let RowEntry::Expected(e) = entry {
                let actual = self.pins().value(name);
                if actual != *e {
                    mismatches.push(Mismatch {
                        row: 0,
                        pin: name.clone(),
                        expected: *e,
                        actual,
                    });
                }
            }
        }
        StepResult {
            outputs,
            conflicts,
            mismatches,
        }
    }

    /// Eager truth-table expansion over stimulus rows.
    pub fn exec_on_data(&mut self, rows: &[DataRow]) -> ExecResult {
        let mut res = ExecResult::default();
        for (ri, row) in rows.iter().enumerate() {
            let mut step = self.step(row);
            for mut c in step.conflicts.drain(..) {
                c.row = Some(ri);
                res.conflicts.push(c);
            }
            for mut m in step.mismatches.drain(..) {
                m.row = ri;
                res.mismatches.push(m);
            }
            res.result.push(step.outputs);
        }
        res
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::env;
    use std::path::Path;

    use crate::clock::isolated_clock;
    use crate::data::parse_rows;
    use crate::parser::{parse_source, FileReader};

    fn chips_provider() -> Rc<dyn HdlProvider> {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        Rc::new(FileReader::new(&manifest_dir.join("resources").join("chips")))
    }

    fn compile(name: &str) -> Instance {
        let provider = chips_provider();
        let source = provider.get_hdl(name).expect("fixture must exist");
        let ast = parse_source(&source).expect("parse error");
        let registry = Registry::new();
        let class = link(&ast, &registry, &provider).expect("link error");
        Instance::Composite(class.instantiate())
    }

    fn compile_source(source: &str) -> Result<Rc<CompositeClass>, HdlError> {
        let ast = parse_source(source)?;
        let registry = Registry::new();
        link(&ast, &registry, &chips_provider())
    }

    fn eval_with(instance: &mut Instance, inputs: &[(&str, Word)]) -> Row {
        for (name, v) in inputs {
            instance.pins_mut().set(name, *v);
        }
        instance.evaluate();
        instance.get_pin_values()
    }

    #[test]
    fn test_mux_composite_from_primitives() {
        let mut mux = compile("Mux.hdl");
        assert_eq!(eval_with(&mut mux, &[("a", 1), ("b", 0), ("sel", 0)])["out"], 1);
        assert_eq!(eval_with(&mut mux, &[("a", 1), ("b", 0), ("sel", 1)])["out"], 0);
        assert_eq!(eval_with(&mut mux, &[("a", 0), ("b", 1), ("sel", 1)])["out"], 1);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let mut xor = compile("Xor.hdl");
        let first = eval_with(&mut xor, &[("a", 1), ("b", 0)]);
        let second = eval_with(&mut xor, &[("a", 1), ("b", 0)]);
        assert_eq!(first, second);
        assert_eq!(first["out"], 1);
    }

    #[test]
    fn test_or8way_input_slices() {
        let mut chip = compile("Or8Way.hdl");
        assert_eq!(eval_with(&mut chip, &[("in", 0)])["out"], 0);
        assert_eq!(eval_with(&mut chip, &[("in", 0b0001_0000)])["out"], 1);
        assert_eq!(eval_with(&mut chip, &[("in", 0b1000_0000)])["out"], 1);
    }

    #[test]
    fn test_file_resolved_sub_chips() {
        // Alarm.hdl instantiates Majority.hdl, which is not a builtin.
        let mut alarm = compile("Alarm.hdl");
        assert_eq!(eval_with(&mut alarm, &[("a", 1), ("b", 1), ("c", 0)])["ok"], 0);
        assert_eq!(eval_with(&mut alarm, &[("a", 0), ("b", 0), ("c", 1)])["ok"], 1);
    }

    #[test]
    fn test_exec_on_data_truth_table() {
        let mut and = compile("And.hdl");
        let rows = parse_rows(
            r#"[{"a": 0, "b": 0}, {"a": 0, "b": 1}, {"a": 1, "b": 1, "out": {"expected": 1}}]"#,
        )
        .unwrap();
        let res = and.exec_on_data(&rows);
        assert_eq!(res.result.len(), 3);
        assert_eq!(res.result[0]["out"], 0);
        assert_eq!(res.result[2]["out"], 1);
        assert!(res.conflicts.is_empty());
        assert!(res.mismatches.is_empty());
    }

    #[test]
    fn test_exec_on_data_reports_mismatches() {
        let mut and = compile("And.hdl");
        let rows = parse_rows(r#"[{"a": 1, "b": 0, "out": {"expected": 1}}]"#).unwrap();
        let res = and.exec_on_data(&rows);
        assert_eq!(res.mismatches.len(), 1);
        assert_eq!(res.mismatches[0].pin, "out");
        assert_eq!(res.mismatches[0].expected, 1);
        assert_eq!(res.mismatches[0].actual, 0);
    }

    #[test]
    fn test_conflicting_writers_are_surfaced_not_fatal() {
        let mut clash = compile("Clash.hdl");
        let rows = parse_rows(r#"[{"a": 1}]"#).unwrap();
        let res = clash.exec_on_data(&rows);
        assert_eq!(res.conflicts.len(), 1);
        let c = &res.conflicts[0];
        assert_eq!(c.row, Some(0));
        assert_eq!(c.pin, "x");
        let writers: Vec<&str> = c.writers.iter().map(|w| w.part.as_str()).collect();
        assert_eq!(writers, vec!["Not", "Or"]);
        // The last topological writer's value is the visible one.
        assert_eq!(res.result[0]["out"], 1);

        // With a = 0 both writers agree and there is no conflict.
        let rows = parse_rows(r#"[{"a": 0}]"#).unwrap();
        let res = clash.exec_on_data(&rows);
        assert!(res.conflicts.is_empty());
        assert_eq!(res.result[0]["out"], 1);
    }

    #[test]
    fn test_combinational_loop_is_rejected() {
        let e = compile_source(
            "CHIP Osc { IN y, w; OUT o; PARTS: \
             And(a=x, b=y, out=z); And(a=z, b=w, out=x); Or(a=x, b=z, out=o); }",
        )
        .unwrap_err();
        assert!(matches!(e.kind, ErrorKind::CombinationalLoop(_)));
    }

    #[test]
    fn test_sequential_feedback_is_allowed() {
        // Bit.hdl feeds the DFF output back through a Mux.
        let mut bit = compile("Bit.hdl");
        let clock = isolated_clock();

        eval_with(&mut bit, &[("in", 1), ("load", 1)]);
        assert_eq!(bit.pins().value("out"), 0);
        bit.cycle(&clock).unwrap();
        assert_eq!(bit.pins().value("out"), 1);

        // load = 0 keeps the stored bit.
        eval_with(&mut bit, &[("in", 0), ("load", 0)]);
        bit.cycle(&clock).unwrap();
        assert_eq!(bit.pins().value("out"), 1);
    }

    #[test]
    fn test_register_builtin_clocking() {
        let registry = Registry::new();
        let mut reg = Instance::Primitive(registry.get("Register").unwrap().instantiate());
        let clock = isolated_clock();

        eval_with(&mut reg, &[("in", 0xBEEF), ("load", 1)]);
        reg.cycle(&clock).unwrap();
        assert_eq!(reg.pins().value("out"), 0xBEEF);

        eval_with(&mut reg, &[("in", 0x1234), ("load", 0)]);
        reg.cycle(&clock).unwrap();
        assert_eq!(reg.pins().value("out"), 0xBEEF);
    }

    #[test]
    fn test_unknown_gate() {
        let e = compile_source("CHIP U { IN a; OUT o; PARTS: Blorp(a=a, out=o); }").unwrap_err();
        assert!(matches!(e.kind, ErrorKind::UnknownGate(_)));
    }

    #[test]
    fn test_pin_not_declared() {
        let e = compile_source("CHIP P { IN a; OUT o; PARTS: And(q=a, out=o); }").unwrap_err();
        assert!(matches!(e.kind, ErrorKind::PinNotDeclared(_)));
    }

    #[test]
    fn test_width_mismatch() {
        let e = compile_source("CHIP W { IN a[16]; OUT o; PARTS: Not(in=a, out=o); }").unwrap_err();
        assert!(matches!(e.kind, ErrorKind::WidthMismatch(_)));
    }

    #[test]
    fn test_slice_out_of_range() {
        let e = compile_source(
            "CHIP S { IN a[8]; OUT o; PARTS: Or8Way(in=a[1..8], out=o); }",
        )
        .unwrap_err();
        assert!(matches!(e.kind, ErrorKind::SliceOutOfRange(_)));
    }

    #[test]
    fn test_true_false_literals_widen() {
        let class = compile_source(
            "CHIP K { IN a[16]; OUT o[16]; PARTS: And16(a=a, b=true, out=o); }",
        )
        .unwrap();
        let mut k = Instance::Composite(class.instantiate());
        assert_eq!(eval_with(&mut k, &[("a", 0xBEEF)])["o"], 0xBEEF);
    }

    #[test]
    fn test_sliced_writes_to_output_bus() {
        let class = compile_source(
            "CHIP Two { IN a, b; OUT o[2]; PARTS: \
             HalfAdder(a=a, b=b, sum=o[0..0], carry=o[1..1]); }",
        )
        .unwrap();
        let mut two = Instance::Composite(class.instantiate());
        assert_eq!(eval_with(&mut two, &[("a", 1), ("b", 1)])["o"], 0b10);
        assert_eq!(eval_with(&mut two, &[("a", 1), ("b", 0)])["o"], 0b01);
    }

    #[test]
    fn test_internal_net_grows_for_sliced_writes() {
        // Two single-bit writers assemble a 2-bit internal bus.
        let class = compile_source(
            "CHIP Grow { IN a; OUT o; PARTS: \
             Not(in=a, out=s[0..0]); Not(in=a, out=s[1..1]); \
             And(a=s[0], b=s[1], out=o); }",
        )
        .unwrap();
        assert!(class.internals.iter().any(|p| p.name == "s" && p.size == 2));
        let mut grow = Instance::Composite(class.instantiate());
        assert_eq!(eval_with(&mut grow, &[("a", 0)])["o"], 1);
        assert_eq!(eval_with(&mut grow, &[("a", 1)])["o"], 0);
    }

    #[test]
    fn test_instance_pin_value_roundtrip() {
        let mut mux = compile("Mux.hdl");
        let mut values = Row::new();
        values.insert(String::from("a"), 1);
        values.insert(String::from("sel"), 0);
        mux.set_pin_values(&values);
        mux.evaluate();
        let read = mux.get_pin_values();
        assert_eq!(read["a"], 1);
        assert_eq!(read["out"], 1);
    }
}
