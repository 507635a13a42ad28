use std::collections::HashMap;

use anyhow::{bail, Context as _, Result};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;
use regcolor::{
    asm::{Function, Opcode, Operand, Reg},
    codegen::{color, liveness::Liveness, verify},
    common::{BlockId, InstrId, SlotId},
    frame::{PhysRegInfo, RegClass, RegisterFile},
    reader, Allocator, AllocatorConfig,
};

const SEEDS: u64 = 96;
const BINARY_OPS: [&str; 6] = ["add", "sub", "mul", "xor", "and", "or"];
const MAX_STEPS: usize = 10_000;

fn register_file(k: usize) -> RegisterFile {
    const NAMES: [&str; 4] = ["r0", "r1", "r2", "r3"];
    let mut regs: Vec<_> = NAMES[..k]
        .iter()
        .map(|&name| PhysRegInfo::caller_saved(name, RegClass::Integer))
        .collect();
    regs.push(PhysRegInfo::reserved("flags", RegClass::Integer));
    regs.push(PhysRegInfo::caller_saved("f0", RegClass::Float));
    RegisterFile::new(regs)
}

/// Random function shaped as `entry`, a diamond, a counted loop and `exit`.
///
/// Values computed in `entry` are written once and all feed the result in
/// `exit`, so most of them stay live across the diamond and the loop. `%j` is
/// written on both sides of the diamond, the loop counter and the loop sum are
/// written in `entry` and again in the body.
struct Generator {
    rng: StdRng,
    decls: Vec<String>,
    lines: Vec<String>,
}

impl Generator {
    fn vreg(&mut self, remat: Option<i64>) -> usize {
        let id = self.decls.len();
        match remat {
            Some(val) => self.decls.push(format!("  vreg %{} i64 remat=${}", id, val)),
            None => self.decls.push(format!("  vreg %{} i64", id)),
        }
        id
    }

    fn emit(&mut self, line: String) {
        self.lines.push(format!("  {}", line));
    }

    fn label(&mut self, header: String) {
        self.lines.push(header);
    }

    fn pick(&mut self, from: &[usize]) -> usize {
        *from.choose(&mut self.rng).unwrap_or(&from[0])
    }

    /// `count` new single-definition values reading `sources` and each other.
    fn values(&mut self, count: usize, sources: &[usize]) -> Vec<usize> {
        let mut readable = sources.to_vec();
        let mut made = Vec::with_capacity(count);
        for _ in 0..count {
            let choice = if readable.is_empty() { 0 } else { self.rng.gen_range(0..5) };
            let id = match choice {
                0 => {
                    let val = self.rng.gen_range(-50..50);
                    let remat = self.rng.gen_bool(0.4).then_some(val);
                    let id = self.vreg(remat);
                    self.emit(format!("%{} = mov ${}", id, val));
                    id
                }
                1 => {
                    let src = self.pick(&readable);
                    let id = self.vreg(None);
                    self.emit(format!("%{} = mov %{}", id, src));
                    id
                }
                _ => {
                    let op = BINARY_OPS.choose(&mut self.rng).unwrap_or(&"add");
                    let lhs = self.pick(&readable);
                    let rhs = if self.rng.gen_bool(0.7) {
                        format!("%{}", self.pick(&readable))
                    } else {
                        format!("${}", self.rng.gen_range(-9..9))
                    };
                    let id = self.vreg(None);
                    self.emit(format!("%{} = {} %{}, {}", id, op, lhs, rhs));
                    id
                }
            };
            readable.push(id);
            made.push(id);
        }
        made
    }

    fn program(seed: u64) -> String {
        let mut gen = Generator {
            rng: StdRng::seed_from_u64(seed),
            decls: Vec::new(),
            lines: Vec::new(),
        };

        gen.label("entry: succ=left,right".to_string());
        let count = gen.rng.gen_range(2..14);
        let pool = gen.values(count, &[]);
        let counter = gen.vreg(None);
        let sum = gen.vreg(None);
        let joined = gen.vreg(None);
        let trips = gen.rng.gen_range(1..4);
        gen.emit(format!("%{} = mov ${}", counter, trips));
        gen.emit(format!("%{} = mov $0", sum));
        let cond = gen.pick(&pool);
        gen.emit(format!("cmp %{}, $0 implicit-def(flags)", cond));
        gen.emit("br left, right implicit-use(flags)".to_string());

        let weight = [1, 2, 5].choose(&mut gen.rng).copied().unwrap_or(1);
        gen.label(format!("left: weight={} succ=join", weight));
        let (a, b) = (gen.pick(&pool), gen.pick(&pool));
        gen.emit(format!("%{} = add %{}, %{}", joined, a, b));
        gen.emit("jmp join".to_string());
        gen.label("right: succ=join".to_string());
        let a = gen.pick(&pool);
        let imm = gen.rng.gen_range(-9..9);
        gen.emit(format!("%{} = sub %{}, ${}", joined, a, imm));
        gen.emit("jmp join".to_string());
        gen.label("join: succ=head".to_string());
        gen.emit("jmp head".to_string());

        gen.label("head: succ=body,exit".to_string());
        gen.emit(format!("cmp %{}, $0 implicit-def(flags)", counter));
        gen.emit("br body, exit implicit-use(flags)".to_string());

        // Body values never read the sum, so the sum updates may follow them.
        gen.label("body: succ=head".to_string());
        let mut sources = pool.clone();
        sources.extend([joined, counter]);
        let count = gen.rng.gen_range(1..6);
        for value in gen.values(count, &sources) {
            gen.emit(format!("%{} = add %{}, %{}", sum, sum, value));
        }
        gen.emit(format!("%{} = sub %{}, $1", counter, counter));
        gen.emit("jmp head".to_string());

        gen.label("exit:".to_string());
        let mut results = pool;
        results.extend([joined, sum]);
        results.shuffle(&mut gen.rng);
        let mut acc = results[0];
        for &value in &results[1..] {
            let op = BINARY_OPS[..3].choose(&mut gen.rng).unwrap_or(&"add");
            let id = gen.vreg(None);
            gen.emit(format!("%{} = {} %{}, %{}", id, op, acc, value));
            acc = id;
        }
        gen.emit(format!("r0 = mov %{}", acc));
        gen.emit("ret implicit-use(r0)".to_string());

        format!(
            "function f\n{}\n{}\nend\n",
            gen.decls.join("\n"),
            gen.lines.join("\n")
        )
    }
}

#[derive(Default)]
struct Machine {
    values: HashMap<Reg, i64>,
    slots: HashMap<SlotId, i64>,
}

impl Machine {
    fn read(&self, id: InstrId, op: &Operand) -> Result<i64> {
        match op {
            Operand::Imm(val) => Ok(*val),
            Operand::Phys(_) | Operand::Virt(_) => {
                let reg = op.reg().context("register operand")?;
                self.values
                    .get(&reg)
                    .copied()
                    .with_context(|| format!("{} reads undefined {:?}", id, reg))
            }
            Operand::Frame(slot) => self
                .slots
                .get(slot)
                .copied()
                .with_context(|| format!("{} reads empty {}", id, slot)),
            _ => bail!("{} has an unexpected operand {:?}", id, op),
        }
    }
}

fn target(id: InstrId, op: Option<&&Operand>) -> Result<BlockId> {
    match op {
        Some(Operand::Block(block)) => Ok(*block),
        other => bail!("{} branches to {:?}", id, other),
    }
}

/// Runs the function and returns `r0` at `ret`.
fn interpret(func: &Function, regs: &RegisterFile) -> Result<i64> {
    let r0 = Reg::Phys(regs.find("r0").context("no r0")?);
    let mut machine = Machine::default();
    let mut block = func.entry().context("no entry block")?;
    let mut steps = 0;

    loop {
        let mut next = None;
        for (id, instr) in func.instrs(block) {
            steps += 1;
            if steps > MAX_STEPS {
                bail!("{} runs away", func.name);
            }
            let uses: Vec<_> = instr.use_operands().collect();
            let arg = |idx: usize| -> Result<i64> {
                let op = uses
                    .get(idx)
                    .with_context(|| format!("{} lacks operand {}", id, idx))?;
                machine.read(id, op)
            };
            let result = match instr.opcode {
                Opcode::Mov | Opcode::Load => arg(0)?,
                Opcode::Add => arg(0)?.wrapping_add(arg(1)?),
                Opcode::Sub => arg(0)?.wrapping_sub(arg(1)?),
                Opcode::Mul => arg(0)?.wrapping_mul(arg(1)?),
                Opcode::Xor => arg(0)? ^ arg(1)?,
                Opcode::And => arg(0)? & arg(1)?,
                Opcode::Or => arg(0)? | arg(1)?,
                Opcode::Store => {
                    let Some(Operand::Frame(slot)) = uses.first() else {
                        bail!("{} stores to {:?}", id, uses.first());
                    };
                    let val = arg(1)?;
                    machine.slots.insert(*slot, val);
                    continue;
                }
                Opcode::Cmp => {
                    let flags = instr.imp_defs.first().context("cmp without flags")?;
                    let val = arg(0)?.wrapping_sub(arg(1)?);
                    machine.values.insert(Reg::Phys(*flags), val);
                    continue;
                }
                Opcode::Br => {
                    let flags = instr.imp_uses.first().context("br without flags")?;
                    let taken = machine.read(id, &Operand::Phys(*flags))? != 0;
                    let idx = if taken { 0 } else { 1 };
                    next = Some(target(id, uses.get(idx))?);
                    break;
                }
                Opcode::Jmp => {
                    next = Some(target(id, uses.first())?);
                    break;
                }
                Opcode::Ret => {
                    return machine.values.get(&r0).copied().context("r0 is undefined at ret");
                }
                opcode => bail!("{} has unexpected opcode {}", id, opcode),
            };
            let dst = instr
                .def_operands()
                .next()
                .and_then(Operand::reg)
                .with_context(|| format!("{} defines no register", id))?;
            machine.values.insert(dst, result);
        }
        block = next.with_context(|| format!("{} falls off {}", func.name, block))?;
    }
}

/// Every pair live at a definition that one round colored must differ,
/// except a copy and its source.
fn check_interference(
    func: &Function,
    regs: &RegisterFile,
    config: &AllocatorConfig,
) -> Result<()> {
    let liveness = Liveness::analyze(func, regs, RegClass::Integer);
    let coloring = color::color(func, regs, config, &liveness);
    let index = liveness.index();
    let color_of = |idx: usize| match index.reg(idx) {
        Reg::Phys(reg) => Some(reg),
        Reg::Virt(vreg) => coloring.color(vreg),
    };

    for block in func.blocks() {
        let mut live = liveness.live_out(block.id).clone();
        let instrs: Vec<_> = func.instrs(block.id).collect();
        for (id, instr) in instrs.into_iter().rev() {
            if let Some((_, src)) = instr.copy_regs() {
                if let Some(src) = index.index(src) {
                    live.reset(src);
                }
            }
            let defs: Vec<_> = instr.def_regs().filter_map(|reg| index.index(reg)).collect();
            for &def in &defs {
                live.set(def);
            }
            for &def in &defs {
                for other in live.iter().filter(|&other| other != def) {
                    if index.is_precolored(def) && index.is_precolored(other) {
                        continue;
                    }
                    if let (Some(a), Some(b)) = (color_of(def), color_of(other)) {
                        if a == b {
                            bail!(
                                "{}: {:?} and {:?} interfere but share {}",
                                id,
                                index.reg(def),
                                index.reg(other),
                                regs.name(a)
                            );
                        }
                    }
                }
            }
            for &def in &defs {
                live.reset(def);
            }
            for idx in instr.use_regs().filter_map(|reg| index.index(reg)) {
                live.set(idx);
            }
        }
    }
    Ok(())
}

fn check(seed: u64, k: usize, config: AllocatorConfig) -> Result<()> {
    let regs = register_file(k);
    let src = Generator::program(seed);
    let mut func = reader::parse_function(&src, &regs).with_context(|| src.clone())?;
    let num_vregs = func.num_vregs();
    let expected = interpret(&func, &regs).with_context(|| format!("before allocation:\n{}", src))?;
    check_interference(&func, &regs, &config)
        .with_context(|| format!("seed {} with {} registers:\n{}", seed, k, src))?;

    let report = Allocator::new(&regs, config).allocate_function(&mut func);
    let allocated = func.display(&regs).to_string();

    let leftover = verify::check_allocated(&func);
    if !leftover.is_empty() {
        bail!("seed {}: {:?} still hold virtual registers\n{}", seed, leftover, allocated);
    }
    let actual = interpret(&func, &regs)
        .with_context(|| format!("seed {} after allocation:\n{}", seed, allocated))?;
    if actual != expected {
        bail!(
            "seed {} with {} registers: {} != {}\n{}\n{}",
            seed,
            k,
            actual,
            expected,
            src,
            allocated
        );
    }

    // The final sum feeds `r0` straight away and can never be chosen for
    // spilling, so at most V - 1 rounds rewrite.
    let integer = report
        .class(RegClass::Integer)
        .context("no integer report")?;
    if integer.iterations > num_vregs || integer.iterations != integer.rewrites + 1 {
        bail!(
            "seed {}: {} iterations for {} virtual registers\n{}",
            seed,
            integer.iterations,
            num_vregs,
            src
        );
    }
    Ok(())
}

#[test]
fn test_random_programs_without_sinking() {
    (0..SEEDS).into_par_iter().for_each(|seed| {
        for k in 2..=4 {
            check(seed, k, AllocatorConfig::new().sink_enabled(false)).unwrap();
        }
    });
}

#[test]
fn test_random_programs_with_sinking() {
    (0..SEEDS).into_par_iter().for_each(|seed| {
        for k in 2..=4 {
            check(seed, k, AllocatorConfig::default()).unwrap();
        }
    });
}

#[test]
fn test_random_programs_callee_saved_first() {
    (0..SEEDS).into_par_iter().for_each(|seed| {
        let config = AllocatorConfig::new()
            .use_caller_saved_first(false)
            .merge_spilled_frames(false);
        check(seed, 3, config).unwrap();
    });
}

#[test]
fn test_generated_program_shape() -> Result<()> {
    let regs = register_file(2);
    let func = reader::parse_function(&Generator::program(7), &regs)?;
    assert_eq!(func.num_blocks(), 7);
    let body = func.layout()[5];
    let exit = func.layout()[6];
    assert_eq!(func.block(body).weight, 10.0);
    assert_eq!(func.block(exit).weight, 1.0);
    assert!(interpret(&func, &regs).is_ok());
    Ok(())
}
