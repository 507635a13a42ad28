use anyhow::Result;
use regcolor::{
    asm::{Function, Reg},
    codegen::{color, dominator::DominatorTree, liveness::Liveness, rewrite, verify},
    frame::{PhysRegInfo, RegClass, RegisterFile, SlotKind},
    reader, x86_64, Allocator, AllocatorConfig,
};

fn two_registers() -> RegisterFile {
    RegisterFile::new(vec![
        PhysRegInfo::caller_saved("r0", RegClass::Integer),
        PhysRegInfo::caller_saved("r1", RegClass::Integer),
        PhysRegInfo::reserved("flags", RegClass::Integer),
        PhysRegInfo::caller_saved("f0", RegClass::Float),
    ])
}

fn body(func: &Function, regs: &RegisterFile) -> Vec<String> {
    func.display(regs)
        .to_string()
        .lines()
        .filter(|line| line.starts_with("  "))
        .map(str::trim)
        .filter(|line| {
            !line.starts_with("vreg") && !line.starts_with("slot") && !line.starts_with("clobbers")
        })
        .map(str::to_string)
        .collect()
}

/// Largest number of virtual registers live at once.
fn max_live_vregs(func: &Function, regs: &RegisterFile) -> usize {
    let liveness = Liveness::analyze(func, regs, RegClass::Integer);
    let index = liveness.index();
    let count = |live: &regcolor::common::BitVector| {
        live.iter().filter(|&idx| !index.is_precolored(idx)).count()
    };
    let mut max = 0;
    for block in func.blocks() {
        let mut live = liveness.live_out(block.id).clone();
        max = max.max(count(&live));
        let instrs: Vec<_> = func.instrs(block.id).map(|(_, instr)| instr).collect();
        for instr in instrs.into_iter().rev() {
            for idx in instr.def_regs().filter_map(|reg| index.index(reg)) {
                live.set(idx);
            }
            max = max.max(count(&live));
            for idx in instr.def_regs().filter_map(|reg| index.index(reg)) {
                live.reset(idx);
            }
            for idx in instr.use_regs().filter_map(|reg| index.index(reg)) {
                live.set(idx);
            }
            max = max.max(count(&live));
        }
    }
    max
}

const THREE_LIVE: &str = "
function f
  vreg %0 i64
  vreg %1 i64
  vreg %2 i64
  vreg %3 i64
  vreg %4 i64
bb0:
  %0 = mov $1
  %1 = mov $2
  %2 = mov $3
  %3 = add %1, %2
  %4 = add %3, %0
  r0 = mov %4
  ret implicit-use(r0)
end
";

#[test]
fn test_three_live_with_two_registers() -> Result<()> {
    let regs = two_registers();
    let config = AllocatorConfig::new().sink_enabled(false);

    let mut func = reader::parse_function(THREE_LIVE, &regs)?;
    assert_eq!(max_live_vregs(&func, &regs), 3);
    let liveness = Liveness::analyze(&func, &regs, RegClass::Integer);
    let coloring = color::color(&func, &regs, &config, &liveness);
    assert_eq!(coloring.spilled.len(), 1);
    rewrite::rewrite_spills(&mut func, &coloring.spilled, &config);
    assert!(max_live_vregs(&func, &regs) <= 2);

    let mut func = reader::parse_function(THREE_LIVE, &regs)?;
    let report = Allocator::new(&regs, config).allocate_function(&mut func);
    let integer = report.class(RegClass::Integer).unwrap();
    assert!(integer.iterations <= 2);
    assert_eq!(integer.spilled, 1);
    assert!(verify::check_allocated(&func).is_empty());
    assert_eq!(func.frame.len(), 1);
    Ok(())
}

#[test]
fn test_three_live_sinks_instead_of_spilling() -> Result<()> {
    let regs = two_registers();
    let mut func = reader::parse_function(THREE_LIVE, &regs)?;
    let report = Allocator::new(&regs, AllocatorConfig::default()).allocate_function(&mut func);
    let integer = report.class(RegClass::Integer).unwrap();
    assert_eq!((integer.sunk, integer.spilled), (1, 0));
    assert!(func.frame.is_empty());
    assert_eq!(
        body(&func, &regs),
        vec![
            "r1 = mov $2",
            "r0 = mov $3",
            "r0 = add r1, r0",
            "r1 = mov $1",
            "r0 = add r0, r1",
            "ret implicit-use(r0)",
        ]
    );
    Ok(())
}

#[test]
fn test_copy_is_coalesced_away() -> Result<()> {
    let regs = two_registers();
    let mut func = reader::parse_function(
        "
function f
  vreg %0 i64
  vreg %1 i64
  vreg %2 i64
bb0:
  %0 = mov $1
  %1 = mov %0
  %2 = add %1, $1
  r0 = mov %2
  ret implicit-use(r0)
end
",
        &regs,
    )?;
    let report = Allocator::new(&regs, AllocatorConfig::default()).allocate_function(&mut func);
    let integer = report.class(RegClass::Integer).unwrap();
    assert_eq!(integer.removed_copies, 2);
    assert_eq!(integer.coalesced_moves, 2);
    assert_eq!(
        body(&func, &regs),
        vec!["r0 = mov $1", "r0 = add r0, $1", "ret implicit-use(r0)"]
    );
    Ok(())
}

#[test]
fn test_diamond_dominators() -> Result<()> {
    let func = reader::parse_function(
        "
function f
  vreg %0 i64
entry: succ=a,b
  cmp rdi, $0 implicit-def(rflags)
  br a, b implicit-use(rflags)
a: succ=merge
  %0 = mov $1
  jmp merge
b: succ=merge
  jmp merge
merge:
  ret
end
",
        x86_64::registers(),
    )?;
    let [entry, a, b, merge] = [0, 1, 2, 3].map(|idx| func.layout()[idx]);
    let dom = DominatorTree::compute(&func);
    assert_eq!(dom.idom(merge), Some(entry));
    assert_eq!(dom.frontier(a).collect::<Vec<_>>(), vec![merge]);
    assert!(dom.dominates(entry, merge));
    assert!(!dom.dominates(a, b));

    let def = func.instrs(a).next().map(|(id, _)| id).unwrap();
    let ret = func.instrs(merge).next().map(|(id, _)| id).unwrap();
    assert_eq!(dom.nearest_common_dominator_of(&func, [def, ret]), Some(entry));
    Ok(())
}

const DISJOINT_SLOTS: &str = "
function f
  vreg %0 i32
  vreg %1 i32
  vreg %2 i64
  vreg %3 i64
  slot #0 32 spill
  slot #1 64 spill
bb0:
  %0 = mov $1
  store #0, %0
  %1 = load #0
  %2 = add %1, $2
  store #1, %2
  %3 = load #1
  rax = mov %3
  ret implicit-use(rax)
end
";

#[test]
fn test_disjoint_spill_slots_merge() -> Result<()> {
    let regs = x86_64::registers();
    let mut func = reader::parse_function(DISJOINT_SLOTS, regs)?;
    let report = Allocator::new(regs, AllocatorConfig::default()).allocate_function(&mut func);
    assert_eq!(report.merged_slots, 1);
    let slots: Vec<_> = func.frame.slots().map(|slot| (slot.size, slot.kind)).collect();
    assert_eq!(slots, vec![(64, SlotKind::Spill)]);

    let mut func = reader::parse_function(DISJOINT_SLOTS, regs)?;
    let config = AllocatorConfig::new().merge_spilled_frames(false);
    let report = Allocator::new(regs, config).allocate_function(&mut func);
    assert_eq!(report.merged_slots, 0);
    assert_eq!(func.frame.len(), 2);
    Ok(())
}

#[test]
fn test_allocate_text() -> Result<()> {
    let src = "
global counter

function main
  vreg %0 i64
  vreg %1 i64 remat=&counter
bb0:
  %1 = mov &counter
  %0 = load %1
  rdi = mov %0
  call @helper
  ret implicit-use(rax)
end

function helper
  vreg %0 i64
bb0:
  %0 = add rdi, $1
  rax = mov %0
  ret implicit-use(rax)
end
";
    let regs = x86_64::registers();
    let mut out = Vec::new();
    let report = regcolor::allocate(src.as_bytes(), &mut out, regs, AllocatorConfig::default())?;
    let names: Vec<_> = report.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["helper", "main"]);

    let module = reader::parse(std::str::from_utf8(&out)?, regs)?;
    assert_eq!(module.globals, vec!["counter".to_string()]);
    for func in &module.functions {
        assert!(verify::check_allocated(func).is_empty());
        assert!(func.clobbered.is_some());
    }
    let helper = &module.functions[module.function_index("helper").unwrap()];
    assert!(helper
        .all_instrs()
        .all(|(_, instr)| !instr.defines(Reg::Phys(regs.find("rbx").unwrap()))));
    Ok(())
}

#[test]
fn test_parse_error_surfaces() {
    let err = regcolor::allocate(
        "function f\nbb0:\n  nop\nend\n".as_bytes(),
        Vec::new(),
        x86_64::registers(),
        AllocatorConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, regcolor::Error::Parse(_)));
    assert_eq!(err.to_string(), "line 3: unknown opcode `nop`");
}
