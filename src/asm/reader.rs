//! Line-oriented reader for the textual machine IR printed by [`FunctionDisplay`].
//!
//! ```text
//! global counter
//! function main
//!   vreg %0 i64
//!   vreg %1 i64 remat=$42
//!   slot #0 64 local
//! entry: weight=1 succ=exit
//!   %0 = mov $1
//!   jmp exit
//! exit:
//!   rax = mov %0
//!   ret implicit-use(rax)
//! end
//! ```
//!
//! Blocks are laid out in the order their headers appear. A block without an
//! explicit `weight=` gets one estimated from loop nesting.
//!
//! [`FunctionDisplay`]: super::FunctionDisplay

use std::{collections::HashMap, str::FromStr};

use thiserror::Error;

use crate::{
    codegen::loops,
    common::{BitVector, BlockId, SlotId, VReg},
    frame::{FrameSlot, PhysReg, RegisterFile, SlotKind},
};

use super::{Function, Instruction, Module, Opcode, Operand, Remat, VRegInfo, VRegType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("line {line}: unknown opcode `{name}`")]
    UnknownOpcode { line: usize, name: String },
    #[error("line {line}: unknown register `{name}`")]
    UnknownRegister { line: usize, name: String },
    #[error("line {line}: bad operand `{text}`")]
    BadOperand { line: usize, text: String },
    #[error("line {line}: unknown block `{name}`")]
    UnknownBlock { line: usize, name: String },
    #[error("line {line}: unexpected `{text}`")]
    UnexpectedLine { line: usize, text: String },
    #[error("line {line}: bad declaration: {reason}")]
    BadDeclaration { line: usize, reason: String },
    #[error("function `{name}` has no `end`")]
    UnterminatedFunction { name: String },
}

type Result<T> = std::result::Result<T, Error>;

/// Source line with comments stripped, tagged with its 1-based number.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    number: usize,
    text: &'a str,
}

pub fn parse(src: &str, regs: &RegisterFile) -> Result<Module> {
    let lines: Vec<_> = src
        .lines()
        .enumerate()
        .map(|(idx, text)| Line {
            number: idx + 1,
            text: text.split(';').next().unwrap_or_default().trim(),
        })
        .filter(|line| !line.text.is_empty())
        .collect();

    let mut module = Module::new();
    let mut rest = &lines[..];
    while let Some((line, tail)) = rest.split_first() {
        let mut words = line.text.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("global"), Some(name), None) => {
                module.globals.push(name.to_string());
                rest = tail;
            }
            (Some("function"), Some(name), None) => {
                let end = tail
                    .iter()
                    .position(|line| line.text == "end")
                    .ok_or_else(|| Error::UnterminatedFunction {
                        name: name.to_string(),
                    })?;
                let func = FunctionReader::new(name, regs).read(&tail[..end])?;
                module.functions.push(func);
                rest = &tail[end + 1..];
            }
            _ => {
                return Err(Error::UnexpectedLine {
                    line: line.number,
                    text: line.text.to_string(),
                })
            }
        }
    }
    Ok(module)
}

/// Parses a single `function .. end` unit.
pub fn parse_function(src: &str, regs: &RegisterFile) -> Result<Function> {
    let mut module = parse(src, regs)?;
    match module.functions.len() {
        1 => Ok(module.functions.remove(0)),
        _ => Err(Error::UnexpectedLine {
            line: 1,
            text: "expected exactly one function".to_string(),
        }),
    }
}

/// Slot references are not checked here since slots may be declared later.
fn parse_remat(text: &str) -> Option<Remat> {
    if let Some(val) = text.strip_prefix('$') {
        val.parse().ok().map(Remat::Const)
    } else if let Some(index) = text.strip_prefix('#') {
        index.parse().ok().map(|index| Remat::Frame(SlotId::new(index)))
    } else {
        text.strip_prefix('&')
            .filter(|name| !name.is_empty())
            .map(|name| Remat::Global(name.to_string()))
    }
}

struct FunctionReader<'a> {
    func: Function,
    regs: &'a RegisterFile,
    labels: HashMap<String, BlockId>,
}

impl<'a> FunctionReader<'a> {
    fn new(name: &str, regs: &'a RegisterFile) -> Self {
        Self {
            func: Function::new(name),
            regs,
            labels: HashMap::new(),
        }
    }

    fn read(mut self, lines: &[Line<'_>]) -> Result<Function> {
        // Headers and declarations first so operands may refer forward.
        let mut headers = Vec::new();
        for line in lines {
            let mut words = line.text.split_whitespace();
            let first = words.next().unwrap_or_default();
            match first {
                "vreg" => self.declare_vreg(*line, words)?,
                "slot" => self.declare_slot(*line, words)?,
                "clobbers" => self.declare_clobbers(*line)?,
                _ if first.ends_with(':') => {
                    let label = first.trim_end_matches(':');
                    if self.labels.contains_key(label) {
                        return Err(Error::BadDeclaration {
                            line: line.number,
                            reason: format!("block `{}` defined twice", label),
                        });
                    }
                    let block = self.func.new_block();
                    self.labels.insert(label.to_string(), block);
                    headers.push((*line, block, words.collect::<Vec<_>>()));
                }
                _ => {}
            }
        }

        let mut explicit_weight = vec![false; self.func.num_blocks()];
        for (line, block, attrs) in headers {
            for attr in attrs {
                if let Some(weight) = attr.strip_prefix("weight=") {
                    let weight = weight.parse::<f64>().map_err(|_| Error::BadDeclaration {
                        line: line.number,
                        reason: format!("bad weight `{}`", weight),
                    })?;
                    self.func.block_mut(block).weight = weight;
                    explicit_weight[block.index()] = true;
                } else if let Some(succs) = attr.strip_prefix("succ=") {
                    for label in succs.split(',').filter(|label| !label.is_empty()) {
                        let succ = self.block(line, label)?;
                        self.func.add_edge(block, succ);
                    }
                } else {
                    return Err(Error::UnexpectedLine {
                        line: line.number,
                        text: attr.to_string(),
                    });
                }
            }
        }

        let mut current = None;
        for line in lines {
            let first = line.text.split_whitespace().next().unwrap_or_default();
            match first {
                "vreg" | "slot" | "clobbers" => {}
                _ if first.ends_with(':') => {
                    current = Some(self.labels[first.trim_end_matches(':')]);
                }
                _ => {
                    let block = current.ok_or_else(|| Error::UnexpectedLine {
                        line: line.number,
                        text: line.text.to_string(),
                    })?;
                    let instr = self.instruction(*line)?;
                    self.func.push(block, instr);
                }
            }
        }

        if explicit_weight.iter().any(|explicit| !explicit) {
            let estimated = loops::estimate_weights(&self.func);
            for (idx, weight) in estimated.into_iter().enumerate() {
                if !explicit_weight[idx] {
                    self.func.block_mut(BlockId::new(idx)).weight = weight;
                }
            }
        }

        Ok(self.func)
    }

    fn declare_vreg<'l>(
        &mut self,
        line: Line<'_>,
        mut words: impl Iterator<Item = &'l str>,
    ) -> Result<()> {
        let bad = |reason: String| Error::BadDeclaration {
            line: line.number,
            reason,
        };
        let name = words.next().unwrap_or_default();
        let index = name
            .strip_prefix('%')
            .and_then(|index| index.parse::<usize>().ok())
            .ok_or_else(|| bad(format!("bad virtual register `{}`", name)))?;
        if index != self.func.num_vregs() {
            return Err(bad(format!(
                "expected %{}, found `{}`",
                self.func.num_vregs(),
                name
            )));
        }
        let ty = words.next().unwrap_or_default();
        let ty = VRegType::from_str(ty).map_err(|_| bad(format!("unknown type `{}`", ty)))?;

        let mut info = VRegInfo::new(ty);
        for attr in words {
            match attr {
                "spilled" => info.spilled = true,
                "sunk" => info.sunk = true,
                _ => {
                    let remat = attr
                        .strip_prefix("remat=")
                        .ok_or_else(|| bad(format!("unknown attribute `{}`", attr)))?;
                    info.remat = Some(
                        parse_remat(remat)
                            .ok_or_else(|| bad(format!("cannot rematerialize from `{}`", remat)))?,
                    );
                }
            }
        }
        self.func.new_vreg(info);
        Ok(())
    }

    fn declare_slot<'l>(
        &mut self,
        line: Line<'_>,
        mut words: impl Iterator<Item = &'l str>,
    ) -> Result<()> {
        let bad = |reason: String| Error::BadDeclaration {
            line: line.number,
            reason,
        };
        let name = words.next().unwrap_or_default();
        let id = name
            .strip_prefix('#')
            .and_then(|index| index.parse::<usize>().ok())
            .map(SlotId::new)
            .ok_or_else(|| bad(format!("bad slot `{}`", name)))?;
        if self.func.frame.get(id).is_some() {
            return Err(bad(format!("slot `{}` declared twice", name)));
        }
        let size = words.next().unwrap_or_default();
        let size = size
            .parse::<u32>()
            .map_err(|_| bad(format!("bad slot size `{}`", size)))?;
        let kind = match words.next() {
            Some(kind) => {
                SlotKind::from_str(kind).map_err(|_| bad(format!("unknown slot kind `{}`", kind)))?
            }
            None => SlotKind::Local,
        };
        self.func.frame.insert(FrameSlot { id, size, kind });
        Ok(())
    }

    fn declare_clobbers(&mut self, line: Line<'_>) -> Result<()> {
        let list = line.text.trim_start_matches("clobbers");
        let mut clobbered = BitVector::new(self.regs.len());
        for name in list.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            clobbered.set(self.phys(line, name)?.index());
        }
        self.func.clobbered = Some(clobbered);
        Ok(())
    }

    fn instruction(&self, line: Line<'_>) -> Result<Instruction> {
        let (defs, rest) = match line.text.split_once('=') {
            Some((defs, rest)) => (defs.trim(), rest.trim()),
            None => ("", line.text),
        };
        let (opcode, rest) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let opcode = Opcode::from_str(opcode).map_err(|_| Error::UnknownOpcode {
            line: line.number,
            name: opcode.to_string(),
        })?;

        let (uses, mut implicit) = match rest.find("implicit-") {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let defs = self.operands(line, defs)?;
        let uses = match opcode {
            Opcode::Jmp | Opcode::Br => uses
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(|label| self.block(line, label).map(Operand::Block))
                .collect::<Result<Vec<_>>>()?,
            _ => self.operands(line, uses)?,
        };

        let mut instr = Instruction::new(opcode, defs, uses);
        loop {
            implicit = implicit.trim_start();
            if implicit.is_empty() {
                break;
            }
            let (is_def, tail) = if let Some(tail) = implicit.strip_prefix("implicit-def(") {
                (true, tail)
            } else if let Some(tail) = implicit.strip_prefix("implicit-use(") {
                (false, tail)
            } else {
                return Err(Error::UnexpectedLine {
                    line: line.number,
                    text: implicit.to_string(),
                });
            };
            let (list, tail) = tail.split_once(')').ok_or_else(|| Error::BadOperand {
                line: line.number,
                text: implicit.to_string(),
            })?;
            let regs = list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| self.phys(line, name))
                .collect::<Result<Vec<_>>>()?;
            if is_def {
                instr.imp_defs.extend(regs);
            } else {
                instr.imp_uses.extend(regs);
            }
            implicit = tail;
        }
        Ok(instr)
    }

    fn operands(&self, line: Line<'_>, text: &str) -> Result<Vec<Operand>> {
        text.split(',')
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| self.operand(line, text))
            .collect()
    }

    fn operand(&self, line: Line<'_>, text: &str) -> Result<Operand> {
        let bad = || Error::BadOperand {
            line: line.number,
            text: text.to_string(),
        };
        let op = if let Some(index) = text.strip_prefix('%') {
            let index = index.parse::<usize>().map_err(|_| bad())?;
            if index >= self.func.num_vregs() {
                return Err(bad());
            }
            Operand::Virt(VReg::new(index))
        } else if let Some(val) = text.strip_prefix('$') {
            Operand::Imm(val.parse().map_err(|_| bad())?)
        } else if let Some(index) = text.strip_prefix('#') {
            let slot = SlotId::new(index.parse().map_err(|_| bad())?);
            if self.func.frame.get(slot).is_none() {
                return Err(bad());
            }
            Operand::Frame(slot)
        } else if let Some(name) = text.strip_prefix('&') {
            Operand::Global(name.to_string())
        } else if let Some(name) = text.strip_prefix('@') {
            Operand::Function(name.to_string())
        } else if let Some(&block) = self.labels.get(text) {
            Operand::Block(block)
        } else {
            Operand::Phys(self.phys(line, text)?)
        };
        Ok(op)
    }

    fn phys(&self, line: Line<'_>, name: &str) -> Result<PhysReg> {
        self.regs.find(name).ok_or_else(|| Error::UnknownRegister {
            line: line.number,
            name: name.to_string(),
        })
    }

    fn block(&self, line: Line<'_>, label: &str) -> Result<BlockId> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::UnknownBlock {
                line: line.number,
                name: label.to_string(),
            })
    }
}
