pub mod x86_64;

use std::collections::BTreeMap;

use strum::{Display, EnumIter, EnumString};

use crate::common::{BitVector, SlotId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum RegClass {
    Integer,
    Float,
}

/// Index into a [`RegisterFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysReg(u16);

impl PhysReg {
    pub fn new(index: usize) -> Self {
        Self(u16::try_from(index).expect("too many physical registers"))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysRegInfo {
    pub name: &'static str,
    pub class: RegClass,
    pub allocatable: bool,
    pub caller_saved: bool,
    pub callee_saved: bool,
}

impl PhysRegInfo {
    pub fn caller_saved(name: &'static str, class: RegClass) -> Self {
        Self {
            name,
            class,
            allocatable: true,
            caller_saved: true,
            callee_saved: false,
        }
    }

    pub fn callee_saved(name: &'static str, class: RegClass) -> Self {
        Self {
            name,
            class,
            allocatable: true,
            caller_saved: false,
            callee_saved: true,
        }
    }

    /// Never handed out by the allocator (stack pointer, flags, ...).
    pub fn reserved(name: &'static str, class: RegClass) -> Self {
        Self {
            name,
            class,
            allocatable: false,
            caller_saved: false,
            callee_saved: false,
        }
    }
}

/// Physical registers of a target.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    regs: Vec<PhysRegInfo>,
}

impl RegisterFile {
    pub fn new(regs: Vec<PhysRegInfo>) -> Self {
        Self { regs }
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    pub fn info(&self, reg: PhysReg) -> &PhysRegInfo {
        &self.regs[reg.index()]
    }

    pub fn name(&self, reg: PhysReg) -> &'static str {
        self.info(reg).name
    }

    pub fn iter(&self) -> impl Iterator<Item = (PhysReg, &PhysRegInfo)> + '_ {
        self.regs
            .iter()
            .enumerate()
            .map(|(idx, info)| (PhysReg::new(idx), info))
    }

    pub fn find(&self, name: &str) -> Option<PhysReg> {
        self.iter()
            .find(|(_, info)| info.name == name)
            .map(|(reg, _)| reg)
    }

    pub fn class_registers(&self, class: RegClass) -> impl Iterator<Item = PhysReg> + '_ {
        self.iter()
            .filter(move |(_, info)| info.class == class)
            .map(|(reg, _)| reg)
    }

    /// Allocatable registers of `class` in preference order.
    pub fn allocatable(&self, class: RegClass, caller_saved_first: bool) -> Vec<PhysReg> {
        let (mut first, second): (Vec<_>, Vec<_>) = self
            .iter()
            .filter(|(_, info)| info.class == class && info.allocatable)
            .partition(|(_, info)| info.caller_saved == caller_saved_first);
        first.extend(second);
        first.into_iter().map(|(reg, _)| reg).collect()
    }

    pub fn caller_saved(&self) -> BitVector {
        BitVector::from_indices(
            self.len(),
            self.iter()
                .filter(|(_, info)| info.caller_saved)
                .map(|(reg, _)| reg.index()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SlotKind {
    /// Address-taken local variable.
    Local,
    /// Created by the register allocator.
    Spill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSlot {
    pub id: SlotId,
    /// Size in bits.
    pub size: u32,
    pub kind: SlotKind,
}

/// Stack frame of one function. Offsets are assigned later by frame lowering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    slots: BTreeMap<SlotId, FrameSlot>,
    next: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_local(&mut self, size: u32) -> SlotId {
        self.alloc(size, SlotKind::Local)
    }

    pub fn alloc_spill(&mut self, size: u32) -> SlotId {
        self.alloc(size, SlotKind::Spill)
    }

    fn alloc(&mut self, size: u32, kind: SlotKind) -> SlotId {
        let id = SlotId::new(self.next);
        self.insert(FrameSlot { id, size, kind });
        id
    }

    /// Inserts a slot with a caller-chosen id.
    pub fn insert(&mut self, slot: FrameSlot) {
        self.next = self.next.max(slot.id.index() + 1);
        self.slots.insert(slot.id, slot);
    }

    pub fn get(&self, id: SlotId) -> Option<&FrameSlot> {
        self.slots.get(&id)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut FrameSlot> {
        self.slots.get_mut(&id)
    }

    pub fn remove(&mut self, id: SlotId) -> Option<FrameSlot> {
        self.slots.remove(&id)
    }

    pub fn slots(&self) -> impl Iterator<Item = &FrameSlot> + '_ {
        self.slots.values()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocatable_order() {
        let regs = x86_64::registers();
        let caller_first = regs.allocatable(RegClass::Integer, true);
        let callee_first = regs.allocatable(RegClass::Integer, false);

        assert_eq!(caller_first.len(), 14);
        assert_eq!(callee_first.len(), 14);
        assert_eq!(regs.name(caller_first[0]), "rax");
        assert_eq!(regs.name(callee_first[0]), "rbx");
        assert!(!caller_first.contains(&regs.find("rsp").unwrap()));
        assert!(!caller_first.contains(&regs.find("rflags").unwrap()));

        assert_eq!(regs.allocatable(RegClass::Float, true).len(), 16);
    }

    #[test]
    fn test_frame_alloc() {
        let mut frame = Frame::new();
        frame.insert(FrameSlot {
            id: SlotId::new(4),
            size: 32,
            kind: SlotKind::Local,
        });
        let spill = frame.alloc_spill(64);
        assert_eq!(spill, SlotId::new(5));
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.remove(spill).map(|slot| slot.size), Some(64));
        assert_eq!(frame.alloc_local(8), SlotId::new(6));
    }
}
