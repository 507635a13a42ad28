use once_cell::sync::Lazy;

use super::{PhysRegInfo, RegClass, RegisterFile};

static REGISTERS_STR_CALLER: [&str; 9] = [
    "rax", "rcx", "rdx", "rsi", "rdi", "r8", "r9", "r10", "r11",
];
static REGISTERS_STR_CALLEE: [&str; 5] = ["rbx", "r12", "r13", "r14", "r15"];
static REGISTERS_STR_SPECIAL: [&str; 3] = ["rsp", "rbp", "rflags"];
static XMM_STR: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

/// System V argument registers, in order.
pub static ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

static REGISTERS_GLOBAL: Lazy<RegisterFile> = Lazy::new(|| {
    let mut regs = Vec::new();
    regs.extend(
        REGISTERS_STR_CALLER
            .iter()
            .map(|&name| PhysRegInfo::caller_saved(name, RegClass::Integer)),
    );
    regs.extend(
        REGISTERS_STR_CALLEE
            .iter()
            .map(|&name| PhysRegInfo::callee_saved(name, RegClass::Integer)),
    );
    regs.extend(
        REGISTERS_STR_SPECIAL
            .iter()
            .map(|&name| PhysRegInfo::reserved(name, RegClass::Integer)),
    );
    // SysV: every xmm register is caller-saved.
    regs.extend(
        XMM_STR
            .iter()
            .map(|&name| PhysRegInfo::caller_saved(name, RegClass::Float)),
    );
    RegisterFile::new(regs)
});

pub fn registers() -> &'static RegisterFile {
    &REGISTERS_GLOBAL
}

/// Return-value register of the integer class.
pub fn rv() -> &'static str {
    REGISTERS_STR_CALLER[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers() {
        let regs = registers();
        assert_eq!(regs.len(), 9 + 5 + 3 + 16);
        let rax = regs.find(rv()).unwrap();
        assert!(regs.info(rax).caller_saved);
        for name in ARG_REGS {
            assert!(regs.find(name).is_some(), "{}", name);
        }
        let rbx = regs.find("rbx").unwrap();
        assert!(regs.info(rbx).callee_saved);
        assert_eq!(regs.caller_saved().count(), 9 + 16);
    }
}
