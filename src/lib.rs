pub mod asm;
pub mod codegen;
pub mod common;
pub mod config;
pub mod frame;

use std::io::{self, Read, Write};

use thiserror::Error;

pub use crate::{
    asm::reader,
    codegen::reg_alloc::{Allocator, ClassReport, FunctionReport, Report},
    config::AllocatorConfig,
    frame::{x86_64, RegisterFile},
};

/// Reads a textual module from `r`, allocates every function and writes the
/// allocated module to `o`.
pub fn allocate<R, O>(
    mut r: R,
    mut o: O,
    regs: &RegisterFile,
    config: AllocatorConfig,
) -> Result<Report, Error>
where
    R: Read,
    O: Write,
{
    let mut src = String::new();
    r.read_to_string(&mut src)?;
    let mut module = reader::parse(&src, regs)?;

    let report = Allocator::new(regs, config).allocate_module(&mut module);

    write!(o, "{}", module.display(regs))?;
    Ok(report)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Parse(#[from] reader::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
