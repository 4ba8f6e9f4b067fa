use std::path::Path;

pub use asm::{
    encode, pack, AsmError, BuildError, Encoded, Field, FieldValue, Instruction, LabelField,
    Program, END_OF_PROGRAM, MAX_ERRORS, WORD_BYTES,
};
pub use isa::{
    classify, Flag, FlagConfig, InstructionConfig, InstructionDef, Isa, IsaConfig,
    MalformedCatalog, OperandConfig, OperandKind, Pipe, PipeConfig, TokenKind, OPCODE_BITS,
    OPCODE_SPACE, PIPE_OPCODE_BASE, WORD_BITS,
};
pub use source::{Anchor, Diagnostic, LineKind, SourceLine};

mod asm;
mod isa;
mod source;
mod util;

const DEFAULT_PATH: &str = "<input>";

pub struct Code<'a> {
    path: &'a Path,
    text: &'a str,
}

impl<'a> Code<'a> {
    /// Assembles `text` into output words, sentinel included.
    pub fn assemble(isa: &Isa, text: &'a str) -> anyhow::Result<Vec<u32>> {
        let program = Code::new(Path::new(DEFAULT_PATH), text).build(isa)?;
        Ok(program.words().to_vec())
    }

    pub fn new(path: &'a Path, text: &'a str) -> Self {
        Self { path, text }
    }

    pub fn build(&self, isa: &Isa) -> Result<Program<'a>, BuildError> {
        Program::build(isa, self.path, self.text)
    }

    /// Returns every diagnostic the build would report.
    pub fn check(&self, isa: &Isa) -> Vec<Diagnostic> {
        match self.build(isa) {
            Ok(_) => Vec::new(),
            Err(e) => match e {
                BuildError::TooManyErrors { diagnostics }
                | BuildError::CompletedWithErrors { diagnostics } => diagnostics,
            },
        }
    }
}
