use std::path::Path;

use ahash::HashMap;

pub use self::encode::{encode, pack, Encoded, Field, FieldValue, LabelField};
use crate::isa::{Isa, KindList, OperandKind, TokenKind};
use crate::source::{Anchor, Diagnostic, LineKind, SourceLine};

mod encode;

/// Number of diagnostics tolerated before the build is aborted.
pub const MAX_ERRORS: usize = 5;
/// Word appended after the last instruction.
pub const END_OF_PROGRAM: u32 = 0xffff_ffff;
/// Size of one instruction word in bytes.
pub const WORD_BYTES: u32 = 4;

/// Recoverable source error. The offending line is skipped.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("Bad indentation, expected 0 spaces for labels or 4 spaces for instructions")]
    BadIndentation,
    #[error("Labels must not start with a digit")]
    LabelStartsWithDigit,
    #[error("Labels must end with ':'")]
    LabelMissingColon { column: usize },
    #[error("Invalid character '{ch}' in label, only uppercase letters and digits are allowed")]
    LabelInvalidCharacter { column: usize, ch: char },
    #[error("Label name is empty")]
    EmptyLabel,
    #[error("Duplicate label '{name}'")]
    DuplicateLabel { name: String },
    #[error("Unknown opcode '{name}'")]
    UnknownOpcode { name: String },
    #[error("Invalid number of operands ({count}) for opcode {opcode}.")]
    WrongOperandCount { opcode: String, count: usize },
    #[error("Could not determine type of operand {operand}")]
    UnclassifiableOperand { operand: String, token: usize },
    #[error(
        "Operand types do not match expected format for opcode {opcode}.\nGot: {}. Expected {}",
        KindList(.found),
        Alternatives(.expected)
    )]
    OperandTypeMismatch {
        opcode: String,
        found: Vec<TokenKind>,
        expected: Vec<Vec<OperandKind>>,
    },
    #[error("Immediate value {value} does not fit into {width} bits")]
    ImmediateTooLarge {
        value: String,
        width: u8,
        token: usize,
    },
    #[error("Undefined label '{name}'")]
    UndefinedLabel { name: String, token: usize },
    #[error("Label '{name}' resolves to offset {offset} which does not fit into {width} bits")]
    LabelOutOfRange {
        name: String,
        offset: u64,
        width: u8,
        token: usize,
    },
}

impl AsmError {
    pub fn anchor(&self) -> Anchor {
        match self {
            Self::BadIndentation
            | Self::LabelStartsWithDigit
            | Self::EmptyLabel
            | Self::DuplicateLabel { .. } => Anchor::Column(0),
            Self::LabelMissingColon { column } | Self::LabelInvalidCharacter { column, .. } => {
                Anchor::Column(*column)
            }
            Self::UnknownOpcode { .. } => Anchor::Token(0),
            Self::WrongOperandCount { .. } | Self::OperandTypeMismatch { .. } => Anchor::Token(1),
            Self::UnclassifiableOperand { token, .. }
            | Self::ImmediateTooLarge { token, .. }
            | Self::UndefinedLabel { token, .. }
            | Self::LabelOutOfRange { token, .. } => Anchor::Token(*token),
        }
    }
}

struct Alternatives<'a>(&'a [Vec<OperandKind>]);

impl std::fmt::Display for Alternatives<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, operands) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" or ")?;
            }
            std::fmt::Display::fmt(&KindList(operands), f)?;
        }
        Ok(())
    }
}

/// Build-level failure. No output is produced.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("Reached max error count, exiting.")]
    TooManyErrors { diagnostics: Vec<Diagnostic> },
    #[error("Encoding generation completed with errors, exiting.")]
    CompletedWithErrors { diagnostics: Vec<Diagnostic> },
}

impl BuildError {
    /// Every diagnostic reported before the build was aborted, in source order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::TooManyErrors { diagnostics } | Self::CompletedWithErrors { diagnostics } => {
                diagnostics
            }
        }
    }
}

/// Diagnostics accumulated over all passes.
#[derive(Default)]
struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    fn report(&mut self, line: &SourceLine<'_>, error: AsmError) -> Result<(), BuildError> {
        let diagnostic = line.diagnostic(error);
        tracing::debug!(
            line = diagnostic.line + 1,
            column = diagnostic.column,
            "{}",
            diagnostic.error
        );
        self.items.push(diagnostic);

        if self.items.len() > MAX_ERRORS {
            Err(BuildError::TooManyErrors {
                diagnostics: std::mem::take(&mut self.items),
            })
        } else {
            Ok(())
        }
    }

    fn finish(self) -> Result<(), BuildError> {
        if self.items.is_empty() {
            Ok(())
        } else {
            Err(BuildError::CompletedWithErrors {
                diagnostics: self.items,
            })
        }
    }
}

/// One encoded instruction together with its origin.
#[derive(Debug, Clone)]
pub struct Instruction<'a> {
    /// First label bound to this instruction.
    pub label: Option<&'a str>,
    pub line: SourceLine<'a>,
    pub fields: Vec<Field<'a>>,
    pub label_field: Option<LabelField>,
}

/// Fully assembled program.
#[derive(Debug, Clone)]
pub struct Program<'a> {
    lines: Vec<SourceLine<'a>>,
    labels: HashMap<&'a str, usize>,
    instructions: Vec<Instruction<'a>>,
    words: Vec<u32>,
}

impl<'a> Program<'a> {
    /// Assembles `text` read from `file`.
    ///
    /// Either every line is valid and all labels resolve, or the build fails
    /// with all diagnostics collected so far.
    pub fn build(isa: &Isa, file: &'a Path, text: &'a str) -> Result<Self, BuildError> {
        let mut program = Self {
            lines: SourceLine::split(file, text).collect(),
            labels: HashMap::default(),
            instructions: Vec::new(),
            words: Vec::new(),
        };
        let mut diagnostics = Diagnostics::default();

        program.scan(isa, &mut diagnostics)?;
        program.resolve_labels(&mut diagnostics)?;
        diagnostics.finish()?;
        program.pack();

        tracing::debug!(
            path = %file.display(),
            lines = program.lines.len(),
            labels = program.labels.len(),
            words = program.words.len(),
            "assembled program"
        );
        Ok(program)
    }

    /// Collects label definitions and encodes every instruction line.
    fn scan(&mut self, isa: &Isa, diagnostics: &mut Diagnostics) -> Result<(), BuildError> {
        let mut pending = Vec::<&'a str>::new();

        for line in &self.lines {
            let kind = match line.classify() {
                Ok(Some(kind)) => kind,
                Ok(None) => continue,
                Err(e) => {
                    diagnostics.report(line, e)?;
                    continue;
                }
            };

            match kind {
                LineKind::Label => {
                    let name = line.label();
                    if self.labels.contains_key(name) || pending.contains(&name) {
                        diagnostics.report(
                            line,
                            AsmError::DuplicateLabel {
                                name: name.to_owned(),
                            },
                        )?;
                    } else {
                        pending.push(name);
                    }
                }
                LineKind::Instruction => {
                    let (opcode, operands) = line.instruction();
                    let encoded = isa
                        .match_instruction(opcode, &operands)
                        .and_then(|instr| encode(isa, instr, &operands));

                    let Encoded {
                        fields,
                        label_field,
                    } = match encoded {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            diagnostics.report(line, e)?;
                            continue;
                        }
                    };

                    let index = self.instructions.len();
                    let label = pending.first().copied();
                    for name in pending.drain(..) {
                        tracing::trace!(name, index, "bound label");
                        self.labels.insert(name, index);
                    }

                    self.instructions.push(Instruction {
                        label,
                        line: *line,
                        fields,
                        label_field,
                    });
                }
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                labels = ?pending,
                "labels at the end of the program are not bound to any instruction"
            );
        }
        Ok(())
    }

    /// Replaces label placeholders with word-aligned byte offsets.
    ///
    /// Already resolved fields are left untouched, so running it again is a no-op.
    fn resolve_labels(&mut self, diagnostics: &mut Diagnostics) -> Result<(), BuildError> {
        for instr in &mut self.instructions {
            let Some(LabelField { field, token }) = instr.label_field else {
                continue;
            };
            let field = &mut instr.fields[field];
            let FieldValue::Label(name) = field.value else {
                continue;
            };

            let Some(&index) = self.labels.get(name) else {
                diagnostics.report(
                    &instr.line,
                    AsmError::UndefinedLabel {
                        name: name.to_owned(),
                        token,
                    },
                )?;
                continue;
            };

            let offset = index as u64 * WORD_BYTES as u64;
            if offset >> field.width != 0 {
                diagnostics.report(
                    &instr.line,
                    AsmError::LabelOutOfRange {
                        name: name.to_owned(),
                        offset,
                        width: field.width,
                        token,
                    },
                )?;
                continue;
            }
            field.value = FieldValue::Value(offset as u32);
        }
        Ok(())
    }

    fn pack(&mut self) {
        self.words = self
            .instructions
            .iter()
            .map(|instr| pack(&instr.fields))
            .collect();
        self.words.push(END_OF_PROGRAM);
    }

    /// Non-blank source lines.
    pub fn lines(&self) -> &[SourceLine<'a>] {
        &self.lines
    }

    pub fn instructions(&self) -> &[Instruction<'a>] {
        &self.instructions
    }

    /// Index of the instruction a label is bound to.
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = (&'a str, usize)> + '_ {
        self.labels.iter().map(|(name, index)| (*name, *index))
    }

    /// Output words, terminated by [`END_OF_PROGRAM`].
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Output words as little-endian bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn isa() -> Isa {
        Isa::from_value(&json!({
            "registers": ["R0", "R1", "R2", "R3"],
            "flags": [{ "flag": "Z", "name": "zero" }],
            "instructions": [
                { "name": "HALT", "desc": "stop the core" },
                { "name": "ADD", "desc": "add", "ops": ["REG", "REG"], "flags": ["Z"] },
                { "name": "LDI", "desc": "load immediate", "ops": ["REG", "IMM16"] },
                { "name": "JMP", "desc": "jump", "ops": ["LAB"] },
                { "name": "JMP", "desc": "jump absolute", "ops": ["IMM24"] },
            ],
            "pipes": [{
                "name": "vector",
                "prefix": "VEC",
                "instructions": [{ "name": "ADD", "desc": "vector add", "ops": ["REG", "REG"] }],
            }],
        }))
        .unwrap()
    }

    fn build<'a>(isa: &Isa, text: &'a str) -> Result<Program<'a>, BuildError> {
        Program::build(isa, Path::new("test.vasm"), text)
    }

    #[test]
    fn labels_resolve_to_byte_offsets() -> anyhow::Result<()> {
        let isa = isa();
        let program = build(
            &isa,
            "START:\n    LDI R0 10\nLOOP:\n    ADD R0 R1\n    JMP LOOP\n    JMP START\nEND:\n    HALT\n",
        )?;

        assert_eq!(program.label("START"), Some(0));
        assert_eq!(program.label("LOOP"), Some(1));
        assert_eq!(program.label("END"), Some(4));
        assert_eq!(
            program.words(),
            [
                0x0200000a,
                0x01000100,
                0x03000004,
                0x03000000,
                0x00000000,
                END_OF_PROGRAM
            ]
        );
        assert_eq!(program.instructions()[1].label, Some("LOOP"));
        assert_eq!(program.instructions()[2].label, None);
        Ok(())
    }

    #[test]
    fn forward_references() -> anyhow::Result<()> {
        let isa = isa();
        let program = build(&isa, "    JMP DONE\n    HALT\nDONE:\n    P.VEC.ADD R2 R3\n")?;
        assert_eq!(program.words(), [0x03000008, 0, 0x80020300, END_OF_PROGRAM]);
        Ok(())
    }

    #[test]
    fn consecutive_labels_share_instruction() -> anyhow::Result<()> {
        let isa = isa();
        let program = build(&isa, "A:\nB:\n    HALT\n    JMP B\n")?;
        assert_eq!(program.label("A"), Some(0));
        assert_eq!(program.label("B"), Some(0));
        assert_eq!(program.instructions()[0].label, Some("A"));
        Ok(())
    }

    #[test]
    fn resolving_twice_is_noop() -> anyhow::Result<()> {
        let isa = isa();
        let mut program = build(&isa, "TOP:\n    JMP TOP\n    JMP END\nEND:\n    HALT\n")?;
        let before = program.instructions.clone();

        let mut diagnostics = Diagnostics::default();
        program.resolve_labels(&mut diagnostics)?;
        assert!(diagnostics.items.is_empty());

        for (a, b) in before.iter().zip(program.instructions()) {
            assert_eq!(a.fields, b.fields);
            assert!(b
                .fields
                .iter()
                .all(|field| matches!(field.value, FieldValue::Value(_))));
        }
        Ok(())
    }

    #[test]
    fn undefined_label() {
        let isa = isa();
        let err = build(&isa, "START:\n    JMP FOO\n").unwrap_err();
        assert!(matches!(err, BuildError::CompletedWithErrors { .. }));

        let [diagnostic] = err.diagnostics() else {
            panic!("expected exactly one diagnostic: {err:?}");
        };
        assert_eq!(
            diagnostic.error,
            AsmError::UndefinedLabel {
                name: "FOO".to_owned(),
                token: 1
            }
        );
        assert_eq!(diagnostic.line, 1);
        assert_eq!(diagnostic.column, 8);
    }

    #[test]
    fn duplicate_label() {
        let isa = isa();
        let err = build(&isa, "A:\n    HALT\nA:\n    HALT\n").unwrap_err();
        let [diagnostic] = err.diagnostics() else {
            panic!("expected exactly one diagnostic: {err:?}");
        };
        assert_eq!(
            diagnostic.error,
            AsmError::DuplicateLabel {
                name: "A".to_owned()
            }
        );
        assert_eq!(diagnostic.line, 2);
    }

    #[test]
    fn collects_line_errors() {
        let isa = isa();
        let err = build(
            &isa,
            "1ABC:\n  HALT\n    MUL R0 R1\n    LDI R0 65536\n    ADD R0 R1\n",
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::CompletedWithErrors { .. }));

        let errors = err
            .diagnostics()
            .iter()
            .map(|diag| (diag.line, diag.column))
            .collect::<Vec<_>>();
        assert_eq!(errors, [(0, 0), (1, 0), (2, 4), (3, 11)]);
    }

    #[test]
    fn aborts_after_max_errors() {
        let isa = isa();
        let text = "    NOPE\n".repeat(6) + "    JMP MISSING\n";
        let err = build(&isa, &text).unwrap_err();

        assert!(matches!(err, BuildError::TooManyErrors { .. }));
        assert_eq!(err.to_string(), "Reached max error count, exiting.");
        assert_eq!(err.diagnostics().len(), MAX_ERRORS + 1);
        assert!(err
            .diagnostics()
            .iter()
            .all(|diag| matches!(diag.error, AsmError::UnknownOpcode { .. })));
    }

    #[test]
    fn five_errors_reach_resolution() {
        let isa = isa();
        let text = "    NOPE\n".repeat(5) + "    JMP MISSING\n";
        let err = build(&isa, &text).unwrap_err();

        assert!(matches!(err, BuildError::TooManyErrors { .. }));
        assert!(matches!(
            err.diagnostics().last().map(|diag| &diag.error),
            Some(AsmError::UndefinedLabel { .. })
        ));
    }

    #[test]
    fn little_endian_output() -> anyhow::Result<()> {
        let isa = isa();
        let program = build(&isa, "    LDI R1 4660\n")?;
        assert_eq!(program.words(), [0x02011234, END_OF_PROGRAM]);
        assert_eq!(hex::encode(program.to_bytes()), "34120102ffffffff");
        Ok(())
    }

    #[test]
    fn mismatch_message() {
        let isa = isa();
        let err = build(&isa, "    JMP R0\n").unwrap_err();
        assert_eq!(
            err.diagnostics()[0].to_string(),
            "test.vasm:1     JMP R0\n\
            \x20                   ^ Operand types do not match expected format for opcode JMP.\n\
            Got: [REG]. Expected [LAB] or [IMM24]"
        );
    }
}
