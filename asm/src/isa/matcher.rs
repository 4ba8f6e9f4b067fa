use super::{InstructionDef, Isa, TokenKind};
use crate::asm::AsmError;

/// Determines the kind of a source operand token.
///
/// Registers win over labels, so a register name never classifies as a label
/// even though it has the same shape.
pub fn classify<F>(token: &str, is_register: F) -> Option<TokenKind>
where
    F: FnOnce(&str) -> bool,
{
    if is_register(token) {
        return Some(TokenKind::Register);
    }

    let mut chars = token.chars();
    let first = chars.next()?;
    if first.is_ascii_uppercase()
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Some(TokenKind::Label);
    }

    if token.bytes().all(|b| b.is_ascii_digit()) {
        return Some(TokenKind::Immediate);
    }

    None
}

impl Isa {
    pub fn classify(&self, token: &str) -> Option<TokenKind> {
        classify(token, |token| self.is_register(token))
    }

    /// Resolves the instruction form for `opcode` applied to `operands`.
    ///
    /// Diagnostics are anchored by token index: `0` is the mnemonic and `k` is
    /// the `k`-th operand.
    pub fn match_instruction(
        &self,
        opcode: &str,
        operands: &[&str],
    ) -> Result<&InstructionDef, AsmError> {
        let candidates = self
            .instructions()
            .filter(|instr| instr.name() == opcode)
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Err(AsmError::UnknownOpcode {
                name: opcode.to_owned(),
            });
        }

        let candidates = candidates
            .into_iter()
            .filter(|instr| instr.operands().len() == operands.len())
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Err(AsmError::WrongOperandCount {
                opcode: opcode.to_owned(),
                count: operands.len(),
            });
        }

        let mut found = Vec::with_capacity(operands.len());
        for (i, operand) in operands.iter().enumerate() {
            match self.classify(operand) {
                Some(kind) => found.push(kind),
                None => {
                    return Err(AsmError::UnclassifiableOperand {
                        operand: (*operand).to_owned(),
                        token: i + 1,
                    })
                }
            }
        }

        let matched = candidates.iter().find(|instr| {
            instr
                .operands()
                .iter()
                .zip(&found)
                .all(|(expected, found)| expected.accepts(*found))
        });

        match matched {
            Some(instr) => Ok(*instr),
            None => Err(AsmError::OperandTypeMismatch {
                opcode: opcode.to_owned(),
                found,
                expected: candidates
                    .iter()
                    .map(|instr| instr.operands().to_vec())
                    .collect(),
            }),
        }
    }
}
