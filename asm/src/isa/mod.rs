//! Instruction catalog built from an ISA description.

use std::ops::Range;

use ahash::HashMap;
use serde_json::Value;

pub use self::config::{FlagConfig, InstructionConfig, IsaConfig, OperandConfig, PipeConfig};
pub use self::matcher::classify;

mod config;
mod matcher;

/// Bit width of one machine word.
pub const WORD_BITS: u32 = 32;
/// Bit width of the opcode field.
pub const OPCODE_BITS: u8 = 8;
/// First opcode available to pipe extensions. Base opcodes stay below it.
pub const PIPE_OPCODE_BASE: u16 = 128;
/// Size of the whole opcode space.
pub const OPCODE_SPACE: u16 = 1 << OPCODE_BITS;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed catalog: {reason}")]
pub struct MalformedCatalog {
    pub reason: String,
}

impl MalformedCatalog {
    pub(crate) fn new<T: Into<String>>(reason: T) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Operand kind of a stored instruction definition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Register,
    Label,
    Immediate16,
    Immediate24,
}

impl OperandKind {
    /// Width of the encoded field in bits.
    pub const fn width(self) -> u8 {
        match self {
            Self::Register => 8,
            Self::Label => 24,
            Self::Immediate16 => 16,
            Self::Immediate24 => 24,
        }
    }

    /// Whether a source token of kind `token` can fill this operand.
    ///
    /// Immediate width is not known at this point, so any immediate
    /// token matches both immediate kinds.
    pub const fn accepts(self, token: TokenKind) -> bool {
        matches!(
            (self, token),
            (Self::Register, TokenKind::Register)
                | (Self::Label, TokenKind::Label)
                | (Self::Immediate16 | Self::Immediate24, TokenKind::Immediate)
        )
    }

    fn short_code(self) -> &'static str {
        match self {
            Self::Register => "R",
            Self::Label => "L",
            Self::Immediate16 => "I16",
            Self::Immediate24 => "I24",
        }
    }
}

impl std::fmt::Display for OperandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Register => "REG",
            Self::Label => "LAB",
            Self::Immediate16 => "IMM16",
            Self::Immediate24 => "IMM24",
        })
    }
}

/// Kind of a source operand token, as seen by the matcher.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Register,
    Label,
    Immediate,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Register => "REG",
            Self::Label => "LAB",
            Self::Immediate => "IMM",
        })
    }
}

/// Formats operand kinds as `[REG,IMM16]`.
pub(crate) struct KindList<'a, T>(pub &'a [T]);

impl<T: std::fmt::Display> std::fmt::Display for KindList<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, kind) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            std::fmt::Display::fmt(kind, f)?;
        }
        f.write_str("]")
    }
}

/// One instruction form. Equality only looks at the name and operand kinds.
#[derive(Debug, Clone)]
pub struct InstructionDef {
    name: String,
    operands: Vec<OperandKind>,
    flags: Vec<String>,
    description: String,
    opcode: u8,
}

impl InstructionDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operands(&self) -> &[OperandKind] {
        &self.operands
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Identifier-safe name which includes the operand layout, e.g. `ADD_R_R`.
    pub fn internal_name(&self) -> String {
        let mut result = self.name.replace('.', "_");
        for operand in &self.operands {
            result.push('_');
            result.push_str(operand.short_code());
        }
        result
    }

    /// Trailing zero bits appended after the operands.
    pub fn padding_bits(&self) -> u8 {
        padding_bits(&self.operands)
    }

    /// Index of the label operand, if any.
    pub fn label_operand(&self) -> Option<usize> {
        self.operands.iter().position(|op| *op == OperandKind::Label)
    }
}

impl PartialEq for InstructionDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.operands == other.operands
    }
}

impl Eq for InstructionDef {}

fn padding_bits(operands: &[OperandKind]) -> u8 {
    match operands {
        [] => 24,
        [OperandKind::Register, OperandKind::Register] => 8,
        _ => 0,
    }
}

fn layout_bits(operands: &[OperandKind]) -> u32 {
    let fields: u32 = operands.iter().map(|op| op.width() as u32).sum();
    OPCODE_BITS as u32 + fields + padding_bits(operands) as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub flag: String,
    pub name: String,
}

/// Named extension block with its own opcode range.
#[derive(Debug, Clone)]
pub struct Pipe {
    name: String,
    prefix: String,
    opcodes: Range<u16>,
    instructions: Vec<InstructionDef>,
}

impl Pipe {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn opcodes(&self) -> Range<u16> {
        self.opcodes.clone()
    }

    pub fn instructions(&self) -> &[InstructionDef] {
        &self.instructions
    }
}

/// Validated, immutable instruction catalog.
#[derive(Debug, Clone)]
pub struct Isa {
    registers: Vec<String>,
    register_index: HashMap<String, u8>,
    flags: Vec<Flag>,
    instructions: Vec<InstructionDef>,
    pipes: Vec<Pipe>,
}

impl Isa {
    /// Checks the shape of a configuration tree and builds the catalog from it.
    pub fn from_value(data: &Value) -> Result<Self, MalformedCatalog> {
        Self::from_config(IsaConfig::from_value(data)?)
    }

    pub fn from_config(config: IsaConfig) -> Result<Self, MalformedCatalog> {
        if config.registers.len() > OPCODE_SPACE as usize {
            return Err(MalformedCatalog::new(format!(
                "Too many registers ({}), at most {OPCODE_SPACE} can be encoded",
                config.registers.len()
            )));
        }

        let mut register_index = HashMap::default();
        for (i, reg) in config.registers.iter().enumerate() {
            if register_index.insert(reg.clone(), i as u8).is_some() {
                return Err(MalformedCatalog::new(format!(
                    "Register list entry {i} is duplicated."
                )));
            }
        }

        let mut flags = Vec::<Flag>::with_capacity(config.flags.len());
        for (i, FlagConfig { flag, name }) in config.flags.into_iter().enumerate() {
            if flags.iter().any(|known| known.flag == flag) {
                return Err(MalformedCatalog::new(format!(
                    "Flag list entry {i} is duplicated."
                )));
            }
            flags.push(Flag { flag, name });
        }

        let instructions = build_block(
            config.instructions,
            &flags,
            "",
            "Instruction list entry",
            0,
            PIPE_OPCODE_BASE,
        )?;

        let mut next_opcode = PIPE_OPCODE_BASE;
        let mut pipes = Vec::<Pipe>::with_capacity(config.pipes.len());
        for (i, pipe) in config.pipes.into_iter().enumerate() {
            if pipe.prefix.is_empty() {
                return Err(MalformedCatalog::new(format!(
                    "Pipe list entry {i} has an empty prefix."
                )));
            }
            if pipes
                .iter()
                .any(|known| known.name == pipe.name || known.prefix == pipe.prefix)
            {
                return Err(MalformedCatalog::new(format!(
                    "Pipe list entry {i} reuses the name or prefix of an earlier pipe."
                )));
            }

            let start = next_opcode;
            let instructions = build_block(
                pipe.instructions,
                &flags,
                &format!("P.{}.", pipe.prefix),
                &format!("Pipe '{}', instruction list entry", pipe.name),
                start,
                OPCODE_SPACE,
            )?;
            next_opcode = start + instructions.len() as u16;

            pipes.push(Pipe {
                name: pipe.name,
                prefix: pipe.prefix,
                opcodes: start..next_opcode,
                instructions,
            });
        }

        tracing::debug!(
            registers = config.registers.len(),
            flags = flags.len(),
            base = instructions.len(),
            pipes = pipes.len(),
            next_opcode,
            "built instruction catalog"
        );

        Ok(Self {
            registers: config.registers,
            register_index,
            flags,
            instructions,
            pipes,
        })
    }

    pub fn registers(&self) -> &[String] {
        &self.registers
    }

    /// Encoding of a register, which is its position in the register table.
    pub fn register_encoding(&self, name: &str) -> Option<u8> {
        self.register_index.get(name).copied()
    }

    pub fn is_register(&self, name: &str) -> bool {
        self.register_index.contains_key(name)
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    /// Base ISA instructions, without pipe extensions.
    pub fn base_instructions(&self) -> &[InstructionDef] {
        &self.instructions
    }

    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    /// All instructions, base ISA first and then each pipe in declaration order.
    pub fn instructions(&self) -> impl Iterator<Item = &InstructionDef> + '_ {
        self.instructions
            .iter()
            .chain(self.pipes.iter().flat_map(|pipe| pipe.instructions.iter()))
    }
}

/// Validates one instruction list and assigns opcodes from `first_opcode`.
fn build_block(
    items: Vec<InstructionConfig>,
    flags: &[Flag],
    prefix: &str,
    context: &str,
    first_opcode: u16,
    opcode_limit: u16,
) -> Result<Vec<InstructionDef>, MalformedCatalog> {
    let mut result = Vec::<InstructionDef>::with_capacity(items.len());
    let mut next_opcode = first_opcode;

    for (i, item) in items.into_iter().enumerate() {
        let mut operands = Vec::with_capacity(item.ops.len());
        for op in &item.ops {
            operands.push(match op {
                OperandConfig::Reg => OperandKind::Register,
                OperandConfig::Lab => OperandKind::Label,
                OperandConfig::Imm16 => OperandKind::Immediate16,
                OperandConfig::Imm24 => OperandKind::Immediate24,
                OperandConfig::Imm => {
                    return Err(MalformedCatalog::new(format!(
                        "{context} {i} specifies an IMM operand which is not legal."
                    )))
                }
            });
        }

        if operands
            .iter()
            .filter(|op| **op == OperandKind::Label)
            .count()
            > 1
        {
            return Err(MalformedCatalog::new(format!(
                "{context} {i} has more than one LAB operand."
            )));
        }

        let bits = layout_bits(&operands);
        if bits != WORD_BITS {
            return Err(MalformedCatalog::new(format!(
                "{context} {i} operands {} take {bits} bits, expected a {WORD_BITS}-bit word.",
                KindList(&operands)
            )));
        }

        for (flag_ind, flag) in item.flags.iter().enumerate() {
            if !flags.iter().any(|known| &known.flag == flag) {
                return Err(MalformedCatalog::new(format!(
                    "{context} {i} uses unknown flag {flag}."
                )));
            }
            if item.flags[..flag_ind].contains(flag) {
                return Err(MalformedCatalog::new(format!(
                    "{context} {i} uses flag {flag} more than once."
                )));
            }
        }

        if next_opcode >= opcode_limit {
            return Err(MalformedCatalog::new(format!(
                "{context} {i} does not fit into the opcode range ending at {opcode_limit}."
            )));
        }

        let instr = InstructionDef {
            name: format!("{prefix}{}", item.name),
            operands,
            flags: item.flags,
            description: item.desc,
            opcode: next_opcode as u8,
        };
        if result.contains(&instr) {
            return Err(MalformedCatalog::new(format!(
                "{context} {i} is a duplicated definition."
            )));
        }

        result.push(instr);
        next_opcode += 1;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reason(data: Value) -> String {
        Isa::from_value(&data).unwrap_err().reason
    }

    fn base(instructions: Value) -> Value {
        json!({
            "registers": ["R0", "R1", "SP"],
            "flags": [{ "flag": "Z", "name": "zero" }, { "flag": "C", "name": "carry" }],
            "instructions": instructions,
        })
    }

    #[test]
    fn sequential_opcodes() -> anyhow::Result<()> {
        let isa = Isa::from_value(&base(json!([
            { "name": "NOP", "desc": "no operation" },
            { "name": "ADD", "desc": "add", "ops": ["REG", "REG"], "flags": ["Z", "C"] },
            { "name": "ADD", "desc": "add imm", "ops": ["REG", "IMM16"] },
            { "name": "JMP", "desc": "jump", "ops": ["LAB"] },
        ])))?;

        let opcodes = isa
            .instructions()
            .map(|instr| (instr.name(), instr.opcode()))
            .collect::<Vec<_>>();
        assert_eq!(opcodes, [("NOP", 0), ("ADD", 1), ("ADD", 2), ("JMP", 3)]);

        assert_eq!(isa.register_encoding("SP"), Some(2));
        assert_eq!(isa.register_encoding("R7"), None);
        assert_eq!(isa.flags()[1].name, "carry");

        let add = &isa.base_instructions()[1];
        assert_eq!(add.flags(), ["Z", "C"]);
        assert_eq!(add.description(), "add");
        assert_eq!(add.internal_name(), "ADD_R_R");
        assert_eq!(add.padding_bits(), 8);
        assert_eq!(isa.base_instructions()[0].padding_bits(), 24);
        assert_eq!(isa.base_instructions()[3].label_operand(), Some(0));
        Ok(())
    }

    #[test]
    fn pipes_are_namespaced() -> anyhow::Result<()> {
        let mut data = base(json!([
            { "name": "MUL", "desc": "scalar mul", "ops": ["REG", "REG"] },
        ]));
        data["pipes"] = json!([
            {
                "name": "vector",
                "prefix": "VEC",
                "instructions": [
                    { "name": "MUL", "desc": "vector mul", "ops": ["REG", "REG"] },
                    { "name": "LD", "desc": "vector load", "ops": ["IMM24"] },
                ],
            },
            {
                "name": "matrix",
                "prefix": "MAT",
                "instructions": [{ "name": "CLR", "desc": "clear" }],
            },
        ]);
        let isa = Isa::from_value(&data)?;

        let names = isa
            .instructions()
            .map(|instr| (instr.name(), instr.opcode()))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                ("MUL", 0),
                ("P.VEC.MUL", 128),
                ("P.VEC.LD", 129),
                ("P.MAT.CLR", 130)
            ]
        );
        assert_eq!(isa.pipes()[0].opcodes(), 128..130);
        assert_eq!(isa.pipes()[1].opcodes(), 130..131);
        assert_eq!(isa.pipes()[0].instructions()[0].internal_name(), "P_VEC_MUL_R_R");
        Ok(())
    }

    #[test]
    fn rejects_semantic_errors() {
        assert_eq!(
            reason(json!({ "registers": ["R0", "R0"], "flags": [], "instructions": [] })),
            "Register list entry 1 is duplicated."
        );
        assert_eq!(
            reason(json!({
                "registers": [],
                "flags": [{ "flag": "Z", "name": "a" }, { "flag": "Z", "name": "b" }],
                "instructions": [],
            })),
            "Flag list entry 1 is duplicated."
        );
        assert_eq!(
            reason(base(json!([{ "name": "LDI", "desc": "", "ops": ["IMM"] }]))),
            "Instruction list entry 0 specifies an IMM operand which is not legal."
        );
        assert_eq!(
            reason(base(json!([{ "name": "NOP", "desc": "", "flags": ["N"] }]))),
            "Instruction list entry 0 uses unknown flag N."
        );
        assert_eq!(
            reason(base(json!([
                { "name": "ADD", "desc": "", "ops": ["REG", "REG"] },
                { "name": "ADD", "desc": "again", "ops": ["REG", "REG"], "flags": ["Z"] },
            ]))),
            "Instruction list entry 1 is a duplicated definition."
        );
    }

    #[test]
    fn rejects_bad_layouts() {
        assert_eq!(
            reason(base(json!([{ "name": "INC", "desc": "", "ops": ["REG"] }]))),
            "Instruction list entry 0 operands [REG] take 16 bits, expected a 32-bit word."
        );
        assert!(reason(base(json!([
            { "name": "BR", "desc": "", "ops": ["REG", "LAB"] },
        ])))
        .contains("take 40 bits"));
        assert!(reason(base(json!([
            { "name": "SWAP", "desc": "", "ops": ["LAB", "LAB"] },
        ])))
        .contains("more than one LAB"));
    }

    #[test]
    fn opcode_space_is_bounded() {
        let too_many = (0..129)
            .map(|i| json!({ "name": format!("OP{i}"), "desc": "" }))
            .collect::<Vec<_>>();
        assert!(reason(base(Value::Array(too_many))).contains("opcode range ending at 128"));

        let mut data = base(json!([]));
        data["pipes"] = json!([
            { "name": "a", "prefix": "A", "instructions": [] },
            { "name": "b", "prefix": "A", "instructions": [] },
        ]);
        assert_eq!(
            reason(data),
            "Pipe list entry 1 reuses the name or prefix of an earlier pipe."
        );

        let big = (0..129)
            .map(|i| json!({ "name": format!("OP{i}"), "desc": "" }))
            .collect::<Vec<_>>();
        let mut data = base(json!([]));
        data["pipes"] = json!([{ "name": "big", "prefix": "BIG", "instructions": big }]);
        assert!(reason(data).contains("opcode range ending at 256"));
    }

    #[test]
    fn operand_compatibility() {
        assert!(OperandKind::Register.accepts(TokenKind::Register));
        assert!(OperandKind::Immediate16.accepts(TokenKind::Immediate));
        assert!(OperandKind::Immediate24.accepts(TokenKind::Immediate));
        assert!(!OperandKind::Label.accepts(TokenKind::Immediate));
        assert!(!OperandKind::Register.accepts(TokenKind::Label));
    }
}
