use crate::asm::AsmError;
use crate::isa::{InstructionDef, Isa, OperandKind, OPCODE_BITS, WORD_BITS};
use crate::util::{fit_uint, parse_nat};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Value(u32),
    /// Label reference which is patched to a byte offset once all labels are known.
    Label(&'a str),
}

/// One bit field of an instruction word, MSB first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Field<'a> {
    pub value: FieldValue<'a>,
    pub width: u8,
}

impl<'a> Field<'a> {
    pub const fn uint(value: u32, width: u8) -> Self {
        Self {
            value: FieldValue::Value(value),
            width,
        }
    }

    pub const fn label(name: &'a str) -> Self {
        Self {
            value: FieldValue::Label(name),
            width: OperandKind::Label.width(),
        }
    }
}

/// Location of the label operand inside an encoded instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LabelField {
    /// Index into the field list.
    pub field: usize,
    /// Source token the label came from.
    pub token: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded<'a> {
    pub fields: Vec<Field<'a>>,
    pub label_field: Option<LabelField>,
}

/// Encodes a matched instruction into its bit fields.
///
/// `operands` must be the tokens the instruction was matched against.
pub fn encode<'a>(
    isa: &Isa,
    instr: &InstructionDef,
    operands: &[&'a str],
) -> Result<Encoded<'a>, AsmError> {
    assert_eq!(
        instr.operands().len(),
        operands.len(),
        "instruction `{}` was matched with a wrong operand count",
        instr.name()
    );

    let mut fields = Vec::with_capacity(operands.len() + 2);
    let mut label_field = None;

    fields.push(Field::uint(instr.opcode() as u32, OPCODE_BITS));

    for (i, (kind, &token)) in instr.operands().iter().zip(operands).enumerate() {
        let field = match kind {
            OperandKind::Register => {
                let Some(reg) = isa.register_encoding(token) else {
                    panic!("operand `{token}` was matched as a register but is not one");
                };
                Field::uint(reg as u32, kind.width())
            }
            OperandKind::Label => {
                label_field = Some(LabelField {
                    field: fields.len(),
                    token: i + 1,
                });
                Field::label(token)
            }
            OperandKind::Immediate16 | OperandKind::Immediate24 => {
                let Some(int) = parse_nat(token) else {
                    panic!("operand `{token}` was matched as an immediate but is not a literal");
                };
                match fit_uint(&int, kind.width()) {
                    Some(value) => Field::uint(value, kind.width()),
                    None => {
                        return Err(AsmError::ImmediateTooLarge {
                            value: token.to_owned(),
                            width: kind.width(),
                            token: i + 1,
                        })
                    }
                }
            }
        };
        fields.push(field);
    }

    let padding = instr.padding_bits();
    if padding > 0 {
        fields.push(Field::uint(0, padding));
    }

    let total = fields.iter().map(|field| field.width as u32).sum::<u32>();
    assert_eq!(
        total,
        WORD_BITS,
        "instruction `{}` encodes into {total} bits",
        instr.name()
    );

    Ok(Encoded {
        fields,
        label_field,
    })
}

/// Packs resolved fields into one word, first field in the most significant bits.
pub fn pack(fields: &[Field<'_>]) -> u32 {
    let mut packed = 0u64;
    let mut offset = 0u32;
    for field in fields.iter().rev() {
        let FieldValue::Value(value) = field.value else {
            panic!("unresolved label field at packing time: {:?}", field.value);
        };
        assert!(
            (value as u64) >> field.width == 0,
            "field value {value} does not fit into {} bits",
            field.width
        );
        packed |= (value as u64) << offset;
        offset += field.width as u32;
    }
    assert_eq!(offset, WORD_BITS, "fields take {offset} bits");
    packed as u32
}
