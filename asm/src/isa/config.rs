//! Shape checking of the ISA configuration tree.
//!
//! The tree is only walked here. Everything past [`IsaConfig::from_value`]
//! works with the typed representation, so loosely typed data never reaches
//! the catalog builder or the encoder.

use serde_json::{Map, Value};

use super::MalformedCatalog;

const INSTRUCTION_KEYS: &[&str] = &["name", "ops", "flags", "desc"];
const PIPE_KEYS: &[&str] = &["name", "prefix", "instructions"];

#[derive(Debug, Clone)]
pub struct IsaConfig {
    pub registers: Vec<String>,
    pub flags: Vec<FlagConfig>,
    pub instructions: Vec<InstructionConfig>,
    pub pipes: Vec<PipeConfig>,
}

#[derive(Debug, Clone)]
pub struct FlagConfig {
    pub flag: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct InstructionConfig {
    pub name: String,
    pub desc: String,
    pub ops: Vec<OperandConfig>,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub name: String,
    pub prefix: String,
    pub instructions: Vec<InstructionConfig>,
}

/// Operand vocabulary accepted by the schema.
///
/// `Imm` is part of the vocabulary only so that the semantic pass can
/// reject it with a precise message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperandConfig {
    Reg,
    Lab,
    Imm,
    Imm16,
    Imm24,
}

impl OperandConfig {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "REG" => Self::Reg,
            "LAB" => Self::Lab,
            "IMM" => Self::Imm,
            "IMM16" => Self::Imm16,
            "IMM24" => Self::Imm24,
            _ => return None,
        })
    }
}

impl IsaConfig {
    pub fn from_value(data: &Value) -> Result<Self, MalformedCatalog> {
        let Some(root) = data.as_object() else {
            return Err(MalformedCatalog::new(format!(
                "Expected top level value to be a map, found {}",
                type_name(data)
            )));
        };

        let instructions = top_level_list(root, "instructions")?;
        let registers = top_level_list(root, "registers")?;
        let flags = top_level_list(root, "flags")?;

        let registers = registers
            .iter()
            .enumerate()
            .map(|(i, reg)| match reg {
                Value::String(reg) => Ok(reg.clone()),
                other => Err(MalformedCatalog::new(format!(
                    "Register list entry {i}. Expected type of entry to be a str, found {}",
                    type_name(other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let flags = flags
            .iter()
            .enumerate()
            .map(|(i, flag)| parse_flag(i, flag))
            .collect::<Result<Vec<_>, _>>()?;

        let instructions = parse_instructions(instructions, "Instruction list entry")?;

        let pipes = match root.get("pipes") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(pipes)) => pipes
                .iter()
                .enumerate()
                .map(|(i, pipe)| parse_pipe(i, pipe))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(MalformedCatalog::new(format!(
                    "Expected value of 'pipes' to be a list, found {}",
                    type_name(other)
                )))
            }
        };

        Ok(Self {
            registers,
            flags,
            instructions,
            pipes,
        })
    }
}

fn top_level_list<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a [Value], MalformedCatalog> {
    match root.get(key) {
        None => Err(MalformedCatalog::new(format!(
            "Could not find top level key '{key}'"
        ))),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(MalformedCatalog::new(format!(
            "Expected value of '{key}' to be a list, found {}",
            type_name(other)
        ))),
    }
}

fn parse_flag(i: usize, value: &Value) -> Result<FlagConfig, MalformedCatalog> {
    let Some(entry) = value.as_object() else {
        return Err(MalformedCatalog::new(format!(
            "Flag list entry {i}. Expected type of entry to be a dict, found {}",
            type_name(value)
        )));
    };
    let context = format!("Flag list entry {i}");
    Ok(FlagConfig {
        flag: required_str(entry, "flag", &context)?,
        name: required_str(entry, "name", &context)?,
    })
}

fn parse_pipe(i: usize, value: &Value) -> Result<PipeConfig, MalformedCatalog> {
    let Some(entry) = value.as_object() else {
        return Err(MalformedCatalog::new(format!(
            "Pipe list entry {i}. Expected type of entry to be a dict, found {}",
            type_name(value)
        )));
    };
    let context = format!("Pipe list entry {i}");
    check_keys(entry, PIPE_KEYS, &context)?;

    let name = required_str(entry, "name", &context)?;
    let prefix = required_str(entry, "prefix", &context)?;
    let instructions = match entry.get("instructions") {
        None => {
            return Err(MalformedCatalog::new(format!(
                "{context}. Missing required key 'instructions'"
            )))
        }
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(MalformedCatalog::new(format!(
                "{context}. Value of instructions must be a list, found {}",
                type_name(other)
            )))
        }
    };
    let instructions =
        parse_instructions(instructions, &format!("Pipe '{name}', instruction list entry"))?;

    Ok(PipeConfig {
        name,
        prefix,
        instructions,
    })
}

fn parse_instructions(
    items: &[Value],
    context: &str,
) -> Result<Vec<InstructionConfig>, MalformedCatalog> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_instruction(item, &format!("{context} {i}")))
        .collect()
}

fn parse_instruction(value: &Value, context: &str) -> Result<InstructionConfig, MalformedCatalog> {
    let Some(entry) = value.as_object() else {
        return Err(MalformedCatalog::new(format!(
            "{context}. Expected type of entry to be a dict, found {}",
            type_name(value)
        )));
    };
    check_keys(entry, INSTRUCTION_KEYS, context)?;

    let name = required_str(entry, "name", context)?;
    let desc = required_str(entry, "desc", context)?;

    let ops = match entry.get("ops") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(ops)) => ops
            .iter()
            .enumerate()
            .map(|(op_ind, op)| {
                op.as_str()
                    .and_then(OperandConfig::from_name)
                    .ok_or_else(|| {
                        MalformedCatalog::new(format!(
                            "{context}, op entry {op_ind}. {op} is not a valid operand type"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(MalformedCatalog::new(format!(
                "{context}. Value of ops must be a list"
            )))
        }
    };

    let flags = match entry.get("flags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(flags)) => flags
            .iter()
            .enumerate()
            .map(|(flag_ind, flag)| {
                flag.as_str().map(str::to_owned).ok_or_else(|| {
                    MalformedCatalog::new(format!(
                        "{context}, flag entry {flag_ind}. Expected a str, found {}",
                        type_name(flag)
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(MalformedCatalog::new(format!(
                "{context}. Value of flags must be a list"
            )))
        }
    };

    Ok(InstructionConfig {
        name,
        desc,
        ops,
        flags,
    })
}

fn check_keys(
    entry: &Map<String, Value>,
    allowed: &[&str],
    context: &str,
) -> Result<(), MalformedCatalog> {
    match entry.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(MalformedCatalog::new(format!(
            "{context}. Found invalid key '{key}'"
        ))),
        None => Ok(()),
    }
}

fn required_str(
    entry: &Map<String, Value>,
    key: &str,
    context: &str,
) -> Result<String, MalformedCatalog> {
    match entry.get(key) {
        None => Err(MalformedCatalog::new(format!(
            "{context}. Missing required key '{key}'"
        ))),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(MalformedCatalog::new(format!(
            "{context}. Expected value of '{key}' to be a str, found {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
