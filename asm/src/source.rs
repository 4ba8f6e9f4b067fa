//! Physical source lines and positional diagnostics.

use std::path::{Path, PathBuf};

use unicode_width::UnicodeWidthStr;

use crate::asm::AsmError;

/// Indentation of instruction lines.
pub const INDENT: &str = "    ";

const COMMENT: char = ';';

/// Position a diagnostic points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// Zero-based character column.
    Column(usize),
    /// Zero-based token of an instruction line: `0` is the mnemonic,
    /// `k` is the `k`-th operand.
    Token(usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineKind {
    Label,
    Instruction,
}

/// One physical line with its comment and trailing whitespace removed.
#[derive(Debug, Clone, Copy)]
pub struct SourceLine<'a> {
    file: &'a Path,
    number: usize,
    text: &'a str,
}

impl<'a> SourceLine<'a> {
    pub fn new(file: &'a Path, number: usize, raw: &'a str) -> Self {
        let code = match raw.split_once(COMMENT) {
            Some((code, _)) => code,
            None => raw,
        };
        Self {
            file,
            number,
            text: code.trim_end(),
        }
    }

    /// Splits `text` into lines, dropping the ones that are blank after stripping.
    pub fn split(file: &'a Path, text: &'a str) -> impl Iterator<Item = SourceLine<'a>> + 'a {
        text.lines()
            .enumerate()
            .map(move |(number, raw)| Self::new(file, number, raw))
            .filter(|line| !line.is_blank())
    }

    pub fn file(&self) -> &'a Path {
        self.file
    }

    /// Zero-based line number.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }

    /// Classifies the line by its indentation and validates label syntax.
    ///
    /// Blank lines have no kind. Instruction bodies are left to the matcher.
    pub fn classify(&self) -> Result<Option<LineKind>, AsmError> {
        if self.is_blank() {
            return Ok(None);
        }

        let indent = self
            .text
            .chars()
            .take_while(|c| c.is_whitespace())
            .count();

        match indent {
            0 => self.validate_label().map(|_| Some(LineKind::Label)),
            _ if indent == INDENT.len() && self.text.starts_with(INDENT) => {
                Ok(Some(LineKind::Instruction))
            }
            _ => Err(AsmError::BadIndentation),
        }
    }

    fn validate_label(&self) -> Result<(), AsmError> {
        let chars = self.text.chars().collect::<Vec<_>>();
        let last = chars.len() - 1;

        if chars[0].is_ascii_digit() {
            return Err(AsmError::LabelStartsWithDigit);
        }
        if chars[last] != ':' {
            return Err(AsmError::LabelMissingColon { column: last });
        }
        if last == 0 {
            return Err(AsmError::EmptyLabel);
        }
        for (column, &ch) in chars[..last].iter().enumerate() {
            if !(ch.is_ascii_uppercase() || ch.is_ascii_digit()) {
                return Err(AsmError::LabelInvalidCharacter { column, ch });
            }
        }
        Ok(())
    }

    /// Label name without the trailing colon.
    pub fn label(&self) -> &'a str {
        self.text.strip_suffix(':').unwrap_or(self.text)
    }

    /// Mnemonic and operand tokens of an instruction line.
    pub fn instruction(&self) -> (&'a str, Vec<&'a str>) {
        let mut tokens = self.text.split_whitespace();
        let opcode = tokens.next().unwrap_or_default();
        (opcode, tokens.collect())
    }

    /// Translates an anchor into a character column.
    ///
    /// Token anchors past the last token point at the end of the line.
    pub fn column(&self, anchor: Anchor) -> usize {
        let token = match anchor {
            Anchor::Column(column) => return column,
            Anchor::Token(token) => token,
        };

        let mut seen = 0;
        let mut after_space = true;
        for (column, ch) in self.text.chars().enumerate().skip(INDENT.len()) {
            let is_space = ch.is_whitespace();
            if after_space && !is_space {
                if seen == token {
                    return column;
                }
                seen += 1;
            }
            after_space = is_space;
        }
        self.text.chars().count()
    }

    pub fn diagnostic(&self, error: AsmError) -> Diagnostic {
        Diagnostic {
            file: self.file.to_path_buf(),
            line: self.number,
            source: self.text.to_owned(),
            column: self.column(error.anchor()),
            error,
        }
    }
}

/// Source error bound to the line it was found on.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub file: PathBuf,
    /// Zero-based line number.
    pub line: usize,
    pub source: String,
    pub column: usize,
    pub error: AsmError,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = format!("{}:{} ", self.file.display(), self.line + 1);
        let prefix = match self.source.char_indices().nth(self.column) {
            Some((offset, _)) => &self.source[..offset],
            None => self.source.as_str(),
        };
        let offset = UnicodeWidthStr::width(location.as_str())
            + UnicodeWidthStr::width(prefix)
            + self.column.saturating_sub(prefix.chars().count());

        writeln!(f, "{location}{}", self.source)?;
        write!(f, "{:offset$}^ {}", "", self.error)
    }
}

impl std::error::Error for Diagnostic {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
