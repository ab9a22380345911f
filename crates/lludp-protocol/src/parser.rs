//! Parser for the brace-delimited message template language.
//!
//! ```text
//! version 2.0
//! {
//!     PacketAck Fixed 0xFFFFFFFB NotTrusted Unencoded
//!     {
//!         Packets Variable
//!         { ID U32 }
//!     }
//! }
//! ```
//!
//! Three nesting levels: message header, block header, field line.
//! `//` starts a comment that runs to the end of the line.

use std::collections::HashSet;

use crate::error::TemplateError;
use crate::template::{
    BlockKind, FieldKind, LengthPrefix, MessageNumber, MessageTemplate,
    MessageTemplateBlock, MessageTemplateVariable, MsgDeprecation,
    MsgEncoding, MsgFrequency, MsgTrust,
};

/// Output of a successful parse.
#[derive(Debug)]
pub(crate) struct ParsedTemplates {
    pub version: Option<String>,
    pub messages: Vec<MessageTemplate>,
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Open,
    Close,
    Word(&'a str),
}

struct Tokens<'a> {
    tokens: Vec<(usize, Token<'a>)>,
    pos: usize,
    /// Line of the last token, for errors at end of input.
    last_line: usize,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        let mut tokens = Vec::new();
        let mut last_line = 1;
        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            last_line = line_no;
            let line = match raw_line.find("//") {
                Some(cut) => &raw_line[..cut],
                None => raw_line,
            };
            let mut start: Option<usize> = None;
            for (i, ch) in line.char_indices() {
                let is_brace = ch == '{' || ch == '}';
                if ch.is_whitespace() || is_brace {
                    if let Some(s) = start.take() {
                        tokens.push((line_no, Token::Word(&line[s..i])));
                    }
                    if ch == '{' {
                        tokens.push((line_no, Token::Open));
                    } else if ch == '}' {
                        tokens.push((line_no, Token::Close));
                    }
                } else if start.is_none() {
                    start = Some(i);
                }
            }
            if let Some(s) = start {
                tokens.push((line_no, Token::Word(&line[s..])));
            }
        }
        Self {
            tokens,
            pos: 0,
            last_line,
        }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(l, _)| *l)
            .unwrap_or(self.last_line)
    }

    fn next(&mut self) -> Option<(usize, Token<'a>)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn word(&mut self, what: &str) -> Result<(usize, &'a str), TemplateError> {
        let line = self.line();
        match self.next() {
            Some((line, Token::Word(w))) => Ok((line, w)),
            Some((line, other)) => Err(TemplateError::new(
                line,
                format!("expected {what}, found {other:?}"),
            )),
            None => Err(TemplateError::new(
                line,
                format!("expected {what}, found end of input"),
            )),
        }
    }

    fn expect(&mut self, want: Token<'static>) -> Result<(), TemplateError> {
        let line = self.line();
        match self.next() {
            Some((_, tok)) if tok == want => Ok(()),
            Some((line, other)) => Err(TemplateError::new(
                line,
                format!("expected {want:?}, found {other:?}"),
            )),
            None => Err(TemplateError::new(
                line,
                format!("expected {want:?}, found end of input"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

pub(crate) fn parse(text: &str) -> Result<ParsedTemplates, TemplateError> {
    let mut tokens = Tokens::new(text);
    let mut version = None;
    let mut messages: Vec<MessageTemplate> = Vec::new();
    let mut names = HashSet::new();
    let mut numbers = HashSet::new();

    while let Some((line, token)) = tokens.next() {
        match token {
            Token::Word("version") => {
                let (_, v) = tokens.word("version number")?;
                version = Some(v.to_string());
            }
            Token::Open => {
                let message = parse_message(&mut tokens, line)?;
                if !names.insert(message.name.clone()) {
                    return Err(TemplateError::new(
                        line,
                        format!("duplicate message name {}", message.name),
                    ));
                }
                if !numbers.insert(message.number) {
                    return Err(TemplateError::new(
                        line,
                        format!(
                            "{} reuses message number {}",
                            message.name, message.number
                        ),
                    ));
                }
                messages.push(message);
            }
            other => {
                return Err(TemplateError::new(
                    line,
                    format!("unexpected {other:?} at top level"),
                ));
            }
        }
    }

    Ok(ParsedTemplates { version, messages })
}

fn parse_message(
    tokens: &mut Tokens<'_>,
    open_line: usize,
) -> Result<MessageTemplate, TemplateError> {
    let (_, name) = tokens.word("message name")?;
    let (freq_line, freq) = tokens.word("frequency")?;
    let frequency = match freq {
        "High" => MsgFrequency::High,
        "Medium" => MsgFrequency::Medium,
        "Low" => MsgFrequency::Low,
        "Fixed" => MsgFrequency::Fixed,
        other => {
            return Err(TemplateError::new(
                freq_line,
                format!("unknown frequency {other}"),
            ));
        }
    };
    let (num_line, num) = tokens.word("message number")?;
    let id = parse_message_id(frequency, num)
        .map_err(|msg| TemplateError::new(num_line, msg))?;

    let (trust_line, trust) = tokens.word("trust")?;
    let trust = match trust {
        "Trusted" => MsgTrust::Trusted,
        "NotTrusted" => MsgTrust::NotTrusted,
        other => {
            return Err(TemplateError::new(
                trust_line,
                format!("unknown trust {other}"),
            ));
        }
    };

    let (enc_line, encoding) = tokens.word("encoding")?;
    let encoding = match encoding {
        "Unencoded" => MsgEncoding::Unencoded,
        "Zerocoded" => MsgEncoding::Zerocoded,
        other => {
            return Err(TemplateError::new(
                enc_line,
                format!("unknown encoding {other}"),
            ));
        }
    };

    let mut deprecation = MsgDeprecation::NotDeprecated;
    if let Some(Token::Word(word)) = tokens.peek() {
        let line = tokens.line();
        deprecation = match *word {
            "Deprecated" => MsgDeprecation::Deprecated,
            "UDPDeprecated" => MsgDeprecation::UdpDeprecated,
            "UDPBlackListed" => MsgDeprecation::UdpBlackListed,
            "NotDeprecated" => MsgDeprecation::NotDeprecated,
            other => {
                return Err(TemplateError::new(
                    line,
                    format!("unknown deprecation {other}"),
                ));
            }
        };
        tokens.next();
    }

    let mut blocks: Vec<MessageTemplateBlock> = Vec::new();
    loop {
        let line = tokens.line();
        match tokens.next() {
            Some((_, Token::Open)) => {
                let block = parse_block(tokens)?;
                if blocks.iter().any(|b| b.name == block.name) {
                    return Err(TemplateError::new(
                        line,
                        format!("duplicate block {} in {name}", block.name),
                    ));
                }
                blocks.push(block);
            }
            Some((_, Token::Close)) => break,
            Some((line, Token::Word(w))) => {
                return Err(TemplateError::new(
                    line,
                    format!("unexpected {w} in message {name}"),
                ));
            }
            None => {
                return Err(TemplateError::new(
                    open_line,
                    format!("message {name} is never closed"),
                ));
            }
        }
    }

    Ok(MessageTemplate {
        name: name.to_string(),
        number: MessageNumber { frequency, id },
        trust,
        encoding,
        deprecation,
        blocks,
    })
}

fn parse_block(
    tokens: &mut Tokens<'_>,
) -> Result<MessageTemplateBlock, TemplateError> {
    let (_, name) = tokens.word("block name")?;
    let (kind_line, kind) = tokens.word("block type")?;
    let kind = match kind {
        "Single" => BlockKind::Single,
        "Variable" => BlockKind::Variable,
        "Multiple" => {
            let (count_line, count) = tokens.word("block count")?;
            let count = parse_number(count)
                .filter(|n| (1..=255).contains(n))
                .ok_or_else(|| {
                    TemplateError::new(
                        count_line,
                        format!("bad block count {count}"),
                    )
                })?;
            BlockKind::Multiple(count as usize)
        }
        other => {
            return Err(TemplateError::new(
                kind_line,
                format!("unknown block type {other}"),
            ));
        }
    };

    let mut variables: Vec<MessageTemplateVariable> = Vec::new();
    loop {
        match tokens.next() {
            Some((line, Token::Open)) => {
                let variable = parse_variable(tokens)?;
                if variables.iter().any(|v| v.name == variable.name) {
                    return Err(TemplateError::new(
                        line,
                        format!("duplicate field {} in {name}", variable.name),
                    ));
                }
                variables.push(variable);
            }
            Some((_, Token::Close)) => break,
            Some((line, Token::Word(w))) => {
                return Err(TemplateError::new(
                    line,
                    format!("unexpected {w} in block {name}"),
                ));
            }
            None => {
                return Err(TemplateError::new(
                    tokens.line(),
                    format!("block {name} is never closed"),
                ));
            }
        }
    }

    Ok(MessageTemplateBlock {
        name: name.to_string(),
        kind,
        variables,
    })
}

fn parse_variable(
    tokens: &mut Tokens<'_>,
) -> Result<MessageTemplateVariable, TemplateError> {
    let (_, name) = tokens.word("field name")?;
    let (type_line, type_word) = tokens.word("field type")?;
    let kind = match type_word {
        "Fixed" => {
            let (line, size) = tokens.word("fixed size")?;
            let size = parse_number(size).filter(|n| *n > 0).ok_or_else(|| {
                TemplateError::new(line, format!("bad fixed size {size}"))
            })?;
            FieldKind::Fixed(size as usize)
        }
        "Variable" => {
            let (line, width) = tokens.word("length width")?;
            let prefix = match width {
                "1" => LengthPrefix::One,
                "2" => LengthPrefix::Two,
                other => {
                    return Err(TemplateError::new(
                        line,
                        format!("variable length width must be 1 or 2, got {other}"),
                    ));
                }
            };
            FieldKind::Variable(prefix)
        }
        other => FieldKind::from_keyword(other).ok_or_else(|| {
            TemplateError::new(type_line, format!("unknown field type {other}"))
        })?,
    };
    tokens.expect(Token::Close)?;
    Ok(MessageTemplateVariable {
        name: name.to_string(),
        kind,
    })
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_number(word: &str) -> Option<u32> {
    match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => word.parse().ok(),
    }
}

fn parse_message_id(
    frequency: MsgFrequency,
    word: &str,
) -> Result<u16, String> {
    let raw = parse_number(word).ok_or_else(|| format!("bad message number {word}"))?;
    // Fixed numbers are written as the full 32-bit value, FFFFFFxx.
    let id = if frequency == MsgFrequency::Fixed && raw > 0xFF {
        if raw & 0xFFFF_FF00 != 0xFFFF_FF00 {
            return Err(format!("fixed message number {word} must be 0xFFFFFFxx"));
        }
        raw & 0xFF
    } else {
        raw
    };
    if id > u32::from(frequency.max_id()) {
        return Err(format!("message number {word} out of range for {frequency}"));
    }
    Ok(id as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version 2.0
// a comment { with braces }
{
    TestMessage Low 1 NotTrusted Zerocoded
    {
        TestBlock1 Single
        { Test1 U32 }
    }
    {
        NeighborBlock Multiple 4
        { Test0 U32 }
        { Blob Fixed 8 }
    }
}
{
    PacketAck Fixed 0xFFFFFFFB NotTrusted Unencoded UDPDeprecated
    {
        Packets Variable
        { ID U32 }
        { Note Variable 2 }
    }
}
"#;

    #[test]
    fn test_parse_sample_reads_messages_and_version() {
        let parsed = parse(SAMPLE).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("2.0"));
        assert_eq!(parsed.messages.len(), 2);

        let test = &parsed.messages[0];
        assert_eq!(test.name, "TestMessage");
        assert_eq!(test.number.frequency, MsgFrequency::Low);
        assert_eq!(test.number.id, 1);
        assert_eq!(test.encoding, MsgEncoding::Zerocoded);
        assert_eq!(test.deprecation, MsgDeprecation::NotDeprecated);
        assert_eq!(test.blocks[1].kind, BlockKind::Multiple(4));
        assert_eq!(test.blocks[1].variables[1].kind, FieldKind::Fixed(8));

        let ack = &parsed.messages[1];
        assert_eq!(ack.number.frequency, MsgFrequency::Fixed);
        assert_eq!(ack.number.id, 0xFB);
        assert_eq!(ack.deprecation, MsgDeprecation::UdpDeprecated);
        assert_eq!(ack.blocks[0].kind, BlockKind::Variable);
        assert_eq!(
            ack.blocks[0].variables[1].kind,
            FieldKind::Variable(LengthPrefix::Two)
        );
    }

    #[test]
    fn test_parse_unknown_field_type_reports_line() {
        let text = "{\n  Foo High 1 Trusted Unencoded\n  {\n    B Single\n    { X U128 }\n  }\n}\n";
        let err = parse(text).unwrap_err();
        assert_eq!(err.line, 5);
        assert!(err.message.contains("U128"));
    }

    #[test]
    fn test_parse_unclosed_message_fails() {
        let err = parse("{ Foo High 1 Trusted Unencoded").unwrap_err();
        assert!(err.message.contains("never closed"));
    }

    #[test]
    fn test_parse_bad_variable_width_fails() {
        let text = "{ Foo High 1 Trusted Unencoded { B Single { X Variable 4 } } }";
        let err = parse(text).unwrap_err();
        assert!(err.message.contains("1 or 2"));
    }

    #[test]
    fn test_parse_duplicate_number_fails() {
        let text = "{ A High 1 Trusted Unencoded }\n{ B High 1 Trusted Unencoded }";
        let err = parse(text).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("reuses"));
    }

    #[test]
    fn test_parse_high_number_out_of_range_fails() {
        let err = parse("{ A High 300 Trusted Unencoded }").unwrap_err();
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn test_parse_fixed_accepts_short_form() {
        let parsed = parse("{ A Fixed 0xFC Trusted Unencoded }").unwrap();
        assert_eq!(parsed.messages[0].number.id, 0xFC);
    }
}
