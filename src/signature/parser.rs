//! Signature DSL parser.
//!
//! Grammar:
//!
//! ```text
//! signature := [string] fields "->" fields
//! fields    := field ("," field)*
//! field     := ident ["?"] ["!"] [":" type] [string]
//! type      := ident ["[]"] [string]      // the string lists class options
//! ```
//!
//! Example: `"Classify reviews" review:string -> sentiment:class "positive, negative", reason?:string`

use super::field::{Field, FieldType};
use crate::error::LlmError;

#[derive(Debug)]
pub(crate) struct ParsedSignature {
    pub description: Option<String>,
    pub inputs: Vec<Field>,
    pub outputs: Vec<Field>,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, message: impl std::fmt::Display) -> LlmError {
        LlmError::config(format!(
            "Invalid signature at position {}: {message}",
            self.pos
        ))
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.src.len()
    }

    fn ident(&mut self) -> Result<String, LlmError> {
        self.skip_ws();
        let len = self
            .rest()
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map_or(self.rest().len(), |(i, _)| i);
        if len == 0 {
            return Err(self.error("expected a field name"));
        }
        let ident = self.rest()[..len].to_string();
        self.pos += len;
        Ok(ident)
    }

    fn string(&mut self) -> Result<Option<String>, LlmError> {
        self.skip_ws();
        if self.peek() != Some('"') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(Some(out));
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c => out.push(c),
            }
        }
        self.pos = start;
        Err(self.error("unterminated string"))
    }

    fn field(&mut self) -> Result<Field, LlmError> {
        let name = self.ident()?;
        let optional = self.eat("?");
        let internal = self.eat("!");

        let mut field = if self.eat(":") {
            let keyword = self.ident()?;
            let is_array = self.eat("[]");
            let field_type = match keyword.as_str() {
                "class" => {
                    let options = self
                        .string()?
                        .ok_or_else(|| self.error(format!("class field '{name}' needs quoted options")))?;
                    FieldType::class(
                        options
                            .split([',', '|'])
                            .map(str::trim)
                            .filter(|s| !s.is_empty()),
                    )
                }
                "object" => {
                    return Err(self.error(format!(
                        "object field '{name}' must be declared with the builder API"
                    )));
                }
                other => FieldType::from_keyword(other)
                    .ok_or_else(|| self.error(format!("unknown type '{other}'")))?,
            };
            let mut field = Field::new(name, field_type);
            field.is_array = is_array;
            field
        } else {
            Field::string(name)
        };

        field.is_optional = optional;
        field.is_internal = internal;
        if let Some(desc) = self.string()? {
            field.description = Some(desc);
        }
        Ok(field)
    }

    fn fields(&mut self) -> Result<Vec<Field>, LlmError> {
        let mut fields = vec![self.field()?];
        while self.eat(",") {
            fields.push(self.field()?);
        }
        Ok(fields)
    }
}

pub(crate) fn parse(src: &str) -> Result<ParsedSignature, LlmError> {
    let mut p = Parser::new(src);
    let description = p.string()?;
    let inputs = p.fields()?;
    if !p.eat("->") {
        return Err(p.error("expected '->'"));
    }
    let outputs = p.fields()?;
    if !p.at_end() {
        return Err(p.error("unexpected trailing input"));
    }
    Ok(ParsedSignature {
        description,
        inputs,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_syntax() {
        let parsed = parse(
            r#""Classify" review:string "The text", lang?:string -> sentiment:class "pos, neg" "Label", scores:number[], notes?!:string"#,
        )
        .unwrap();
        assert_eq!(parsed.description.as_deref(), Some("Classify"));
        assert_eq!(parsed.inputs.len(), 2);
        assert_eq!(parsed.inputs[0].description.as_deref(), Some("The text"));
        assert!(parsed.inputs[1].is_optional);

        let sentiment = &parsed.outputs[0];
        assert_eq!(sentiment.field_type, FieldType::class(["pos", "neg"]));
        assert_eq!(sentiment.description.as_deref(), Some("Label"));
        assert!(parsed.outputs[1].is_array);
        assert_eq!(parsed.outputs[1].field_type, FieldType::Number);
        assert!(parsed.outputs[2].is_optional && parsed.outputs[2].is_internal);
    }

    #[test]
    fn type_defaults_to_string() {
        let parsed = parse("question -> answer").unwrap();
        assert_eq!(parsed.inputs[0].field_type, FieldType::String);
        assert_eq!(parsed.outputs[0].title, "Answer");
    }

    #[test]
    fn errors_report_position() {
        let err = parse("question answer").unwrap_err();
        assert!(err.to_string().contains("expected '->'"), "{err}");

        let err = parse("q:strin -> a").unwrap_err();
        assert!(err.to_string().contains("unknown type 'strin'"), "{err}");

        let err = parse(r#"q -> a:class"#).unwrap_err();
        assert!(err.to_string().contains("needs quoted options"), "{err}");

        let err = parse(r#""open q -> a"#).unwrap_err();
        assert!(err.to_string().contains("position 0"), "{err}");
    }
}
