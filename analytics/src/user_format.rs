//! User-template formatter: `FORMAT format("%field% ...", title)`
//!
//! Fields are `%name%` with an optional width prefix: `%12name%`
//! right-pads to 12 characters, `%-12name%` left-pads.

use std::io::Write;

use crate::format::record_value_string;
use crate::metadata::MetadataDb;
use vernier_context::{Error, EntryList, Result};

#[derive(Debug, PartialEq)]
enum Token {
    Literal(String),
    Field {
        name: String,
        width: usize,
        left_align: bool,
    },
}

fn parse_template(template: &str) -> Result<Vec<Token>> {
    let mut tokens = vec![];
    let mut rest = template;
    loop {
        match rest.find('%') {
            None => {
                if !rest.is_empty() {
                    tokens.push(Token::Literal(rest.to_string()));
                }
                return Ok(tokens);
            }
            Some(start) => {
                if start > 0 {
                    tokens.push(Token::Literal(rest[..start].to_string()));
                }
                let field = &rest[start + 1..];
                let end = field.find('%').ok_or_else(|| {
                    Error::Config(format!("unterminated field in format string: {template}"))
                })?;
                let mut body = &field[..end];
                let left_align = body.starts_with('-');
                if left_align {
                    body = &body[1..];
                }
                let digits = body.chars().take_while(|c| c.is_ascii_digit()).count();
                let width = body[..digits].parse().unwrap_or(0);
                let name = body[digits..].to_string();
                if name.is_empty() {
                    return Err(Error::Config(format!(
                        "empty field in format string: {template}"
                    )));
                }
                tokens.push(Token::Field {
                    name,
                    width,
                    left_align,
                });
                rest = &field[end + 1..];
            }
        }
    }
}

pub struct UserFormatter {
    tokens: Vec<Token>,
    title: Option<String>,
    wrote_title: bool,
}

impl UserFormatter {
    pub fn new(args: &[String]) -> Result<Self> {
        let template = args
            .first()
            .ok_or_else(|| Error::Config("format: missing format string".into()))?;
        Ok(Self {
            tokens: parse_template(template)?,
            title: args.get(1).cloned(),
            wrote_title: false,
        })
    }

    pub fn process_record(
        &mut self,
        db: &MetadataDb,
        rec: &EntryList,
        out: &mut dyn Write,
    ) -> Result<()> {
        if !self.wrote_title {
            self.wrote_title = true;
            if let Some(title) = &self.title {
                writeln!(out, "{title}")?;
            }
        }
        for token in &self.tokens {
            match token {
                Token::Literal(text) => write!(out, "{text}")?,
                Token::Field {
                    name,
                    width,
                    left_align,
                } => {
                    let value = record_value_string(db, rec, name);
                    let width = *width;
                    if *left_align || width == 0 {
                        write!(out, "{value:<width$}")?;
                    } else {
                        write!(out, "{value:>width$}")?;
                    }
                }
            }
        }
        writeln!(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vernier_context::{Entry, Properties};
    use vernier_transit::{AttrType, Value};

    #[test]
    fn template_parsing() {
        let tokens = parse_template("%-10phase% t=%time%").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Field {
                    name: "phase".into(),
                    width: 10,
                    left_align: true
                },
                Token::Literal(" t=".into()),
                Token::Field {
                    name: "time".into(),
                    width: 0,
                    left_align: false
                },
            ]
        );
        assert!(parse_template("%unclosed").is_err());
    }

    #[test]
    fn renders_fields_with_padding() {
        let db = MetadataDb::new();
        let phase = db
            .tree()
            .create_attribute(
                "phase",
                AttrType::String,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();
        let rec = vec![Entry::immediate(phase.id(), Value::Str("io".into()))];

        let mut formatter =
            UserFormatter::new(&["%-6phase%|".to_string(), "header".to_string()]).unwrap();
        let mut buf = vec![];
        formatter.process_record(&db, &rec, &mut buf).unwrap();
        formatter.process_record(&db, &rec, &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "header\nio    |\nio    |\n"
        );
    }
}
