//! The header dictionary of an Array-Record.
//!
//! The header is a Python literal of the form
//! `{'descr': '<f4', 'fortran_order': False, 'shape': (2, 3, 4), }`. Only the
//! literal subset that record writers actually emit is accepted: strings, `True`,
//! `False`, non-negative integers (with an optional legacy `L` suffix), tuples,
//! lists and dicts.

use crate::common::{DType, Order};
use crate::ArchiveError;

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Bool(bool),
    Int(u64),
    Tuple(Vec<Literal>),
    List(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
}

/// Deepest tuple/list/dict nesting accepted. Real headers nest at most two
/// levels (a structured `descr` list of tuples).
const MAX_DEPTH: usize = 16;

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn err(&self, what: &str) -> ArchiveError {
        ArchiveError::Format(format!("header literal: {} at offset {}", what, self.pos))
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ArchiveError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.err(&format!("expected '{}'", c)))
        }
    }

    fn literal(&mut self) -> Result<Literal, ArchiveError> {
        match self.peek() {
            Some('\'') | Some('"') => self.string().map(Literal::Str),
            Some('(') => self.nested(|p| p.sequence('(', ')').map(Literal::Tuple)),
            Some('[') => self.nested(|p| p.sequence('[', ']').map(Literal::List)),
            Some('{') => self.nested(|p| p.dict().map(Literal::Dict)),
            Some(c) if c.is_ascii_digit() => self.int(),
            Some(_) => self.keyword(),
            None => Err(self.err("unexpected end")),
        }
    }

    fn nested<F>(&mut self, f: F) -> Result<Literal, ArchiveError>
    where
        F: FnOnce(&mut Self) -> Result<Literal, ArchiveError>,
    {
        if self.depth >= MAX_DEPTH {
            return Err(self.err("header nesting too deep"));
        }
        self.depth += 1;
        let literal = f(self);
        self.depth -= 1;
        literal
    }

    fn string(&mut self) -> Result<String, ArchiveError> {
        let rest = self.rest();
        let quote = if rest.starts_with("'''") {
            "'''"
        } else if rest.starts_with("\"\"\"") {
            "\"\"\""
        } else if rest.starts_with('\'') {
            "'"
        } else {
            "\""
        };
        let body = &rest[quote.len()..];
        let end = body
            .find(quote)
            .ok_or_else(|| self.err("unterminated string"))?;
        let value = &body[..end];
        if value.contains('\\') {
            return Err(self.err("escape sequences are not supported"));
        }
        self.pos += quote.len() * 2 + end;
        Ok(value.to_string())
    }

    fn int(&mut self) -> Result<Literal, ArchiveError> {
        let digits: String = self.rest().chars().take_while(|c| c.is_ascii_digit()).collect();
        self.pos += digits.len();
        // Python 2 writers emitted long literals such as `3L`.
        if self.rest().starts_with('L') {
            self.pos += 1;
        }
        digits
            .parse()
            .map(Literal::Int)
            .map_err(|_| self.err("integer out of range"))
    }

    fn keyword(&mut self) -> Result<Literal, ArchiveError> {
        for (word, value) in [("True", true), ("False", false)] {
            if self.rest().starts_with(word) {
                self.pos += word.len();
                return Ok(Literal::Bool(value));
            }
        }
        Err(self.err("unexpected token"))
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Vec<Literal>, ArchiveError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.literal()?);
            if !self.eat(',') {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn dict(&mut self) -> Result<Vec<(Literal, Literal)>, ArchiveError> {
        self.expect('{')?;
        let mut pairs = Vec::new();
        loop {
            if self.eat('}') {
                return Ok(pairs);
            }
            let key = self.literal()?;
            self.expect(':')?;
            let value = self.literal()?;
            pairs.push((key, value));
            if !self.eat(',') {
                self.expect('}')?;
                return Ok(pairs);
            }
        }
    }
}

/// The three header fields of an Array-Record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeaderFields {
    pub dtype: DType,
    pub order: Order,
    pub shape: Vec<usize>,
}

/// Parses a header dictionary. Exactly the keys `descr`, `fortran_order` and
/// `shape` must be present.
pub(crate) fn parse(text: &str) -> Result<HeaderFields, ArchiveError> {
    let mut parser = Parser::new(text);
    let pairs = match parser.literal()? {
        Literal::Dict(pairs) => pairs,
        _ => return Err(ArchiveError::Format("header is not a dictionary".into())),
    };
    if parser.peek().is_some() {
        return Err(parser.err("trailing characters after dictionary"));
    }

    let mut descr = None;
    let mut fortran = None;
    let mut shape = None;
    for (key, value) in pairs {
        let key = match key {
            Literal::Str(k) => k,
            other => return Err(ArchiveError::Format(format!("non-string header key {:?}", other))),
        };
        let slot_taken = match key.as_str() {
            "descr" => descr.replace(value).is_some(),
            "fortran_order" => fortran.replace(value).is_some(),
            "shape" => shape.replace(value).is_some(),
            _ => return Err(ArchiveError::Format(format!("unexpected header key '{}'", key))),
        };
        if slot_taken {
            return Err(ArchiveError::Format(format!("header key '{}' appears twice", key)));
        }
    }

    let dtype = match descr {
        Some(Literal::Str(d)) => DType::from_descr(&d)?,
        // Structured (record) dtypes are written as a list of fields.
        Some(Literal::List(_)) => {
            return Err(ArchiveError::UnsupportedType("structured dtype".into()))
        }
        Some(other) => return Err(ArchiveError::Format(format!("descr is not a string: {:?}", other))),
        None => return Err(ArchiveError::Format("header is missing 'descr'".into())),
    };
    let order = match fortran {
        Some(Literal::Bool(true)) => Order::ColumnMajor,
        Some(Literal::Bool(false)) => Order::RowMajor,
        Some(other) => {
            return Err(ArchiveError::Format(format!("fortran_order is not a bool: {:?}", other)))
        }
        None => return Err(ArchiveError::Format("header is missing 'fortran_order'".into())),
    };
    let shape = match shape {
        Some(Literal::Tuple(dims)) => dims
            .into_iter()
            .map(|dim| match dim {
                Literal::Int(n) => usize::try_from(n)
                    .map_err(|_| ArchiveError::Format(format!("dimension {} does not fit in usize", n))),
                other => Err(ArchiveError::Format(format!("shape entry is not an integer: {:?}", other))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(ArchiveError::Format(format!("shape is not a tuple: {:?}", other))),
        None => return Err(ArchiveError::Format("header is missing 'shape'".into())),
    };

    Ok(HeaderFields { dtype, order, shape })
}

/// Renders the header dictionary, without padding.
pub(crate) fn render(fields: &HeaderFields) -> String {
    let shape = match fields.shape.as_slice() {
        [] => "()".to_string(),
        [single] => format!("({},)", single),
        dims => {
            let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    };
    let fortran = if fields.order.is_fortran() { "True" } else { "False" };
    format!(
        "{{'descr': '{}', 'fortran_order': {}, 'shape': {}, }}",
        fields.dtype.descr(),
        fortran,
        shape
    )
}
