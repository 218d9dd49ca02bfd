//! Expression language used by templates and the sandbox
//!
//! A small JavaScript-flavoured grammar: literals, identifiers, member and
//! index access, calls, unary/binary/logical operators, the ternary operator
//! and `;`-separated statements with simple assignment.
//!
//! Precedence, lowest first:
//! ```text
//! assignment   name = expr
//! conditional  a ? b : c
//! logical or   ||
//! logical and  &&
//! equality     == != === !==
//! comparison   < <= > >=
//! additive     + -
//! multiplicative * / %
//! unary        - + !
//! postfix      a.b  a[b]  a(b, c)
//! ```

use serde_json::Value;

use crate::common::{Error, Result};

/// Parsed program: statements evaluated in order
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Expr>,
}

/// Expression syntax tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        name: String,
        value: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl Expr {
    /// Literal value of this node, if it is a plain literal
    ///
    /// A unary minus applied to a numeric literal still counts as a literal.
    pub fn literal_value(&self) -> Option<Value> {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => match operand.as_ref() {
                Expr::Literal(Value::Number(n)) => {
                    if let Some(i) = n.as_i64() {
                        Some(Value::from(-i))
                    } else {
                        n.as_f64().map(|f| number_value(-f))
                    }
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// Build a JSON number, collapsing integral floats to integers
pub(crate) fn number_value(f: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Parse a complete program
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.program()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(Value),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

/// Punctuators, longest first so the scanner can take the first match
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!",
    "?", ":", "(", ")", "[", "]", ",", ".", ";", "=",
];

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let (value, end) = scan_number(source, i)?;
            tokens.push(Token {
                tok: Tok::Number(value),
                offset: start,
            });
            i = end;
            continue;
        }

        if c == b'"' || c == b'\'' {
            let (value, end) = scan_string(source, i)?;
            tokens.push(Token {
                tok: Tok::Str(value),
                offset: start,
            });
            i = end;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Ident(source[start..i].to_string()),
                offset: start,
            });
            continue;
        }

        match PUNCTUATORS
            .iter()
            .find(|p| source[i..].starts_with(**p))
        {
            Some(p) => {
                tokens.push(Token {
                    tok: Tok::Punct(*p),
                    offset: start,
                });
                i += p.len();
            }
            None => {
                let ch = source[i..].chars().next().unwrap_or('?');
                return Err(Error::syntax(i, format!("Unexpected character '{}'", ch)));
            }
        }
    }

    tokens.push(Token {
        tok: Tok::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn scan_number(source: &str, start: usize) -> Result<(Value, usize)> {
    let bytes = source.as_bytes();
    let mut i = start;
    let mut integral = true;

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        integral = false;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        integral = false;
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let digits = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if digits == i {
            return Err(Error::syntax(start, "Malformed exponent"));
        }
    }
    if i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
        return Err(Error::syntax(i, "Identifier directly after number"));
    }

    let text = &source[start..i];
    if integral {
        if let Ok(n) = text.parse::<i64>() {
            return Ok((Value::from(n), i));
        }
    }
    let f: f64 = text
        .parse()
        .map_err(|_| Error::syntax(start, format!("Invalid number '{}'", text)))?;
    Ok((number_value(f), i))
}

fn scan_string(source: &str, start: usize) -> Result<(String, usize)> {
    let quote = source.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = source[start + 1..].char_indices();

    while let Some((off, ch)) = chars.next() {
        if ch == quote {
            return Ok((out, start + 1 + off + 1));
        }
        if ch == '\n' {
            break;
        }
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some((esc_off, esc)) = chars.next() else {
            break;
        };
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'u' => {
                let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        Error::syntax(start + 1 + esc_off, "Invalid unicode escape")
                    })?;
                out.push(decoded);
            }
            other => out.push(other),
        }
    }

    Err(Error::syntax(start, "Unterminated string literal"))
}

/// Deepest nesting of parentheses, brackets, calls and unary operators
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, ahead: usize) -> &Tok {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Tok::Punct(p) if *p == punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{}'", punct)))
        }
    }

    fn unexpected(&self, context: &str) -> Error {
        let found = match self.peek() {
            Tok::Number(n) => n.to_string(),
            Tok::Str(s) => format!("\"{}\"", s),
            Tok::Ident(name) => name.clone(),
            Tok::Punct(p) => p.to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        Error::syntax(self.offset(), format!("Unexpected {}, {}", found, context))
    }

    fn program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();
        loop {
            while self.eat(";") {}
            if *self.peek() == Tok::Eof {
                break;
            }
            statements.push(self.statement()?);
            if !self.eat(";") && *self.peek() != Tok::Eof {
                return Err(self.unexpected("expected ';' or end of input"));
            }
        }
        Ok(Program { statements })
    }

    fn statement(&mut self) -> Result<Expr> {
        let is_declaration = matches!(self.peek(), Tok::Ident(kw) if matches!(kw.as_str(), "let" | "var" | "const"))
            && matches!(self.peek_at(1), Tok::Ident(_));
        if !is_declaration {
            return self.expression();
        }

        self.advance();
        let Tok::Ident(name) = self.advance() else {
            return Err(self.unexpected("expected identifier"));
        };
        self.expect("=")?;
        let value = self.expression()?;
        Ok(Expr::Assign {
            name,
            value: Box::new(value),
        })
    }

    /// Run `parse` one nesting level deeper
    fn nested(&mut self, parse: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(Error::syntax(self.offset(), "Expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expression(&mut self) -> Result<Expr> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> Result<Expr> {
        let target = self.conditional()?;
        if !self.eat("=") {
            return Ok(target);
        }
        match target {
            Expr::Ident(name) => {
                let value = self.expression()?;
                Ok(Expr::Assign {
                    name,
                    value: Box::new(value),
                })
            }
            _ => Err(Error::syntax(
                self.offset(),
                "Invalid left-hand side in assignment",
            )),
        }
    }

    fn conditional(&mut self) -> Result<Expr> {
        let test = self.logical_or()?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(":")?;
        let alternate = self.expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn logical_or(&mut self) -> Result<Expr> {
        let mut left = self.logical_and()?;
        while self.eat("||") {
            let right = self.logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("===", BinaryOp::Eq),
                ("!==", BinaryOp::NotEq),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::NotEq),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("<=", BinaryOp::LtEq),
                (">=", BinaryOp::GtEq),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat(punct) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else if self.eat("!") {
            UnaryOp::Not
        } else {
            return self.postfix();
        };
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let Tok::Ident(property) = self.advance() else {
                    return Err(Error::syntax(
                        self.tokens[self.pos.saturating_sub(1)].offset,
                        "Expected property name after '.'",
                    ));
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat("(") {
                let args = self.list(")")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed
    fn list(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expression()?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Tok::Number(n) => {
                self.advance();
                Ok(Expr::Literal(n))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(match name.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" | "undefined" => Expr::Literal(Value::Null),
                    _ => Expr::Ident(name),
                })
            }
            Tok::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                self.advance();
                Ok(Expr::Array(self.list("]")?))
            }
            _ => Err(self.unexpected("expected an expression")),
        }
    }
}
