//! Built-in Tools

use anyhow::{Context, bail};
use async_trait::async_trait;

use crate::tool::{Tool, ToolSchema};

/// DateTime tool - returns current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "datetime",
            "Get the current date and time in UTC. Input: 'iso', 'unix', or 'human'.",
        )
    }

    async fn invoke(&self, input: &str) -> anyhow::Result<String> {
        let now = chrono::Utc::now();

        let output = match input.trim().to_ascii_lowercase().as_str() {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        };

        Ok(output)
    }
}

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "calculator",
            "Evaluate an arithmetic expression. Supports + - * / ^, parentheses, sqrt(x) and pi. Input example: (2 + 3) * sqrt(16)",
        )
    }

    async fn invoke(&self, input: &str) -> anyhow::Result<String> {
        let value = evaluate(input).with_context(|| format!("cannot evaluate '{}'", input.trim()))?;
        Ok(format_number(value))
    }
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> anyhow::Result<f64> {
    let mut parser = ExprParser {
        src: expression.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        bail!("unexpected '{}' at position {}", char::from(parser.src[parser.pos]), parser.pos);
    }
    if !value.is_finite() {
        bail!("result is not a finite number");
    }
    Ok(value)
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

// expr   := term (('+' | '-') term)*
// term   := factor (('*' | '/') factor)*
// factor := '-' factor | power
// power  := atom ('^' factor)?
// atom   := number | '(' expr ')' | 'pi' | 'sqrt' '(' expr ')'
//
// Every recursive path passes through `factor`, which bounds the depth.
const MAX_DEPTH: usize = 128;

struct ExprParser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl ExprParser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> anyhow::Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat(b'+') {
                value += self.term()?;
            } else if self.eat(b'-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> anyhow::Result<f64> {
        let mut value = self.factor()?;
        loop {
            if self.eat(b'*') {
                value *= self.factor()?;
            } else if self.eat(b'/') {
                let divisor = self.factor()?;
                if divisor == 0.0 {
                    bail!("division by zero");
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn factor(&mut self) -> anyhow::Result<f64> {
        if self.depth >= MAX_DEPTH {
            bail!("expression nested deeper than {MAX_DEPTH} levels");
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> anyhow::Result<f64> {
        if self.eat(b'-') {
            return Ok(-self.factor()?);
        }
        let base = self.atom()?;
        if self.eat(b'^') {
            return Ok(base.powf(self.factor()?));
        }
        Ok(base)
    }

    fn atom(&mut self) -> anyhow::Result<f64> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                if !self.eat(b')') {
                    bail!("missing closing parenthesis");
                }
                Ok(value)
            }
            Some(b) if b.is_ascii_digit() || b == b'.' => self.number(),
            Some(b) if b.is_ascii_alphabetic() => self.identifier(),
            Some(b) => bail!("unexpected '{}' at position {}", char::from(b), self.pos),
            None => bail!("unexpected end of expression"),
        }
    }

    fn number(&mut self) -> anyhow::Result<f64> {
        let start = self.pos;
        while self.pos < self.src.len() && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.') {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])?;
        text.parse::<f64>()
            .with_context(|| format!("invalid number '{text}'"))
    }

    fn identifier(&mut self) -> anyhow::Result<f64> {
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_alphanumeric() {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.src[start..self.pos])?;
        match name {
            "pi" => Ok(std::f64::consts::PI),
            "sqrt" => {
                if !self.eat(b'(') {
                    bail!("sqrt requires parentheses");
                }
                let arg = self.expr()?;
                if !self.eat(b')') {
                    bail!("missing closing parenthesis");
                }
                if arg < 0.0 {
                    bail!("sqrt of a negative number");
                }
                Ok(arg.sqrt())
            }
            other => bail!("unknown identifier '{other}'"),
        }
    }
}
