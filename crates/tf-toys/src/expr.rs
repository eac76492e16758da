//! Column expressions used for source selections and acceptance efficiencies.
//!
//! Grammar (lowest to highest precedence): `||`, `&&`, comparisons (`== != < <= > >=`),
//! `+ -`, `* /`, unary `- !`, atoms (numbers, column names, parenthesised expressions and the
//! calls `abs sqrt log exp pow min max`). Booleans are `1.0` / `0.0`.

use tf_core::{Column, Error, EventTable, Result};

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    Column(usize),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
    Call(Builtin, Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Builtin {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Builtin {
    fn lookup(name: &str) -> Option<(Self, usize)> {
        Some(match name {
            "abs" => (Builtin::Abs, 1),
            "sqrt" => (Builtin::Sqrt, 1),
            "log" => (Builtin::Log, 1),
            "exp" => (Builtin::Exp, 1),
            "pow" => (Builtin::Pow, 2),
            "min" => (Builtin::Min, 2),
            "max" => (Builtin::Max, 2),
            _ => return None,
        })
    }
}

/// A compiled expression over table columns.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
    columns: Vec<String>,
}

impl Expression {
    /// Parse and compile an expression.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = lex(input)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, columns: Vec::new() };
        let root = parser.or_expr()?;
        if let Some(tok) = parser.tokens.get(parser.pos) {
            return Err(Error::Validation(format!(
                "expression '{input}': unexpected trailing token {tok:?}"
            )));
        }
        Ok(Self { source: input.to_string(), root, columns: parser.columns })
    }

    /// The expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Column names the expression reads, in order of first use.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Evaluate for a single row; `row` is aligned with [`Expression::columns`].
    pub fn eval_row(&self, row: &[f64]) -> f64 {
        eval(&self.root, row)
    }

    /// Evaluate for every row of `table`.
    pub fn eval_table(&self, table: &EventTable) -> Result<Vec<f64>> {
        let cols = self
            .columns
            .iter()
            .map(|name| match table.column(name) {
                Some(Column::Float(v)) => Ok(v.as_slice()),
                Some(Column::Label(_)) => Err(Error::Validation(format!(
                    "expression '{}': column '{name}' is not numeric",
                    self.source
                ))),
                None => Err(Error::Validation(format!(
                    "expression '{}': missing column '{name}'",
                    self.source
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut row = vec![0.0; cols.len()];
        let mut out = Vec::with_capacity(table.n_rows());
        for i in 0..table.n_rows() {
            for (slot, col) in row.iter_mut().zip(&cols) {
                *slot = col[i];
            }
            out.push(eval(&self.root, &row));
        }
        Ok(out)
    }

    /// Row mask: true where the expression is finite and non-zero.
    pub fn mask(&self, table: &EventTable) -> Result<Vec<bool>> {
        Ok(self.eval_table(table)?.into_iter().map(|v| v.is_finite() && v != 0.0).collect())
    }
}

fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval(node: &Node, row: &[f64]) -> f64 {
    match node {
        Node::Const(v) => *v,
        Node::Column(i) => row[*i],
        Node::Neg(a) => -eval(a, row),
        Node::Not(a) => truth(eval(a, row) == 0.0),
        Node::Binary(op, a, b) => {
            let l = eval(a, row);
            // Short-circuit the logical operators.
            match op {
                Op::And if l == 0.0 => return 0.0,
                Op::Or if l != 0.0 && !l.is_nan() => return 1.0,
                _ => {}
            }
            let r = eval(b, row);
            match op {
                Op::Add => l + r,
                Op::Sub => l - r,
                Op::Mul => l * r,
                Op::Div => l / r,
                Op::Eq => truth(l == r),
                Op::Ne => truth(l != r),
                Op::Lt => truth(l < r),
                Op::Le => truth(l <= r),
                Op::Gt => truth(l > r),
                Op::Ge => truth(l >= r),
                Op::And => truth(l != 0.0 && r != 0.0 && !l.is_nan() && !r.is_nan()),
                Op::Or => truth(r != 0.0 && !r.is_nan()),
            }
        }
        Node::Call(f, args) => {
            let x = eval(&args[0], row);
            match f {
                Builtin::Abs => x.abs(),
                Builtin::Sqrt => x.sqrt(),
                Builtin::Log => x.ln(),
                Builtin::Exp => x.exp(),
                Builtin::Pow => x.powf(eval(&args[1], row)),
                Builtin::Min => x.min(eval(&args[1], row)),
                Builtin::Max => x.max(eval(&args[1], row)),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Op(Op),
    Bang,
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Tok>> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let pair = input.get(i..i + 2).unwrap_or("");
        let two = match pair {
            "&&" => Some(Op::And),
            "||" => Some(Op::Or),
            "==" => Some(Op::Eq),
            "!=" => Some(Op::Ne),
            "<=" => Some(Op::Le),
            ">=" => Some(Op::Ge),
            _ => None,
        };
        if let Some(op) = two {
            out.push(Tok::Op(op));
            i += 2;
            continue;
        }
        let single = match c {
            '+' => Some(Tok::Op(Op::Add)),
            '-' => Some(Tok::Op(Op::Sub)),
            '*' => Some(Tok::Op(Op::Mul)),
            '/' => Some(Tok::Op(Op::Div)),
            '<' => Some(Tok::Op(Op::Lt)),
            '>' => Some(Tok::Op(Op::Gt)),
            '!' => Some(Tok::Bang),
            '(' => Some(Tok::LParen),
            ')' => Some(Tok::RParen),
            ',' => Some(Tok::Comma),
            _ => None,
        };
        if let Some(tok) = single {
            out.push(tok);
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < bytes.len() {
                let d = bytes[i] as char;
                let exp_sign = (d == '+' || d == '-') && matches!(bytes[i - 1], b'e' | b'E');
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exp_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            let text = &input[start..i];
            let v = text
                .parse::<f64>()
                .map_err(|_| Error::Validation(format!("expression '{input}': bad number '{text}'")))?;
            out.push(Tok::Num(v));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            out.push(Tok::Ident(input[start..i].to_string()));
            continue;
        }
        return Err(Error::Validation(format!("expression '{input}': unexpected character '{c}'")));
    }
    Ok(out)
}

struct Parser<'a> {
    tokens: &'a [Tok],
    pos: usize,
    columns: Vec<String>,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<Op> {
        match self.tokens.get(self.pos) {
            Some(Tok::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn binary_level(
        &mut self,
        ops: &[Op],
        chain: bool,
        operand: fn(&mut Self) -> Result<Node>,
    ) -> Result<Node> {
        let mut lhs = operand(self)?;
        while let Some(op) = self.peek_op().filter(|op| ops.contains(op)) {
            self.pos += 1;
            let rhs = operand(self)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
            if !chain {
                break;
            }
        }
        Ok(lhs)
    }

    fn or_expr(&mut self) -> Result<Node> {
        self.binary_level(&[Op::Or], true, Self::and_expr)
    }

    fn and_expr(&mut self) -> Result<Node> {
        self.binary_level(&[Op::And], true, Self::cmp_expr)
    }

    fn cmp_expr(&mut self) -> Result<Node> {
        self.binary_level(&[Op::Eq, Op::Ne, Op::Lt, Op::Le, Op::Gt, Op::Ge], false, Self::add_expr)
    }

    fn add_expr(&mut self) -> Result<Node> {
        self.binary_level(&[Op::Add, Op::Sub], true, Self::mul_expr)
    }

    fn mul_expr(&mut self) -> Result<Node> {
        self.binary_level(&[Op::Mul, Op::Div], true, Self::unary)
    }

    fn unary(&mut self) -> Result<Node> {
        match self.tokens.get(self.pos) {
            Some(Tok::Op(Op::Sub)) => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Tok::Bang) => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.unary()?)))
            }
            _ => self.atom(),
        }
    }

    fn expect(&mut self, want: Tok) -> Result<()> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            other => Err(Error::Validation(format!("expected {want:?}, got {other:?}"))),
        }
    }

    fn atom(&mut self) -> Result<Node> {
        match self.next() {
            Some(Tok::Num(v)) => Ok(Node::Const(v)),
            Some(Tok::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Ident(name)) if self.tokens.get(self.pos) == Some(&Tok::LParen) => {
                self.pos += 1;
                let (func, arity) = Builtin::lookup(&name)
                    .ok_or_else(|| Error::Validation(format!("unknown function '{name}'")))?;
                let mut args = vec![self.or_expr()?];
                while self.tokens.get(self.pos) == Some(&Tok::Comma) {
                    self.pos += 1;
                    args.push(self.or_expr()?);
                }
                self.expect(Tok::RParen)?;
                if args.len() != arity {
                    return Err(Error::Validation(format!(
                        "function '{name}' takes {arity} argument(s), got {}",
                        args.len()
                    )));
                }
                Ok(Node::Call(func, args))
            }
            Some(Tok::Ident(name)) => {
                let idx = match self.columns.iter().position(|c| *c == name) {
                    Some(i) => i,
                    None => {
                        self.columns.push(name);
                        self.columns.len() - 1
                    }
                };
                Ok(Node::Column(idx))
            }
            other => Err(Error::Validation(format!(
                "expected number, column or '(', got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EventTable {
        EventTable::from_columns(vec![
            ("mass".to_string(), Column::Float(vec![5100.0, 5280.0, 5400.0])),
            ("q2".to_string(), Column::Float(vec![1.0, 4.0, 9.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_precedence() {
        let e = Expression::compile("2 + 3 * 4 - -1").unwrap();
        assert!(e.columns().is_empty());
        assert_eq!(e.eval_row(&[]), 15.0);
        let e = Expression::compile("(1 + 2) * (3 + 4)").unwrap();
        assert_eq!(e.eval_row(&[]), 21.0);
    }

    #[test]
    fn test_columns_and_selection_mask() {
        let e = Expression::compile("mass > 5200 && sqrt(q2) < 3").unwrap();
        assert_eq!(e.columns(), &["mass", "q2"]);
        assert_eq!(e.mask(&table()).unwrap(), vec![false, true, false]);
    }

    #[test]
    fn test_or_and_not() {
        let e = Expression::compile("!(q2 > 2) || mass >= 5400").unwrap();
        assert_eq!(e.mask(&table()).unwrap(), vec![true, false, true]);
    }

    #[test]
    fn test_functions_and_scientific_notation() {
        let e = Expression::compile("abs(-q2) + max(1.5e1, 2E-1)").unwrap();
        assert_eq!(e.eval_table(&table()).unwrap(), vec![16.0, 19.0, 24.0]);
        let e = Expression::compile("pow(q2, 2)").unwrap();
        assert_eq!(e.eval_table(&table()).unwrap(), vec![1.0, 16.0, 81.0]);
    }

    #[test]
    fn test_errors() {
        assert!(Expression::compile("mass >").is_err());
        assert!(Expression::compile("foo(mass)").is_err());
        assert!(Expression::compile("pow(mass)").is_err());
        assert!(Expression::compile("mass $ 2").is_err());
        assert!(Expression::compile("mass 2").is_err());
        let e = Expression::compile("pt > 1").unwrap();
        assert!(e.eval_table(&table()).is_err());
    }
}
