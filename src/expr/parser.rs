use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::expr::lexer::{Tok, tokenize};
use crate::model::Value;

/// 解析完整表达式，末尾不允许残留记号
pub(crate) fn parse_expression(src: &str) -> Result<Expr, String> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.ternary()?;
    if let Some((tok, offset)) = parser.tokens.get(parser.pos) {
        return Err(format!("unexpected {} at offset {}", describe(tok), offset));
    }
    Ok(expr)
}

struct ExprParser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), String> {
        if self.eat(punct) {
            return Ok(());
        }
        match self.tokens.get(self.pos) {
            Some((tok, offset)) => Err(format!(
                "expected `{}` but found {} at offset {}",
                punct,
                describe(tok),
                offset
            )),
            None => Err(format!("expected `{}` but reached end of expression", punct)),
        }
    }

    fn ternary(&mut self) -> Result<Expr, String> {
        let cond = self.binary(0)?;
        if self.eat("?") {
            let then = self.ternary()?;
            self.expect(":")?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek()? {
            Tok::Punct(p) => match *p {
                "||" => BinaryOp::Or,
                "&&" => BinaryOp::And,
                "==" => BinaryOp::Eq,
                "!=" => BinaryOp::Ne,
                "===" => BinaryOp::StrictEq,
                "!==" => BinaryOp::StrictNe,
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                ">=" => BinaryOp::Ge,
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "%" => BinaryOp::Rem,
                _ => return None,
            },
            Tok::Ident(word) => match word.as_str() {
                "or" => BinaryOp::Or,
                "and" => BinaryOp::And,
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Some(Tok::Punct("!")) => Some(UnaryOp::Not),
            Some(Tok::Punct("-")) => Some(UnaryOp::Neg),
            Some(Tok::Punct("+")) => Some(UnaryOp::Plus),
            Some(Tok::Ident(w)) if w == "not" => Some(UnaryOp::Not),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(Expr::Unary(op, Box::new(operand)))
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                match self.next() {
                    Some(Tok::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                    Some(Tok::Int(i)) => {
                        expr = Expr::Index(Box::new(expr), Box::new(Expr::Literal(Value::Int(i))))
                    }
                    Some(tok) => return Err(format!("expected property name, found {}", describe(&tok))),
                    None => return Err("expected property name after `.`".into()),
                }
            } else if self.eat("[") {
                let index = self.ternary()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let args = self.list(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    /// 逗号分隔的表达式列表，允许结尾逗号
    fn list(&mut self, close: &str) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.ternary()?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Tok::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Tok::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Tok::Ident(word)) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(word),
            }),
            Some(Tok::Punct("(")) => {
                let inner = self.ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Tok::Punct("[")) => Ok(Expr::Array(self.list("]")?)),
            Some(Tok::Punct("{")) => self.object(),
            Some(tok) => Err(format!("unexpected {}", describe(&tok))),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn object(&mut self) -> Result<Expr, String> {
        let mut entries = Vec::new();
        while !self.eat("}") {
            let key = match self.next() {
                Some(Tok::Ident(k)) | Some(Tok::Str(k)) => k,
                Some(Tok::Int(i)) => i.to_string(),
                Some(tok) => return Err(format!("expected object key, found {}", describe(&tok))),
                None => return Err("unterminated object literal".into()),
            };
            self.expect(":")?;
            entries.push((key, self.ternary()?));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Int(i) => format!("number `{}`", i),
        Tok::Float(f) => format!("number `{}`", f),
        Tok::Str(s) => format!("string \"{}\"", s),
        Tok::Ident(i) => format!("identifier `{}`", i),
        Tok::Punct(p) => format!("`{}`", p),
    }
}
