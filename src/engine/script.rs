//! Script channel interpreter
//!
//! A small imperative dialect: `let`, assignment, `if`/`else`, `while`,
//! `throw`, expression statements, and a fixed set of built-in functions
//! for inspecting and mutating the document. Programs and assertions share
//! this evaluator, so state built by the script is visible to the battery.
//!
//! Faults (parse errors, type errors, `throw`) carry a message and abort
//! the current program or assertion. Runaway loops are not bounded here;
//! the host's wall-clock budget is the backstop.

use std::collections::HashMap;
use std::fmt;

use super::dom::Selector;
use super::ExecutionContext;
use crate::model::LogLevel;

/// Runtime value. No objects or arrays; the document is reached through
/// the built-ins instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
        }
    }

    /// Human-readable rendering, used by `log` and captured values.
    pub fn render(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.0e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Str(s) => s.clone(),
        }
    }
}

/// An aborted evaluation: parse error, type error, unknown name, invalid
/// selector, or an explicit `throw`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub message: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Fault {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Let,
    If,
    Else,
    While,
    Throw,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AndAnd,
    OrOr,
    Bang,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(n) => format!("number {}", n),
            Token::Str(_) => "string literal".to_string(),
            Token::Ident(name) => format!("'{}'", name),
            Token::True => "'true'".to_string(),
            Token::False => "'false'".to_string(),
            Token::Null => "'null'".to_string(),
            Token::Let => "'let'".to_string(),
            Token::If => "'if'".to_string(),
            Token::Else => "'else'".to_string(),
            Token::While => "'while'".to_string(),
            Token::Throw => "'throw'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBrace => "'{'".to_string(),
            Token::RBrace => "'}'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Semi => "';'".to_string(),
            Token::Assign => "'='".to_string(),
            Token::Eq => "'=='".to_string(),
            Token::Ne => "'!='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Le => "'<='".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::Ge => "'>='".to_string(),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Percent => "'%'".to_string(),
            Token::AndAnd => "'&&'".to_string(),
            Token::OrOr => "'||'".to_string(),
            Token::Bang => "'!'".to_string(),
        }
    }
}

fn lex(src: &str) -> Result<Vec<Token>, Fault> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '/' {
            let mut ahead = chars.clone();
            ahead.next();
            match ahead.peek() {
                Some('/') => {
                    while let Some(&n) = chars.peek() {
                        chars.next();
                        if n == '\n' {
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    chars.next();
                    let mut prev = '\0';
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if prev == '*' && n == '/' {
                            closed = true;
                            break;
                        }
                        prev = n;
                    }
                    if !closed {
                        return Err(Fault::new("unterminated comment"));
                    }
                    continue;
                }
                _ => {}
            }
        }
        if c.is_ascii_digit() {
            let mut num = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_ascii_digit() || n == '.' {
                    num.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            let value: f64 = num
                .parse()
                .map_err(|_| Fault::new(format!("invalid number: {}", num)))?;
            tokens.push(Token::Num(value));
            continue;
        }
        if c == '"' || c == '\'' {
            chars.next();
            let mut out = String::new();
            let mut closed = false;
            while let Some(n) = chars.next() {
                if n == c {
                    closed = true;
                    break;
                }
                if n == '\\' {
                    match chars.next() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('\\') => out.push('\\'),
                        Some('"') => out.push('"'),
                        Some('\'') => out.push('\''),
                        Some(other) => out.push(other),
                        None => break,
                    }
                } else {
                    out.push(n);
                }
            }
            if !closed {
                return Err(Fault::new("unterminated string"));
            }
            tokens.push(Token::Str(out));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    word.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(match word.as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "let" => Token::Let,
                "if" => Token::If,
                "else" => Token::Else,
                "while" => Token::While,
                "throw" => Token::Throw,
                _ => Token::Ident(word),
            });
            continue;
        }

        chars.next();
        let two = |chars: &mut std::iter::Peekable<std::str::Chars<'_>>, want: char| -> bool {
            if chars.peek() == Some(&want) {
                chars.next();
                true
            } else {
                false
            }
        };
        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            ';' => Token::Semi,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' => {
                if two(&mut chars, '=') {
                    Token::Eq
                } else {
                    Token::Assign
                }
            }
            '!' => {
                if two(&mut chars, '=') {
                    Token::Ne
                } else {
                    Token::Bang
                }
            }
            '<' => {
                if two(&mut chars, '=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if two(&mut chars, '=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' => {
                if two(&mut chars, '&') {
                    Token::AndAnd
                } else {
                    return Err(Fault::new("unexpected character '&'"));
                }
            }
            '|' => {
                if two(&mut chars, '|') {
                    Token::OrOr
                } else {
                    return Err(Fault::new("unexpected character '|'"));
                }
            }
            other => return Err(Fault::new(format!("unexpected character '{}'", other))),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let(String, Expr),
    Assign(String, Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    While(Expr, Vec<Stmt>),
    Throw(Expr),
    Expr(Expr),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), Fault> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(Fault::new(format!(
                "expected {} but found {}",
                want.describe(),
                t.describe()
            ))),
            None => Err(Fault::new(format!(
                "expected {} but reached end of input",
                want.describe()
            ))),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn program(&mut self) -> Result<Vec<Stmt>, Fault> {
        let mut stmts = Vec::new();
        while !self.at_end() {
            if self.peek() == Some(&Token::Semi) {
                self.next();
                continue;
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, Fault> {
        match self.peek() {
            Some(Token::Let) => {
                self.next();
                let name = self.ident()?;
                self.expect(Token::Assign)?;
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Let(name, value))
            }
            Some(Token::If) => self.if_statement(),
            Some(Token::While) => {
                self.next();
                self.expect(Token::LParen)?;
                let cond = self.expression()?;
                self.expect(Token::RParen)?;
                let body = self.block()?;
                Ok(Stmt::While(cond, body))
            }
            Some(Token::Throw) => {
                self.next();
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Throw(value))
            }
            Some(Token::Ident(_)) if self.peek2() == Some(&Token::Assign) => {
                let name = self.ident()?;
                self.next(); // '='
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Assign(name, value))
            }
            Some(_) => {
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Expr(value))
            }
            None => Err(Fault::new("expected a statement but reached end of input")),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, Fault> {
        self.next(); // 'if'
        self.expect(Token::LParen)?;
        let cond = self.expression()?;
        self.expect(Token::RParen)?;
        let then_branch = self.block()?;
        let else_branch = if self.peek() == Some(&Token::Else) {
            self.next();
            if self.peek() == Some(&Token::If) {
                vec![self.if_statement()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If(cond, then_branch, else_branch))
    }

    fn block(&mut self) -> Result<Vec<Stmt>, Fault> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.next();
                    return Ok(stmts);
                }
                Some(Token::Semi) => {
                    self.next();
                }
                Some(_) => stmts.push(self.statement()?),
                None => return Err(Fault::new("expected '}' but reached end of input")),
            }
        }
    }

    fn end_statement(&mut self) {
        if self.peek() == Some(&Token::Semi) {
            self.next();
        }
    }

    fn ident(&mut self) -> Result<String, Fault> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(t) => Err(Fault::new(format!("expected a name but found {}", t.describe()))),
            None => Err(Fault::new("expected a name but reached end of input")),
        }
    }

    fn expression(&mut self) -> Result<Expr, Fault> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, Fault> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::OrOr) {
            self.next();
            let right = self.and_expr()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, Fault> {
        let mut left = self.equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.next();
            let right = self.equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, Fault> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => return Ok(left),
            };
            self.next();
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn comparison(&mut self) -> Result<Expr, Fault> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.next();
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, Fault> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.next();
            let right = self.factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn factor(&mut self) -> Result<Expr, Fault> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.next();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, Fault> {
        match self.peek() {
            Some(Token::Bang) => {
                self.next();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Some(Token::Minus) => {
                self.next();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, Fault> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expression()?);
                            match self.peek() {
                                Some(Token::Comma) => {
                                    self.next();
                                }
                                _ => break,
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(t) => Err(Fault::new(format!(
                "expected an expression but found {}",
                t.describe()
            ))),
            None => Err(Fault::new("expected an expression but reached end of input")),
        }
    }
}

/// Parse the script channel into a statement list.
pub fn parse_program(src: &str) -> Result<Vec<Stmt>, Fault> {
    Parser::new(lex(src)?).program()
}

/// Parse a single assertion expression; trailing tokens are a fault.
pub fn parse_expression(src: &str) -> Result<Expr, Fault> {
    let mut parser = Parser::new(lex(src)?);
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(t) => Err(Fault::new(format!(
            "unexpected {} after expression",
            t.describe()
        ))),
    }
}

/// Variable scope for one run. A single flat scope; blocks do not shadow.
pub type Scope = HashMap<String, Value>;

/// Execute a parsed program against the context.
pub fn run_program(ctx: &mut ExecutionContext, stmts: &[Stmt]) -> Result<(), Fault> {
    for stmt in stmts {
        exec_stmt(ctx, stmt)?;
    }
    Ok(())
}

fn exec_stmt(ctx: &mut ExecutionContext, stmt: &Stmt) -> Result<(), Fault> {
    match stmt {
        Stmt::Let(name, expr) => {
            let value = eval(ctx, expr)?;
            ctx.vars.insert(name.clone(), value);
            Ok(())
        }
        Stmt::Assign(name, expr) => {
            if !ctx.vars.contains_key(name) {
                return Err(Fault::new(format!("assignment to undeclared variable: {}", name)));
            }
            let value = eval(ctx, expr)?;
            ctx.vars.insert(name.clone(), value);
            Ok(())
        }
        Stmt::If(cond, then_branch, else_branch) => {
            if eval(ctx, cond)?.truthy() {
                run_program(ctx, then_branch)
            } else {
                run_program(ctx, else_branch)
            }
        }
        Stmt::While(cond, body) => {
            while eval(ctx, cond)?.truthy() {
                run_program(ctx, body)?;
            }
            Ok(())
        }
        Stmt::Throw(expr) => {
            let value = eval(ctx, expr)?;
            Err(Fault::new(value.render()))
        }
        Stmt::Expr(expr) => {
            eval(ctx, expr)?;
            Ok(())
        }
    }
}

/// Evaluate one expression against the context.
pub fn eval(ctx: &mut ExecutionContext, expr: &Expr) -> Result<Value, Fault> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => ctx
            .vars
            .get(name)
            .cloned()
            .ok_or_else(|| Fault::new(format!("undefined variable: {}", name))),
        Expr::Unary(op, inner) => {
            let value = eval(ctx, inner)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                UnaryOp::Neg => match value {
                    Value::Num(n) => Ok(Value::Num(-n)),
                    other => Err(Fault::new(format!(
                        "type error: cannot negate {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Binary(op, left, right) => eval_binary(ctx, *op, left, right),
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(ctx, arg)?);
            }
            call_builtin(ctx, name, values)
        }
    }
}

fn eval_binary(
    ctx: &mut ExecutionContext,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
) -> Result<Value, Fault> {
    if op == BinaryOp::And {
        let l = eval(ctx, left)?;
        if !l.truthy() {
            return Ok(Value::Bool(false));
        }
        return Ok(Value::Bool(eval(ctx, right)?.truthy()));
    }
    if op == BinaryOp::Or {
        let l = eval(ctx, left)?;
        if l.truthy() {
            return Ok(Value::Bool(true));
        }
        return Ok(Value::Bool(eval(ctx, right)?.truthy()));
    }

    let l = eval(ctx, left)?;
    let r = eval(ctx, right)?;
    match op {
        BinaryOp::Add => match (&l, &r) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Ok(Value::Str(format!("{}{}", l.render(), r.render())))
            }
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
            _ => Err(type_error(op, &l, &r)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => match (&l, &r) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            })),
            _ => Err(type_error(op, &l, &r)),
        },
        BinaryOp::Eq => Ok(Value::Bool(strict_eq(&l, &r))),
        BinaryOp::Ne => Ok(Value::Bool(!strict_eq(&l, &r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (&l, &r) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Bool(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            })),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            })),
            _ => Err(type_error(op, &l, &r)),
        },
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn strict_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => false,
    }
}

fn type_error(op: BinaryOp, l: &Value, r: &Value) -> Fault {
    Fault::new(format!(
        "type error: cannot apply '{}' to {} and {}",
        op.symbol(),
        l.type_name(),
        r.type_name()
    ))
}

fn expect_arity(name: &str, args: &[Value], want: usize) -> Result<(), Fault> {
    if args.len() == want {
        Ok(())
    } else {
        Err(Fault::new(format!(
            "{} expects {} argument{}, got {}",
            name,
            want,
            if want == 1 { "" } else { "s" },
            args.len()
        )))
    }
}

fn str_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, Fault> {
    match &args[index] {
        Value::Str(s) => Ok(s),
        other => Err(Fault::new(format!(
            "{} expects a string argument, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn selector_arg(name: &str, args: &[Value], index: usize) -> Result<Selector, Fault> {
    let raw = str_arg(name, args, index)?;
    Selector::parse(raw).ok_or_else(|| Fault::new(format!("invalid selector: {}", raw)))
}

fn call_builtin(ctx: &mut ExecutionContext, name: &str, args: Vec<Value>) -> Result<Value, Fault> {
    match name {
        "exists" => {
            expect_arity(name, &args, 1)?;
            let sel = selector_arg(name, &args, 0)?;
            Ok(Value::Bool(ctx.document.select_first(&sel).is_some()))
        }
        "count" => {
            expect_arity(name, &args, 1)?;
            let sel = selector_arg(name, &args, 0)?;
            Ok(Value::Num(ctx.document.select(&sel).len() as f64))
        }
        "text" => {
            expect_arity(name, &args, 1)?;
            let sel = selector_arg(name, &args, 0)?;
            Ok(match ctx.document.select_first(&sel) {
                Some(id) => Value::Str(ctx.document.text_content(id).trim().to_string()),
                None => Value::Null,
            })
        }
        "attr" => {
            expect_arity(name, &args, 2)?;
            let sel = selector_arg(name, &args, 0)?;
            let attr_name = str_arg(name, &args, 1)?;
            Ok(match ctx.document.select_first(&sel) {
                Some(id) => match ctx.document.attr(id, attr_name) {
                    Some(v) => Value::Str(v.to_string()),
                    None => Value::Null,
                },
                None => Value::Null,
            })
        }
        "style_of" => {
            expect_arity(name, &args, 2)?;
            let sel = selector_arg(name, &args, 0)?;
            let property = str_arg(name, &args, 1)?;
            Ok(match ctx.document.select_first(&sel) {
                Some(id) => match ctx.sheet.resolve(&ctx.document, id, property) {
                    Some(v) => Value::Str(v),
                    None => Value::Null,
                },
                None => Value::Null,
            })
        }
        "len" => {
            expect_arity(name, &args, 1)?;
            let s = str_arg(name, &args, 0)?;
            Ok(Value::Num(s.chars().count() as f64))
        }
        "contains" => {
            expect_arity(name, &args, 2)?;
            let hay = str_arg(name, &args, 0)?;
            let needle = str_arg(name, &args, 1)?;
            Ok(Value::Bool(hay.contains(needle)))
        }
        "lower" => {
            expect_arity(name, &args, 1)?;
            Ok(Value::Str(str_arg(name, &args, 0)?.to_lowercase()))
        }
        "trim" => {
            expect_arity(name, &args, 1)?;
            Ok(Value::Str(str_arg(name, &args, 0)?.trim().to_string()))
        }
        "type_of" => {
            expect_arity(name, &args, 1)?;
            Ok(Value::Str(args[0].type_name().to_string()))
        }
        "append" => {
            expect_arity(name, &args, 2)?;
            let sel = selector_arg(name, &args, 0)?;
            let tag = str_arg(name, &args, 1)?.trim().to_string();
            if tag.is_empty() {
                return Err(Fault::new("append expects a tag name"));
            }
            match ctx.document.select_first(&sel) {
                Some(parent) => {
                    let child = ctx.document.create_element(&tag, Vec::new());
                    ctx.document.append_child(parent, child);
                    Ok(Value::Bool(true))
                }
                None => Ok(Value::Bool(false)),
            }
        }
        "set_text" => {
            expect_arity(name, &args, 2)?;
            let sel = selector_arg(name, &args, 0)?;
            let text = args[1].render();
            let targets = ctx.document.select(&sel);
            for &id in &targets {
                ctx.document.set_text(id, &text);
            }
            Ok(Value::Num(targets.len() as f64))
        }
        "set_attr" => {
            expect_arity(name, &args, 3)?;
            let sel = selector_arg(name, &args, 0)?;
            let attr_name = str_arg(name, &args, 1)?.to_string();
            let value = args[2].render();
            let targets = ctx.document.select(&sel);
            for &id in &targets {
                ctx.document.set_attr(id, &attr_name, &value);
            }
            Ok(Value::Num(targets.len() as f64))
        }
        "remove" => {
            expect_arity(name, &args, 1)?;
            let sel = selector_arg(name, &args, 0)?;
            let targets = ctx.document.select(&sel);
            for &id in &targets {
                ctx.document.detach(id);
            }
            Ok(Value::Num(targets.len() as f64))
        }
        "log" => {
            expect_arity(name, &args, 1)?;
            let text = args[0].render();
            ctx.emit_log(LogLevel::Info, text);
            Ok(Value::Null)
        }
        "warn" => {
            expect_arity(name, &args, 1)?;
            let text = args[0].render();
            ctx.emit_log(LogLevel::Warn, text);
            Ok(Value::Null)
        }
        _ => Err(Fault::new(format!("unknown function: {}", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionContext;

    fn ctx(markup: &str, style: &str) -> ExecutionContext {
        ExecutionContext::prepare(markup, style)
    }

    fn eval_src(ctx: &mut ExecutionContext, src: &str) -> Result<Value, Fault> {
        let expr = parse_expression(src)?;
        eval(ctx, &expr)
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let mut c = ctx("", "");
        assert_eq!(eval_src(&mut c, "1 + 2 * 3").unwrap(), Value::Num(7.0));
        assert_eq!(eval_src(&mut c, "(1 + 2) * 3").unwrap(), Value::Num(9.0));
        assert_eq!(eval_src(&mut c, "10 % 4").unwrap(), Value::Num(2.0));
        assert_eq!(eval_src(&mut c, "-3 + 1").unwrap(), Value::Num(-2.0));
    }

    #[test]
    fn test_string_concat_and_comparison() {
        let mut c = ctx("", "");
        assert_eq!(
            eval_src(&mut c, "'a' + 1 + true").unwrap(),
            Value::Str("a1true".into())
        );
        assert_eq!(eval_src(&mut c, "'abc' < 'abd'").unwrap(), Value::Bool(true));
        assert_eq!(eval_src(&mut c, "'a' == \"a\"").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_strict_equality_across_types() {
        let mut c = ctx("", "");
        assert_eq!(eval_src(&mut c, "1 == '1'").unwrap(), Value::Bool(false));
        assert_eq!(eval_src(&mut c, "null == false").unwrap(), Value::Bool(false));
        assert_eq!(eval_src(&mut c, "1 != '1'").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_truthiness() {
        let mut c = ctx("", "");
        for (src, want) in [
            ("!0", true),
            ("!''", true),
            ("!null", true),
            ("!1", false),
            ("!'x'", false),
        ] {
            assert_eq!(eval_src(&mut c, src).unwrap(), Value::Bool(want), "{}", src);
        }
    }

    #[test]
    fn test_short_circuit() {
        let mut c = ctx("", "");
        // Right side would fault if evaluated.
        assert_eq!(
            eval_src(&mut c, "false && missing_fn()").unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            eval_src(&mut c, "true || missing_fn()").unwrap(),
            Value::Bool(true)
        );
        assert!(eval_src(&mut c, "true && missing_fn()").is_err());
    }

    #[test]
    fn test_type_errors_fault() {
        let mut c = ctx("", "");
        let err = eval_src(&mut c, "true - 1").unwrap_err();
        assert!(err.message.contains("type error"), "{}", err.message);
        assert!(eval_src(&mut c, "1 < 'a'").is_err());
        assert!(eval_src(&mut c, "-'a'").is_err());
    }

    #[test]
    fn test_undefined_names_fault() {
        let mut c = ctx("", "");
        let err = eval_src(&mut c, "nope").unwrap_err();
        assert_eq!(err.message, "undefined variable: nope");
        let err = eval_src(&mut c, "mystery(1)").unwrap_err();
        assert_eq!(err.message, "unknown function: mystery");
    }

    #[test]
    fn test_parse_errors_fault() {
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("(1").is_err());
        assert!(parse_expression("1 2").is_err());
        assert!(parse_program("let = 3").is_err());
        assert!(parse_program("if true {}").is_err());
        assert!(parse_program("'unterminated").is_err());
    }

    #[test]
    fn test_program_let_if_while() {
        let mut c = ctx("", "");
        let program = parse_program(
            "let total = 0; let i = 0; while (i < 5) { total = total + i; i = i + 1 } \
             if (total > 5) { let big = true } else { let big = false }",
        )
        .unwrap();
        run_program(&mut c, &program).unwrap();
        assert_eq!(c.vars.get("total"), Some(&Value::Num(10.0)));
        assert_eq!(c.vars.get("big"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_else_if_chain() {
        let mut c = ctx("", "");
        let program = parse_program(
            "let n = 2; let kind = ''; \
             if (n == 1) { kind = 'one' } else if (n == 2) { kind = 'two' } else { kind = 'many' }",
        )
        .unwrap();
        run_program(&mut c, &program).unwrap();
        assert_eq!(c.vars.get("kind"), Some(&Value::Str("two".into())));
    }

    #[test]
    fn test_assignment_to_undeclared_faults() {
        let mut c = ctx("", "");
        let program = parse_program("ghost = 1").unwrap();
        let err = run_program(&mut c, &program).unwrap_err();
        assert_eq!(err.message, "assignment to undeclared variable: ghost");
    }

    #[test]
    fn test_throw_renders_value() {
        let mut c = ctx("", "");
        let program = parse_program("throw 'custom failure'").unwrap();
        assert_eq!(
            run_program(&mut c, &program).unwrap_err().message,
            "custom failure"
        );
        let program = parse_program("throw 40 + 2").unwrap();
        assert_eq!(run_program(&mut c, &program).unwrap_err().message, "42");
    }

    #[test]
    fn test_document_introspection_builtins() {
        let mut c = ctx(
            "<div id=\"root\"><h1 class=\"big\">Hello</h1><p>one</p><p>two</p></div>",
            "h1 { color: red }",
        );
        assert_eq!(eval_src(&mut c, "exists('h1')").unwrap(), Value::Bool(true));
        assert_eq!(eval_src(&mut c, "exists('h2')").unwrap(), Value::Bool(false));
        assert_eq!(eval_src(&mut c, "count('p')").unwrap(), Value::Num(2.0));
        assert_eq!(
            eval_src(&mut c, "text('#root h1')").unwrap(),
            Value::Str("Hello".into())
        );
        assert_eq!(eval_src(&mut c, "text('h2')").unwrap(), Value::Null);
        assert_eq!(
            eval_src(&mut c, "attr('h1', 'class')").unwrap(),
            Value::Str("big".into())
        );
        assert_eq!(eval_src(&mut c, "attr('h1', 'id')").unwrap(), Value::Null);
        assert_eq!(
            eval_src(&mut c, "style_of('h1', 'color')").unwrap(),
            Value::Str("red".into())
        );
        assert_eq!(eval_src(&mut c, "style_of('p', 'color')").unwrap(), Value::Null);
    }

    #[test]
    fn test_string_builtins() {
        let mut c = ctx("", "");
        assert_eq!(eval_src(&mut c, "len('abc')").unwrap(), Value::Num(3.0));
        assert_eq!(
            eval_src(&mut c, "contains('hello world', 'wor')").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_src(&mut c, "lower('MiXeD')").unwrap(),
            Value::Str("mixed".into())
        );
        assert_eq!(
            eval_src(&mut c, "trim('  x  ')").unwrap(),
            Value::Str("x".into())
        );
        assert_eq!(
            eval_src(&mut c, "type_of(1)").unwrap(),
            Value::Str("number".into())
        );
        assert!(eval_src(&mut c, "len(3)").is_err());
    }

    #[test]
    fn test_mutation_builtins() {
        let mut c = ctx("<ul id=\"menu\"><li>a</li></ul>", "");
        assert_eq!(
            eval_src(&mut c, "append('#menu', 'li')").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(eval_src(&mut c, "count('#menu li')").unwrap(), Value::Num(2.0));
        assert_eq!(
            eval_src(&mut c, "set_text('#menu li', 'item')").unwrap(),
            Value::Num(2.0)
        );
        assert_eq!(
            eval_src(&mut c, "text('#menu')").unwrap(),
            Value::Str("itemitem".into())
        );
        assert_eq!(
            eval_src(&mut c, "set_attr('li', 'class', 'entry')").unwrap(),
            Value::Num(2.0)
        );
        assert_eq!(eval_src(&mut c, "count('.entry')").unwrap(), Value::Num(2.0));
        assert_eq!(eval_src(&mut c, "remove('li')").unwrap(), Value::Num(2.0));
        assert_eq!(eval_src(&mut c, "exists('li')").unwrap(), Value::Bool(false));
        assert_eq!(
            eval_src(&mut c, "append('#gone', 'li')").unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_invalid_selector_faults() {
        let mut c = ctx("<p>x</p>", "");
        let err = eval_src(&mut c, "exists('p > span')").unwrap_err();
        assert!(err.message.starts_with("invalid selector"), "{}", err.message);
        assert!(eval_src(&mut c, "exists(3)").is_err());
    }

    #[test]
    fn test_log_builtins_capture() {
        let mut c = ctx("", "");
        let program = parse_program("log('step ' + 1); warn('careful')").unwrap();
        run_program(&mut c, &program).unwrap();
        let logs = c.take_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].text, "step 1");
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[1].level, LogLevel::Warn);
    }

    #[test]
    fn test_arity_mismatch_faults() {
        let mut c = ctx("", "");
        let err = eval_src(&mut c, "exists()").unwrap_err();
        assert!(err.message.contains("expects 1 argument"), "{}", err.message);
        assert!(eval_src(&mut c, "attr('p')").is_err());
    }

    #[test]
    fn test_comments_ignored() {
        let mut c = ctx("", "");
        let program = parse_program("// lead\nlet x = 1; /* mid */ x = x + 1").unwrap();
        run_program(&mut c, &program).unwrap();
        assert_eq!(c.vars.get("x"), Some(&Value::Num(2.0)));
    }

    #[test]
    fn test_value_render() {
        assert_eq!(Value::Num(3.0).render(), "3");
        assert_eq!(Value::Num(3.5).render(), "3.5");
        assert_eq!(Value::Bool(true).render(), "true");
        assert_eq!(Value::Null.render(), "null");
        assert_eq!(Value::Str("s".into()).render(), "s");
    }
}
