//! Recursive-descent parser for kernel scripts.
//!
//! Two entry points mirror the REPL contract: [`parse_expression`] accepts
//! only a source that is exactly one expression, [`parse_program`] accepts
//! any statement sequence.

use std::rc::Rc;

use super::ast::{BinOp, CmpOp, Expr, FunctionDef, Stmt, Target, UnaryOp};
use super::lexer::{tokenize, Tok, Token};

/// Maximum syntactic nesting (brackets, blocks, unary chains).
const MAX_NESTING: usize = 64;

/// Maximum number of operator and postfix links open at once. Each link
/// adds a level to the expression tree, so this bounds evaluation depth.
const MAX_CHAIN: usize = 1000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} (line {line})")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// Parses `src` as a single expression. Fails if anything but blank lines
/// follows the expression.
pub fn parse_expression(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(tokenize(src)?);
    parser.skip_newlines();
    let expr = parser.expression()?;
    parser.skip_newlines();
    parser.expect_eof()?;
    Ok(expr)
}

/// Parses `src` as a sequence of statements.
pub fn parse_program(src: &str) -> Result<Vec<Stmt>, ParseError> {
    let mut parser = Parser::new(tokenize(src)?);
    parser.statements(false)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    chain: usize,
    loop_depth: usize,
    fn_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            chain: 0,
            loop_depth: 0,
            fn_depth: 0,
        }
    }

    // ── Token cursor ─────────────────────────────────────

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_next(&self) -> &Tok {
        let idx = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if tok != Tok::Eof {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), ParseError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", tok.describe())))
        }
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if *self.peek() == Tok::Eof {
            Ok(())
        } else {
            Err(self.unexpected("expected end of input"))
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("expected identifier")),
        }
    }

    fn unexpected(&self, context: &str) -> ParseError {
        ParseError::new(
            format!("invalid syntax: {context}, found {}", self.peek().describe()),
            self.line(),
        )
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == Tok::Newline {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Tok::Newline | Tok::Semi) {
            self.advance();
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ParseError::new("too many nested levels", self.line()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn link(&mut self, links: &mut usize) -> Result<(), ParseError> {
        *links += 1;
        self.chain += 1;
        if self.chain > MAX_CHAIN {
            return Err(ParseError::new("expression too complex", self.line()));
        }
        Ok(())
    }

    fn unlink(&mut self, links: usize) {
        self.chain -= links;
    }

    // ── Statements ───────────────────────────────────────

    fn statements(&mut self, in_block: bool) -> Result<Vec<Stmt>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                Tok::Eof if in_block => return Err(self.unexpected("expected '}'")),
                Tok::Eof => break,
                Tok::RBrace if in_block => break,
                _ => {}
            }
            out.push(self.statement()?);
            match self.peek() {
                Tok::Newline | Tok::Semi | Tok::Eof => {}
                Tok::RBrace if in_block => {}
                _ => return Err(self.unexpected("expected end of statement")),
            }
        }
        Ok(out)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.enter()?;
        self.expect(Tok::LBrace)?;
        let body = self.statements(true)?;
        self.expect(Tok::RBrace)?;
        self.leave();
        Ok(body)
    }

    fn loop_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Tok::Def => self.function_def(),
            Tok::If => self.if_statement(),
            Tok::While => {
                self.advance();
                let cond = self.expression()?;
                let body = self.loop_body()?;
                Ok(Stmt::While(cond, body))
            }
            Tok::For => {
                self.advance();
                let var = self.ident()?;
                self.expect(Tok::In)?;
                let iter = self.expression()?;
                let body = self.loop_body()?;
                Ok(Stmt::For(var, iter, body))
            }
            Tok::Return => {
                if self.fn_depth == 0 {
                    return Err(ParseError::new("'return' outside function", self.line()));
                }
                self.advance();
                if matches!(
                    self.peek(),
                    Tok::Newline | Tok::Semi | Tok::RBrace | Tok::Eof
                ) {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.expression()?)))
                }
            }
            Tok::Break | Tok::Continue => {
                let keyword = self.advance();
                if self.loop_depth == 0 {
                    return Err(ParseError::new(
                        format!("{} outside loop", keyword.describe()),
                        self.line(),
                    ));
                }
                Ok(if keyword == Tok::Break {
                    Stmt::Break
                } else {
                    Stmt::Continue
                })
            }
            Tok::Pass => {
                self.advance();
                Ok(Stmt::Pass)
            }
            _ => self.simple_statement(),
        }
    }

    fn simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expression()?;
        let aug = match self.peek() {
            Tok::Assign => {
                self.advance();
                let target = self.target(expr)?;
                let value = self.expression()?;
                return Ok(Stmt::Assign(target, value));
            }
            Tok::PlusAssign => BinOp::Add,
            Tok::MinusAssign => BinOp::Sub,
            Tok::StarAssign => BinOp::Mul,
            Tok::SlashAssign => BinOp::Div,
            _ => return Ok(Stmt::Expr(expr)),
        };
        self.advance();
        let target = self.target(expr)?;
        let value = self.expression()?;
        Ok(Stmt::AugAssign(target, aug, value))
    }

    fn target(&self, expr: Expr) -> Result<Target, ParseError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Index(obj, index) => Ok(Target::Index(*obj, *index)),
            _ => Err(ParseError::new("cannot assign to expression", self.line())),
        }
    }

    fn function_def(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let name = self.ident()?;
        self.expect(Tok::LParen)?;
        let mut params: Vec<String> = Vec::new();
        while *self.peek() != Tok::RParen {
            let param = self.ident()?;
            if params.contains(&param) {
                return Err(ParseError::new(
                    format!("duplicate argument '{param}' in function definition"),
                    self.line(),
                ));
            }
            params.push(param);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen)?;

        let outer_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.fn_depth += 1;
        let body = self.block();
        self.fn_depth -= 1;
        self.loop_depth = outer_loops;

        Ok(Stmt::Def(Rc::new(FunctionDef {
            name,
            params,
            body: body?,
        })))
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let cond = self.expression()?;
        let body = self.block()?;
        let mut branches = vec![(cond, body)];
        let mut otherwise = None;

        loop {
            let save = self.pos;
            self.skip_newlines();
            match self.peek() {
                Tok::Elif => {
                    self.advance();
                }
                Tok::Else if *self.peek_next() == Tok::If => {
                    self.advance();
                    self.advance();
                }
                Tok::Else => {
                    self.advance();
                    otherwise = Some(self.block()?);
                    break;
                }
                _ => {
                    self.pos = save;
                    break;
                }
            }
            let cond = self.expression()?;
            let body = self.block()?;
            branches.push((cond, body));
        }

        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    // ── Expressions ──────────────────────────────────────

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = self.or_expr()?;
        self.leave();
        Ok(expr)
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        let mut links = 0;
        while self.eat(&Tok::Or) {
            self.link(&mut links)?;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.unlink(links);
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        let mut links = 0;
        while self.eat(&Tok::And) {
            self.link(&mut links)?;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.unlink(links);
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Tok::Not) {
            self.enter()?;
            let inner = self.not_expr()?;
            self.leave();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Eq => CmpOp::Eq,
                Tok::Ne => CmpOp::Ne,
                Tok::Lt => CmpOp::Lt,
                Tok::Le => CmpOp::Le,
                Tok::Gt => CmpOp::Gt,
                Tok::Ge => CmpOp::Ge,
                Tok::In => CmpOp::In,
                Tok::Not if *self.peek_next() == Tok::In => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.additive()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), rest))
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.link(&mut links)?;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.unlink(links);
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::SlashSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.link(&mut links)?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.unlink(links);
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Plus => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat(&Tok::StarStar) {
            self.enter()?;
            let exponent = self.unary()?;
            self.leave();
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        let mut links = 0;
        loop {
            if matches!(self.peek(), Tok::LParen | Tok::LBracket | Tok::Dot) {
                self.link(&mut links)?;
            }
            match self.peek() {
                Tok::LParen => {
                    self.advance();
                    let args = self.sequence(Tok::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                Tok::LBracket => {
                    self.advance();
                    expr = self.subscript(expr)?;
                }
                Tok::Dot => {
                    self.advance();
                    let name = self.ident()?;
                    expr = Expr::Attr(Box::new(expr), name);
                }
                _ => break,
            }
        }
        self.unlink(links);
        Ok(expr)
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, ParseError> {
        let start = if *self.peek() == Tok::Colon {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        if self.eat(&Tok::Colon) {
            let end = if *self.peek() == Tok::RBracket {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            self.expect(Tok::RBracket)?;
            return Ok(Expr::Slice(Box::new(target), start, end));
        }
        self.expect(Tok::RBracket)?;
        match start {
            Some(index) => Ok(Expr::Index(Box::new(target), index)),
            None => Err(self.unexpected("expected index")),
        }
    }

    /// Comma-separated expressions up to `close` (trailing comma allowed).
    fn sequence(&mut self, close: Tok) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        self.skip_newlines();
        while *self.peek() != close {
            items.push(self.expression()?);
            self.skip_newlines();
            if !self.eat(&Tok::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(close)?;
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let expr = match self.peek().clone() {
            Tok::Int(n) => Expr::Int(n),
            Tok::Float(f) => Expr::Float(f),
            Tok::Str(s) => Expr::Str(s),
            Tok::True => Expr::Bool(true),
            Tok::False => Expr::Bool(false),
            Tok::None => Expr::None,
            Tok::Ident(name) => Expr::Name(name),
            Tok::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(Tok::RParen)?;
                return Ok(inner);
            }
            Tok::LBracket => {
                self.advance();
                self.enter()?;
                let items = self.sequence(Tok::RBracket)?;
                self.leave();
                return Ok(Expr::List(items));
            }
            Tok::LBrace => {
                self.advance();
                self.enter()?;
                let entries = self.dict_entries()?;
                self.leave();
                return Ok(Expr::Dict(entries));
            }
            _ => return Err(self.unexpected("expected expression")),
        };
        self.advance();
        Ok(expr)
    }

    fn dict_entries(&mut self) -> Result<Vec<(Expr, Expr)>, ParseError> {
        let mut entries = Vec::new();
        self.skip_newlines();
        while *self.peek() != Tok::RBrace {
            let key = self.expression()?;
            self.skip_newlines();
            self.expect(Tok::Colon)?;
            self.skip_newlines();
            let value = self.expression()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.eat(&Tok::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(Tok::RBrace)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_classification() {
        assert!(parse_expression("2+2").is_ok());
        assert!(parse_expression("f(1)\n\n").is_ok());
        assert!(parse_expression("x = 2 + 2").is_err());
        assert!(parse_expression("a; b").is_err());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("print(1)\nprint(2)").is_err());
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Int(2)),
                    Box::new(Expr::Int(3))
                ))
            )
        );
    }

    #[test]
    fn test_negative_power_binds_tighter() {
        let expr = parse_expression("-2 ** 2").unwrap();
        assert!(matches!(expr, Expr::Unary(UnaryOp::Neg, _)));
    }

    #[test]
    fn test_not_in_comparison() {
        let expr = parse_expression("'a' not in xs").unwrap();
        match expr {
            Expr::Compare(_, rest) => assert_eq!(rest[0].0, CmpOp::NotIn),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_program_statements() {
        let program = parse_program("_secret = 1; visible = 2").unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(&program[0], Stmt::Assign(Target::Name(n), _) if n == "_secret"));
    }

    #[test]
    fn test_function_and_control_flow() {
        let src = "def f(n) {\n  if n < 2 { return n }\n  else { return f(n - 1) + f(n - 2) }\n}\nfor i in range(3) { if i == 1 { continue } }";
        let program = parse_program(src).unwrap();
        assert_eq!(program.len(), 2);
        match &program[0] {
            Stmt::Def(def) => {
                assert_eq!(def.name, "f");
                assert_eq!(def.params, vec!["n".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_elif_chain_across_lines() {
        let src = "if a {\n x = 1\n}\nelif b {\n x = 2\n}\nelse {\n x = 3\n}";
        match &parse_program(src).unwrap()[0] {
            Stmt::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert!(otherwise.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_multiline_dict_literal() {
        let program = parse_program("d = {\n  'a': 1,\n  'b': [1,\n 2],\n}").unwrap();
        match &program[0] {
            Stmt::Assign(_, Expr::Dict(entries)) => assert_eq!(entries.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_index_and_aug_assignment() {
        let program = parse_program("xs[0] = 5\nn += 1").unwrap();
        assert!(matches!(&program[0], Stmt::Assign(Target::Index(..), _)));
        assert!(matches!(&program[1], Stmt::AugAssign(Target::Name(_), BinOp::Add, _)));
    }

    #[test]
    fn test_slices() {
        assert!(matches!(
            parse_expression("s[1:]").unwrap(),
            Expr::Slice(_, Some(_), None)
        ));
        assert!(matches!(
            parse_expression("s[:2]").unwrap(),
            Expr::Slice(_, None, Some(_))
        ));
    }

    #[test]
    fn test_misplaced_control_flow_is_rejected() {
        assert!(parse_program("return 1").is_err());
        assert!(parse_program("break").is_err());
        assert!(parse_program("while True { def f() { break } }").is_err());
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_program("f() = 1").unwrap_err();
        assert!(err.message.contains("cannot assign"));
    }

    #[test]
    fn test_deep_nesting_is_an_error_not_a_crash() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse_expression(&src).is_err());
        let src = format!("{}1", "-".repeat(500));
        assert!(parse_expression(&src).is_err());
    }

    #[test]
    fn test_long_operator_chain_is_an_error() {
        let src = format!("1{}", "+1".repeat(100_000));
        let err = parse_expression(&src).unwrap_err();
        assert_eq!(err.message, "expression too complex");
        let src = format!("x{}", ".y".repeat(5_000));
        assert!(parse_expression(&src).is_err());
        let src = format!("f{}", "()".repeat(5_000));
        assert!(parse_program(&src).is_err());
    }

    #[test]
    fn test_chain_budget_is_per_expression() {
        let line = format!("x = 1{}\n", "+1".repeat(500));
        assert!(parse_program(&line.repeat(50)).is_ok());
    }

    #[test]
    fn test_missing_brace_reports_error() {
        let err = parse_program("if x {\n y = 1\n").unwrap_err();
        assert!(err.message.contains("expected '}'"));
    }
}
