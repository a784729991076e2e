//! Tokenizer for kernel scripts.
//!
//! Newlines are significant (they separate statements) except inside
//! parentheses and brackets, where expressions may span lines freely.

use super::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    // Keywords
    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Pass,
    And,
    Or,
    Not,
    True,
    False,
    None,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semi,
    Newline,

    // Operators
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    Eof,
}

impl Tok {
    /// Short human-readable form used in syntax error messages.
    pub fn describe(&self) -> String {
        match self {
            Tok::Int(n) => n.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Ident(name) => format!("'{name}'"),
            Tok::Newline => "newline".to_string(),
            Tok::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Tok::Def => "def",
            Tok::Return => "return",
            Tok::If => "if",
            Tok::Elif => "elif",
            Tok::Else => "else",
            Tok::While => "while",
            Tok::For => "for",
            Tok::In => "in",
            Tok::Break => "break",
            Tok::Continue => "continue",
            Tok::Pass => "pass",
            Tok::And => "and",
            Tok::Or => "or",
            Tok::Not => "not",
            Tok::True => "True",
            Tok::False => "False",
            Tok::None => "None",
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::LBracket => "[",
            Tok::RBracket => "]",
            Tok::LBrace => "{",
            Tok::RBrace => "}",
            Tok::Comma => ",",
            Tok::Colon => ":",
            Tok::Dot => ".",
            Tok::Semi => ";",
            Tok::Assign => "=",
            Tok::PlusAssign => "+=",
            Tok::MinusAssign => "-=",
            Tok::StarAssign => "*=",
            Tok::SlashAssign => "/=",
            Tok::Plus => "+",
            Tok::Minus => "-",
            Tok::Star => "*",
            Tok::StarStar => "**",
            Tok::Slash => "/",
            Tok::SlashSlash => "//",
            Tok::Percent => "%",
            Tok::Eq => "==",
            Tok::Ne => "!=",
            Tok::Lt => "<",
            Tok::Le => "<=",
            Tok::Gt => ">",
            Tok::Ge => ">=",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

fn keyword(word: &str) -> Option<Tok> {
    let tok = match word {
        "def" => Tok::Def,
        "return" => Tok::Return,
        "if" => Tok::If,
        "elif" => Tok::Elif,
        "else" => Tok::Else,
        "while" => Tok::While,
        "for" => Tok::For,
        "in" => Tok::In,
        "break" => Tok::Break,
        "continue" => Tok::Continue,
        "pass" => Tok::Pass,
        "and" => Tok::And,
        "or" => Tok::Or,
        "not" => Tok::Not,
        "True" => Tok::True,
        "False" => Tok::False,
        "None" => Tok::None,
        _ => return None,
    };
    Some(tok)
}

/// True if `word` lexes as one identifier rather than a keyword.
pub fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_') && keyword(word).is_none()
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(src).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    /// Depth of open `(` / `[`; newlines are insignificant while > 0.
    group_depth: usize,
    out: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            group_depth: 0,
            out: Vec::new(),
        }
    }

    fn push(&mut self, tok: Tok) {
        self.out.push(Token {
            tok,
            line: self.line,
        });
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(c) = self.chars.next() {
            match c {
                '\n' => {
                    if self.group_depth == 0 {
                        self.push(Tok::Newline);
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => {}
                '#' => {
                    while let Some(&next) = self.chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '\\' if self.chars.peek() == Some(&'\n') => {
                    // explicit line continuation
                    self.chars.next();
                    self.line += 1;
                }
                '0'..='9' => self.number(c)?,
                '"' | '\'' => self.string(c)?,
                c if c.is_alphabetic() || c == '_' => self.word(c),
                '(' | '[' => {
                    self.group_depth += 1;
                    self.push(if c == '(' { Tok::LParen } else { Tok::LBracket });
                }
                ')' | ']' => {
                    self.group_depth = self.group_depth.saturating_sub(1);
                    self.push(if c == ')' { Tok::RParen } else { Tok::RBracket });
                }
                '{' => self.push(Tok::LBrace),
                '}' => self.push(Tok::RBrace),
                ',' => self.push(Tok::Comma),
                ':' => self.push(Tok::Colon),
                '.' => self.push(Tok::Dot),
                ';' => self.push(Tok::Semi),
                '+' => {
                    let tok = if self.eat('=') { Tok::PlusAssign } else { Tok::Plus };
                    self.push(tok);
                }
                '-' => {
                    let tok = if self.eat('=') { Tok::MinusAssign } else { Tok::Minus };
                    self.push(tok);
                }
                '*' => {
                    let tok = if self.eat('*') {
                        Tok::StarStar
                    } else if self.eat('=') {
                        Tok::StarAssign
                    } else {
                        Tok::Star
                    };
                    self.push(tok);
                }
                '/' => {
                    let tok = if self.eat('/') {
                        Tok::SlashSlash
                    } else if self.eat('=') {
                        Tok::SlashAssign
                    } else {
                        Tok::Slash
                    };
                    self.push(tok);
                }
                '%' => self.push(Tok::Percent),
                '=' => {
                    let tok = if self.eat('=') { Tok::Eq } else { Tok::Assign };
                    self.push(tok);
                }
                '!' if self.eat('=') => self.push(Tok::Ne),
                '<' => {
                    let tok = if self.eat('=') { Tok::Le } else { Tok::Lt };
                    self.push(tok);
                }
                '>' => {
                    let tok = if self.eat('=') { Tok::Ge } else { Tok::Gt };
                    self.push(tok);
                }
                other => {
                    return Err(ParseError::new(
                        format!("invalid character '{other}'"),
                        self.line,
                    ))
                }
            }
        }
        self.push(Tok::Eof);
        Ok(self.out)
    }

    fn number(&mut self, first: char) -> Result<(), ParseError> {
        let mut text = String::from(first);
        let mut is_float = false;

        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.chars.next();
            } else if c == '.' && !is_float {
                // `1.` followed by a method name is not a float
                let mut lookahead = self.chars.clone();
                lookahead.next();
                match lookahead.peek() {
                    Some(d) if d.is_ascii_digit() => {
                        is_float = true;
                        text.push('.');
                        self.chars.next();
                    }
                    _ => break,
                }
            } else if c == 'e' || c == 'E' {
                let mut lookahead = self.chars.clone();
                lookahead.next();
                let signed = matches!(lookahead.peek(), Some('+') | Some('-'));
                if signed {
                    lookahead.next();
                }
                if !matches!(lookahead.peek(), Some(d) if d.is_ascii_digit()) {
                    break;
                }
                is_float = true;
                text.push('e');
                self.chars.next();
                if signed {
                    if let Some(sign) = self.chars.next() {
                        text.push(sign);
                    }
                }
            } else {
                break;
            }
        }

        let tok = if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| ParseError::new(format!("invalid number '{text}'"), self.line))?
        } else {
            text.parse::<i64>().map(Tok::Int).map_err(|_| {
                ParseError::new(format!("integer literal too large: {text}"), self.line)
            })?
        };
        self.push(tok);
        Ok(())
    }

    fn string(&mut self, quote: char) -> Result<(), ParseError> {
        let start_line = self.line;
        let mut text = String::new();
        loop {
            let c = self.chars.next().ok_or_else(|| {
                ParseError::new("unterminated string literal", start_line)
            })?;
            match c {
                c if c == quote => break,
                '\n' => return Err(ParseError::new("unterminated string literal", start_line)),
                '\\' => {
                    let esc = self.chars.next().ok_or_else(|| {
                        ParseError::new("unterminated string literal", start_line)
                    })?;
                    match esc {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        '0' => text.push('\0'),
                        'b' => text.push('\u{8}'),
                        'f' => text.push('\u{c}'),
                        '\\' => text.push('\\'),
                        '\'' => text.push('\''),
                        '"' => text.push('"'),
                        '/' => text.push('/'),
                        '\n' => self.line += 1,
                        'u' => text.push(self.unicode_escape()?),
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                }
                other => text.push(other),
            }
        }
        self.push(Tok::Str(text));
        Ok(())
    }

    fn unicode_escape(&mut self) -> Result<char, ParseError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .chars
                .next()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| ParseError::new("truncated \\uXXXX escape", self.line))?;
            code = code * 16 + digit;
        }
        char::from_u32(code)
            .ok_or_else(|| ParseError::new(format!("invalid \\u{code:04x} escape"), self.line))
    }

    fn word(&mut self, first: char) {
        let mut word = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        let tok = keyword(&word).unwrap_or(Tok::Ident(word));
        self.push(tok);
    }
}
