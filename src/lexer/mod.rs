//! Tokeniser for the scenario source language.
//!
//! Two modes. **Default mode** recognises the full grammar token set
//! (keywords, identifiers, numbers, durations, strings, `${var}`
//! references, operators, punctuation). **Curl mode** is entered right
//! after a `curl` keyword is emitted and produces whitespace-separated
//! words verbatim — it exists because a curl command line is itself a
//! small, unrelated grammar (flags, urls, shell quoting) that the main
//! grammar shouldn't have to model token-by-token.

pub mod error;

use error::{LexError, Position};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident,
    Number,
    Duration(DurationUnit),
    Str,
    VarRef,
    Keyword(Keyword),
    Op(Op),
    Punct(Punct),
    /// A whitespace-delimited lexeme produced only in curl mode.
    CurlWord,
    Newline,
    Comment,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Ms,
    S,
    M,
    H,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Request,
    Scenario,
    Load,
    Run,
    If,
    Else,
    Assert,
    Extract,
    Retry,
    Curl,
    Vus,
    Rps,
    For,
    Iterations,
    With,
    In,
    Status,
    Latency,
    Body,
    Think,
    True,
    False,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Keyword> {
        use Keyword::*;
        Some(match word {
            "var" => Var,
            "request" => Request,
            "scenario" => Scenario,
            "load" => Load,
            "run" => Run,
            "if" => If,
            "else" => Else,
            "assert" => Assert,
            "extract" => Extract,
            "retry" => Retry,
            "curl" => Curl,
            "vus" => Vus,
            "rps" => Rps,
            "for" => For,
            "iterations" => Iterations,
            "with" => With,
            "in" => In,
            "status" => Status,
            "latency" => Latency,
            "body" => Body,
            "think" => Think,
            "true" => True,
            "false" => False,
            // max_attempts, backoff, base_delay are deliberately absent: the
            // grammar treats them as plain identifiers everywhere.
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Assign,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Arrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Colon,
    Pipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Default,
    Curl,
}

pub struct Lexer {
    chars: Vec<char>,
    idx: usize,
    line: u32,
    col: u32,
    mode: Mode,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            idx: 0,
            line: 1,
            col: 1,
            mode: Mode::Default,
        }
    }

    /// Tokenises the whole source, stopping at (and including) `Eof`.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn pos(&self) -> Position {
        Position {
            line: self.line,
            col: self.col,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.idx + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.idx += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn rest_starts_with_word(&self, word: &str) -> bool {
        let chars: Vec<char> = word.chars().collect();
        for (i, c) in chars.iter().enumerate() {
            if self.peek_at(i) != Some(*c) {
                return false;
            }
        }
        !matches!(self.peek_at(chars.len()), Some(c) if is_ident_continue(c))
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        match self.mode {
            Mode::Default => self.next_default_token(),
            Mode::Curl => self.next_curl_token(),
        }
    }

    // ------------------------------------------------------------------
    // Default mode
    // ------------------------------------------------------------------

    fn next_default_token(&mut self) -> Result<Token, LexError> {
        self.skip_inline_whitespace();
        let start = self.pos();

        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                pos: start,
            });
        };

        if c == '\n' {
            self.bump();
            return Ok(tok(TokenKind::Newline, "\n", start));
        }

        if c == '#' {
            return Ok(self.lex_comment(start));
        }

        if c == '"' || c == '\'' {
            return self.lex_string(start, c);
        }

        if c == '$' && self.peek_at(1) == Some('{') {
            return self.lex_var_ref(start);
        }

        if c.is_ascii_digit() {
            return self.lex_number_or_duration(start);
        }

        if is_ident_start(c) {
            return Ok(self.lex_ident_or_keyword(start, Mode::Default));
        }

        self.lex_operator_or_punct(start)
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
            self.bump();
        }
    }

    fn lex_comment(&mut self, start: Position) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.bump();
        }
        tok(TokenKind::Comment, &text, start)
    }

    fn lex_string(&mut self, start: Position, quote: char) -> Result<Token, LexError> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexError::UnterminatedString { pos: start });
                }
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('\\') => text.push('\\'),
                        Some(q) if q == quote => text.push(q),
                        Some(other) => text.push(other),
                        None => return Err(LexError::UnterminatedString { pos: start }),
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
            }
        }
        Ok(tok(TokenKind::Str, &text, start))
    }

    fn lex_var_ref(&mut self, start: Position) -> Result<Token, LexError> {
        self.bump(); // '$'
        self.bump(); // '{'
        let mut name = String::new();
        loop {
            match self.peek() {
                Some('}') => {
                    self.bump();
                    break;
                }
                None | Some('\n') => return Err(LexError::UnterminatedVarRef { pos: start }),
                Some(c) => {
                    name.push(c);
                    self.bump();
                }
            }
        }
        if name.is_empty() {
            return Err(LexError::EmptyVarRef { pos: start });
        }
        Ok(tok(TokenKind::VarRef, &name, start))
    }

    fn lex_number_or_duration(&mut self, start: Position) -> Result<Token, LexError> {
        let mut digits = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            digits.push(self.bump().unwrap());
        }

        let unit = if self.rest_starts_with_unit("ms") {
            Some((DurationUnit::Ms, 2))
        } else if self.rest_starts_with_unit("s") {
            Some((DurationUnit::S, 1))
        } else if self.rest_starts_with_unit("m") {
            Some((DurationUnit::M, 1))
        } else if self.rest_starts_with_unit("h") {
            Some((DurationUnit::H, 1))
        } else {
            None
        };

        if let Some((unit, len)) = unit {
            for _ in 0..len {
                self.bump();
            }
            return Ok(tok(TokenKind::Duration(unit), &digits, start));
        }

        if matches!(self.peek(), Some(c) if is_ident_start(c)) {
            return Err(LexError::InvalidDurationSuffix { pos: self.pos() });
        }

        Ok(tok(TokenKind::Number, &digits, start))
    }

    fn rest_starts_with_unit(&self, unit: &str) -> bool {
        let chars: Vec<char> = unit.chars().collect();
        for (i, c) in chars.iter().enumerate() {
            if self.peek_at(i) != Some(*c) {
                return false;
            }
        }
        !matches!(self.peek_at(chars.len()), Some(c) if is_ident_continue(c))
    }

    fn lex_ident_or_keyword(&mut self, start: Position, entering_from: Mode) -> Token {
        let mut word = String::new();
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            word.push(self.bump().unwrap());
        }
        if let Some(kw) = Keyword::lookup(&word) {
            if kw == Keyword::Curl && entering_from == Mode::Default {
                self.mode = Mode::Curl;
            }
            return tok(TokenKind::Keyword(kw), &word, start);
        }
        tok(TokenKind::Ident, &word, start)
    }

    fn lex_operator_or_punct(&mut self, start: Position) -> Result<Token, LexError> {
        let c = self.bump().unwrap();
        let kind = match c {
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Op(Op::Eq)
                } else {
                    TokenKind::Op(Op::Assign)
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Op(Op::Neq)
                } else {
                    return Err(LexError::UnexpectedChar { ch: c, pos: start });
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Op(Op::Lte)
                } else {
                    TokenKind::Op(Op::Lt)
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Op(Op::Gte)
                } else {
                    TokenKind::Op(Op::Gt)
                }
            }
            '-' => {
                if self.peek() == Some('>') {
                    self.bump();
                    TokenKind::Op(Op::Arrow)
                } else {
                    return Err(LexError::UnexpectedChar { ch: c, pos: start });
                }
            }
            '{' => TokenKind::Punct(Punct::LBrace),
            '}' => TokenKind::Punct(Punct::RBrace),
            '(' => TokenKind::Punct(Punct::LParen),
            ')' => TokenKind::Punct(Punct::RParen),
            '[' => TokenKind::Punct(Punct::LBracket),
            ']' => TokenKind::Punct(Punct::RBracket),
            '.' => TokenKind::Punct(Punct::Dot),
            ',' => TokenKind::Punct(Punct::Comma),
            ':' => TokenKind::Punct(Punct::Colon),
            '|' => TokenKind::Punct(Punct::Pipe),
            other => return Err(LexError::UnexpectedChar { ch: other, pos: start }),
        };
        Ok(tok(kind, "", start))
    }

    // ------------------------------------------------------------------
    // Curl mode
    // ------------------------------------------------------------------

    fn next_curl_token(&mut self) -> Result<Token, LexError> {
        loop {
            self.skip_inline_whitespace();

            // A backslash immediately before a newline is a soft line
            // continuation: swallow both and keep scanning this token.
            if self.peek() == Some('\\') && self.peek_at(1) == Some('\n') {
                self.bump();
                self.bump();
                continue;
            }
            break;
        }

        let start = self.pos();

        let Some(c) = self.peek() else {
            return Ok(tok(TokenKind::Eof, "", start));
        };

        if c == '\n' {
            self.bump();
            self.mode = Mode::Default;
            return Ok(tok(TokenKind::Newline, "\n", start));
        }

        // assert / extract / retry at token-start position end curl mode
        // *before* this token is lexed, so it comes back as a keyword.
        if self.rest_starts_with_word("assert")
            || self.rest_starts_with_word("extract")
            || self.rest_starts_with_word("retry")
        {
            self.mode = Mode::Default;
            return self.next_default_token();
        }

        if c == '$' && self.peek_at(1) == Some('{') {
            return self.lex_var_ref(start);
        }

        if c == '"' || c == '\'' {
            return self.lex_string(start, c);
        }

        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            if c == '$' && self.peek_at(1) == Some('{') {
                break;
            }
            if c == '"' || c == '\'' {
                break;
            }
            if c == '\\' && self.peek_at(1) == Some('\n') {
                break;
            }
            text.push(c);
            self.bump();
        }
        Ok(tok(TokenKind::CurlWord, &text, start))
    }
}

fn tok(kind: TokenKind, text: &str, pos: Position) -> Token {
    Token {
        kind,
        text: text.to_string(),
        pos,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_keywords_and_identifiers() {
        let ks = kinds("var name");
        assert_eq!(ks[0], TokenKind::Keyword(Keyword::Var));
        assert_eq!(ks[1], TokenKind::Ident);
    }

    #[test]
    fn max_attempts_is_not_a_keyword() {
        let ks = kinds("max_attempts backoff base_delay");
        assert!(ks.iter().all(|k| *k == TokenKind::Ident || *k == TokenKind::Eof));
    }

    #[test]
    fn lexes_duration_literals() {
        let toks = Lexer::tokenize("500ms 2s 3m 1h").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Duration(DurationUnit::Ms));
        assert_eq!(toks[0].text, "500");
        assert_eq!(toks[1].kind, TokenKind::Duration(DurationUnit::S));
        assert_eq!(toks[2].kind, TokenKind::Duration(DurationUnit::M));
        assert_eq!(toks[3].kind, TokenKind::Duration(DurationUnit::H));
    }

    #[test]
    fn lexes_bare_number_without_unit() {
        let toks = Lexer::tokenize("42").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Number);
        assert_eq!(toks[0].text, "42");
    }

    #[test]
    fn lexes_variable_reference() {
        let toks = Lexer::tokenize("${token}").unwrap();
        assert_eq!(toks[0].kind, TokenKind::VarRef);
        assert_eq!(toks[0].text, "token");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::tokenize("\"abc").unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { .. }));
    }

    #[test]
    fn curl_mode_entry_and_line_exit() {
        let toks = Lexer::tokenize("curl https://example.invalid/ok\nassert status == 200").unwrap();
        // curl keyword, then curl-mode word(s), newline ends curl mode.
        assert_eq!(toks[0].kind, TokenKind::Keyword(Keyword::Curl));
        assert_eq!(toks[1].kind, TokenKind::CurlWord);
        assert_eq!(toks[1].text, "https://example.invalid/ok");
        assert_eq!(toks[2].kind, TokenKind::Newline);
        assert_eq!(toks[3].kind, TokenKind::Keyword(Keyword::Assert));
    }

    #[test]
    fn curl_mode_exits_early_on_assert_keyword() {
        let toks = Lexer::tokenize("curl example.invalid assert status == 200").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Keyword(Keyword::Curl));
        assert_eq!(toks[1].kind, TokenKind::CurlWord);
        assert_eq!(toks[2].kind, TokenKind::Keyword(Keyword::Assert));
    }

    #[test]
    fn curl_mode_soft_line_continuation() {
        let toks = Lexer::tokenize("curl example.invalid \\\n  -H 'X: 1'\nvar x").unwrap();
        // The backslash-newline is swallowed; mode stays Curl until the
        // unescaped newline after the header flag.
        let has_var_keyword = toks
            .iter()
            .any(|t| t.kind == TokenKind::Keyword(Keyword::Var));
        assert!(has_var_keyword);
    }

    #[test]
    fn curl_mode_keeps_variable_references() {
        let toks = Lexer::tokenize("curl https://example.invalid/users/${id}\n").unwrap();
        assert!(toks.iter().any(|t| t.kind == TokenKind::VarRef && t.text == "id"));
    }
}
