//! Recursive-descent parser over the token stream produced by [`crate::lexer`].
//!
//! Error recovery follows the same shape as the model's validation pass:
//! accumulate every diagnostic instead of failing on the first one, then
//! resynchronise (newline at statement level, closing brace inside a block)
//! and keep going.

use crate::ast::*;
use crate::lexer::error::Position;
use crate::lexer::{DurationUnit, Keyword, Lexer, Op, Punct, Token, TokenKind};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    errors: Vec<ParseError>,
}

/// Parses a full source file, returning every top-level declaration recovered
/// along with any diagnostics. Diagnostics are non-empty only when at least
/// one production failed to recover cleanly.
pub fn parse(source: &str) -> Result<Vec<TopLevel>, Vec<ParseError>> {
    let tokens = Lexer::tokenize(source).map_err(|e| {
        vec![ParseError {
            message: e.to_string(),
            pos: e.pos(),
        }]
    })?;
    let mut parser = Parser {
        tokens,
        idx: 0,
        errors: Vec::new(),
    };
    let items = parser.parse_program();
    if parser.errors.is_empty() {
        Ok(items)
    } else {
        Err(parser.errors)
    }
}

impl Parser {
    fn parse_program(&mut self) -> Vec<TopLevel> {
        let mut items = Vec::new();
        self.skip_noise();
        while !self.at_eof() {
            match self.parse_top_level() {
                Ok(item) => items.push(item),
                Err(e) => {
                    self.errors.push(e);
                    self.resync_statement();
                }
            }
            self.skip_noise();
        }
        items
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !matches!(tok.kind, TokenKind::Eof) {
            self.idx += 1;
        }
        tok
    }

    fn skip_noise(&mut self) {
        while matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Comment
        ) {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<Token, ParseError> {
        if self.peek_kind() == &TokenKind::Keyword(kw) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("{:?}", kw)))
        }
    }

    fn expect_punct(&mut self, p: Punct) -> Result<Token, ParseError> {
        if self.peek_kind() == &TokenKind::Punct(p) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("{:?}", p)))
        }
    }

    fn expect_ident(&mut self) -> Result<Token, ParseError> {
        if matches!(self.peek_kind(), TokenKind::Ident) {
            Ok(self.advance())
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn expect_str(&mut self) -> Result<Token, ParseError> {
        if matches!(self.peek_kind(), TokenKind::Str) {
            Ok(self.advance())
        } else {
            Err(self.unexpected("string literal"))
        }
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        ParseError {
            message: format!("expected {}, found {:?}", wanted, self.peek().kind),
            pos: self.peek().pos,
        }
    }

    fn resync_statement(&mut self) {
        while !self.at_eof() && !matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
        self.advance(); // consume the newline itself, if present
    }

    fn resync_block(&mut self) {
        let mut depth = 1;
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Punct(Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RBrace) => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                }
                _ => {}
            }
            self.advance();
        }
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    fn parse_top_level(&mut self) -> Result<TopLevel, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Keyword(Keyword::Var) => self.parse_var_decl().map(TopLevel::Var),
            TokenKind::Keyword(Keyword::Request) => {
                self.parse_request_decl().map(TopLevel::Request)
            }
            TokenKind::Keyword(Keyword::Scenario) => {
                self.parse_scenario_decl().map(TopLevel::Scenario)
            }
            _ => Err(self.unexpected("'var', 'request', or 'scenario'")),
        }
    }

    fn parse_var_decl(&mut self) -> Result<VarDecl, ParseError> {
        let start = self.expect_keyword(Keyword::Var)?.pos;
        let name = self.expect_ident()?.text;
        self.expect_op(Op::Assign)?;
        let value = match self.peek_kind().clone() {
            TokenKind::Str => VarValue::Str(self.advance().text),
            TokenKind::Number => VarValue::Number(self.advance().text),
            _ => return Err(self.unexpected("string or number")),
        };
        Ok(VarDecl {
            name,
            value,
            pos: start,
        })
    }

    fn expect_op(&mut self, op: Op) -> Result<Token, ParseError> {
        if self.peek_kind() == &TokenKind::Op(op) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("{:?}", op)))
        }
    }

    fn parse_request_decl(&mut self) -> Result<RequestDecl, ParseError> {
        let start = self.expect_keyword(Keyword::Request)?.pos;
        let name = self.expect_ident()?.text;
        self.expect_punct(Punct::LBrace)?;
        self.skip_noise();

        let curl = self.parse_curl_stmt()?;
        self.skip_noise();

        let mut assertions = Vec::new();
        let mut extractions = Vec::new();
        let mut retry = None;

        loop {
            self.skip_noise();
            match self.peek_kind().clone() {
                TokenKind::Punct(Punct::RBrace) => {
                    self.advance();
                    break;
                }
                TokenKind::Keyword(Keyword::Assert) => {
                    assertions.extend(self.parse_assert_stmt()?);
                }
                TokenKind::Keyword(Keyword::Extract) => {
                    extractions.extend(self.parse_extract_block()?);
                }
                TokenKind::Keyword(Keyword::Retry) => {
                    retry = Some(self.parse_retry_block()?);
                }
                TokenKind::Eof => {
                    return Err(ParseError {
                        message: "unterminated request block".into(),
                        pos: self.peek().pos,
                    })
                }
                _ => return Err(self.unexpected("assert, extract, retry, or '}'")),
            }
        }

        Ok(RequestDecl {
            name,
            curl,
            assertions,
            extractions,
            retry,
            pos: start,
        })
    }

    fn parse_curl_stmt(&mut self) -> Result<CurlCommand, ParseError> {
        self.expect_keyword(Keyword::Curl)?;
        let mut words: Vec<Token> = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::CurlWord | TokenKind::VarRef | TokenKind::Str => {
                    words.push(self.advance())
                }
                TokenKind::Newline | TokenKind::Eof => break,
                _ => break,
            }
        }
        crate::curl::build_curl_command(&words).map_err(|msg| ParseError {
            message: msg,
            pos: self.peek().pos,
        })
    }

    fn parse_assert_stmt(&mut self) -> Result<Vec<AssertionDecl>, ParseError> {
        let kw_pos = self.expect_keyword(Keyword::Assert)?.pos;
        if self.peek_kind() == &TokenKind::Punct(Punct::LBrace) {
            self.advance();
            let mut out = Vec::new();
            loop {
                self.skip_noise();
                if self.peek_kind() == &TokenKind::Punct(Punct::RBrace) {
                    self.advance();
                    break;
                }
                if self.at_eof() {
                    return Err(ParseError {
                        message: "unterminated assert block".into(),
                        pos: self.peek().pos,
                    });
                }
                out.push(self.parse_one_assertion()?);
            }
            Ok(out)
        } else {
            let a = self.parse_one_assertion_with_pos(kw_pos)?;
            Ok(vec![a])
        }
    }

    fn parse_one_assertion(&mut self) -> Result<AssertionDecl, ParseError> {
        let pos = self.peek().pos;
        self.parse_one_assertion_with_pos(pos)
    }

    fn parse_one_assertion_with_pos(&mut self, pos: Position) -> Result<AssertionDecl, ParseError> {
        let field = self.parse_assertion_field()?;
        let operator = self.parse_compare_operator()?;
        let value = self.parse_expr()?;
        Ok(AssertionDecl {
            field,
            operator,
            value,
            pos,
        })
    }

    fn parse_assertion_field(&mut self) -> Result<AssertionField, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Keyword(Keyword::Status) => {
                self.advance();
                Ok(AssertionField::Status)
            }
            TokenKind::Keyword(Keyword::Latency) => {
                self.advance();
                Ok(AssertionField::Latency)
            }
            TokenKind::Keyword(Keyword::Body) => {
                self.advance();
                let path = self.parse_dotted_suffix()?;
                Ok(AssertionField::Path {
                    root: "body".into(),
                    path,
                })
            }
            TokenKind::Ident if self.peek().text == "header" => {
                self.advance();
                let path = self.parse_dotted_suffix()?;
                Ok(AssertionField::Path {
                    root: "header".into(),
                    path,
                })
            }
            _ => Err(self.unexpected("status, latency, body, or header")),
        }
    }

    fn parse_dotted_suffix(&mut self) -> Result<String, ParseError> {
        let mut path = String::new();
        while self.peek_kind() == &TokenKind::Punct(Punct::Dot) {
            self.advance();
            let part = self.expect_ident_like()?;
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&part);
        }
        Ok(path)
    }

    fn expect_ident_like(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident => Ok(self.advance().text),
            TokenKind::Keyword(_) => Ok(self.advance().text),
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn parse_compare_operator(&mut self) -> Result<CompareOperator, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Op(Op::Eq) => {
                self.advance();
                Ok(CompareOperator::Eq)
            }
            TokenKind::Op(Op::Neq) => {
                self.advance();
                Ok(CompareOperator::Neq)
            }
            TokenKind::Op(Op::Lt) => {
                self.advance();
                Ok(CompareOperator::Lt)
            }
            TokenKind::Op(Op::Lte) => {
                self.advance();
                Ok(CompareOperator::Lte)
            }
            TokenKind::Op(Op::Gt) => {
                self.advance();
                Ok(CompareOperator::Gt)
            }
            TokenKind::Op(Op::Gte) => {
                self.advance();
                Ok(CompareOperator::Gte)
            }
            TokenKind::Ident if self.peek().text == "contains" => {
                self.advance();
                Ok(CompareOperator::Contains)
            }
            TokenKind::Keyword(Keyword::In) => {
                self.advance();
                Ok(CompareOperator::In)
            }
            _ => Err(self.unexpected("a comparison operator")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Str => Ok(Expr::Literal(self.advance().text)),
            TokenKind::Number => Ok(Expr::Literal(self.advance().text)),
            TokenKind::Duration(unit) => {
                let tok = self.advance();
                let suffix = match unit {
                    DurationUnit::Ms => "ms",
                    DurationUnit::S => "s",
                    DurationUnit::M => "m",
                    DurationUnit::H => "h",
                };
                Ok(Expr::Literal(format!("{}{}", tok.text, suffix)))
            }
            TokenKind::VarRef => Ok(Expr::VarRef(self.advance().text)),
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Literal("true".into()))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Literal("false".into()))
            }
            TokenKind::Punct(Punct::LBracket) => self.parse_list_expr(),
            TokenKind::Ident => Ok(Expr::Literal(self.advance().text)),
            _ => Err(self.unexpected("a value")),
        }
    }

    fn parse_list_expr(&mut self) -> Result<Expr, ParseError> {
        self.expect_punct(Punct::LBracket)?;
        let mut items = Vec::new();
        loop {
            if self.peek_kind() == &TokenKind::Punct(Punct::RBracket) {
                self.advance();
                break;
            }
            let item = self.parse_expr()?;
            items.push(match item {
                Expr::Literal(s) => s,
                Expr::VarRef(s) => format!("${{{}}}", s),
            });
            if self.peek_kind() == &TokenKind::Punct(Punct::Comma) {
                self.advance();
            }
        }
        Ok(Expr::Literal(format!("[{}]", items.join(","))))
    }

    fn parse_extract_block(&mut self) -> Result<Vec<ExtractionDecl>, ParseError> {
        self.expect_keyword(Keyword::Extract)?;
        self.expect_punct(Punct::LBrace)?;
        let mut out = Vec::new();
        loop {
            self.skip_noise();
            if self.peek_kind() == &TokenKind::Punct(Punct::RBrace) {
                self.advance();
                break;
            }
            if self.at_eof() {
                return Err(ParseError {
                    message: "unterminated extract block".into(),
                    pos: self.peek().pos,
                });
            }
            let pos = self.peek().pos;
            let name = self.expect_ident()?.text;
            self.expect_op(Op::Assign)?;
            let path_tok = self.expect_str_or_word()?;
            let source = parse_extraction_source(&path_tok).map_err(|msg| ParseError {
                message: msg,
                pos,
            })?;
            out.push(ExtractionDecl { name, source, pos });
        }
        Ok(out)
    }

    fn expect_str_or_word(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Str => Ok(self.advance().text),
            TokenKind::Ident => Ok(self.advance().text),
            _ => Err(self.unexpected("a path")),
        }
    }

    fn parse_retry_block(&mut self) -> Result<RetryConfigDecl, ParseError> {
        let pos = self.expect_keyword(Keyword::Retry)?.pos;
        self.expect_punct(Punct::LBrace)?;
        let mut max_attempts = 3u32;
        let mut backoff_ms = 0u64;
        let mut base_delay_ms = 100u64;
        loop {
            self.skip_noise();
            if self.peek_kind() == &TokenKind::Punct(Punct::RBrace) {
                self.advance();
                break;
            }
            if self.at_eof() {
                return Err(ParseError {
                    message: "unterminated retry block".into(),
                    pos: self.peek().pos,
                });
            }
            let field = self.expect_ident()?.text;
            self.expect_op(Op::Assign)?;
            let value = self.parse_retry_value()?;
            match field.as_str() {
                "max_attempts" => max_attempts = value as u32,
                "backoff" => backoff_ms = value,
                "base_delay" => base_delay_ms = value,
                other => {
                    return Err(ParseError {
                        message: format!("unknown retry field '{}'", other),
                        pos: self.peek().pos,
                    })
                }
            }
        }
        Ok(RetryConfigDecl {
            max_attempts,
            backoff_ms,
            base_delay_ms,
            pos,
        })
    }

    fn parse_retry_value(&mut self) -> Result<u64, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Number => Ok(self.advance().text.parse().unwrap_or(0)),
            TokenKind::Duration(unit) => {
                let tok = self.advance();
                let n: u64 = tok.text.parse().unwrap_or(0);
                Ok(match unit {
                    DurationUnit::Ms => n,
                    DurationUnit::S => n * 1000,
                    DurationUnit::M => n * 60_000,
                    DurationUnit::H => n * 3_600_000,
                })
            }
            _ => Err(self.unexpected("a number or duration")),
        }
    }

    fn parse_scenario_decl(&mut self) -> Result<ScenarioDecl, ParseError> {
        let start = self.expect_keyword(Keyword::Scenario)?.pos;
        let name = self.expect_ident()?.text;
        self.expect_punct(Punct::LBrace)?;
        self.skip_noise();
        let load = self.parse_load_config()?;
        self.skip_noise();
        let mut flow = Vec::new();
        loop {
            self.skip_noise();
            if self.peek_kind() == &TokenKind::Punct(Punct::RBrace) {
                self.advance();
                break;
            }
            if self.at_eof() {
                return Err(ParseError {
                    message: "unterminated scenario block".into(),
                    pos: self.peek().pos,
                });
            }
            flow.push(self.parse_flow_stmt()?);
        }
        Ok(ScenarioDecl {
            name,
            load,
            flow,
            pos: start,
        })
    }

    fn parse_load_config(&mut self) -> Result<LoadConfig, ParseError> {
        let pos = self.expect_keyword(Keyword::Load)?.pos;
        self.expect_punct(Punct::LParen)?;
        let mut fields: HashMap<String, u64> = HashMap::new();
        loop {
            let name = self.expect_ident()?.text;
            self.expect_op(Op::Assign)?;
            let value = self.parse_retry_value()?;
            fields.insert(name, value);
            if self.peek_kind() == &TokenKind::Punct(Punct::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect_punct(Punct::RParen)?;

        let kind = if let (Some(vus), Some(dur)) = (fields.get("vus"), fields.get("duration")) {
            LoadConfigKind::VusForDuration {
                vus: *vus as u32,
                duration_ms: *dur,
            }
        } else if let (Some(rps), Some(dur)) = (fields.get("rps"), fields.get("duration")) {
            LoadConfigKind::RpsForDuration {
                rps: *rps as u32,
                duration_ms: *dur,
            }
        } else if let (Some(iters), Some(vus)) =
            (fields.get("iterations"), fields.get("vus"))
        {
            LoadConfigKind::IterationsWithVus {
                iterations: *iters as u32,
                vus: *vus as u32,
            }
        } else {
            return Err(ParseError {
                message: "load(...) needs vus+duration, rps+duration, or iterations+vus".into(),
                pos,
            });
        };
        Ok(LoadConfig { kind, pos })
    }

    fn parse_flow_stmt(&mut self) -> Result<FlowStmt, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Keyword(Keyword::If) => self.parse_conditional_flow(),
            TokenKind::Keyword(Keyword::Run) => {
                self.advance();
                let name = self.expect_ident()?.text;
                self.skip_newlines();
                Ok(FlowStmt::Run(name))
            }
            TokenKind::Ident => self.parse_chain_or_nested_flow(),
            _ => Err(self.unexpected("a flow statement")),
        }
    }

    fn parse_chain_or_nested_flow(&mut self) -> Result<FlowStmt, ParseError> {
        let first = self.expect_ident()?.text;
        if self.peek_kind() == &TokenKind::Op(Op::Arrow) {
            let mut chain = vec![first];
            while self.peek_kind() == &TokenKind::Op(Op::Arrow) {
                self.advance();
                chain.push(self.expect_ident()?.text);
            }
            self.skip_newlines();
            return Ok(FlowStmt::Sequential(chain));
        }
        // `parallel` is a contextual identifier, not a reserved keyword (same
        // treatment as `max_attempts`/`backoff`/`base_delay` in retry blocks):
        // it only means anything right here, between a nested block's parent
        // name and its opening brace.
        let parallel = if self.peek_kind() == &TokenKind::Ident && self.peek().text == "parallel" {
            self.advance();
            true
        } else {
            false
        };
        if self.peek_kind() == &TokenKind::Punct(Punct::LBrace) {
            self.advance();
            let mut children = Vec::new();
            loop {
                self.skip_noise();
                if self.peek_kind() == &TokenKind::Punct(Punct::RBrace) {
                    self.advance();
                    break;
                }
                if self.at_eof() {
                    return Err(ParseError {
                        message: "unterminated nested flow block".into(),
                        pos: self.peek().pos,
                    });
                }
                children.push(self.parse_flow_stmt()?);
            }
            self.skip_newlines();
            return Ok(FlowStmt::Nested {
                parent: first,
                children,
                parallel,
            });
        }
        if parallel {
            return Err(self.unexpected("'{' after 'parallel'"));
        }
        self.skip_newlines();
        Ok(FlowStmt::Run(first))
    }

    fn parse_conditional_flow(&mut self) -> Result<FlowStmt, ParseError> {
        self.expect_keyword(Keyword::If)?;
        let cond = self.parse_condition()?;
        self.skip_newlines();
        self.expect_punct(Punct::LBrace)?;
        let mut then_branch = Vec::new();
        loop {
            self.skip_noise();
            if self.peek_kind() == &TokenKind::Punct(Punct::RBrace) {
                self.advance();
                break;
            }
            if self.at_eof() {
                return Err(ParseError {
                    message: "unterminated if-block".into(),
                    pos: self.peek().pos,
                });
            }
            then_branch.push(self.parse_flow_stmt()?);
        }
        let mut else_branch = Vec::new();
        // Only a same-line-or-immediate `else` attaches; otherwise this is a
        // standalone statement and the newline before it will be skipped by
        // the caller's loop on its next iteration.
        let save = self.idx;
        self.skip_newlines();
        if self.peek_kind() == &TokenKind::Keyword(Keyword::Else) {
            self.advance();
            self.expect_punct(Punct::LBrace)?;
            loop {
                self.skip_noise();
                if self.peek_kind() == &TokenKind::Punct(Punct::RBrace) {
                    self.advance();
                    break;
                }
                if self.at_eof() {
                    return Err(ParseError {
                        message: "unterminated else-block".into(),
                        pos: self.peek().pos,
                    });
                }
                else_branch.push(self.parse_flow_stmt()?);
            }
        } else {
            self.idx = save;
        }
        self.skip_newlines();
        Ok(FlowStmt::Conditional {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        let left = self.parse_expr()?;
        let op = self.parse_compare_op_strict()?;
        let right = self.parse_expr()?;
        Ok(Condition { left, op, right })
    }

    fn parse_compare_op_strict(&mut self) -> Result<CompareOp, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Op(Op::Eq) => {
                self.advance();
                Ok(CompareOp::Eq)
            }
            TokenKind::Op(Op::Neq) => {
                self.advance();
                Ok(CompareOp::Neq)
            }
            TokenKind::Op(Op::Lt) => {
                self.advance();
                Ok(CompareOp::Lt)
            }
            TokenKind::Op(Op::Lte) => {
                self.advance();
                Ok(CompareOp::Lte)
            }
            TokenKind::Op(Op::Gt) => {
                self.advance();
                Ok(CompareOp::Gt)
            }
            TokenKind::Op(Op::Gte) => {
                self.advance();
                Ok(CompareOp::Gte)
            }
            _ => Err(self.unexpected("a comparison operator")),
        }
    }
}

fn parse_extraction_source(path: &str) -> Result<ExtractionSource, String> {
    if let Some(rest) = path.strip_prefix("regex:") {
        Ok(ExtractionSource::Regex(rest.to_string()))
    } else if let Some(rest) = path.strip_prefix("header:") {
        Ok(ExtractionSource::Header(rest.to_string()))
    } else if let Some(rest) = path.strip_prefix("cookie:") {
        Ok(ExtractionSource::Cookie(rest.to_string()))
    } else if path.starts_with("$.") || path == "$" {
        Ok(ExtractionSource::JsonPath(path.to_string()))
    } else {
        Err(format!(
            "unrecognised extraction path '{}': expected $., regex:, header:, or cookie:",
            path
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_var_decl() {
        let items = parse("var base_url = \"https://example.invalid\"\n").unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], TopLevel::Var(_)));
    }

    #[test]
    fn parses_request_with_assert_and_extract() {
        let src = r#"
request login {
    curl -X POST https://example.invalid/login -d '{"user":"a"}'
    assert status == 200
    extract {
        token = "$.token"
    }
}
"#;
        let items = parse(src).unwrap();
        assert_eq!(items.len(), 1);
        match &items[0] {
            TopLevel::Request(r) => {
                assert_eq!(r.name, "login");
                assert_eq!(r.assertions.len(), 1);
                assert_eq!(r.extractions.len(), 1);
            }
            _ => panic!("expected request decl"),
        }
    }

    #[test]
    fn parses_braced_multi_assert() {
        let src = r#"
request ping {
    curl https://example.invalid/ping
    assert {
        status == 200
        latency < 500ms
    }
}
"#;
        let items = parse(src).unwrap();
        match &items[0] {
            TopLevel::Request(r) => assert_eq!(r.assertions.len(), 2),
            _ => panic!("expected request decl"),
        }
    }

    #[test]
    fn parses_scenario_with_chain() {
        let src = r#"
scenario smoke {
    load(vus = 5, duration = 10s)
    login -> fetch -> logout
}
"#;
        let items = parse(src).unwrap();
        match &items[0] {
            TopLevel::Scenario(s) => {
                assert_eq!(s.flow.len(), 1);
                assert!(matches!(s.flow[0], FlowStmt::Sequential(_)));
                assert!(matches!(
                    s.load.kind,
                    LoadConfigKind::VusForDuration { vus: 5, .. }
                ));
            }
            _ => panic!("expected scenario decl"),
        }
    }

    #[test]
    fn parses_parallel_nested_block() {
        let src = r#"
scenario fanout {
    load(vus = 5, duration = 10s)
    gate parallel {
        run a
        run b
        run c
    }
}
"#;
        let items = parse(src).unwrap();
        match &items[0] {
            TopLevel::Scenario(s) => {
                assert_eq!(s.flow.len(), 1);
                match &s.flow[0] {
                    FlowStmt::Nested { parent, children, parallel } => {
                        assert_eq!(parent, "gate");
                        assert_eq!(children.len(), 3);
                        assert!(*parallel);
                    }
                    _ => panic!("expected nested flow block"),
                }
            }
            _ => panic!("expected scenario decl"),
        }
    }

    #[test]
    fn rejects_parallel_without_brace() {
        let src = r#"
scenario bad {
    load(vus = 1, duration = 1s)
    gate parallel
}
"#;
        assert!(parse(src).is_err());
    }

    #[test]
    fn parses_conditional_flow_with_else() {
        let src = r#"
scenario cond {
    load(iterations = 1, vus = 1)
    if ${status} == "200" {
        run ok_path
    } else {
        run fail_path
    }
}
"#;
        let items = parse(src).unwrap();
        match &items[0] {
            TopLevel::Scenario(s) => {
                assert_eq!(s.flow.len(), 1);
                match &s.flow[0] {
                    FlowStmt::Conditional {
                        then_branch,
                        else_branch,
                        ..
                    } => {
                        assert_eq!(then_branch.len(), 1);
                        assert_eq!(else_branch.len(), 1);
                    }
                    _ => panic!("expected conditional"),
                }
            }
            _ => panic!("expected scenario decl"),
        }
    }

    #[test]
    fn reports_unexpected_token_with_position() {
        let err = parse("scenario { }\n").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn rejects_unknown_extraction_prefix() {
        let src = r#"
request r {
    curl https://example.invalid
    extract {
        x = "nope:thing"
    }
}
"#;
        assert!(parse(src).is_err());
    }
}
