//! Shell-aware curl reassembly and curl-to-request-record translation.
//!
//! Splitting already happened in the lexer's curl mode (it respects quotes
//! and backslash escapes at the character level); this module's job is to
//! regroup the resulting token run into shell *arguments* — a bare
//! `${var}` sitting next to a literal run with no separating whitespace is
//! still one argument — and then walk those arguments as curl flags.

use crate::ast::{CurlAuth, CurlCommand, UrlSegment};
use crate::ir::{
    Auth, Body, EvaluationSettings, IrMetadata, RequestRecord, RequestSpec, TransportOptions,
    IR_VERSION,
};
use crate::lexer::{Lexer, Token, TokenKind};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum ArgPiece {
    Literal(String),
    Var(String),
}

type Argument = Vec<ArgPiece>;

pub fn build_curl_command(tokens: &[Token]) -> Result<CurlCommand, String> {
    let args = collect_arguments(tokens);

    let mut method: Option<String> = None;
    let mut url_segments: Vec<UrlSegment> = Vec::new();
    let mut url_set = false;
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut body: Option<String> = None;
    let mut data_binary = false;
    let mut cookies: HashMap<String, String> = HashMap::new();
    let mut auth: Option<CurlAuth> = None;
    let mut insecure = false;
    let mut follow_redirects = false;
    let max_redirects: Option<u32> = None;
    let mut proxy: Option<String> = None;
    let mut timeout_ms: Option<u64> = None;
    let mut connect_timeout_ms: Option<u64> = None;
    let mut user_agent: Option<String> = None;
    let mut query_only = false;

    let mut i = 0;
    while i < args.len() {
        let piece = &args[i];
        match literal_flag_name(piece) {
            Some(flag) if flag.starts_with('-') => {
                let (name, inline_value) = split_long_flag(&flag);
                let mut take_value = |i: &mut usize| -> Result<String, String> {
                    if let Some(v) = &inline_value {
                        return Ok(v.clone());
                    }
                    *i += 1;
                    args.get(*i)
                        .map(piece_text)
                        .ok_or_else(|| format!("flag {} requires a value", name))
                };
                match name.as_str() {
                    "-H" | "--header" => {
                        let v = take_value(&mut i)?;
                        insert_header(&mut headers, &mut auth, &v);
                    }
                    "-d" | "--data" | "--data-raw" | "--data-ascii" => {
                        body = Some(take_value(&mut i)?);
                    }
                    "--data-binary" => {
                        body = Some(take_value(&mut i)?);
                        data_binary = true;
                    }
                    "-X" | "--request" => {
                        method = Some(take_value(&mut i)?);
                    }
                    "-b" | "--cookie" => {
                        let v = take_value(&mut i)?;
                        parse_cookie_string(&v, &mut cookies);
                    }
                    "-u" | "--user" => {
                        let v = take_value(&mut i)?;
                        if let Some((user, pass)) = v.split_once(':') {
                            auth = Some(CurlAuth::Basic {
                                user: user.to_string(),
                                password: pass.to_string(),
                            });
                        }
                    }
                    "-k" | "--insecure" => insecure = true,
                    "-L" | "--location" => follow_redirects = true,
                    "-x" | "--proxy" => proxy = Some(take_value(&mut i)?),
                    "-m" | "--max-time" => {
                        let v = take_value(&mut i)?;
                        timeout_ms = v.parse::<f64>().ok().map(|secs| (secs * 1000.0) as u64);
                    }
                    "--connect-timeout" => {
                        let v = take_value(&mut i)?;
                        connect_timeout_ms =
                            v.parse::<f64>().ok().map(|secs| (secs * 1000.0) as u64);
                    }
                    "-A" | "--user-agent" => user_agent = Some(take_value(&mut i)?),
                    "-e" | "--referer" => {
                        let v = take_value(&mut i)?;
                        headers.insert("Referer".to_string(), v);
                    }
                    "-G" | "--get" => query_only = true,
                    "-I" | "--head" => method = Some("HEAD".to_string()),
                    "--compressed" => {
                        headers
                            .entry("Accept-Encoding".to_string())
                            .or_insert_with(|| "gzip".to_string());
                    }
                    _ => {
                        if inline_value.is_none() {
                            if let Some(next) = args.get(i + 1) {
                                if !arg_looks_like_flag(next) {
                                    i += 1;
                                }
                            }
                        }
                    }
                }
            }
            _ => {
                if !url_set {
                    url_segments = pieces_to_url_segments(piece);
                    url_set = true;
                }
            }
        }
        i += 1;
    }

    if !url_set {
        return Err("curl command has no URL".to_string());
    }

    let explicit_method = method.is_some();
    let mut method = method.unwrap_or_else(|| "GET".to_string());
    if !explicit_method && body.is_some() {
        method = "POST".to_string();
    }

    Ok(CurlCommand {
        method,
        url_segments,
        headers,
        body,
        cookies,
        auth,
        insecure,
        follow_redirects,
        max_redirects,
        proxy,
        timeout_ms,
        connect_timeout_ms,
        user_agent,
        data_binary,
        query_only,
    })
}

/// Splits the URL's query string out into a structured vector and rewrites
/// the URL literal to exclude it, lifts cookie/auth/body details into IR
/// shapes, and infers the body's content type when one wasn't given
/// explicitly via headers.
pub fn split_query(url: &str) -> (String, Vec<(String, String)>) {
    match url.split_once('?') {
        None => (url.to_string(), Vec::new()),
        Some((path, query)) => {
            let pairs = query
                .split('&')
                .filter(|p| !p.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((k, v)) => (decode(k), decode(v)),
                    None => (decode(pair), String::new()),
                })
                .collect();
            (path.to_string(), pairs)
        }
    }
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Infers a [`Body`] (and, when absent, a `Content-Type` header) from the
/// curl command's raw body string.
pub fn infer_body(raw: &str, data_binary: bool, headers: &mut HashMap<String, String>) -> Body {
    let has_content_type = headers
        .keys()
        .any(|k| k.eq_ignore_ascii_case("content-type"));

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(raw) {
        if json.is_object() || json.is_array() {
            if !has_content_type {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
            }
            return Body::Json(json);
        }
    }

    if data_binary {
        if !has_content_type {
            headers.insert(
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            );
        }
        return Body::Binary(STANDARD.encode(raw));
    }

    if raw.contains('=') && !raw.contains('{') {
        if !has_content_type {
            headers.insert(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            );
        }
        let form = raw
            .split('&')
            .filter(|p| !p.is_empty())
            .filter_map(|pair| pair.split_once('=').map(|(k, v)| (decode(k), decode(v))))
            .collect();
        return Body::Form(form);
    }

    if !has_content_type {
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
    }
    Body::Text(raw.to_string())
}

/// Entry point for the CLI's `translate-curl`/`exec` commands: lexes and
/// parses one standalone curl command line (outside any scenario source)
/// straight into a [`RequestRecord`]. There are no `var` bindings to
/// substitute at this level, so any `${name}` segment in the URL or headers
/// is left for the runtime variable engine, same as an unresolved reference
/// inside a compiled scenario.
pub fn translate_curl_line(line: &str, id: &str) -> Result<RequestRecord, String> {
    let source = if line.trim_start().starts_with("curl") {
        format!("{}\n", line)
    } else {
        format!("curl {}\n", line)
    };
    let tokens = Lexer::tokenize(&source).map_err(|e| e.to_string())?;
    let words: Vec<Token> = tokens
        .into_iter()
        .filter(|t| matches!(t.kind, TokenKind::CurlWord | TokenKind::VarRef | TokenKind::Str))
        .collect();
    let cmd = build_curl_command(&words)?;
    Ok(request_record_from_curl(&cmd, id))
}

/// Lowers a [`CurlCommand`] into a [`RequestRecord`] without any compile-time
/// variable substitution — used by the standalone CLI path, as opposed to
/// `compiler::translate_request` which renders `var` bindings first.
pub fn request_record_from_curl(curl: &CurlCommand, id: &str) -> RequestRecord {
    let url_rendered: String = curl
        .url_segments
        .iter()
        .map(|seg| match seg {
            UrlSegment::Literal(s) => s.clone(),
            UrlSegment::Var(name) => format!("${{{}}}", name),
        })
        .collect();
    let (url, query) = split_query(&url_rendered);

    let mut headers = curl.headers.clone();
    if let Some(ua) = &curl.user_agent {
        headers.entry("User-Agent".to_string()).or_insert_with(|| ua.clone());
    }

    let body = curl
        .body
        .as_ref()
        .map(|raw| infer_body(raw, curl.data_binary, &mut headers));

    let auth = translate_auth(&curl.auth);

    RequestRecord {
        version: IR_VERSION.to_string(),
        metadata: IrMetadata {
            id: id.to_string(),
            source: "cli".to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            tags: Vec::new(),
        },
        request: RequestSpec {
            method: curl.method.clone(),
            url,
            query,
            headers,
            cookies: curl.cookies.clone(),
            body,
            auth,
        },
        transport: TransportOptions {
            tls_verify: !curl.insecure,
            follow_redirects: curl.follow_redirects,
            max_redirects: curl.max_redirects.unwrap_or(10),
            timeout_ms: curl.timeout_ms.or(curl.connect_timeout_ms).unwrap_or(30_000),
            proxy: curl.proxy.clone(),
        },
        evaluation: EvaluationSettings::default(),
    }
}

pub fn translate_auth(ast_auth: &Option<CurlAuth>) -> Option<Auth> {
    ast_auth.as_ref().map(|a| match a {
        CurlAuth::Basic { user, password } => Auth::Basic {
            username: user.clone(),
            password: password.clone(),
        },
        CurlAuth::Bearer(token) => Auth::Bearer {
            token: token.clone(),
        },
    })
}

// ------------------------------------------------------------------
// argument grouping
// ------------------------------------------------------------------

fn collect_arguments(tokens: &[Token]) -> Vec<Argument> {
    let mut args = Vec::new();
    let mut idx = 0;
    while idx < tokens.len() {
        match tokens[idx].kind {
            TokenKind::Str => {
                args.push(vec![ArgPiece::Literal(tokens[idx].text.clone())]);
                idx += 1;
            }
            TokenKind::CurlWord | TokenKind::VarRef => {
                let mut pieces = Vec::new();
                while idx < tokens.len() {
                    match tokens[idx].kind {
                        TokenKind::CurlWord => {
                            pieces.push(ArgPiece::Literal(tokens[idx].text.clone()));
                            idx += 1;
                        }
                        TokenKind::VarRef => {
                            pieces.push(ArgPiece::Var(tokens[idx].text.clone()));
                            idx += 1;
                        }
                        _ => break,
                    }
                }
                args.push(pieces);
            }
            _ => idx += 1,
        }
    }
    args
}

fn literal_flag_name(piece: &Argument) -> Option<String> {
    if piece.len() == 1 {
        if let ArgPiece::Literal(s) = &piece[0] {
            return Some(s.clone());
        }
    }
    None
}

fn split_long_flag(flag: &str) -> (String, Option<String>) {
    if let Some(stripped) = flag.strip_prefix("--") {
        if let Some((name, val)) = stripped.split_once('=') {
            return (format!("--{}", name), Some(val.to_string()));
        }
    }
    (flag.to_string(), None)
}

fn piece_text(piece: &Argument) -> String {
    piece
        .iter()
        .map(|p| match p {
            ArgPiece::Literal(s) => s.clone(),
            ArgPiece::Var(n) => format!("${{{}}}", n),
        })
        .collect::<Vec<_>>()
        .join("")
}

fn pieces_to_url_segments(piece: &Argument) -> Vec<UrlSegment> {
    piece
        .iter()
        .map(|p| match p {
            ArgPiece::Literal(s) => UrlSegment::Literal(s.clone()),
            ArgPiece::Var(n) => UrlSegment::Var(n.clone()),
        })
        .collect()
}

fn arg_looks_like_flag(arg: &Argument) -> bool {
    literal_flag_name(arg)
        .map(|s| s.starts_with('-'))
        .unwrap_or(false)
}

fn insert_header(
    headers: &mut HashMap<String, String>,
    auth: &mut Option<CurlAuth>,
    raw: &str,
) {
    if let Some((k, v)) = raw.split_once(':') {
        let key = k.trim().to_string();
        let val = v.trim().to_string();
        if key.eq_ignore_ascii_case("authorization") {
            if let Some(token) = val.strip_prefix("Bearer ") {
                *auth = Some(CurlAuth::Bearer(token.trim().to_string()));
                return;
            }
        }
        headers.insert(key, val);
    }
}

fn parse_cookie_string(raw: &str, cookies: &mut HashMap<String, String>) {
    for part in raw.split(';') {
        let part = part.trim();
        if let Some((k, v)) = part.split_once('=') {
            cookies.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn curl_tokens(src: &str) -> Vec<Token> {
        Lexer::tokenize(src)
            .unwrap()
            .into_iter()
            .filter(|t| {
                matches!(
                    t.kind,
                    TokenKind::CurlWord | TokenKind::VarRef | TokenKind::Str
                )
            })
            .collect()
    }

    #[test]
    fn builds_simple_get() {
        let toks = curl_tokens("curl https://example.invalid/ping\n");
        let cmd = build_curl_command(&toks).unwrap();
        assert_eq!(cmd.method, "GET");
        assert_eq!(cmd.url_segments.len(), 1);
    }

    #[test]
    fn infers_post_from_data_flag() {
        let toks = curl_tokens(r#"curl https://example.invalid/login -d '{"user":"a"}'"#);
        let cmd = build_curl_command(&toks).unwrap();
        assert_eq!(cmd.method, "POST");
        assert_eq!(cmd.body.as_deref(), Some(r#"{"user":"a"}"#));
    }

    #[test]
    fn parses_header_and_bearer_auth() {
        let toks = curl_tokens(r#"curl https://example.invalid -H 'Authorization: Bearer xyz'"#);
        let cmd = build_curl_command(&toks).unwrap();
        assert!(matches!(cmd.auth, Some(CurlAuth::Bearer(ref t)) if t == "xyz"));
    }

    #[test]
    fn skips_unknown_flag_with_argument() {
        let toks = curl_tokens("curl https://example.invalid --silly-flag value");
        let cmd = build_curl_command(&toks).unwrap();
        assert_eq!(cmd.method, "GET");
    }

    #[test]
    fn splits_query_string() {
        let (url, query) = split_query("https://example.invalid/x?a=1&b=2");
        assert_eq!(url, "https://example.invalid/x");
        assert_eq!(query, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }

    #[test]
    fn infers_json_body_type() {
        let mut headers = HashMap::new();
        let body = infer_body(r#"{"a":1}"#, false, &mut headers);
        assert!(matches!(body, Body::Json(_)));
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
    }

    #[test]
    fn infers_form_body_type() {
        let mut headers = HashMap::new();
        let body = infer_body("a=1&b=2", false, &mut headers);
        assert!(matches!(body, Body::Form(_)));
    }

    #[test]
    fn translate_curl_line_builds_request_record() {
        let record = translate_curl_line(
            "curl -X POST https://example.invalid/login -H 'Authorization: Bearer xyz' -d '{\"user\":\"a\"}'",
            "cli::1",
        )
        .unwrap();
        assert_eq!(record.request.method, "POST");
        assert_eq!(record.request.url, "https://example.invalid/login");
        assert!(matches!(record.request.auth, Some(Auth::Bearer { ref token }) if token == "xyz"));
        assert!(matches!(record.request.body, Some(Body::Json(_))));
    }

    #[test]
    fn url_with_inline_var_keeps_segments() {
        let toks = curl_tokens("curl https://example.invalid/users/${id}");
        let cmd = build_curl_command(&toks).unwrap();
        assert!(cmd
            .url_segments
            .iter()
            .any(|s| matches!(s, UrlSegment::Var(v) if v == "id")));
    }
}
