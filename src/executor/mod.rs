//! Sends one [`RequestRecord`] over the wire and returns an
//! [`EvaluationContext`]. Keeps a single `reqwest::Client` per executor
//! instance so the connection pool is shared across requests, measures
//! latency with `Instant::now()` spanning send-through-body-read, and falls
//! back to the raw text body when the response isn't valid JSON. A transport
//! failure (DNS, TLS, timeout) never short-circuits the caller — it comes
//! back as `status: 0` with `response.error` populated, so the evaluator
//! gateway still gets a context to reason about.

use crate::cookie::CookieJar;
use crate::evaluator::{ObservedResponse, ResponseBody, SentRequest};
use crate::ir::{Auth, Body, RequestRecord};
use anyhow::{anyhow, Context as _, Result};
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    /// Builds the client once per `TransportOptions` shape used by the
    /// caller; a scenario driver typically keeps one executor per distinct
    /// transport configuration rather than per request. `max_step_timeout`
    /// is a hard ceiling: a scenario's own `timeout_ms` can ask for less,
    /// never more.
    pub fn new(record: &RequestRecord, max_step_timeout: Duration) -> Result<Self> {
        let transport = &record.transport;
        let timeout = Duration::from_millis(transport.timeout_ms).min(max_step_timeout);
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(!transport.tls_verify)
            .timeout(timeout);

        builder = if transport.follow_redirects {
            builder.redirect(reqwest::redirect::Policy::limited(transport.max_redirects as usize))
        } else {
            builder.redirect(reqwest::redirect::Policy::none())
        };

        if let Some(proxy) = &transport.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }

        let client = builder.build().context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub async fn send(&self, record: &RequestRecord, cookies: &mut CookieJar) -> Result<(SentRequest, ObservedResponse)> {
        let spec = &record.request;
        let method = Method::from_bytes(spec.method.as_bytes())
            .map_err(|e| anyhow!("invalid HTTP method '{}': {}", spec.method, e))?;

        let url = build_url(&spec.url, &spec.query)?;
        let origin = origin_of(&url);

        let mut request_builder = self.client.request(method.clone(), url.as_str());

        let mut sent_headers = spec.headers.clone();
        for (name, value) in &spec.headers {
            request_builder = request_builder.header(name, value);
        }

        if !spec.cookies.is_empty() {
            let explicit: String = spec
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            request_builder = request_builder.header(reqwest::header::COOKIE, &explicit);
            sent_headers.insert("Cookie".to_string(), explicit);
        } else if let Some(jar_header) = cookies.cookie_header_for(&origin) {
            request_builder = request_builder.header(reqwest::header::COOKIE, &jar_header);
            sent_headers.insert("Cookie".to_string(), jar_header);
        }

        match &spec.auth {
            Some(Auth::Basic { username, password }) => {
                request_builder = request_builder.basic_auth(username, Some(password));
            }
            Some(Auth::Bearer { token }) => {
                request_builder = request_builder.bearer_auth(token);
            }
            None => {}
        }

        let sent_body = spec.body.as_ref().map(body_as_json);
        if let Some(body) = &spec.body {
            request_builder = attach_body(request_builder, body);
        }

        let sent = SentRequest {
            method: spec.method.clone(),
            url: url.to_string(),
            headers: sent_headers,
            body: sent_body,
        };

        let start = Instant::now();
        let response = request_builder.send().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let observed = match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let headers = collect_headers(resp.headers());
                let set_cookie = collect_set_cookie(resp.headers());
                let raw_body = resp.text().await.unwrap_or_default();
                let bytes = raw_body.len() as u64;
                let body = match serde_json::from_str::<Value>(&raw_body) {
                    Ok(v) if v.is_object() || v.is_array() => ResponseBody::Json(v),
                    _ => ResponseBody::Text(raw_body),
                };

                if !set_cookie.is_empty() {
                    cookies.store_all(&origin, &set_cookie);
                }

                ObservedResponse {
                    status,
                    headers,
                    body,
                    latency_ms,
                    bytes,
                    error: None,
                    set_cookie,
                }
            }
            Err(e) => ObservedResponse {
                status: 0,
                headers: HashMap::new(),
                body: ResponseBody::Text(String::new()),
                latency_ms,
                bytes: 0,
                error: Some(e.to_string()),
                set_cookie: Vec::new(),
            },
        };

        Ok((sent, observed))
    }
}

fn build_url(base: &str, query: &[(String, String)]) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base).with_context(|| format!("invalid URL '{}'", base))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

fn origin_of(url: &reqwest::Url) -> String {
    url.origin().ascii_serialization()
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect()
}

fn collect_set_cookie(headers: &reqwest::header::HeaderMap) -> Vec<String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

fn body_as_json(body: &Body) -> Value {
    match body {
        Body::Json(v) => v.clone(),
        Body::Form(m) => serde_json::to_value(m).unwrap_or(Value::Null),
        Body::Text(s) => Value::String(s.clone()),
        Body::Binary(b64) => Value::String(b64.clone()),
    }
}

fn attach_body(builder: reqwest::RequestBuilder, body: &Body) -> reqwest::RequestBuilder {
    match body {
        Body::Json(v) => builder.json(v),
        Body::Form(m) => builder.form(m),
        Body::Text(s) => builder.body(s.clone()),
        Body::Binary(b64) => {
            use base64::{engine::general_purpose::STANDARD, Engine};
            match STANDARD.decode(b64) {
                Ok(bytes) => builder.body(bytes),
                Err(_) => builder.body(b64.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_appends_query_pairs() {
        let url = build_url("https://example.invalid/path", &[("a".to_string(), "1".to_string())]).unwrap();
        assert_eq!(url.as_str(), "https://example.invalid/path?a=1");
    }

    #[test]
    fn origin_drops_path_and_query() {
        let url = reqwest::Url::parse("https://example.invalid:8443/a/b?x=1").unwrap();
        assert_eq!(origin_of(&url), "https://example.invalid:8443");
    }

    #[test]
    fn json_body_round_trips_through_value() {
        let body = Body::Json(serde_json::json!({"a": 1}));
        assert_eq!(body_as_json(&body), serde_json::json!({"a": 1}));
    }
}
