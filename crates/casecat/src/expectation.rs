//! Response expectations (`"resp"` in a case).
//!
//! Every configured rule is evaluated, even after an earlier one failed, so a
//! single run reports all mismatching fields. The one exception is the cookie
//! list, which stops at its first mismatch.

use crate::client::CaseResponse;
use crate::matcher::{CompiledMatchRule, Diagnostic, MatchRule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

const STATUS_KEY: &str = "status";
const BODY_KEY: &str = "body";

/// Expected response as written in the case file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Expectation {
    #[serde(default)]
    pub status: MatchRule,
    #[serde(default)]
    pub headers: Vec<MatchRule>,
    #[serde(default)]
    pub cookies: Vec<MatchRule>,
    #[serde(default)]
    pub body: MatchRule,
}

impl Expectation {
    /// Compile every rule, collecting all regex errors rather than stopping at
    /// the first. Each error is prefixed with where the rule lives.
    pub fn compile(&self) -> Result<CompiledExpectation, Vec<String>> {
        let mut errors = Vec::new();

        let mut compile_one = |rule: &MatchRule, default_key: &str, location: String| {
            CompiledMatchRule::compile(rule, default_key)
                .map_err(|e| errors.push(format!("{location}: {e}")))
                .ok()
        };

        let status = compile_one(&self.status, STATUS_KEY, "resp.status".to_string());
        let headers: Vec<_> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, rule)| compile_one(rule, "", format!("resp.headers[{i}]")))
            .collect();
        let cookies: Vec<_> = self
            .cookies
            .iter()
            .enumerate()
            .map(|(i, rule)| compile_one(rule, "", format!("resp.cookies[{i}]")))
            .collect();
        let body = compile_one(&self.body, BODY_KEY, "resp.body".to_string());

        match (status, body) {
            (Some(status), Some(body)) if errors.is_empty() => Ok(CompiledExpectation {
                status,
                headers: headers.into_iter().flatten().collect(),
                cookies: cookies.into_iter().flatten().collect(),
                body,
            }),
            _ => Err(errors),
        }
    }
}

/// Outcome of checking one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    /// Fields that did not match, in evaluation order.
    pub mismatches: Vec<Diagnostic>,
    /// Set when the body could not be read.
    pub body_error: Option<String>,
}

impl MatchReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty() && self.body_error.is_none()
    }

    fn check(&mut self, rule: &CompiledMatchRule, actual: &str) -> bool {
        let (ok, diagnostic) = rule.matches(actual);
        if !ok {
            warn!(
                field = %diagnostic.field,
                actual = %diagnostic.actual,
                expected = %diagnostic.expected,
                "{}",
                diagnostic
            );
            self.mismatches.push(diagnostic);
        }
        ok
    }
}

/// Expectation with compiled rules and default field names applied.
#[derive(Debug, Clone)]
pub struct CompiledExpectation {
    status: CompiledMatchRule,
    headers: Vec<CompiledMatchRule>,
    cookies: Vec<CompiledMatchRule>,
    body: CompiledMatchRule,
}

impl CompiledExpectation {
    /// Check a response against every rule, consuming its body.
    pub async fn evaluate(&self, response: CaseResponse) -> MatchReport {
        let mut report = MatchReport::default();

        report.check(&self.status, response.status_line());

        for rule in &self.headers {
            let actual = if rule.key().eq_ignore_ascii_case("set-cookie") {
                response.set_cookie_header()
            } else {
                response.header(rule.key())
            };
            report.check(rule, &actual);
        }

        if !self.cookies.is_empty() {
            let jar: HashMap<String, String> = response.cookies().into_iter().collect();
            for rule in &self.cookies {
                let actual = jar.get(rule.key()).map(String::as_str).unwrap_or_default();
                if !report.check(rule, actual) {
                    break;
                }
            }
        }

        match response.read_body().await {
            Ok(data) => {
                report.check(&self.body, &String::from_utf8_lossy(&data));
            }
            Err(e) => {
                warn!("got resp body error. {}", e);
                report.body_error = Some(e.to_string());
            }
        }

        report
    }
}
