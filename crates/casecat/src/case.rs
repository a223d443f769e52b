//! Test cases: loading, validation and execution.
//!
//! A case file is a JSON array of cases. Loading compiles every match rule up
//! front; any malformed regex anywhere in the file rejects the whole file, so a
//! run never stops half way on a configuration mistake.

use crate::client::HttpClient;
use crate::error::CaseError;
use crate::expectation::{CompiledExpectation, Expectation, MatchReport};
use crate::matcher::MatchRule;
use crate::request::RequestSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

/// One case as written in the case file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestCase {
    #[serde(default)]
    pub title: String,
    /// Seconds to wait before the first attempt.
    #[serde(default)]
    pub delay: i64,
    /// Extra attempts after the first one.
    #[serde(default)]
    pub repeat: u32,
    #[serde(default)]
    pub req: RequestSpec,
    #[serde(default)]
    pub resp: Expectation,
}

impl TestCase {
    pub fn compile(&self) -> Result<CompiledCase, Vec<String>> {
        let expectation = self.resp.compile()?;
        Ok(CompiledCase {
            title: self.title.clone(),
            delay: Duration::from_secs(self.delay.max(0) as u64),
            repeat: self.repeat,
            request: self.req.clone(),
            expectation,
        })
    }
}

/// Read, parse and validate a case file.
pub fn load_cases(path: &Path) -> Result<Vec<CompiledCase>, CaseError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| CaseError::Read(path.to_path_buf(), e))?;
    parse_cases(&contents)
}

/// Parse and validate a case document held in memory.
pub fn parse_cases(json: &str) -> Result<Vec<CompiledCase>, CaseError> {
    let cases: Vec<TestCase> = serde_json::from_str(json)?;
    compile_cases(&cases)
}

/// Compile all cases, reporting every invalid rule at once.
pub fn compile_cases(cases: &[TestCase]) -> Result<Vec<CompiledCase>, CaseError> {
    let mut compiled = Vec::with_capacity(cases.len());
    let mut errors = Vec::new();

    for (index, case) in cases.iter().enumerate() {
        match case.compile() {
            Ok(c) => compiled.push(c),
            Err(case_errors) => errors.extend(
                case_errors
                    .into_iter()
                    .map(|e| format!("case[{index}] '{}' {e}", case.title)),
            ),
        }
    }

    if errors.is_empty() {
        Ok(compiled)
    } else {
        Err(CaseError::InvalidRules(errors))
    }
}

/// A pretty-printed one-case document with every field present, for `--case help`.
pub fn example_document() -> Result<String, serde_json::Error> {
    let example = TestCase {
        req: RequestSpec {
            headers: HashMap::from([(String::new(), String::new())]),
            ..Default::default()
        },
        resp: Expectation {
            headers: vec![MatchRule::default()],
            cookies: vec![MatchRule::default()],
            ..Default::default()
        },
        ..Default::default()
    };
    serde_json::to_string_pretty(&vec![example])
}

/// The first request plus `repeat` more.
fn total_attempts(repeat: u32) -> u64 {
    u64::from(repeat) + 1
}

/// Why a case failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseFailure {
    /// The request could not be built; nothing was sent.
    InvalidRequest(String),
    /// The client failed to get a response.
    Transport(String),
    /// A response did not meet the expectation.
    Mismatch(MatchReport),
}

/// Result of playing one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    pub title: String,
    /// Requests sent, including the failing one.
    pub attempts: u64,
    pub failure: Option<CaseFailure>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// A validated case, ready to play.
#[derive(Debug, Clone)]
pub struct CompiledCase {
    title: String,
    delay: Duration,
    repeat: u32,
    request: RequestSpec,
    expectation: CompiledExpectation,
}

impl CompiledCase {
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Play the case against `addr`: wait, then send the request `repeat + 1`
    /// times, stopping at the first transport error or mismatch.
    pub async fn play(&self, client: &mut dyn HttpClient, addr: &str) -> CaseReport {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        info!("====[Title:{}][repeat:{}]====", self.title, self.repeat);

        let (attempts, failure) = self.run_attempts(client, addr).await;

        if failure.is_none() {
            info!("====[OK]====");
        } else {
            warn!("====[Failed]====");
        }

        CaseReport {
            title: self.title.clone(),
            attempts,
            failure,
        }
    }

    async fn run_attempts(
        &self,
        client: &mut dyn HttpClient,
        addr: &str,
    ) -> (u64, Option<CaseFailure>) {
        let request = match self.request.build(addr) {
            Ok(request) => request,
            Err(e) => {
                error!("{}", e);
                return (0, Some(CaseFailure::InvalidRequest(e.to_string())));
            }
        };

        client.set_timeout(self.request.timeout());

        for attempt in 1..=total_attempts(self.repeat) {
            let response = match client.execute(&request).await {
                Ok(response) => response,
                Err(e) => {
                    error!("{}", e);
                    return (attempt, Some(CaseFailure::Transport(e.to_string())));
                }
            };

            let report = self.expectation.evaluate(response).await;
            if !report.passed() {
                return (attempt, Some(CaseFailure::Mismatch(report)));
            }
        }

        (total_attempts(self.repeat), None)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::CaseResponse;
    use crate::error::ClientError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use hyper::{HeaderMap, Request};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Client double replaying scripted outcomes and recording what it saw.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        outcomes: Mutex<VecDeque<Result<(String, String), String>>>,
        pub(crate) uris: Mutex<Vec<String>>,
        pub(crate) timeouts: Vec<Duration>,
    }

    impl ScriptedClient {
        pub(crate) fn respond(self, status: &str, body: &str) -> Self {
            self.outcomes
                .lock()
                .unwrap()
                .push_back(Ok((status.to_string(), body.to_string())));
            self
        }

        pub(crate) fn fail(self, message: &str) -> Self {
            self.outcomes
                .lock()
                .unwrap()
                .push_back(Err(message.to_string()));
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.uris.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn execute(&self, request: &Request<Bytes>) -> Result<CaseResponse, ClientError> {
            self.uris.lock().unwrap().push(request.uri().to_string());
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted response".to_string()));
            match outcome {
                Ok((status, body)) => Ok(CaseResponse::full(status, HeaderMap::new(), body)),
                Err(message) => Err(ClientError::Request(message)),
            }
        }

        fn set_timeout(&mut self, timeout: Duration) {
            self.timeouts.push(timeout);
        }
    }

    pub(crate) fn ping_case(repeat: u32) -> CompiledCase {
        parse_cases(&format!(
            r#"[{{"title": "ping", "repeat": {repeat}, "req": {{"url": "/ping", "timeout": 3}},
                 "resp": {{"status": {{"value": "200 OK"}},
                           "body": {{"type": "contain", "value": "pong"}}}}}}]"#
        ))
        .unwrap()
        .remove(0)
    }

    #[tokio::test]
    async fn test_play_repeats_and_passes() {
        let mut client = ScriptedClient::default()
            .respond("200 OK", "pong!")
            .respond("200 OK", "pong!")
            .respond("200 OK", "pong!");

        let report = ping_case(2).play(&mut client, "127.0.0.1:8080").await;

        assert!(report.passed());
        assert_eq!(report.attempts, 3);
        assert_eq!(client.calls(), 3);
        assert_eq!(client.timeouts, vec![Duration::from_secs(3)]);
        assert!(client
            .uris
            .lock()
            .unwrap()
            .iter()
            .all(|u| u == "http://127.0.0.1:8080/ping"));
    }

    #[tokio::test]
    async fn test_play_stops_at_first_mismatch() {
        let mut client = ScriptedClient::default()
            .respond("200 OK", "pong")
            .respond("200 OK", "fail")
            .respond("200 OK", "pong");

        let report = ping_case(2).play(&mut client, "h:1").await;

        assert!(!report.passed());
        assert_eq!(report.attempts, 2);
        assert_eq!(client.calls(), 2);
        match report.failure {
            Some(CaseFailure::Mismatch(m)) => {
                assert_eq!(m.mismatches[0].field, "body");
                assert_eq!(m.mismatches[0].actual, "fail");
                assert_eq!(m.mismatches[0].expected, "pong");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_play_stops_at_transport_error() {
        let mut client = ScriptedClient::default()
            .fail("connection refused")
            .respond("200 OK", "pong");

        let report = ping_case(1).play(&mut client, "h:1").await;

        assert_eq!(report.attempts, 1);
        assert_eq!(client.calls(), 1);
        assert_eq!(
            report.failure,
            Some(CaseFailure::Transport(
                "Request failed: connection refused".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_invalid_request_sends_nothing() {
        let case = parse_cases(r#"[{"req": {"method": "NOT VALID", "url": "/"}}]"#)
            .unwrap()
            .remove(0);
        let mut client = ScriptedClient::default().respond("200 OK", "");

        let report = case.play(&mut client, "h:1").await;

        assert_eq!(report.attempts, 0);
        assert_eq!(client.calls(), 0);
        assert!(client.timeouts.is_empty());
        assert!(matches!(
            report.failure,
            Some(CaseFailure::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_delay_happens_before_first_attempt() {
        let case = parse_cases(r#"[{"delay": 1, "repeat": 1}]"#).unwrap().remove(0);
        let mut client = ScriptedClient::default()
            .respond("200 OK", "")
            .respond("200 OK", "");

        let start = std::time::Instant::now();
        let report = case.play(&mut client, "h:1").await;
        let elapsed = start.elapsed();

        assert!(report.passed());
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_largest_repeat_does_not_overflow() {
        assert_eq!(total_attempts(0), 1);
        assert_eq!(total_attempts(u32::MAX), u64::from(u32::MAX) + 1);
    }

    #[tokio::test]
    async fn test_largest_repeat_stops_at_first_failure() {
        let mut client = ScriptedClient::default()
            .respond("200 OK", "pong")
            .respond("503 Service Unavailable", "");

        let report = ping_case(u32::MAX).play(&mut client, "h:1").await;

        assert_eq!(report.attempts, 2);
        assert!(matches!(report.failure, Some(CaseFailure::Mismatch(_))));
    }

    #[test]
    fn test_parse_rejects_every_bad_regex_up_front() {
        let json = r#"[
            {"title": "one", "resp": {"body": {"type": "regex", "value": "("}}},
            {"title": "two", "resp": {"status": {"type": "regex", "value": "^2\\d\\d"}}},
            {"title": "three",
             "resp": {"cookies": [{"key": "c", "type": "regex", "value": "[b-a]"}]}}
        ]"#;

        match parse_cases(json) {
            Err(CaseError::InvalidRules(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].starts_with("case[0] 'one' resp.body:"));
                assert!(errors[1].starts_with("case[2] 'three' resp.cookies[0]:"));
            }
            other => panic!("expected InvalidRules, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(matches!(parse_cases("{"), Err(CaseError::Json(_))));
        assert!(matches!(parse_cases(r#"{"title": "x"}"#), Err(CaseError::Json(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_cases(Path::new("/nonexistent/case.json")).unwrap_err();
        assert!(matches!(err, CaseError::Read(_, _)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.json");
        std::fs::write(&path, r#"[{"title": "a"}, {"title": "b"}]"#).unwrap();

        let cases = load_cases(&path).unwrap();
        let titles: Vec<_> = cases.iter().map(|c| c.title()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[test]
    fn test_example_document_round_trips() {
        let doc = example_document().unwrap();
        let parsed: Vec<TestCase> = serde_json::from_str(&doc).unwrap();

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].resp.headers.len(), 1);
        assert_eq!(parsed[0].resp.cookies.len(), 1);
        assert!(doc.contains(r#""type": """#));
        assert!(!doc.contains("realAddr"));
    }
}
