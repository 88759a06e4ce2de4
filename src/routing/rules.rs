//! Declarative routing rule evaluation.
//!
//! # Data Flow
//! ```text
//! RuleConfig[] (platform file + inline)
//!     → RuleSet::compile (bad rules logged and dropped)
//!     → RuleSet::apply(method, uri)
//!         fold over rules with RoutingState { uri, headers }
//!         each rule: match → method gate → headers → redirect? → dest → continue?
//!     → RuleOutcome { result, headers, uri }
//! ```
//!
//! # Design Decisions
//! - Each rule matches against the *current* path, i.e. after earlier rewrites
//! - A redirect status stops evaluation before the same rule's `dest` is rendered
//! - Evaluation is pure; the dispatcher writes headers and the rewritten URI

use std::ops::ControlFlow;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use regex::Regex;
use url::Url;

use crate::config::RuleConfig;
use crate::routing::template::render;

/// Status codes that end rule evaluation with a redirect.
pub const REDIRECT_STATUS_CODES: [u16; 5] = [301, 302, 303, 307, 308];

/// Error compiling a single rule.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule has no \"src\"")]
    MissingSource,

    #[error("invalid \"src\" regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
}

/// Final routing decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingResult {
    /// Respond with this redirect status and no body.
    Redirect(StatusCode),
    /// Continue with this (possibly rewritten) path.
    Applied(String),
}

/// Everything the rule pass produced.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub result: RoutingResult,
    /// Headers to put on the client response.
    pub headers: HeaderMap,
    /// Path and query after all rewrites.
    pub uri: String,
}

/// One compiled routing rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    source: Regex,
    methods: Option<Vec<String>>,
    headers: Vec<(HeaderName, String)>,
    status: Option<u16>,
    dest: Option<String>,
    continue_on_match: bool,
}

impl RoutingRule {
    pub fn compile(config: &RuleConfig) -> Result<Self, RuleError> {
        let src = config.src.as_deref().ok_or(RuleError::MissingSource)?;
        let source = Regex::new(&normalize_source(src))?;

        let headers: Vec<(HeaderName, String)> = match &config.headers {
            Some(headers) => headers
                .iter()
                .map(|(name, template)| {
                    HeaderName::try_from(name.as_str())
                        .map(|name| (name, template.clone()))
                        .map_err(|_| RuleError::InvalidHeaderName(name.clone()))
                })
                .collect::<Result<_, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            source,
            methods: config.methods.clone(),
            headers,
            status: config.status,
            dest: config.dest.clone(),
            continue_on_match: config.continue_on_match,
        })
    }

    pub fn source(&self) -> &str {
        self.source.as_str()
    }

    fn allows(&self, method: &str) -> bool {
        match &self.methods {
            Some(methods) => methods.iter().any(|m| m == method),
            None => true,
        }
    }

    fn redirect_status(&self) -> Option<StatusCode> {
        self.status
            .filter(|s| REDIRECT_STATUS_CODES.contains(s))
            .and_then(|s| StatusCode::from_u16(s).ok())
    }

    fn proceed(&self, state: RoutingState) -> ControlFlow<RoutingState, RoutingState> {
        if self.continue_on_match {
            ControlFlow::Continue(state)
        } else {
            ControlFlow::Break(state)
        }
    }

    /// One step of the fold.
    fn evaluate(
        &self,
        mut state: RoutingState,
        method: &str,
        named_in_headers: bool,
    ) -> ControlFlow<RoutingState, RoutingState> {
        let path = path_of(&state.uri).to_string();
        let Some(caps) = self.source.captures(&path) else {
            return ControlFlow::Continue(state);
        };
        tracing::debug!(src = %self.source, path = %path, "Rule matched");

        if !self.allows(method) {
            tracing::debug!(src = %self.source, method = %method, "Rule does not allow method");
            return self.proceed(state);
        }

        for (name, template) in &self.headers {
            let rendered = render(template, &self.source, &caps, named_in_headers);
            match HeaderValue::from_str(&rendered) {
                Ok(value) => {
                    state.headers.insert(name.clone(), value);
                }
                Err(_) => {
                    tracing::warn!(header = %name, value = %rendered, "Skipping invalid rendered header");
                }
            }
        }

        if let Some(status) = self.redirect_status() {
            tracing::debug!(status = %status, "Stopping rule evaluation on redirect status");
            state.redirect = Some(status);
            return ControlFlow::Break(state);
        }

        if let Some(dest) = &self.dest {
            let rendered = render(dest, &self.source, &caps, true);
            match rewrite(&rendered, &state.uri) {
                Some(uri) => {
                    tracing::debug!(from = %state.uri, to = %uri, "Rewrote request");
                    state.uri = uri;
                }
                None => {
                    tracing::warn!(src = %self.source, dest = %rendered, "Skipping unparsable destination");
                }
            }
        }

        self.proceed(state)
    }
}

/// Accumulator threaded through the fold.
#[derive(Debug)]
struct RoutingState {
    uri: String,
    headers: HeaderMap,
    redirect: Option<StatusCode>,
}

/// Ordered, compiled rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<RoutingRule>,
    named_groups_in_headers: bool,
}

impl RuleSet {
    /// Compile rules in order. Rules that fail to compile are logged and left out.
    pub fn compile(configs: &[RuleConfig], named_groups_in_headers: bool) -> Self {
        let rules = configs
            .iter()
            .enumerate()
            .filter_map(|(index, config)| match RoutingRule::compile(config) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(index, src = ?config.src, error = %e, "Skipping routing rule");
                    None
                }
            })
            .collect();

        Self {
            rules,
            named_groups_in_headers,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the rules against a request's method and path-and-query.
    pub fn apply(&self, method: &str, uri: &str) -> RuleOutcome {
        let initial = RoutingState {
            uri: uri.to_string(),
            headers: HeaderMap::new(),
            redirect: None,
        };

        let flow = self.rules.iter().try_fold(initial, |state, rule| {
            rule.evaluate(state, method, self.named_groups_in_headers)
        });
        let state = match flow {
            ControlFlow::Continue(state) | ControlFlow::Break(state) => state,
        };

        let result = match state.redirect {
            Some(status) => RoutingResult::Redirect(status),
            None => RoutingResult::Applied(path_of(&state.uri).to_string()),
        };
        tracing::debug!(uri = %state.uri, result = ?result, "Routing applied");

        RuleOutcome {
            result,
            headers: state.headers,
            uri: state.uri,
        }
    }
}

fn path_of(uri: &str) -> &str {
    match uri.split_once('?') {
        Some((path, _)) => path,
        None => uri,
    }
}

/// Anchor a rule source at both ends and drop escapes in front of `/`.
fn normalize_source(src: &str) -> String {
    let mut source = String::with_capacity(src.len() + 2);
    if !src.starts_with('^') {
        source.push('^');
    }
    source.push_str(&src.replace("\\/", "/"));
    if !src.ends_with('$') {
        source.push('$');
    }
    source
}

/// Build the rewritten path-and-query: destination first, then the current query appended.
fn rewrite(dest: &str, current: &str) -> Option<String> {
    // `join` would read a leading `//` as an authority.
    let mut target = if dest.starts_with('/') {
        Url::parse(&format!("http://localhost{dest}")).ok()?
    } else {
        Url::parse("http://localhost/").ok()?.join(dest).ok()?
    };

    if let Some((_, query)) = current.split_once('?') {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        if !pairs.is_empty() {
            target.query_pairs_mut().extend_pairs(pairs);
        }
    }

    Some(match target.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", target.path(), query),
        _ => target.path().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn rule(src: &str) -> RuleConfig {
        RuleConfig {
            src: Some(src.into()),
            ..Default::default()
        }
    }

    fn with_dest(src: &str, dest: &str) -> RuleConfig {
        RuleConfig {
            dest: Some(dest.into()),
            ..rule(src)
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn applied(outcome: &RuleOutcome) -> &str {
        match &outcome.result {
            RoutingResult::Applied(path) => path,
            other => panic!("expected applied, got {:?}", other),
        }
    }

    #[test]
    fn later_rules_see_rewritten_path() {
        let rules = RuleSet::compile(
            &[
                RuleConfig {
                    continue_on_match: true,
                    ..with_dest("^/a$", "/b")
                },
                with_dest("^/b$", "/c"),
            ],
            true,
        );
        assert_eq!(applied(&rules.apply("GET", "/a")), "/c");
    }

    #[test]
    fn non_continuing_match_stops_evaluation() {
        let rules = RuleSet::compile(
            &[with_dest("^/a$", "/b"), with_dest("^/b$", "/c")],
            true,
        );
        assert_eq!(applied(&rules.apply("GET", "/a")), "/b");
    }

    #[test]
    fn no_match_moves_on() {
        let rules = RuleSet::compile(&[with_dest("^/x$", "/y"), with_dest("^/a$", "/z")], true);
        assert_eq!(applied(&rules.apply("GET", "/a")), "/z");
        assert_eq!(applied(&rules.apply("GET", "/other")), "/other");
    }

    #[test]
    fn numbered_header_templates() {
        let rules = RuleSet::compile(
            &[RuleConfig {
                headers: headers(&[("x", "foo-$1-$2"), ("x-first", "foo-$1")]),
                ..rule(r"^/(\w+)/(\w+)$")
            }],
            true,
        );
        let outcome = rules.apply("GET", "/one/two");
        assert_eq!(outcome.headers["x"], "foo-one-two");
        assert_eq!(outcome.headers["x-first"], "foo-one");
        assert_eq!(applied(&outcome), "/one/two");
    }

    #[test]
    fn named_header_templates_follow_setting() {
        let config = [RuleConfig {
            headers: headers(&[("x", "foo-:first")]),
            ..rule(r"^/(?P<first>\w+)$")
        }];
        assert_eq!(RuleSet::compile(&config, true).apply("GET", "/one").headers["x"], "foo-one");
        assert_eq!(
            RuleSet::compile(&config, false).apply("GET", "/one").headers["x"],
            "foo-:first"
        );
    }

    #[test]
    fn redirect_short_circuits_and_ignores_dest() {
        let rules = RuleSet::compile(
            &[
                RuleConfig {
                    status: Some(301),
                    dest: Some("/ignored".into()),
                    headers: headers(&[("Location", "https://example.com")]),
                    ..rule("^/redirect$")
                },
                RuleConfig {
                    headers: headers(&[("x-after", "1")]),
                    ..rule("^/redirect$")
                },
            ],
            true,
        );
        let outcome = rules.apply("GET", "/redirect");
        assert_eq!(outcome.result, RoutingResult::Redirect(StatusCode::MOVED_PERMANENTLY));
        assert_eq!(outcome.headers["location"], "https://example.com");
        assert!(!outcome.headers.contains_key("x-after"));
        assert_eq!(outcome.uri, "/redirect");
    }

    #[test]
    fn every_redirect_code_redirects() {
        for code in REDIRECT_STATUS_CODES {
            let rules = RuleSet::compile(
                &[RuleConfig {
                    status: Some(code),
                    ..rule("^/r$")
                }],
                true,
            );
            assert_eq!(
                rules.apply("GET", "/r").result,
                RoutingResult::Redirect(StatusCode::from_u16(code).unwrap())
            );
        }
    }

    #[test]
    fn non_redirect_status_does_not_short_circuit() {
        let rules = RuleSet::compile(
            &[RuleConfig {
                status: Some(200),
                ..with_dest("^/a$", "/b")
            }],
            true,
        );
        assert_eq!(applied(&rules.apply("GET", "/a")), "/b");
    }

    #[test]
    fn redirect_location_from_group() {
        let rules = RuleSet::compile(
            &[RuleConfig {
                status: Some(301),
                headers: headers(&[("Location", "/api/articles/$1")]),
                ..rule("^/redirect-with-group/(.*)$")
            }],
            true,
        );
        let outcome = rules.apply("GET", "/redirect-with-group/foo-bar-baz");
        assert_eq!(outcome.headers["location"], "/api/articles/foo-bar-baz");
    }

    #[test]
    fn method_mismatch_without_continue_stops() {
        let rules = RuleSet::compile(
            &[
                RuleConfig {
                    methods: Some(vec!["POST".into()]),
                    ..with_dest("^/restricted$", "/api/method")
                },
                with_dest("^/restricted$", "/elsewhere"),
            ],
            true,
        );
        assert_eq!(applied(&rules.apply("POST", "/restricted")), "/api/method");
        assert_eq!(applied(&rules.apply("GET", "/restricted")), "/restricted");
    }

    #[test]
    fn method_mismatch_with_continue_moves_on() {
        let rules = RuleSet::compile(
            &[
                RuleConfig {
                    methods: Some(vec!["POST".into()]),
                    continue_on_match: true,
                    ..with_dest("^/restricted$", "/api/method")
                },
                with_dest("^/restricted$", "/elsewhere"),
            ],
            true,
        );
        assert_eq!(applied(&rules.apply("GET", "/restricted")), "/elsewhere");
    }

    #[test]
    fn query_strings_stack() {
        let rules = RuleSet::compile(
            &[
                RuleConfig {
                    continue_on_match: true,
                    ..with_dest("^/stack$", "/stack?internalContinued=true")
                },
                with_dest("^/stack$", "/api/query?internal=bar"),
            ],
            true,
        );
        let outcome = rules.apply("GET", "/stack?external=foo");
        assert_eq!(applied(&outcome), "/api/query");
        let query: Vec<(String, String)> = url::form_urlencoded::parse(
            outcome.uri.split_once('?').unwrap().1.as_bytes(),
        )
        .into_owned()
        .collect();
        assert!(query.contains(&("external".into(), "foo".into())));
        assert!(query.contains(&("internal".into(), "bar".into())));
        assert!(query.contains(&("internalContinued".into(), "true".into())));
    }

    #[test]
    fn duplicate_query_keys_are_appended() {
        let rules = RuleSet::compile(&[with_dest("^/a$", "/b?k=dest")], true);
        assert_eq!(rules.apply("GET", "/a?k=orig").uri, "/b?k=dest&k=orig");
    }

    #[test]
    fn dest_backreferences() {
        let rules = RuleSet::compile(
            &[with_dest(r"^/numbered-groups/(\w+)/(\w+)$", "/api/groups?first=$1&second=$2")],
            true,
        );
        assert_eq!(
            rules.apply("GET", "/numbered-groups/one/two").uri,
            "/api/groups?first=one&second=two"
        );

        let rules = RuleSet::compile(
            &[with_dest(r"^/named/(?P<first>\w+)$", "/api/:first")],
            false,
        );
        assert_eq!(rules.apply("GET", "/named/one").uri, "/api/one");
    }

    #[test]
    fn terminal_rule_without_effects_stops() {
        let rules = RuleSet::compile(&[rule("^/stop$"), with_dest("^/stop$", "/never")], true);
        assert_eq!(applied(&rules.apply("GET", "/stop")), "/stop");
    }

    #[test]
    fn double_slash_destination_keeps_first_segment() {
        let rules = RuleSet::compile(&[with_dest("^(/.*)$", "/$1")], true);
        assert_eq!(applied(&rules.apply("GET", "/foo/bar")), "//foo/bar");

        let rules = RuleSet::compile(&[with_dest("^/a$", "//b/c?x=1")], true);
        assert_eq!(rules.apply("GET", "/a?y=2").uri, "//b/c?x=1&y=2");
    }

    #[test]
    fn unanchored_sources_match_whole_path() {
        let rules = RuleSet::compile(&[with_dest("/foo", "/api/x")], true);
        assert_eq!(applied(&rules.apply("GET", "/other/foo/bar")), "/other/foo/bar");
        assert_eq!(applied(&rules.apply("GET", "/foo")), "/api/x");
        assert_eq!(rules.apply("GET", "/foo?q=1").uri, "/api/x?q=1");

        let rules = RuleSet::compile(&[with_dest(r"\/docs\/(\w+)", "/api/$1")], true);
        assert_eq!(applied(&rules.apply("GET", "/docs/intro")), "/api/intro");
        assert_eq!(applied(&rules.apply("GET", "/v2/docs/intro")), "/v2/docs/intro");
    }

    #[test]
    fn normalized_sources_keep_existing_anchors() {
        assert_eq!(normalize_source("/foo"), "^/foo$");
        assert_eq!(normalize_source("^/foo$"), "^/foo$");
        assert_eq!(normalize_source("^/a\\/b"), "^/a/b$");
    }

    #[test]
    fn methods_compare_exactly() {
        let rules = RuleSet::compile(
            &[
                RuleConfig {
                    methods: Some(vec!["post".into()]),
                    continue_on_match: true,
                    headers: headers(&[("x-lower", "1")]),
                    ..rule("^/m$")
                },
                RuleConfig {
                    methods: Some(vec!["POST".into()]),
                    headers: headers(&[("x-upper", "1")]),
                    ..rule("^/m$")
                },
            ],
            true,
        );
        let outcome = rules.apply("POST", "/m");
        assert!(!outcome.headers.contains_key("x-lower"));
        assert_eq!(outcome.headers["x-upper"], "1");
    }

    #[test]
    fn broken_rules_are_skipped() {
        let rules = RuleSet::compile(
            &[
                RuleConfig::default(),
                rule("(unclosed"),
                RuleConfig {
                    headers: headers(&[("bad header", "x")]),
                    ..rule("^/a$")
                },
                with_dest("^/a$", "/ok"),
            ],
            true,
        );
        assert_eq!(rules.len(), 1);
        assert_eq!(applied(&rules.apply("GET", "/a")), "/ok");
    }
}
