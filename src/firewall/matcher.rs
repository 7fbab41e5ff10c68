//! Request matchers and key extractors.
//!
//! Rules never inspect requests directly; they delegate to a
//! [`RequestMatcher`] (does the rule apply?) and a [`KeyExtractor`] (which
//! counter does the request count against?). Closures plug in through
//! [`FnMatcher`] and [`FnExtractor`].

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use super::request::Request;

/// Outcome of a matcher with diagnostic context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub is_match: bool,
    /// Short description of what produced the result.
    pub source: String,
    /// Free-form detail, e.g. the header value that matched.
    pub metadata: Option<String>,
}

impl MatchResult {
    pub fn new(is_match: bool, source: impl Into<String>) -> Self {
        Self {
            is_match,
            source: source.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// Decides whether a rule applies to a request.
pub trait RequestMatcher: Send + Sync {
    fn matches(&self, request: &Request) -> bool;

    /// Match with diagnostic context. Defaults to wrapping [`matches`](Self::matches).
    fn evaluate(&self, request: &Request) -> MatchResult {
        MatchResult::new(self.matches(request), self.describe())
    }

    /// Human-readable name used in events and logs.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

/// Extracts the counter key a request is attributed to.
///
/// `None` means the rule does not apply to this request.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, request: &Request) -> Option<String>;
}

impl<M: RequestMatcher + ?Sized> RequestMatcher for Box<M> {
    fn matches(&self, request: &Request) -> bool {
        (**self).matches(request)
    }

    fn evaluate(&self, request: &Request) -> MatchResult {
        (**self).evaluate(request)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<K: KeyExtractor + ?Sized> KeyExtractor for Box<K> {
    fn extract(&self, request: &Request) -> Option<String> {
        (**self).extract(request)
    }
}

/// Adapter turning a predicate closure into a [`RequestMatcher`].
pub struct FnMatcher<F> {
    predicate: F,
    label: String,
}

impl<F> FnMatcher<F>
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            label: "closure".to_string(),
        }
    }

    /// Name reported by [`RequestMatcher::describe`].
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl<F> RequestMatcher for FnMatcher<F>
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    fn matches(&self, request: &Request) -> bool {
        (self.predicate)(request)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl<F> fmt::Debug for FnMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMatcher").field("label", &self.label).finish()
    }
}

/// Adapter turning a closure into a [`KeyExtractor`].
pub struct FnExtractor<F> {
    extract: F,
}

impl<F> FnExtractor<F>
where
    F: Fn(&Request) -> Option<String> + Send + Sync,
{
    pub fn new(extract: F) -> Self {
        Self { extract }
    }
}

impl<F> KeyExtractor for FnExtractor<F>
where
    F: Fn(&Request) -> Option<String> + Send + Sync,
{
    fn extract(&self, request: &Request) -> Option<String> {
        (self.extract)(request)
    }
}

/// Build a matcher from a predicate closure.
pub fn predicate<F>(f: F) -> FnMatcher<F>
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    FnMatcher::new(f)
}

/// Build a key extractor from a closure.
pub fn key_fn<F>(f: F) -> FnExtractor<F>
where
    F: Fn(&Request) -> Option<String> + Send + Sync,
{
    FnExtractor::new(f)
}

/// Matches every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl RequestMatcher for Always {
    fn matches(&self, _request: &Request) -> bool {
        true
    }

    fn describe(&self) -> String {
        "always".to_string()
    }
}

/// Matches requests whose path starts with a prefix.
#[derive(Debug, Clone)]
pub struct PathPrefix(pub String);

impl RequestMatcher for PathPrefix {
    fn matches(&self, request: &Request) -> bool {
        request.path().starts_with(self.0.as_str())
    }

    fn describe(&self) -> String {
        format!("path_prefix:{}", self.0)
    }
}

/// Matches requests whose path equals a value.
#[derive(Debug, Clone)]
pub struct PathEquals(pub String);

impl RequestMatcher for PathEquals {
    fn matches(&self, request: &Request) -> bool {
        request.path() == self.0
    }

    fn describe(&self) -> String {
        format!("path:{}", self.0)
    }
}

/// Matches requests by HTTP method, ignoring case.
#[derive(Debug, Clone)]
pub struct MethodIs(pub String);

impl RequestMatcher for MethodIs {
    fn matches(&self, request: &Request) -> bool {
        request.method().eq_ignore_ascii_case(&self.0)
    }

    fn describe(&self) -> String {
        format!("method:{}", self.0.to_ascii_uppercase())
    }
}

/// Matches requests carrying a header with an exact value.
#[derive(Debug, Clone)]
pub struct HeaderEquals {
    pub name: String,
    pub value: String,
}

impl HeaderEquals {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl RequestMatcher for HeaderEquals {
    fn matches(&self, request: &Request) -> bool {
        request.header(&self.name) == Some(self.value.as_str())
    }

    fn evaluate(&self, request: &Request) -> MatchResult {
        let result = MatchResult::new(self.matches(request), self.describe());
        match request.header(&self.name) {
            Some(value) => result.with_metadata(value),
            None => result,
        }
    }

    fn describe(&self) -> String {
        format!("header:{}", self.name)
    }
}

/// Matches requests carrying a header, whatever its value.
#[derive(Debug, Clone)]
pub struct HeaderPresent(pub String);

impl RequestMatcher for HeaderPresent {
    fn matches(&self, request: &Request) -> bool {
        request.header(&self.0).is_some()
    }

    fn describe(&self) -> String {
        format!("header_present:{}", self.0)
    }
}

/// Matches requests from a fixed set of client addresses.
#[derive(Debug, Clone, Default)]
pub struct IpList {
    addrs: HashSet<IpAddr>,
}

impl IpList {
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }
}

impl RequestMatcher for IpList {
    fn matches(&self, request: &Request) -> bool {
        request
            .client_ip()
            .is_some_and(|ip| self.addrs.contains(&ip))
    }

    fn evaluate(&self, request: &Request) -> MatchResult {
        let result = MatchResult::new(self.matches(request), self.describe());
        match request.client_ip() {
            Some(ip) => result.with_metadata(ip.to_string()),
            None => result,
        }
    }

    fn describe(&self) -> String {
        "ip_list".to_string()
    }
}

/// Matches when any inner matcher matches.
pub struct AnyOf(pub Vec<Box<dyn RequestMatcher>>);

impl RequestMatcher for AnyOf {
    fn matches(&self, request: &Request) -> bool {
        self.0.iter().any(|m| m.matches(request))
    }

    fn describe(&self) -> String {
        "any".to_string()
    }
}

/// Matches when every inner matcher matches.
pub struct AllOf(pub Vec<Box<dyn RequestMatcher>>);

impl RequestMatcher for AllOf {
    fn matches(&self, request: &Request) -> bool {
        self.0.iter().all(|m| m.matches(request))
    }

    fn describe(&self) -> String {
        "all".to_string()
    }
}

/// Inverts a matcher.
pub struct Not(pub Box<dyn RequestMatcher>);

impl RequestMatcher for Not {
    fn matches(&self, request: &Request) -> bool {
        !self.0.matches(request)
    }

    fn describe(&self) -> String {
        format!("not:{}", self.0.describe())
    }
}

/// Keys requests by client address; requests without one are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIp;

impl KeyExtractor for ClientIp {
    fn extract(&self, request: &Request) -> Option<String> {
        request.client_ip().map(|ip| ip.to_string())
    }
}

/// Keys requests by a header value; requests without the header are skipped.
#[derive(Debug, Clone)]
pub struct HeaderValue(pub String);

impl KeyExtractor for HeaderValue {
    fn extract(&self, request: &Request) -> Option<String> {
        request.header(&self.0).map(str::to_string)
    }
}

/// Keys requests by path.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestPath;

impl KeyExtractor for RequestPath {
    fn extract(&self, request: &Request) -> Option<String> {
        Some(request.path().to_string())
    }
}

/// Keys requests by method.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMethod;

impl KeyExtractor for RequestMethod {
    fn extract(&self, request: &Request) -> Option<String> {
        Some(request.method().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_path_matchers() {
        let req = Request::get("/admin/users");
        assert!(PathPrefix("/admin".into()).matches(&req));
        assert!(!PathPrefix("/api".into()).matches(&req));
        assert!(PathEquals("/admin/users".into()).matches(&req));
        assert!(!PathEquals("/admin".into()).matches(&req));
    }

    #[test]
    fn test_method_matcher_ignores_case() {
        let req = Request::new("POST", "/login");
        assert!(MethodIs("post".into()).matches(&req));
        assert!(!MethodIs("GET".into()).matches(&req));
    }

    #[test]
    fn test_header_matchers() {
        let req = Request::get("/").with_header("X-Login-Failed", "1");

        let failed = HeaderEquals::new("x-login-failed", "1");
        assert!(failed.matches(&req));
        assert!(!HeaderEquals::new("x-login-failed", "0").matches(&req));
        assert!(HeaderPresent("X-Login-Failed".into()).matches(&req));

        let result = failed.evaluate(&req);
        assert!(result.is_match);
        assert_eq!(result.source, "header:x-login-failed");
        assert_eq!(result.metadata.as_deref(), Some("1"));
    }

    #[test]
    fn test_ip_list() {
        let list = IpList::new([ip("10.0.0.1"), ip("::1")]);

        assert!(list.matches(&Request::get("/").with_client_ip(ip("10.0.0.1"))));
        assert!(list.matches(&Request::get("/").with_client_ip(ip("::1"))));
        assert!(!list.matches(&Request::get("/").with_client_ip(ip("10.0.0.2"))));
        assert!(!list.matches(&Request::get("/")));
    }

    #[test]
    fn test_combinators() {
        let req = Request::new("POST", "/login");
        let login_post = AllOf(vec![
            Box::new(MethodIs("POST".into())),
            Box::new(PathEquals("/login".into())),
        ]);
        assert!(login_post.matches(&req));

        let either = AnyOf(vec![
            Box::new(PathPrefix("/api".into())),
            Box::new(MethodIs("POST".into())),
        ]);
        assert!(either.matches(&req));

        assert!(!Not(Box::new(Always)).matches(&req));
        assert!(!AnyOf(Vec::new()).matches(&req));
        assert!(AllOf(Vec::new()).matches(&req));
    }

    #[test]
    fn test_fn_adapters() {
        let matcher = predicate(|r: &Request| r.path().ends_with(".php")).labeled("php");
        assert!(matcher.matches(&Request::get("/index.php")));
        assert_eq!(matcher.describe(), "php");
        assert!(!matcher.evaluate(&Request::get("/")).is_match);

        let extractor = key_fn(|r: &Request| r.header("x-user").map(|u| format!("user-{}", u)));
        assert_eq!(
            extractor.extract(&Request::get("/").with_header("X-User", "7")),
            Some("user-7".to_string())
        );
        assert_eq!(extractor.extract(&Request::get("/")), None);
    }

    #[test]
    fn test_builtin_extractors() {
        let req = Request::new("DELETE", "/items/3")
            .with_header("X-Api-Key", "k1")
            .with_client_ip(ip("192.0.2.4"));

        assert_eq!(ClientIp.extract(&req), Some("192.0.2.4".to_string()));
        assert_eq!(HeaderValue("x-api-key".into()).extract(&req), Some("k1".to_string()));
        assert_eq!(RequestPath.extract(&req), Some("/items/3".to_string()));
        assert_eq!(RequestMethod.extract(&req), Some("DELETE".to_string()));
        assert_eq!(ClientIp.extract(&Request::get("/")), None);
    }
}
