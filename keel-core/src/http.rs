// HTTP request and response types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Reserved request attribute holding the controller identifier set by routing
pub const CONTROLLER_ATTRIBUTE: &str = "_controller";

/// Reserved request attribute holding the matched route name
pub const ROUTE_ATTRIBUTE: &str = "_route";

/// Whether a request entered the kernel from outside or was forwarded
/// internally (fragment rendering and similar). Threaded through every
/// kernel event so listeners can branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Main,
    Sub,
}

impl RequestKind {
    pub fn is_main(&self) -> bool {
        matches!(self, RequestKind::Main)
    }
}

/// HTTP request wrapper
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Routing results and listener-written values. Route placeholders land
    /// here under their own names, next to the reserved `_route` and
    /// `_controller` keys.
    pub attributes: HashMap<String, Value>,
    pub query_params: HashMap<String, String>,
    /// Number of internal forwards this request went through
    pub forward_depth: u32,
}

impl HttpRequest {
    /// Create a request; a query string in `path` is split off and parsed.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let raw_path: String = path.into();
        let (path, query_params) = match raw_path.split_once('?') {
            Some((p, q)) => (p.to_string(), parse_query_string(q)),
            None => (raw_path, HashMap::new()),
        };

        Self {
            method: method.into().to_uppercase(),
            path,
            headers: HashMap::new(),
            body: Vec::new(),
            attributes: HashMap::new(),
            query_params,
            forward_depth: 0,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// Get a request attribute by name
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set a request attribute
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    /// The matched route name, if routing ran
    pub fn route_name(&self) -> Option<&str> {
        self.attributes.get(ROUTE_ATTRIBUTE).and_then(Value::as_str)
    }
}

/// Parse a query string into a map of parameters, percent-decoding both sides
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let mut split = part.splitn(2, '=');
            let key = split.next()?;
            let value = split.next().unwrap_or("");
            let key = urlencoding::decode(key).map(|k| k.into_owned()).ok()?;
            let value = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            Some((key, value))
        })
        .collect()
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn created() -> Self {
        Self::new(201)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(405)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    /// JSON response with Content-Type set
    pub fn json<T: Serialize>(value: &T) -> Result<Self, crate::Error> {
        Self::ok().with_json(value)
    }

    /// Plain-text response
    pub fn text(body: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// HTML response
    pub fn html(body: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// Temporary redirect (302)
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(302).with_header("Location", location.into())
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, crate::Error> {
        self.body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_string_split_from_path() {
        let request = HttpRequest::new("get", "/search?q=keel&page=2");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/search");
        assert_eq!(request.query("q"), Some(&"keel".to_string()));
        assert_eq!(request.query("page"), Some(&"2".to_string()));
    }

    #[test]
    fn test_query_string_percent_decoding() {
        let request = HttpRequest::new("GET", "/search?name=john%20doe");
        assert_eq!(request.query("name"), Some(&"john doe".to_string()));
    }

    #[test]
    fn test_json_body() {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
        }

        let request = HttpRequest::new("POST", "/users")
            .with_body(br#"{"name":"alice"}"#.to_vec());
        let payload: Payload = request.json().unwrap();
        assert_eq!(payload.name, "alice");
    }

    #[test]
    fn test_attributes() {
        let mut request = HttpRequest::new("GET", "/blog/42");
        request.set_attribute("id", json!("42"));
        request.set_attribute(ROUTE_ATTRIBUTE, json!("blog_show"));

        assert_eq!(request.attribute("id"), Some(&json!("42")));
        assert_eq!(request.route_name(), Some("blog_show"));
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse::json(&json!({"ok": true})).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers.get("Content-Type"),
            Some(&"application/json".to_string())
        );

        let response = HttpResponse::text("hello");
        assert_eq!(response.body_string(), "hello");

        let response = HttpResponse::redirect("/login");
        assert!(response.is_redirect());
        assert_eq!(response.headers.get("Location"), Some(&"/login".to_string()));

        assert!(HttpResponse::not_found().is_client_error());
        assert!(HttpResponse::internal_server_error().is_server_error());
    }
}
