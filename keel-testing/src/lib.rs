//! Testing utilities for the Keel framework.
//!
//! Provides a fluent request builder and response assertions for exercising
//! a kernel in tests.
//!
//! ```no_run
//! use keel_testing::{ResponseAssertions, TestRequest};
//! use keel_core::{HttpResponse, RequestKind};
//!
//! # async fn example(kernel: keel_core::Kernel) {
//! let request = TestRequest::get("/blog/42")
//!     .header("Accept", "application/json")
//!     .build();
//!
//! let response = kernel.handle(request, RequestKind::Main).await.unwrap();
//! response.assert_ok().assert_body_contains("42");
//! # }
//! ```

use keel_core::{HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::Value;

/// Fluent builder for [`HttpRequest`] values in tests
pub struct TestRequest {
    inner: HttpRequest,
}

impl TestRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            inner: HttpRequest::new(method, path),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: &str) -> Self {
        Self::new("POST", path)
    }

    pub fn put(path: &str) -> Self {
        Self::new("PUT", path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new("DELETE", path)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.inner.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Set a JSON body and the matching Content-Type
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        self.inner.body = serde_json::to_vec(body).expect("serializable test body");
        self.inner
            .headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.inner.body = body;
        self
    }

    /// Pre-set a request attribute, as routing or a listener would
    pub fn attribute(mut self, name: &str, value: Value) -> Self {
        self.inner.set_attribute(name, value);
        self
    }

    pub fn build(self) -> HttpRequest {
        self.inner
    }
}

/// Fluent assertions on [`HttpResponse`] values
pub trait ResponseAssertions {
    fn assert_status(&self, expected: u16) -> &Self;
    fn assert_ok(&self) -> &Self;
    fn assert_header(&self, name: &str, expected: &str) -> &Self;
    fn assert_body_contains(&self, fragment: &str) -> &Self;
    /// Parse the body as JSON, panicking with the body text on failure
    fn json(&self) -> Value;
}

impl ResponseAssertions for HttpResponse {
    fn assert_status(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "expected status {expected}, got {} (body: {})",
            self.status,
            self.body_string()
        );
        self
    }

    fn assert_ok(&self) -> &Self {
        self.assert_status(200)
    }

    fn assert_header(&self, name: &str, expected: &str) -> &Self {
        match self.headers.get(name) {
            Some(value) => assert_eq!(
                value, expected,
                "header `{name}` is `{value}`, expected `{expected}`"
            ),
            None => panic!("header `{name}` is missing"),
        }
        self
    }

    fn assert_body_contains(&self, fragment: &str) -> &Self {
        let body = self.body_string();
        assert!(
            body.contains(fragment),
            "body does not contain `{fragment}`: {body}"
        );
        self
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!("body is not valid JSON ({e}): {}", self.body_string())
        })
    }
}
