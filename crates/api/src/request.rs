use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

/// Transport-level settings applied to every attempt of a call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportOptions {
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Sent as `application/x-www-form-urlencoded`.
    Form(BTreeMap<String, String>),
    Json(Value),
}

/// Everything a single dispatch needs besides the client itself.
///
/// `url` may be absolute or relative to the client's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub query: Option<BTreeMap<String, String>>,
    pub body: Option<Body>,
    pub headers: Option<BTreeMap<String, String>>,
    pub transport: Option<TransportOptions>,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: None,
            body: None,
            headers: None,
            transport: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Adds a form field, replacing a JSON body if one was set.
    pub fn form_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.body {
            Some(Body::Form(fields)) => {
                fields.insert(key.into(), value.into());
            }
            _ => {
                self.body = Some(Body::Form(BTreeMap::from([(key.into(), value.into())])));
            }
        }
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transport.get_or_insert_with(TransportOptions::default).timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_collects_maps() {
        let spec = RequestSpec::get("testcases")
            .query("projectKey", "PROJ")
            .query("maxResults", "50")
            .header("X-Trace", "1");

        assert_eq!(spec.method, Method::GET);
        let query = spec.query.unwrap();
        assert_eq!(query.len(), 2);
        assert_eq!(query["projectKey"], "PROJ");
        assert_eq!(spec.headers.unwrap()["X-Trace"], "1");
        assert!(spec.body.is_none());
    }

    #[test]
    fn test_form_fields_accumulate() {
        let spec = RequestSpec::post("testexecutions")
            .form_field("a", "1")
            .form_field("b", "2");
        match spec.body {
            Some(Body::Form(fields)) => assert_eq!(fields.len(), 2),
            other => panic!("expected form body, got {other:?}"),
        }
    }

    #[test]
    fn test_json_replaced_by_form() {
        let spec = RequestSpec::post("testcases")
            .json(json!({"name": "x"}))
            .form_field("a", "1");
        assert!(matches!(spec.body, Some(Body::Form(_))));
    }

    #[test]
    fn test_timeout_sets_transport_options() {
        let spec = RequestSpec::get("healthcheck").timeout(Duration::from_secs(3));
        assert_eq!(
            spec.transport,
            Some(TransportOptions {
                timeout: Some(Duration::from_secs(3))
            })
        );
    }
}
