//! Built-in work kind that yields the response body as text.

use bytes::Bytes;

use super::{Method, Parsed, Request};
use crate::cache::parse_charset;
use crate::error::DispatchError;
use crate::network::{Headers, NetworkResponse};
use crate::scheduler::Priority;

type Listener<T> = Box<dyn Fn(T) + Send + Sync>;

/// Fetches a URL and decodes the body with the charset named by the
/// response's Content-Type (ISO-8859-1 when none is given).
pub struct StringRequest {
    method: Method,
    url: String,
    headers: Headers,
    body: Option<Bytes>,
    priority: Priority,
    on_response: Listener<String>,
    on_error: Listener<DispatchError>,
}

impl StringRequest {
    pub fn new(
        method: Method,
        url: impl Into<String>,
        on_response: impl Fn(String) + Send + Sync + 'static,
        on_error: impl Fn(DispatchError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            priority: Priority::Normal,
            on_response: Box::new(on_response),
            on_error: Box::new(on_error),
        }
    }

    /// GET request.
    pub fn get(
        url: impl Into<String>,
        on_response: impl Fn(String) + Send + Sync + 'static,
        on_error: impl Fn(DispatchError) + Send + Sync + 'static,
    ) -> Self {
        Self::new(Method::Get, url, on_response, on_error)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Decode `data` as `charset`. Unknown charsets fall back to lossy UTF-8.
pub(crate) fn decode(data: &[u8], charset: &str) -> String {
    if charset.eq_ignore_ascii_case("iso-8859-1") || charset.eq_ignore_ascii_case("latin1") {
        data.iter().map(|&b| char::from(b)).collect()
    } else {
        String::from_utf8_lossy(data).into_owned()
    }
}

impl Request for StringRequest {
    type Output = String;

    fn url(&self) -> &str {
        &self.url
    }

    fn method(&self) -> Method {
        self.method
    }

    fn headers(&self) -> Headers {
        self.headers.clone()
    }

    fn body(&self) -> Option<Bytes> {
        self.body.clone()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn parse_response(&self, response: &NetworkResponse) -> Result<Parsed<String>, DispatchError> {
        let charset = parse_charset(&response.headers);
        let text = decode(&response.data, &charset);
        Ok(Parsed::from_headers(text, response))
    }

    fn deliver(&self, value: String) {
        (self.on_response)(value);
    }

    fn deliver_error(&self, error: DispatchError) {
        (self.on_error)(error);
    }
}
