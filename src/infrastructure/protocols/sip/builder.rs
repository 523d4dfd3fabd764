//! SIP message builder utilities
//!
//! Messages are rendered to RFC 3261 text and parsed back through rsip, so
//! whatever leaves a builder is exactly what a peer would see on the wire.

use super::message::{tag_param, SipError, SipMethod, SipRequest, SipResponse};

/// Standard reason phrase for a status code
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        500 => "Server Internal Error",
        503 => "Service Unavailable",
        600 => "Busy Everywhere",
        603 => "Decline",
        _ => "Unknown",
    }
}

/// Build a SIP request
pub struct RequestBuilder {
    method: SipMethod,
    uri: String,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl RequestBuilder {
    pub fn new(method: SipMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn via(self, ip: &str, port: u16, branch: &str) -> Self {
        self.header("Via", format!("SIP/2.0/UDP {}:{};branch={}", ip, port, branch))
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.to_string());
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<SipRequest, SipError> {
        let mut text = format!("{} {} SIP/2.0\r\n", self.method, self.uri);
        for (name, value) in &self.headers {
            text.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(ct) = &self.content_type {
            text.push_str(&format!("Content-Type: {}\r\n", ct));
        }
        text.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut data = text.into_bytes();
        data.extend_from_slice(&self.body);
        SipRequest::parse(&data)
    }
}

/// Build a SIP response from a request
pub struct ResponseBuilder {
    status_code: u16,
    reason: Option<String>,
    to_tag: Option<String>,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            reason: None,
            to_tag: None,
            headers: Vec::new(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn trying() -> Self {
        Self::new(100)
    }

    pub fn ringing() -> Self {
        Self::new(180)
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Tag to put on the To header if the request's To has none
    pub fn to_tag(mut self, tag: impl Into<String>) -> Self {
        self.to_tag = Some(tag.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.to_string());
        self.body = body.into();
        self
    }

    pub fn build_for_request(self, request: &SipRequest) -> Result<SipResponse, SipError> {
        let reason = self
            .reason
            .clone()
            .unwrap_or_else(|| reason_phrase(self.status_code).to_string());
        let mut text = format!("SIP/2.0 {} {}\r\n", self.status_code, reason);

        // Copy essential headers from request
        for header in request.headers().iter() {
            let rendered = header.to_string();
            let Some((name, value)) = rendered.split_once(':') else {
                continue;
            };
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("To") {
                match (&self.to_tag, tag_param(value)) {
                    (Some(tag), None) => text.push_str(&format!("To: {};tag={}\r\n", value, tag)),
                    _ => text.push_str(&format!("To: {}\r\n", value)),
                }
            } else if ["Via", "From", "Call-ID", "CSeq"]
                .iter()
                .any(|n| name.eq_ignore_ascii_case(n))
            {
                text.push_str(&format!("{}: {}\r\n", name, value));
            }
        }

        for (name, value) in &self.headers {
            text.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(ct) = &self.content_type {
            text.push_str(&format!("Content-Type: {}\r\n", ct));
        }
        text.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut data = text.into_bytes();
        data.extend_from_slice(&self.body);
        SipResponse::parse(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> SipRequest {
        RequestBuilder::new(SipMethod::Invite, "sip:2102@10.0.0.1")
            .via("10.0.0.2", 5062, "z9hG4bKabc")
            .header("From", "<sip:IMSI001010000000001@10.0.0.2>;tag=local1")
            .header("To", "<sip:2102@10.0.0.1>")
            .header("Call-ID", "4711")
            .header("CSeq", "42 INVITE")
            .build()
            .unwrap()
    }

    #[test]
    fn test_request_builder() {
        let req = invite();
        assert_eq!(req.method(), Some(SipMethod::Invite));
        assert_eq!(req.call_id().as_deref(), Some("4711"));
        assert_eq!(req.cseq(), Some(42));
        assert_eq!(req.from_tag().as_deref(), Some("local1"));
        assert_eq!(req.header("Content-Length").as_deref(), Some("0"));
    }

    #[test]
    fn test_request_builder_body() {
        let req = RequestBuilder::new(SipMethod::Message, "sip:smsc@10.0.0.1")
            .header("Call-ID", "1")
            .header("CSeq", "1 MESSAGE")
            .body("text/plain", "hello")
            .build()
            .unwrap();
        assert_eq!(req.body(), b"hello");
        assert_eq!(req.header("Content-Type").as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_response_copies_dialog_headers() {
        let req = invite();
        let resp = ResponseBuilder::new(486).build_for_request(&req).unwrap();
        assert_eq!(resp.status_code(), 486);
        assert_eq!(resp.call_id().as_deref(), Some("4711"));
        assert_eq!(resp.cseq(), Some(42));
        assert_eq!(resp.to_tag(), None);
    }

    #[test]
    fn test_response_adds_to_tag() {
        let req = invite();
        let resp = ResponseBuilder::ok()
            .to_tag("remote9")
            .build_for_request(&req)
            .unwrap();
        assert_eq!(resp.to_tag().as_deref(), Some("remote9"));
    }

    #[test]
    fn test_reason_phrases() {
        assert_eq!(reason_phrase(180), "Ringing");
        assert_eq!(reason_phrase(487), "Request Terminated");
        assert_eq!(reason_phrase(499), "Unknown");
    }
}
