//! SIP message types and header access

use bytes::Bytes;
use rsip::{Headers, Method, Request, Response, Uri};
use std::fmt;
use thiserror::Error;

use crate::domain::shared::ControlError;

#[derive(Error, Debug)]
pub enum SipError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rsip::Error> for SipError {
    fn from(err: rsip::Error) -> Self {
        SipError::ParseError(err.to_string())
    }
}

impl From<SipError> for ControlError {
    fn from(err: SipError) -> Self {
        ControlError::Transport(err.to_string())
    }
}

/// SIP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Register,
    Invite,
    Ack,
    Cancel,
    Bye,
    Options,
    Info,
    Message,
}

impl SipMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Register => "REGISTER",
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Bye => "BYE",
            SipMethod::Options => "OPTIONS",
            SipMethod::Info => "INFO",
            SipMethod::Message => "MESSAGE",
        }
    }

    pub fn from_rsip(method: &Method) -> Option<Self> {
        match method {
            Method::Register => Some(SipMethod::Register),
            Method::Invite => Some(SipMethod::Invite),
            Method::Ack => Some(SipMethod::Ack),
            Method::Cancel => Some(SipMethod::Cancel),
            Method::Bye => Some(SipMethod::Bye),
            Method::Options => Some(SipMethod::Options),
            Method::Info => Some(SipMethod::Info),
            Method::Message => Some(SipMethod::Message),
            _ => None,
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Find a header value by (case-insensitive) name.
///
/// rsip renders every header as `Name: value`, typed or not, so the value
/// is whatever follows the first colon.
fn header_value(headers: &Headers, name: &str) -> Option<String> {
    headers.iter().find_map(|h| {
        let rendered = h.to_string();
        let (n, v) = rendered.split_once(':')?;
        if n.trim().eq_ignore_ascii_case(name) {
            Some(v.trim().to_string())
        } else {
            None
        }
    })
}

/// Extract the `tag` parameter of a From/To header value
pub fn tag_param(value: &str) -> Option<String> {
    value
        .split(';')
        .skip(1)
        .find_map(|p| p.trim().strip_prefix("tag="))
        .map(|t| t.trim().to_string())
}

/// CSeq number from a `CSeq: 42 INVITE` value
fn cseq_number(value: &str) -> Option<u32> {
    value.split_whitespace().next().and_then(|n| n.parse().ok())
}

/// SIP Request wrapper
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub inner: Request,
}

impl SipRequest {
    pub fn new(inner: Request) -> Self {
        Self { inner }
    }

    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let request = rsip::Request::try_from(data)?;
        Ok(Self::new(request))
    }

    pub fn method(&self) -> Option<SipMethod> {
        SipMethod::from_rsip(&self.inner.method)
    }

    /// Method name as sent, including methods we do not model
    pub fn method_name(&self) -> String {
        let rendered = self.inner.to_string();
        rendered
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<String> {
        header_value(&self.inner.headers, name)
    }

    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    pub fn call_id(&self) -> Option<String> {
        self.header("Call-ID")
    }

    pub fn from_tag(&self) -> Option<String> {
        self.header("From").as_deref().and_then(tag_param)
    }

    pub fn to_tag(&self) -> Option<String> {
        self.header("To").as_deref().and_then(tag_param)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").as_deref().and_then(cseq_number)
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.inner.to_string())
    }
}

/// SIP Response wrapper
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub inner: Response,
}

impl SipResponse {
    pub fn new(inner: Response) -> Self {
        Self { inner }
    }

    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let response = rsip::Response::try_from(data)?;
        Ok(Self::new(response))
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status_code.clone().into()
    }

    /// Reason phrase from the status line
    pub fn reason(&self) -> String {
        let rendered = self.inner.to_string();
        let status_line = rendered.lines().next().unwrap_or_default();
        status_line.splitn(3, ' ').nth(2).unwrap_or_default().trim().to_string()
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<String> {
        header_value(&self.inner.headers, name)
    }

    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    pub fn call_id(&self) -> Option<String> {
        self.header("Call-ID")
    }

    pub fn to_tag(&self) -> Option<String> {
        self.header("To").as_deref().and_then(tag_param)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").as_deref().and_then(cseq_number)
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.inner.to_string())
    }
}

/// SIP Message (either request or response)
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        // Try parsing as request first
        if let Ok(request) = SipRequest::parse(data) {
            return Ok(SipMessage::Request(request));
        }

        if let Ok(response) = SipResponse::parse(data) {
            return Ok(SipMessage::Response(response));
        }

        Err(SipError::ParseError(
            "Could not parse as SIP request or response".to_string(),
        ))
    }

    pub fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, SipMessage::Response(_))
    }

    pub fn as_request(&self) -> Option<&SipRequest> {
        match self {
            SipMessage::Request(req) => Some(req),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&SipResponse> {
        match self {
            SipMessage::Response(resp) => Some(resp),
            _ => None,
        }
    }

    /// Method of a request, `None` for responses
    pub fn method(&self) -> Option<SipMethod> {
        self.as_request().and_then(|r| r.method())
    }

    /// Status code of a response, `None` for requests
    pub fn status_code(&self) -> Option<u16> {
        self.as_response().map(|r| r.status_code())
    }

    pub fn call_id(&self) -> Option<String> {
        match self {
            SipMessage::Request(req) => req.call_id(),
            SipMessage::Response(resp) => resp.call_id(),
        }
    }

    pub fn header(&self, name: &str) -> Option<String> {
        match self {
            SipMessage::Request(req) => req.header(name),
            SipMessage::Response(resp) => resp.header(name),
        }
    }

    pub fn cseq(&self) -> Option<u32> {
        match self {
            SipMessage::Request(req) => req.cseq(),
            SipMessage::Response(resp) => resp.cseq(),
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            SipMessage::Request(req) => req.body(),
            SipMessage::Response(resp) => resp.body(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            SipMessage::Request(req) => req.to_bytes(),
            SipMessage::Response(resp) => resp.to_bytes(),
        }
    }
}

impl From<SipRequest> for SipMessage {
    fn from(req: SipRequest) -> Self {
        SipMessage::Request(req)
    }
}

impl From<SipResponse> for SipMessage {
    fn from(resp: SipResponse) -> Self {
        SipMessage::Response(resp)
    }
}
