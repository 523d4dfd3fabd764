//! Dialog context
//!
//! The correlation fields every in-dialog request and response needs are
//! derived once per saved message and carried as an immutable value.

use rand::Rng;

use super::message::{tag_param, SipRequest, SipResponse};
use crate::domain::shared::CallId;

/// New Via branch (RFC 3261 magic cookie prefix)
pub fn new_branch() -> String {
    let random: u64 = rand::thread_rng().gen();
    format!("z9hG4bK{:x}", random)
}

/// New From/To tag
pub fn new_tag() -> String {
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}", random)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogContext {
    pub call_id: CallId,
    /// Our side's name-addr including our tag
    pub local: String,
    /// The peer's name-addr, with its tag once one is known
    pub remote: String,
    /// CSeq of the message this context was derived from
    pub cseq: u32,
}

impl DialogContext {
    /// Context for a dialog we are about to originate
    pub fn outgoing(
        call_id: CallId,
        local_uri: &str,
        local_tag: &str,
        remote_uri: &str,
        cseq: u32,
    ) -> Self {
        Self {
            call_id,
            local: format!("<{}>;tag={}", local_uri, local_tag),
            remote: format!("<{}>", remote_uri),
            cseq,
        }
    }

    /// Derive the context from an INVITE.
    ///
    /// `mine` is true when this endpoint sent the INVITE, in which case From
    /// is the local side. Otherwise To is ours and gets `local_tag` if the
    /// peer did not supply one.
    pub fn from_invite(invite: &SipRequest, mine: bool, local_tag: &str) -> Option<Self> {
        let call_id = CallId::new(invite.call_id()?);
        let from = invite.header("From")?;
        let to = invite.header("To")?;
        let cseq = invite.cseq()?;

        let (local, remote) = if mine {
            (from, to)
        } else if tag_param(&to).is_some() {
            (to, from)
        } else {
            (format!("{};tag={}", to, local_tag), from)
        };

        Some(Self {
            call_id,
            local,
            remote,
            cseq,
        })
    }

    /// Pick up the peer's tag from a response to our request
    pub fn with_response(&self, response: &SipResponse) -> Self {
        let mut next = self.clone();
        if let Some(to) = response.header("To") {
            next.remote = to;
        }
        if let Some(cseq) = response.cseq() {
            next.cseq = cseq;
        }
        next
    }

    pub fn local_tag(&self) -> Option<String> {
        tag_param(&self.local)
    }

    pub fn remote_tag(&self) -> Option<String> {
        tag_param(&self.remote)
    }
}
