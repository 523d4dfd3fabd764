//! Simple SDP (Session Description Protocol) handling

use std::net::{IpAddr, SocketAddr};

/// Simple SDP session
#[derive(Debug, Clone)]
pub struct SdpSession {
    pub version: u32,
    pub origin: SdpOrigin,
    pub session_name: String,
    pub connection: Option<SdpConnection>,
    pub media: Vec<SdpMedia>,
}

#[derive(Debug, Clone)]
pub struct SdpOrigin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct SdpConnection {
    pub address_type: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct SdpMedia {
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<u8>,
    pub connection: Option<SdpConnection>,
    pub rtpmap: Vec<(u8, String)>,
}

impl SdpSession {
    /// Create a single-codec audio offer/answer.
    ///
    /// `telephone_event` adds an RFC 2833 payload type next to the codec.
    pub fn create_audio_session(
        username: &str,
        local_ip: IpAddr,
        local_port: u16,
        codec: u8,
        telephone_event: Option<u8>,
    ) -> Self {
        let address_type = if local_ip.is_ipv4() { "IP4" } else { "IP6" };
        let mut formats = vec![codec];
        let mut rtpmap = Vec::new();
        if let Some(pt) = telephone_event {
            formats.push(pt);
            rtpmap.push((pt, "telephone-event/8000".to_string()));
        }

        Self {
            version: 0,
            origin: SdpOrigin {
                username: username.to_string(),
                session_id: chrono::Utc::now().timestamp().to_string(),
                session_version: "1".to_string(),
                address: local_ip.to_string(),
            },
            session_name: "Talk Time".to_string(),
            connection: Some(SdpConnection {
                address_type: address_type.to_string(),
                address: local_ip.to_string(),
            }),
            media: vec![SdpMedia {
                media_type: "audio".to_string(),
                port: local_port,
                protocol: "RTP/AVP".to_string(),
                formats,
                connection: None,
                rtpmap,
            }],
        }
    }

    /// Convert to SDP string
    pub fn to_string(&self) -> String {
        let mut sdp = String::new();
        let address_type = self
            .connection
            .as_ref()
            .map(|c| c.address_type.as_str())
            .unwrap_or("IP4");

        sdp.push_str(&format!("v={}\r\n", self.version));
        sdp.push_str(&format!(
            "o={} {} {} IN {} {}\r\n",
            self.origin.username,
            self.origin.session_id,
            self.origin.session_version,
            address_type,
            self.origin.address
        ));
        sdp.push_str(&format!("s={}\r\n", self.session_name));
        if let Some(conn) = &self.connection {
            sdp.push_str(&format!("c=IN {} {}\r\n", conn.address_type, conn.address));
        }
        sdp.push_str("t=0 0\r\n");

        for media in &self.media {
            let formats: Vec<String> = media.formats.iter().map(|f| f.to_string()).collect();
            sdp.push_str(&format!(
                "m={} {} {} {}\r\n",
                media.media_type,
                media.port,
                media.protocol,
                formats.join(" ")
            ));
            if let Some(conn) = &media.connection {
                sdp.push_str(&format!("c=IN {} {}\r\n", conn.address_type, conn.address));
            }
            for (pt, encoding) in &media.rtpmap {
                sdp.push_str(&format!("a=rtpmap:{} {}\r\n", pt, encoding));
                if encoding.starts_with("telephone-event") {
                    sdp.push_str(&format!("a=fmtp:{} 0-15\r\n", pt));
                }
            }
        }

        sdp
    }

    /// Parse SDP from string
    pub fn parse(sdp_body: &str) -> Option<Self> {
        let mut version = 0;
        let mut origin: Option<SdpOrigin> = None;
        let mut session_name = String::new();
        let mut connection: Option<SdpConnection> = None;
        let mut media: Vec<SdpMedia> = Vec::new();
        let mut current_media: Option<SdpMedia> = None;

        for line in sdp_body.lines() {
            let line = line.trim();
            if line.len() < 2 || !line.contains('=') {
                continue;
            }

            let (field_type, value) = line.split_at(2);
            let value = value.trim();

            match field_type {
                "v=" => {
                    version = value.parse().unwrap_or(0);
                }
                "o=" => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() >= 6 {
                        origin = Some(SdpOrigin {
                            username: parts[0].to_string(),
                            session_id: parts[1].to_string(),
                            session_version: parts[2].to_string(),
                            address: parts[5].to_string(),
                        });
                    }
                }
                "s=" => {
                    session_name = value.to_string();
                }
                "c=" => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() >= 3 {
                        let conn = SdpConnection {
                            address_type: parts[1].to_string(),
                            address: parts[2].to_string(),
                        };
                        match current_media.as_mut() {
                            Some(m) => m.connection = Some(conn),
                            None => connection = Some(conn),
                        }
                    }
                }
                "m=" => {
                    if let Some(m) = current_media.take() {
                        media.push(m);
                    }

                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() >= 4 {
                        current_media = Some(SdpMedia {
                            media_type: parts[0].to_string(),
                            port: parts[1].parse().unwrap_or(0),
                            protocol: parts[2].to_string(),
                            formats: parts[3..].iter().filter_map(|s| s.parse().ok()).collect(),
                            connection: None,
                            rtpmap: Vec::new(),
                        });
                    }
                }
                "a=" => {
                    if let (Some(media), Some(rtpmap_value)) =
                        (current_media.as_mut(), value.strip_prefix("rtpmap:"))
                    {
                        if let Some((pt, encoding)) = rtpmap_value.split_once(' ') {
                            if let Ok(pt) = pt.parse() {
                                media.rtpmap.push((pt, encoding.to_string()));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(m) = current_media.take() {
            media.push(m);
        }

        Some(Self {
            version,
            origin: origin?,
            session_name,
            connection,
            media,
        })
    }

    /// Get media description for audio
    pub fn audio_media(&self) -> Option<&SdpMedia> {
        self.media.iter().find(|m| m.media_type == "audio")
    }

    /// Where the peer wants audio sent: media-level connection first, then
    /// session-level.
    pub fn audio_destination(&self) -> Option<SocketAddr> {
        let audio = self.audio_media()?;
        let conn = audio.connection.as_ref().or(self.connection.as_ref())?;
        let ip: IpAddr = conn.address.parse().ok()?;
        Some(SocketAddr::new(ip, audio.port))
    }

    /// Payload type of the first offered audio codec
    pub fn audio_codec(&self) -> Option<u8> {
        self.audio_media()?.formats.first().copied()
    }

    /// RFC 2833 payload type, if the peer offered one
    pub fn telephone_event_payload(&self) -> Option<u8> {
        self.audio_media()?
            .rtpmap
            .iter()
            .find(|(_, enc)| enc.starts_with("telephone-event"))
            .map(|(pt, _)| *pt)
    }
}
