//! Location updating end to end: a scripted handset on one side, a UDP
//! registrar on the other

use sipbridge::application::{MobilityController, MobilityPorts};
use sipbridge::config::Config;
use sipbridge::domain::shared::{LocationAreaId, MobileIdentity, Result};
use sipbridge::domain::subscriber::{
    InMemorySubscriberRegistry, InMemoryTmsiTable, LocationRequester, SmsDelivery, TmsiTable,
};
use sipbridge::infrastructure::protocols::gsm::{L3Frame, L3Message, LogicalChannel, Primitive};
use sipbridge::infrastructure::protocols::sip::{
    CallTable, EngineParams, ResponseBuilder, SipMessage, SipRegistrationService, UdpTransport,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;

const IMSI: &str = "001010000000001";

#[derive(Default)]
struct Handset {
    replies: Mutex<VecDeque<L3Message>>,
    sent: Mutex<Vec<L3Message>>,
    primitives: Mutex<Vec<Primitive>>,
    kc: Mutex<Option<String>>,
    ciphering: Mutex<(bool, bool)>,
}

impl Handset {
    fn answering(replies: Vec<L3Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<L3Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LogicalChannel for Handset {
    async fn send(&self, message: L3Message) {
        self.sent.lock().unwrap().push(message);
    }

    async fn send_primitive(&self, primitive: Primitive) {
        self.primitives.lock().unwrap().push(primitive);
    }

    async fn recv(&self, _timeout: Duration) -> Option<L3Frame> {
        self.replies.lock().unwrap().pop_front().map(L3Frame::Message)
    }

    fn set_kc(&self, kc: &str) {
        *self.kc.lock().unwrap() = Some(kc.to_string());
    }

    fn activate_decryption(&self) {
        self.ciphering.lock().unwrap().0 = true;
    }

    fn activate_encryption(&self) {
        self.ciphering.lock().unwrap().1 = true;
    }

    fn description(&self) -> String {
        "SDCCH/4".to_string()
    }
}

struct NoSms;

#[async_trait::async_trait]
impl SmsDelivery for NoSms {
    async fn deliver(
        &self,
        _from: &str,
        _body: &str,
        _content_type: &str,
        _reference: u8,
        _channel: &dyn LogicalChannel,
    ) -> Result<()> {
        Ok(())
    }
}

struct NoLocation;

#[async_trait::async_trait]
impl LocationRequester for NoLocation {
    async fn request_location(
        &self,
        _mobile_id: &MobileIdentity,
        _channel: &dyn LogicalChannel,
    ) -> bool {
        false
    }
}

/// Registrar answering every REGISTER with `code`. With `challenge`, a
/// 200 to a REGISTER without credentials carries a RAND nonce and a 200 to
/// one with credentials carries Kc.
async fn registrar(code: u16, challenge: bool) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(SipMessage::Request(register)) = SipMessage::parse(&buf[..n]) else {
                continue;
            };
            let mut response = ResponseBuilder::new(code);
            if code == 200 && challenge {
                response = match register.header("Authorization") {
                    Some(_) => response.header("P-GSM-Kc", "0102030405060708"),
                    None => response.header(
                        "WWW-Authenticate",
                        r#"Digest realm="bridge", nonce="00112233445566778899aabbccddeeff""#,
                    ),
                };
            }
            let response = response.build_for_request(&register).unwrap();
            let _ = socket.send_to(&response.to_bytes(), from).await;
        }
    });
    addr
}

struct Node {
    controller: MobilityController,
    tmsis: Arc<InMemoryTmsiTable>,
    lai: LocationAreaId,
}

async fn node(config: Config, registrar: String) -> Node {
    let udp = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), Arc::new(CallTable::new()), None)
        .await
        .unwrap();
    let mut config = config;
    config.sip.local_port = udp.local_addr().unwrap().port();

    let tmsis = Arc::new(InMemoryTmsiTable::new());
    let ports = MobilityPorts {
        registration: Arc::new(SipRegistrationService::new(
            Arc::new(udp),
            Arc::new(EngineParams::from_config(&config)),
            registrar,
        )),
        registry: Arc::new(InMemorySubscriberRegistry::new()),
        tmsis: tmsis.clone(),
        sms: Arc::new(NoSms),
        location: Arc::new(NoLocation),
    };
    let lai = LocationAreaId::new(config.gsm.mcc.clone(), config.gsm.mnc.clone(), config.gsm.lac);
    Node {
        controller: MobilityController::new(&config, ports).unwrap(),
        tmsis,
        lai,
    }
}

#[tokio::test]
async fn test_unprovisioned_imsi_is_rejected() {
    let node = node(Config::default(), registrar(404, false).await).await;
    let handset = Handset::default();

    node.controller
        .dispatch(
            L3Message::LocationUpdatingRequest {
                mobile_id: MobileIdentity::Imsi(IMSI.to_string()),
                lai: node.lai.clone(),
            },
            &handset,
        )
        .await;

    assert_eq!(
        handset.sent(),
        vec![
            L3Message::LocationUpdatingReject { cause: 0x04 },
            L3Message::ChannelRelease,
        ]
    );
}

#[tokio::test]
async fn test_known_subscriber_authenticated_and_ciphered() {
    let mut config = Config::default();
    config.gsm.encryption = true;
    config.lur.send_tmsis = true;
    let node = node(config, registrar(200, true).await).await;
    let tmsi = node.tmsis.assign(IMSI).await;
    let handset = Handset::answering(vec![
        L3Message::AuthenticationResponse { sres: 0x0badcafe },
        L3Message::CipheringModeComplete,
    ]);

    node.controller
        .location_update(MobileIdentity::Tmsi(tmsi), node.lai.clone(), &handset)
        .await
        .unwrap();

    let sent = handset.sent();
    assert_eq!(sent.len(), 4, "{:?}", sent);
    match &sent[0] {
        L3Message::AuthenticationRequest { rand, .. } => {
            assert_eq!(hex::encode(rand), "00112233445566778899aabbccddeeff")
        }
        other => panic!("expected authentication request, got {}", other),
    }
    assert_eq!(sent[1], L3Message::CipheringModeCommand { algorithm: 1 });
    assert_eq!(
        sent[2],
        L3Message::LocationUpdatingAccept {
            lai: node.lai.clone(),
            tmsi: None
        }
    );
    assert_eq!(sent[3], L3Message::ChannelRelease);
    assert_eq!(handset.kc.lock().unwrap().as_deref(), Some("0102030405060708"));
    assert_eq!(*handset.ciphering.lock().unwrap(), (true, true));
}

#[tokio::test]
async fn test_known_subscriber_accepted_without_new_tmsi() {
    let mut config = Config::default();
    config.lur.send_tmsis = true;
    let node = node(config, registrar(200, false).await).await;
    let tmsi = node.tmsis.assign(IMSI).await;
    let handset = Handset::default();

    node.controller
        .location_update(MobileIdentity::Tmsi(tmsi), node.lai.clone(), &handset)
        .await
        .unwrap();

    assert_eq!(
        handset.sent(),
        vec![
            L3Message::LocationUpdatingAccept {
                lai: node.lai.clone(),
                tmsi: None
            },
            L3Message::ChannelRelease,
        ]
    );
    assert_eq!(node.tmsis.tmsi_for(IMSI).await, Some(tmsi));
}

#[tokio::test]
async fn test_detach_releases_twice() {
    let node = node(Config::default(), registrar(200, false).await).await;
    let handset = Handset::default();

    node.controller
        .dispatch(
            L3Message::ImsiDetachIndication {
                mobile_id: MobileIdentity::Imsi(IMSI.to_string()),
            },
            &handset,
        )
        .await;

    assert_eq!(handset.sent(), vec![L3Message::ChannelRelease]);
    assert_eq!(
        handset.primitives.lock().unwrap().clone(),
        vec![Primitive::HardRelease]
    );
}
