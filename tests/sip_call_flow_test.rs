//! SIP call flows over real UDP sockets
//!
//! The bridge binds its transport on loopback; a bare socket plays the proxy.

use sipbridge::config::Config;
use sipbridge::domain::auth::AuthenticationParameters;
use sipbridge::domain::shared::MobileIdentity;
use sipbridge::domain::subscriber::{RegisterMode, RegistrationService};
use sipbridge::infrastructure::protocols::sip::{
    CallTable, EngineParams, MessageTransport, ResponseBuilder, SipEngine, SipMessage, SipMethod,
    SipRegistrationService, SipRequest, SipState, UdpTransport, DEFAULT_CODEC,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

const IMSI: &str = "001010000000001";

struct Bridge {
    transport: Arc<dyn MessageTransport>,
    params: Arc<EngineParams>,
}

async fn bridge() -> Bridge {
    let calls = Arc::new(CallTable::new());
    let udp = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), calls, None)
        .await
        .expect("bind bridge");
    let local = udp.local_addr().unwrap();

    let mut config = Config::default();
    config.sip.local_ip = "127.0.0.1".to_string();
    config.sip.local_port = local.port();
    Bridge {
        transport: Arc::new(udp),
        params: Arc::new(EngineParams::from_config(&config)),
    }
}

async fn proxy() -> (UdpSocket, String) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    (socket, addr)
}

async fn next_request(proxy: &UdpSocket) -> (SipRequest, SocketAddr) {
    let mut buf = vec![0u8; 65535];
    let (n, from) = tokio::time::timeout(Duration::from_secs(5), proxy.recv_from(&mut buf))
        .await
        .expect("proxy heard nothing")
        .unwrap();
    match SipMessage::parse(&buf[..n]).unwrap() {
        SipMessage::Request(request) => (request, from),
        SipMessage::Response(response) => panic!("proxy got response {}", response.status_code()),
    }
}

async fn answer(proxy: &UdpSocket, to: SocketAddr, request: &SipRequest, builder: ResponseBuilder) {
    let response = builder.build_for_request(request).unwrap();
    proxy.send_to(&response.to_bytes(), to).await.unwrap();
}

#[tokio::test]
async fn test_moc_call_setup_and_clear() {
    let bridge = bridge().await;
    let (proxy, proxy_addr) = proxy().await;

    let mut engine = SipEngine::new(bridge.transport.clone(), bridge.params.clone(), &proxy_addr)
        .await
        .unwrap()
        .for_subscriber(IMSI);
    assert_eq!(
        engine
            .moc_send_invite("2102", "127.0.0.1", 16484, DEFAULT_CODEC)
            .await
            .unwrap(),
        SipState::Starting
    );

    let (invite, bridge_addr) = next_request(&proxy).await;
    assert_eq!(invite.method(), Some(SipMethod::Invite));
    assert_eq!(invite.call_id().as_deref(), Some(engine.call_id().as_str()));

    answer(&proxy, bridge_addr, &invite, ResponseBuilder::trying()).await;
    answer(&proxy, bridge_addr, &invite, ResponseBuilder::ringing().to_tag("far")).await;
    answer(&proxy, bridge_addr, &invite, ResponseBuilder::ok().to_tag("far")).await;

    let mut states = Vec::new();
    while engine.state() != SipState::Active {
        states.push(engine.moc_check_for_ok(None).await);
        assert!(states.len() < 10, "stuck in {:?}", states);
    }
    assert_eq!(
        states,
        vec![SipState::Proceeding, SipState::Ringing, SipState::Active]
    );

    engine.moc_send_ack().await.unwrap();
    let (ack, _) = next_request(&proxy).await;
    assert_eq!(ack.method(), Some(SipMethod::Ack));
    assert_eq!(ack.to_tag().as_deref(), Some("far"));

    assert_eq!(engine.mod_send_bye().await.unwrap(), SipState::MODClearing);
    let (bye, _) = next_request(&proxy).await;
    assert_eq!(bye.method(), Some(SipMethod::Bye));
    assert_eq!(bye.cseq(), invite.cseq().map(|c| c + 1));
    answer(&proxy, bridge_addr, &bye, ResponseBuilder::ok()).await;

    assert_eq!(engine.mod_wait_for_bye_ok(None).await, SipState::Cleared);
    engine.close().await;
    assert_eq!(bridge.transport.fifo_size(engine.call_id()).await, -1);
}

#[tokio::test]
async fn test_moc_rejected_gets_one_ack() {
    let bridge = bridge().await;
    let (proxy, proxy_addr) = proxy().await;

    let mut engine = SipEngine::new(bridge.transport.clone(), bridge.params.clone(), &proxy_addr)
        .await
        .unwrap()
        .for_subscriber(IMSI);
    engine
        .moc_send_invite("9999", "127.0.0.1", 16484, DEFAULT_CODEC)
        .await
        .unwrap();
    let (invite, bridge_addr) = next_request(&proxy).await;
    answer(&proxy, bridge_addr, &invite, ResponseBuilder::new(404).to_tag("far")).await;

    assert_eq!(engine.moc_check_for_ok(None).await, SipState::Fail);
    let (ack, _) = next_request(&proxy).await;
    assert_eq!(ack.method(), Some(SipMethod::Ack));
    assert_eq!(ack.call_id(), invite.call_id());
    assert_eq!(ack.to_tag().as_deref(), Some("far"));

    let mut buf = [0u8; 2048];
    let extra = tokio::time::timeout(Duration::from_millis(200), proxy.recv_from(&mut buf)).await;
    assert!(extra.is_err(), "more than one ACK");
    engine.close().await;
}

#[tokio::test]
async fn test_registration_collects_kc() {
    let bridge = bridge().await;
    let (registrar, registrar_addr) = proxy().await;
    let service = SipRegistrationService::new(
        bridge.transport.clone(),
        bridge.params.clone(),
        registrar_addr,
    );

    let peer = tokio::spawn(async move {
        let (register, from) = next_request(&registrar).await;
        assert_eq!(register.method(), Some(SipMethod::Register));
        let ok = ResponseBuilder::ok()
            .header("P-GSM-Kc", "a1b2c3d4e5f60718")
            .build_for_request(&register)
            .unwrap();
        registrar.send_to(&ok.to_bytes(), from).await.unwrap();
        register
    });

    let mut params = AuthenticationParameters::new(MobileIdentity::Imsi(IMSI.to_string()));
    assert!(service
        .register(RegisterMode::Register, &mut params)
        .await
        .unwrap());
    assert_eq!(params.kc_hex().as_deref(), Some("a1b2c3d4e5f60718"));

    let register = peer.await.unwrap();
    assert!(register
        .header("From")
        .unwrap()
        .contains("sip:IMSI001010000000001@"));
    assert_eq!(register.header("Expires").as_deref(), Some("5400"));
}
