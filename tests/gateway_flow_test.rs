/// Integration test for the gateway datapath
///
/// Runs a real enclave service and a gateway whose device side is an
/// in-memory duplex pipe standing in for the TUN interface. A scripted
/// client drives the UDP side with real wire frames.
///
/// Scenarios:
/// 1. Handshake: first client is assigned 10.8.0.2 and both sides agree
///    on the session key
/// 2. Data ingress: an encrypted packet from the client comes out of the
///    device side in the clear
/// 3. Data egress: a packet written to the device side arrives at the
///    client encrypted under its session key
/// 4. Tampered data produces no device output
/// 5. PING is answered with PONG
/// 6. DISCONNECT invalidates the client
/// 7. A 255th client is rejected with a non-zero status

use sealtun::codec::frame::{ConnectReqFrame, DataFrame, Frame, HDR_LEN};
use sealtun::codec::parser::{Encoder, Parser};
use sealtun::crypto::aead::SessionCipher;
use sealtun::crypto::keys::{derive_session_key, KeyPair};
use sealtun::enclave::key_manager::KeyManager;
use sealtun::enclave::service::EnclaveService;
use sealtun::gateway::gateway::Gateway;
use sealtun::ipc::client::EnclaveClient;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::UdpSocket;

async fn start_enclave(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "sealtun-gwtest-{}-{}.sock",
        tag,
        std::process::id()
    ));
    let service_path = path.clone();
    tokio::spawn(async move {
        let mut service = EnclaveService::new(service_path, KeyManager::new());
        service.run().await.expect("enclave service failed");
    });
    for _ in 0..100 {
        if path.exists() {
            return path;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("enclave socket never appeared");
}

/// Helper: bring up enclave + gateway, returning the gateway's UDP
/// address and the far end of its device pipe
async fn start_gateway(tag: &str) -> (SocketAddr, DuplexStream) {
    let enclave_path = start_enclave(tag).await;
    let enclave = EnclaveClient::connect(&enclave_path).await.unwrap();

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let gateway_addr = udp.local_addr().unwrap();
    let (tun_gateway, tun_test) = tokio::io::duplex(65536);

    tokio::spawn(async move {
        let mut gateway = Gateway::from_parts(udp, tun_gateway, enclave);
        if let Err(e) = gateway.run().await {
            tracing::error!("gateway stopped: {}", e);
        }
    });

    (gateway_addr, tun_test)
}

struct TestClient {
    socket: UdpSocket,
    encoder: Encoder,
    gateway: SocketAddr,
}

impl TestClient {
    async fn new(gateway: SocketAddr) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            encoder: Encoder::new(),
            gateway,
        }
    }

    async fn send(&mut self, frame: Frame) {
        let buf = self.encoder.marshal(&frame);
        self.socket.send_to(&buf, self.gateway).await.unwrap();
    }

    async fn recv(&mut self) -> Frame {
        let mut buf = vec![0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), self.socket.recv_from(&mut buf))
            .await
            .expect("no reply from gateway")
            .unwrap();
        let (_, frame) = Parser::unmarshal(&buf[..n]).unwrap();
        frame
    }

    /// Full handshake; returns the assignment and the session cipher
    async fn connect(&mut self, username: &str) -> (Ipv4Addr, u8, Option<SessionCipher>) {
        let identity = KeyPair::generate();
        self.send(Frame::ConnectReq(ConnectReqFrame {
            username: username.to_string(),
            public_key: identity.public_bytes(),
        }))
        .await;

        match self.recv().await {
            Frame::ConnectResp(resp) => {
                let cipher = (resp.status == 0).then(|| {
                    let shared = identity.diffie_hellman(&resp.server_public_key);
                    SessionCipher::new(&derive_session_key(&shared))
                });
                (resp.vpn_ip, resp.status, cipher)
            }
            other => panic!("expected connect response, got {}", other),
        }
    }
}

/// A minimal ICMP-echo-shaped IPv4 packet between tunnel addresses
fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let mut packet = vec![0u8; 28];
    let len = packet.len() as u16;
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&len.to_be_bytes());
    packet[8] = 64; // ttl
    packet[9] = 1; // icmp
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    packet[20] = 8; // echo request
    packet
}

#[tokio::test]
async fn test_handshake_assigns_first_address() {
    let (gateway_addr, _tun) = start_gateway("handshake").await;
    let mut client = TestClient::new(gateway_addr).await;

    let (vpn_ip, status, cipher) = client.connect("alice").await;
    assert_eq!(status, 0);
    assert_eq!(vpn_ip, Ipv4Addr::new(10, 8, 0, 2));
    assert!(cipher.is_some());

    // a second client gets the next address
    let mut other = TestClient::new(gateway_addr).await;
    let (vpn_ip, status, _) = other.connect("bob").await;
    assert_eq!(status, 0);
    assert_eq!(vpn_ip, Ipv4Addr::new(10, 8, 0, 3));
}

#[tokio::test]
async fn test_data_ingress_reaches_device() {
    let (gateway_addr, mut tun) = start_gateway("ingress").await;
    let mut client = TestClient::new(gateway_addr).await;
    let (vpn_ip, _, cipher) = client.connect("alice").await;
    let cipher = cipher.unwrap();

    let packet = ipv4_packet(vpn_ip, Ipv4Addr::new(10, 8, 0, 1));
    let mut payload = packet.clone();
    cipher.seal(&mut payload).unwrap();
    client.send(Frame::Data(DataFrame { payload })).await;

    let mut out = vec![0u8; 2048];
    let n = tokio::time::timeout(Duration::from_secs(5), tun.read(&mut out))
        .await
        .expect("no device output")
        .unwrap();
    assert_eq!(&out[..n], packet.as_slice());
}

#[tokio::test]
async fn test_data_egress_is_encrypted_for_client() {
    let (gateway_addr, mut tun) = start_gateway("egress").await;
    let mut client = TestClient::new(gateway_addr).await;
    let (vpn_ip, _, cipher) = client.connect("alice").await;
    let cipher = cipher.unwrap();

    let packet = ipv4_packet(Ipv4Addr::new(10, 8, 0, 1), vpn_ip);
    tun.write_all(&packet).await.unwrap();

    match client.recv().await {
        Frame::Data(data) => {
            let mut payload = data.payload;
            cipher.open(&mut payload).unwrap();
            assert_eq!(payload, packet);
        }
        other => panic!("expected data frame, got {}", other),
    }
}

#[tokio::test]
async fn test_ipv6_from_device_is_dropped() {
    let (gateway_addr, mut tun) = start_gateway("ipv6drop").await;
    let mut client = TestClient::new(gateway_addr).await;
    client.connect("alice").await;

    // version nibble 6: must produce no UDP output
    let mut v6 = vec![0u8; 40];
    v6[0] = 0x60;
    tun.write_all(&v6).await.unwrap();

    let mut buf = vec![0u8; 2048];
    let result =
        tokio::time::timeout(Duration::from_millis(500), client.socket.recv_from(&mut buf)).await;
    assert!(result.is_err(), "ipv6 packet was forwarded");
}

#[tokio::test]
async fn test_tampered_data_produces_no_output() {
    let (gateway_addr, mut tun) = start_gateway("tamper").await;
    let mut client = TestClient::new(gateway_addr).await;
    let (vpn_ip, _, cipher) = client.connect("alice").await;
    let cipher = cipher.unwrap();

    let packet = ipv4_packet(vpn_ip, Ipv4Addr::new(10, 8, 0, 1));
    let mut payload = packet.clone();
    cipher.seal(&mut payload).unwrap();
    let last = payload.len() - 1;
    payload[last] ^= 0x01; // flip one tag bit
    client.send(Frame::Data(DataFrame { payload })).await;

    let mut out = vec![0u8; 2048];
    let result = tokio::time::timeout(Duration::from_millis(500), tun.read(&mut out)).await;
    assert!(result.is_err(), "tampered packet reached the device");
}

#[tokio::test]
async fn test_ping_pong() {
    let (gateway_addr, _tun) = start_gateway("pingpong").await;
    let mut client = TestClient::new(gateway_addr).await;
    client.connect("alice").await;

    client.send(Frame::Ping).await;
    match client.recv().await {
        Frame::Pong => {}
        other => panic!("expected pong, got {}", other),
    }
}

#[tokio::test]
async fn test_disconnect_invalidates_client() {
    let (gateway_addr, mut tun) = start_gateway("disconnect").await;
    let mut client = TestClient::new(gateway_addr).await;
    let (vpn_ip, _, cipher) = client.connect("alice").await;
    let cipher = cipher.unwrap();

    client.send(Frame::Disconnect).await;

    // data sent after the disconnect is from an unknown peer now
    let packet = ipv4_packet(vpn_ip, Ipv4Addr::new(10, 8, 0, 1));
    let mut payload = packet;
    cipher.seal(&mut payload).unwrap();
    client.send(Frame::Data(DataFrame { payload })).await;

    let mut out = vec![0u8; 2048];
    let result = tokio::time::timeout(Duration::from_millis(500), tun.read(&mut out)).await;
    assert!(result.is_err(), "data accepted after disconnect");
}

#[tokio::test]
async fn test_runt_and_unknown_packets_ignored() {
    let (gateway_addr, _tun) = start_gateway("garbage").await;
    let mut client = TestClient::new(gateway_addr).await;

    // shorter than a header, and a header with a bad version: both are
    // dropped without an answer and without killing the loop
    client.socket.send_to(&[0x01, 0x02], gateway_addr).await.unwrap();
    let mut bogus = vec![0u8; HDR_LEN];
    bogus[0] = 0x04;
    bogus[1] = 0x7f;
    client.socket.send_to(&bogus, gateway_addr).await.unwrap();

    let (_, status, _) = client.connect("alice").await;
    assert_eq!(status, 0);
}

#[tokio::test]
async fn test_table_full_rejects_with_nonzero_status() {
    let (gateway_addr, _tun) = start_gateway("tablefull").await;

    let mut clients = Vec::new();
    for i in 0..254 {
        let mut client = TestClient::new(gateway_addr).await;
        let (_, status, _) = client.connect(&format!("user{}", i)).await;
        assert_eq!(status, 0, "client {} rejected", i);
        clients.push(client);
    }

    let mut extra = TestClient::new(gateway_addr).await;
    let (vpn_ip, status, _) = extra.connect("straggler").await;
    assert_ne!(status, 0);
    assert_eq!(vpn_ip, Ipv4Addr::UNSPECIFIED);

    // existing clients are unaffected
    let (_, status, _) = clients[0].connect("user0").await;
    assert_eq!(status, 0);
}
