//! Query server tests over real loopback sockets.

use ip2loc::{
    CensusCompiler, DatabaseWriter, LookupEngine, QueryClient, QueryFailure, QueryServer,
    ServerConfig, ServerHandle,
};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const CENSUS: &str = concat!(
    "\"0\",\"100\",\"US\",\"UNITED STATES\",\"CA\",\"-\",\"34.05\",\"-118.25\"\n",
    "\"101\",\"4294967295\",\"GB\",\"UNITED KINGDOM\",\"-\",\"LONDON\",\"51.50\",\"-0.12\"\n",
);

const PASSWORD: &str = "secret";

fn start_server() -> ServerHandle {
    start_server_with(|config| config)
}

fn start_server_with(tune: impl FnOnce(ServerConfig) -> ServerConfig) -> ServerHandle {
    let tables = CensusCompiler::new()
        .with_timestamp(0)
        .compile(CENSUS.as_bytes())
        .unwrap();
    let data = DatabaseWriter::new().write(&tables).unwrap();
    let engine = Arc::new(LookupEngine::from_bytes(&data).unwrap());

    let config = ServerConfig::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), PASSWORD)
        .with_receive_timeout(Duration::from_millis(20));
    QueryServer::bind(tune(config), engine)
        .unwrap()
        .spawn()
        .unwrap()
}

fn raw_socket(timeout: Duration) -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(timeout)).unwrap();
    socket
}

fn exchange(server: &ServerHandle, request: &[u8]) -> Option<Vec<u8>> {
    let socket = raw_socket(Duration::from_millis(300));
    socket.send_to(request, server.local_addr()).unwrap();
    let mut buf = [0u8; 1024];
    match socket.recv_from(&mut buf) {
        Ok((len, _)) => Some(buf[..len].to_vec()),
        Err(_) => None,
    }
}

#[test]
fn test_challenge_is_echoed() {
    let server = start_server();

    let reply = exchange(
        &server,
        b"ip2locRequest\nsecret\ngetLocationForIP:abc12345\n0.0.0.50\n",
    )
    .expect("no reply");
    assert_eq!(
        reply,
        b"ip2locResponse\ngetLocationForIP:abc12345\n0.0.0.50\n\nUS\nUNITED STATES\nCA\n\n34.05\n-118.25\n"
    );

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn test_legacy_framing() {
    let server = start_server();

    let reply = exchange(
        &server,
        b"\xff\xff\xff\xffip2locRequest\nsecret\ngetLocationForIP\n0.0.0.101\n",
    )
    .expect("no reply");
    assert_eq!(
        reply,
        &b"\xff\xff\xff\xffip2LocResponse \"getLocationForIP\" \"0.0.0.101\" \"GB\" \"UNITED KINGDOM\" \"\" \"LONDON\" \"51.5\" \"-0.12\""[..]
    );

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn test_unanswered_requests() {
    let server = start_server();

    let silent: [&[u8]; 6] = [
        b"ip2locRequest\nwrong\ngetLocationForIP\n1.2.3.4\n",
        b"ip2locRequest\nsecret\ngetLocationForIP:ABC12345\n1.2.3.4\n",
        b"ip2locRequest\nsecret\ngetLocationForIP\n1.2.3.4\nextra\n",
        b"ip2locRequest\nsecret\ngetLocationForIP\n1.2.3.4",
        b"ip2locRequest\nsecret\ngetLocationForIP\n01.2.3.4\n",
        b"ip2locRequest\nsecret\nfrobnicate\n",
    ];
    for request in silent {
        assert_eq!(exchange(&server, request), None);
    }

    let stats = server.stats();
    server.shutdown();
    server.join().unwrap();
    assert_eq!(stats.rejected.load(Ordering::Relaxed), 1);
    assert_eq!(stats.answered.load(Ordering::Relaxed), 0);
}

#[test]
fn test_legacy_quit_is_ignored() {
    let server = start_server();

    exchange(&server, b"\xff\xff\xff\xffip2locRequest\nsecret\nquit\n");
    exchange(&server, b"ip2locRequest\nsecret\nquit\nnow\n");
    assert!(server.is_running());

    // still answering
    assert!(exchange(&server, b"ip2locRequest\nsecret\ngetLocationForIP\n8.8.8.8\n").is_some());

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn test_client_batch_lookup() {
    let server = start_server();
    let mut client = QueryClient::connect(server.local_addr(), PASSWORD)
        .unwrap()
        .with_timeout(Duration::from_millis(500));

    let results = client
        .get_locations(&["0.0.0.7", "9.9.9.9", "not-an-ip", "0.0.0.7"])
        .unwrap();
    assert_eq!(results.len(), 3);

    let (ip, us) = &results[0];
    assert_eq!(ip, "0.0.0.7");
    let us = us.as_ref().unwrap();
    assert_eq!(us.country_code, "US");
    assert_eq!(us.region, "CA");
    assert_eq!(us.latitude, 34.05);

    let gb = results[1].1.as_ref().unwrap();
    assert_eq!(gb.city, "LONDON");
    assert_eq!(gb.ip, Ipv4Addr::new(9, 9, 9, 9));

    assert_eq!(results[2].1, Err(QueryFailure::NotAnIpAddress));

    let single = client.get_location("200.1.1.1").unwrap();
    assert_eq!(single.country_code, "GB");

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn test_client_with_wrong_password_gets_no_response() {
    let server = start_server();
    let mut client = QueryClient::connect(server.local_addr(), "not-the-password")
        .unwrap()
        .with_timeout(Duration::from_millis(50))
        .with_retries(1);

    let results = client.get_locations(&["1.2.3.4"]).unwrap();
    assert!(matches!(results[0].1, Err(QueryFailure::NoResponse(_))));

    let stats = server.stats();
    server.shutdown();
    server.join().unwrap();
    assert_eq!(stats.rejected.load(Ordering::Relaxed), 2);
}

#[test]
fn test_client_times_out_on_silent_peer() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut client = QueryClient::connect(silent.local_addr().unwrap(), PASSWORD)
        .unwrap()
        .with_timeout(Duration::from_millis(30))
        .with_retries(2);

    let results = client.get_locations(&["1.2.3.4", "5.6.7.8"]).unwrap();
    for (_, result) in &results {
        assert_eq!(
            result,
            &Err(QueryFailure::NoResponse("timed out".into()))
        );
    }

    // three tries, two addresses each
    silent
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut buf = [0u8; 256];
    let mut received = 0;
    while silent.recv_from(&mut buf).is_ok() {
        assert!(buf.starts_with(b"ip2locRequest\nsecret\ngetLocationForIP:"));
        received += 1;
    }
    assert_eq!(received, 6);
}

#[test]
fn test_local_quit_stops_server() {
    let server = start_server();
    let client = QueryClient::connect(server.local_addr(), PASSWORD).unwrap();
    client.send_quit().unwrap();
    server.join().unwrap();
}

#[test]
fn test_flood_beyond_queue_capacity_is_dropped() {
    let server = start_server_with(|config| config.with_queue_capacity(1));
    let socket = raw_socket(Duration::from_millis(300));

    const FLOOD: u64 = 500;
    for i in 0..FLOOD {
        let request = format!(
            "ip2locRequest\nsecret\ngetLocationForIP:{:08x}\n10.0.0.{}\n",
            i + 1,
            i % 256
        );
        socket
            .send_to(request.as_bytes(), server.local_addr())
            .unwrap();
    }

    let mut buf = [0u8; 1024];
    let mut replies = 0u64;
    while socket.recv_from(&mut buf).is_ok() {
        assert!(buf.starts_with(b"ip2locResponse\ngetLocationForIP:"));
        replies += 1;
    }

    let stats = server.stats();
    let received = stats.received.load(Ordering::Relaxed);
    let answered = stats.answered.load(Ordering::Relaxed);
    let dropped = stats.dropped.load(Ordering::Relaxed);
    assert!(replies >= 1);
    assert!(dropped > 0);
    assert_eq!(replies, answered);
    assert!(received <= FLOOD);
    assert_eq!(answered + dropped, received);

    // still serving after the flood
    assert!(server.is_running());
    assert!(exchange(&server, b"ip2locRequest\nsecret\ngetLocationForIP\n8.8.8.8\n").is_some());

    server.shutdown();
    server.join().unwrap();
}
