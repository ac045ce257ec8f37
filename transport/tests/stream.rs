// Stream transports over loopback: connect, queueing, cutoff and reconnect
use hio_core::Error;
use hio_transport::{Acceptor, Outgoer, Server, Transport, BUF_SIZE};
use hio_wirelog::WireLog;
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

fn poll_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..3000 {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn client_for(server: &Server) -> Outgoer {
    let eha = server.eha();
    let mut client = Outgoer::new(&eha.ip().to_string(), eha.port(), BUF_SIZE).unwrap();
    assert!(client.open());
    client
}

fn connect(server: &mut Server, client: &mut Outgoer) -> SocketAddr {
    let ok = poll_until(|| {
        let up = client.service_connect().unwrap();
        server.service_connects().unwrap();
        up && !server.ixes().is_empty()
    });
    assert!(ok, "connection never established");
    let ca = client.ca().unwrap();
    assert!(server.ix(&ca).is_some());
    ca
}

fn connected_pair() -> (Server, Outgoer, SocketAddr) {
    let mut server: Server = Server::bind("127.0.0.1", 0, BUF_SIZE).unwrap();
    assert!(server.open());
    let mut client = client_for(&server);
    let ca = connect(&mut server, &mut client);
    (server, client, ca)
}

#[test]
fn round_trip_both_ways() {
    let (mut server, mut client, ca) = connected_pair();
    assert!(client.accepted() && client.connected());
    assert_eq!(client.ha(), server.eha());

    client.tx(b"hello\n");
    client.service_txes().unwrap();
    assert!(poll_until(|| {
        server.service_all_rx_all_ix().unwrap();
        server.tail_rxbs_ix(&ca, 0).unwrap().1 >= 6
    }));
    assert_eq!(server.tail_rxbs_ix(&ca, 0).unwrap().0, b"hello\n");

    server.transmit_ix(b"hello\n", &ca).unwrap();
    server.service_txes_all_ix().unwrap();
    assert!(poll_until(|| {
        client.service_receives().unwrap();
        !client.link().rx().rxes().is_empty()
    }));
    assert_eq!(client.cat_rxes(), b"hello\n");
}

#[test]
fn nothing_available_is_none_not_empty() {
    let (mut server, mut client, ca) = connected_pair();
    assert_eq!(client.receive().unwrap(), None);
    let ix = server.ix_mut(&ca).unwrap();
    assert_eq!(ix.receive().unwrap(), None);
    assert!(!ix.cutoff());
}

#[test]
fn shutdown_send_cuts_off_peer() {
    let (mut server, mut client, ca) = connected_pair();
    server.shutdown_send_ix(&ca).unwrap();

    let mut last = None;
    assert!(poll_until(|| {
        last = client.receive().unwrap();
        last.is_some()
    }));
    assert_eq!(last, Some(Vec::new()));
    assert!(client.cutoff());

    // a cut off channel stops draining its queue
    client.tx(b"late");
    client.service_txes().unwrap();
    assert_eq!(client.link().txbs().len(), 1);
    assert_eq!(server.tail_rxbs_ix(&ca, 0).unwrap().1, 0);
}

#[test]
fn close_cuts_off_peer() {
    let (mut server, mut client, ca) = connected_pair();
    client.close();
    assert!(!client.connected());

    assert!(poll_until(|| {
        server.service_receives_all_ix().unwrap();
        server.ix(&ca).unwrap().cutoff()
    }));
    assert_eq!(server.cutoff_ixes(), vec![ca]);

    // eviction is the caller's job
    assert!(server.ix(&ca).is_some());
    server.remove_ix(&ca).unwrap();
    assert!(server.ixes().is_empty());
    assert!(matches!(server.remove_ix(&ca), Err(Error::InvalidAddress(_))));
}

#[test]
fn partial_sends_preserve_order() {
    let (mut server, mut client, ca) = connected_pair();
    let (csnd, crcv) = client.actual_buf_sizes();
    let (ssnd, srcv) = server.ix(&ca).unwrap().actual_buf_sizes();
    assert!(csnd > 0 && srcv > 0);

    let size = (csnd + crcv + ssnd + srcv) * 4;
    let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    for chunk in payload.chunks(size / 3 + 1) {
        client.tx(chunk);
    }

    client.service_txes().unwrap();
    assert!(client.link().txbs().pending_bytes() > 0, "first pass should not fit");

    let mut index = 0;
    let mut received = Vec::with_capacity(size);
    let done = poll_until(|| {
        client.service_txes().unwrap();
        server.service_all_rx_all_ix().unwrap();
        let (tail, len) = server.tail_rxbs_ix(&ca, index).unwrap();
        received.extend_from_slice(tail);
        index = len;
        received.len() >= size
    });
    assert!(done, "received {} of {} bytes", received.len(), size);
    assert_eq!(received, payload);
    assert!(client.link().txbs().is_empty());
}

#[test]
fn send_after_peer_close_is_reported() {
    let (mut server, mut client, ca) = connected_pair();
    server.shutclose_ix(&ca).unwrap();
    assert!(!server.ix(&ca).unwrap().connected());

    let failed = poll_until(|| client.send(b"anyone there?").is_err());
    assert!(failed);
    assert!(client.cutoff());
}

#[test]
fn acceptor_reopen_reuses_address() {
    let mut acceptor = Acceptor::bind("127.0.0.1", 0, BUF_SIZE).unwrap();
    assert!(acceptor.open());
    let ha = acceptor.ha();
    for _ in 0..4 {
        assert!(acceptor.reopen());
        assert_eq!(acceptor.ha(), ha);
    }
}

#[test]
fn outgoer_reopen_is_idempotent() {
    let (_server, mut client, _ca) = connected_pair();
    for _ in 0..3 {
        assert!(client.reopen());
        assert!(client.opened());
        assert!(!client.accepted());
        assert!(!client.connected());
        assert!(!client.cutoff());
    }
}

#[test]
fn client_started_before_server_reconnects() {
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let mut client = Outgoer::new("127.0.0.1", port, BUF_SIZE)
        .unwrap()
        .reconnectable(Duration::from_millis(20));
    assert!(client.open());
    for _ in 0..30 {
        assert!(!client.service_connect().unwrap());
        thread::sleep(Duration::from_millis(1));
    }

    let mut server: Server = Server::bind("127.0.0.1", port, BUF_SIZE).unwrap();
    assert!(server.open());
    let ca = connect(&mut server, &mut client);
    assert_eq!(server.ix(&ca).unwrap().ca(), ca);
}

#[test]
fn wirelog_same_mode_tees_conversation() {
    let wlog = WireLog::buffered(true);
    let mut server: Server = Server::bind("127.0.0.1", 0, BUF_SIZE).unwrap();
    assert!(server.open());
    let eha = server.eha();
    let mut client = Outgoer::new("127.0.0.1", eha.port(), BUF_SIZE)
        .unwrap()
        .with_wirelog(wlog.clone());
    assert!(client.open());
    let ca = connect(&mut server, &mut client);

    client.tx(b"hello\n");
    client.service_txes().unwrap();
    assert!(poll_until(|| {
        server.service_all_rx_all_ix().unwrap();
        server.tail_rxbs_ix(&ca, 0).unwrap().1 == 6
    }));
    server.transmit_ix(b"world\n", &ca).unwrap();
    server.service_txes_all_ix().unwrap();
    assert!(poll_until(|| {
        client.service_all_rx().unwrap();
        client.rxbs().len() == 6
    }));

    let rx = wlog.get_rx();
    assert_eq!(rx, wlog.get_tx());
    let expected = format!("TX {0}\nhello\n\nRX {0}\nworld\n\n", eha).into_bytes();
    assert_eq!(rx, expected);
}
