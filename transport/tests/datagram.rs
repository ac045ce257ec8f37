// Datagram transports driven the way a poll loop would drive them
use hio_transport::{udp, unix, Datagram, BUF_SIZE};
use hio_wirelog::WireLog;
use tempfile::TempDir;
use std::thread;
use std::time::Duration;

fn poll_receive<D: Datagram>(peer: &mut D) -> (Vec<u8>, Option<D::Addr>) {
    for _ in 0..500 {
        let (data, src) = peer.receive().unwrap();
        if src.is_some() {
            return (data, src);
        }
        thread::sleep(Duration::from_millis(2));
    }
    (Vec::new(), None)
}

#[test]
fn udp_round_trip_every_ordered_pair() {
    let mut peers: Vec<udp::Peer> = (0..3)
        .map(|_| {
            let mut peer = udp::Peer::bind("127.0.0.1", 0, BUF_SIZE).unwrap();
            assert!(peer.open());
            peer
        })
        .collect();

    for a in 0..peers.len() {
        for b in 0..peers.len() {
            let msg = format!("{} to {}", a, b).into_bytes();
            let dest = peers[b].ha();
            let sent = peers[a].send(&msg, &dest).unwrap();
            assert_eq!(sent, msg.len());

            let (data, src) = poll_receive(&mut peers[b]);
            assert_eq!(data, msg);
            assert_eq!(src, Some(peers[a].ha()));
        }
    }

    for peer in peers.iter_mut() {
        assert_eq!(peer.receive().unwrap(), (Vec::new(), None));
    }
}

#[test]
fn uxd_round_trip_every_ordered_pair() {
    let dir = TempDir::new().unwrap();
    let mut peers: Vec<unix::Peer> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|name| {
            let mut peer = unix::Peer::new(dir.path().join(format!("{}.uxd", name)), BUF_SIZE);
            assert!(peer.open());
            peer
        })
        .collect();

    for a in 0..peers.len() {
        for b in 0..peers.len() {
            let msg = format!("{} to {}", a, b).into_bytes();
            let dest = peers[b].ha().to_path_buf();
            assert_eq!(peers[a].send(&msg, &dest).unwrap(), msg.len());

            let (data, src) = poll_receive(&mut peers[b]);
            assert_eq!(data, msg);
            assert_eq!(src.as_deref(), Some(peers[a].ha()));
        }
    }

    for peer in peers.iter_mut() {
        peer.close().unwrap();
    }
}

#[test]
fn udp_queues_drain_in_order() {
    let mut alpha = udp::Peer::bind("127.0.0.1", 0, BUF_SIZE).unwrap();
    let mut beta = udp::Peer::bind("127.0.0.1", 0, BUF_SIZE).unwrap();
    assert!(alpha.open() && beta.open());

    for i in 0..5 {
        alpha.tx(format!("msg {}", i).as_bytes(), beta.ha());
    }
    alpha.service_txes().unwrap();

    for _ in 0..500 {
        beta.service_receives().unwrap();
        if beta.rxes().len() == 5 {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    let got: Vec<Vec<u8>> = beta.rxes().iter().map(|(data, _)| data.clone()).collect();
    let want: Vec<Vec<u8>> = (0..5).map(|i| format!("msg {}", i).into_bytes()).collect();
    assert_eq!(got, want);
    assert!(beta.rxes().iter().all(|(_, src)| *src == alpha.ha()));
}

#[test]
fn udp_reopen_is_idempotent() {
    let mut peer = udp::Peer::bind("127.0.0.1", 0, BUF_SIZE).unwrap();
    assert!(peer.open());
    let ha = peer.ha();
    for _ in 0..5 {
        assert!(peer.reopen());
        assert_eq!(peer.ha(), ha);
    }
    assert!(peer.opened());
}

#[test]
fn uxd_reopen_rebinds_same_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sock.uxd");
    let mut peer = unix::Peer::new(&path, BUF_SIZE);
    for _ in 0..3 {
        assert!(peer.reopen());
        assert!(path.exists());
    }
    peer.close().unwrap();
    assert!(!path.exists());
}

#[test]
fn udp_wirelog_records_both_directions() {
    let wlog = WireLog::buffered(true);
    let mut alpha = udp::Peer::bind("127.0.0.1", 0, BUF_SIZE)
        .unwrap()
        .with_wirelog(wlog.clone());
    let mut beta = udp::Peer::bind("127.0.0.1", 0, BUF_SIZE).unwrap();
    assert!(alpha.open() && beta.open());

    alpha.send(b"ping", &beta.ha()).unwrap();
    let (data, src) = poll_receive(&mut beta);
    assert_eq!(data, b"ping");
    beta.send(b"pong", &src.unwrap()).unwrap();
    let (data, _) = poll_receive(&mut alpha);
    assert_eq!(data, b"pong");

    let expected = format!("TX {0}\nping\nRX {0}\npong\n", beta.ha()).into_bytes();
    assert_eq!(wlog.get_rx(), expected);
    assert_eq!(wlog.get_tx(), expected);
}
