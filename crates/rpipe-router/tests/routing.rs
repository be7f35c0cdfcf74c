//! Router behaviour with real session stacks

use rpipe_arq::GbnEngine;
use rpipe_pipe::{
    CallbackPipe, Command, Datagram, EchoPipe, EngineConfig, Endpoint, ErrorCallback,
    OutputCallback, Packet, Pipe, PipeCallbacks, PipeError, RecvCallback, SessionKey,
    SessionPipe, TransportAdapterPipe, FIN,
};
use rpipe_router::{BridgeRouter, FreshSessionHandler, KeyExtractor, RouterError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;

const DATA: u8 = 0x51;

fn endpoint(s: &str) -> Endpoint {
    s.parse::<SocketAddr>().unwrap().into()
}

/// In-memory raw pipe: writes land in a shared outbox
#[derive(Default)]
struct MemoryRaw {
    outbox: Rc<RefCell<Vec<Datagram>>>,
    default_peer: Option<Endpoint>,
    callbacks: PipeCallbacks,
}

impl Pipe for MemoryRaw {
    fn init(&mut self) -> Result<(), PipeError> {
        Ok(())
    }

    fn send(&mut self, packet: Packet<'_>) -> Result<usize, PipeError> {
        let peer = packet.peer.or(self.default_peer).ok_or(PipeError::NoPeer)?;
        self.outbox
            .borrow_mut()
            .push(Datagram::new(packet.data.to_vec(), Some(peer)));
        Ok(packet.len())
    }

    fn input(&mut self, packet: Packet<'_>) -> Result<usize, PipeError> {
        self.callbacks.recv(packet)
    }

    fn flush(&mut self, _now: u32) {}

    fn close(&mut self) -> Result<(), PipeError> {
        self.callbacks.clear();
        Ok(())
    }

    fn set_on_output(&mut self, cb: Option<OutputCallback>) {
        self.callbacks.set_output(cb);
    }

    fn set_on_recv(&mut self, cb: Option<RecvCallback>) {
        self.callbacks.set_recv(cb);
    }

    fn set_on_error(&mut self, cb: Option<ErrorCallback>) {
        self.callbacks.set_error(cb);
    }
}

/// Session stand-in that logs every flush it sees
struct FlushProbe {
    name: &'static str,
    log: Rc<RefCell<Vec<(&'static str, u32)>>>,
    callbacks: PipeCallbacks,
}

impl Pipe for FlushProbe {
    fn init(&mut self) -> Result<(), PipeError> {
        Ok(())
    }

    fn send(&mut self, packet: Packet<'_>) -> Result<usize, PipeError> {
        self.callbacks.output(packet)
    }

    fn input(&mut self, packet: Packet<'_>) -> Result<usize, PipeError> {
        Ok(packet.len())
    }

    fn flush(&mut self, now: u32) {
        self.log.borrow_mut().push((self.name, now));
    }

    fn close(&mut self) -> Result<(), PipeError> {
        self.callbacks.clear();
        Ok(())
    }

    fn set_on_output(&mut self, cb: Option<OutputCallback>) {
        self.callbacks.set_output(cb);
    }

    fn set_on_recv(&mut self, cb: Option<RecvCallback>) {
        self.callbacks.set_recv(cb);
    }

    fn set_on_error(&mut self, cb: Option<ErrorCallback>) {
        self.callbacks.set_error(cb);
    }
}

type Inbox = Rc<RefCell<Vec<u8>>>;

fn recording_session(conv: u32, peer: Endpoint) -> (Box<dyn Pipe>, Inbox) {
    let inbox: Inbox = Rc::default();
    let mut session = SessionPipe::for_peer(conv, peer, CallbackPipe::new()).unwrap();
    let sink = Rc::clone(&inbox);
    session.set_on_recv(Some(Box::new(move |p: Packet<'_>| {
        sink.borrow_mut().extend_from_slice(p.data);
        Ok(p.len())
    })));
    (Box::new(session), inbox)
}

fn data(conv: u32, payload: &[u8]) -> Vec<u8> {
    let mut datagram = vec![DATA];
    datagram.extend_from_slice(&conv.to_be_bytes());
    datagram.extend_from_slice(payload);
    datagram
}

fn memory_router() -> (BridgeRouter<MemoryRaw>, Rc<RefCell<Vec<Datagram>>>) {
    let raw = MemoryRaw::default();
    let outbox = Rc::clone(&raw.outbox);
    (BridgeRouter::new(raw).unwrap(), outbox)
}

#[test]
fn test_sessions_only_see_their_own_datagrams() {
    let (mut router, _) = memory_router();
    let peers = [
        endpoint("10.0.0.1:1000"),
        endpoint("10.0.0.1:1001"),
        endpoint("10.0.0.2:1000"),
    ];

    let mut inboxes = HashMap::new();
    for (i, peer) in peers.iter().enumerate() {
        let conv = i as u32 + 1;
        let (session, inbox) = recording_session(conv, *peer);
        router
            .add_pipe(SessionKey::new(conv, Some(*peer)).unwrap(), session)
            .unwrap();
        inboxes.insert(conv, inbox);
    }

    for round in 0..4u8 {
        for (i, peer) in peers.iter().enumerate() {
            let conv = i as u32 + 1;
            router
                .input(Packet::to(&data(conv, &[conv as u8, round]), Some(*peer)))
                .unwrap();
        }
    }
    // Right conv, wrong sender: a different key, nobody is listening.
    router
        .input(Packet::to(&data(1, b"spoof"), Some(peers[2])))
        .unwrap();

    for (conv, inbox) in &inboxes {
        let inbox = inbox.borrow();
        let mut expected = Vec::new();
        for round in 0..4u8 {
            expected.extend_from_slice(&data(*conv, &[*conv as u8, round]));
        }
        assert_eq!(*inbox, expected, "conv {}", conv);
    }
}

#[test]
fn test_unknown_key_without_handler_is_silent() {
    let (mut router, outbox) = memory_router();
    let errors = Rc::new(RefCell::new(0));
    let count = Rc::clone(&errors);
    router.set_on_error(Some(Box::new(move |_: &RouterError| *count.borrow_mut() += 1)));

    router
        .input(Packet::to(&data(77, b"hello?"), Some(endpoint("10.9.9.9:9"))))
        .unwrap();

    assert_eq!(router.session_count(), 0);
    assert_eq!(*errors.borrow(), 0);
    assert!(outbox.borrow().is_empty());
}

#[test]
fn test_flush_fans_out_to_live_sessions_only() {
    let (mut router, _) = memory_router();
    let log = Rc::new(RefCell::new(Vec::new()));
    let peer = endpoint("10.0.0.5:500");
    let key = |conv| SessionKey::new(conv, Some(peer)).unwrap();

    for (conv, name) in [(2, "b"), (1, "a"), (3, "c")] {
        let probe = FlushProbe {
            name,
            log: Rc::clone(&log),
            callbacks: PipeCallbacks::new(),
        };
        router.add_pipe(key(conv), Box::new(probe)).unwrap();
    }

    router.flush(10).unwrap();
    router.remove_pipe(&key(2), None).unwrap();
    router.flush(10).unwrap();
    router.flush(30).unwrap();

    assert_eq!(
        log.borrow().as_slice(),
        &[
            ("a", 10),
            ("b", 10),
            ("c", 10),
            ("a", 10),
            ("c", 10),
            ("a", 30),
            ("c", 30),
        ]
    );
}

#[test]
fn test_fin_removes_session_and_next_datagram_starts_fresh() {
    let (mut router, _) = memory_router();
    let peer = endpoint("192.168.0.10:4000");
    let key_a = SessionKey::new(10, Some(peer)).unwrap();
    let key_b = SessionKey::new(20, Some(peer)).unwrap();

    let (a, inbox_a) = recording_session(10, peer);
    let (b, inbox_b) = recording_session(20, peer);
    router.add_pipe(key_a, a).unwrap();
    router.add_pipe(key_b, b).unwrap();

    let fresh: Rc<RefCell<Vec<SessionKey>>> = Rc::default();
    let fresh_inbox: Inbox = Rc::default();
    let created = Rc::clone(&fresh);
    let sink = Rc::clone(&fresh_inbox);
    let handler: FreshSessionHandler = Box::new(move |key, _bytes, sender| {
        created.borrow_mut().push(key);
        let mut session = SessionPipe::new(key, sender, CallbackPipe::new()).ok()?;
        let sink = Rc::clone(&sink);
        session.set_on_recv(Some(Box::new(move |p: Packet<'_>| {
            sink.borrow_mut().extend_from_slice(p.data);
            Ok(p.len())
        })));
        Some(Box::new(session) as Box<dyn Pipe>)
    });
    router.set_fresh_session_handler(Some(handler));

    router.input(Packet::to(&data(10, b"one"), Some(peer))).unwrap();
    assert_eq!(*inbox_a.borrow(), data(10, b"one"));
    assert!(inbox_b.borrow().is_empty());

    router.input(Packet::to(&[FIN, 0, 0, 0, 10], Some(peer))).unwrap();
    assert!(!router.contains(&key_a));
    assert!(router.contains(&key_b));
    assert_eq!(inbox_a.borrow().len(), 8, "close signal is not delivered");

    router.input(Packet::to(&data(10, b"two"), Some(peer))).unwrap();

    assert_eq!(fresh.borrow().as_slice(), &[key_a]);
    assert!(router.contains(&key_a));
    assert_eq!(*fresh_inbox.borrow(), data(10, b"two"));
    assert_eq!(*inbox_a.borrow(), data(10, b"one"), "stale pipe never sees it");
}

#[test]
fn test_failed_session_init_is_reported() {
    let (mut router, _) = memory_router();
    let peer = endpoint("10.0.0.3:3");

    // An adapter whose engine cannot be built fails at init.
    let adapter = TransportAdapterPipe::<GbnEngine, _>::new(
        1,
        EngineConfig {
            mtu: 4,
            ..EngineConfig::default()
        },
        EchoPipe::new(),
    );
    let session = SessionPipe::for_peer(1, peer, adapter).unwrap();
    let result = router.add_pipe(SessionKey::new(1, Some(peer)).unwrap(), Box::new(session));

    assert!(matches!(result, Err(RouterError::SessionInit { .. })));
    assert_eq!(router.session_count(), 0);
}

/// Shuttle datagrams between two routers until both outboxes are empty
fn exchange(
    client: &mut BridgeRouter<MemoryRaw>,
    client_out: &Rc<RefCell<Vec<Datagram>>>,
    client_addr: Endpoint,
    server: &mut BridgeRouter<MemoryRaw>,
    server_out: &Rc<RefCell<Vec<Datagram>>>,
    server_addr: Endpoint,
) {
    for _ in 0..16 {
        let to_server: Vec<Datagram> = client_out.borrow_mut().drain(..).collect();
        let to_client: Vec<Datagram> = server_out.borrow_mut().drain(..).collect();
        if to_server.is_empty() && to_client.is_empty() {
            return;
        }
        for d in to_server {
            assert_eq!(d.peer, Some(server_addr));
            server.input(Packet::to(&d.payload, Some(client_addr))).unwrap();
        }
        for d in to_client {
            assert_eq!(d.peer, Some(client_addr));
            client.input(Packet::to(&d.payload, Some(server_addr))).unwrap();
        }
    }
}

#[test]
fn test_echo_through_two_routers() {
    let client_addr = endpoint("127.0.0.1:40000");
    let server_addr = endpoint("127.0.0.1:10010");
    let config = EngineConfig::default().for_session_layer(1400).unwrap();

    let (mut server, server_out) = memory_router();
    let server_config = config.clone();
    let echo_sessions: FreshSessionHandler = Box::new(move |key, _bytes, sender| {
        let adapter = TransportAdapterPipe::<GbnEngine, _>::new(
            key.conv(),
            server_config.clone(),
            EchoPipe::new(),
        );
        let session = SessionPipe::new(key, sender, adapter).ok()?;
        Some(Box::new(session) as Box<dyn Pipe>)
    });
    server.set_fresh_session_handler(Some(echo_sessions));

    let raw = MemoryRaw {
        default_peer: Some(server_addr),
        ..Default::default()
    };
    let client_out = Rc::clone(&raw.outbox);
    let mut client = BridgeRouter::new(raw).unwrap();
    let conv_only: KeyExtractor = Box::new(|bytes, _sender| SessionKey::from_datagram(bytes, None));
    client.set_key_extractor(conv_only);

    let received: Inbox = Rc::default();
    let leaf = CallbackPipe::new();
    let sender = leaf.sender();
    let adapter = TransportAdapterPipe::<GbnEngine, _>::new(1, config, leaf);
    let client_key = SessionKey::new(1, None).unwrap();
    let mut session = SessionPipe::new(client_key, None, adapter).unwrap();
    let sink = Rc::clone(&received);
    session.set_on_recv(Some(Box::new(move |p: Packet<'_>| {
        sink.borrow_mut().extend_from_slice(p.data);
        Ok(p.len())
    })));
    client.add_pipe(client_key, Box::new(session)).unwrap();

    assert_eq!(sender.send(b"hello relay").unwrap(), 11);

    let mut now = 0;
    for _ in 0..20 {
        client.flush(now).unwrap();
        server.flush(now).unwrap();
        exchange(
            &mut client,
            &client_out,
            client_addr,
            &mut server,
            &server_out,
            server_addr,
        );
        now += 10;
        if received.borrow().as_slice() == b"hello relay" {
            break;
        }
    }

    assert_eq!(received.borrow().as_slice(), b"hello relay");
    assert_eq!(server.session_count(), 1);

    client.remove_pipe(&client_key, Some(Command::Fin)).unwrap();
    assert!(sender.is_closed());
    exchange(
        &mut client,
        &client_out,
        client_addr,
        &mut server,
        &server_out,
        server_addr,
    );
    assert_eq!(server.session_count(), 0, "FIN tears the server session down");
}

#[test]
fn test_unaddressed_close_signal_leaves_router_open() {
    let (mut router, outbox) = memory_router();
    let peer = endpoint("10.1.0.1:5000");
    let (healthy, inbox) = recording_session(3, peer);
    let healthy_key = SessionKey::new(3, Some(peer)).unwrap();
    router.add_pipe(healthy_key, healthy).unwrap();

    let orphan_key = SessionKey::new(4, None).unwrap();
    let orphan = SessionPipe::new(orphan_key, None, CallbackPipe::new()).unwrap();
    router.add_pipe(orphan_key, Box::new(orphan)).unwrap();

    assert!(router.remove_pipe(&orphan_key, Some(Command::Fin)).unwrap());
    assert!(!router.is_closed());
    assert!(outbox.borrow().is_empty());

    router.input(Packet::to(&data(3, b"still here"), Some(peer))).unwrap();
    assert_eq!(*inbox.borrow(), data(3, b"still here"));
}

#[test]
fn test_unaddressed_session_is_reaped_alone() {
    let (mut router, outbox) = memory_router();
    let peer = endpoint("10.1.0.2:5000");
    let (healthy, _) = recording_session(5, peer);
    let healthy_key = SessionKey::new(5, Some(peer)).unwrap();
    router.add_pipe(healthy_key, healthy).unwrap();

    let config = EngineConfig::default().for_session_layer(1400).unwrap();
    let leaf = CallbackPipe::new();
    let sender = leaf.sender();
    let orphan_key = SessionKey::new(6, None).unwrap();
    let adapter = TransportAdapterPipe::<GbnEngine, _>::new(6, config, leaf);
    let orphan = SessionPipe::new(orphan_key, None, adapter).unwrap();
    router.add_pipe(orphan_key, Box::new(orphan)).unwrap();

    sender.send(b"nowhere to go").unwrap();
    router.flush(0).unwrap();

    assert!(!router.contains(&orphan_key));
    assert!(router.contains(&healthy_key));
    assert!(!router.is_closed());
    assert!(outbox.borrow().is_empty());

    router.flush(10).unwrap();
    assert!(router.contains(&healthy_key));
}
