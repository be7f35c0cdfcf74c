//! Echo over real loopback sockets

use rpipe_arq::{GbnEngine, SegmentHeader, PUSH};
use rpipe_pipe::{
    CallbackPipe, Command, EchoPipe, EngineConfig, Endpoint, Packet, Pipe, SessionKey,
    SessionPipe, TransportAdapterPipe,
};
use rpipe_router::{BridgeRouter, FreshSessionHandler, KeyExtractor};
use rpipe_transport_udp::{drive, UdpRawPipe};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

const INTERVAL: Duration = Duration::from_millis(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn bind() -> Rc<UdpSocket> {
    Rc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
}

fn echo_server(socket: &Rc<UdpSocket>, config: EngineConfig) -> BridgeRouter<UdpRawPipe> {
    let mut router = BridgeRouter::new(UdpRawPipe::new(Rc::clone(socket))).unwrap();
    let handler: FreshSessionHandler = Box::new(move |key, _bytes, sender| {
        let adapter =
            TransportAdapterPipe::<GbnEngine, _>::new(key.conv(), config.clone(), EchoPipe::new());
        let session = SessionPipe::new(key, sender, adapter).ok()?;
        Some(Box::new(session) as Box<dyn Pipe>)
    });
    router.set_fresh_session_handler(Some(handler));
    router
}

#[tokio::test(flavor = "current_thread")]
async fn test_echo_and_fin_over_udp() {
    init_tracing();
    let config = EngineConfig::default().for_session_layer(1400).unwrap();

    let server_socket = bind().await;
    let server_addr = Endpoint::from(server_socket.local_addr().unwrap());
    let mut server = echo_server(&server_socket, config.clone());

    let client_socket = bind().await;
    let raw = UdpRawPipe::new(Rc::clone(&client_socket)).with_default_peer(server_addr);
    let mut client = BridgeRouter::new(raw).unwrap();
    let conv_only: KeyExtractor = Box::new(|bytes, _sender| SessionKey::from_datagram(bytes, None));
    client.set_key_extractor(conv_only);

    let message = b"round trip through the relay".to_vec();
    let received: Rc<RefCell<Vec<u8>>> = Rc::default();
    let echoed = Rc::new(Notify::new());

    let leaf = CallbackPipe::new();
    let sender = leaf.sender();
    let key = SessionKey::new(1, None).unwrap();
    let mut session =
        SessionPipe::new(key, None, TransportAdapterPipe::<GbnEngine, _>::new(1, config, leaf))
            .unwrap();
    let sink = Rc::clone(&received);
    let done = Rc::clone(&echoed);
    let expected = message.len();
    session.set_on_recv(Some(Box::new(move |p: Packet<'_>| {
        let mut sink = sink.borrow_mut();
        sink.extend_from_slice(p.data);
        if sink.len() >= expected {
            done.notify_one();
        }
        Ok(p.len())
    })));
    client.add_pipe(key, Box::new(session)).unwrap();
    assert_eq!(sender.send(&message).unwrap(), message.len());

    let exchange = async {
        tokio::select! {
            r = drive(&mut client, &client_socket, INTERVAL, echoed.notified()) => r,
            r = drive(&mut server, &server_socket, INTERVAL, std::future::pending::<()>()) => r,
        }
    };
    tokio::time::timeout(Duration::from_secs(5), exchange)
        .await
        .expect("echo did not arrive in time")
        .unwrap();

    assert_eq!(*received.borrow(), message);
    assert_eq!(server.session_count(), 1);

    assert!(client.remove_pipe(&key, Some(Command::Fin)).unwrap());
    assert!(sender.is_closed());

    drive(
        &mut server,
        &server_socket,
        INTERVAL,
        tokio::time::sleep(Duration::from_millis(200)),
    )
    .await
    .unwrap();
    assert_eq!(server.session_count(), 0, "FIN tears the server session down");

    client.close().unwrap();
    server.close().unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_sessions_are_isolated_by_sender() {
    init_tracing();
    let config = EngineConfig::default().for_session_layer(1400).unwrap();

    let server_socket = bind().await;
    let server_addr = Endpoint::from(server_socket.local_addr().unwrap());
    let mut server = echo_server(&server_socket, config);

    // Two peers reuse the same conversation id.
    let a = bind().await;
    let b = bind().await;
    a.writable().await.unwrap();
    b.writable().await.unwrap();
    let mut hello = Vec::new();
    SegmentHeader {
        cmd: PUSH,
        conv: 7,
        sn: 0,
        una: 0,
        wnd: 128,
        len: 4,
    }
    .encode_into(&mut hello);
    hello.extend_from_slice(b"ping");
    a.send_to(&hello, server_addr.socket_addr()).await.unwrap();
    b.send_to(&hello, server_addr.socket_addr()).await.unwrap();

    drive(
        &mut server,
        &server_socket,
        INTERVAL,
        tokio::time::sleep(Duration::from_millis(100)),
    )
    .await
    .unwrap();

    let mut keys = server.keys();
    keys.sort();
    let mut expected = vec![
        SessionKey::new(7, Some(a.local_addr().unwrap().into())).unwrap(),
        SessionKey::new(7, Some(b.local_addr().unwrap().into())).unwrap(),
    ];
    expected.sort();
    assert_eq!(keys, expected);
}
