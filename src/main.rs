//! rpipe - session relay over UDP
//!
//! `rpipe server` echoes every session that reaches it; `rpipe client` opens
//! one session, sends a message and prints the echo.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{RelayConfig, CLIENT_CONV};
use rpipe_arq::GbnEngine;
use rpipe_pipe::{
    CallbackPipe, Command, EchoPipe, EngineConfig, Packet, Pipe, SessionKey, SessionPipe,
    TransportAdapterPipe,
};
use rpipe_router::{BridgeRouter, FreshSessionHandler, RouterError};
use rpipe_transport_udp::{drive, UdpRawPipe};
use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// rpipe - Reliable sessions multiplexed over one UDP socket
#[derive(Parser, Debug)]
#[command(name = "rpipe")]
#[command(about = "rpipe - Reliable sessions multiplexed over one UDP socket")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, env = "RPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log filter (overrides the config file), e.g. "debug" or "rpipe_router=trace"
    #[arg(long, global = true, env = "RPIPE_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept sessions and echo everything they send
    Server {
        /// Address to bind (e.g., 0.0.0.0:10010)
        #[arg(long, env = "RPIPE_LISTEN")]
        listen: Option<String>,
    },

    /// Send one message through a server and print the echo
    #[command(long_about = r#"
Open a single session to a relay server, send MESSAGE over it and print
what comes back. The session is closed with FIN once the echo arrives.

EXAMPLES:
  rpipe server --listen 127.0.0.1:10010
  rpipe client --target 127.0.0.1:10010 --message "hello"
    "#)]
    Client {
        /// Server address (e.g., 127.0.0.1:10010)
        #[arg(long, env = "RPIPE_TARGET")]
        target: Option<String>,

        /// Text to send
        #[arg(long)]
        message: String,
    },
}

/// Setup logging with the specified filter
fn setup_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };

    match &cli.command {
        Commands::Server { listen: Some(listen) } => config.listen = listen.clone(),
        Commands::Client {
            target: Some(target),
            ..
        } => config.target = target.clone(),
        _ => {}
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.verbose {
        config.log_level = "debug".to_string();
    }

    config.validate()?;
    Ok(config)
}

fn log_router_failure() -> Box<dyn FnMut(&RouterError)> {
    Box::new(|err: &RouterError| error!("Router failed: {}", err))
}

/// Every unknown key becomes an echo session
fn echo_sessions(engine: EngineConfig) -> FreshSessionHandler {
    Box::new(move |key, _bytes, sender| {
        let adapter =
            TransportAdapterPipe::<GbnEngine, _>::new(key.conv(), engine.clone(), EchoPipe::new());
        match SessionPipe::new(key, sender, adapter) {
            Ok(session) => {
                info!("New session {}", key);
                Some(Box::new(session) as Box<dyn Pipe>)
            }
            Err(e) => {
                warn!("Refusing session {}: {}", key, e);
                None
            }
        }
    })
}

async fn run_server(config: &RelayConfig) -> Result<()> {
    let listen = config.listen_addr()?;
    let socket = Rc::new(
        UdpSocket::bind(listen)
            .await
            .with_context(|| format!("Failed to bind {}", listen))?,
    );

    let mut router = BridgeRouter::new(UdpRawPipe::new(Rc::clone(&socket)))
        .context("Failed to start router")?;
    router.set_fresh_session_handler(Some(echo_sessions(config.session_engine()?)));
    router.set_on_error(Some(log_router_failure()));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    };
    let served = drive(&mut router, &socket, config.flush_interval(), shutdown).await;

    info!("Closing {} sessions", router.session_count());
    router.close().context("Failed to close router")?;
    served.context("Relay stopped")?;

    info!("rpipe server stopped");
    Ok(())
}

async fn run_client(config: &RelayConfig, message: &str) -> Result<()> {
    let target = config.target_addr()?;
    let bind: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = Rc::new(
        UdpSocket::bind(bind)
            .await
            .context("Failed to bind client socket")?,
    );

    let raw = UdpRawPipe::new(Rc::clone(&socket)).with_default_peer(target.into());
    let mut router = BridgeRouter::new(raw).context("Failed to start router")?;
    // Replies are keyed by conversation alone; the server is the only peer.
    router.set_key_extractor(Box::new(|bytes, _sender| {
        SessionKey::from_datagram(bytes, None)
    }));
    router.set_on_error(Some(log_router_failure()));

    let key = SessionKey::new(CLIENT_CONV, None)?;
    let leaf = CallbackPipe::new();
    let sender = leaf.sender();
    let adapter =
        TransportAdapterPipe::<GbnEngine, _>::new(CLIENT_CONV, config.session_engine()?, leaf);
    let mut session = SessionPipe::new(key, None, adapter)?;

    let reply: Rc<RefCell<Vec<u8>>> = Rc::default();
    let echoed = Rc::new(Notify::new());
    let sink = Rc::clone(&reply);
    let done = Rc::clone(&echoed);
    let expected = message.len();
    session.set_on_recv(Some(Box::new(move |packet: Packet<'_>| {
        let mut sink = sink.borrow_mut();
        sink.extend_from_slice(packet.data);
        if sink.len() >= expected {
            done.notify_one();
        }
        Ok(packet.len())
    })));
    router.add_pipe(key, Box::new(session))?;

    let accepted = sender.send(message.as_bytes())?;
    if accepted < message.len() {
        anyhow::bail!(
            "Message too large: {} of {} bytes queued",
            accepted,
            message.len()
        );
    }
    info!("Sent {} bytes to {}", accepted, target);

    let timeout = config.reply_timeout();
    let exchange = drive(&mut router, &socket, config.flush_interval(), echoed.notified());
    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result.context("Relay connection failed")?,
        Err(_) => {
            let _ = router.remove_pipe(&key, Some(Command::Rst));
            let _ = router.close();
            anyhow::bail!("No echo from {} within {:?}", target, timeout);
        }
    }

    println!("{}", String::from_utf8_lossy(&reply.borrow()));

    router
        .remove_pipe(&key, Some(Command::Fin))
        .context("Failed to close session")?;
    router.close().context("Failed to close router")?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    setup_logging(&config.log_level);

    match &cli.command {
        Commands::Server { .. } => {
            info!("rpipe server starting on {}", config.listen);
            run_server(&config).await
        }
        Commands::Client { message, .. } => run_client(&config, message).await,
    }
}
