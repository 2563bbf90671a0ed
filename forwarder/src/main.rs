//! The `dns-forwarder` binary: parses CLI flags, assembles the resolution
//! chain, and serves it over UDP and TCP.
//!
//! Grounded in `shelter::main`/`shelter::commands::dns::DNSServerTypeSubCommand::handle`:
//! `env_logger::init_from_env`, a `clap::Parser` CLI, a `hickory_server::server::ServerFuture`
//! with `register_socket`/`register_listener`, then `block_until_done`.

mod chain_builder;
mod cli;
mod handler;

use clap::Parser;
use env_logger::Env;
use hickory_server::server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};

use cli::Cli;
use dns_forwarder_core::events::EventBus;
use handler::ForwarderHandler;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let cli_args = Cli::parse();
    let events = EventBus::new();

    let chain = chain_builder::build(&cli_args, events)
        .await
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;

    log::info!(
        "assembled resolver chain: head stage = {}",
        dns_forwarder_core::name(chain.head.as_ref())
    );

    let handler = ForwarderHandler { chain: chain.head };
    let mut server = ServerFuture::new(handler);

    server.register_socket(UdpSocket::bind(cli_args.listen_udp).await?);
    log::info!("listening for UDP queries on {}", cli_args.listen_udp);

    server.register_listener(
        TcpListener::bind(cli_args.listen_tcp).await?,
        std::time::Duration::from_secs(10),
    );
    log::info!("listening for TCP queries on {}", cli_args.listen_tcp);

    server.block_until_done().await?;
    Ok(())
}
