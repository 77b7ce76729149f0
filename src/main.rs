//! Echo every packet received on the TUN interface back into it.
//!
//! Usage: `tunpump [config.toml]`

use std::process;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tunpump::{Engine, EngineConfig, Error};

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
    .unwrap_or_else(|err| {
        error!("failed to load configuration: {err}");
        process::exit(1);
    });

    let engine = Engine::with_config(config).unwrap_or_else(|err| {
        error!("failed to create TUN interface: {err}");
        process::exit(1);
    });

    if let Err(err) = engine.start() {
        error!("failed to start packet pumps: {err}");
        process::exit(1);
    }

    info!("echoing packets on {}", engine.name());

    loop {
        let packet = match engine.read() {
            Ok(packet) => packet,
            Err(Error::QueueClosed) => break,
            Err(err) => {
                error!("read failed: {err}");
                break;
            }
        };

        println!("{}", hex_dump(packet.as_bytes()));

        if let Err(err) = engine.write(packet) {
            error!("write failed: {err}");
            break;
        }
    }

    if let Err(err) = engine.close() {
        error!("{err}");
        process::exit(1);
    }
}

/// Offset, hex bytes and printable ASCII, 16 bytes per line.
fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!("{:08x}  {:<32}  |{}|", i * 16, hex::encode(chunk), ascii)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
