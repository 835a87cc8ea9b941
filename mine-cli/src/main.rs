// MINE command-line client: publish payloads to and consume events from a broker.

mod config;

use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mine_core::{Connection, Delivery};
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mine", version, about = "Publish to and subscribe from a MINE event broker")]
struct Cli {
    /// Config file (default: ~/.config/mine/config.toml, then /etc/mine/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    host: Option<String>,
    #[arg(long, short, global = true)]
    port: Option<u16>,
    #[arg(long, global = true)]
    login: Option<String>,
    #[arg(long, global = true)]
    password: Option<String>,
    /// Publish chunk size / receive buffer size in bytes.
    #[arg(long, global = true)]
    chunk_size: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish one payload (from --data, --file, or stdin).
    Publish {
        #[arg(long, short)]
        event: String,
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Register for an event and print each delivered payload.
    Subscribe {
        #[arg(long, short)]
        event: String,
        /// Source address filter.
        #[arg(long, default_value = "0.0.0.0")]
        ip: String,
        /// Stop after this many payloads.
        #[arg(long)]
        count: Option<u64>,
        /// Also print payloads as (lossy) UTF-8.
        #[arg(long)]
        print: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(h) = cli.host {
        cfg.host = h;
    }
    if let Some(p) = cli.port {
        cfg.port = p;
    }
    if cli.login.is_some() {
        cfg.login = cli.login;
    }
    if cli.password.is_some() {
        cfg.password = cli.password;
    }
    if let Some(n) = cli.chunk_size {
        cfg.chunk_size = n;
    }
    anyhow::ensure!(cfg.chunk_size > 0, "chunk size must be positive");

    let mut conn = Connection::with_config(cfg.connection.clone());
    conn.connect(&cfg.host, cfg.port)
        .with_context(|| format!("connecting to {}:{}", cfg.host, cfg.port))?;
    tracing::info!(host = %cfg.host, port = cfg.port, tls = conn.is_tls(), "connected");
    conn.login(cfg.login.as_deref(), cfg.password.as_deref())
        .context("login")?;

    match cli.command {
        Command::Publish { event, data, file } => {
            let payload = read_payload(data, file)?;
            publish(&mut conn, &event, &payload, cfg.chunk_size)?;
        }
        Command::Subscribe {
            event,
            ip,
            count,
            print,
        } => {
            conn.register_event(&event, &ip)
                .with_context(|| format!("registering {event}"))?;
            tracing::info!(%event, %ip, "registered");
            subscribe(&mut conn, cfg.chunk_size, count, print, &mut io::stdout().lock())?;
        }
    }

    conn.disconnect().context("disconnect")?;
    Ok(())
}

fn read_payload(data: Option<String>, file: Option<PathBuf>) -> anyhow::Result<Vec<u8>> {
    if let Some(d) = data {
        return Ok(d.into_bytes());
    }
    if let Some(p) = file {
        return std::fs::read(&p).with_context(|| format!("reading {}", p.display()));
    }
    let mut buf = Vec::new();
    io::stdin().read_to_end(&mut buf).context("reading stdin")?;
    Ok(buf)
}

fn publish(
    conn: &mut Connection,
    event: &str,
    payload: &[u8],
    chunk_size: usize,
) -> anyhow::Result<()> {
    conn.send_payload(event, payload, chunk_size)
        .with_context(|| format!("publishing {event}"))?;
    tracing::info!(
        %event,
        bytes = payload.len(),
        sha256 = %hex::encode(Sha256::digest(payload)),
        "published"
    );
    Ok(())
}

/// Drain payloads until `count` is reached or the connection fails.
/// One line per payload: event, total length, SHA-256.
fn subscribe(
    conn: &mut Connection,
    chunk_size: usize,
    count: Option<u64>,
    print: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; chunk_size];
    let mut delivered = 0u64;
    while count.map_or(true, |c| delivered < c) {
        let mut hasher = Sha256::new();
        let mut body = Vec::new();
        let mut header: Option<(String, u64)> = None;
        loop {
            match conn.recv_event(&mut buf).context("receiving")? {
                Delivery::Chunk {
                    event,
                    total_len,
                    len,
                } => {
                    if header.is_none() {
                        header = Some((event.to_string(), total_len));
                    }
                    hasher.update(&buf[..len]);
                    if print {
                        body.extend_from_slice(&buf[..len]);
                    }
                }
                Delivery::EndOfPayload => break,
            }
        }
        let (event, total_len) = header.unwrap_or_default();
        writeln!(out, "{event}\t{total_len}\t{}", hex::encode(hasher.finalize()))?;
        if print {
            writeln!(out, "{}", String::from_utf8_lossy(&body))?;
        }
        delivered += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use mine_core::wire;
    use mine_core::ByteOrder;

    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "mine", "--host", "b", "-p", "9", "subscribe", "-e", "EV", "--count", "2",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("b"));
        assert_eq!(cli.port, Some(9));
        assert!(matches!(
            cli.command,
            Command::Subscribe { count: Some(2), print: false, .. }
        ));
        assert!(
            Cli::try_parse_from(["mine", "publish", "-e", "E", "--data", "x", "--file", "f"])
                .is_err()
        );
    }

    #[test]
    fn hex_digest() {
        assert_eq!(hex::encode([0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(
            hex::encode(Sha256::digest(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn subscribe_prints_each_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut bytes = vec![0u8];
            bytes.extend_from_slice(&wire::encode_event_name("EV").unwrap());
            for payload in [&b"hello"[..], &b"world!"[..]] {
                bytes.extend_from_slice(&wire::encode_data_header(
                    payload.len() as u64,
                    ByteOrder::Native,
                ));
                bytes.extend_from_slice(payload);
            }
            s.write_all(&bytes).unwrap();
        });

        let mut conn = Connection::new();
        conn.connect("127.0.0.1", port).unwrap();
        let mut out = Vec::new();
        subscribe(&mut conn, 4, Some(2), true, &mut out).unwrap();
        server.join().unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("EV\t5\t"));
        assert_eq!(lines[1], "hello");
        assert!(lines[2].starts_with("EV\t6\t"));
        assert_eq!(lines[3], "world!");
    }
}
