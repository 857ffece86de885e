#![forbid(unsafe_code)]

use wcbc::config::{load_config, Cli, ClientConfig, Commands};
use wcbc::dispatcher::{Dispatcher, Notification};
use wcbc::relay::RelayConnection;
use wcbc::session::{Client, Peer};
use wcbc::shard::RandomShard;
use wcbc::BridgeError;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use qrcode::QrCode;
use std::io::IsTerminal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wcb_common::SymmetricKey;

// ── ANSI style helpers ──────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

fn tty() -> bool {
    std::io::stdout().is_terminal()
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}

// ── QR rendering ────────────────────────────────────────────────────

/// Renders two QR rows per terminal line with half-block characters.
fn render_qr(data: &str) -> anyhow::Result<String> {
    let code = QrCode::new(data.as_bytes())?;
    let width = code.width();
    let quiet = 2;
    let dark = |col: usize, row: usize| {
        col >= quiet
            && row >= quiet
            && col - quiet < width
            && row - quiet < width
            && code[(col - quiet, row - quiet)] == qrcode::types::Color::Dark
    };

    // Inverted so the code reads as dark-on-light on dark terminals.
    let total = width + 2 * quiet;
    let mut out = String::new();
    let mut row = 0;
    while row < total {
        out.push_str("  ");
        for col in 0..total {
            let top = !dark(col, row);
            let bottom = row + 1 < total && !dark(col, row + 1);
            out.push(match (top, bottom) {
                (true, true) => '\u{2588}',
                (true, false) => '\u{2580}',
                (false, true) => '\u{2584}',
                (false, false) => ' ',
            });
        }
        out.push('\n');
        row += 2;
    }
    Ok(out)
}

// ── Pairing ─────────────────────────────────────────────────────────

struct PairArgs {
    name: Option<String>,
    description: Option<String>,
    url: Option<String>,
    chain_id: Option<u64>,
    no_qr: bool,
}

fn apply_overrides(config: &mut ClientConfig, cli: &Cli, args: &PairArgs) {
    if let Some(ref relay) = cli.relay {
        config.relay.host = Some(relay.clone());
    }
    if let Some(ref name) = args.name {
        config.session.name.clone_from(name);
    }
    if let Some(ref description) = args.description {
        config.session.description.clone_from(description);
    }
    if let Some(ref url) = args.url {
        config.session.url.clone_from(url);
    }
    if let Some(chain_id) = args.chain_id {
        config.session.chain_id = chain_id;
    }
}

async fn run_pair(cli: &Cli, args: PairArgs) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, cli, &args);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let key = config.symmetric_key()?;
    let (conn, reader) = RelayConnection::connect(&config, key, &RandomShard).await?;
    if let Some(interval) = config.keepalive_interval() {
        conn.spawn_keepalive(interval);
    }
    let (dispatcher, mut notifications) =
        Dispatcher::spawn(conn, reader, config.notifications.capacity);
    let client = Client::new(dispatcher.clone(), config.session.chain_id)
        .with_timeout(config.request_timeout());

    let proposal = client.pairing_session(config.peer_meta()).await?;

    if tty() {
        eprintln!();
        eprintln!("  {BOLD}◈ Wallet pairing{RESET}");
        eprintln!(
            "  {DIM}Bridge{RESET}     {}",
            dispatcher.connection().host()
        );
        eprintln!();
    }
    if !args.no_qr {
        println!("{}", render_qr(proposal.url())?);
    }
    println!("{}", proposal.url());

    let peer = tokio::select! {
        peer = proposal.approved(None) => match peer {
            Ok(peer) => peer,
            Err(BridgeError::SessionRejected) => {
                if tty() {
                    println!("  {RED}\u{2717}{RESET} Session rejected by wallet");
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            return Ok(());
        }
    };

    if tty() {
        println!("  {GREEN}✓{RESET} Session established");
        for account in peer.accounts() {
            println!("    {CYAN}{account}{RESET}");
        }
        println!("  {DIM}Paste base64 transactions, one per line{RESET}");
    } else {
        println!("{}", serde_json::json!({ "accounts": peer.accounts() }));
    }

    let result = sign_loop(&dispatcher, peer, &mut notifications).await;
    if let Err(e) = dispatcher.shutdown().await {
        debug!(error = %e, "close frame not sent");
    }
    result
}

async fn sign_line(peer: &Peer, line: &str) -> anyhow::Result<()> {
    let txn = match STANDARD.decode(line) {
        Ok(txn) => txn,
        Err(e) => {
            eprintln!("  {RED}\u{2717}{RESET} not base64: {DIM}{e}{RESET}");
            return Ok(());
        }
    };

    match peer.sign_transactions(&[txn], None).await {
        Ok(signed) => {
            for blob in signed {
                match blob {
                    Some(bytes) => println!("{}", STANDARD.encode(bytes)),
                    None => println!("null"),
                }
            }
            Ok(())
        }
        Err(BridgeError::Rpc { code, message }) => {
            eprintln!("  {RED}\u{2717}{RESET} wallet refused ({code}): {message}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn sign_loop(
    dispatcher: &Dispatcher,
    mut peer: Peer,
    notifications: &mut mpsc::Receiver<Notification>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                tokio::select! {
                    res = sign_line(&peer, line) => res?,
                    _ = tokio::signal::ctrl_c() => {
                        info!("received shutdown signal");
                        break;
                    }
                }
            }
            note = notifications.recv() => match note {
                Some(Notification::SessionUpdate { params, .. }) => {
                    if !peer.apply_update(&params) {
                        info!("session ended by wallet");
                        break;
                    }
                    info!(accounts = ?peer.accounts(), chain_id = peer.chain_id(), "session updated");
                }
                Some(Notification::Request(req)) => {
                    debug!(method = %req.header.method, "ignoring peer request");
                }
                None => break,
            },
            () = dispatcher.closed() => {
                warn!("bridge connection closed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider - may already be installed or unsupported platform");
    }

    let cli = Cli::parse();

    init_tracing(&cli)?;

    match &cli.command {
        Commands::Pair {
            name,
            description,
            url,
            chain_id,
            no_qr,
        } => {
            let args = PairArgs {
                name: name.clone(),
                description: description.clone(),
                url: url.clone(),
                chain_id: *chain_id,
                no_qr: *no_qr,
            };
            run_pair(&cli, args).await?;
        }

        Commands::Keygen => {
            println!("{}", SymmetricKey::generate().to_hex());
        }
    }

    Ok(())
}
