//! Hardware Wallet Bridge CLI Example
//!
//! Talks to a USB-serial hardware wallet through the bridge session.
//!
//! # Prerequisites
//!
//! - A wallet enumerating as a CDC-ACM or USB-serial device
//!   (`/dev/ttyACM*`, `/dev/ttyUSB*`, `/dev/cu.usbmodem*`)
//! - Read/write access to the device node (on Linux, membership of the
//!   `dialout` group or a udev rule)
//!
//! # Quick Start
//!
//! ```bash
//! cargo run --example ohw-cli --features tty -- ports
//! cargo run --example ohw-cli --features tty -- version
//! cargo run --example ohw-cli --features tty -- pubkey "m/44'/60'/0'/0/0"
//! OHW_DEVICE=/dev/ttyACM1 cargo run --example ohw-cli --features tty -- \
//!     sign "m/44'/60'/0'/0/0" 0x$(printf 'ab%.0s' {1..32})
//! ```
//!
//! Set `RUST_LOG=ohw_bridge_core=debug` to watch the session.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ports` | List candidate serial devices |
//! | `info` | Print the serial profile as JSON |
//! | `version` | Query firmware version |
//! | `pubkey <path>` | Derive a public key and its address |
//! | `sign <path> <hash>` | Sign a 32-byte hash and print `r \|\| s \|\| v` |

#![expect(unused_crate_dependencies, reason = "needed for CLI example")]

use std::env;
use std::process::ExitCode;
use std::time::Duration;

use ohw_bridge_core::transport::TtyConnector;
use ohw_bridge_core::{Request, Response, SerialConfig, Session, derive_address};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// How long to wait for the device to answer.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_help();
        return ExitCode::FAILURE;
    }

    let result = match args[1].as_str() {
        "ports" => {
            cmd_ports();
            Ok(())
        }
        "info" => cmd_info(),
        "version" => exchange(Request::GetVersion).await,
        "pubkey" => match args.get(2) {
            Some(path) => exchange(Request::DerivePublicKey { path: path.clone() }).await,
            None => Err("usage: pubkey <path>".to_string()),
        },
        "sign" => match parse_sign(&args[2..]) {
            Ok(request) => exchange(request).await,
            Err(err) => Err(err),
        },
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        other => Err(format!("unknown command: {other}")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    println!(
        r#"Hardware Wallet Bridge CLI

USAGE:
    ohw-cli <COMMAND>

COMMANDS:
    ports                List candidate serial devices
    info                 Print the serial profile as JSON
    version              Query firmware version
    pubkey <path>        Derive a public key and its address
    sign <path> <hash>   Sign a 32-byte hash
    help                 Show this help message

ENVIRONMENT:
    OHW_DEVICE           Device node to open (default: first discovered)
    RUST_LOG             Log filter, e.g. ohw_bridge_core=debug
"#
    );
}

fn cmd_ports() {
    let devices = TtyConnector::list_devices();
    if devices.is_empty() {
        println!("No serial devices found.");
    }
    for device in devices {
        println!("{}", device.display());
    }
}

fn cmd_info() -> Result<(), String> {
    let json = serde_json::to_string_pretty(&SerialConfig::default()).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn parse_sign(args: &[String]) -> Result<Request, String> {
    let [path, hash] = args else {
        return Err("usage: sign <path> <hash>".to_string());
    };
    let hex_str = hash.strip_prefix("0x").unwrap_or(hash);
    let digest: [u8; 32] = hex::decode(hex_str)
        .map_err(|e| format!("invalid hash: {e}"))?
        .try_into()
        .map_err(|_| "hash must be 32 bytes".to_string())?;

    Ok(Request::SignTransaction {
        path: path.clone(),
        digest,
    })
}

fn connector() -> TtyConnector {
    env::var_os("OHW_DEVICE").map_or_else(TtyConnector::discover, TtyConnector::new)
}

/// Sends one request and prints the first response.
async fn exchange(request: Request) -> Result<(), String> {
    let session = Session::new(connector());
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.on_message(move |response: Response| {
        tx.send(response).ok();
    });

    session.connect().await.map_err(|e| e.to_string())?;
    let sent = session.send_request(&request).await;
    let response = match sent {
        Ok(()) => tokio::time::timeout(RESPONSE_TIMEOUT, rx.recv()).await,
        Err(err) => {
            session.close().await;
            return Err(err.to_string());
        }
    };
    session.close().await;

    match response {
        Ok(Some(response)) => print_response(response),
        Ok(None) => Err("device disconnected".to_string()),
        Err(_) => Err("timed out waiting for the device".to_string()),
    }
}

fn print_response(response: Response) -> Result<(), String> {
    match response {
        Response::Version {
            version,
            initialized,
        } => {
            println!("Firmware:    {version}");
            println!("Initialized: {initialized}");
        }
        Response::WalletInit { mnemonic } => {
            println!("Mnemonic: {mnemonic}");
        }
        Response::PublicKey { path, public_key } => {
            let address = derive_address(&public_key).map_err(|e| e.to_string())?;
            println!("Path:       {path}");
            println!("Public key: 0x{}", hex::encode(&public_key));
            println!("Address:    {address}");
        }
        Response::Signature(result) => {
            let signature = result.resolve().map_err(|e| e.to_string())?;
            println!("Signature: {signature}");
            println!("v:         {:#04x}", signature.v());
        }
        Response::Failure { code, message } => {
            return Err(format!("device error {code}: {message}"));
        }
    }
    Ok(())
}
