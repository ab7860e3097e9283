//! Courier main binary.
//!
//! Accepts order-status notifications over HTTP and delivers them through a
//! logged-in WhatsApp Web session.

mod config;
mod init;
mod routes;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "Order-status notification dispatcher")]
struct Cli {
    /// Config file (default: ~/.courier/config.toml).
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the engine and the HTTP server (default).
    Serve,
    /// Serve with a visible browser window, for the one-time QR login.
    Login,
    /// Initialize ~/.courier with config and phrase templates (idempotent).
    Init,
    /// Validate config and the phrase matrix.
    Doctor,
    /// Print the recipient, message and deep link for a notification without
    /// sending it.
    Preview {
        phone: String,
        status: String,
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("courier: ignoring unreadable .env: {e}");
        }
    }
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(config, false).await,
        Command::Login => server::serve(config, true).await,
        Command::Init => {
            let report = init::initialize_default().await?;
            if report.created.is_empty() {
                println!(
                    "courier init: already initialized at {}",
                    report.root.display()
                );
            } else {
                println!("courier init: initialized {}", report.root.display());
                for path in &report.created {
                    println!("created {}", path.display());
                }
                if !report.skipped.is_empty() {
                    println!("kept {} existing file(s) unchanged", report.skipped.len());
                }
            }
            println!("next: run `courier login` once to scan the WhatsApp QR code");
            Ok(())
        }
        Command::Doctor => server::doctor(config).await,
        Command::Preview {
            phone,
            status,
            name,
        } => server::preview(config, &phone, &status, name.as_deref()).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,courier=debug,courier_app=debug,courier_core=debug,courier_browser=debug,tower_http=info",
        ),
    };
    let log_format = std::env::var("COURIER_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    match log_format.as_str() {
        "json" => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        "pretty" => builder.pretty().init(),
        "compact" => builder.compact().init(),
        other => {
            return Err(anyhow::anyhow!(
                "unsupported COURIER_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::info!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;

    #[test]
    fn bare_invocation_defaults_to_serve() {
        let cli = Cli::try_parse_from(["courier"]).expect("parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn preview_takes_phone_status_and_optional_name() {
        let cli = Cli::try_parse_from([
            "courier",
            "--config",
            "/tmp/courier.toml",
            "preview",
            "83981691823",
            "saiu_entrega",
            "--name",
            "Maria",
        ])
        .expect("parse");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/courier.toml")));
        match cli.command {
            Some(Command::Preview {
                phone,
                status,
                name,
            }) => {
                assert_eq!(phone, "83981691823");
                assert_eq!(status, "saiu_entrega");
                assert_eq!(name.as_deref(), Some("Maria"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
