#![deny(clippy::all)]

use log::*;
use perun::{Config, Server};

fn setup_logger(verbose: bool) {
    if std::env::var("RUST_LOG").is_err() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", format!("{}={}", env!("CARGO_PKG_NAME"), level));
    }
    env_logger::init();
}

fn print_help() {
    println!("perun v{}", env!("CARGO_PKG_VERSION"));
    println!("A framed message-passing TCP server with optional TLS and shared-secret auth\n");
    println!("USAGE:");
    println!("    perun [OPTIONS] [CONFIG_FILE]\n");
    println!("OPTIONS:");
    println!("    -h, --help       Show this help message\n");
    println!("ARGUMENTS:");
    println!("    [CONFIG_FILE]    Path to configuration file (default: config.toml)\n");
    println!("CONFIGURATION:");
    println!("The configuration file uses a simple key=value format.\n");
    println!("[listen] - Listening endpoint");
    println!("  listen.ip = \"\"                             # Bind IP (empty = all interfaces)");
    println!("  listen.port = 9000                         # Bind port (must be >= 1)\n");
    println!("[tls] - TLS termination");
    println!("  tls.enabled = false                        # Enable TLS");
    println!("  tls.cert_path = \"\"                         # PEM certificate chain");
    println!("  tls.key_path = \"\"                          # PEM private key");
    println!("  tls.client_ca_path = \"\"                    # Trust bundle for peer certificates");
    println!("  tls.accept_invalid_peer_cert = false       # Accept unvalidated peer certificates");
    println!("  tls.require_mutual_auth = false            # Require a peer certificate\n");
    println!("[auth] - Shared-secret authentication");
    println!("  auth.shared_secret = \"\"                    # Shared secret (empty = disabled)");
    println!("  auth.grace_ms = 0                          # Unauthenticated grace period (0 = none)\n");
    println!("[allow] - Peer admission");
    println!("  allow.ips = \"\"                             # Comma-separated IPs (empty = allow any)\n");
    println!("[limits] - Connection and resource limits");
    println!("  limits.max_frame_bytes = 16777216          # Max size of one frame (16MB)");
    println!("  limits.tls_handshake_timeout_ms = 5000     # TLS handshake timeout (ms)\n");
    println!("[debug] - Diagnostics");
    println!("  debug.verbose = false                      # Debug-level logging\n");
    println!("EXAMPLES:");
    println!("    perun                                     # Use default config.toml");
    println!("    perun myconfig.toml                       # Use custom config file");
    println!("    perun --help                              # Show this help");
}

fn main() {
    let mut args = std::env::args().skip(1);

    let path = match args.next() {
        Some(arg) if arg == "-h" || arg == "--help" => {
            print_help();
            return;
        }
        Some(arg) => arg,
        None => "config.toml".to_string(),
    };

    let cfg = Config::load(&path).unwrap_or_else(|e| {
        eprintln!("failed to read config {}: {}", path, e);
        std::process::exit(1);
    });
    setup_logger(cfg.debug.verbose);
    info!("config loaded from {}", path);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("perun-worker")
        .enable_all()
        .build()
        .expect("failed to build runtime");

    runtime.block_on(async {
        let server = Server::new(cfg).unwrap_or_else(|e| {
            eprintln!("invalid configuration: {}", e);
            std::process::exit(1);
        });

        server.on_client_connected(|identity| info!("{}: client connected", identity));
        server.on_client_disconnected(|identity| info!("{}: client disconnected", identity));
        server.on_message_received(|identity, payload| {
            info!("{}: received {} bytes", identity, payload.len());
        });

        if let Err(e) = server.start().await {
            eprintln!("failed to start server: {}", e);
            std::process::exit(1);
        }

        info!("perun server started; press Ctrl-C to stop.");

        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");

        info!("shutting down...");
        server.shutdown().await;
        info!("Goodbye.");
    });
}
