//! Walletgate application entry point.
//!
//! Bootstraps the server:
//! 1. Load configuration from environment
//! 2. Select the store backend (Redis if configured, memory otherwise)
//! 3. Build the authenticator and spawn the sweep loop
//! 4. Build router with API routes and security headers
//! 5. Start Axum server
//!
//! Also supports `address` and `sign` subcommands for exercising the login
//! flow from a shell.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use walletgate::{
    auth::{
        chain::{ChainReader, JsonRpcChain},
        clock::SystemClock,
        verify::{address_from_private_key, parse_signing_key, sign_personal_message},
        AppState, Authenticator, SignatureVerifier,
    },
    cleanup,
    config::Config,
    middleware::security_headers,
    routes,
    storage::Stores,
};

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  walletgate                          Start the server");
    eprintln!("  walletgate address <private-key>    Print the wallet address for a key");
    eprintln!("  walletgate sign <private-key> <msg> Sign a challenge message (EIP-191)");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  walletgate sign 0x4c08...7d3f \"$(jq -r .message challenge.json)\"");
}

/// Handle a CLI subcommand. Returns `None` when no subcommand was given.
fn run_subcommand(args: &[String]) -> Option<Result<String, String>> {
    match args.get(1).map(String::as_str) {
        Some("address") if args.len() == 3 => Some(
            address_from_private_key(&args[2]).map(|address| address.original().to_string()),
        ),
        Some("sign") if args.len() == 4 => {
            Some(parse_signing_key(&args[2]).and_then(|key| sign_personal_message(&key, &args[3])))
        }
        Some(_) => Some(Err("unrecognized arguments".to_string())),
        None => None,
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if let Some(result) = run_subcommand(&args) {
        match result {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
        return;
    }

    // Initialize tracing with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config from environment
    let config = Config::from_env().expect("Failed to load config");
    tracing::info!("Starting walletgate on {}", config.bind_addr);
    tracing::debug!(?config, "Loaded configuration");

    // Select the store backend
    let stores = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).expect("Invalid Redis URL");
            // Fail fast if Redis is unreachable
            client
                .get_multiplexed_async_connection()
                .await
                .expect("Failed to connect to Redis");
            tracing::info!("Using Redis store backend");
            Stores::redis(client)
        }
        None => {
            tracing::warn!("REDIS_URL not set, using process-local memory stores");
            Stores::memory()
        }
    };

    // Contract-account verification needs a chain reader
    let chain: Option<Arc<dyn ChainReader>> = match &config.chain_rpc_url {
        Some(url) => Some(Arc::new(
            JsonRpcChain::new(url.as_str()).expect("Failed to build chain RPC client"),
        )),
        None => {
            tracing::info!("CHAIN_RPC_URL not set, contract-account signatures disabled");
            None
        }
    };

    if config.admin_address.is_none() {
        tracing::warn!("ADMIN_ADDRESS not set, privileged verification disabled");
    }

    let rate_limits = stores.rate_limits.clone();
    let auth = Arc::new(Authenticator::new(
        config.auth_settings(),
        stores,
        SignatureVerifier::new(chain),
        Arc::new(SystemClock),
    ));

    tokio::spawn(cleanup::run_sweep_loop(
        auth.clone(),
        rate_limits.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    ));

    // Build shared state
    let state = AppState {
        auth,
        config: Arc::new(config.clone()),
        rate_limits,
    };

    // Explicit CORS: deny all cross-origin requests.
    let cors = CorsLayer::new();

    let app = routes::api_router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(security_headers))
        .with_state(state);

    // Bind to configured address
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind");
    tracing::info!("Listening on {}", config.bind_addr);

    // Start server (with_connect_info required for ConnectInfo<SocketAddr> extractors)
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
