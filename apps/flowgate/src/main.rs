use std::error::Error;
use std::io::Write;

use clap::Parser;
mod cli;
use flowgate_common::{AuthType, mask_secret};
use flowgate_core::{
    Bootstrap, CliArgs, UpstreamClientConfig, bootstrap, build_upstream_client, load_config,
};
use flowgate_provider_core::{Credential, CredentialStore};
use flowgate_provider_impl::{
    IflowOAuth, SettingsFileStore, authorize_url, new_state, parse_callback,
};
use flowgate_router::gateway_router;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{Cli, Command, LoginArgs};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("flowgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    match cli.command {
        None => serve(cli.serve).await,
        Some(Command::Serve(args)) => serve(args).await,
        Some(Command::Login(args)) => login(args).await,
        Some(Command::AuthUrl { redirect_uri }) => {
            println!("{}", authorize_url(&redirect_uri, &new_state()));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("flowgate=info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(args: CliArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = load_config(args)?;
    info!(
        host = %config.host,
        port = config.port,
        backend = ?config.upstream_backend,
        reasoning_policy = ?config.reasoning_policy,
        api_concurrency = config.api_concurrency,
        custom_key = config.custom_api_key.is_some(),
        "config loaded"
    );

    let Bootstrap {
        config,
        service,
        refresher,
    } = bootstrap(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    refresher.spawn(shutdown_rx);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, gateway_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler failed; running until killed");
        std::future::pending::<()>().await;
    }
}

async fn login(args: LoginArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = load_config(args.gateway)?;
    let client = build_upstream_client(
        config.upstream_backend,
        UpstreamClientConfig::from_gateway(&config),
    )?;
    let oauth = IflowOAuth::new(client);

    let state = new_state();
    let url = oauth.auth_url(&args.redirect_uri, &state);
    println!("Open this URL in a browser and log in:\n\n{url}\n");
    let input = match args.callback {
        Some(callback) => callback,
        None => prompt("Paste the callback URL or the code: ").await?,
    };
    let (code, returned_state) = parse_callback(&input);
    let code = code.ok_or("no authorization code found in the input")?;
    if returned_state.is_some_and(|returned| returned != state) {
        return Err("OAuth state does not match; start the login again".into());
    }

    let tokens = oauth.exchange_code(&code, &args.redirect_uri).await?;
    let user = oauth.user_info(&tokens.access_token).await?;
    let api_key = user.api_key.ok_or("user info carried no apiKey")?;
    let credential = Credential {
        api_key,
        access_token: Some(tokens.access_token),
        refresh_token: tokens.refresh_token,
        auth_type: Some(AuthType::OauthIflow),
        expires_at: tokens.expires_at,
    };
    SettingsFileStore::new(&config.settings_path).save(&credential)?;
    info!(
        settings = %config.settings_path.display(),
        api_key = %mask_secret(&credential.api_key),
        "login stored"
    );
    Ok(())
}

async fn prompt(message: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
    print!("{message}");
    std::io::stdout().flush()?;
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;
    Ok(line.trim().to_string())
}
