use clap::{Args, Parser, Subcommand};
use flowgate_core::CliArgs;
use flowgate_provider_impl::constants::DEFAULT_REDIRECT_URI;

#[derive(Parser)]
#[command(name = "flowgate", version, about, args_conflicts_with_subcommands = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
    /// Gateway settings when no subcommand is given.
    #[command(flatten)]
    pub(crate) serve: CliArgs,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the gateway (the default).
    Serve(CliArgs),
    /// Log in through the vendor's OAuth flow and store the tokens.
    Login(LoginArgs),
    /// Print the OAuth login URL and exit.
    AuthUrl {
        #[arg(long, default_value = DEFAULT_REDIRECT_URI)]
        redirect_uri: String,
    },
}

#[derive(Args)]
pub(crate) struct LoginArgs {
    #[command(flatten)]
    pub(crate) gateway: CliArgs,
    #[arg(long, default_value = DEFAULT_REDIRECT_URI)]
    pub(crate) redirect_uri: String,
    /// Callback URL or bare code; prompted for when absent.
    #[arg(long)]
    pub(crate) callback: Option<String>,
}
