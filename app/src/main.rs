use anyhow::anyhow;
use clap::{Parser, Subcommand};
use magicapp::{AppPaths, MagicApp};
use magicapp_core::config::ClientSettings;
use magicapp_core::models::Registration;
use magicapp_core::oauth::OAuthProvider;
use magicapp_core::telemetry;
use std::path::PathBuf;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "magicapp", version, about = "MagicAppDev from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Directory holding the local token and preference stores.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm_password: String,
    },
    /// Sign in through GitHub or Discord.
    Oauth { provider: OAuthProvider },
    /// Complete sign-in from a redirect or deep-link URL.
    Callback { url: String },
    Logout,
    Whoami,
    Chat {
        /// Use the non-streaming endpoint.
        #[arg(long)]
        once: bool,
    },
    Projects {
        #[command(subcommand)]
        action: ProjectsCommand,
    },
    /// Show or change the theme: light, dark, automatic or toggle.
    Theme { mode: Option<String> },
    Account {
        #[command(subcommand)]
        action: AccountCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// List linked sign-in providers and links for adding more.
    Linked,
    Password {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
    /// Permanently delete the account and sign out.
    Delete {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectsCommand {
    List,
    Show {
        id: String,
    },
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: String,
    },
}

fn main() -> anyhow::Result<()> {
    telemetry::init_tracing(telemetry::env_filter("warn"))?;

    let cli = Cli::parse();
    let settings = ClientSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    let runtime = Runtime::new()?;
    runtime.block_on(run(cli, settings))
}

async fn run(cli: Cli, settings: ClientSettings) -> anyhow::Result<()> {
    let paths = cli.data_dir.map(AppPaths::at).unwrap_or_else(AppPaths::user);
    let store = paths.open_store().await?;
    let mut app = MagicApp::new(settings, store);

    let launch_url = match &cli.command {
        Command::Callback { url } => Some(url.as_str()),
        _ => None,
    };
    app.start(launch_url).await;

    let mut out = std::io::stdout();
    let mut input = tokio::io::BufReader::new(tokio::io::stdin());
    let outcome = match &cli.command {
        Command::Login { email, password } => app.login(email, password, &mut out).await,
        Command::Register {
            name,
            email,
            password,
            confirm_password,
        } => {
            let registration = Registration {
                name: name.clone(),
                email: email.clone(),
                password: password.clone(),
                confirm_password: confirm_password.clone(),
            };
            app.register(&registration, &mut out).await
        }
        Command::Oauth { provider } => app.oauth(*provider, &mut input, &mut out).await,
        Command::Callback { .. } => app.callback_result(&mut out),
        Command::Logout => app.logout(&mut out).await,
        Command::Whoami => app.whoami(&mut out),
        Command::Chat { once } => app.chat(*once, &mut input, &mut out).await,
        Command::Projects { action } => match action {
            ProjectsCommand::List => app.list_projects(&mut out).await,
            ProjectsCommand::Show { id } => app.show_project(id, &mut out).await,
            ProjectsCommand::Create { name, description } => {
                app.create_project(name, description.as_deref(), &mut out)
                    .await
            }
            ProjectsCommand::Delete { id } => app.delete_project(id, &mut out).await,
        },
        Command::Theme { mode } => app.theme(mode.as_deref(), &mut out).await,
        Command::Account { action } => match action {
            AccountCommand::Linked => app.accounts(&mut out).await,
            AccountCommand::Password { current, new } => {
                app.change_password(current, new, &mut out).await
            }
            AccountCommand::Delete { yes } => app.delete_account(*yes, &mut out).await,
        },
    };
    app.flush_events(&mut out)?;
    outcome
}
