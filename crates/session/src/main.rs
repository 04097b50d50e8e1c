// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fittrack_session::config::ClientConfig;
use fittrack_session::model::{ProfileUpdate, Registration};
use fittrack_session::SessionContext;

#[derive(Parser)]
#[command(name = "fittrack", version, about = "Fittrack account and session client")]
struct Cli {
    #[command(flatten)]
    config: ClientConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with an email address or username
    Login {
        identifier: String,
        #[arg(long, env = "FITTRACK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign in with a Google ID token
    Google {
        /// ID token returned by Google sign-in
        credential: String,
    },
    /// Create an account (does not sign in)
    Register(RegisterArgs),
    /// Sign out of this device
    Logout,
    /// Sign out of every device
    LogoutAll,
    /// Restore the stored session and print the signed-in user
    Whoami,
    /// Confirm an email address with the token from the verification mail
    Verify { token: String },
    /// Send the verification mail again
    ResendVerification { email: String },
    /// Request a password reset mail
    ForgotPassword { email: String },
    /// Set a new password with the token from the reset mail
    ResetPassword {
        token: String,
        #[arg(long, env = "FITTRACK_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Change the password of the signed-in user
    ChangePassword {
        #[arg(long, env = "FITTRACK_PASSWORD", hide_env_values = true)]
        current: String,
        #[arg(long, env = "FITTRACK_NEW_PASSWORD", hide_env_values = true)]
        new: String,
    },
    /// Update profile fields of the signed-in user
    UpdateProfile(ProfileArgs),
    /// Print notifications for the signed-in user until interrupted
    Watch,
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "FITTRACK_PASSWORD", hide_env_values = true)]
    password: String,
    /// Date of birth (YYYY-MM-DD)
    #[arg(long)]
    date_of_birth: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    /// Height in centimetres
    #[arg(long)]
    height: Option<f64>,
    /// Weight in kilograms
    #[arg(long)]
    weight: Option<f64>,
}

#[derive(Args)]
struct ProfileArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    avatar: Option<String>,
    #[arg(long)]
    height: Option<f64>,
    #[arg(long)]
    weight: Option<f64>,
    #[arg(long)]
    date_of_birth: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    activity_level: Option<String>,
    #[arg(long)]
    fitness_goal: Option<String>,
}

impl From<RegisterArgs> for Registration {
    fn from(a: RegisterArgs) -> Self {
        Self {
            name: a.name,
            email: a.email,
            password: a.password,
            date_of_birth: a.date_of_birth,
            gender: a.gender,
            height: a.height,
            weight: a.weight,
        }
    }
}

impl From<ProfileArgs> for ProfileUpdate {
    fn from(a: ProfileArgs) -> Self {
        Self {
            name: a.name,
            avatar: a.avatar,
            height: a.height,
            weight: a.weight,
            date_of_birth: a.date_of_birth,
            gender: a.gender,
            activity_level: a.activity_level,
            fitness_goal: a.fitness_goal,
        }
    }
}

fn init_tracing(config: &ClientConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = SessionContext::open(cli.config);
    let controller = &ctx.controller;

    match cli.command {
        Command::Login { identifier, password } => {
            let user = match controller.login(&identifier, &password).await {
                Ok(user) => user,
                Err(e) if e.is_email_not_verified() => {
                    anyhow::bail!("{e}; run `fittrack resend-verification {identifier}`")
                }
                Err(e) => return Err(e.into()),
            };
            println!("signed in as {}", user.display_name());
        }
        Command::Google { credential } => {
            if ctx.config.google_client_id.is_none() {
                info!("no google client id configured; the credential must match the server's");
            }
            let user = controller.login_with_google(&credential).await?;
            println!("signed in as {}", user.display_name());
        }
        Command::Register(args) => {
            let message = controller.register(&args.into()).await?;
            println!("{message}");
        }
        Command::Logout => {
            controller.logout().await;
            println!("signed out");
        }
        Command::LogoutAll => {
            controller.logout_all().await;
            println!("signed out of all devices");
        }
        Command::Whoami => match controller.initialize().await? {
            Some(user) => print_json(&user)?,
            None => println!("not signed in"),
        },
        Command::Verify { token } => println!("{}", controller.verify_email(&token).await?),
        Command::ResendVerification { email } => {
            println!("{}", controller.resend_verification(&email).await?)
        }
        Command::ForgotPassword { email } => {
            println!("{}", controller.forgot_password(&email).await?)
        }
        Command::ResetPassword { token, password } => {
            println!("{}", controller.reset_password(&token, &password).await?)
        }
        Command::ChangePassword { current, new } => {
            println!("{}", controller.change_password(&current, &new).await?)
        }
        Command::UpdateProfile(args) => {
            let patch = ProfileUpdate::from(args);
            if patch.is_empty() {
                anyhow::bail!("nothing to update");
            }
            print_json(&controller.update_profile(&patch).await?)?;
        }
        Command::Watch => watch(&ctx).await?,
    }
    Ok(())
}

async fn watch(ctx: &SessionContext) -> anyhow::Result<()> {
    if ctx.controller.initialize().await?.is_none() {
        anyhow::bail!("not signed in");
    }
    let shutdown = CancellationToken::new();
    let channel = ctx.notifications(shutdown.clone());
    let mut notifications = channel.subscribe();
    let mut events = ctx.session.events();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                if let Ok(event) = event {
                    info!(?event, "session changed");
                    if ctx.session.snapshot().access_token().is_none() {
                        break;
                    }
                }
            }
            notification = notifications.recv() => match notification {
                Ok(n) => print_json(&n)?,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    info!(skipped = n, "notifications dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    shutdown.cancel();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.config);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
