use std::net::SocketAddr;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use paygate_api::app::{build_app, dto::PermissionsView};
use paygate_api::config::{DEFAULT_LISTEN, DEFAULT_UPSTREAM, GatewayConfig};
use paygate_api::forward::Forwarder;
use paygate_auth::{Entitlement, ExpandPolicy, PermissionSet, SigningKey};
use paygate_observability::LogFormat;

#[derive(Parser)]
#[command(name = "paygate")]
#[command(about = "Permission-scoped credentials in front of a payment API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format (json, pretty)
    #[arg(long, global = true, default_value_t = LogFormat::Json, env = "PAYGATE_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the authorizing reverse proxy
    Serve(ServeArgs),

    /// Sign a permission set into a credential
    Sign {
        #[command(flatten)]
        key: KeyArgs,

        /// Raw permission word (ignored when --grant is given)
        #[arg(long, default_value_t = 1)]
        input: u64,

        /// Grant as <access>:<resource>, e.g. read:customers (repeatable)
        #[arg(long = "grant")]
        grants: Vec<Entitlement>,
    },

    /// Verify a credential and print its grants as JSON
    Inspect {
        #[command(flatten)]
        key: KeyArgs,

        /// Credential to inspect
        credential: String,
    },
}

#[derive(Args)]
struct KeyArgs {
    /// Upstream secret key; also the signing key unless --signing-key is set
    #[arg(long, env = "PAYGATE_UPSTREAM_KEY", hide_env_values = true)]
    upstream_key: String,

    /// Separate HMAC signing key
    #[arg(long, env = "PAYGATE_SIGNING_KEY", hide_env_values = true)]
    signing_key: Option<String>,
}

impl KeyArgs {
    fn signing_key(&self) -> anyhow::Result<SigningKey> {
        let key = self
            .signing_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(&self.upstream_key);
        SigningKey::new(key).context("invalid signing key")
    }
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    key: KeyArgs,

    /// Upstream API URI to forward to
    #[arg(long = "upstream", alias = "uri", env = "PAYGATE_UPSTREAM", default_value = DEFAULT_UPSTREAM)]
    upstream: String,

    /// Interface and port on which to listen
    #[arg(long, env = "PAYGATE_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: SocketAddr,

    /// Let resource-scoped credentials request expanded responses
    #[arg(long)]
    allow_expand: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    paygate_observability::init(cli.log_format);

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Sign { key, input, grants } => {
            let permissions = if grants.is_empty() {
                PermissionSet::from_bits(input)
            } else {
                grants.into_iter().collect()
            };
            tracing::info!(encoded = permissions.bits(), "signing credential");
            println!("{}", key.signing_key()?.sign(&permissions));
            Ok(())
        }
        Commands::Inspect { key, credential } => {
            let permissions = key
                .signing_key()?
                .verify(credential.trim())
                .context("credential rejected")?;
            println!("{}", serde_json::to_string_pretty(&PermissionsView::from(&permissions))?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let expand_policy = if args.allow_expand {
        ExpandPolicy::Permit
    } else {
        ExpandPolicy::RequireWildcard
    };

    let config = GatewayConfig::new(&args.upstream, args.listen, args.key.upstream_key)?
        .with_signing_key(args.key.signing_key)
        .with_expand_policy(expand_policy);
    tracing::debug!(?config, "configuration loaded");

    let engine = config.engine()?;
    let forwarder = Forwarder::new(config.upstream.clone()).context("failed to build upstream client")?;
    let app = build_app(engine, forwarder);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    tracing::info!(
        listen = %listener.local_addr()?,
        upstream = %config.upstream,
        "gateway listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
