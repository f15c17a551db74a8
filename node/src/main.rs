use anyhow::{Context, Result};
use chat_access_crypto::{AccountClaims, CredentialBundle, KeyPair, KeyRole};
use chat_access_network::{LocalBus, MessageBus};
use chat_access_registry::Registry;
use chat_access_service::subjects::{DEFAULT_AUDIENCE, DEFAULT_QUEUE_GROUP};
use chat_access_service::{AccessConfig, AccessService, AccountResolver, TrustDomain};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod version;

use version::{git_commit_hash, CHAT_ACCESS_VERSION};

const LOCAL_SERVER: &str = "local";
const DEFAULT_SERVER_LABEL: &str = "<undisclosed>";

/// Application configuration
#[derive(Debug, Clone)]
struct AppConfig {
    // Bus
    server: String,
    creds: Option<PathBuf>,
    syscreds: Option<PathBuf>,

    // Trust domain
    account_jwt: Option<PathBuf>,
    signing_key: Option<PathBuf>,
    operator_key: Option<PathBuf>,
    embedded_resolver: bool,

    // Service
    server_label: String,
    audience: String,
    queue_group: String,
    system_request_timeout_ms: u64,
    credential_validity_days: u32,

    // Observability
    metrics_addr: Option<SocketAddr>,

    // Logging
    log_level: String,
    log_format: String,
}

impl AppConfig {
    fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }

        builder = builder.add_source(config::Environment::with_prefix("CHAT_ACCESS"));
        let config = builder.build()?;

        let metrics_addr = match get_string_value(&config, &["metrics_addr"]) {
            Some(addr) => Some(
                addr.parse()
                    .with_context(|| format!("Invalid metrics address {addr}"))?,
            ),
            None => None,
        };

        Ok(Self {
            server: get_string_value(&config, &["server", "s"])
                .unwrap_or_else(|| LOCAL_SERVER.to_string()),
            creds: get_path_value(&config, &["creds"]),
            syscreds: get_path_value(&config, &["syscreds"]),
            account_jwt: get_path_value(&config, &["acc", "account_jwt"]),
            signing_key: get_path_value(&config, &["sk", "signing_key"]),
            operator_key: get_path_value(&config, &["osk", "operator_key"]),
            embedded_resolver: get_bool_value(&config, &["embedded_resolver"], true),
            server_label: get_string_value(&config, &["sid", "server_label"])
                .unwrap_or_else(|| DEFAULT_SERVER_LABEL.to_string()),
            audience: get_string_value(&config, &["audience"])
                .unwrap_or_else(|| DEFAULT_AUDIENCE.to_string()),
            queue_group: get_string_value(&config, &["queue_group"])
                .unwrap_or_else(|| DEFAULT_QUEUE_GROUP.to_string()),
            system_request_timeout_ms: config
                .get_int("system_request_timeout_ms")
                .map(|value| value.max(1) as u64)
                .unwrap_or(3_000),
            credential_validity_days: config
                .get_int("credential_validity_days")
                .map(|value| value.clamp(1, i64::from(u32::MAX)) as u32)
                .unwrap_or(365),
            metrics_addr,
            log_level: get_string_value(&config, &["log_level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["log_format"])
                .unwrap_or_else(|| "pretty".to_string()),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.account_jwt.is_none() {
            anyhow::bail!("An account claims file is required (--acc)");
        }
        if self.signing_key.is_none() {
            anyhow::bail!("An account signing key is required (--sk)");
        }
        if self.audience.is_empty() || self.audience.contains(['.', '*', '>']) {
            anyhow::bail!("Invalid audience {:?}", self.audience);
        }
        if self.queue_group.is_empty() {
            anyhow::bail!("Queue group can not be empty");
        }
        Ok(())
    }

    fn access_config(&self) -> AccessConfig {
        AccessConfig {
            server_label: self.server_label.clone(),
            audience: self.audience.clone(),
            queue_group: self.queue_group.clone(),
            system_request_timeout_ms: self.system_request_timeout_ms,
            credential_validity_days: self.credential_validity_days,
            ..AccessConfig::default()
        }
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_path_value(config: &Config, keys: &[&str]) -> Option<PathBuf> {
    get_string_value(config, keys).map(PathBuf::from)
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn build_cli() -> Command {
    Command::new("chat-access")
        .version(CHAT_ACCESS_VERSION)
        .about("Chat credential issuance and revocation service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("server")
                .short('s')
                .value_name("URL")
                .help("Message bus server"),
        )
        .arg(
            Arg::new("acc")
                .long("acc")
                .value_name("FILE")
                .help("Account claims file"),
        )
        .arg(
            Arg::new("sk")
                .long("sk")
                .value_name("FILE")
                .help("Account signing key seed file"),
        )
        .arg(
            Arg::new("osk")
                .long("osk")
                .value_name("FILE")
                .help("Operator signing key seed file, needed for revocation"),
        )
        .arg(
            Arg::new("creds")
                .long("creds")
                .value_name("FILE")
                .help("Application credentials file"),
        )
        .arg(
            Arg::new("syscreds")
                .long("syscreds")
                .value_name("FILE")
                .help("System credentials file"),
        )
        .arg(
            Arg::new("sid")
                .long("sid")
                .value_name("LABEL")
                .help("Server ID/location label embedded in credentials"),
        )
        .arg(
            Arg::new("audience")
                .long("audience")
                .value_name("NAME")
                .help("Audience token of the chat subjects"),
        )
        .arg(
            Arg::new("queue-group")
                .long("queue-group")
                .value_name("NAME")
                .help("Queue group shared by service replicas"),
        )
        .arg(
            Arg::new("system-timeout-ms")
                .long("system-timeout-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64))
                .help("Timeout of system-of-record requests"),
        )
        .arg(
            Arg::new("no-resolver")
                .long("no-resolver")
                .action(ArgAction::SetTrue)
                .help("Do not answer account claims requests in process"),
        )
        .arg(
            Arg::new("metrics-addr")
                .long("metrics-addr")
                .value_name("ADDR")
                .value_parser(value_parser!(SocketAddr))
                .help("Expose Prometheus metrics on this address"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "plain"])
                .help("Select log output format"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(server) = matches.get_one::<String>("server") {
        config.server = server.clone();
    }
    for (flag, target) in [
        ("acc", &mut config.account_jwt),
        ("sk", &mut config.signing_key),
        ("osk", &mut config.operator_key),
        ("creds", &mut config.creds),
        ("syscreds", &mut config.syscreds),
    ] {
        if let Some(path) = matches.get_one::<String>(flag) {
            *target = Some(PathBuf::from(path));
        }
    }
    if let Some(sid) = matches.get_one::<String>("sid") {
        config.server_label = sid.clone();
    }
    if let Some(audience) = matches.get_one::<String>("audience") {
        config.audience = audience.clone();
    }
    if let Some(queue_group) = matches.get_one::<String>("queue-group") {
        config.queue_group = queue_group.clone();
    }
    if let Some(timeout) = matches.get_one::<u64>("system-timeout-ms") {
        config.system_request_timeout_ms = *timeout;
    }
    if matches.get_flag("no-resolver") {
        config.embedded_resolver = false;
    }
    if let Some(addr) = matches.get_one::<SocketAddr>("metrics-addr") {
        config.metrics_addr = Some(*addr);
    }
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }
    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }
}

/// Keys and claims loaded from disk
struct LoadedTrust {
    domain: TrustDomain,
    account_token: String,
}

fn load_trust_domain(config: &AppConfig) -> Result<LoadedTrust> {
    let account_path = config
        .account_jwt
        .as_deref()
        .context("An account claims file is required (--acc)")?;
    let account_token = fs::read_to_string(account_path)
        .with_context(|| format!("Failed to read account claims {}", account_path.display()))?;
    let account = AccountClaims::decode(&account_token)
        .with_context(|| format!("Invalid account claims in {}", account_path.display()))?;
    account
        .check_expiry()
        .with_context(|| format!("Account claims in {} have expired", account_path.display()))?;

    let signing_path = config
        .signing_key
        .as_deref()
        .context("An account signing key is required (--sk)")?;
    let signing_key = read_seed(signing_path, KeyRole::Account)?;

    let operator_key = match config.operator_key.as_deref() {
        Some(path) => Some(read_seed(path, KeyRole::Operator)?),
        None => {
            warn!("No operator signing key given (--osk); revocations will fail");
            None
        }
    };

    Ok(LoadedTrust {
        domain: TrustDomain::new(account, signing_key, operator_key),
        account_token: account_token.trim().to_string(),
    })
}

fn read_seed(path: &Path, role: KeyRole) -> Result<KeyPair> {
    let seed = fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;
    KeyPair::from_seed_with_role(seed.trim(), role)
        .with_context(|| format!("Invalid {role} key in {}", path.display()))
}

fn load_credentials(path: &Path) -> Result<CredentialBundle> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials {}", path.display()))?;
    let bundle = CredentialBundle::parse(&text)
        .with_context(|| format!("Invalid credentials file {}", path.display()))?;
    KeyPair::from_seed_with_role(&bundle.seed, KeyRole::User)
        .with_context(|| format!("Invalid user key in {}", path.display()))?;
    Ok(bundle)
}

fn connect(config: &AppConfig) -> Result<LocalBus> {
    for (label, path) in [("app", &config.creds), ("system", &config.syscreds)] {
        if let Some(path) = path {
            let bundle = load_credentials(path)?;
            let claims = chat_access_crypto::GenericClaims::decode(&bundle.token)
                .with_context(|| format!("Invalid {label} credentials token"))?;
            info!("Using {} credentials of {}", label, claims.sub);
        }
    }

    if config.server != LOCAL_SERVER {
        warn!(
            "Server {} is not reachable from this build; using the in-process bus",
            config.server
        );
    }
    Ok(LocalBus::new())
}

fn init_metrics(config: &AppConfig) -> Result<()> {
    let Some(addr) = config.metrics_addr else {
        info!("Prometheus metrics exporter disabled");
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus metrics exporter")?;
    describe_counter!(
        "chat_access_credentials_issued_total",
        "Credentials minted for new names"
    );
    describe_counter!(
        "chat_access_request_failures_total",
        "Requests answered with a failure, by endpoint"
    );
    describe_counter!(
        "chat_access_presence_updates_total",
        "Presence announcements applied to the registry"
    );
    describe_counter!(
        "chat_access_revocations_total",
        "Identities revoked at the system-of-record"
    );
    describe_counter!(
        "chat_access_system_failures_total",
        "Failed system-of-record exchanges"
    );
    info!("Prometheus metrics available at http://{}/metrics", addr);
    Ok(())
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "plain" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = load_config_with_overrides(&matches)?;
    init_logging(&config)?;

    info!(
        "chat-access {} (commit {})",
        CHAT_ACCESS_VERSION,
        git_commit_hash()
    );
    init_metrics(&config)?;

    let trust = load_trust_domain(&config)?;
    let bus = connect(&config)?;
    let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());

    let resolver = if config.embedded_resolver {
        let mut trusted = vec![trust.domain.account.iss.clone()];
        if let Some(operator) = &trust.domain.operator_key {
            trusted.push(operator.public_key());
        }
        let resolver = Arc::new(AccountResolver::new(
            shared.clone(),
            trust.account_token.clone(),
            trusted,
        )?);
        Some(resolver.spawn().await?)
    } else {
        None
    };

    let account_id = trust.domain.account_id().to_string();
    let service = Arc::new(AccessService::new(
        config.access_config(),
        Arc::new(trust.domain),
        shared.clone(),
        shared,
        Arc::new(Registry::new()),
    ));
    let handle = service.start().await?;

    info!("Chat access service is ready for account {}", account_id);
    info!("Audience {}, queue group {}", config.audience, config.queue_group);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down chat access service");

    handle.drain().await;
    if let Some(resolver) = resolver {
        resolver.stop().await;
    }
    bus.close();

    info!("Chat access service shutdown complete");
    Ok(())
}
