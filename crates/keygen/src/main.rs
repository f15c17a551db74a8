//! Chat access key and claims tool
//!
//! Creates the operator/account trust chain the service runs against and
//! mints stand-alone user credential files.

use anyhow::{Context, Result};
use chat_access_crypto::{
    AccountClaims, CredentialBundle, GenericClaims, KeyPair, KeyRole, UserClaims,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const OPERATOR_SEED_FILE: &str = "operator.seed";
pub const ACCOUNT_SEED_FILE: &str = "account.seed";
pub const SIGNING_SEED_FILE: &str = "account-signing.seed";
pub const ACCOUNT_JWT_FILE: &str = "account.jwt";
pub const SERVICE_CREDS_FILE: &str = "service.creds";

#[derive(Parser)]
#[command(name = "chat-access-keygen")]
#[command(about = "Chat access key and claims tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create operator and account keys plus a signed account document
    Init {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Account name recorded in the account document
        #[arg(short, long, default_value = "CHAT")]
        name: String,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Mint a credentials file for a user of an account
    User {
        /// Path to the account seed file
        #[arg(long)]
        account_seed: PathBuf,

        /// User name
        #[arg(short, long)]
        name: String,

        /// Output file; printed to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the public key of a seed file
    PubKey {
        /// Path to the seed file
        seed: PathBuf,
    },

    /// Decode a token, credentials file or token file and print its claims
    Inspect {
        /// Token text or path to a file holding one
        input: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            output,
            name,
            force,
        } => {
            let trust = init_trust_chain(&output, &name, force)?;
            println!("✓ Trust chain created in {}", output.display());
            println!("  Operator: {}", trust.operator);
            println!("  Account:  {}", trust.account);
            println!("  Signing:  {}", trust.signing);
            println!("\n⚠️  IMPORTANT: the seed files are secrets. Keep them private.");
        }
        Commands::User {
            account_seed,
            name,
            output,
        } => {
            let bundle = mint_user(&account_seed, &name)?;
            match output {
                Some(path) => {
                    write_secret(&path, &bundle.render(), false)?;
                    println!("✓ Credentials written to {}", path.display());
                }
                None => print!("{}", bundle.render()),
            }
        }
        Commands::PubKey { seed } => {
            let key = read_seed(&seed)?;
            println!("{} key: {}", key.role(), key.public_key());
        }
        Commands::Inspect { input } => {
            let claims = inspect(&input)?;
            println!("{}", serde_json::to_string_pretty(&claims)?);
            if claims.is_expired() {
                println!("⚠️  token is expired");
            }
        }
    }

    Ok(())
}

/// Public keys of a freshly created trust chain
#[derive(Debug)]
struct TrustChain {
    operator: String,
    account: String,
    signing: String,
}

fn init_trust_chain(output: &Path, name: &str, force: bool) -> Result<TrustChain> {
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let operator = KeyPair::generate(KeyRole::Operator);
    let account = KeyPair::generate(KeyRole::Account);
    let signing = KeyPair::generate(KeyRole::Account);

    let mut claims = AccountClaims::new(account.public_key());
    claims.name = name.to_string();
    claims.nats.signing_keys.push(signing.public_key());
    let token = claims
        .encode(&operator)
        .context("Failed to sign account document")?;

    write_secret(&output.join(OPERATOR_SEED_FILE), &operator.seed()?, force)?;
    write_secret(&output.join(ACCOUNT_SEED_FILE), &account.seed()?, force)?;
    write_secret(&output.join(SIGNING_SEED_FILE), &signing.seed()?, force)?;
    write_file(&output.join(ACCOUNT_JWT_FILE), &token, force)?;

    let service = issue_user(&account, "access-service")?;
    write_secret(&output.join(SERVICE_CREDS_FILE), &service.render(), force)?;

    info!("Account {} signed by operator {}", account.public_key(), operator.public_key());
    Ok(TrustChain {
        operator: operator.public_key(),
        account: account.public_key(),
        signing: signing.public_key(),
    })
}

fn mint_user(account_seed: &Path, name: &str) -> Result<CredentialBundle> {
    let account = read_seed(account_seed)?;
    if account.role() != KeyRole::Account {
        anyhow::bail!("Expected an account seed, got a {} seed", account.role());
    }
    issue_user(&account, name)
}

fn issue_user(account: &KeyPair, name: &str) -> Result<CredentialBundle> {
    let user = KeyPair::generate(KeyRole::User);
    let mut claims = UserClaims::new(user.public_key());
    claims.name = name.to_string();
    let token = claims
        .encode(account)
        .context("Failed to sign user claims")?;
    Ok(CredentialBundle::new(token, user.seed()?, "<undisclosed>"))
}

fn inspect(input: &str) -> Result<GenericClaims> {
    let text = if Path::new(input).exists() {
        fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))?
    } else {
        input.to_string()
    };

    let token = match CredentialBundle::parse(&text) {
        Ok(bundle) => bundle.token,
        Err(_) => text.trim().to_string(),
    };
    GenericClaims::decode(&token).context("Invalid token")
}

fn read_seed(path: &Path) -> Result<KeyPair> {
    let seed = fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    KeyPair::from_seed(seed.trim()).with_context(|| format!("Invalid seed in {}", path.display()))
}

fn write_file(path: &Path, contents: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

fn write_secret(path: &Path, contents: &str, force: bool) -> Result<()> {
    write_file(path, contents, force)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_verifiable_trust_chain() {
        let dir = tempfile::tempdir().unwrap();
        let trust = init_trust_chain(dir.path(), "CHAT", false).unwrap();

        let token = fs::read_to_string(dir.path().join(ACCOUNT_JWT_FILE)).unwrap();
        let claims = AccountClaims::decode(&token).unwrap();
        assert_eq!(claims.sub, trust.account);
        assert_eq!(claims.iss, trust.operator);
        assert_eq!(claims.nats.signing_keys, vec![trust.signing.clone()]);

        let signing = read_seed(&dir.path().join(SIGNING_SEED_FILE)).unwrap();
        assert_eq!(signing.public_key(), trust.signing);

        let creds = fs::read_to_string(dir.path().join(SERVICE_CREDS_FILE)).unwrap();
        assert!(CredentialBundle::parse(&creds).is_ok());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init_trust_chain(dir.path(), "CHAT", false).unwrap();
        assert!(init_trust_chain(dir.path(), "CHAT", false).is_err());
        assert!(init_trust_chain(dir.path(), "CHAT", true).is_ok());
    }

    #[test]
    fn test_user_requires_account_seed() {
        let dir = tempfile::tempdir().unwrap();
        init_trust_chain(dir.path(), "CHAT", false).unwrap();

        let bundle = mint_user(&dir.path().join(ACCOUNT_SEED_FILE), "dave").unwrap();
        let claims = UserClaims::decode(&bundle.token).unwrap();
        assert_eq!(claims.name, "dave");

        assert!(mint_user(&dir.path().join(OPERATOR_SEED_FILE), "dave").is_err());
    }

    #[test]
    fn test_inspect_accepts_token_and_creds_file() {
        let dir = tempfile::tempdir().unwrap();
        init_trust_chain(dir.path(), "CHAT", false).unwrap();

        let jwt = dir.path().join(ACCOUNT_JWT_FILE);
        assert_eq!(inspect(jwt.to_str().unwrap()).unwrap().name, "CHAT");

        let creds = dir.path().join(SERVICE_CREDS_FILE);
        assert_eq!(
            inspect(creds.to_str().unwrap()).unwrap().name,
            "access-service"
        );
        assert!(inspect("not-a-token").is_err());
    }
}
