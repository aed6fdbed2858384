//! Bundle tooling: key generation and signing

use std::path::{Path, PathBuf};

use canonic_registry::{generate_signing_key, sign_descriptor, BundleManifest};
use canonic_types::{TriggerPoint, ValidatorId};
use clap::{Args, Subcommand};
use ed25519_dalek::SigningKey;
use zeroize::Zeroizing;

use super::Context;
use crate::error::{CliError, CliResult};
use crate::output::{print_info, print_single, print_success, OutputFormat};

#[derive(Subcommand, Debug)]
pub enum BundleCommands {
    /// Sign a validator payload into a bundle manifest
    Sign(SignArgs),
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// File holding the hex signing key (see `keygen`)
    #[arg(long)]
    pub key: PathBuf,

    /// Validator id, e.g. recipient.allowlist
    #[arg(long)]
    pub id: String,

    /// Semantic version of this bundle
    #[arg(long)]
    pub version: semver::Version,

    /// pre-action, on-credential-access or on-resource-load
    #[arg(long, default_value = "pre-action")]
    pub trigger: TriggerPoint,

    /// Lower runs first
    #[arg(long, default_value_t = 100)]
    pub priority: u32,

    /// JSON payload configuring the validator
    #[arg(long)]
    pub payload: PathBuf,

    /// Manifest path (defaults to <validators dir>/<id>.json)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Sign even if no built-in validator accepts the payload
    #[arg(long)]
    pub no_check: bool,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Where to write the hex signing key
    #[arg(long)]
    pub out: PathBuf,

    /// Overwrite an existing key file
    #[arg(long)]
    pub force: bool,
}

pub fn execute(command: BundleCommands, ctx: &Context) -> CliResult<()> {
    match command {
        BundleCommands::Sign(args) => sign(args, ctx),
    }
}

fn sign(args: SignArgs, ctx: &Context) -> CliResult<()> {
    let key = read_signing_key(&args.key)?;
    let payload = std::fs::read_to_string(&args.payload)?;

    if !args.no_check {
        canonic_validators::build_validator(&args.id, payload.as_bytes())
            .map_err(|e| CliError::InvalidInput(e.to_string()))?;
    }

    let descriptor = sign_descriptor(
        &key,
        ValidatorId::new(args.id.as_str()),
        args.version,
        args.trigger,
        args.priority,
        payload.as_bytes(),
    );
    let manifest = BundleManifest {
        descriptor,
        payload,
    };

    let out = match args.out {
        Some(out) => out,
        None => {
            std::fs::create_dir_all(&ctx.paths.validators)?;
            ctx.paths.validators.join(format!("{}.json", args.id))
        }
    };
    manifest.to_file(&out)?;

    if ctx.format == OutputFormat::Table {
        print_success(&format!(
            "Signed {}@{} -> {}",
            manifest.descriptor.id,
            manifest.descriptor.version,
            out.display()
        ));
        print_info(&format!("Signer: {}", manifest.descriptor.signer));
        Ok(())
    } else {
        print_single(&manifest.descriptor, ctx.format)
    }
}

/// Generate a signing key and print its verifying key.
pub fn keygen(args: KeygenArgs) -> CliResult<()> {
    if args.out.exists() && !args.force {
        return Err(CliError::InvalidInput(format!(
            "{} already exists (use --force to overwrite)",
            args.out.display()
        )));
    }

    let key = generate_signing_key();
    let secret = Zeroizing::new(hex::encode(key.to_bytes()));
    write_secret(&args.out, secret.as_bytes())?;

    let verifying = hex::encode(key.verifying_key().as_bytes());
    print_success(&format!("Signing key written to {}", args.out.display()));
    print_info("Add the verifying key to trusted_keys in the config:");
    println!("{}", verifying);
    Ok(())
}

fn read_signing_key(path: &Path) -> CliResult<SigningKey> {
    let raw = Zeroizing::new(std::fs::read_to_string(path)?);
    let bytes = Zeroizing::new(
        hex::decode(raw.trim())
            .map_err(|e| CliError::InvalidInput(format!("signing key is not hex: {e}")))?,
    );
    let secret: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CliError::InvalidInput("signing key must be 32 bytes".into()))?;
    Ok(SigningKey::from_bytes(&secret))
}

#[cfg(unix)]
fn write_secret(path: &Path, contents: &[u8]) -> CliResult<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_secret(path: &Path, contents: &[u8]) -> CliResult<()> {
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_round_trips_through_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");
        keygen(KeygenArgs {
            out: path.clone(),
            force: false,
        })
        .unwrap();

        let key = read_signing_key(&path).unwrap();
        let stored = std::fs::read_to_string(&path).unwrap();
        assert_eq!(hex::encode(key.to_bytes()), stored);
    }

    #[test]
    fn keygen_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");
        std::fs::write(&path, "existing").unwrap();
        let err = keygen(KeygenArgs {
            out: path.clone(),
            force: false,
        })
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidInput(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing");
    }

    #[test]
    fn short_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        std::fs::write(&path, "abcd").unwrap();
        assert!(matches!(
            read_signing_key(&path),
            Err(CliError::InvalidInput(_))
        ));
    }
}
