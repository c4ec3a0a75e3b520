//! Process entry point: parses the authenticator-adjacent arguments (spec
//! §6), loads the group/user store and impersonation pool, and runs the
//! control-connection accept loop.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use fz_serverd::auth::Authenticator;
use fz_serverd::config::{ConfigDir, VersionMismatchPolicy};
use fz_serverd::impersonator::Pool;
use fz_serverd::tvfs::NativeFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConfigVersionCheck {
    Error,
    Ignore,
    Backup,
}

#[derive(Debug, Parser)]
#[command(name = "fz-serverd", about = "FTP/FTPS server core daemon")]
struct Args {
    /// Directory holding groups.toml/users.toml and the certificates/ tree.
    #[arg(long, value_name = "path")]
    config_dir: PathBuf,

    /// Path to the impersonation helper executable; omit to disable impersonation.
    #[arg(long, value_name = "path")]
    impersonator_exe: Option<PathBuf>,

    /// Writes the admin RPC's TLS certificate fingerprint to this file for out-of-band pinning.
    #[arg(long, value_name = "path")]
    write_admin_tls_fingerprints_to_file: Option<PathBuf>,

    /// What to do when the on-disk store's version doesn't match what this binary expects.
    #[arg(long, value_enum, default_value_t = ConfigVersionCheck::Error)]
    config_version_check: ConfigVersionCheck,

    /// Address the control-connection listener binds to.
    #[arg(long, default_value = "0.0.0.0:21")]
    listen: String,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = match ConfigDir::new(args.config_dir) {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "invalid --config-dir");
            std::process::exit(2);
        }
    };

    let policy = match args.config_version_check {
        ConfigVersionCheck::Error => VersionMismatchPolicy::Error,
        ConfigVersionCheck::Ignore => VersionMismatchPolicy::Ignore,
        ConfigVersionCheck::Backup => VersionMismatchPolicy::Backup,
    };

    let store = match config_dir.load_store(policy) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to load the group/user store");
            std::process::exit(1);
        }
    };

    let impersonator_pool = args.impersonator_exe.map(|exe| Arc::new(Pool::new(exe, 8)));

    if let Some(fingerprint_path) = &args.write_admin_tls_fingerprints_to_file {
        // The admin RPC channel itself is out of scope (spec §1); only the
        // fingerprint file contract is exercised here.
        if let Err(e) = std::fs::write(fingerprint_path, "") {
            warn!(error = %e, path = ?fingerprint_path, "could not write admin TLS fingerprint file");
        }
    }

    let host = NativeFormat::host();
    let authenticator = Authenticator::new(store, impersonator_pool, host);

    let listener = TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "listening");

    fz_serverd::handle_forever(listener, authenticator, host).await
}
