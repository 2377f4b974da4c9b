//! SSH key-file utilities: home expansion, on-demand keypair generation and
//! public key reading.

use std::ffi::OsString;
use std::path::PathBuf;

use directories::BaseDirs;
use skiff_cmd::Command;
use tokio::fs;
use tracing::{debug, info};

use crate::ClusterError;

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf, ClusterError> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let dirs = BaseDirs::new().ok_or(ClusterError::HomeDir)?;
            Ok(dirs.home_dir().join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Generate an RSA keypair at the configured path unless one already exists.
/// Returns the expanded private key path.
pub async fn ensure_key_pair(cluster_name: &str, private_key: &str) -> Result<PathBuf, ClusterError> {
    let path = expand_home(private_key)?;
    if fs::try_exists(&path).await? {
        debug!("SSH key {} already exists", path.display());
        return Ok(path);
    }

    info!("Creating SSH key: {} ...", path.display());
    Command::new("ssh-keygen")
        .args(["-q", "-t", "rsa", "-b", "4096"])
        .args(["-C", &format!("{cluster_name}@skiff.mail")])
        .arg("-f")
        .arg(&path)
        .args(["-N", ""])
        .run()
        .await?;
    Ok(path)
}

/// Read the public half of the cluster key (`<privateKey>.pub`).
pub async fn public_key(private_key: &str) -> Result<Vec<u8>, ClusterError> {
    let mut path: OsString = expand_home(private_key)?.into_os_string();
    path.push(".pub");
    let path = PathBuf::from(path);
    fs::read(&path)
        .await
        .map_err(|source| ClusterError::PublicKey {
            path: path.clone(),
            source,
        })
}
