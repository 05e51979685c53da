//! Key files for the content and routing identities.
//!
//! A key file holds the family byte followed by the 32-byte private key.
//! Missing files are generated on first run and written with mode 0600.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use waypost_core::{KeyFamily, Keypair};

pub fn load_or_generate(path: &Path, family: KeyFamily, role: &str) -> Result<Keypair> {
    if path.exists() {
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let keypair = Keypair::from_bytes(&bytes)
            .with_context(|| format!("invalid {role} key file {}", path.display()))?;
        tracing::info!(role, key = %keypair.public().short_id(), path = %path.display(), "key loaded");
        return Ok(keypair);
    }

    let keypair = Keypair::generate(family);
    write_private(path, &keypair.to_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(role, key = %keypair.public().short_id(), path = %path.display(), "key generated");
    Ok(keypair)
}

fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
