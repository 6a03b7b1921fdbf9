//! Session envelope management.

use anyhow::{Context, Result};

use snag_protocol::EnvelopeFile;

use crate::cli::SessionAction;
use crate::config::{SnagConfig, session_envelope_path};

pub async fn run(action: SessionAction, config: &SnagConfig) -> Result<()> {
    match action {
        SessionAction::Status => status(config),
        SessionAction::Clear => clear(config),
    }
}

/// Shows envelope metadata without unwrapping any keys.
fn status(config: &SnagConfig) -> Result<()> {
    let path = session_envelope_path(config)?;
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("No session envelope at {}", path.display());
            return Ok(());
        }
        Err(err) => {
            return Err(anyhow::Error::from(err)
                .context(format!("cannot read {}", path.display())));
        }
    };

    let envelope: EnvelopeFile =
        serde_json::from_str(&raw).context("envelope file is not valid JSON")?;

    println!("Session envelope: {}", path.display());
    println!("  Version:    {}", envelope.version);
    println!("  Written at: {}", envelope.timestamp);
    println!(
        "  Payload:    {} bytes (encrypted)",
        envelope.encrypted_data.len()
    );
    Ok(())
}

fn clear(config: &SnagConfig) -> Result<()> {
    let path = session_envelope_path(config)?;
    match std::fs::remove_file(&path) {
        Ok(()) => {
            println!("Removed session envelope at {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("No session envelope to remove");
            Ok(())
        }
        Err(err) => Err(anyhow::Error::from(err)
            .context(format!("cannot remove {}", path.display()))),
    }
}
