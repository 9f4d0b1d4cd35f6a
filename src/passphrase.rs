//! Passphrase source resolution.
//!
//! The CLI collects possible sources; this module picks the first
//! non-empty one in the documented priority order: an explicit value
//! read from stdin, a passphrase file, the `SIETCH_PASSPHRASE`
//! environment variable, and finally an interactive prompt callback.

use std::path::PathBuf;

use sietch_api_types::{Error, Result};

/// Environment variable consulted after explicit sources.
pub const PASSPHRASE_ENV: &str = "SIETCH_PASSPHRASE";

/// Candidate passphrase sources, in caller supplied form.
#[derive(Default)]
pub struct PassphraseSources<'a> {
    /// Value already read from stdin (`--passphrase-stdin`).
    pub stdin_value: Option<String>,
    /// Path of a passphrase file (`--passphrase-file`).
    pub file: Option<PathBuf>,
    /// Interactive prompt, tried last.
    pub prompt: Option<&'a dyn Fn() -> Result<String>>,
}

fn clean(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolve the passphrase. Returns `Ok(None)` when no source yields a
/// non-empty value.
pub fn resolve_passphrase(sources: &PassphraseSources) -> Result<Option<String>> {
    if let Some(value) = sources.stdin_value.as_deref().and_then(clean) {
        return Ok(Some(value));
    }

    if let Some(ref path) = sources.file {
        let mode = sietch_tools::fs::path_mode(path)?;
        if mode & 0o077 != 0 {
            log::warn!(
                "passphrase file {path:?} has mode {mode:o}, expected 0600 or stricter"
            );
        }
        let raw = sietch_tools::fs::file_get_string(path)?;
        if let Some(value) = clean(&raw) {
            return Ok(Some(value));
        }
    }

    if let Ok(raw) = std::env::var(PASSPHRASE_ENV) {
        if let Some(value) = clean(&raw) {
            return Ok(Some(value));
        }
    }

    if let Some(prompt) = sources.prompt {
        let raw = prompt()?;
        if let Some(value) = clean(&raw) {
            return Ok(Some(value));
        }
    }

    Ok(None)
}

/// Like [`resolve_passphrase`] but failing when nothing was provided.
pub fn require_passphrase(sources: &PassphraseSources) -> Result<String> {
    resolve_passphrase(sources)?.ok_or_else(|| {
        Error::InvalidInput("a passphrase is required but no source provided one".into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdin_value_wins_over_file() {
        let dir = std::env::temp_dir().join(format!("sietch-pw-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("pw");
        std::fs::write(&file, "from-file\n").unwrap();

        let sources = PassphraseSources {
            stdin_value: Some("from-stdin\n".into()),
            file: Some(file),
            prompt: None,
        };
        assert_eq!(resolve_passphrase(&sources).unwrap().unwrap(), "from-stdin");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_sources_fall_through_to_prompt() {
        let prompt = || Ok("from-prompt".to_string());
        let sources = PassphraseSources {
            stdin_value: Some("\n".into()),
            file: None,
            prompt: Some(&prompt),
        };
        assert_eq!(
            resolve_passphrase(&sources).unwrap().unwrap(),
            "from-prompt"
        );
    }

    #[test]
    fn test_no_source_yields_none() {
        let sources = PassphraseSources::default();
        // the environment variable may not leak into this test
        std::env::remove_var(PASSPHRASE_ENV);
        assert!(resolve_passphrase(&sources).unwrap().is_none());
        assert!(require_passphrase(&sources).is_err());
    }
}
