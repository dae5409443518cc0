//! Credential storage for pollcheck
//!
//! Credentials live in one system keychain entry as JSON. When the keychain is
//! unavailable or disabled, a 0600 JSON file in the config directory is used.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

const KEYRING_SERVICE: &str = "pollcheck-credentials";
const KEYRING_USERNAME: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    openrouter_api_key: Option<String>,
}

type KeyringResult<T> = Result<T, String>;

static CREDENTIALS_CACHE: OnceLock<Mutex<Option<StoredCredentials>>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn credentials_cache() -> &'static Mutex<Option<StoredCredentials>> {
    CREDENTIALS_CACHE.get_or_init(|| Mutex::new(None))
}

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }

    let disabled_by_env = matches!(
        std::env::var("POLLCHECK_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    );
    if disabled_by_env {
        return true;
    }

    // A populated credentials file means the user already opted out of the keychain.
    matches!(
        read_fallback_credentials(),
        Ok(StoredCredentials {
            openrouter_api_key: Some(_)
        })
    )
}

/// Human-friendly credential backend label used in CLI messages.
pub fn credentials_store_label() -> &'static str {
    if keyring_disabled() {
        "local credentials file"
    } else {
        "system keychain"
    }
}

fn fallback_credentials_path() -> KeyringResult<PathBuf> {
    if let Ok(path) = std::env::var("POLLCHECK_CREDENTIALS_FILE") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    if cfg!(test) {
        return Ok(std::env::temp_dir().join("pollcheck-test-credentials.json"));
    }

    dirs::config_dir()
        .map(|p| p.join("pollcheck").join("credentials.json"))
        .ok_or_else(|| "Could not determine credentials file path".to_string())
}

fn read_fallback_credentials() -> KeyringResult<StoredCredentials> {
    read_credentials_file(&fallback_credentials_path()?)
}

fn read_credentials_file(path: &Path) -> KeyringResult<StoredCredentials> {
    if !path.exists() {
        return Ok(StoredCredentials::default());
    }
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read credentials file '{}': {}", path.display(), e))?;
    serde_json::from_str(&json)
        .map_err(|e| format!("Failed to parse credentials file '{}': {}", path.display(), e))
}

fn write_fallback_credentials(creds: &StoredCredentials) -> KeyringResult<()> {
    write_credentials_file(&fallback_credentials_path()?, creds)
}

fn write_credentials_file(path: &Path, creds: &StoredCredentials) -> KeyringResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            format!(
                "Failed to create credentials directory '{}': {}",
                parent.display(),
                e
            )
        })?;
    }

    let content = serde_json::to_string(creds)
        .map_err(|e| format!("Failed to serialize credentials: {}", e))?;
    fs::write(path, content)
        .map_err(|e| format!("Failed to write credentials file '{}': {}", path.display(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

/// Warn about keychain errors only once per process
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    tracing::warn!(
        event = "keyring.unavailable",
        context,
        error = %err,
        "couldn't access system keychain; set POLLCHECK_DISABLE_KEYRING=1 or OPENROUTER_API_KEY to bypass it"
    );
}

fn read_credentials_uncached() -> KeyringResult<StoredCredentials> {
    if keyring_disabled() {
        return read_fallback_credentials();
    }
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USERNAME).map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn write_credentials(creds: &StoredCredentials) -> KeyringResult<()> {
    if keyring_disabled() {
        return write_fallback_credentials(creds);
    }
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USERNAME).map_err(|e| e.to_string())?;
    let json = serde_json::to_string(creds)
        .map_err(|e| format!("Failed to serialize credentials: {}", e))?;
    entry.set_password(&json).map_err(|e| e.to_string())
}

fn read_credentials_cached() -> KeyringResult<StoredCredentials> {
    let mut guard = credentials_cache()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(creds) = guard.as_ref() {
        return Ok(creds.clone());
    }
    let creds = read_credentials_uncached()?;
    *guard = Some(creds.clone());
    Ok(creds)
}

fn update_cache(creds: StoredCredentials) {
    let mut guard = credentials_cache()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(creds);
}

/// Get the OpenRouter API key from the credential store
pub fn get_api_key() -> KeyringResult<Option<String>> {
    Ok(read_credentials_cached()?.openrouter_api_key)
}

/// Set the OpenRouter API key in the credential store
pub fn set_api_key(key: &str) -> KeyringResult<()> {
    let mut creds = read_credentials_cached().unwrap_or_default();
    creds.openrouter_api_key = Some(key.to_string());
    write_credentials(&creds)?;
    update_cache(creds);
    Ok(())
}
