//! Configuration loading for Weft.
//!
//! Two layers feed the process environment, applied with priority
//! **existing env > `.env` > XDG `config.toml`**: a project-local `.env` and
//! the `[env]` table of `$XDG_CONFIG_HOME/weft/config.toml`. [`Settings`]
//! then reads the recognized variables into a typed struct.
//!
//! Recognized variables:
//!
//! | Variable | Effect |
//! |---|---|
//! | `DATABASE_PATH` | sqlite file for the local adapter (default `weft.db3`) |
//! | `HOST`, `PORT` | serve bind (defaults `127.0.0.1`, `8787`) |
//! | `OPENAI_API_KEY` | enables the OpenAI provider |
//! | `ANTHROPIC_API_KEY` | enables the Anthropic provider |
//! | `WEFT_REMOTE_TOOLS_BASE_URL` + `WEFT_REMOTE_TOOLS_API_TOKEN` | enables remote tool dispatch |
//! | `WEFT_SANDBOX_BASE` | base directory for project sandboxes (default `sandboxes`) |
//! | `WEFT_PLAYBOOKS_DIR` | system playbook directory (default `playbooks` when present) |

mod dotenv;
mod xdg_toml;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// The default application name for the XDG config path.
pub const APP_NAME: &str = "weft";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and an optional project `.env`, then
/// sets environment variables only for keys **not** already set, so existing
/// env always wins.
///
/// * `app_name`: XDG path segment, normally [`APP_NAME`].
/// * `override_dir`: look for `.env` here instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        let value = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

/// Typed view over the recognized environment variables.
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub remote_tools_base_url: Option<String>,
    pub remote_tools_api_token: Option<String>,
    pub sandbox_base: PathBuf,
    pub playbooks_dir: Option<PathBuf>,
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Reads the current process environment. Call [`load_and_apply`] first if
    /// `.env`/XDG values should participate.
    pub fn from_env() -> Self {
        let playbooks_dir = non_empty("WEFT_PLAYBOOKS_DIR")
            .map(PathBuf::from)
            .or_else(|| {
                let default = PathBuf::from("playbooks");
                default.is_dir().then_some(default)
            });
        Self {
            database_path: non_empty("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("weft.db3")),
            host: non_empty("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8787),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            remote_tools_base_url: non_empty("WEFT_REMOTE_TOOLS_BASE_URL"),
            remote_tools_api_token: non_empty("WEFT_REMOTE_TOOLS_API_TOKEN"),
            sandbox_base: non_empty("WEFT_SANDBOX_BASE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sandboxes")),
            playbooks_dir,
        }
    }

    /// Both halves of the remote-tools pair, when configured.
    pub fn remote_tools(&self) -> Option<(String, String)> {
        match (&self.remote_tools_base_url, &self.remote_tools_api_token) {
            (Some(url), Some(token)) => Some((url.clone(), token.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn restore_var(key: &str, prev: Option<String>) {
        match prev {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    #[test]
    fn existing_env_wins() {
        env::set_var("CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply(APP_NAME, None);
        assert_eq!(env::var("CONFIG_TEST_EXISTING").as_deref(), Ok("from_env"));
        env::remove_var("CONFIG_TEST_EXISTING");
    }

    #[test]
    fn load_and_apply_no_config_ok() {
        let r = load_and_apply("config-crate-nonexistent-app-xyz", None::<&Path>);
        assert!(r.is_ok());
    }

    #[test]
    fn dotenv_overrides_xdg() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join(APP_NAME);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nCONFIG_TEST_PRIORITY = \"from_xdg\"\n",
        )
        .unwrap();

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "CONFIG_TEST_PRIORITY=from_dotenv\n",
        )
        .unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("CONFIG_TEST_PRIORITY");

        let _ = load_and_apply(APP_NAME, Some(dotenv_dir.path()));
        let val = env::var("CONFIG_TEST_PRIORITY").unwrap();
        env::remove_var("CONFIG_TEST_PRIORITY");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(val, "from_dotenv");
    }

    #[test]
    fn settings_defaults_apply() {
        let prev_db = env::var("DATABASE_PATH").ok();
        let prev_port = env::var("PORT").ok();
        env::remove_var("DATABASE_PATH");
        env::remove_var("PORT");

        let settings = Settings::from_env();
        assert_eq!(settings.database_path, PathBuf::from("weft.db3"));
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 8787);

        restore_var("DATABASE_PATH", prev_db);
        restore_var("PORT", prev_port);
    }

    #[test]
    fn remote_tools_requires_both_halves() {
        let prev_url = env::var("WEFT_REMOTE_TOOLS_BASE_URL").ok();
        let prev_token = env::var("WEFT_REMOTE_TOOLS_API_TOKEN").ok();
        env::set_var("WEFT_REMOTE_TOOLS_BASE_URL", "https://tools.example.com");
        env::remove_var("WEFT_REMOTE_TOOLS_API_TOKEN");

        let settings = Settings::from_env();
        assert!(settings.remote_tools().is_none());

        env::set_var("WEFT_REMOTE_TOOLS_API_TOKEN", "tok");
        let settings = Settings::from_env();
        assert_eq!(
            settings.remote_tools(),
            Some(("https://tools.example.com".to_string(), "tok".to_string()))
        );

        restore_var("WEFT_REMOTE_TOOLS_BASE_URL", prev_url);
        restore_var("WEFT_REMOTE_TOOLS_API_TOKEN", prev_token);
    }
}
