use serde::Deserialize;

/// Minimum length of the cookie signing key.
pub const SESSION_KEY_LEN: usize = 32;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: String,
    /// Directory of the user database. Without it a temporary database is
    /// used and accounts are lost on shutdown.
    pub db_path: Option<String>,
    pub tmdb_base_url: String,
    pub tmdb_api_key: String,
    pub session_key: String,
    pub secure_cookie: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("session_key must be at least {} bytes", SESSION_KEY_LEN)]
    ShortSessionKey,
}

impl Settings {
    /// Reads `moviedex.toml` (optional) and `MOVIEDEX_*` environment
    /// variables on top of the built-in defaults.
    pub fn load() -> Result<Settings, SettingsError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("moviedex").required(false))
            .add_source(config::Environment::with_prefix("MOVIEDEX"));
        Settings::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Settings, SettingsError> {
        let settings: Settings = builder
            .set_default("bind", "127.0.0.1:8080")?
            .set_default("tmdb_base_url", "https://api.themoviedb.org/3")?
            .set_default("tmdb_api_key", "")?
            .set_default("session_key", "moviedex-development-session-key")?
            .set_default("secure_cookie", false)?
            .build()?
            .try_deserialize()?;
        if settings.session_key.len() < SESSION_KEY_LEN {
            return Err(SettingsError::ShortSessionKey);
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::from_builder(config::Config::builder()).unwrap();
        assert_eq!(settings.bind, "127.0.0.1:8080");
        assert_eq!(settings.db_path, None);
        assert_eq!(settings.tmdb_base_url, "https://api.themoviedb.org/3");
        assert!(!settings.secure_cookie);
    }

    #[test]
    fn overrides() {
        let builder = config::Config::builder()
            .set_override("bind", "0.0.0.0:3000")
            .unwrap()
            .set_override("db_path", "/var/lib/moviedex")
            .unwrap();
        let settings = Settings::from_builder(builder).unwrap();
        assert_eq!(settings.bind, "0.0.0.0:3000");
        assert_eq!(settings.db_path.as_deref(), Some("/var/lib/moviedex"));
    }

    #[test]
    fn short_session_key() {
        let builder = config::Config::builder()
            .set_override("session_key", "too short")
            .unwrap();
        assert!(matches!(
            Settings::from_builder(builder),
            Err(SettingsError::ShortSessionKey)
        ));
    }
}
