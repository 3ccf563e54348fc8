use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use galbi::github::DEFAULT_API_URL;
use galbi::{Error, WriteMode};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";
const CREDENTIALS_FILE: &str = "credentials.toml";

/// Top-level config.toml
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub store: Option<StoreConfig>,
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `owner/name`
    pub repo: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub mode: WriteMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypt_command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decrypt_command: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct Credentials {
    token: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Config {
    pub fn store(&self) -> Result<&StoreConfig, Error> {
        self.store.as_ref().ok_or_else(|| {
            Error::Configuration("no [store] configured, run `galbi init --repo owner/name`".into())
        })
    }

    pub fn proxy(&self) -> Result<&ProxyConfig, Error> {
        self.proxy.as_ref().ok_or_else(|| {
            Error::Configuration("no [proxy] configured, run `galbi init --proxy <url>`".into())
        })
    }
}

impl ProxyConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            authorize_url: None,
            encrypt_command: Vec::new(),
            decrypt_command: Vec::new(),
        }
    }

    pub fn authorize_url(&self) -> String {
        self.authorize_url
            .clone()
            .unwrap_or_else(|| format!("{}/authorize", self.url.trim_end_matches('/')))
    }
}

/// Location of the local state directory.
#[derive(Debug, Clone)]
pub struct Paths {
    dir: PathBuf,
}

impl Paths {
    /// `$GALBI_CONFIG_DIR`, else `<config dir>/galbi`.
    pub fn locate() -> Result<Self, Error> {
        if let Some(dir) = std::env::var_os("GALBI_CONFIG_DIR") {
            return Ok(Self::at(dir));
        }
        dirs::config_dir()
            .map(|dir| Self::at(dir.join("galbi")))
            .ok_or_else(|| Error::Configuration("cannot determine a config directory".into()))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    /// The saved config, empty if none was written yet.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let path = self.config_file();
        match read_optional(&path)? {
            Some(content) => toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display())),
            None => Ok(Config::default()),
        }
    }

    pub fn save_config(&self, config: &Config) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(config).context("failed to serialize config")?;
        self.write(&self.config_file(), &content)
    }

    pub fn stored_token(&self) -> anyhow::Result<Option<String>> {
        let path = self.credentials_file();
        let Some(content) = read_optional(&path)? else {
            return Ok(None);
        };
        let credentials: Credentials = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(credentials.token))
    }

    /// Overwrites the saved credential. Only the owner can read the file.
    pub fn save_token(&self, token: &str) -> anyhow::Result<()> {
        let content = toml::to_string(&Credentials {
            token: token.to_string(),
        })
        .context("failed to serialize credentials")?;
        let path = self.credentials_file();
        self.write(&path, &content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict {}", path.display()))?;
        }
        Ok(())
    }

    /// Token from the command line or `GALBI_TOKEN`, else the saved one.
    pub fn resolve_token(&self, explicit: Option<&str>) -> anyhow::Result<String> {
        if let Some(token) = explicit {
            return Ok(token.to_string());
        }
        self.stored_token()?.ok_or_else(|| {
            Error::Configuration(
                "no credential found, run `galbi authorize` or pass --token".into(),
            )
            .into()
        })
    }

    fn write(&self, path: &Path, content: &str) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }
}

fn read_optional(path: &Path) -> anyhow::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str(
            r#"
[store]
repo = "octo/config"

[proxy]
url = "https://secrets.example.com/"
"#,
        )
        .unwrap();

        let store = config.store().unwrap();
        assert_eq!(store.api_url, DEFAULT_API_URL);
        assert_eq!(store.mode, WriteMode::Append);
        assert_eq!(
            config.proxy().unwrap().authorize_url(),
            "https://secrets.example.com/authorize"
        );
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());

        let config = paths.load_config().unwrap();
        assert!(matches!(config.store(), Err(Error::Configuration(_))));
        assert!(matches!(config.proxy(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path().join("nested"));
        let config = Config {
            store: Some(StoreConfig {
                repo: "octo/config".into(),
                api_url: "https://git.example.com/api/v3".into(),
                mode: WriteMode::Mirror,
            }),
            proxy: Some(ProxyConfig {
                encrypt_command: vec!["age".into(), "-r".into(), "age1xyz".into()],
                ..ProxyConfig::new("https://secrets.example.com".into())
            }),
        };

        paths.save_config(&config).unwrap();
        assert_eq!(paths.load_config().unwrap(), config);
    }

    #[test]
    fn test_token_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());

        let err = paths.resolve_token(None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Configuration(_))
        ));

        paths.save_token("from-file").unwrap();
        assert_eq!(paths.resolve_token(None).unwrap(), "from-file");
        assert_eq!(paths.resolve_token(Some("from-arg")).unwrap(), "from-arg");

        paths.save_token("replaced").unwrap();
        assert_eq!(paths.stored_token().unwrap().as_deref(), Some("replaced"));
    }

    #[cfg(unix)]
    #[test]
    fn test_credentials_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        paths.save_token("secret").unwrap();

        let mode = fs::metadata(paths.credentials_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
