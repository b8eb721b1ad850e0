//! TOML configuration loading for rollnode programs.

use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that overrides the per-user config directory.
pub const CONFIG_DIR_ENV: &str = "ROLLNODE_CONFIG_DIR";

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("user directories for {0:?} cannot be determined")]
    NoUserDirs(String),
    #[error("cannot read config file {0:?}: {1}")]
    CannotRead(PathBuf, std::io::Error),
    #[error("cannot create config file with defaults: {0}")]
    CannotCreateDefault(std::io::Error),
    #[error("cannot parse TOML config {0:?}: {1}")]
    CannotParseToml(PathBuf, toml::de::Error),
}

/// Configuration loader for one program.
///
/// ```no_run
/// # #[derive(serde::Deserialize)] struct Config {}
/// // uses $ROLLNODE_CONFIG_DIR, or ~/.config/rollnode
/// let loader = rollnode_common::config::Loader::new("rollnode")?;
///
/// // loads <dir>/rollnode.toml, writing the given defaults there first if it is missing
/// let config: Config = loader.load_or_create("")?;
/// # Ok::<(), rollnode_common::config::LoadError>(())
/// ```
pub struct Loader {
    program_name: String,
    config_dir: PathBuf,
}

impl Loader {
    /// Creates a loader for the given program, honouring `ROLLNODE_CONFIG_DIR` and falling back
    /// to the XDG user directory layout.
    pub fn new(program_name: &str) -> Result<Self, LoadError> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Ok(Self::new_with_dir(program_name, Path::new(&dir)));
        }
        let dirs = directories::ProjectDirs::from("com", "rollnode", program_name)
            .ok_or(LoadError::NoUserDirs(program_name.into()))?;
        Ok(Self::new_with_dir(program_name, dirs.config_dir()))
    }

    pub fn new_with_dir(program_name: &str, config_dir: &Path) -> Self {
        Self { program_name: program_name.to_string(), config_dir: config_dir.into() }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.config_dir.join(PathBuf::from(name).with_extension("toml"))
    }

    /// Loads `<dir>/<program-name>.toml`.
    pub fn load<T: DeserializeOwned>(&self) -> Result<T, LoadError> {
        self.load_named(&self.program_name)
    }

    /// Loads `<dir>/<name>.toml`.
    pub fn load_named<T: DeserializeOwned>(&self, name: &str) -> Result<T, LoadError> {
        let path = self.path_of(name);
        let content =
            std::fs::read_to_string(&path).map_err(|e| LoadError::CannotRead(path.clone(), e))?;
        toml::from_str::<T>(&content).map_err(|e| LoadError::CannotParseToml(path, e))
    }

    /// Loads `<dir>/<name>.toml`; if it is missing, writes `default` there and parses that.
    pub fn load_or_create_named<T: DeserializeOwned>(
        &self, name: &str, default: &str,
    ) -> Result<T, LoadError> {
        let path = self.path_of(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = ?path, "creating config with default contents");
                std::fs::create_dir_all(&self.config_dir).map_err(LoadError::CannotCreateDefault)?;
                std::fs::write(&path, default).map_err(LoadError::CannotCreateDefault)?;
                default.into()
            },
            Err(err) => return Err(LoadError::CannotRead(path, err)),
        };
        toml::from_str::<T>(&content).map_err(|e| LoadError::CannotParseToml(path, e))
    }

    /// Loads the program's main config file, creating it from `default` if missing.
    pub fn load_or_create<T: DeserializeOwned>(&self, default: &str) -> Result<T, LoadError> {
        self.load_or_create_named(&self.program_name, default)
    }
}
