// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file and return the raw, unvalidated contents.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load and validate a configuration file. This is the entry point used by
/// the binary.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// Configuration with every default applied, used when no file exists.
pub fn default_config() -> Result<ConfigFile> {
    ConfigFile::try_from(RawConfigFile::default())
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Latticeflow.toml")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::errors::DispatchError;

    #[test]
    fn loads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nexport_wait_secs = 5").unwrap();
        let cfg = load_and_validate(file.path()).unwrap();
        assert_eq!(cfg.server.export_wait_secs, 5);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            load_and_validate("/definitely/not/here.toml"),
            Err(DispatchError::IoError(_))
        ));
    }
}
