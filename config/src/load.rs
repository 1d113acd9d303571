//! Layered configuration loading.
//!
//! Sources are merged in order, later ones overriding earlier ones:
//!
//! 1. `configuration/base.{yaml,yml,json}`
//! 2. `configuration/{environment}.{yaml,yml,json}`
//! 3. `APP_`-prefixed environment variables, with `__` separating nested keys
//!    (`APP_SOURCE__HOST`) and `,` separating list elements for keys listed in
//!    [`Config::LIST_PARSE_KEYS`].

use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

const CONFIGURATION_DIR: &str = "configuration";
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];
const BASE_FILE_STEM: &str = "base";

const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";
const LIST_SEPARATOR: &str = ",";

/// Implemented by top-level configuration structures loadable with [`load_config`].
pub trait Config {
    /// Dotted keys whose environment variable values are split into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("no `{stem}` configuration file in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        stem: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to load configuration file `{path}`: {source}")]
    ConfigurationFileLoad {
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to merge configuration sources: {0}")]
    Builder(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads `T` from the `configuration` directory under the current working directory.
///
/// The environment overlay is selected with `APP_ENVIRONMENT`.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from_dir(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads `T` from an explicit configuration directory and environment.
pub fn load_config_from_dir<T>(
    directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = find_configuration_file(directory, BASE_FILE_STEM)?;
    let environment_file = find_configuration_file(directory, environment.as_str())?;

    let builder = rust_cli_config::Config::builder()
        .add_source(rust_cli_config::File::from(base_file.clone()));
    check_source(&builder, &base_file)?;

    let builder = builder.add_source(rust_cli_config::File::from(environment_file.clone()));
    check_source(&builder, &environment_file)?;

    let settings = builder
        .add_source(environment_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Builder)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn environment_overrides<T: Config>() -> rust_cli_config::Environment {
    let mut source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        source = source.try_parsing(true).list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            source = source.with_list_parse_key(key);
        }
    }

    source
}

fn find_configuration_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .collect();

    if let Some(found) = candidates.iter().find(|path| path.is_file()) {
        return Ok(found.clone());
    }

    let attempted = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        stem: stem.to_string(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

/// Builds the sources merged so far so a broken file is reported by path.
fn check_source(builder: &ConfigBuilder<DefaultState>, path: &Path) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            path: path.to_path_buf(),
            source,
        })
}
