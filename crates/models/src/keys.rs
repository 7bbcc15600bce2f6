use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::StudioEnvironment;

/// Bearer tokens for the studio hosts, read once at start.
///
/// A missing token disables the corresponding studio environment; having
/// no tokens at all is a fatal configuration error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudioKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum KeysError {
    #[error(
        "missing studio access token file '{}': copy the provided \
         'keys.template.json' and add one or more tokens",
        .0.display()
    )]
    Missing(PathBuf),
    #[error("failed to read studio access token file '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("studio access token file '{}' is not valid JSON", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "please provide at least one studio access token of 'prod', \
         'staging', or 'dev' in '{}'",
        .0.display()
    )]
    NoTokens(PathBuf),
}

impl StudioKeys {
    pub fn load(path: &Path) -> Result<Self, KeysError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeysError::Missing(path.to_owned()))
            }
            Err(source) => {
                return Err(KeysError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };
        let keys: StudioKeys =
            serde_json::from_slice(&bytes).map_err(|source| KeysError::Parse {
                path: path.to_owned(),
                source,
            })?;
        if keys.configured().is_empty() {
            return Err(KeysError::NoTokens(path.to_owned()));
        }
        Ok(keys)
    }

    /// Token for the given studio environment. Empty strings count as unset.
    pub fn token(&self, env: StudioEnvironment) -> Option<&str> {
        let token = match env {
            StudioEnvironment::Prod => &self.prod,
            StudioEnvironment::Staging => &self.staging,
            StudioEnvironment::Dev => &self.dev,
        };
        token.as_deref().filter(|token| !token.is_empty())
    }

    /// Studio environments with a token, in probe order.
    pub fn configured(&self) -> Vec<StudioEnvironment> {
        StudioEnvironment::ALL
            .into_iter()
            .filter(|env| self.token(*env).is_some())
            .collect()
    }
}
