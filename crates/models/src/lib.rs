//! Domain model shared by acquisition and the query engine.
//!
//! The fleet is addressed as `(environment, org, app)`. Acquisition walks
//! org clusters to currently-deployed versions, resolves each to a source
//! release on one of the studio hosts, and pins the result in the lock
//! file. The query engine reads the same lock file back to enumerate the
//! archive corpus.

mod keys;
mod lock;
mod remote;

pub use keys::{KeysError, StudioKeys};
pub use lock::{LockEntry, LockError, LockStore, Status, VersionLock};
pub use remote::{OrgsResponse, RawDeployment, RawOrg, RawRelease, ReleasesResponse};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Public document enumerating orgs and the environments they deploy to.
pub const ORGS_URL: &str = "https://altinncdn.no/orgs/altinn-orgs.json";

/// A deployment target environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Prod,
    Tt02,
}

impl Environment {
    /// Map a raw environment tag from the orgs document. Unrecognized
    /// tags (e.g. internal test environments) are ignored by the caller.
    pub fn from_raw(raw: &str) -> Option<Environment> {
        match raw {
            "production" => Some(Environment::Prod),
            "tt02" => Some(Environment::Tt02),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Tt02 => "tt02",
        }
    }

    /// Base URL of the org's app-hosting domain in this environment.
    fn apps_base(&self, org: &str) -> String {
        match self {
            Environment::Prod => format!("https://{org}.apps.altinn.no"),
            env => format!("https://{org}.apps.{env}.altinn.no"),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source-host flavor serving releases and archives.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StudioEnvironment {
    Prod,
    Staging,
    Dev,
}

impl StudioEnvironment {
    pub const ALL: [StudioEnvironment; 3] = [
        StudioEnvironment::Prod,
        StudioEnvironment::Staging,
        StudioEnvironment::Dev,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StudioEnvironment::Prod => "prod",
            StudioEnvironment::Staging => "staging",
            StudioEnvironment::Dev => "dev",
        }
    }

    /// Base URL of this studio host. Production is the apex domain.
    pub fn base_url(&self) -> &'static str {
        match self {
            StudioEnvironment::Prod => "https://altinn.studio",
            StudioEnvironment::Staging => "https://staging.altinn.studio",
            StudioEnvironment::Dev => "https://dev.altinn.studio",
        }
    }
}

impl fmt::Display for StudioEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The app key `{env}-{org}-{app}` addressing one deployed application.
pub fn app_key(env: Environment, org: &str, app: &str) -> String {
    format!("{env}-{org}-{app}")
}

/// URL of the running application itself.
pub fn app_url(env: Environment, org: &str, app: &str) -> String {
    format!("{}/{org}/{app}", env.apps_base(org))
}

/// URL of the app's source repository on the given studio host.
pub fn repo_url(studio_env: StudioEnvironment, org: &str, app: &str) -> String {
    format!("{}/repos/{org}/{app}", studio_env.base_url())
}

/// A `(environment, org)` pair: the unit of deployment discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub env: Environment,
    pub org: String,
}

impl Cluster {
    pub fn key(&self) -> String {
        format!("{}-{}", self.env, self.org)
    }

    pub fn deployments_url(&self) -> String {
        format!(
            "{}/kuberneteswrapper/api/v1/deployments",
            self.env.apps_base(&self.org)
        )
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.env, self.org)
    }
}

/// A currently-running version of an app in a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub env: Environment,
    pub org: String,
    pub app: String,
    pub version: String,
}

impl Deployment {
    pub fn key(&self) -> String {
        app_key(self.env, &self.org, &self.app)
    }

    pub fn releases_url(&self, studio_env: StudioEnvironment) -> String {
        format!(
            "{}/designer/api/{}/{}/releases",
            studio_env.base_url(),
            self.org,
            self.app
        )
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.env, self.org, self.app)
    }
}

/// A source-side revision matching a deployment's version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub env: Environment,
    pub org: String,
    pub app: String,
    pub version: String,
    pub commit_sha: String,
    pub studio_env: StudioEnvironment,
}

impl Release {
    pub fn key(&self) -> String {
        app_key(self.env, &self.org, &self.app)
    }

    pub fn repo_url(&self) -> String {
        repo_url(self.studio_env, &self.org, &self.app)
    }

    pub fn archive_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/archive/{}.zip",
            self.studio_env.base_url(),
            self.org,
            self.app,
            self.commit_sha
        )
    }

    pub fn into_lock_entry(self, status: Status) -> LockEntry {
        LockEntry {
            env: self.env,
            org: self.org,
            app: self.app,
            version: self.version,
            commit_sha: self.commit_sha,
            status,
            studio_env: self.studio_env,
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.env, self.org, self.app)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn environment_tags_round_trip() {
        assert_eq!(Environment::from_raw("production"), Some(Environment::Prod));
        assert_eq!(Environment::from_raw("tt02"), Some(Environment::Tt02));
        assert_eq!(Environment::from_raw("at22"), None);
        assert_eq!(
            serde_json::to_string(&Environment::Prod).unwrap(),
            r#""prod""#
        );
        assert_eq!(
            serde_json::from_str::<StudioEnvironment>(r#""staging""#).unwrap(),
            StudioEnvironment::Staging
        );
    }

    #[test]
    fn urls() {
        let cluster = Cluster {
            env: Environment::Prod,
            org: "ttd".to_owned(),
        };
        assert_eq!(
            cluster.deployments_url(),
            "https://ttd.apps.altinn.no/kuberneteswrapper/api/v1/deployments"
        );
        let cluster = Cluster {
            env: Environment::Tt02,
            org: "ttd".to_owned(),
        };
        assert_eq!(
            cluster.deployments_url(),
            "https://ttd.apps.tt02.altinn.no/kuberneteswrapper/api/v1/deployments"
        );

        let release = Release {
            env: Environment::Tt02,
            org: "ttd".to_owned(),
            app: "my-app".to_owned(),
            version: "1.2.3".to_owned(),
            commit_sha: "abc123".to_owned(),
            studio_env: StudioEnvironment::Dev,
        };
        assert_eq!(release.key(), "tt02-ttd-my-app");
        assert_eq!(
            release.archive_url(),
            "https://dev.altinn.studio/repos/ttd/my-app/archive/abc123.zip"
        );
        assert_eq!(
            app_url(Environment::Prod, "ttd", "my-app"),
            "https://ttd.apps.altinn.no/ttd/my-app"
        );
    }
}
