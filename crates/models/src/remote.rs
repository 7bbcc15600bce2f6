//! Wire shapes of the remote discovery endpoints.

use std::collections::BTreeMap;

use serde::Deserialize;

/// `https://altinncdn.no/orgs/altinn-orgs.json`
#[derive(Debug, Clone, Deserialize)]
pub struct OrgsResponse {
    pub orgs: BTreeMap<String, RawOrg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOrg {
    #[serde(default)]
    pub environments: Vec<String>,
}

/// One entry of `/kuberneteswrapper/api/v1/deployments`. The wrapper
/// itself shows up in its own listing, and entries may lack either field.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDeployment {
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// `/designer/api/{org}/{app}/releases`
#[derive(Debug, Clone, Deserialize)]
pub struct ReleasesResponse {
    #[serde(default)]
    pub results: Vec<RawRelease>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRelease {
    #[serde(rename = "tagName")]
    pub tag_name: String,
    #[serde(rename = "targetCommitish")]
    pub target_commitish: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tolerates_partial_deployments() {
        let raw: Vec<RawDeployment> = serde_json::from_str(
            r#"[
                {"release": "ttd-my-app", "version": "1.2.3", "status": "Running"},
                {"release": "kuberneteswrapper"},
                {"version": "0.0.1"}
            ]"#,
        )
        .unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].release.as_deref(), Some("ttd-my-app"));
        assert_eq!(raw[1].version, None);
        assert_eq!(raw[2].release, None);
    }

    #[test]
    fn releases_casing() {
        let response: ReleasesResponse = serde_json::from_str(
            r#"{"results": [{"tagName": "1.2.3", "targetCommitish": "abc123", "extra": 1}]}"#,
        )
        .unwrap();
        assert_eq!(response.results[0].tag_name, "1.2.3");
        assert_eq!(response.results[0].target_commitish, "abc123");
    }
}
