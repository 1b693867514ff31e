use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::InstallError;
use crate::settings::{release_arch, release_os};

const LIST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Deserialize)]
struct Release {
    tag_name: String,
}

/// A release tag resolved once per run. Every later step uses this value so
/// the download and install cannot drift to a different release mid-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub channel: String,
    pub semver: String,
    pub raw_tag: String,
}

impl ResolvedVersion {
    /// Parse a tag such as `v3.16.2-stable` into its version and channel.
    pub fn from_tag(tag: &str) -> Option<Self> {
        static VERSION: OnceLock<Option<Regex>> = OnceLock::new();
        let re = VERSION
            .get_or_init(|| Regex::new(r"v?(\d+\.\d+\.\d+)").ok())
            .as_ref()?;

        let caps = re.captures(tag)?;
        let whole = caps.get(0)?;
        let semver = caps.get(1)?.as_str().to_string();

        let mut rest = String::with_capacity(tag.len());
        rest.push_str(&tag[..whole.start()]);
        rest.push_str(&tag[whole.end()..]);
        let channel = rest.trim_matches(|c: char| c == '-' || c == '_').to_string();
        if channel.is_empty() {
            return None;
        }

        Some(Self {
            channel,
            semver,
            raw_tag: tag.to_string(),
        })
    }

    /// File name of the node tarball for this release on the current platform.
    pub fn tarball_name(&self) -> String {
        format!(
            "node_{}_{}-{}_{}.tar.gz",
            self.channel,
            release_os(),
            release_arch(),
            self.semver
        )
    }

    /// Download URL of the node tarball under a channel-scoped path.
    pub fn tarball_url(&self, archive_base: &str) -> String {
        format!(
            "{}/channel/{}/{}",
            archive_base.trim_end_matches('/'),
            self.channel,
            self.tarball_name()
        )
    }
}

/// Pick the first tag containing `channel`. Listings come back newest-first,
/// so the first hit is the most recently published release.
pub fn select_tag<'a, I>(tags: I, channel: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter().find(|tag| tag.contains(channel))
}

/// Query the release listing and resolve `channel` to a concrete release.
pub async fn resolve(
    client: &reqwest::Client,
    releases_url: &str,
    channel: &str,
) -> Result<ResolvedVersion, InstallError> {
    let listing_error = |reason: String| InstallError::Download {
        url: releases_url.to_string(),
        reason,
    };

    let resp = client
        .get(releases_url)
        .header("Accept", "application/vnd.github+json")
        .timeout(LIST_TIMEOUT)
        .send()
        .await
        .map_err(|e| listing_error(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(listing_error(format!("HTTP {}", resp.status())));
    }

    let releases: Vec<Release> = resp
        .json()
        .await
        .map_err(|e| listing_error(format!("invalid release listing: {}", e)))?;
    debug!(count = releases.len(), channel, "fetched release listing");

    let not_found = || InstallError::NotFound {
        channel: channel.to_string(),
    };
    let tag = select_tag(releases.iter().map(|r| r.tag_name.as_str()), channel)
        .ok_or_else(not_found)?;
    ResolvedVersion::from_tag(tag).ok_or_else(not_found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_suffix_channel_tag() {
        let v = ResolvedVersion::from_tag("v3.16.2-stable").unwrap();
        assert_eq!(v.semver, "3.16.2");
        assert_eq!(v.channel, "stable");
        assert_eq!(v.raw_tag, "v3.16.2-stable");
    }

    #[test]
    fn parses_prefix_channel_tag() {
        let v = ResolvedVersion::from_tag("stable-v1.2.3").unwrap();
        assert_eq!(v.semver, "1.2.3");
        assert_eq!(v.channel, "stable");
    }

    #[test]
    fn tag_without_version_is_rejected() {
        assert!(ResolvedVersion::from_tag("nightly").is_none());
        assert!(ResolvedVersion::from_tag("v1.2.3").is_none());
    }

    #[test]
    fn tarball_url_is_channel_scoped() {
        let v = ResolvedVersion::from_tag("v3.16.2-beta").unwrap();
        let url = v.tarball_url("https://releases.example.com/");
        let expected = format!(
            "https://releases.example.com/channel/beta/node_beta_{}-{}_3.16.2.tar.gz",
            release_os(),
            release_arch()
        );
        assert_eq!(url, expected);
    }

    #[test]
    fn select_takes_first_match_not_max() {
        let tags = ["v3.17.0-beta", "v3.16.2-stable", "v3.18.0-stable"];
        assert_eq!(select_tag(tags, "stable"), Some("v3.16.2-stable"));
        assert_eq!(select_tag(tags, "nightly"), None);
    }

    #[tokio::test]
    async fn resolve_returns_matching_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"tag_name":"v3.17.0-beta"},{"tag_name":"v3.16.2-stable"}]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let v = resolve(&client, &format!("{}/releases", server.uri()), "stable")
            .await
            .unwrap();
        assert!(v.raw_tag.contains("stable"));
        assert_eq!(v.semver, "3.16.2");
    }

    #[tokio::test]
    async fn resolve_without_match_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"tag_name":"v3.17.0-beta"}]"#))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = resolve(&client, &format!("{}/releases", server.uri()), "stable")
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::NotFound { ref channel } if channel == "stable"));
    }

    #[tokio::test]
    async fn resolve_surfaces_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = resolve(&client, &format!("{}/releases", server.uri()), "stable")
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Download { .. }));
    }
}
