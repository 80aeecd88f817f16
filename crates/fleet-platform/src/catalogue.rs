//! Platform catalogue — which platforms exist, which versions they ship,
//! and how to download and launch a build.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};

const BUILTIN: &str = include_str!("../catalogue.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Server,
    Proxy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformVersion {
    pub version: String,
    pub build: String,
    /// Hex-encoded SHA-256 of the artifact, verified after download.
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub name: String,
    pub kind: PlatformKind,
    /// Download URL with `{version}` and `{build}` placeholders.
    pub url: String,
    /// Command line with `{artifact}`, `{port}` and `{memory}` placeholders.
    #[serde(default = "default_launch")]
    pub launch: Vec<String>,
    /// Files written into a service's working directory before launch.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    pub versions: Vec<PlatformVersion>,
}

fn default_launch() -> Vec<String> {
    ["java", "-Xmx{memory}M", "-jar", "{artifact}"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Platform {
    pub fn version(&self, version: &str) -> Option<&PlatformVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Substitute version and build into the URL template.
    pub fn download_url(&self, version: &PlatformVersion) -> String {
        self.url
            .replace("{version}", &version.version)
            .replace("{build}", &version.build)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogue {
    pub platforms: Vec<Platform>,
}

impl Catalogue {
    /// The catalogue compiled into the binary.
    pub fn builtin() -> PlatformResult<Self> {
        Self::from_json(BUILTIN)
    }

    pub fn from_json(json: &str) -> PlatformResult<Self> {
        let catalogue: Catalogue =
            serde_json::from_str(json).map_err(|e| PlatformError::Catalogue(e.to_string()))?;
        catalogue.check()?;
        Ok(catalogue)
    }

    pub fn from_file(path: &Path) -> PlatformResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn check(&self) -> PlatformResult<()> {
        for (i, platform) in self.platforms.iter().enumerate() {
            if self.platforms[..i].iter().any(|p| p.name == platform.name) {
                return Err(PlatformError::Catalogue(format!(
                    "platform {} listed twice",
                    platform.name
                )));
            }
            if platform.launch.is_empty() {
                return Err(PlatformError::Catalogue(format!(
                    "platform {} has an empty launch command",
                    platform.name
                )));
            }
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.name == name)
    }

    /// Total number of versions across all platforms.
    pub fn version_count(&self) -> usize {
        self.platforms.iter().map(|p| p.versions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogue_parses() {
        let catalogue = Catalogue::builtin().unwrap();
        let paper = catalogue.find("paper").unwrap();
        assert_eq!(paper.kind, PlatformKind::Server);
        assert!(paper.version("1.21").is_some());
        assert!(paper.files.contains_key("eula.txt"));
        assert!(catalogue.find("velocity").is_some());
        assert!(catalogue.version_count() >= 2);
    }

    #[test]
    fn url_template_substitution() {
        let catalogue = Catalogue::builtin().unwrap();
        let paper = catalogue.find("paper").unwrap();
        let url = paper.download_url(paper.version("1.21").unwrap());
        assert_eq!(
            url,
            "https://api.papermc.io/v2/projects/paper/versions/1.21/builds/130/downloads/paper-1.21-130.jar"
        );
    }

    #[test]
    fn launch_defaults_to_plain_jar() {
        let json = r#"{"platforms":[{"name":"vanilla","kind":"server",
            "url":"https://example.com/{version}.jar",
            "versions":[{"version":"1.21","build":"1"}]}]}"#;
        let catalogue = Catalogue::from_json(json).unwrap();
        let vanilla = catalogue.find("vanilla").unwrap();
        assert_eq!(vanilla.launch, ["java", "-Xmx{memory}M", "-jar", "{artifact}"]);
        assert!(vanilla.files.is_empty());
    }

    #[test]
    fn duplicate_platforms_are_rejected() {
        let json = r#"{"platforms":[
            {"name":"a","kind":"server","url":"u","versions":[]},
            {"name":"a","kind":"proxy","url":"u","versions":[]}]}"#;
        assert!(matches!(
            Catalogue::from_json(json),
            Err(PlatformError::Catalogue(_))
        ));
    }
}
