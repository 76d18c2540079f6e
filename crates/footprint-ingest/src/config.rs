//! Source locations and snapshot settings.
//! Loadable from YAML so nothing in the pipeline hardcodes a path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collectors::{CHROME, KNOWLEDGEC, MESSAGES, PODCASTS};
use crate::{IngestError, IngestResult};

/// Where to look for one source database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Candidate paths, tried in order. A leading `~/` is expanded.
    #[serde(default)]
    pub candidates: Vec<String>,
    /// Fall back to the collector's location heuristic when no candidate exists
    #[serde(default = "default_discover")]
    pub discover: bool,
}

fn default_discover() -> bool {
    true
}

impl SourceConfig {
    #[must_use]
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { candidates: candidates.into_iter().map(Into::into).collect(), discover: true }
    }

    #[must_use]
    pub fn without_discovery(mut self) -> Self {
        self.discover = false;
        self
    }
}

/// Full ingestion configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Working directory for source snapshots (`<snapshot_dir>/<source>.db`)
    pub snapshot_dir: PathBuf,
    /// Overrides the user's home directory for `~/` expansion and discovery
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

/// On-disk overrides layered onto an [`IngestConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

impl ConfigFile {
    /// Parse a YAML config file from a path
    ///
    /// # Errors
    /// Returns [`IngestError::Config`] when the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> IngestResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            IngestError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse a YAML config document
    ///
    /// # Errors
    /// Returns [`IngestError::Config`] on malformed YAML or an invalid entry.
    pub fn parse(yaml: &str) -> IngestResult<Self> {
        let file: Self = serde_yaml::from_str(yaml)
            .map_err(|err| IngestError::Config(format!("invalid YAML: {err}")))?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> IngestResult<()> {
        for (name, source) in &self.sources {
            if name.trim().is_empty() {
                return Err(IngestError::Config("source name cannot be empty".into()));
            }
            if source.candidates.iter().any(|candidate| candidate.trim().is_empty()) {
                return Err(IngestError::Config(format!("source '{name}' has an empty candidate path")));
            }
        }
        if self.snapshot_dir.as_ref().is_some_and(|dir| dir.as_os_str().is_empty()) {
            return Err(IngestError::Config("snapshot_dir cannot be empty".into()));
        }
        Ok(())
    }
}

impl IngestConfig {
    /// Config with no sources configured
    #[must_use]
    pub fn empty(snapshot_dir: impl Into<PathBuf>) -> Self {
        Self { snapshot_dir: snapshot_dir.into(), home_dir: None, sources: BTreeMap::new() }
    }

    /// Standard macOS locations for every built-in source
    #[must_use]
    pub fn macos_defaults(snapshot_dir: impl Into<PathBuf>) -> Self {
        Self::empty(snapshot_dir)
            .with_source(
                KNOWLEDGEC,
                SourceConfig::new([
                    "~/Desktop/knowledgeC.db",
                    "~/Library/Application Support/Knowledge/knowledgeC.db",
                ]),
            )
            .with_source(MESSAGES, SourceConfig::new(["~/Library/Messages/chat.db"]))
            .with_source(
                CHROME,
                SourceConfig::new(["~/Library/Application Support/Google/Chrome/Default/History"]),
            )
            .with_source(
                PODCASTS,
                SourceConfig::new([
                    "~/Library/Group Containers/243LU875E5.groups.com.apple.podcasts/Documents/MTLibrary.sqlite",
                ]),
            )
    }

    #[must_use]
    pub fn with_source(mut self, name: &str, source: SourceConfig) -> Self {
        self.sources.insert(name.to_string(), source);
        self
    }

    #[must_use]
    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    /// Layer a config file on top; named sources are replaced wholesale.
    pub fn apply(&mut self, file: ConfigFile) {
        if let Some(dir) = file.snapshot_dir {
            self.snapshot_dir = dir;
        }
        if let Some(home) = file.home_dir {
            self.home_dir = Some(home);
        }
        self.sources.extend(file.sources);
    }

    /// Source entry by name, ignoring ASCII case.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name).or_else(|| {
            self.sources
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, source)| source)
        })
    }

    /// Like [`IngestConfig::source`], falling back to discovery only.
    #[must_use]
    pub fn source_or_discover(&self, name: &str) -> SourceConfig {
        self.source(name).cloned().unwrap_or_else(|| SourceConfig::new(Vec::<String>::new()))
    }

    /// Home directory used for `~/` expansion and discovery
    #[must_use]
    pub fn home(&self) -> Option<PathBuf> {
        self.home_dir.clone().or_else(dirs::home_dir)
    }

    #[must_use]
    pub fn expand(&self, raw: &str) -> PathBuf {
        expand_home(raw, self.home().as_deref())
    }
}

/// Expand a leading `~` or `~/` against `home`; other paths pass through.
#[must_use]
pub fn expand_home(raw: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(raw);
    };
    if raw == "~" {
        return home.to_path_buf();
    }
    raw.strip_prefix("~/").map_or_else(|| PathBuf::from(raw), |rest| home.join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_builtin_source() {
        let config = IngestConfig::macos_defaults("/tmp/snapshots");
        for name in [KNOWLEDGEC, MESSAGES, CHROME, PODCASTS] {
            let source = config.source(name);
            assert!(source.is_some_and(|s| !s.candidates.is_empty()), "{name} missing");
        }
        assert_eq!(config.source(KNOWLEDGEC).map(|s| s.candidates.len()), Some(2));
    }

    #[test]
    fn expand_home_only_touches_leading_tilde() {
        let home = Path::new("/Users/me");
        assert_eq!(expand_home("~/Library/x.db", Some(home)), PathBuf::from("/Users/me/Library/x.db"));
        assert_eq!(expand_home("~", Some(home)), PathBuf::from("/Users/me"));
        assert_eq!(expand_home("/abs/~/x.db", Some(home)), PathBuf::from("/abs/~/x.db"));
        assert_eq!(expand_home("~other/x.db", Some(home)), PathBuf::from("~other/x.db"));
        assert_eq!(expand_home("~/x.db", None), PathBuf::from("~/x.db"));
    }

    #[test]
    fn parse_yaml_with_defaults() -> anyhow::Result<()> {
        let yaml = r"
snapshot_dir: /var/tmp/footprint
sources:
  chrome:
    candidates:
      - ~/chrome/History
  messages:
    candidates: [/data/chat.db]
    discover: false
";
        let file = ConfigFile::parse(yaml)?;
        assert_eq!(file.snapshot_dir, Some(PathBuf::from("/var/tmp/footprint")));
        let chrome = file.sources.get(CHROME).ok_or_else(|| anyhow::anyhow!("chrome missing"))?;
        assert!(chrome.discover);
        assert_eq!(file.sources.get(MESSAGES).map(|s| s.discover), Some(false));
        Ok(())
    }

    #[test]
    fn parse_rejects_bad_documents() {
        assert!(matches!(ConfigFile::parse("sources: [1, 2"), Err(IngestError::Config(_))));
        assert!(matches!(ConfigFile::parse("unknown_key: 1"), Err(IngestError::Config(_))));
        assert!(matches!(
            ConfigFile::parse("sources:\n  chrome:\n    candidates: ['  ']\n"),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn apply_replaces_named_sources_only() -> anyhow::Result<()> {
        let mut config = IngestConfig::macos_defaults("/tmp/snapshots");
        let file = ConfigFile::parse(
            "home_dir: /home/test\nsources:\n  chrome:\n    candidates: [/x/History]\n    discover: false\n",
        )?;
        config.apply(file);

        assert_eq!(
            config.source(CHROME),
            Some(&SourceConfig::new(["/x/History"]).without_discovery())
        );
        assert_eq!(config.source(MESSAGES).map(|s| s.candidates.len()), Some(1));
        assert_eq!(config.snapshot_dir, PathBuf::from("/tmp/snapshots"));
        assert_eq!(config.expand("~/a.db"), PathBuf::from("/home/test/a.db"));
        Ok(())
    }

    #[test]
    fn source_lookup_ignores_case() {
        let config = IngestConfig::macos_defaults("/tmp/snapshots");
        assert!(config.source("KNOWLEDGEC").is_some());
        assert!(config.source("safari").is_none());
    }
}
