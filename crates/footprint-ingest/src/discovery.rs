//! Source file location: configured candidates first, then best-effort heuristics.
//!
//! Heuristics only resolve file paths. They never error; an unreadable directory
//! simply yields no candidate.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::collector::Collector;
use crate::config::{expand_home, SourceConfig};

const GROUP_CONTAINERS: &str = "Library/Group Containers";
const PODCASTS_GROUP_SUFFIX: &str = ".groups.com.apple.podcasts";
const PODCASTS_LIBRARY: &str = "Documents/MTLibrary.sqlite";
const CHROME_USER_DATA: &str = "Library/Application Support/Google/Chrome";
const CHROME_HISTORY: &str = "History";

/// Resolve the database path for `collector`.
///
/// Returns the first existing expanded candidate. When none exists and discovery
/// is enabled, falls back to [`Collector::discover`] rooted at `home`.
#[must_use]
pub fn locate_source(
    collector: &dyn Collector,
    source: &SourceConfig,
    home: Option<&Path>,
) -> Option<PathBuf> {
    let configured = source
        .candidates
        .iter()
        .map(|candidate| expand_home(candidate, home))
        .find(|path| path.is_file());
    if configured.is_some() {
        return configured;
    }

    if !source.discover {
        return None;
    }
    let discovered = home.and_then(|home| collector.discover(home));
    if let Some(path) = &discovered {
        tracing::debug!(source = collector.name(), path = %path.display(), "discovered source database");
    }
    discovered
}

/// Podcasts library inside any `*.groups.com.apple.podcasts` group container.
#[must_use]
pub fn podcasts_library(home: &Path) -> Option<PathBuf> {
    let mut containers = read_subdirs(&home.join(GROUP_CONTAINERS))
        .into_iter()
        .filter(|dir| {
            dir.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(PODCASTS_GROUP_SUFFIX))
        })
        .collect::<Vec<_>>();
    containers.sort();
    containers
        .into_iter()
        .map(|dir| dir.join(PODCASTS_LIBRARY))
        .find(|path| path.is_file())
}

/// Most recently modified Chrome `History` across profile directories.
#[must_use]
pub fn newest_chrome_history(home: &Path) -> Option<PathBuf> {
    read_subdirs(&home.join(CHROME_USER_DATA))
        .into_iter()
        .filter(|dir| {
            dir.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_chrome_profile)
        })
        .map(|dir| dir.join(CHROME_HISTORY))
        .filter_map(|path| modified(&path).map(|time| (time, path)))
        .max_by(|(left, left_path), (right, right_path)| {
            left.cmp(right).then_with(|| right_path.cmp(left_path))
        })
        .map(|(_, path)| path)
}

fn is_chrome_profile(name: &str) -> bool {
    name == "Default"
        || name == "Guest Profile"
        || name
            .strip_prefix("Profile ")
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn read_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect()
}

fn modified(path: &Path) -> Option<SystemTime> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    metadata.modified().ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;
    use crate::collectors::{ChromeCollector, KnowledgeCCollector, PodcastsCollector};

    fn touch(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, b"")?;
        Ok(())
    }

    fn set_mtime(path: &Path, secs_after_epoch: u64) -> Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))?;
        Ok(())
    }

    #[test]
    fn first_existing_candidate_wins() -> Result<()> {
        let home = tempdir()?;
        touch(&home.path().join("second.db"))?;
        touch(&home.path().join("third.db"))?;
        let source = SourceConfig::new(["~/first.db", "~/second.db", "~/third.db"]);

        let found = locate_source(&KnowledgeCCollector, &source, Some(home.path()));
        assert_eq!(found, Some(home.path().join("second.db")));
        Ok(())
    }

    #[test]
    fn directories_are_not_candidates() -> Result<()> {
        let home = tempdir()?;
        fs::create_dir_all(home.path().join("chat.db"))?;
        let source = SourceConfig::new(["~/chat.db"]).without_discovery();
        assert_eq!(locate_source(&KnowledgeCCollector, &source, Some(home.path())), None);
        Ok(())
    }

    #[test]
    fn podcasts_discovered_in_any_group_container() -> Result<()> {
        let home = tempdir()?;
        let library = home
            .path()
            .join(GROUP_CONTAINERS)
            .join("ABCDE12345.groups.com.apple.podcasts")
            .join(PODCASTS_LIBRARY);
        touch(&library)?;
        touch(&home.path().join(GROUP_CONTAINERS).join("group.other.app/Documents/MTLibrary.sqlite"))?;

        let source = SourceConfig::new(["~/missing/MTLibrary.sqlite"]);
        assert_eq!(locate_source(&PodcastsCollector, &source, Some(home.path())), Some(library));
        Ok(())
    }

    #[test]
    fn discovery_respects_the_switch() -> Result<()> {
        let home = tempdir()?;
        touch(
            &home
                .path()
                .join(GROUP_CONTAINERS)
                .join("X.groups.com.apple.podcasts")
                .join(PODCASTS_LIBRARY),
        )?;
        let source = SourceConfig::new(["~/missing.sqlite"]).without_discovery();
        assert_eq!(locate_source(&PodcastsCollector, &source, Some(home.path())), None);
        Ok(())
    }

    #[test]
    fn newest_chrome_profile_history_wins() -> Result<()> {
        let home = tempdir()?;
        let root = home.path().join(CHROME_USER_DATA);
        let default = root.join("Default").join(CHROME_HISTORY);
        let profile = root.join("Profile 2").join(CHROME_HISTORY);
        let ignored = root.join("System Profile").join(CHROME_HISTORY);
        for path in [&default, &profile, &ignored] {
            touch(path)?;
        }
        set_mtime(&default, 1_000)?;
        set_mtime(&profile, 2_000)?;
        set_mtime(&ignored, 3_000)?;

        assert_eq!(newest_chrome_history(home.path()), Some(profile.clone()));
        let source = SourceConfig::new(Vec::<String>::new());
        assert_eq!(locate_source(&ChromeCollector, &source, Some(home.path())), Some(profile));
        Ok(())
    }

    #[test]
    fn missing_roots_discover_nothing() -> Result<()> {
        let home = tempdir()?;
        assert_eq!(podcasts_library(home.path()), None);
        assert_eq!(newest_chrome_history(home.path()), None);
        assert!(!is_chrome_profile("Profile "));
        assert!(is_chrome_profile("Profile 12"));
        Ok(())
    }
}
