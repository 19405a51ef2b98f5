//! Town routing manifest for cross-rig dispatch.
//!
//! A "town" is a directory hosting `routes.yaml` inside its `.beads/`,
//! mapping rig names and issue prefixes to workspace directories. Commands
//! that receive a foreign-prefix ID consult the manifest to find the owning
//! workspace.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Name of the routes manifest inside a town's `.beads/`.
pub const ROUTES_FILE_NAME: &str = "routes.yaml";

/// One routed workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    /// Rig name (e.g., `"gt"`).
    pub name: String,

    /// Issue prefix owned by the rig (e.g., `"gt"`).
    pub prefix: String,

    /// Workspace directory, absolute or relative to the town root.
    pub path: String,
}

/// The routes manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Routes {
    #[serde(default)]
    pub rigs: Vec<Route>,
}

impl Routes {
    /// Looks up a route by issue prefix.
    pub fn by_prefix(&self, prefix: &str) -> Option<&Route> {
        self.rigs.iter().find(|r| r.prefix == prefix)
    }

    /// Looks up a route by rig name.
    pub fn by_name(&self, name: &str) -> Option<&Route> {
        self.rigs.iter().find(|r| r.name == name)
    }

    /// Resolves a route's workspace `.beads` directory against the town root.
    pub fn beads_dir_for(&self, route: &Route, town_root: &Path) -> PathBuf {
        let workspace = if Path::new(&route.path).is_absolute() {
            PathBuf::from(&route.path)
        } else {
            town_root.join(&route.path)
        };
        workspace.join(".beads")
    }
}

/// Walks upward from `start` looking for a directory whose `.beads/` holds
/// a routes manifest. Returns `(town_root, routes)`.
pub fn find_town(start: &Path) -> Option<(PathBuf, Routes)> {
    let start = start.canonicalize().ok()?;
    let mut current = start.as_path();
    loop {
        let manifest = current.join(".beads").join(ROUTES_FILE_NAME);
        if manifest.is_file() {
            if let Ok(routes) = load_routes(&manifest) {
                return Some((current.to_path_buf(), routes));
            }
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent,
            _ => break,
        }
    }
    None
}

/// Loads a routes manifest from the given path.
pub fn load_routes(path: &Path) -> Result<Routes, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Routes::default());
    }
    Ok(serde_yaml::from_str(&contents)?)
}

/// Saves a routes manifest.
pub fn save_routes(path: &Path, routes: &Routes) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_yaml::to_string(routes)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_routes() -> Routes {
        Routes {
            rigs: vec![
                Route {
                    name: "hq".into(),
                    prefix: "hq".into(),
                    path: "hq".into(),
                },
                Route {
                    name: "gastown".into(),
                    prefix: "gt".into(),
                    path: "rigs/gastown".into(),
                },
            ],
        }
    }

    #[test]
    fn lookup_by_prefix_and_name() {
        let routes = sample_routes();
        assert_eq!(routes.by_prefix("gt").unwrap().name, "gastown");
        assert_eq!(routes.by_name("hq").unwrap().prefix, "hq");
        assert!(routes.by_prefix("zz").is_none());
    }

    #[test]
    fn beads_dir_resolution() {
        let routes = sample_routes();
        let town = Path::new("/town");
        let route = routes.by_prefix("gt").unwrap();
        assert_eq!(
            routes.beads_dir_for(route, town),
            PathBuf::from("/town/rigs/gastown/.beads")
        );
    }

    #[test]
    fn find_town_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(".beads").join(ROUTES_FILE_NAME);
        save_routes(&manifest, &sample_routes()).unwrap();

        let nested = dir.path().join("rigs").join("gastown").join("src");
        std::fs::create_dir_all(&nested).unwrap();

        let (root, routes) = find_town(&nested).unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap());
        assert_eq!(routes.rigs.len(), 2);
    }

    #[test]
    fn routes_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.yaml");
        let routes = sample_routes();
        save_routes(&path, &routes).unwrap();
        let loaded = load_routes(&path).unwrap();
        assert_eq!(loaded.rigs, routes.rigs);
    }
}
