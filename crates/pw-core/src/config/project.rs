//! Project configuration model
//!
//! A project groups locally-run applications with the forward rules
//! their tunnels come from. Process spawning and file watching are
//! handled by external collaborators; this module only carries their
//! configuration and the path/environment resolution applied before an
//! application is launched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::forward::ForwardDescriptor;

/// Executable kind whose sources live under `$GOPATH/src`
pub const EXECUTABLE_GO: &str = "go";

/// Root configuration item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Module root used to relocate Go application paths
    pub gopath: Option<String>,

    /// Cluster credentials file used by the kubernetes forwarders
    pub kubeconfig: Option<PathBuf>,

    /// Configured projects
    pub projects: Vec<Project>,

    /// File watcher options
    pub watcher: Option<Watcher>,
}

/// A named group of applications and forwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project name
    pub name: String,

    /// Locally-run applications
    #[serde(default, rename = "local")]
    pub applications: Vec<Application>,

    /// Tunnel forward rules
    #[serde(default, rename = "forward")]
    pub forwards: Vec<ForwardDescriptor>,
}

/// A locally-run application supervised alongside its tunnels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    /// Application name
    pub name: String,

    /// Working directory (supports `~` and environment variables)
    pub path: String,

    /// Executable kind (`go` paths are relocated under `$GOPATH/src`)
    pub executable: String,

    /// Launch arguments
    pub args: Vec<String>,

    /// Executable run on shutdown
    pub stop_executable: Option<String>,

    /// Arguments for the shutdown executable
    pub stop_args: Vec<String>,

    /// Hostname this application is reachable under locally
    pub hostname: Option<String>,

    /// Whether the file watcher restarts this application on changes
    pub watch: bool,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// File of additional environment variables
    pub env_file: Option<String>,

    /// Commands run once before the first launch
    pub setup: Vec<String>,
}

impl Application {
    /// Working directory after `~`, executable-kind, and environment
    /// resolution
    pub fn resolved_path(&self) -> String {
        resolve_by_executable(&self.path, &self.executable)
    }

    /// Environment file path after the same resolution as `resolved_path`
    pub fn resolved_env_file(&self) -> Option<String> {
        self.env_file
            .as_deref()
            .map(|f| resolve_by_executable(f, &self.executable))
    }
}

/// File watcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Watcher {
    /// Glob patterns excluded from watching
    pub exclude: Vec<String>,
}

/// Resolve a configured path for the given executable kind.
///
/// `~` becomes `$HOME`; for Go executables a path that does not exist
/// on disk is relocated under `$GOPATH/src` before environment
/// variables are expanded.
fn resolve_by_executable(path: &str, executable: &str) -> String {
    let mut path = path.replace('~', "$HOME");

    if executable == EXECUTABLE_GO && !Path::new(&path).exists() {
        path = format!("$GOPATH/src/{}", path);
    }

    expand_env(&path)
}

/// Expand `$VAR` and `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        }

        if name.is_empty() {
            out.push('$');
        } else if let Ok(value) = std::env::var(&name) {
            out.push_str(&value);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env() {
        std::env::set_var("PW_TEST_VALUE", "forty-two");
        assert_eq!(expand_env("x/$PW_TEST_VALUE/y"), "x/forty-two/y");
        assert_eq!(expand_env("x/${PW_TEST_VALUE}y"), "x/forty-twoy");
        assert_eq!(expand_env("$PW_TEST_UNSET_VALUE/y"), "/y");
        assert_eq!(expand_env("no variables"), "no variables");
    }

    #[test]
    fn test_resolved_path_expands_tilde() {
        std::env::set_var("HOME", "/home/tester");

        let app = Application {
            name: "api".to_string(),
            path: "~/src/api".to_string(),
            executable: "node".to_string(),
            ..Default::default()
        };

        assert_eq!(app.resolved_path(), "/home/tester/src/api");
    }

    #[test]
    fn test_resolved_path_relocates_missing_go_sources() {
        std::env::set_var("GOPATH", "/opt/go");

        let app = Application {
            name: "api".to_string(),
            // Not a path that exists on disk
            path: "github.com/acme/api".to_string(),
            executable: EXECUTABLE_GO.to_string(),
            ..Default::default()
        };

        assert_eq!(app.resolved_path(), "/opt/go/src/github.com/acme/api");
    }

    #[test]
    fn test_resolved_path_keeps_existing_go_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();

        let app = Application {
            name: "api".to_string(),
            path: path.clone(),
            executable: EXECUTABLE_GO.to_string(),
            ..Default::default()
        };

        assert_eq!(app.resolved_path(), path);
    }

    #[test]
    fn test_resolved_env_file() {
        std::env::set_var("HOME", "/home/tester");

        let app = Application {
            name: "api".to_string(),
            env_file: Some("~/.env.local".to_string()),
            ..Default::default()
        };

        assert_eq!(
            app.resolved_env_file().as_deref(),
            Some("/home/tester/.env.local")
        );
    }
}
