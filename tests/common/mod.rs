//! Shared test doubles for integration tests.
//!
//! `FakeHost` stands in for the machine's external tools. It keeps just
//! enough state (installed packages, checked-out revisions) for guards to
//! observe the effects of earlier actions, so a second pass converges.

#![allow(dead_code)]

use rigup::command::{CommandOutput, CommandRunner, CommandSpec};
use rigup::error::Result;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

#[derive(Default)]
pub struct FakeHost {
    /// Every command in the order it ran.
    pub seen: Vec<String>,
    /// Packages dpkg reports as installed.
    pub installed: HashSet<String>,
    /// Substrings of command lines that exit 1.
    pub failing: Vec<String>,
    /// Checked-out revision per git directory.
    pub heads: HashMap<PathBuf, String>,
    /// When a command line contains the key, create the path (trailing `/` = directory).
    pub effects: Vec<(String, PathBuf)>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.failing.push(pattern.to_string());
        self
    }

    pub fn with_effect(mut self, pattern: &str, path: impl Into<PathBuf>) -> Self {
        self.effects.push((pattern.to_string(), path.into()));
        self
    }

    pub fn with_installed(mut self, packages: &[&str]) -> Self {
        self.installed.extend(packages.iter().map(|p| p.to_string()));
        self
    }

    /// Commands that were actually run, excluding read-only queries.
    pub fn actions(&self) -> Vec<&str> {
        self.seen
            .iter()
            .map(String::as_str)
            .filter(|line| !is_query(line))
            .collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.seen.iter().filter(|l| l.contains(pattern)).count()
    }

    fn simulate(&mut self, spec: &CommandSpec) -> CommandOutput {
        let line = spec.to_string();

        if self.failing.iter().any(|p| line.contains(p.as_str())) {
            return CommandOutput::failed(1, format!("simulated failure: {}", line));
        }

        if spec.program == "dpkg-query" {
            let name = spec.args.last().cloned().unwrap_or_default();
            return if self.installed.contains(&name) {
                CommandOutput::ok("install ok installed")
            } else {
                CommandOutput::failed(1, format!("dpkg-query: no packages found matching {}", name))
            };
        }
        if spec.is_shell() && line.starts_with("dpkg-query") {
            let name = line.split_whitespace().nth(3).unwrap_or_default();
            return if self.installed.contains(name) {
                CommandOutput::ok("")
            } else {
                CommandOutput::failed(1, "")
            };
        }
        if line.contains("apt-get -q -y install") {
            if let Some(name) = line.split_whitespace().last() {
                self.installed.insert(name.to_string());
            }
        }

        if spec.program == "git" {
            match spec.args.first().map(String::as_str) {
                Some("clone") => {
                    if let Some(dest) = spec.args.last() {
                        let _ = fs::create_dir_all(PathBuf::from(dest).join(".git"));
                    }
                }
                Some("-C") => {
                    let dir = PathBuf::from(&spec.args[1]);
                    match spec.args.get(2).map(String::as_str) {
                        Some("rev-parse") => {
                            return match self.heads.get(&dir) {
                                Some(head) => CommandOutput::ok(format!("{}\n", head)),
                                None => CommandOutput::failed(128, "fatal: bad revision"),
                            };
                        }
                        Some("checkout") => {
                            if let Some(rev) = spec.args.last() {
                                self.heads.insert(dir, rev.clone());
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if spec.program == "curl" {
            if let Some(pos) = spec.args.iter().position(|a| a == "-o") {
                let _ = fs::write(&spec.args[pos + 1], b"downloaded");
            }
        }

        for (pattern, path) in &self.effects {
            if line.contains(pattern.as_str()) {
                if path.to_string_lossy().ends_with('/') {
                    let _ = fs::create_dir_all(path);
                } else {
                    if let Some(parent) = path.parent() {
                        let _ = fs::create_dir_all(parent);
                    }
                    let _ = fs::write(path, b"");
                }
            }
        }

        CommandOutput::ok("")
    }
}

fn is_query(line: &str) -> bool {
    line.starts_with("dpkg-query") || line.contains(" rev-parse ")
}

impl CommandRunner for FakeHost {
    fn run(&mut self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.seen.push(spec.to_string());
        Ok(self.simulate(spec))
    }
}
