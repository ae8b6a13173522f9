//! Configuration file handling for provisioning runs.
//!
//! Every machine-specific or time-bound value the recipes need (pinned CUDA
//! repository package, Caffe commit, cuDNN library version, target user) lives
//! here. Defaults reproduce the original build host; a JSON file overrides any
//! subset of fields.

use crate::template::TemplateVars;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Provisioning configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    // Target layout
    pub software_dir: PathBuf,
    pub local_user: String,
    pub local_group: String,
    /// Defaults to `/home/<local_user>`
    pub home_dir: Option<PathBuf>,
    /// Kernel release for header/image packages; detected with `uname -r` when unset
    pub os_version: Option<String>,

    // Packages
    pub caffe_packages: Vec<String>,

    // CUDA
    pub cuda_repo_package: String,
    pub cuda_repo_url: String,
    pub cuda_lib_dir: PathBuf,

    // cuDNN (installed only when the tarball is bundled)
    pub files_dir: PathBuf,
    pub cudnn_tarball_name_wo_tgz: String,
    pub cudnn_library_version: String,

    // Caffe
    pub caffe_repository: String,
    pub caffe_revision: String,
    pub make_jobs: u32,
    /// Overrides the built-in Makefile.config template
    pub makefile_template: Option<PathBuf>,

    // System locations
    pub local_prefix: PathBuf,
    pub ld_conf_dir: PathBuf,
    pub cron_dir: PathBuf,
    pub profile_dir: PathBuf,
}

impl ProvisionConfig {
    /// Create a new configuration with the stock defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let mut config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        // Bundled files live next to the configuration, not the caller's cwd
        let absolute = fs::canonicalize(&path)
            .with_context(|| format!("Failed to resolve {:?}", path.as_ref()))?;
        if let Some(base) = absolute.parent() {
            config.resolve_relative_to(base);
        }

        Ok(config)
    }

    /// Anchor relative `files_dir` and `makefile_template` at `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if self.files_dir.is_relative() {
            self.files_dir = base.join(&self.files_dir);
        }
        if let Some(ref mut template) = self.makefile_template {
            if template.is_relative() {
                *template = base.join(&*template);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.software_dir.is_absolute() {
            anyhow::bail!("software_dir must be an absolute path");
        }

        validate_account_name("local_user", &self.local_user)?;
        validate_account_name("local_group", &self.local_group)?;

        if let Some(ref version) = self.os_version {
            let version = version.trim();
            if version.is_empty() || version.contains(char::is_whitespace) {
                anyhow::bail!("os_version must be a single kernel release string");
            }
        }

        for url in [&self.cuda_repo_url, &self.caffe_repository] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("URL must start with http:// or https://: {}", url);
            }
        }

        // A pinned revision is a full commit hash, never a branch name
        if self.caffe_revision.len() != 40
            || !self.caffe_revision.chars().all(|c| c.is_ascii_hexdigit())
        {
            anyhow::bail!("caffe_revision must be a 40-character commit hash");
        }

        if self.make_jobs == 0 {
            anyhow::bail!("make_jobs must be at least 1");
        }

        if self.cuda_repo_package.contains('/') || self.cuda_repo_package.is_empty() {
            anyhow::bail!("cuda_repo_package must be a plain file name");
        }

        if self.cudnn_tarball_name_wo_tgz.contains('/')
            || self.cudnn_tarball_name_wo_tgz.is_empty()
        {
            anyhow::bail!("cudnn_tarball_name_wo_tgz must be a plain file name");
        }

        for (field, path) in [
            ("local_prefix", &self.local_prefix),
            ("ld_conf_dir", &self.ld_conf_dir),
            ("cron_dir", &self.cron_dir),
            ("profile_dir", &self.profile_dir),
            ("cuda_lib_dir", &self.cuda_lib_dir),
            ("files_dir", &self.files_dir),
        ] {
            if !path.is_absolute() {
                anyhow::bail!("{} must be an absolute path", field);
            }
        }

        if let Some(ref template) = self.makefile_template {
            if !template.is_absolute() {
                anyhow::bail!("makefile_template must be an absolute path");
            }
        }

        Ok(())
    }

    /// Home directory of the local user.
    pub fn home(&self) -> PathBuf {
        self.home_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/home").join(&self.local_user))
    }

    /// Checkout directory of Caffe.
    pub fn caffe_dir(&self) -> PathBuf {
        self.software_dir.join("caffe")
    }

    /// File name of the bundled cuDNN tarball.
    pub fn cudnn_filename(&self) -> String {
        format!("{}.tgz", self.cudnn_tarball_name_wo_tgz)
    }

    /// Where the bundled cuDNN tarball is looked up.
    pub fn cudnn_source(&self) -> PathBuf {
        self.files_dir
            .join("cudnn-tarball")
            .join(self.cudnn_filename())
    }

    /// Bindings handed to the Makefile.config template.
    pub fn template_vars(&self, cudnn_installed: bool) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert("cudnn_installed".into(), json!(cudnn_installed));
        vars.insert("software_dir".into(), json!(self.software_dir.display().to_string()));
        vars.insert("local_prefix".into(), json!(self.local_prefix.display().to_string()));
        vars.insert("cuda_dir".into(), json!(self.local_prefix.join("cuda").display().to_string()));
        vars
    }
}

fn validate_account_name(field: &str, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("{} must be specified", field);
    }
    if name.len() > 32 {
        anyhow::bail!("{} must be at most 32 characters long", field);
    }
    if let Some(first_char) = name.chars().next() {
        if !(first_char.is_ascii_lowercase() || first_char == '_') {
            anyhow::bail!("{} must start with a lowercase letter or underscore", field);
        }
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        anyhow::bail!(
            "{} can only contain lowercase letters, digits, underscores and dashes",
            field
        );
    }
    Ok(())
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            software_dir: PathBuf::from("/opt/software"),
            local_user: "ubuntu".to_string(),
            local_group: "ubuntu".to_string(),
            home_dir: None,
            os_version: None,
            caffe_packages: [
                "libprotobuf-dev",
                "libleveldb-dev",
                "libsnappy-dev",
                "libopencv-dev",
                "libboost-all-dev",
                "libhdf5-serial-dev",
                "protobuf-compiler",
                "gcc-4.6",
                "g++-4.6",
                "gcc-4.6-multilib",
                "g++-4.6-multilib",
                "gfortran",
                "libjpeg62",
                "libfreeimage-dev",
                "libatlas-base-dev",
                "git",
                "python-dev",
                "python-pip",
                "libgflags-dev",
                "libgoogle-glog-dev",
                "liblmdb-dev",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            cuda_repo_package: "cuda-repo-ubuntu1404_7.5-18_amd64".to_string(),
            cuda_repo_url: "http://developer.download.nvidia.com/compute/cuda/repos/ubuntu1404/x86_64/cuda-repo-ubuntu1404_7.5-18_amd64.deb".to_string(),
            cuda_lib_dir: PathBuf::from("/usr/local/cuda-7.5/targets/x86_64-linux/lib"),
            files_dir: PathBuf::from("/etc/rigup/files"),
            cudnn_tarball_name_wo_tgz: "cudnn-7.0-linux-x64-v3.0-prod".to_string(),
            cudnn_library_version: "7.0.64".to_string(),
            caffe_repository: "https://github.com/BVLC/caffe.git".to_string(),
            caffe_revision: "6eae122a8eb84f8371dde815986cd7524fc4cbaa".to_string(),
            make_jobs: 8,
            makefile_template: None,
            local_prefix: PathBuf::from("/usr/local"),
            ld_conf_dir: PathBuf::from("/etc/ld.so.conf.d"),
            cron_dir: PathBuf::from("/etc/cron.d"),
            profile_dir: PathBuf::from("/etc/profile.d"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ProvisionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ProvisionConfig =
            serde_json::from_str(r#"{ "local_user": "caffe", "make_jobs": 4 }"#).unwrap();
        assert_eq!(config.local_user, "caffe");
        assert_eq!(config.make_jobs, 4);
        assert_eq!(config.local_group, "ubuntu");
        assert_eq!(config.home(), PathBuf::from("/home/caffe"));
    }

    #[test]
    fn test_rejects_branch_revision() {
        let config = ProvisionConfig {
            caffe_revision: "master".into(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "caffe_revision must be a 40-character commit hash");
    }

    #[test]
    fn test_rejects_relative_software_dir() {
        let config = ProvisionConfig {
            software_dir: PathBuf::from("software"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_user() {
        let config = ProvisionConfig {
            local_user: "Bad User".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rigup.json");
        let config = ProvisionConfig {
            os_version: Some("3.13.0-65-generic".into()),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(ProvisionConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rigup.json");
        fs::write(
            &path,
            r#"{ "files_dir": "files", "makefile_template": "templates/Makefile.config.tmpl" }"#,
        )
        .unwrap();

        let config = ProvisionConfig::load_from_file(&path).unwrap();
        let base = dir.path().canonicalize().unwrap();
        assert_eq!(config.files_dir, base.join("files"));
        assert_eq!(
            config.makefile_template,
            Some(base.join("templates/Makefile.config.tmpl"))
        );
        assert!(config.cudnn_source().starts_with(&base));
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_relative_files_dir() {
        let config = ProvisionConfig {
            files_dir: PathBuf::from("files"),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "files_dir must be an absolute path");

        let config = ProvisionConfig {
            makefile_template: Some(PathBuf::from("Makefile.config.tmpl")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cudnn_paths() {
        let config = ProvisionConfig::default();
        assert_eq!(config.cudnn_filename(), "cudnn-7.0-linux-x64-v3.0-prod.tgz");
        assert_eq!(
            config.cudnn_source(),
            PathBuf::from("/etc/rigup/files/cudnn-tarball/cudnn-7.0-linux-x64-v3.0-prod.tgz")
        );
    }
}
