//! GPU Caffe build host.
//!
//! # Step Flow
//!
//! | Phase        | Steps |
//! |--------------|-------|
//! | Base         | apt index refresh, toolchain packages |
//! | Layout       | software directory owned by the local user |
//! | Kernel       | headers / image / image-extra for `os_version` |
//! | Dependencies | `caffe_packages` |
//! | CUDA         | repo .deb → `dpkg -i` → index refresh (notification chain), `cuda` |
//! | cuDNN        | only when the tarball is bundled: copy, extract, install, symlinks |
//! | Linker       | `ld.so.conf.d` entry → `ldconfig` |
//! | Caffe        | pinned checkout, Makefile.config, python reqs, build → tests → pycaffe |
//! | Environment  | reboot cron fix, `PATH` and `PYTHONPATH` exports |
//!
//! Whether cuDNN is bundled is decided when the recipe is built, not when it
//! runs, so the Makefile.config binding and the cuDNN steps always agree.

use crate::config_file::ProvisionConfig;
use crate::error::{Result, RigupError};
use crate::recipe::Recipe;
use crate::step::{Step, StepId};
use crate::types::{StepKind, Timing};
use std::fs;
use tracing::{debug, info, warn};

use super::base;

const MAKEFILE_CONFIG: &str = include_str!("../../templates/Makefile.config.tmpl");

/// Marker left in the user's home once python requirements are installed.
const PYTHON_REQS_MARKER: &str = ".caffe-python-reqs-installed";

pub const INSTALL_CUDA_REPO: &str = "install-cuda-repo";
pub const REFRESH_CUDA_REPO: &str = "apt-get update cuda-repo";
pub const LDCONFIG: &str = "ldconfig";
pub const BUILD_CAFFE: &str = "build-caffe";
pub const BUILD_CAFFE_TESTS: &str = "build-caffe-tests";
pub const BUILD_CAFFE_PYTHON: &str = "build-caffe-python";

fn execute_id(name: &str) -> StepId {
    StepId::new(StepKind::Execute, name)
}

/// Build the Caffe recipe for `config`.
///
/// # Errors
///
/// - `os_version` is unset (callers detect it with `uname -r` first)
/// - a custom `makefile_template` cannot be read
pub fn caffe(config: &ProvisionConfig) -> Result<Recipe> {
    let os_version = config
        .os_version
        .as_deref()
        .ok_or_else(|| RigupError::config("os_version is not set"))?;
    let user = config.local_user.as_str();
    let group = config.local_group.as_str();
    let software_dir = &config.software_dir;
    let caffe_dir = config.caffe_dir();

    let mut recipe = Recipe::new("caffe")
        .include(base(config))
        .step(Step::directory(software_dir).user(user).group(group));

    // Kernel headers and images matching the running kernel
    for prefix in ["linux-headers", "linux-image", "linux-image-extra"] {
        recipe.push(Step::package(format!("{}-{}", prefix, os_version)));
    }

    for package in &config.caffe_packages {
        let step = Step::package(package.as_str());
        if recipe.find(&step.id).is_some() {
            debug!("{} already declared, skipping duplicate", step.id);
            continue;
        }
        recipe.push(step);
    }

    // CUDA repository: download once, register, refresh the index
    let repo_deb = software_dir.join(&config.cuda_repo_package);
    recipe = recipe
        .step(
            Step::remote_file(&repo_deb, config.cuda_repo_url.as_str())
                .user(user)
                .group(group)
                .notifies(StepId::new(StepKind::Bash, INSTALL_CUDA_REPO), Timing::Immediate),
        )
        .step(
            Step::bash(INSTALL_CUDA_REPO, format!("dpkg -i {}", repo_deb.display()))
                .trigger_only()
                .notifies(execute_id(REFRESH_CUDA_REPO), Timing::Immediate),
        )
        .step(Step::execute(REFRESH_CUDA_REPO, "apt-get update").trigger_only())
        .step(
            Step::execute(
                "install-cuda",
                "apt-get -q -y install --no-install-recommends cuda",
            )
            .env("DEBIAN_FRONTEND", "noninteractive")
            .not_if("dpkg-query -W -f='${Status}' cuda 2>/dev/null | grep -q 'install ok installed'"),
        );

    let cudnn_installed = config.cudnn_source().is_file();
    if cudnn_installed {
        info!("cuDNN tarball found at {}", config.cudnn_source().display());
        recipe = add_cudnn(recipe, config);
    } else {
        warn!(
            "cuDNN tarball not found at {}, building without cuDNN",
            config.cudnn_source().display()
        );
    }

    recipe = recipe
        .step(
            Step::file(
                config.ld_conf_dir.join("caffe.conf"),
                format!("{}\n", config.cuda_lib_dir.display()),
            )
            .user("root")
            .group("root")
            .notifies(execute_id(LDCONFIG), Timing::Immediate),
        )
        .step(Step::execute(LDCONFIG, "ldconfig").trigger_only());

    let template_source = match config.makefile_template {
        Some(ref path) => fs::read_to_string(path).map_err(|e| {
            RigupError::config(format!("cannot read template {}: {}", path.display(), e))
        })?,
        None => MAKEFILE_CONFIG.to_string(),
    };

    let marker = config.home().join(PYTHON_REQS_MARKER);
    let jobs = config.make_jobs;

    recipe = recipe
        .step(
            Step::git(
                &caffe_dir,
                config.caffe_repository.as_str(),
                config.caffe_revision.as_str(),
            )
            .user(user)
            .group(group),
        )
        .step(
            Step::template(
                caffe_dir.join("Makefile.config"),
                template_source,
                config.template_vars(cudnn_installed),
            )
            .mode(0o644)
            .user(user)
            .group(group),
        )
        .step(
            Step::execute(
                "install-python-reqs",
                format!(
                    "(for req in $(cat requirements.txt); do pip install $req; done) && touch {m} && chown {u}:{g} {m}",
                    m = marker.display(),
                    u = user,
                    g = group
                ),
            )
            .cwd(caffe_dir.join("python"))
            .creates(&marker),
        )
        .step(
            Step::execute(BUILD_CAFFE, format!("make all -j{}", jobs))
                .cwd(&caffe_dir)
                .creates(caffe_dir.join("build"))
                .user(user)
                .group(group)
                .notifies(execute_id(BUILD_CAFFE_TESTS), Timing::Immediate),
        )
        .step(
            Step::execute(BUILD_CAFFE_TESTS, format!("make test -j{}", jobs))
                .cwd(&caffe_dir)
                .trigger_only()
                .user(user)
                .group(group)
                .notifies(execute_id(BUILD_CAFFE_PYTHON), Timing::Immediate),
        )
        .step(
            Step::execute(BUILD_CAFFE_PYTHON, "make pycaffe")
                .cwd(&caffe_dir)
                .trigger_only()
                .user(user)
                .group(group),
        )
        // /dev links are cleared on shutdown, so this has to run on every boot
        .step(Step::cron_d(
            "fix-libdc1394-warning",
            &config.cron_dir,
            "@reboot",
            "ln -s /dev/null /dev/raw1394",
        ))
        .step(Step::shell_environment(
            "PATH",
            &config.profile_dir,
            format!("$PATH:{}", caffe_dir.join("build/tools").display()),
        ))
        .step(Step::shell_environment(
            "PYTHONPATH",
            &config.profile_dir,
            format!("$PYTHONPATH:{}", caffe_dir.join("python").display()),
        ));

    Ok(recipe)
}

/// cuDNN: copy the bundled tarball, extract it, install header and
/// libraries under `local_prefix`, and link the sonames.
fn add_cudnn(recipe: Recipe, config: &ProvisionConfig) -> Recipe {
    let user = config.local_user.as_str();
    let group = config.local_group.as_str();
    let software_dir = &config.software_dir;
    let filename = config.cudnn_filename();
    let include_dir = config.local_prefix.join("include");
    let lib_dir = config.local_prefix.join("lib");
    let extracted = software_dir.join("cuda");

    let version = config.cudnn_library_version.as_str();
    let soname = soname_of(version);
    let full_lib = format!("libcudnn.so.{}", version);

    let mut recipe = recipe
        .step(
            Step::cookbook_file(software_dir.join(&filename), config.cudnn_source())
                .mode(0o644)
                .user(user)
                .group(group),
        )
        .step(
            Step::execute(format!("tar -zxf {}", filename), format!("tar -zxf {}", filename))
                .cwd(software_dir)
                .creates(extracted.join("include/cudnn.h"))
                .user(user)
                .group(group),
        )
        .step(
            Step::execute(
                format!("cp cudnn.h {}", include_dir.display()),
                format!("cp cudnn.h {}", include_dir.display()),
            )
            .cwd(extracted.join("include"))
            .creates(include_dir.join("cudnn.h")),
        );

    for lib in ["libcudnn_static.a".to_string(), full_lib.clone()] {
        let command = format!("cp {} {}", lib, lib_dir.display());
        recipe.push(
            Step::execute(command.clone(), command)
                .cwd(extracted.join("lib64"))
                .creates(lib_dir.join(&lib)),
        );
    }

    let soname_lib = format!("libcudnn.so.{}", soname);
    recipe
        .step(Step::link(lib_dir.join(&soname_lib), lib_dir.join(&full_lib)))
        .step(Step::link(lib_dir.join("libcudnn.so"), lib_dir.join(&soname_lib)))
}

/// `7.0.64` → `7.0`
fn soname_of(version: &str) -> String {
    version.splitn(3, '.').take(2).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soname_of() {
        assert_eq!(soname_of("7.0.64"), "7.0");
        assert_eq!(soname_of("5"), "5");
    }

    #[test]
    fn test_requires_os_version() {
        let err = caffe(&ProvisionConfig::default()).unwrap_err();
        assert!(matches!(err, RigupError::Config(_)));
    }

    #[test]
    fn test_builtin_template_renders() {
        let config = ProvisionConfig::default();
        let out = crate::template::render(MAKEFILE_CONFIG, &config.template_vars(false)).unwrap();
        assert!(out.contains("# USE_CUDNN := 1"));
        assert!(out.contains("CUDA_DIR := /usr/local/cuda"));
    }
}
