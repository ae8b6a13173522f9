//! Toolchain prerequisites shared by every build host.

use crate::config_file::ProvisionConfig;
use crate::recipe::Recipe;
use crate::step::Step;

/// Packages every build host needs before anything is compiled.
pub const BASE_PACKAGES: &[&str] = &["build-essential", "git", "cron"];

/// Refresh the package index, then install [`BASE_PACKAGES`].
pub fn base(_config: &ProvisionConfig) -> Recipe {
    let mut recipe = Recipe::new("base").step(Step::execute("apt-get update", "apt-get update"));
    for package in BASE_PACKAGES {
        recipe.push(Step::package(*package));
    }
    recipe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_starts_with_index_refresh() {
        let recipe = base(&ProvisionConfig::default());
        assert_eq!(recipe.steps()[0].id.to_string(), "execute[apt-get update]");
        assert_eq!(recipe.len(), 1 + BASE_PACKAGES.len());
        recipe.validate().unwrap();
    }
}
