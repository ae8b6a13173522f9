//! Built-in recipes.
//!
//! Recipes are plain functions from a [`ProvisionConfig`](crate::config_file::ProvisionConfig)
//! to a [`Recipe`](crate::recipe::Recipe); composing them is `Recipe::include`.
//!
//! - `base` — package index refresh and toolchain packages
//! - `caffe` — CUDA, optional cuDNN, and a pinned Caffe build

pub mod base;
pub mod caffe;

pub use base::base;
pub use caffe::caffe;
