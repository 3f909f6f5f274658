//! Build-time tooling for the documentation site: TOC category annotation,
//! related-link enrichment, man-page preprocessing, and build-requirements
//! generation. The `doctool` binary crate wires these into a CLI.

pub mod config;
pub mod links;
pub mod manpages;
pub mod metadata;
pub mod requirements;
pub mod runtime;
pub mod toc;
pub mod youtube;
