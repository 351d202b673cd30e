//! `undercity`: thin facade re-exporting the orchestration engine
//! (`undercity-core`) and git plumbing (`undercity-git`) as one crate for
//! library consumers who don't need the CLI.

pub use undercity_core::*;

pub mod git {
    pub use undercity_git::*;
}
