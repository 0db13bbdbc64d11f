/*!
# Project manager core

Resolves layered csolution project descriptions against installed CMSIS
software packs and generates the derived `cbuild*.yml` build plans that
downstream build backends consume.

The library surface exists for the integration test crate and for hosts that
embed the tool; the `csolution` binary in `main.rs` is a thin wrapper.
*/

pub mod cmd;
pub mod common;
pub mod components;
pub mod context;
pub mod diagnostics;
pub mod emit;
pub mod generator;
pub mod layers;
pub mod parser;
pub mod plm;
pub mod rte;
pub mod sequences;
pub mod target;
pub mod toolchain;
pub mod worker;

/// Test helpers, compiled only for tests.
#[cfg(test)]
pub(crate) mod test;
