/*!
# RTE model

This library owns the in-memory model of installed CMSIS software packs and
the operations the project manager needs on top of it:

* discovery of installed pack descriptions under the pack root directory and
  the local repository index,
* resolution of pack version requirements to an effective description file,
* a data model for devices, boards, components, APIs, generators, conditions
  and files read from pack descriptions,
* condition evaluation against a target filter, and
* dependency solving for a set of selected components.

The registry and the model are populated once during initialization and are
read-only afterwards; the caller owns both for the lifetime of an invocation.
*/

mod condition;
mod error;
mod model;
mod pack;
mod pdsc;
mod registry;
mod version;

pub use condition::{ConditionEvaluator, ConditionResult, EvalMode};
pub use model::{
    highest_component_version, ApiRef, BoardRef, ComponentRef, DependencyResult, DeviceRef,
    PackFilter, RteModel, SelectedComponent, TargetAttributes,
};
pub use pack::{
    Api, Board, Component, Condition, Device, DeviceIdentifier, Expression, ExpressionKind,
    FileCategory, FileItem, Generator, MemoryItem, Pack, PackId, PackLayer, PackRequirement,
    Processor, Taxonomy,
};
pub use pdsc::{read_pdsc, read_pidx, PidxEntry};
pub use registry::{EffectivePdsc, InstalledPdsc, LoadPacksPolicy, PackRegistry, PackSpec};
pub use version::{compare_versions, parse_lenient, VersionRange};

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub struct Error(error::Error);
pub type Result<T> = std::result::Result<T, Error>;
