use snafu::Snafu;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Pack root directory '{}' does not exist", path.display()))]
    PackRootMissing { path: PathBuf },

    #[snafu(display("Failed to read pack description '{}': {}", path.display(), source))]
    PdscRead { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to parse pack description '{}': {}", path.display(), reason))]
    PdscParse { path: PathBuf, reason: String },

    #[snafu(display("Failed to parse pack index '{}': {}", path.display(), reason))]
    PidxParse { path: PathBuf, reason: String },

    #[snafu(display("Required pack '{spec}' was not found among the installed packs"))]
    PackNotFound { spec: String },

    #[snafu(display(
        "Pack requirement '{spec}' is ambiguous, it matches multiple installed packs: {}. \
         Add an explicit version to the requirement.",
        candidates.join(", ")
    ))]
    MultiplePacksAmbiguous {
        spec: String,
        candidates: Vec<String>,
    },

    #[snafu(display("Local pack path '{}' does not contain a pack description", path.display()))]
    LocalPackPathMissing { path: PathBuf },

    #[snafu(display(
        "The 'required' pack load policy needs an explicit list of packs, but none was given"
    ))]
    RequiredPacksUndefined {},

    #[snafu(display("Invalid version '{value}': {reason}"))]
    VersionParse { value: String, reason: String },

    #[snafu(display("Invalid version range '{value}': {reason}"))]
    VersionRangeParse { value: String, reason: String },
}
