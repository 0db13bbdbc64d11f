//! Access sequence expansion.
//!
//! YAML values may embed `$...$` sequences: static variables of the
//! current context, output sequences referencing other contexts, pack
//! locations and user variables. Cross-context sequences require the
//! referenced context to be processed first; the worker guarantees that
//! through memoised recursion and records the reference for the build
//! dependency graph.

use crate::common::{path_to_portable, portable_relative_to};
use crate::context::{Context, ContextName};
use anyhow::{bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use rtemodel::{PackSpec, RteModel, VersionRange};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

lazy_static! {
    static ref SEQUENCE_RE: Regex =
        Regex::new(r"\$(?P<name>[A-Za-z][A-Za-z0-9_-]*)(\((?P<arg>[^()$]*)\))?\$").unwrap();
}

/// The sequences that reference another context's output.
const OUTPUT_SEQUENCES: &[&str] = &["OutDir", "Elf", "Bin", "Hex", "Lib", "Cmse", "Map"];

/// Everything expansion needs to read, with the current context already
/// processed up to precedences.
pub struct ExpansionEnv<'a> {
    pub context: &'a Context,
    pub contexts: &'a BTreeMap<String, Context>,
    pub model: &'a RteModel,
    pub solution_name: &'a str,
    pub solution_dir: &'a Path,
}

/// Context names referenced by output sequences inside a value, raw as
/// written.
pub fn find_context_refs(value: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for captures in SEQUENCE_RE.captures_iter(value) {
        let name = &captures["name"];
        if OUTPUT_SEQUENCES.contains(&name) {
            let arg = captures.name("arg").map_or("", |m| m.as_str());
            if !arg.is_empty() {
                refs.push(arg.to_string());
            }
        }
    }
    refs
}

/// Resolve a context reference `project[.build][+target]` against the
/// current context; empty parts inherit from the current context, and
/// `context-map` entries of the current context redirect the result.
pub fn resolve_context_ref(
    arg: &str,
    current: &Context,
    known: &BTreeSet<String>,
) -> Result<String> {
    let parsed = ContextName::parse(arg)?;
    let project = if parsed.project.is_empty() {
        current.project_name.clone()
    } else {
        parsed.project.clone()
    };
    let mut build = if parsed.build.is_empty() {
        current.type_pair.build.clone()
    } else {
        parsed.build.clone()
    };
    let mut target = if parsed.target.is_empty() {
        current.type_pair.target.clone()
    } else {
        parsed.target.clone()
    };
    for entry in &current.controls.processed.context_map {
        if entry.project == project {
            if !entry.build.is_empty() {
                build = entry.build.clone();
            }
            if !entry.target.is_empty() {
                target = entry.target.clone();
            }
        }
    }
    let name = ContextName::format(&project, &build, &target);
    if known.contains(&name) {
        return Ok(name);
    }
    // A context without the build-type part also resolves.
    let short = ContextName::format(&project, "", &target);
    if known.contains(&short) {
        return Ok(short);
    }
    bail!(
        "Context '{arg}' referenced by an access sequence is not among the selected \
         contexts"
    );
}

/// Expand every sequence in a value.
///
/// `used_packs` collects the pack ids consumed through `$Pack(...)$`;
/// `undefined` collects unknown user variables, which expand to an empty
/// string and are reported by the caller.
pub fn expand(
    value: &str,
    env: &ExpansionEnv<'_>,
    used_packs: &mut BTreeSet<String>,
    undefined: &mut BTreeSet<String>,
) -> Result<String> {
    let mut out = String::new();
    let mut last = 0;
    for captures in SEQUENCE_RE.captures_iter(value) {
        let whole = captures.get(0).unwrap();
        out.push_str(&value[last..whole.start()]);
        last = whole.end();

        let name = &captures["name"];
        let arg = captures.name("arg").map_or("", |m| m.as_str());
        let has_parens = captures.get(2).is_some();
        let replacement = match (name, has_parens) {
            ("Solution", false) => env.solution_name.to_string(),
            ("SolutionDir", true) => path_to_portable(env.solution_dir),
            ("Project", false) => env.context.project_name.clone(),
            ("ProjectDir", true) => project_dir(env, arg)?,
            ("BuildType", false) => env.context.type_pair.build.clone(),
            ("TargetType", false) => env.context.type_pair.target.clone(),
            ("Dname", false) => env.context.device_item.name.clone(),
            ("Pname", false) => env.context.device_item.pname.clone(),
            ("Bname", false) => env.context.board_item.name.clone(),
            ("Compiler", false) => env.context.toolchain.name.clone(),
            ("Pack", true) => pack_dir(env, arg, used_packs)?,
            (name, true) if OUTPUT_SEQUENCES.contains(&name) => {
                output_sequence(env, name, arg)?
            }
            (name, false) => match env.context.variables.get(name) {
                Some(value) => value.clone(),
                None => {
                    undefined.insert(name.to_string());
                    String::new()
                }
            },
            (name, true) => bail!("Unknown access sequence '${name}(...)$'"),
        };
        out.push_str(&replacement);
    }
    out.push_str(&value[last..]);
    Ok(out)
}

fn project_dir(env: &ExpansionEnv<'_>, arg: &str) -> Result<String> {
    if arg.is_empty() {
        return Ok(path_to_portable(&env.context.cproject.directory));
    }
    let referenced = referenced_context(env, arg)?;
    Ok(path_to_portable(&referenced.cproject.directory))
}

fn referenced_context<'a>(env: &'a ExpansionEnv<'_>, arg: &str) -> Result<&'a Context> {
    let known: BTreeSet<String> = env
        .contexts
        .keys()
        .cloned()
        .chain([env.context.name.clone()])
        .collect();
    let name = resolve_context_ref(arg, env.context, &known)?;
    if name == env.context.name {
        return Ok(env.context);
    }
    let referenced = &env.contexts[&name];
    if !referenced.precedences_done {
        bail!(
            "Context '{name}' referenced by an access sequence has not been processed; \
             this indicates a cyclic context reference"
        );
    }
    Ok(referenced)
}

fn output_sequence(env: &ExpansionEnv<'_>, name: &str, arg: &str) -> Result<String> {
    let referenced = if arg.is_empty() {
        env.context
    } else {
        referenced_context(env, arg)?
    };
    if name == "OutDir" {
        return Ok(path_to_portable(&referenced.directories.outdir));
    }
    let key = name.to_lowercase();
    match referenced.outputs.get(&key) {
        Some(filename) => Ok(path_to_portable(
            &referenced.directories.outdir.join(filename),
        )),
        None => bail!(
            "Context '{}' does not produce a '{key}' output required by '${name}(...)$'",
            referenced.name
        ),
    }
}

fn pack_dir(
    env: &ExpansionEnv<'_>,
    arg: &str,
    used_packs: &mut BTreeSet<String>,
) -> Result<String> {
    let (id, range) = match arg.split_once('@') {
        None => (arg, VersionRange::any()),
        Some((id, version)) => {
            let range = match version.strip_prefix(">=") {
                Some(min) => VersionRange::from_min(rtemodel::parse_lenient(min)?),
                None => VersionRange::exact(rtemodel::parse_lenient(version)?),
            };
            (id, range)
        }
    };
    let Some((vendor, pack_name)) = id.split_once("::") else {
        bail!("Invalid pack reference '$Pack({arg})$', expected 'vendor::name'");
    };
    let spec = PackSpec {
        vendor: vendor.to_string(),
        name: pack_name.to_string(),
        version_range: range,
    };
    let pack = env
        .model
        .packs()
        .iter()
        .filter(|p| spec.matches_name(&p.id.vendor, &p.id.name))
        .filter(|p| spec.version_range.contains(&p.id.version))
        .max_by(|a, b| rtemodel::compare_versions(&a.id.version, &b.id.version));
    match pack {
        Some(pack) => {
            used_packs.insert(pack.id.to_string());
            Ok(path_to_portable(&pack.path))
        }
        None => bail!("Pack '{arg}' referenced by '$Pack(...)$' is not loaded"),
    }
}

/// Post-expansion normalisation: absolute paths become relative to the
/// given directory, optionally with a leading `./`.
pub fn relative_to_dir(value: &str, dir: &Path, with_heading_dot: bool) -> String {
    let path = Path::new(value);
    if !path.is_absolute() {
        return value.to_string();
    }
    let relative = portable_relative_to(path, dir);
    if with_heading_dot && !relative.starts_with('.') {
        format!("./{relative}")
    } else {
        relative
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rtemodel::{Pack, PackId};
    use semver::Version;
    use std::path::PathBuf;

    fn model_with_pack() -> RteModel {
        let pack = Pack {
            id: PackId {
                vendor: "ARM".to_string(),
                name: "CMSIS".to_string(),
                version: Version::new(6, 0, 0),
            },
            path: PathBuf::from("/packs/ARM/CMSIS/6.0.0"),
            ..Default::default()
        };
        RteModel::new(vec![pack])
    }

    fn contexts() -> BTreeMap<String, Context> {
        let mut boot = Context::new("Boot", "", "TZ");
        boot.precedences_done = true;
        boot.directories.outdir = PathBuf::from("/sln/out/Boot/TZ");
        boot.outputs.insert("elf".to_string(), "Boot.axf".to_string());

        let mut app = Context::new("App", "", "TZ");
        app.precedences_done = true;
        app.device_item = crate::context::DeviceSpec::parse("ARM::ARMCM33");
        app.toolchain.name = "AC6".to_string();
        app.directories.outdir = PathBuf::from("/sln/out/App/TZ");
        app.variables
            .insert("Board-Layer".to_string(), "./board.clayer.yml".to_string());

        let mut map = BTreeMap::new();
        map.insert(boot.name.clone(), boot);
        map.insert(app.name.clone(), app);
        map
    }

    fn expand_in<'a>(
        value: &str,
        contexts: &'a BTreeMap<String, Context>,
        model: &'a RteModel,
    ) -> Result<String> {
        let env = ExpansionEnv {
            context: &contexts["App+TZ"],
            contexts,
            model,
            solution_name: "Solution",
            solution_dir: Path::new("/sln"),
        };
        let mut used = BTreeSet::new();
        let mut undefined = BTreeSet::new();
        expand(value, &env, &mut used, &mut undefined)
    }

    #[test]
    fn static_sequences() {
        let contexts = contexts();
        let model = model_with_pack();
        assert_eq!(
            expand_in("$Solution$/$Project$+$TargetType$", &contexts, &model).unwrap(),
            "Solution/App+TZ"
        );
        assert_eq!(
            expand_in("$Dname$-$Compiler$", &contexts, &model).unwrap(),
            "ARMCM33-AC6"
        );
        assert_eq!(
            expand_in("$SolutionDir()$/extra", &contexts, &model).unwrap(),
            "/sln/extra"
        );
    }

    #[test]
    fn cross_context_output_sequences() {
        let contexts = contexts();
        let model = model_with_pack();
        assert_eq!(
            expand_in("$Elf(Boot+TZ)$", &contexts, &model).unwrap(),
            "/sln/out/Boot/TZ/Boot.axf"
        );
        assert_eq!(
            expand_in("$OutDir(Boot+TZ)$", &contexts, &model).unwrap(),
            "/sln/out/Boot/TZ"
        );
        // The build-type part defaults from the current context.
        assert_eq!(
            expand_in("$Elf(Boot)$", &contexts, &model).unwrap(),
            "/sln/out/Boot/TZ/Boot.axf"
        );
    }

    #[test]
    fn unprocessed_reference_is_an_error() {
        let mut contexts = contexts();
        contexts.get_mut("Boot+TZ").unwrap().precedences_done = false;
        let model = model_with_pack();
        let err = expand_in("$Elf(Boot+TZ)$", &contexts, &model).unwrap_err();
        assert!(err.to_string().contains("cyclic"), "{err}");
    }

    #[test]
    fn unknown_context_is_an_error() {
        let contexts = contexts();
        let model = model_with_pack();
        let err = expand_in("$Elf(Ghost+TZ)$", &contexts, &model).unwrap_err();
        assert!(err.to_string().contains("not among the selected"), "{err}");
    }

    #[test]
    fn pack_sequence_records_usage() {
        let contexts = contexts();
        let model = model_with_pack();
        let env = ExpansionEnv {
            context: &contexts["App+TZ"],
            contexts: &contexts,
            model: &model,
            solution_name: "Solution",
            solution_dir: Path::new("/sln"),
        };
        let mut used = BTreeSet::new();
        let mut undefined = BTreeSet::new();
        let out = expand(
            "$Pack(ARM::CMSIS@>=5.5.0)$/CMSIS/Core/Include",
            &env,
            &mut used,
            &mut undefined,
        )
        .unwrap();
        assert_eq!(out, "/packs/ARM/CMSIS/6.0.0/CMSIS/Core/Include");
        assert!(used.contains("ARM::CMSIS@6.0.0"));

        let err = expand("$Pack(ARM::Missing)$", &env, &mut used, &mut undefined)
            .unwrap_err();
        assert!(err.to_string().contains("not loaded"), "{err}");
    }

    #[test]
    fn user_variables_and_undefined_collection() {
        let contexts = contexts();
        let model = model_with_pack();
        let env = ExpansionEnv {
            context: &contexts["App+TZ"],
            contexts: &contexts,
            model: &model,
            solution_name: "Solution",
            solution_dir: Path::new("/sln"),
        };
        let mut used = BTreeSet::new();
        let mut undefined = BTreeSet::new();
        assert_eq!(
            expand("$Board-Layer$", &env, &mut used, &mut undefined).unwrap(),
            "./board.clayer.yml"
        );
        assert_eq!(
            expand("$Shield-Layer$", &env, &mut used, &mut undefined).unwrap(),
            ""
        );
        assert!(undefined.contains("Shield-Layer"));
    }

    #[test]
    fn context_ref_discovery() {
        let refs = find_context_refs("cmd $Elf(Boot+TZ)$ $OutDir(Other.Rel+B)$ $Dname$");
        assert_eq!(refs, vec!["Boot+TZ", "Other.Rel+B"]);
    }

    #[test]
    fn relative_normalisation() {
        assert_eq!(
            relative_to_dir("/sln/out/Boot/TZ/Boot.axf", Path::new("/sln/out/App/TZ"), false),
            "../../Boot/TZ/Boot.axf"
        );
        assert_eq!(
            relative_to_dir("/sln/file.c", Path::new("/sln"), true),
            "./file.c"
        );
        assert_eq!(relative_to_dir("./already.c", Path::new("/sln"), true), "./already.c");
    }
}
