//! Structural validation of input documents.
//!
//! The loader itself is permissive; this pass walks the raw YAML tree and
//! flags keys that no input format defines. It stands in for the external
//! schema validator of the distribution and is switched off by
//! `--no-check-schema`.

use serde_yaml::Value;
use std::collections::BTreeSet;

/// Keys whose subtree carries user-defined names (define names, variable
/// names, connection keys, generator ids) and must not be key-checked.
const OPAQUE_KEYS: &[&str] = &[
    "define",
    "define-asm",
    "undefine",
    "variables",
    "provides",
    "consumes",
    "options",
    "custom",
];

/// Every key any of the input formats defines.
const KNOWN_KEYS: &[&str] = &[
    // document roots
    "solution",
    "project",
    "layer",
    "default",
    "cbuild-set",
    "cbuild-pack",
    "debug-adapters",
    // solution level
    "description",
    "created-for",
    "cdefault",
    "select-compiler",
    "output-dirs",
    "outdir",
    "tmpdir",
    "intdir",
    "cprjdir",
    "rtedir",
    "packs",
    "pack",
    "path",
    "target-types",
    "build-types",
    "type",
    "projects",
    "executes",
    "execute",
    "run",
    "always",
    "input",
    "output",
    "generators",
    "base-dir",
    "name",
    "map",
    // build settings
    "compiler",
    "optimize",
    "debug",
    "warnings",
    "language-C",
    "language-CPP",
    "link-time-optimize",
    "add-path",
    "add-path-asm",
    "del-path",
    "misc",
    "for-compiler",
    "ASM",
    "C",
    "CPP",
    "C-CPP",
    "Link",
    "Link-C",
    "Link-CPP",
    "Library",
    "processor",
    "fpu",
    "dsp",
    "mve",
    "endian",
    "trustzone",
    "branch-protection",
    "context-map",
    "context",
    // target types
    "board",
    "device",
    "memory",
    "access",
    "start",
    "size",
    "algorithm",
    "target-set",
    "set",
    "info",
    "images",
    "image",
    "load",
    "load-offset",
    "pname",
    "debugger",
    "protocol",
    "clock",
    "dbgconf",
    "start-pname",
    // project level
    "for-context",
    "not-for-context",
    "base-name",
    "rte",
    "components",
    "component",
    "condition",
    "from-pack",
    "instances",
    "groups",
    "group",
    "files",
    "file",
    "category",
    "link",
    "layers",
    "layer",
    "optional",
    "setups",
    "setup",
    "connections",
    "connect",
    "linker",
    "auto",
    "regions",
    "script",
    // layer level
    "for-board",
    "for-device",
    // cbuild-set / cbuild-pack
    "generated-by",
    "contexts",
    "resolved-packs",
    "resolved-pack",
    "selected-by-pack",
    "selected-by",
    // debug adapters
    "alias",
    "template",
    "defaults",
    "port",
];

/// Validate the raw document. Returns the list of offending key paths.
pub fn check_unknown_keys(root: &Value) -> Vec<String> {
    let known: BTreeSet<&str> = KNOWN_KEYS.iter().copied().collect();
    let mut findings = Vec::new();
    walk(root, &known, "", &mut findings);
    findings
}

fn walk(value: &Value, known: &BTreeSet<&str>, path: &str, findings: &mut Vec<String>) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let Some(key) = key.as_str() else {
                    continue;
                };
                let child_path = if path.is_empty() {
                    key.to_string()
                } else {
                    format!("{path}/{key}")
                };
                if OPAQUE_KEYS.contains(&key) {
                    continue;
                }
                if !known.contains(key) {
                    findings.push(child_path);
                    continue;
                }
                walk(child, known, &child_path, findings);
            }
        }
        Value::Sequence(seq) => {
            for child in seq {
                walk(child, known, path, findings);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_known_structure() {
        let value: Value = serde_yaml::from_str(
            r#"
solution:
  target-types:
    - type: A
      device: ARMCM3
  build-types:
    - type: Debug
      define:
        - ANYTHING_GOES: 1
"#,
        )
        .unwrap();
        assert!(check_unknown_keys(&value).is_empty());
    }

    #[test]
    fn flags_unknown_keys_with_path() {
        let value: Value = serde_yaml::from_str(
            r#"
solution:
  target-typs:
    - type: A
  build-types:
    - type: Debug
      optimise: balanced
"#,
        )
        .unwrap();
        let findings = check_unknown_keys(&value);
        assert_eq!(
            findings,
            vec!["solution/target-typs", "solution/build-types/optimise"]
        );
    }
}
