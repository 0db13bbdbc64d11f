//! Shared fixture builders for tests.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TEST_PDSC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package schemaVersion="1.7.7">
  <vendor>ARM</vendor>
  <name>RteTest_DFP</name>
  <description>Test device family pack</description>
  <releases>
    <release version="0.2.0" date="2023-01-01">Current</release>
  </releases>
  <conditions>
    <condition id="CM3">
      <require Dcore="Cortex-M3"/>
    </condition>
    <condition id="Needs CORE">
      <require Cclass="RteTest" Cgroup="CORE"/>
    </condition>
  </conditions>
  <devices>
    <family Dfamily="RteTest ARM Cortex M" Dvendor="ARM:82">
      <processor Dcore="Cortex-M3" Dfpu="NO_FPU" Dendian="Little-endian"/>
      <compile header="Device/Include/ARMCM3.h" define="ARMCM3"/>
      <device Dname="RteTest_ARMCM3">
        <memory name="IROM1" start="0x00000000" size="0x40000" default="1" startup="1"/>
        <memory name="IRAM1" start="0x20000000" size="0x20000" default="1"/>
      </device>
    </family>
  </devices>
  <boards>
    <board vendor="Keil" name="RteTest board" revision="Rev1">
      <description>Test board</description>
      <mountedDevice Dvendor="ARM:82" Dname="RteTest_ARMCM3"/>
    </board>
  </boards>
  <components>
    <component Cclass="RteTest" Cgroup="CORE" Cversion="0.1.1" condition="CM3">
      <description>Core component</description>
      <files>
        <file category="header" name="Include/core.h"/>
        <file category="source" name="Source/core.c"/>
      </files>
      <RTE_Components_h>#define RTE_TEST_CORE</RTE_Components_h>
    </component>
    <component Cclass="RteTest" Cgroup="Startup" Cversion="1.0.0" condition="Needs CORE">
      <description>Startup component</description>
      <files>
        <file category="source" name="Source/startup.c"/>
        <file category="source" name="Source/system.c" attr="config" version="1.0.0"/>
      </files>
    </component>
  </components>
</package>
"#;

pub fn write(path: &Path, data: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, data).unwrap();
}

/// A complete on-disk fixture: pack root, compiler root and a solution
/// with one project.
pub struct Fixture {
    pub tempdir: TempDir,
    pub pack_root: PathBuf,
    pub compiler_root: PathBuf,
    pub solution: PathBuf,
    pub solution_dir: PathBuf,
}

pub const SOLUTION_YML: &str = r#"
solution:
  compiler: AC6
  packs:
    - pack: ARM::RteTest_DFP
  target-types:
    - type: A
      device: RteTest_ARMCM3
    - type: B
      device: RteTest_ARMCM3
  build-types:
    - type: Debug
      debug: on
    - type: Release
      optimize: speed
  projects:
    - project: ./Hello.cproject.yml
"#;

pub const PROJECT_YML: &str = r#"
project:
  components:
    - component: RteTest:CORE
    - component: RteTest:Startup
  groups:
    - group: Source
      files:
        - file: ./main.c
        - file: ./only_a.c
          for-context: [+A]
"#;

/// Registers the AC6 test toolchain in the process environment; every
/// caller uses the same value, so concurrent tests do not interfere.
pub fn register_test_toolchain() {
    std::env::set_var("AC6_TOOLCHAIN_6_18_0", "/opt/ac6");
}

pub fn fixture() -> Fixture {
    fixture_with(SOLUTION_YML, PROJECT_YML)
}

pub fn fixture_with(solution_yml: &str, project_yml: &str) -> Fixture {
    register_test_toolchain();
    let tempdir = TempDir::new().unwrap();
    let root = tempdir.path();

    let pack_root = root.join("packs");
    let pack_dir = pack_root.join("ARM").join("RteTest_DFP").join("0.2.0");
    write(&pack_dir.join("ARM.RteTest_DFP.pdsc"), TEST_PDSC);
    for file in [
        "Include/core.h",
        "Source/core.c",
        "Source/startup.c",
        "Source/system.c",
        "Device/Include/ARMCM3.h",
    ] {
        write(&pack_dir.join(file), "// test content\n");
    }

    let compiler_root = root.join("etc");
    write(&compiler_root.join("AC6.6.18.0.cmake"), "");

    let solution_dir = root.join("solution");
    let solution = solution_dir.join("Hello.csolution.yml");
    write(&solution, solution_yml);
    write(&solution_dir.join("Hello.cproject.yml"), project_yml);
    write(&solution_dir.join("main.c"), "int main(void) { return 0; }\n");
    write(&solution_dir.join("only_a.c"), "void a(void) {}\n");

    Fixture {
        pack_root,
        compiler_root,
        solution,
        solution_dir,
        tempdir,
    }
}

impl Fixture {
    pub fn worker_options(&self) -> crate::worker::WorkerOptions {
        let mut options = crate::worker::WorkerOptions::new(&self.solution);
        options.pack_root = Some(self.pack_root.clone());
        options.compiler_root = Some(self.compiler_root.clone());
        options
    }
}
