//! Device and board resolution.
//!
//! Matches the context's device/board selections against the model, picks
//! processors, and derives the target attribute set that drives condition
//! evaluation and component filtering.

use crate::context::{BoardSpec, Context, DeviceSpec};
use crate::diagnostics::Diagnostics;
use anyhow::{bail, Result};
use rtemodel::{Device, DeviceRef, Processor, RteModel, TargetAttributes};

/// Resolve board and device for a context and populate its target
/// attributes. Attribute incompatibilities between the device and the
/// user's processor selection are warnings, never errors.
pub fn resolve_target(
    context: &mut Context,
    model: &RteModel,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let mut device_spec = context.device_item.clone();

    if !context.board.is_empty() {
        let board_spec = BoardSpec::parse(&context.board);
        let board = resolve_board(context, model, &board_spec)?;
        // The board implies its mounted device unless the user overrode
        // the device; an override must be mounted or compatible.
        if device_spec.is_empty() {
            let Some(mounted) = board.board.mounted_devices.first() else {
                bail!(
                    "Board '{}' has no mounted device and no device was specified",
                    board.board.full_name()
                );
            };
            device_spec = DeviceSpec {
                vendor: mounted.vendor.clone(),
                name: mounted.name.clone(),
                pname: device_spec.pname.clone(),
            };
        } else {
            let known = board
                .board
                .mounted_devices
                .iter()
                .chain(board.board.compatible_devices.iter())
                .any(|d| d.name == device_spec.name);
            if !known {
                diagnostics.warning(
                    &context.name,
                    format!(
                        "Device '{}' is neither mounted on nor compatible with board '{}'",
                        device_spec.info(),
                        board.board.full_name()
                    ),
                );
            }
        }
    } else if device_spec.is_empty() {
        bail!("Missing device and/or board info");
    }

    let device = resolve_device(model, &device_spec)?;
    let processor = resolve_processor(&device_spec, device.device)?;

    context.device_item = DeviceSpec {
        vendor: device.device.vendor.clone(),
        name: device.device.name.clone(),
        pname: processor.pname.clone(),
    };
    context.device = context.device_item.info();
    context.device_pack = Some(device.pack.id.to_string());

    let mut attributes = TargetAttributes::new();
    attributes.set("Dname", device.device.name.clone());
    attributes.set("Dvendor", device.device.vendor.clone());
    for (key, value) in processor.attributes() {
        attributes.set(key, value);
    }
    if !context.board_item.is_empty() {
        attributes.set("Bname", context.board_item.name.clone());
        attributes.set("Bvendor", context.board_item.vendor.clone());
        attributes.set("Brevision", context.board_item.revision.clone());
    }
    apply_processor_options(context, &processor, &mut attributes, diagnostics);
    context.target_attributes = attributes;
    Ok(())
}

fn resolve_board<'a>(
    context: &mut Context,
    model: &'a RteModel,
    spec: &BoardSpec,
) -> Result<rtemodel::BoardRef<'a>> {
    let matches = model.find_boards(&spec.name, &spec.vendor, &spec.revision);
    if matches.is_empty() {
        bail!("Board '{}' was not found among the installed packs", spec.info());
    }
    if matches.len() > 1 {
        let candidates: Vec<String> = matches
            .iter()
            .map(|b| format!("{} ({})", b.board.full_name(), b.pack.id))
            .collect();
        bail!(
            "Board '{}' is ambiguous, add the revision to the selection: {}",
            spec.info(),
            candidates.join(", ")
        );
    }
    let board = matches[0];
    context.board_item = BoardSpec {
        vendor: board.board.vendor.clone(),
        name: board.board.name.clone(),
        revision: board.board.revision.clone(),
    };
    context.board = context.board_item.info();
    context.board_pack = Some(board.pack.id.to_string());
    Ok(board)
}

fn resolve_device<'a>(model: &'a RteModel, spec: &DeviceSpec) -> Result<DeviceRef<'a>> {
    let matches = model.find_devices(&spec.name, &spec.vendor);
    let Some(device) = matches.first() else {
        bail!(
            "Device '{}' was not found among the installed packs",
            spec.info()
        );
    };
    // A device with sub-variants cannot be selected directly; the user
    // must name one of the variants.
    if !device.device.variants.is_empty() {
        bail!(
            "Device '{}' has variants, select one of: {}",
            spec.info(),
            device.device.variants.join(", ")
        );
    }
    Ok(*device)
}

fn resolve_processor(spec: &DeviceSpec, device: &Device) -> Result<Processor> {
    match device.processor(&spec.pname) {
        Some(processor) => Ok(processor.clone()),
        None => {
            if spec.pname.is_empty() {
                bail!(
                    "Device '{}' has multiple processors, select one of: {}",
                    device.name,
                    device.processor_names().join(", ")
                );
            }
            bail!(
                "Processor '{}' was not found on device '{}', available: {}",
                spec.pname,
                device.name,
                device.processor_names().join(", ")
            );
        }
    }
}

/// Fold the user's `processor:` options into the attribute set, warning
/// when the device does not offer the requested capability.
fn apply_processor_options(
    context: &Context,
    processor: &Processor,
    attributes: &mut TargetAttributes,
    diagnostics: &mut Diagnostics,
) {
    let options = context.controls.processed.processor.clone();
    let name = context.name.clone();

    if let Some(fpu) = &options.fpu {
        let value = match fpu.as_str() {
            "dp" => "DP_FPU",
            "sp" => "SP_FPU",
            "on" => "FPU",
            _ => "NO_FPU",
        };
        if value != "NO_FPU" && (processor.fpu.is_empty() || processor.fpu == "NO_FPU") {
            diagnostics.warning(
                &name,
                format!(
                    "Device '{}' reports no FPU but 'fpu: {fpu}' was requested",
                    context.device_item.info()
                ),
            );
        }
        attributes.set("Dfpu", value);
    }
    if let Some(dsp) = &options.dsp {
        let value = if dsp == "on" { "DSP" } else { "NO_DSP" };
        if value == "DSP" && (processor.dsp.is_empty() || processor.dsp == "NO_DSP") {
            diagnostics.warning(
                &name,
                format!(
                    "Device '{}' reports no DSP extension but 'dsp: on' was requested",
                    context.device_item.info()
                ),
            );
        }
        attributes.set("Ddsp", value);
    }
    if let Some(mve) = &options.mve {
        let value = match mve.as_str() {
            "fp" => "FP_MVE",
            "int" => "MVE",
            _ => "NO_MVE",
        };
        if value != "NO_MVE" && (processor.mve.is_empty() || processor.mve == "NO_MVE") {
            diagnostics.warning(
                &name,
                format!(
                    "Device '{}' reports no MVE extension but 'mve: {mve}' was requested",
                    context.device_item.info()
                ),
            );
        }
        attributes.set("Dmve", value);
    }
    if let Some(endian) = &options.endian {
        // Configurable endianness is silently allowed.
        let value = match endian.as_str() {
            "big" => "Big-endian",
            _ => "Little-endian",
        };
        attributes.set("Dendian", value);
    }
    if let Some(trustzone) = &options.trustzone {
        let value = match trustzone.as_str() {
            "secure" => "Secure",
            "secure-only" => "Secure-only",
            "non-secure" => "Non-secure",
            _ => "TZ-disabled",
        };
        if value != "TZ-disabled"
            && (processor.trustzone.is_empty() || processor.trustzone == "NO_TZ")
        {
            diagnostics.warning(
                &name,
                format!(
                    "Device '{}' reports no TrustZone but 'trustzone: {trustzone}' was \
                     requested",
                    context.device_item.info()
                ),
            );
        }
        attributes.set("Dsecure", value);
    }
    if let Some(branch_protection) = &options.branch_protection {
        let value = match branch_protection.as_str() {
            "bti" => "BTI",
            "bti-signret" => "BTI_SIGNRET",
            _ => "NO_BRANCH_PROT",
        };
        attributes.set("Dbranchprot", value);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::ProcessorSettings;
    use rtemodel::{Board, DeviceIdentifier, Pack, PackId, RteModel};
    use semver::Version;

    fn model() -> RteModel {
        let mut pack = Pack {
            id: PackId {
                vendor: "ARM".to_string(),
                name: "DFP".to_string(),
                version: Version::new(1, 0, 0),
            },
            ..Default::default()
        };
        pack.devices.push(Device {
            vendor: "ARM".to_string(),
            name: "ARMCM3".to_string(),
            processors: vec![Processor {
                core: "Cortex-M3".to_string(),
                fpu: "NO_FPU".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        pack.devices.push(Device {
            vendor: "ARM".to_string(),
            name: "Multi".to_string(),
            processors: vec![
                Processor {
                    pname: "core0".to_string(),
                    core: "Cortex-M0".to_string(),
                    ..Default::default()
                },
                Processor {
                    pname: "core1".to_string(),
                    core: "Cortex-M4".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        pack.devices.push(Device {
            vendor: "ARM".to_string(),
            name: "Parent".to_string(),
            variants: vec!["Parent_FP".to_string()],
            ..Default::default()
        });
        pack.boards.push(Board {
            vendor: "Keil".to_string(),
            name: "TestBoard".to_string(),
            revision: "Rev1".to_string(),
            mounted_devices: vec![DeviceIdentifier {
                vendor: "ARM".to_string(),
                name: "ARMCM3".to_string(),
                pname: String::new(),
            }],
            ..Default::default()
        });
        RteModel::new(vec![pack])
    }

    fn context_for(device: &str, board: &str) -> Context {
        let mut context = Context::new("App", "Debug", "A");
        context.device = device.to_string();
        context.device_item = DeviceSpec::parse(device);
        context.board = board.to_string();
        context
    }

    #[test]
    fn device_by_name() {
        let model = model();
        let mut diagnostics = Diagnostics::new();
        let mut context = context_for("ARMCM3", "");
        resolve_target(&mut context, &model, &mut diagnostics).unwrap();
        assert_eq!(context.device, "ARM::ARMCM3");
        assert_eq!(context.device_pack.as_deref(), Some("ARM::DFP@1.0.0"));
        assert_eq!(context.target_attributes.get("Dcore"), Some("Cortex-M3"));
    }

    #[test]
    fn board_implies_mounted_device() {
        let model = model();
        let mut diagnostics = Diagnostics::new();
        let mut context = context_for("", "TestBoard");
        resolve_target(&mut context, &model, &mut diagnostics).unwrap();
        assert_eq!(context.board, "Keil::TestBoard:Rev1");
        assert_eq!(context.device_item.name, "ARMCM3");
        assert_eq!(context.target_attributes.get("Bname"), Some("TestBoard"));
    }

    #[test]
    fn multi_processor_device_needs_pname() {
        let model = model();
        let mut diagnostics = Diagnostics::new();
        let mut context = context_for("Multi", "");
        let err = resolve_target(&mut context, &model, &mut diagnostics).unwrap_err();
        assert!(err.to_string().contains("core0, core1"), "{err}");

        let mut context = context_for("Multi:core1", "");
        resolve_target(&mut context, &model, &mut diagnostics).unwrap();
        assert_eq!(context.target_attributes.get("Dcore"), Some("Cortex-M4"));
        assert_eq!(context.target_attributes.get("Pname"), Some("core1"));
    }

    #[test]
    fn device_with_variants_must_be_narrowed() {
        let model = model();
        let mut diagnostics = Diagnostics::new();
        let mut context = context_for("Parent", "");
        let err = resolve_target(&mut context, &model, &mut diagnostics).unwrap_err();
        assert!(err.to_string().contains("Parent_FP"), "{err}");
    }

    #[test]
    fn missing_device_and_board_is_an_error() {
        let model = model();
        let mut diagnostics = Diagnostics::new();
        let mut context = context_for("", "");
        let err = resolve_target(&mut context, &model, &mut diagnostics).unwrap_err();
        assert!(err.to_string().contains("Missing device"), "{err}");
    }

    #[test]
    fn fpu_request_on_fpuless_device_warns() {
        let model = model();
        let mut diagnostics = Diagnostics::new();
        let mut context = context_for("ARMCM3", "");
        context.controls.processed.processor = ProcessorSettings {
            fpu: Some("dp".to_string()),
            ..Default::default()
        };
        resolve_target(&mut context, &model, &mut diagnostics).unwrap();
        let messages = diagnostics.context_messages("App.Debug+A").unwrap();
        assert!(messages.warnings[0].contains("no FPU"), "{:?}", messages);
        assert_eq!(context.target_attributes.get("Dfpu"), Some("DP_FPU"));
    }
}
