mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{mtime, pixel_shader, set_mtime, Harness};
use shaderfix::config::ShaderOverride;
use shaderfix::store::ArtifactKind;
use shaderfix::{ReplacementOrigin, ShaderStage};

const PS: ShaderStage = ShaderStage::Pixel;

fn name(kind: ArtifactKind, hash: u64) -> String {
    kind.file_name(hash, PS)
}

#[test]
fn valid_cache_wins_over_source() {
    let h = Harness::new(|_| {});
    let original = pixel_shader(1);
    let hash = h.hash(&original);
    let txt = h.write_fix(
        &name(ArtifactKind::HlslSource, hash),
        b"// hlsl\nvoid main() {}\n",
    );
    let bin = h.write_fix(&name(ArtifactKind::HlslBinary, hash), b"cached");
    set_mtime(&bin, mtime(&txt));

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();

    assert_eq!(found.origin, ReplacementOrigin::CachedBinary);
    assert_eq!(found.bytecode, b"cached");
    assert_eq!(found.shader_model, "bin");
    assert_eq!(found.timestamp, Some(mtime(&txt)));
    assert_eq!(found.header, "");
    assert_eq!(h.tools.compiled(), 0);
}

#[test]
fn stale_cache_falls_through_to_source() {
    let h = Harness::new(|_| {});
    let original = pixel_shader(2);
    let hash = h.hash(&original);
    let txt = h.write_fix(
        &name(ArtifactKind::HlslSource, hash),
        b"// v2\nvoid main() {}\n",
    );
    let bin = h.write_fix(&name(ArtifactKind::HlslBinary, hash), b"old build");
    set_mtime(&bin, mtime(&txt) - Duration::from_secs(3600));

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();

    assert_eq!(found.origin, ReplacementOrigin::HlslSource);
    assert_eq!(h.tools.compiled(), 1);
    assert!(found.bytecode.starts_with(b"HLSL[ps_5_0:main]"));
    assert_eq!(found.shader_model, "ps_5_0");
    assert_eq!(found.header, "// v2");
}

#[test]
fn hlsl_cache_binary_is_stamped_and_reused() {
    let h = Harness::new(|config| config.cache_shaders = true);
    let original = pixel_shader(3);
    let hash = h.hash(&original);
    let txt = h.write_fix(
        &name(ArtifactKind::HlslSource, hash),
        b"// fix\nvoid main() {}\n",
    );

    let first = h.session.resolver().resolve(hash, PS, &original).unwrap();
    let bin = h.fix_file(&name(ArtifactKind::HlslBinary, hash));
    assert_eq!(fs::read(&bin).unwrap(), first.bytecode);
    assert_eq!(mtime(&bin), mtime(&txt));

    let second = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(second.origin, ReplacementOrigin::CachedBinary);
    assert_eq!(second.bytecode, first.bytecode);
    assert_eq!(h.tools.compiled(), 1);
}

#[test]
fn resolving_twice_without_cache_gives_identical_bytes() {
    let h = Harness::new(|_| {});
    let original = pixel_shader(4);
    let hash = h.hash(&original);
    h.write_fix(
        &name(ArtifactKind::HlslSource, hash),
        b"// fix\nvoid main() {}\n",
    );

    let first = h.session.resolver().resolve(hash, PS, &original).unwrap();
    let second = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(first, second);
    assert!(!h.fix_file(&name(ArtifactKind::HlslBinary, hash)).exists());
}

#[test]
fn override_model_selects_compiler_target() {
    let original = pixel_shader(5);
    let hash = shaderfix::shader_hash(Default::default(), &original);
    let h = Harness::new(|config| {
        config.shader_overrides.push(ShaderOverride {
            hash,
            model: Some("ps_4_0".into()),
            ..ShaderOverride::default()
        })
    });
    h.write_fix(&name(ArtifactKind::HlslSource, hash), b"// fix\n");

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(h.tools.last_target().as_deref(), Some("ps_4_0"));
    assert_eq!(found.shader_model, "ps_5_0");
}

#[test]
fn failed_compile_falls_through_to_assembly() {
    let h = Harness::new(|_| {});
    let original = pixel_shader(6);
    let hash = h.hash(&original);
    h.write_fix(&name(ArtifactKind::HlslSource, hash), b"#error broken\n");
    h.write_fix(
        &name(ArtifactKind::AsmSource, hash),
        b"// asm fix\nps_5_0\nret\n",
    );

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(found.origin, ReplacementOrigin::AssemblySource);
    assert_eq!(found.header, "// asm fix");
    assert_eq!(h.tools.compiled(), 1);
    assert_eq!(h.tools.assembled(), 1);
}

#[test]
fn clean_assembly_is_cached_with_source_timestamp() {
    let h = Harness::new(|config| config.cache_shaders = true);
    let original = pixel_shader(7);
    let hash = h.hash(&original);
    let txt = h.write_fix(
        &name(ArtifactKind::AsmSource, hash),
        b"ps_5_0\nmov o0, v0\nret\n",
    );

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(found.timestamp, Some(mtime(&txt)));
    let bin = h.fix_file(&name(ArtifactKind::AsmBinary, hash));
    assert_eq!(fs::read(&bin).unwrap(), found.bytecode);
    assert_eq!(mtime(&bin), mtime(&txt));
}

#[test]
fn assembly_parse_errors_are_not_cached_and_leave_timestamp_unset() {
    let h = Harness::new(|config| config.cache_shaders = true);
    let original = pixel_shader(8);
    let hash = h.hash(&original);
    h.write_fix(
        &name(ArtifactKind::AsmSource, hash),
        b"ps_5_0\nbogus r0\nret\n",
    );

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(found.origin, ReplacementOrigin::AssemblySource);
    assert_eq!(found.timestamp, None);
    assert!(!h.fix_file(&name(ArtifactKind::AsmBinary, hash)).exists());
}

#[test]
fn fatal_assembly_error_means_no_replacement() {
    let h = Harness::new(|_| {});
    let original = pixel_shader(9);
    let hash = h.hash(&original);
    h.write_fix(&name(ArtifactKind::AsmSource, hash), b"fatal\n");

    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());
}

#[test]
fn binary_shipped_without_source_is_accepted() {
    let h = Harness::new(|_| {});
    let original = pixel_shader(10);
    let hash = h.hash(&original);
    h.write_fix(&name(ArtifactKind::AsmBinary, hash), b"binary only");

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(found.bytecode, b"binary only");
    assert_eq!(found.timestamp, None);
}

#[test]
fn unpatched_decompile_is_exported_but_not_used() {
    let h = Harness::new(|config| config.export_hlsl = 2);
    let original = pixel_shader(11);
    let hash = h.hash(&original);

    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());

    let export = h.cache_file(&name(ArtifactKind::HlslSource, hash));
    let exported = fs::read_to_string(export).unwrap();
    assert!(exported.starts_with("// decompiled ps_5_0\n"));
    assert!(exported.contains("Original ASM"));
    assert!(exported.contains("dcl_globalFlags"));
    assert_eq!(h.tools.compiled(), 1, "decompiles are always test-compiled");

    // The export now exists, so the decompiler is not run again.
    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());
    assert_eq!(h.tools.decompiled(), 1);
}

#[test]
fn compiler_diagnostics_are_appended_to_the_export() {
    let h = Harness::new(|config| config.export_hlsl = 1);
    h.tools.decompile_warning.store(true, Ordering::SeqCst);
    let original = pixel_shader(17);
    let hash = h.hash(&original);

    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());

    let export = h.cache_file(&name(ArtifactKind::HlslSource, hash));
    let exported = fs::read_to_string(export).unwrap();
    let (hlsl, errors) = exported.split_once(" HLSL errors ").unwrap();
    assert!(hlsl.contains("#warning float4 to float3"));
    assert!(errors.contains("warning X3206: implicit truncation"));
    assert!(!exported.contains("Original ASM"));
    assert!(!exported.contains("Recompiled ASM"));
}

#[test]
fn full_export_appends_recompiled_disassembly() {
    let h = Harness::new(|config| config.export_hlsl = 3);
    h.tools.decompile_warning.store(true, Ordering::SeqCst);
    let original = pixel_shader(18);
    let hash = h.hash(&original);

    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());

    let export = h.cache_file(&name(ArtifactKind::HlslSource, hash));
    let exported = fs::read_to_string(export).unwrap();
    let original_asm = exported.find(" Original ASM ").unwrap();
    let errors = exported.find(" HLSL errors ").unwrap();
    let recompiled = exported.find(" Recompiled ASM ").unwrap();
    assert!(original_asm < errors && errors < recompiled);
    assert!(exported[recompiled..].contains("// recompiled by fake compiler\nps_5_0\n"));
    assert!(exported.trim_end().ends_with("*/"));
}

#[test]
fn clean_compile_writes_no_error_block() {
    let h = Harness::new(|config| config.export_hlsl = 3);
    let original = pixel_shader(19);
    let hash = h.hash(&original);

    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());

    let export = h.cache_file(&name(ArtifactKind::HlslSource, hash));
    let exported = fs::read_to_string(export).unwrap();
    assert!(!exported.contains("HLSL errors"));
    assert!(exported.contains("Recompiled ASM"));
}

#[test]
fn patched_decompile_goes_live_in_fixes_directory() {
    let h = Harness::new(|config| {
        config.fix_sv_position = true;
        config.export_fixed = true;
    });
    h.tools.patch.store(true, Ordering::SeqCst);
    let original = pixel_shader(12);
    let hash = h.hash(&original);

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(found.origin, ReplacementOrigin::Decompiled);
    assert_eq!(found.shader_model, "ps_5_0");
    assert_eq!(found.header, "// decompiled ps_5_0");

    let written = h.fix_file(&name(ArtifactKind::HlslSource, hash));
    assert_eq!(found.timestamp, Some(mtime(&written)));
    assert!(!fs::read_to_string(&written).unwrap().contains("Original ASM"));

    // Next time the written source is picked up by the HLSL strategy.
    let again = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(again.origin, ReplacementOrigin::HlslSource);
}

#[test]
fn patched_decompile_without_export_is_used_but_not_written() {
    let h = Harness::new(|config| config.recompile_all_vs = true);
    h.tools.patch.store(true, Ordering::SeqCst);
    let original = pixel_shader(13);
    let hash = h.hash(&original);

    let found = h.session.resolver().resolve(hash, PS, &original).unwrap();
    assert_eq!(found.origin, ReplacementOrigin::Decompiled);
    assert_eq!(found.timestamp, None);
    assert!(!h.fix_file(&name(ArtifactKind::HlslSource, hash)).exists());
}

#[test]
fn bad_marker_skips_decompilation() {
    let h = Harness::new(|config| config.export_hlsl = 1);
    let original = pixel_shader(14);
    let hash = h.hash(&original);
    h.write_fix(&name(ArtifactKind::BadMarker, hash), b"");

    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());
    assert_eq!(h.tools.decompiled(), 0);
}

#[test]
fn decompile_is_off_by_default() {
    let h = Harness::new(|_| {});
    let original = pixel_shader(15);
    let hash = h.hash(&original);
    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());
    assert_eq!(h.tools.decompiled(), 0);
}

#[test]
fn exports_original_binary_and_disassembly() {
    let h = Harness::new(|config| {
        config.export_binary = true;
        config.export_shaders = true;
    });
    let original = pixel_shader(16);
    let hash = h.hash(&original);

    assert!(h.session.resolver().resolve(hash, PS, &original).is_none());

    assert_eq!(
        fs::read(h.cache_file(&name(ArtifactKind::AsmBinary, hash))).unwrap(),
        original
    );
    let asm_path = h.cache_file(&name(ArtifactKind::AsmSource, hash));
    let asm = fs::read_to_string(asm_path).unwrap();
    assert!(asm.contains("ps_5_0"));
}
