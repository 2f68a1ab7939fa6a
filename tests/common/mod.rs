#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use shaderfix::tools::{
    Assembled, Assembler, AssemblerParseError, Compiled, DecompileOptions, Decompiled, Decompiler,
    Disassembler, HlslCompiler, ToolError,
};
use shaderfix::{
    ClassLinkage, Config, LinkageObject, PlatformError, ShaderHandle, ShaderSession, ShaderStage,
    Toolchain, UnderlyingDevice,
};
use shaderfix_dxbc::test_utils::build_container;
use shaderfix_dxbc::{DxbcContainer, FourCC, ProgramType, ShaderModel};
use tempfile::TempDir;

pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;
pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;

/// A shader container for `program` whose code section is unique per `seed`.
pub fn shader_blob(program: ProgramType, seed: u8) -> Vec<u8> {
    let token = ShaderModel {
        program,
        major: 5,
        minor: 0,
    }
    .to_token();
    let mut shex = token.to_le_bytes().to_vec();
    shex.extend_from_slice(&[seed; 12]);
    build_container(&[
        (FourCC(*b"RDEF"), b"Microsoft (R) HLSL Shader Compiler 10.1"),
        (FourCC(*b"ISGN"), &[0x10, 0, 0, 0, 1, 0, 0, 0]),
        (FourCC(*b"OSGN"), &[0x20, 0, 0, 0, 1, 0, 0, 0]),
        (FourCC(*b"SHEX"), &shex),
    ])
}

pub fn pixel_shader(seed: u8) -> Vec<u8> {
    shader_blob(ProgramType::Pixel, seed)
}

pub fn vertex_shader(seed: u8) -> Vec<u8> {
    shader_blob(ProgramType::Vertex, seed)
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

pub fn mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path).unwrap().modified().unwrap()
}

#[derive(Debug)]
pub struct FakeLinkage;
impl LinkageObject for FakeLinkage {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCall {
    pub stage: ShaderStage,
    pub bytecode: Option<Vec<u8>>,
    pub handle: Option<ShaderHandle>,
}

#[derive(Default)]
struct DeviceState {
    next_handle: u64,
    free: Vec<ShaderHandle>,
    refs: HashMap<ShaderHandle, u32>,
    releases: HashMap<ShaderHandle, usize>,
    calls: Vec<CreateCall>,
    fail_bytecode: Option<Vec<u8>>,
    mode: i32,
    mode_changes: Vec<i32>,
}

/// A device that hands out small integer handles and recycles them once their last reference
/// is released, like the real platform does.
#[derive(Default)]
pub struct FakeDevice {
    state: Mutex<DeviceState>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    /// Makes creation fail for exactly these bytes.
    pub fn fail_on(&self, bytecode: &[u8]) {
        self.state().fail_bytecode = Some(bytecode.to_vec());
    }

    pub fn refcount(&self, handle: ShaderHandle) -> u32 {
        self.state().refs.get(&handle).copied().unwrap_or(0)
    }

    /// Release calls seen for this handle value, across every object that used it.
    pub fn releases(&self, handle: ShaderHandle) -> usize {
        self.state().releases.get(&handle).copied().unwrap_or(0)
    }

    pub fn live_objects(&self) -> usize {
        self.state().refs.len()
    }

    pub fn calls(&self) -> Vec<CreateCall> {
        self.state().calls.clone()
    }

    pub fn created_with(&self, handle: ShaderHandle) -> Option<Vec<u8>> {
        self.state()
            .calls
            .iter()
            .rev()
            .find(|call| call.handle == Some(handle))
            .and_then(|call| call.bytecode.clone())
    }

    pub fn mode_changes(&self) -> Vec<i32> {
        self.state().mode_changes.clone()
    }

    fn create(
        &self,
        stage: ShaderStage,
        bytecode: Option<&[u8]>,
    ) -> Result<ShaderHandle, PlatformError> {
        let mut state = self.state();
        let result = match bytecode {
            None => Err(PlatformError::new(E_INVALIDARG, "null bytecode")),
            Some(bytes) if state.fail_bytecode.as_deref() == Some(bytes) => {
                Err(PlatformError::new(E_FAIL, "rejected bytecode"))
            }
            Some(_) => {
                let handle = match state.free.pop() {
                    Some(handle) => handle,
                    None => {
                        state.next_handle += 1;
                        ShaderHandle(0x1000 + state.next_handle)
                    }
                };
                state.refs.insert(handle, 1);
                Ok(handle)
            }
        };
        state.calls.push(CreateCall {
            stage,
            bytecode: bytecode.map(<[u8]>::to_vec),
            handle: result.as_ref().ok().copied(),
        });
        result
    }
}

impl UnderlyingDevice for FakeDevice {
    fn create_vertex_shader(
        &self,
        bytecode: Option<&[u8]>,
        _: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError> {
        self.create(ShaderStage::Vertex, bytecode)
    }

    fn create_pixel_shader(
        &self,
        bytecode: Option<&[u8]>,
        _: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError> {
        self.create(ShaderStage::Pixel, bytecode)
    }

    fn create_geometry_shader(
        &self,
        bytecode: Option<&[u8]>,
        _: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError> {
        self.create(ShaderStage::Geometry, bytecode)
    }

    fn create_hull_shader(
        &self,
        bytecode: Option<&[u8]>,
        _: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError> {
        self.create(ShaderStage::Hull, bytecode)
    }

    fn create_domain_shader(
        &self,
        bytecode: Option<&[u8]>,
        _: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError> {
        self.create(ShaderStage::Domain, bytecode)
    }

    fn create_compute_shader(
        &self,
        bytecode: Option<&[u8]>,
        _: Option<&ClassLinkage>,
    ) -> Result<ShaderHandle, PlatformError> {
        self.create(ShaderStage::Compute, bytecode)
    }

    fn create_class_linkage(&self) -> Result<ClassLinkage, PlatformError> {
        Ok(Arc::new(FakeLinkage))
    }

    fn add_ref(&self, handle: ShaderHandle) -> u32 {
        let mut state = self.state();
        let count = state.refs.entry(handle).or_insert(0);
        *count += 1;
        *count
    }

    fn release(&self, handle: ShaderHandle) -> u32 {
        let mut state = self.state();
        let Some(count) = state.refs.get_mut(&handle) else {
            panic!("release of dead handle {handle}");
        };
        *count -= 1;
        let remaining = *count;
        *state.releases.entry(handle).or_insert(0) += 1;
        if remaining == 0 {
            state.refs.remove(&handle);
            state.free.push(handle);
        }
        remaining
    }

    fn set_surface_creation_mode(&self, mode: i32) -> Option<i32> {
        let mut state = self.state();
        let previous = state.mode;
        state.mode = mode;
        state.mode_changes.push(mode);
        Some(previous)
    }
}

#[derive(Debug, Default)]
pub struct ToolCounters {
    pub disassembled: AtomicUsize,
    pub compiled: AtomicUsize,
    pub assembled: AtomicUsize,
    pub decompiled: AtomicUsize,
    pub compile_targets: Mutex<Vec<String>>,
    /// What the fake decompiler reports for `patched`.
    pub patch: AtomicBool,
    /// Makes the fake decompiler emit HLSL that compiles with a warning.
    pub decompile_warning: AtomicBool,
}

impl ToolCounters {
    pub fn compiled(&self) -> usize {
        self.compiled.load(Ordering::SeqCst)
    }

    pub fn assembled(&self) -> usize {
        self.assembled.load(Ordering::SeqCst)
    }

    pub fn decompiled(&self) -> usize {
        self.decompiled.load(Ordering::SeqCst)
    }

    pub fn last_target(&self) -> Option<String> {
        self.compile_targets.lock().unwrap().last().cloned()
    }
}

/// Disassembles real containers into a header comment plus the model line. Output of the fake
/// compiler disassembles to its target line.
struct FakeDisassembler(Arc<ToolCounters>);

impl Disassembler for FakeDisassembler {
    fn disassemble(&self, bytecode: &[u8]) -> Result<String, ToolError> {
        self.0.disassembled.fetch_add(1, Ordering::SeqCst);
        if let Some(rest) = bytecode.strip_prefix(b"HLSL[") {
            let target: Vec<u8> = rest.iter().copied().take_while(|&b| b != b':').collect();
            let target = String::from_utf8_lossy(&target);
            return Ok(format!("// recompiled by fake compiler\n{target}\nret\n"));
        }
        let container =
            DxbcContainer::parse(bytecode).map_err(|e| ToolError::Disassemble(e.to_string()))?;
        let model = ShaderModel::from_container(&container)
            .map_err(|e| ToolError::Disassemble(e.to_string()))?;
        Ok(format!(
            "//\n// Generated by fake disassembler\n//\n\n\
             {model}\ndcl_globalFlags refactoringAllowed\nret\n"
        ))
    }
}

/// `#error` in the source fails compilation; `#warning` succeeds with diagnostics.
struct FakeCompiler(Arc<ToolCounters>);

impl HlslCompiler for FakeCompiler {
    fn compile(&self, source: &str, _source_path: &Path, entry: &str, target: &str) -> Compiled {
        self.0.compiled.fetch_add(1, Ordering::SeqCst);
        self.0.compile_targets.lock().unwrap().push(target.to_string());
        if source.contains("#error") {
            return Compiled {
                bytecode: None,
                diagnostics: Some("error X1000: user error\n".into()),
            };
        }
        let diagnostics = source
            .contains("#warning")
            .then(|| "warning X3206: implicit truncation\n".to_string());
        Compiled {
            bytecode: Some(format!("HLSL[{target}:{entry}]{source}").into_bytes()),
            diagnostics,
        }
    }
}

/// Lines containing `bogus` are parse errors; `fatal` fails outright.
struct FakeAssembler(Arc<ToolCounters>);

impl Assembler for FakeAssembler {
    fn assemble(
        &self,
        text: &str,
        _original: &[u8],
        _signatures: bool,
    ) -> Result<Assembled, ToolError> {
        self.0.assembled.fetch_add(1, Ordering::SeqCst);
        if text.contains("fatal") {
            return Err(ToolError::Assemble("unrecoverable".into()));
        }
        let parse_errors = text
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains("bogus"))
            .map(|(i, line)| AssemblerParseError {
                line: i + 1,
                message: format!("unknown instruction {:?}", line.trim()),
            })
            .collect();
        Ok(Assembled {
            bytecode: format!("ASM{text}").into_bytes(),
            parse_errors,
        })
    }
}

struct FakeDecompiler(Arc<ToolCounters>);

impl Decompiler for FakeDecompiler {
    fn decompile(
        &self,
        _bytecode: &[u8],
        disassembly: &str,
        _options: DecompileOptions,
    ) -> Result<Decompiled, ToolError> {
        self.0.decompiled.fetch_add(1, Ordering::SeqCst);
        let model = shaderfix::tools::shader_model_from_disassembly(disassembly)
            .ok_or_else(|| ToolError::Decompile("no model".into()))?;
        let mut hlsl = format!("// decompiled {model}\n");
        if self.0.decompile_warning.load(Ordering::SeqCst) {
            hlsl.push_str("#warning float4 to float3\n");
        }
        hlsl.push_str("void main() {}\n");
        Ok(Decompiled {
            hlsl,
            patched: self.0.patch.load(Ordering::SeqCst),
            shader_model: model.to_string(),
        })
    }
}

pub fn fake_toolchain(counters: &Arc<ToolCounters>) -> Toolchain {
    Toolchain {
        disassembler: Box::new(FakeDisassembler(counters.clone())),
        assembler: Box::new(FakeAssembler(counters.clone())),
        compiler: Box::new(FakeCompiler(counters.clone())),
        decompiler: Box::new(FakeDecompiler(counters.clone())),
    }
}

/// A session over a [`FakeDevice`] with throwaway fixes and cache directories.
pub struct Harness {
    pub fixes: TempDir,
    pub cache: TempDir,
    pub device: Arc<FakeDevice>,
    pub tools: Arc<ToolCounters>,
    pub session: ShaderSession,
}

impl Harness {
    pub fn new(configure: impl FnOnce(&mut Config)) -> Self {
        let fixes = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let mut config = Config {
            override_directory: Some(fixes.path().to_path_buf()),
            cache_directory: Some(cache.path().to_path_buf()),
            ..Config::default()
        };
        configure(&mut config);
        let device = FakeDevice::new();
        let tools = Arc::new(ToolCounters::default());
        let session = ShaderSession::new(config, device.clone(), fake_toolchain(&tools));
        Self {
            fixes,
            cache,
            device,
            tools,
            session,
        }
    }

    pub fn fix_file(&self, name: &str) -> std::path::PathBuf {
        self.fixes.path().join(name)
    }

    pub fn cache_file(&self, name: &str) -> std::path::PathBuf {
        self.cache.path().join(name)
    }

    pub fn write_fix(&self, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = self.fix_file(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn hash(&self, bytecode: &[u8]) -> u64 {
        shaderfix::shader_hash(self.session.config().shader_hash, bytecode)
    }
}
