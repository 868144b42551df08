//! `WasmEngine` — runs `executable` artifacts whose `code` is a
//! compiled wasm module under a fuel-metered `wasmi` store. Fuel stands
//! in for cooperative pre-emption; an additional `tokio::time::timeout`
//! enforces the wall-clock deadline as a backstop.
//!
//! ABI: the guest exports `alloc(len) -> ptr`, `run(method_ptr, method_len,
//! args_ptr, args_len) -> u64` (a packed `(result_ptr, result_len)`), and a
//! `memory`. Arguments and return values are JSON, written/read through
//! that memory — the narrowest surface that keeps the host from caring
//! what language compiled the guest, treating `code` as opaque bytes
//! plus a declared language tag.
//!
//! The host side exposes the four-symbol sandbox contract
//! (`kernel_state`, `kernel_actions`, `invoke`, `caller_id`) as `env`
//! imports. Any import that returns a JSON payload (as opposed to a
//! scalar) calls back into the guest's own `alloc` export to get a
//! place to write the result, then returns it packed the same way
//! `run` does.

use crate::engine::ScriptEngine;
use crate::errors::SandboxError;
use crate::kernel_bindings::{SandboxContext, SandboxKernel};
use async_trait::async_trait;
use crucible_core_types::{ActionOutcome, ArtifactType, CodeLanguage, CodeModule, InvocationFrame, PrincipalId};
use std::sync::Arc;
use std::time::Duration;
use wasmi::{Caller, Extern, Instance, Linker, Memory, Module, Store, TypedFunc};

/// Fuel spent per instruction class is `wasmi`'s default; this is just
/// the budget ceiling before a module is treated as non-terminating.
const FUEL_BUDGET: u64 = 10_000_000;

/// Sentinel packed return for a fallible JSON-returning import: a
/// length this large can never be a real allocation, so the guest can
/// tell "call failed" apart from "call returned an empty payload".
const CALL_FAILED: u64 = u64::MAX;

struct HostState {
    caller_id: PrincipalId,
    frame: InvocationFrame,
    kernel: Arc<dyn SandboxKernel>,
    /// Set once, right after instantiation, so host imports can hand
    /// JSON results back to the guest through its own allocator.
    alloc: Option<TypedFunc<u32, u32>>,
}

pub struct WasmEngine {
    engine: wasmi::Engine,
}

impl WasmEngine {
    pub fn new() -> Self {
        let mut config = wasmi::Config::default();
        config.consume_fuel(true);
        Self { engine: wasmi::Engine::new(&config) }
    }

    fn build_linker(&self) -> Result<Linker<HostState>, SandboxError> {
        let mut linker = Linker::<HostState>::new(&self.engine);

        linker
            .func_wrap("env", "kernel_caller_id", |mut caller: Caller<'_, HostState>| -> u64 {
                let id = caller.data().caller_id.as_str().to_string();
                write_json_result(&mut caller, &serde_json::Value::String(id))
            })
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        linker
            .func_wrap("env", "kernel_balance", |mut caller: Caller<'_, HostState>, principal_ptr: u32, principal_len: u32| -> u64 {
                let Some(principal) = read_string(&mut caller, principal_ptr, principal_len) else { return 0 };
                let kernel = caller.data().kernel.clone();
                block_on_host(kernel.balance(&PrincipalId::new(principal))).unwrap_or(0)
            })
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        linker
            .func_wrap(
                "env",
                "kernel_transfer_scrip",
                |mut caller: Caller<'_, HostState>, to_ptr: u32, to_len: u32, amount: u64| -> i32 {
                    let Some(to) = read_string(&mut caller, to_ptr, to_len) else { return 1 };
                    let caller_id = caller.data().caller_id.clone();
                    let kernel = caller.data().kernel.clone();
                    match block_on_host(kernel.transfer_scrip(&caller_id, &PrincipalId::new(to), amount)) {
                        Ok(()) => 0,
                        Err(_) => 1,
                    }
                },
            )
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        linker
            .func_wrap(
                "env",
                "kernel_transfer_quota",
                |mut caller: Caller<'_, HostState>,
                 to_ptr: u32,
                 to_len: u32,
                 resource_ptr: u32,
                 resource_len: u32,
                 amount: u64|
                 -> i32 {
                    let Some(to) = read_string(&mut caller, to_ptr, to_len) else { return 1 };
                    let Some(resource) = read_string(&mut caller, resource_ptr, resource_len) else { return 1 };
                    let caller_id = caller.data().caller_id.clone();
                    let kernel = caller.data().kernel.clone();
                    match block_on_host(kernel.transfer_quota(&caller_id, &PrincipalId::new(to), &resource, amount)) {
                        Ok(()) => 0,
                        Err(_) => 1,
                    }
                },
            )
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        linker
            .func_wrap("env", "kernel_read_artifact", |mut caller: Caller<'_, HostState>, id_ptr: u32, id_len: u32| -> u64 {
                let Some(id) = read_string(&mut caller, id_ptr, id_len) else { return CALL_FAILED };
                let caller_id = caller.data().caller_id.clone();
                let kernel = caller.data().kernel.clone();
                match block_on_host(kernel.read_artifact(&id.into(), &caller_id)) {
                    Ok(content) => write_json_result(&mut caller, &content),
                    Err(_) => CALL_FAILED,
                }
            })
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        linker
            .func_wrap("env", "kernel_query", |mut caller: Caller<'_, HostState>, kind_ptr: u32, kind_len: u32| -> u64 {
                let kind = if kind_len == 0 {
                    None
                } else {
                    read_string(&mut caller, kind_ptr, kind_len).and_then(|s| parse_artifact_type(&s))
                };
                let caller_id = caller.data().caller_id.clone();
                let kernel = caller.data().kernel.clone();
                match block_on_host(kernel.query(kind, &caller_id)) {
                    Ok(ids) => {
                        let json = serde_json::Value::Array(ids.into_iter().map(|id| serde_json::Value::String(id.to_string())).collect());
                        write_json_result(&mut caller, &json)
                    }
                    Err(_) => CALL_FAILED,
                }
            })
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        linker
            .func_wrap(
                "env",
                "kernel_write_artifact",
                |mut caller: Caller<'_, HostState>, id_ptr: u32, id_len: u32, content_ptr: u32, content_len: u32| -> i32 {
                    let Some(id) = read_string(&mut caller, id_ptr, id_len) else { return 1 };
                    let Some(raw) = read_bytes(&mut caller, content_ptr, content_len) else { return 1 };
                    let Ok(content) = serde_json::from_slice::<serde_json::Value>(&raw) else { return 1 };
                    let caller_id = caller.data().caller_id.clone();
                    let kernel = caller.data().kernel.clone();
                    match block_on_host(kernel.write_artifact(&caller_id, &id.into(), content)) {
                        Ok(()) => 0,
                        Err(_) => 1,
                    }
                },
            )
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        linker
            .func_wrap(
                "env",
                "kernel_invoke",
                |mut caller: Caller<'_, HostState>,
                 target_ptr: u32,
                 target_len: u32,
                 method_ptr: u32,
                 method_len: u32,
                 args_ptr: u32,
                 args_len: u32|
                 -> u64 {
                    let (Some(target), Some(method), Some(raw_args)) = (
                        read_string(&mut caller, target_ptr, target_len),
                        read_string(&mut caller, method_ptr, method_len),
                        read_bytes(&mut caller, args_ptr, args_len),
                    ) else {
                        return CALL_FAILED;
                    };
                    let args: Vec<serde_json::Value> = match serde_json::from_slice(&raw_args) {
                        Ok(args) => args,
                        Err(_) => return CALL_FAILED,
                    };
                    let frame = caller.data().frame.clone();
                    let current_caller = caller.data().caller_id.clone();
                    let kernel = caller.data().kernel.clone();
                    let outcome = match frame.nested(current_caller) {
                        Ok(nested_frame) => block_on_host(kernel.invoke(nested_frame, target.into(), method, args)),
                        Err(err) => ActionOutcome::failed(crucible_core_types::ActionStage::Executing, &err),
                    };
                    let json = serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null);
                    write_json_result(&mut caller, &json)
                },
            )
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        linker
            .func_wrap(
                "env",
                "kernel_mint_bid",
                |mut caller: Caller<'_, HostState>, artifact_ptr: u32, artifact_len: u32, amount: u64| -> u64 {
                    let Some(artifact) = read_string(&mut caller, artifact_ptr, artifact_len) else { return CALL_FAILED };
                    let caller_id = caller.data().caller_id.clone();
                    let kernel = caller.data().kernel.clone();
                    match block_on_host(kernel.mint_bid(&caller_id, &artifact.into(), amount)) {
                        Ok(result) => write_json_result(&mut caller, &result),
                        Err(_) => CALL_FAILED,
                    }
                },
            )
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        Ok(linker)
    }
}


fn parse_artifact_type(s: &str) -> Option<ArtifactType> {
    match s {
        "text" => Some(ArtifactType::Text),
        "json" => Some(ArtifactType::Json),
        "executable" => Some(ArtifactType::Executable),
        "system" => Some(ArtifactType::System),
        "documentation" => Some(ArtifactType::Documentation),
        _ => None,
    }
}

impl Default for WasmEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn memory_of(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    caller.get_export("memory").and_then(Extern::into_memory)
}

fn read_bytes(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> Option<Vec<u8>> {
    let memory = memory_of(caller)?;
    let mut buf = vec![0u8; len as usize];
    memory.read(&caller, ptr as usize, &mut buf).ok()?;
    Some(buf)
}

fn read_string(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> Option<String> {
    read_bytes(caller, ptr, len).and_then(|buf| String::from_utf8(buf).ok())
}

/// Writes `value` as JSON into guest memory via the guest's own
/// `alloc` export and returns it packed as `(ptr << 32) | len`, the
/// same convention `run`'s return value uses. Returns [`CALL_FAILED`]
/// if serialization, allocation, or the memory write fails.
fn write_json_result(caller: &mut Caller<'_, HostState>, value: &serde_json::Value) -> u64 {
    let Ok(bytes) = serde_json::to_vec(value) else { return CALL_FAILED };
    let Some(alloc) = caller.data().alloc else { return CALL_FAILED };
    let Ok(ptr) = alloc.call(&mut *caller, bytes.len() as u32) else { return CALL_FAILED };
    let Some(memory) = memory_of(caller) else { return CALL_FAILED };
    if memory.write(&mut *caller, ptr as usize, &bytes).is_err() {
        return CALL_FAILED;
    }
    ((ptr as u64) << 32) | (bytes.len() as u64)
}

/// Bridges an async kernel call from inside a synchronous `wasmi` host
/// function. Safe to call here because host functions only ever run
/// from [`WasmEngine::run`]'s `spawn_blocking` thread, never on a
/// runtime worker thread.
fn block_on_host<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Handle::current().block_on(fut)
}

#[async_trait]
impl ScriptEngine for WasmEngine {
    async fn run(
        &self,
        code: &CodeModule,
        method: &str,
        args: Vec<serde_json::Value>,
        ctx: SandboxContext,
        timeout: Duration,
    ) -> Result<serde_json::Value, SandboxError> {
        if code.language != CodeLanguage::Wasm {
            return Err(SandboxError::Runtime("WasmEngine invoked on a non-wasm module".into()));
        }
        let engine = self.engine.clone();
        let bytes = code.bytes.clone();
        let method = method.to_string();
        let args_json = serde_json::to_vec(&args).map_err(|e| SandboxError::Runtime(e.to_string()))?;
        let host_state = HostState { caller_id: ctx.caller_id.clone(), frame: ctx.frame.clone(), kernel: ctx.kernel.clone(), alloc: None };
        let linker = self.build_linker()?;

        let call = tokio::task::spawn_blocking(move || execute(&engine, linker, &bytes, &method, &args_json, host_state));

        match tokio::time::timeout(timeout, call).await {
            Ok(join_result) => join_result.map_err(|e| SandboxError::Runtime(e.to_string()))?,
            Err(_) => Err(SandboxError::Timeout),
        }
    }
}

fn execute(
    engine: &wasmi::Engine,
    linker: Linker<HostState>,
    bytes: &[u8],
    method: &str,
    args_json: &[u8],
    host_state: HostState,
) -> Result<serde_json::Value, SandboxError> {
    let module = Module::new(engine, bytes).map_err(|e| SandboxError::Runtime(e.to_string()))?;
    let mut store = Store::new(engine, host_state);
    store.set_fuel(FUEL_BUDGET).map_err(|e| SandboxError::Runtime(e.to_string()))?;

    let instance: Instance = linker
        .instantiate(&mut store, &module)
        .and_then(|pre| pre.start(&mut store))
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;

    let memory = instance
        .get_memory(&store, "memory")
        .ok_or_else(|| SandboxError::Runtime("module exports no `memory`".into()))?;
    let alloc = instance
        .get_typed_func::<u32, u32>(&store, "alloc")
        .map_err(|_| SandboxError::NoEntryPoint)?;
    let run_fn = instance
        .get_typed_func::<(u32, u32, u32, u32), u64>(&store, "run")
        .map_err(|_| SandboxError::NoEntryPoint)?;
    store.data_mut().alloc = Some(alloc);

    let args_ptr = alloc.call(&mut store, args_json.len() as u32).map_err(|e| SandboxError::Runtime(e.to_string()))?;
    memory.write(&mut store, args_ptr as usize, args_json).map_err(|e| SandboxError::Runtime(e.to_string()))?;

    let method_bytes = method.as_bytes();
    let method_ptr = alloc.call(&mut store, method_bytes.len() as u32).map_err(|e| SandboxError::Runtime(e.to_string()))?;
    memory.write(&mut store, method_ptr as usize, method_bytes).map_err(|e| SandboxError::Runtime(e.to_string()))?;

    let packed = run_fn
        .call(&mut store, (method_ptr, method_bytes.len() as u32, args_ptr, args_json.len() as u32))
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;
    let (result_ptr, result_len) = ((packed >> 32) as u32, packed as u32);

    let mut buf = vec![0u8; result_len as usize];
    memory.read(&store, result_ptr as usize, &mut buf).map_err(|e| SandboxError::Runtime(e.to_string()))?;
    serde_json::from_slice(&buf).map_err(|e| SandboxError::Runtime(e.to_string()))
}
