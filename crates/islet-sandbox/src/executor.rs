//! Sandbox executor: creates a fresh V8 isolate per snippet and runs the
//! synthesized bundle under dual timeouts and a heap ceiling.
//!
//! Each execution gets a brand new runtime; no state leaks between calls.
//!
//! V8 isolates are `!Send`, so all JsRuntime operations run on a dedicated
//! thread with its own single-threaded tokio runtime. The public API is
//! fully async and `Send`-safe, and never lets a failure escape as anything
//! other than a failure envelope.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deno_core::{v8, JsRuntime, ModuleSpecifier, PollEventLoopOptions, RuntimeOptions};
use tokio::sync::Semaphore;

use islet_registry::SdkRegistry;

use crate::envelope::{parse_envelope, RunResult};
use crate::error::{SandboxError, TimeoutPhase};
use crate::loader::{SnippetLoader, ENTRY_SPECIFIER};
use crate::ops::{islet_ext, BridgeCallLimits, BridgeDefaults, ExecutionResult};
use crate::template;
use crate::HttpBridge;

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum time for each execution phase (module load/sync run, and the
    /// awaited entry invocation).
    pub timeout: Duration,
    /// V8 heap ceiling in bytes.
    pub memory_limit: usize,
    /// Maximum snippet size in bytes.
    pub max_code_size: usize,
    /// Maximum size of the serialized result envelope in bytes.
    pub max_output_size: usize,
    /// Maximum concurrent sandbox executions.
    pub max_concurrent: usize,
    /// Maximum bridge calls per execution.
    pub max_bridge_calls: usize,
    /// Default per-request bridge timeout.
    pub bridge_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(60_000),
            memory_limit: 128 * 1024 * 1024, // 128 MiB
            max_code_size: 10_000,
            max_output_size: 1024 * 1024, // 1 MiB
            max_concurrent: 8,
            max_bridge_calls: 64,
            bridge_timeout: Duration::from_millis(5_000),
        }
    }
}

/// The sandbox executor. Creates a fresh V8 isolate for each snippet.
///
/// Holds the SDK registry (snapshotted per run) and the host bridge (the one
/// capability handed into the sandbox). A semaphore bounds the number of
/// simultaneous isolates.
pub struct SandboxExecutor {
    config: SandboxConfig,
    registry: Arc<SdkRegistry>,
    bridge: Arc<dyn HttpBridge>,
    semaphore: Arc<Semaphore>,
}

impl SandboxExecutor {
    /// Create a new executor over the given registry and bridge.
    pub fn new(
        config: SandboxConfig,
        registry: Arc<SdkRegistry>,
        bridge: Arc<dyn HttpBridge>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            registry,
            bridge,
            semaphore,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute an untrusted snippet and return its result envelope.
    ///
    /// Never raises past this boundary: user-script errors, timeouts, and
    /// internal defects all resolve to [`RunResult::Failure`] with a
    /// category code. Internal defects are logged at error level so they can
    /// be alerted on separately from ordinary user mistakes.
    pub async fn run_snippet(&self, code: &str) -> RunResult {
        tracing::info!(code_len = code.len(), "run_snippet: starting");

        let result = match self.run_snippet_inner(code).await {
            Ok(result) => result,
            Err(e) => {
                match e.failure_kind() {
                    crate::envelope::FailureKind::Internal => {
                        tracing::error!(error = %e, code = e.failure_kind().code(), "run_snippet: internal failure")
                    }
                    _ => tracing::warn!(error = %e, "run_snippet: failed"),
                }
                RunResult::from(e)
            }
        };

        if result.is_success() {
            tracing::info!("run_snippet: complete");
        }
        result
    }

    async fn run_snippet_inner(&self, code: &str) -> Result<RunResult, SandboxError> {
        if code.len() > self.config.max_code_size {
            return Err(SandboxError::CodeTooLarge {
                max: self.config.max_code_size,
                actual: code.len(),
            });
        }

        let _permit = self.semaphore.clone().try_acquire_owned().map_err(|_| {
            SandboxError::ConcurrencyLimit {
                max: self.config.max_concurrent,
            }
        })?;

        // Snapshot the mapping and synthesize the entry source up front; the
        // request is immutable from here on even if the registry changes.
        let sdk_map = self.registry.cached();
        let entry_source = template::entry_source(&sdk_map, code);
        let sdk_root = self.registry.root().to_path_buf();
        let config = self.config.clone();
        let bridge = self.bridge.clone();

        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    if tx.send(Err(SandboxError::Execution(e.into()))).is_err() {
                        tracing::warn!("sandbox result receiver dropped");
                    }
                    return;
                }
            };
            let result = rt.block_on(run_in_fresh_isolate(&config, sdk_root, entry_source, bridge));
            if tx.send(result).is_err() {
                tracing::warn!("sandbox result receiver dropped before result was sent");
            }
        });

        // Host-side backstop racing the isolate thread: both phases plus
        // teardown grace. If the thread wedges past its own watchdogs, the
        // caller still gets a timeout envelope now; the watchdog's
        // terminate_execution eventually unwinds the thread, dropping the
        // runtime and reclaiming its memory.
        let backstop = self.config.timeout * 2 + Duration::from_secs(5);
        match tokio::time::timeout(backstop, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SandboxError::Execution(anyhow::anyhow!(
                "sandbox thread panicked"
            ))),
            Err(_) => Err(SandboxError::Timeout {
                phase: TimeoutPhase::Entry,
                timeout_ms: self.config.timeout.as_millis() as u64,
            }),
        }
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// Whether the heap limit has been triggered. AtomicBool so the callback
    /// can use a shared `&` reference instead of `&mut`, eliminating
    /// aliasing concerns.
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate cleanly.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the `heap_state` Box allocated in
    // run_in_fresh_isolate. The Box outlives this callback because V8 only
    // invokes it while script execution is running, and every watchdog is
    // joined before heap_state is dropped. We use a shared `&` reference
    // (not `&mut`) because `triggered` is AtomicBool, so no aliasing
    // concerns even if V8 were to call this callback re-entrantly.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// CPU watchdog for one execution phase. Terminates V8 execution if the
/// phase outlives its deadline (handles CPU-bound infinite loops, which the
/// async deadline alone cannot interrupt).
struct Watchdog {
    cancel_tx: std::sync::mpsc::Sender<()>,
    handle: Option<std::thread::JoinHandle<()>>,
    timed_out: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(isolate: v8::IsolateHandle, timeout: Duration) -> Self {
        let timed_out = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&timed_out);
        let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout)
            {
                flag.store(true, Ordering::SeqCst);
                isolate.terminate_execution();
            }
        });
        Self {
            cancel_tx,
            handle: Some(handle),
            timed_out,
        }
    }

    /// Cancel the watchdog and wait for its thread to exit. Returns whether
    /// it fired. Joining before the runtime drops prevents use-after-free on
    /// the IsolateHandle.
    fn disarm(mut self) -> bool {
        self.stop();
        self.timed_out.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        let _ = self.cancel_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bootstrap script run before any sandboxed code: captures the two ops in
/// closures, installs the single bridge capability, and strips every
/// host-identity global so introspection cannot reach host objects.
const BOOTSTRAP: &str = r#"
((ops) => {
    const fetchOp = ops.op_bridge_fetch;
    const setResultOp = ops.op_set_result;

    globalThis.__HOST_BRIDGE__ = async (url, init) => {
        const responseJson = await fetchOp(String(url), JSON.stringify(init || {}));
        return JSON.parse(responseJson);
    };
    globalThis.__EMIT_RESULT__ = (envelope) => setResultOp(JSON.stringify(envelope));

    delete globalThis.Deno;
    delete globalThis.process;
    delete globalThis.Buffer;

    // Remove code generation primitives to prevent prototype chain attacks:
    // without this, Function is reachable via e.g. __HOST_BRIDGE__.constructor.
    delete globalThis.eval;
    const AsyncFunction = (async function () {}).constructor;
    const GeneratorFunction = (function* () {}).constructor;
    Object.defineProperty(Function.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
    Object.defineProperty(AsyncFunction.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
    Object.defineProperty(GeneratorFunction.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
})(Deno.core.ops);
"#;

/// Invocation script for the second phase: calls the exported entry and
/// posts whatever it returns through the result op. The entry function
/// catches user errors itself, so the catch arm here only fires when the
/// synthesized wrapper is defective.
const INVOKE: &str = r#"
(async () => {
    try {
        const envelope = await globalThis.__SNIPPET_MAIN__();
        globalThis.__EMIT_RESULT__(envelope);
    } catch (e) {
        globalThis.__EMIT_RESULT__({
            ok: false,
            internal: true,
            error: { name: (e && e.name) || "Error", message: String((e && e.message) || e) },
            logs: [],
        });
    }
})();
"#;

/// Run one snippet in a fresh isolate on the current thread (must be called
/// from a dedicated thread, not the main tokio runtime).
async fn run_in_fresh_isolate(
    config: &SandboxConfig,
    sdk_root: PathBuf,
    entry_source: String,
    bridge: Arc<dyn HttpBridge>,
) -> Result<RunResult, SandboxError> {
    let loader = Rc::new(SnippetLoader::new(sdk_root, entry_source));
    let create_params = v8::CreateParams::default().heap_limits(0, config.memory_limit);

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(loader),
        extensions: vec![islet_ext::init()],
        create_params: Some(create_params),
        ..Default::default()
    });

    {
        let op_state = runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(bridge);
        state.put(BridgeCallLimits {
            max_calls: config.max_bridge_calls,
            calls_made: 0,
        });
        state.put(BridgeDefaults {
            timeout_ms: config.bridge_timeout.as_millis() as u64,
        });
    }

    // --- Set up heap limit callback ---
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    runtime
        .execute_script("[islet:bootstrap]", BOOTSTRAP)
        .map_err(|e| SandboxError::JsError {
            message: e.to_string(),
        })?;

    // --- Phase 1: load, compile, and evaluate the module graph ---
    let specifier = ModuleSpecifier::parse(ENTRY_SPECIFIER)
        .map_err(|e| SandboxError::Execution(anyhow::anyhow!("bad entry specifier: {e}")))?;

    let watchdog = Watchdog::arm(runtime.v8_isolate().thread_safe_handle(), config.timeout);
    let load_result = tokio::time::timeout(config.timeout, async {
        let module_id = runtime
            .load_main_es_module(&specifier)
            .await
            .map_err(|e| SandboxError::JsError {
                message: e.to_string(),
            })?;
        let evaluation = runtime.mod_evaluate(module_id);
        runtime
            .run_event_loop(PollEventLoopOptions::default())
            .await
            .map_err(|e| SandboxError::JsError {
                message: e.to_string(),
            })?;
        evaluation.await.map_err(|e| SandboxError::JsError {
            message: e.to_string(),
        })
    })
    .await;
    let timed_out_sync = watchdog.disarm();

    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(SandboxError::HeapLimitExceeded);
    }
    match load_result {
        Ok(Ok(())) if !timed_out_sync => {}
        Ok(Err(e)) if !timed_out_sync => return Err(e),
        _ => {
            return Err(SandboxError::Timeout {
                phase: TimeoutPhase::Load,
                timeout_ms: config.timeout.as_millis() as u64,
            })
        }
    }

    // --- Retrieve the entry export by its well-known name ---
    let probe = runtime
        .execute_script(
            "[islet:probe]",
            format!(
                "typeof globalThis.{} === \"function\"",
                template::ENTRY_EXPORT
            ),
        )
        .map_err(|e| SandboxError::JsError {
            message: e.to_string(),
        })?;
    let entry_present = {
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, probe);
        local.is_true()
    };
    if !entry_present {
        return Err(SandboxError::MalformedBundle {
            reason: format!(
                "entry export '{}' missing after module evaluation",
                template::ENTRY_EXPORT
            ),
        });
    }

    // --- Phase 2: invoke the entry under its own deadline ---
    let watchdog = Watchdog::arm(runtime.v8_isolate().thread_safe_handle(), config.timeout);
    let invoke_result = match runtime.execute_script("[islet:invoke]", INVOKE) {
        Ok(_) => {
            tokio::time::timeout(config.timeout, async {
                loop {
                    runtime
                        .run_event_loop(PollEventLoopOptions::default())
                        .await
                        .map_err(|e| SandboxError::JsError {
                            message: e.to_string(),
                        })?;
                    if has_result(&mut runtime) {
                        return Ok(());
                    }
                    // The event loop goes idle while the entry promise is
                    // still unsettled (an unresolved wait leaves nothing to
                    // drive); re-poll until the envelope lands or the
                    // deadline passes.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
        }
        Err(e) => Ok(Err(SandboxError::JsError {
            message: e.to_string(),
        })),
    };
    let timed_out_entry = watchdog.disarm();

    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(SandboxError::HeapLimitExceeded);
    }
    match invoke_result {
        Ok(Ok(())) if !timed_out_entry => {}
        Ok(Err(e)) if !timed_out_entry => return Err(e),
        _ => {
            return Err(SandboxError::Timeout {
                phase: TimeoutPhase::Entry,
                timeout_ms: config.timeout.as_millis() as u64,
            })
        }
    }

    // --- Extract the envelope from OpState ---
    let result_json = {
        let op_state = runtime.op_state();
        let state = op_state.borrow();
        state
            .try_borrow::<ExecutionResult>()
            .map(|r| r.0.clone())
            .ok_or_else(|| SandboxError::MalformedBundle {
                reason: "entry completed without posting a result envelope".into(),
            })?
    };

    if result_json.len() > config.max_output_size {
        return Err(SandboxError::OutputTooLarge {
            max: config.max_output_size,
        });
    }

    parse_envelope(&result_json)
    // The runtime (and with it the isolate's memory) is dropped here, on
    // every path out of this function, exactly once.
}

fn has_result(runtime: &mut JsRuntime) -> bool {
    runtime
        .op_state()
        .borrow()
        .try_borrow::<ExecutionResult>()
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_deployment_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(60_000));
        assert_eq!(config.memory_limit, 128 * 1024 * 1024);
        assert_eq!(config.max_concurrent, 8);
    }
}
