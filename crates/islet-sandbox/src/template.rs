//! Entry-source synthesis: turns the SDK mapping and the raw user snippet
//! into the ES module that actually runs inside the isolate.
//!
//! The generated module imports every SDK under its namespace, installs a
//! capturing console, rewires each SDK's injectable transport seam onto the
//! host bridge, wraps the snippet in an async entry function, and exports
//! that function under [`ENTRY_EXPORT`]. Generation is a pure function of
//! its inputs (no I/O), so it is unit-testable without the bundler or the
//! isolate.

use std::fmt::Write as _;

use deno_core::ModuleSpecifier;
use islet_registry::SdkMap;

/// The well-known global the entry function is exported under. The executor
/// retrieves it by this name without parsing the bundle.
pub const ENTRY_EXPORT: &str = "__SNIPPET_MAIN__";

/// Generate the entry module source for the given SDK mapping and snippet.
///
/// The snippet is embedded verbatim as the body of an async function; its
/// completion value (awaited once more if promise-shaped) becomes the
/// execution result. A snippet without a reachable `return` completes
/// successfully with `undefined`.
pub fn entry_source(sdks: &SdkMap, user_code: &str) -> String {
    let mut src = String::with_capacity(PRELUDE.len() + EPILOGUE.len() + user_code.len() + 512);

    for (namespace, entry_path) in sdks {
        let locator = match ModuleSpecifier::from_file_path(entry_path) {
            Ok(url) => url.to_string(),
            Err(()) => format!("file://{}", entry_path.display()),
        };
        let _ = writeln!(src, "import * as {namespace} from \"{locator}\";");
    }

    let namespaces: Vec<&str> = sdks.keys().map(String::as_str).collect();
    if namespaces.is_empty() {
        src.push_str("const sdk = {};\n");
    } else {
        let _ = writeln!(src, "const sdk = {{ {} }};", namespaces.join(", "));
    }

    src.push_str(PRELUDE);
    src.push_str("async function __run() {\n");
    src.push_str("  const console = safeConsole;\n");
    src.push_str("  let result;\n");
    src.push_str("  const __ret = await (async () => { ");
    src.push_str(user_code);
    src.push_str(" })();\n");
    src.push_str(EPILOGUE);
    src
}

/// Everything between the SDK aggregate and the user snippet: console shim,
/// value flattening, and the bridge-backed transport adapter.
const PRELUDE: &str = r#"
const __logs = [];
const safeConsole = {
  log: (...args) => __logs.push({ level: "log", args }),
  warn: (...args) => __logs.push({ level: "warn", args }),
  error: (...args) => __logs.push({ level: "error", args }),
};
globalThis.console = safeConsole;

function isThenable(v) { return !!v && typeof v.then === "function"; }

function toPlainError(e) {
  return {
    name: (e && e.name) || "Error",
    message: String(e && e.message !== undefined ? e.message : e),
    stack: typeof (e && e.stack) === "string" ? e.stack : undefined,
    status: e && e.status,
    body: e && e.body,
  };
}

function safePlain(v, seen) {
  seen = seen || new WeakSet();
  if (v === null || typeof v !== "object") {
    if (typeof v === "function") return "[Function " + (v.name || "anonymous") + "]";
    return v;
  }
  if (isThenable(v)) return "[Promise]";
  if (v instanceof Error) return toPlainError(v);
  if (seen.has(v)) return "[Circular]";
  seen.add(v);
  if (Array.isArray(v)) return v.map((x) => safePlain(x, seen));
  const out = {};
  for (const k of Object.keys(v)) {
    try { out[k] = safePlain(v[k], seen); } catch { out[k] = "[Unserializable]"; }
  }
  return out;
}

async function awaitThenable(v) { return isThenable(v) ? await v : v; }

function plainLogs() {
  return __logs.map((l) => ({
    level: l.level,
    args: Array.isArray(l.args) ? l.args.map((a) => safePlain(a)) : [],
  }));
}

/* ---------- bridge-backed HTTP transport ---------- */

function buildQuery(q) {
  if (!q) return "";
  const parts = [];
  for (const [k, v] of Object.entries(q)) {
    if (v == null) continue;
    const values = Array.isArray(v) ? v : [v];
    for (const x of values) parts.push(encodeURIComponent(k) + "=" + encodeURIComponent(String(x)));
  }
  return parts.length ? "?" + parts.join("&") : "";
}

function b64(s) {
  const bytes = unescape(encodeURIComponent(s));
  const table = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
  let out = "";
  for (let i = 0; i < bytes.length; i += 3) {
    const a = bytes.charCodeAt(i);
    const b = i + 1 < bytes.length ? bytes.charCodeAt(i + 1) : NaN;
    const c = i + 2 < bytes.length ? bytes.charCodeAt(i + 2) : NaN;
    out += table[a >> 2];
    out += table[((a & 3) << 4) | (isNaN(b) ? 0 : b >> 4)];
    out += isNaN(b) ? "=" : table[((b & 15) << 2) | (isNaN(c) ? 0 : c >> 6)];
    out += isNaN(c) ? "=" : table[c & 63];
  }
  return out;
}

async function buildHeaders(cfg, options) {
  const out = {};
  const globalHeaders = typeof cfg.HEADERS === "function" ? await cfg.HEADERS() : cfg.HEADERS;
  for (const [k, v] of Object.entries(globalHeaders || {})) out[k] = String(v);

  const token = typeof cfg.TOKEN === "function" ? await cfg.TOKEN() : cfg.TOKEN;
  if (token) out["Authorization"] = "Bearer " + token;
  if (cfg.USERNAME || cfg.PASSWORD) {
    out["Authorization"] = "Basic " + b64((cfg.USERNAME || "") + ":" + (cfg.PASSWORD || ""));
  }

  for (const [k, v] of Object.entries((options && options.headers) || {})) out[k] = String(v);
  if (options && options.body != null && options.mediaType && !("Content-Type" in out)) {
    out["Content-Type"] = String(options.mediaType);
  }
  return out;
}

function serializeBody(options) {
  const body = options && options.body;
  if (body == null) return {};
  const mt = String((options && options.mediaType) || "");
  if (mt.includes("application/json")) return { bodyText: JSON.stringify(body) };
  if (mt.includes("application/x-www-form-urlencoded")) {
    const parts = [];
    for (const [k, v] of Object.entries(body)) {
      if (v != null) parts.push(encodeURIComponent(k) + "=" + encodeURIComponent(String(v)));
    }
    return { bodyText: parts.join("&") };
  }
  if (mt.includes("multipart/form-data") && typeof body === "object") return { form: body };
  return { bodyText: String(body) };
}

class BridgeHttpRequest {
  constructor(cfg) { this.cfg = cfg; }

  request(options) {
    const cfg = this.cfg;
    const base = String(cfg.BASE || "");
    const encodePath = typeof cfg.ENCODE_PATH === "function" ? cfg.ENCODE_PATH : (s) => s;
    const path = encodePath(String(options.path || options.url || ""));
    const url = base.replace(/\/$/, "") + "/" + path.replace(/^\//, "") + buildQuery(options.query);

    const p = (async () => {
      const headers = await buildHeaders(cfg, options);
      const body = serializeBody(options);
      const r = await globalThis.__HOST_BRIDGE__(url, {
        method: options.method || "GET",
        headers,
        ...body,
        timeout: cfg.TIMEOUT != null ? cfg.TIMEOUT : 5000,
      });

      const text = r.bodyText || "";
      const ct = (r.headers && r.headers["content-type"]) || "";
      let data = text;
      if (String(ct).toLowerCase().includes("application/json")) {
        try { data = JSON.parse(text); } catch {}
      }
      if (!r.ok) {
        const err = new Error("Request failed with status " + r.status);
        err.status = r.status;
        err.body = data;
        err.response = { status: r.status, headers: r.headers };
        throw err;
      }
      return data;
    })();

    const CancelablePromise = cfg.CancelablePromise;
    if (typeof CancelablePromise === "function") {
      return new CancelablePromise((resolve, reject) => { p.then(resolve, reject); });
    }
    return p;
  }
}

for (const ns of Object.keys(sdk)) {
  const mod = sdk[ns];
  if (mod && mod.OpenAPI && typeof mod.OpenAPI === "object") {
    mod.OpenAPI.HTTP = new BridgeHttpRequest(mod.OpenAPI);
  } else {
    throw new Error(
      "SDK '" + ns + "' does not expose a configurable request transport (missing OpenAPI config object)"
    );
  }
}

/* ---------- logging + execution ---------- */

"#;

/// Everything after the embedded user snippet: result finalization, the
/// error-catching entry function, and the well-known export.
const EPILOGUE: &str = r#"  const finalValue = typeof result === "undefined" ? __ret : result;
  const value = await awaitThenable(finalValue);
  return { ok: true, value: safePlain(value), logs: plainLogs() };
}

async function main() {
  try {
    return await __run();
  } catch (err) {
    __logs.push({ level: "error", args: [toPlainError(err)] });
    return { ok: false, error: toPlainError(err), logs: plainLogs() };
  }
}

globalThis.__SNIPPET_MAIN__ = main;
"#;
