//! Module-graph assembly for the sandbox: the bundling step.
//!
//! [`SnippetLoader`] serves the synthesized entry module, substitutes
//! bridge-backed stand-ins for the HTTP client libraries generated SDKs
//! expect, and loads SDK sources only from beneath the SDK root. Every
//! host-capability module and every unrecognized specifier is denied at
//! resolution time, before anything evaluates, so not even a transitively
//! imported SDK can pull in filesystem, process, or socket access.

use std::path::PathBuf;

use deno_core::error::ModuleLoaderError;
use deno_core::{
    resolve_import, ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode,
    ModuleSpecifier, ModuleType, RequestedModuleType, ResolutionKind,
};
use deno_error::JsErrorBox;

/// Specifier of the synthesized entry module.
pub const ENTRY_SPECIFIER: &str = "islet:entry";

const SHIM_AXIOS: &str = "islet:shim/axios";
const SHIM_FORM_DATA: &str = "islet:shim/form-data";

/// Host-capability modules that must never appear in the dependency graph,
/// with or without the `node:` prefix.
pub const DENIED_MODULES: &[&str] = &[
    "fs",
    "child_process",
    "worker_threads",
    "vm",
    "cluster",
    "net",
    "tls",
    "dgram",
    "inspector",
    "process",
    "os",
    "http",
    "https",
];

/// Module loader for one snippet execution.
pub struct SnippetLoader {
    sdk_root: PathBuf,
    entry_source: String,
}

impl SnippetLoader {
    /// Create a loader serving `entry_source` at [`ENTRY_SPECIFIER`] and SDK
    /// files from beneath `sdk_root`.
    pub fn new(sdk_root: impl Into<PathBuf>, entry_source: String) -> Self {
        let sdk_root = sdk_root.into();
        // Canonicalize so symlinked SDK files cannot point outside the root.
        let sdk_root = std::fs::canonicalize(&sdk_root).unwrap_or(sdk_root);
        Self {
            sdk_root,
            entry_source,
        }
    }

    fn denied(specifier: &str) -> ModuleLoaderError {
        JsErrorBox::generic(format!(
            "module '{specifier}' is not available in the sandbox"
        ))
    }

    /// Resolve a `file:` URL to an existing module file, probing the
    /// conventional suffixes for extension-less imports (`./apis` →
    /// `./apis.js`, `./models` → `./models/index.js`).
    fn probe_file(&self, url: &ModuleSpecifier, specifier: &str) -> Result<PathBuf, ModuleLoaderError> {
        let path = url
            .to_file_path()
            .map_err(|_| Self::denied(specifier))?;

        let candidates = [
            path.clone(),
            PathBuf::from(format!("{}.js", path.display())),
            PathBuf::from(format!("{}.mjs", path.display())),
            path.join("index.js"),
            path.join("index.mjs"),
        ];
        let found = candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| {
                JsErrorBox::generic(format!("module '{specifier}' not found under the SDK root"))
            })?;

        let canonical = std::fs::canonicalize(&found).map_err(|e| {
            JsErrorBox::generic(format!("failed to read module '{specifier}': {e}"))
        })?;
        if !canonical.starts_with(&self.sdk_root) {
            return Err(Self::denied(specifier));
        }
        Ok(canonical)
    }

    fn load_inner(
        &self,
        module_specifier: &ModuleSpecifier,
    ) -> Result<ModuleSource, ModuleLoaderError> {
        let code: String = match module_specifier.as_str() {
            ENTRY_SPECIFIER => self.entry_source.clone(),
            SHIM_AXIOS => AXIOS_SHIM.to_string(),
            SHIM_FORM_DATA => FORM_DATA_SHIM.to_string(),
            other => {
                if module_specifier.scheme() != "file" {
                    return Err(Self::denied(other));
                }
                let path = module_specifier
                    .to_file_path()
                    .map_err(|_| Self::denied(other))?;
                if !path.starts_with(&self.sdk_root) {
                    return Err(Self::denied(other));
                }
                std::fs::read_to_string(&path).map_err(|e| {
                    JsErrorBox::generic(format!("failed to read module '{other}': {e}"))
                })?
            }
        };

        Ok(ModuleSource::new(
            ModuleType::JavaScript,
            ModuleSourceCode::String(code.into()),
            module_specifier,
            None,
        ))
    }
}

impl ModuleLoader for SnippetLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, ModuleLoaderError> {
        if specifier == ENTRY_SPECIFIER {
            return ModuleSpecifier::parse(specifier)
                .map_err(|e| JsErrorBox::generic(e.to_string()));
        }
        // Generated SDKs import their HTTP client libraries by bare name;
        // those resolve to the bridge-backed stand-ins instead.
        if specifier == "axios" {
            return ModuleSpecifier::parse(SHIM_AXIOS)
                .map_err(|e| JsErrorBox::generic(e.to_string()));
        }
        if specifier == "form-data" {
            return ModuleSpecifier::parse(SHIM_FORM_DATA)
                .map_err(|e| JsErrorBox::generic(e.to_string()));
        }

        let bare = specifier.strip_prefix("node:").unwrap_or(specifier);
        if DENIED_MODULES.contains(&bare) {
            return Err(Self::denied(specifier));
        }

        // Anything else must resolve to a file beneath the SDK root; bare
        // specifiers and foreign schemes fail closed.
        let resolved = resolve_import(specifier, referrer).map_err(|_| Self::denied(specifier))?;
        match resolved.scheme() {
            "file" => {
                let path = self.probe_file(&resolved, specifier)?;
                ModuleSpecifier::from_file_path(&path).map_err(|_| Self::denied(specifier))
            }
            _ => Err(Self::denied(specifier)),
        }
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        ModuleLoadResponse::Sync(self.load_inner(module_specifier))
    }
}

/// Axios-shaped stand-in served for `import axios from "axios"`. Routes
/// every request through the host bridge; no host APIs are referenced.
const AXIOS_SHIM: &str = r#"
function buildQuery(params) {
  if (!params) return "";
  const parts = [];
  for (const [k, v] of Object.entries(params)) {
    if (v == null) continue;
    const values = Array.isArray(v) ? v : [v];
    for (const x of values) parts.push(encodeURIComponent(k) + "=" + encodeURIComponent(String(x)));
  }
  return parts.length ? "?" + parts.join("&") : "";
}

function normHeaders(h) {
  const out = {};
  for (const [k, v] of Object.entries(h || {})) {
    out[String(k)] = Array.isArray(v) ? v.join(", ") : String(v);
  }
  return out;
}

function serializeBody(data, headers) {
  if (data == null) return { bodyText: undefined, headers };
  const ctKey = Object.keys(headers).find((k) => k.toLowerCase() === "content-type");
  const ct = ctKey ? String(headers[ctKey]) : "";
  if (ct.includes("application/json")) return { bodyText: JSON.stringify(data), headers };
  if (typeof data === "string") return { bodyText: data, headers };
  if (!ctKey) headers["Content-Type"] = "application/json";
  return { bodyText: JSON.stringify(data), headers };
}

function buildUrl(cfg, defaults) {
  const baseUrl = cfg.baseURL != null ? cfg.baseURL : (defaults.baseURL || "");
  const path = String(cfg.url || "");
  return (
    (baseUrl ? baseUrl.replace(/\/$/, "") + "/" : "") +
    path.replace(/^\//, "") +
    buildQuery(cfg.params)
  );
}

export class AxiosError extends Error {
  constructor(message, code, config, response) {
    super(message);
    this.name = "AxiosError";
    this.code = code;
    this.config = config;
    this.response = response;
    this.isAxiosError = true;
    if (response) {
      this.status = response.status;
      this.body = response.data;
    }
  }
}

export const CancelToken = {
  source: () => ({
    token: { __cancel_token_stub: true },
    cancel: () => {},
  }),
};

async function doRequest(cfg, defaults) {
  const url = buildUrl(cfg, defaults);
  const method = String(cfg.method || defaults.method || "GET").toUpperCase();
  const headers = { ...normHeaders(defaults.headers), ...normHeaders(cfg.headers) };
  const { bodyText, headers: finalHeaders } = serializeBody(cfg.data, headers);
  const timeout = cfg.timeout != null ? cfg.timeout : defaults.timeout != null ? defaults.timeout : 5000;

  const r = await globalThis.__HOST_BRIDGE__(url, { method, headers: finalHeaders, bodyText, timeout });

  const ct = (r.headers && r.headers["content-type"]) || "";
  let data = r.bodyText;
  if (String(ct).toLowerCase().includes("application/json")) {
    try { data = JSON.parse(r.bodyText || ""); } catch {}
  }
  const res = { data, status: r.status, statusText: String(r.status), headers: r.headers || {}, config: cfg };
  if (!r.ok) {
    throw new AxiosError("Request failed with status code " + r.status, String(r.status), cfg, res);
  }
  return res;
}

function makeInstance(defaults) {
  const inst = (config) => inst.request(config || {});
  inst.defaults = { ...(defaults || {}) };
  inst.interceptors = {
    request: { use: () => {} },
    response: { use: () => {} },
  };
  inst.request = (config) => doRequest(config, inst.defaults);

  for (const m of ["get", "delete", "head", "options"]) {
    inst[m] = (url, cfg) => inst.request({ ...(cfg || {}), url, method: m.toUpperCase() });
  }
  for (const m of ["post", "put", "patch"]) {
    inst[m] = (url, data, cfg) => inst.request({ ...(cfg || {}), url, method: m.toUpperCase(), data });
  }
  return inst;
}

const axios = makeInstance();
axios.create = (cfg) => makeInstance(cfg);
axios.CancelToken = CancelToken;
axios.AxiosError = AxiosError;
axios.isAxiosError = (e) => !!(e && e.isAxiosError);

export default axios;
"#;

/// Minimal form-data stand-in: collects fields for multipart passthrough to
/// the bridge.
const FORM_DATA_SHIM: &str = r#"
export default class FormData {
  constructor() {
    this._fields = {};
  }
  append(name, value) {
    (this._fields[name] = this._fields[name] || []).push(value);
  }
  getHeaders() {
    return { "Content-Type": "multipart/form-data" };
  }
  toJSON() {
    return this._fields;
  }
}
"#;
