//! The module registry runtime written at the top of every primary artifact.
//!
//! Factories are registered with `__rp_define({id: [factory, deps]})`, where
//! `deps` maps each specifier the module uses to a module id, or `null` for
//! a capability that does not exist in the target environment.

use crate::transforms::js_string;

const REGISTRY: &str = r#"const __rp_modules = Object.create(null);
const __rp_cache = Object.create(null);
function __rp_define(defs) {
  Object.assign(__rp_modules, defs);
}
function __rp_export(exports, getters) {
  Object.defineProperty(exports, "__esModule", { value: true });
  for (const name in getters) {
    Object.defineProperty(exports, name, { enumerable: true, get: getters[name] });
  }
}
function __rp_default(m) {
  return m && m.__esModule ? m.default : m;
}
function __rp_star(exports, m) {
  for (const name in m) {
    if (name !== "default" && !Object.prototype.hasOwnProperty.call(exports, name)) {
      Object.defineProperty(exports, name, { enumerable: true, get: () => m[name] });
    }
  }
}
function __rp_target(from, deps, specifier) {
  if (!(specifier in deps)) {
    throw new Error(from + ": unknown import '" + specifier + "'");
  }
  return deps[specifier];
}
function __rp_load(id) {
  const cached = __rp_cache[id];
  if (cached) {
    return cached.exports;
  }
  const def = __rp_modules[id];
  if (!def) {
    throw new Error("module not loaded: " + id);
  }
  const [factory, deps] = def;
  const module = { exports: {} };
  __rp_cache[id] = module;
  const require = (specifier) => {
    const target = __rp_target(id, deps, specifier);
    return target === null ? {} : __rp_load(target);
  };
  const __import = (specifier) => {
    try {
      const target = __rp_target(id, deps, specifier);
      if (target === null) {
        return Promise.resolve({});
      }
      return __rp_ensure(target).then(() => __rp_load(target));
    } catch (err) {
      return Promise.reject(err);
    }
  };
  factory.call(module.exports, module, module.exports, require, __import);
  return module.exports;
}
"#;

/// Runtime source. `chunk` is the secondary chunk's file name, if the entry
/// has one.
pub fn runtime_source(chunk: Option<&str>) -> String {
    let mut out = String::from(REGISTRY);
    match chunk {
        Some(name) => {
            out.push_str("let __rp_chunk = null;\n");
            out.push_str("function __rp_ensure(id) {\n");
            out.push_str("  if (__rp_modules[id]) {\n    return Promise.resolve();\n  }\n");
            out.push_str("  if (!__rp_chunk) {\n");
            out.push_str(&format!(
                "    __rp_chunk = import(new URL({}, import.meta.url).href)\n      \
                 .then((m) => m.default(__rp_define));\n",
                js_string(&format!("./{}", name))
            ));
            out.push_str("  }\n  return __rp_chunk;\n}\n");
        }
        None => {
            out.push_str("function __rp_ensure(id) {\n");
            out.push_str("  return __rp_modules[id]\n    ? Promise.resolve()\n");
            out.push_str("    : Promise.reject(new Error(\"module not loaded: \" + id));\n");
            out.push_str("}\n");
        }
    }
    out
}
