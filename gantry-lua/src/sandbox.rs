//! Lua sandbox creation
//!
//! Pipeline definitions are plain data, so the sandbox only exposes tables,
//! strings and math. There is no io, os, package or debug library, and
//! `require`/`dofile`/`loadfile` are removed.
//!
//! The `pipeline` helper module is always injected.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Create a restricted Lua sandbox with the `pipeline` module registered
///
/// # Example
/// ```
/// use gantry_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let step: mlua::Table = lua.load(r#"return pipeline.install({"apk", "add", "curl"})"#).eval()?;
/// let kind: String = step.get("type")?;
/// assert_eq!(kind, "install");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;

    register_pipeline_module(&lua)?;

    Ok(lua)
}

/// Register the `pipeline` helper module
///
/// `define`, `component`, `health` and `smoke` return their table as-is and
/// exist for readability. The step, cache and mount helpers build the tables
/// the parser understands.
fn register_pipeline_module(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    let passthrough = lua.create_function(|_, definition: Table| Ok(definition))?;
    pipeline.set("define", passthrough.clone())?;
    pipeline.set("component", passthrough.clone())?;
    pipeline.set("health", passthrough.clone())?;
    pipeline.set("smoke", passthrough)?;

    // pipeline.install({"npm", "install"})
    let install_fn = lua.create_function(|lua, command: Table| {
        let step = lua.create_table()?;
        step.set("type", "install")?;
        step.set("command", command)?;
        Ok(step)
    })?;
    pipeline.set("install", install_fn)?;

    // pipeline.sh("apk add --no-cache git curl")
    let sh_fn = lua.create_function(|lua, script: String| {
        let step = lua.create_table()?;
        step.set("type", "install")?;
        step.set("command", vec!["sh".to_string(), "-c".to_string(), script])?;
        Ok(step)
    })?;
    pipeline.set("sh", sh_fn)?;

    // pipeline.file("/app/server.js", [[ ... ]])
    let file_fn = lua.create_function(|lua, (path, contents): (String, String)| {
        let step = lua.create_table()?;
        step.set("type", "file")?;
        step.set("path", path)?;
        step.set("contents", contents)?;
        Ok(step)
    })?;
    pipeline.set("file", file_fn)?;

    // pipeline.cache("npm-cache", "/root/.npm")
    let cache_fn = lua.create_function(|lua, (key, path): (String, String)| {
        let cache = lua.create_table()?;
        cache.set("key", key)?;
        cache.set("path", path)?;
        Ok(cache)
    })?;
    pipeline.set("cache", cache_fn)?;

    // pipeline.mount(".", "/workspace")
    let mount_fn = lua.create_function(|lua, (source, target): (String, String)| {
        let mount = lua.create_table()?;
        mount.set("source", source)?;
        mount.set("target", target)?;
        Ok(mount)
    })?;
    pipeline.set("mount", mount_fn)?;

    lua.globals().set("pipeline", pipeline)?;

    Ok(())
}

/// Lua language server stubs for the `pipeline` module
pub fn pipeline_stubs() -> &'static str {
    r#"---@meta

---Pipeline definition helpers for Gantry
---@class pipeline
pipeline = {}

---@class gantry.HealthCheck
---@field port integer Container port serving the health endpoint
---@field path? string Request path (default "/health")
---@field timeout? integer Seconds the service gets to become ready (default 60)
---@field interval_ms? integer Delay between probes in milliseconds (default 500)

---@class gantry.Smoke
---@field command? string[]|string Diagnostic command (default: the entrypoint)
---@field timeout? integer Seconds before the test fails (default 60)

---@class gantry.Component
---@field name string Unique component name
---@field image string Base image
---@field workdir? string Working directory
---@field env? table<string, string> Environment variables
---@field steps? table[] Setup steps (pipeline.install / pipeline.sh / pipeline.file)
---@field caches? table[] Shared dependency caches (pipeline.cache)
---@field mounts? table[] Host directories mounted into the containers (pipeline.mount)
---@field ports? integer[] Exposed ports
---@field entrypoint? string[]|string Command the component runs
---@field smoke? gantry.Smoke Run-to-completion smoke test
---@field health? gantry.HealthCheck Readiness probe for long-running services

---@class gantry.Pipeline
---@field name string Pipeline name
---@field description? string
---@field components gantry.Component[]

---Declare a pipeline
---@param definition gantry.Pipeline
---@return gantry.Pipeline
function pipeline.define(definition) end

---Declare a component
---@param component gantry.Component
---@return gantry.Component
function pipeline.component(component) end

---Run a command in the build environment
---@param command string[]
---@return table
function pipeline.install(command) end

---Run a shell script in the build environment
---@param script string
---@return table
function pipeline.sh(script) end

---Write a file into the build environment
---@param path string
---@param contents string
---@return table
function pipeline.file(path, contents) end

---Mount a shared dependency cache
---@param key string
---@param path string
---@return table
function pipeline.cache(key, path) end

---Mount a host directory (relative to where gantry runs)
---@param source string
---@param target string Absolute path in the container
---@return table
function pipeline.mount(source, target) end

---@param check gantry.HealthCheck
---@return gantry.HealthCheck
function pipeline.health(check) end

---@param smoke gantry.Smoke
---@return gantry.Smoke
function pipeline.smoke(smoke) end
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_basic_lua() {
        let lua = create_sandbox().unwrap();

        let result: i32 = lua
            .load(
                r#"
                local t = {a = 1, b = 2}
                return t.a + t.b
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 3);

        let result: String = lua.load(r#"return string.upper("hello")"#).eval().unwrap();
        assert_eq!(result, "HELLO");
    }

    #[test]
    fn test_sandbox_no_io() {
        let lua = create_sandbox().unwrap();

        let has_io: bool = lua.load(r#"return io ~= nil"#).eval().unwrap();
        assert!(!has_io);

        let has_os: bool = lua.load(r#"return os ~= nil"#).eval().unwrap();
        assert!(!has_os);
    }

    #[test]
    fn test_sandbox_no_require() {
        let lua = create_sandbox().unwrap();

        let result: LuaResult<()> = lua.load(r#"require("os")"#).exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_pipeline_step_helpers() {
        let lua = create_sandbox().unwrap();

        let kind: String = lua
            .load(r#"return pipeline.file("/app/a.txt", "hi").type"#)
            .eval()
            .unwrap();
        assert_eq!(kind, "file");

        let command: Vec<String> = lua
            .load(r#"return pipeline.sh("npm install").command"#)
            .eval()
            .unwrap();
        assert_eq!(command, vec!["sh", "-c", "npm install"]);

        let key: String = lua
            .load(r#"return pipeline.cache("npm-cache", "/root/.npm").key"#)
            .eval()
            .unwrap();
        assert_eq!(key, "npm-cache");

        let target: String = lua
            .load(r#"return pipeline.mount(".", "/workspace").target"#)
            .eval()
            .unwrap();
        assert_eq!(target, "/workspace");
    }

    #[test]
    fn test_pipeline_define_passthrough() {
        let lua = create_sandbox().unwrap();

        let name: String = lua
            .load(r#"return pipeline.define({ name = "quick-start" }).name"#)
            .eval()
            .unwrap();
        assert_eq!(name, "quick-start");
    }

    #[test]
    fn test_stubs_cover_helpers() {
        let stubs = pipeline_stubs();
        for helper in [
            "define", "component", "install", "sh", "file", "cache", "mount", "health", "smoke",
        ] {
            assert!(
                stubs.contains(&format!("function pipeline.{}(", helper)),
                "missing stub for {}",
                helper
            );
        }
    }
}
