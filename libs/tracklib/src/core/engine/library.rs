// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Native engine loaded from a dynamic library (.dylib/.so/.dll).

use std::ffi::{c_char, c_void, CStr};
use std::mem::transmute;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use libloading::Library;
use parking_lot::RwLock;

use super::{CommandCallback, ListenerCallback, NativeEngine};
use crate::core::{BridgeError, Result};

/// ABI revision of the `tracklib_engine_*` symbol set this crate calls.
pub const TRACKLIB_ENGINE_ABI_VERSION: u32 = 1;

type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(engine: *mut c_void);
type CommandFn = unsafe extern "C" fn(
    engine: *mut c_void,
    request_json: *const c_char,
    callback: CommandCallback,
    client_data: *mut c_void,
) -> bool;
type ListenerFn = unsafe extern "C" fn(
    engine: *mut c_void,
    stream: *const c_char,
    callback: ListenerCallback,
    client_data: *mut c_void,
) -> bool;

/// Function pointers copied out of the library. Valid while `_library` lives.
struct EngineApi {
    destroy: DestroyFn,
    push_command: CommandFn,
    process_command: CommandFn,
    add_listener: ListenerFn,
    remove_listener: ListenerFn,
}

/// Engine instance pointer. Null once destroyed.
struct EnginePtr(*mut c_void);

// The engine instance is thread-safe per its C contract; all access goes
// through the RwLock so destroy never races a call.
unsafe impl Send for EnginePtr {}
unsafe impl Sync for EnginePtr {}

/// Where the `tracklib_engine_*` exports are looked up.
trait SymbolTable {
    /// Address of the exported symbol `name`.
    fn address(&self, name: &str) -> std::result::Result<*mut c_void, String>;
}

impl SymbolTable for Library {
    fn address(&self, name: &str) -> std::result::Result<*mut c_void, String> {
        let symbol = unsafe { self.get::<*mut c_void>(name.as_bytes()) }.map_err(|e| e.to_string())?;
        Ok(*symbol)
    }
}

/// Everything resolved from a symbol table before an instance exists.
struct Bindings {
    abi_version: u32,
    create: CreateFn,
    api: EngineApi,
}

/// Check the ABI version and resolve every required entry point.
///
/// # Safety
///
/// Each symbol must have the type its name implies: `TRACKLIB_ENGINE_ABI_VERSION`
/// a `u32`, the `tracklib_engine_*` symbols functions with the signatures above.
unsafe fn bind(symbols: &impl SymbolTable, origin: &str) -> Result<Bindings> {
    let lookup = |name: &str| match symbols.address(name) {
        Ok(address) if !address.is_null() => Ok(address),
        Ok(_) => Err(missing_symbol(origin, name, "null address")),
        Err(e) => Err(missing_symbol(origin, name, &e)),
    };

    let abi_version = unsafe { *lookup("TRACKLIB_ENGINE_ABI_VERSION")?.cast::<u32>() };
    if abi_version != TRACKLIB_ENGINE_ABI_VERSION {
        return Err(BridgeError::Library(format!(
            "ABI version mismatch for '{}': engine has v{}, bridge expects v{}",
            origin, abi_version, TRACKLIB_ENGINE_ABI_VERSION
        )));
    }

    unsafe {
        Ok(Bindings {
            abi_version,
            create: transmute::<*mut c_void, CreateFn>(lookup("tracklib_engine_create")?),
            api: EngineApi {
                destroy: transmute::<*mut c_void, DestroyFn>(lookup("tracklib_engine_destroy")?),
                push_command: transmute::<*mut c_void, CommandFn>(lookup(
                    "tracklib_engine_push_command",
                )?),
                process_command: transmute::<*mut c_void, CommandFn>(lookup(
                    "tracklib_engine_process_command",
                )?),
                add_listener: transmute::<*mut c_void, ListenerFn>(lookup(
                    "tracklib_engine_add_listener",
                )?),
                remove_listener: transmute::<*mut c_void, ListenerFn>(lookup(
                    "tracklib_engine_remove_listener",
                )?),
            },
        })
    }
}

fn missing_symbol(origin: &str, symbol: &str, reason: &str) -> BridgeError {
    BridgeError::Library(format!(
        "'{}' is missing symbol {}: {}",
        origin, symbol, reason
    ))
}

/// [`NativeEngine`] backed by a `tracklib_engine_*` dynamic library.
///
/// The library stays loaded for the lifetime of this value so the callbacks
/// the engine holds keep pointing at mapped code.
pub struct NativeLibraryEngine {
    api: EngineApi,
    instance: RwLock<EnginePtr>,
    destroyed: AtomicBool,
    // Declared last: dropped after the instance is destroyed. `None` when the
    // entry points are linked into this process.
    _library: Option<Library>,
}

impl NativeLibraryEngine {
    /// Load the library at `path`, check its ABI version and create one
    /// engine instance.
    pub fn load(path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(path) }.map_err(|e| {
            BridgeError::Library(format!("failed to load '{}': {}", path.display(), e))
        })?;
        let origin = path.display().to_string();
        let bindings = unsafe { bind(&library, &origin)? };
        Self::instantiate(bindings, &origin, Some(library))
    }

    fn instantiate(bindings: Bindings, origin: &str, library: Option<Library>) -> Result<Self> {
        let instance = unsafe { (bindings.create)() };
        if instance.is_null() {
            return Err(BridgeError::Library(format!(
                "tracklib_engine_create returned null for '{}'",
                origin
            )));
        }

        tracing::info!(
            "Loaded native engine '{}' (ABI v{})",
            origin,
            bindings.abi_version
        );

        Ok(Self {
            api: bindings.api,
            instance: RwLock::new(EnginePtr(instance)),
            destroyed: AtomicBool::new(false),
            _library: library,
        })
    }

    /// Tear the engine instance down. The engine cancels in-flight commands
    /// through their callbacks. Idempotent.
    pub fn destroy(&self) {
        let mut instance = self.instance.write();
        if instance.0.is_null() {
            return;
        }
        self.destroyed.store(true, Ordering::Release);
        unsafe { (self.api.destroy)(instance.0) };
        instance.0 = std::ptr::null_mut();
        tracing::debug!("Native engine destroyed");
    }

    // Callbacks may re-enter the engine on this thread while the entry point
    // runs, so the read side must not queue behind a waiting destroy().
    fn call_command(
        &self,
        entry: CommandFn,
        request_json: &CStr,
        callback: CommandCallback,
        client_data: *mut c_void,
    ) -> bool {
        let instance = self.instance.read_recursive();
        if instance.0.is_null() {
            return false;
        }
        unsafe { entry(instance.0, request_json.as_ptr(), callback, client_data) }
    }

    fn call_listener(
        &self,
        entry: ListenerFn,
        stream: &CStr,
        callback: ListenerCallback,
        client_data: *mut c_void,
    ) -> bool {
        let instance = self.instance.read_recursive();
        if instance.0.is_null() {
            return false;
        }
        unsafe { entry(instance.0, stream.as_ptr(), callback, client_data) }
    }
}

impl NativeEngine for NativeLibraryEngine {
    fn push_command(
        &self,
        request_json: &CStr,
        callback: CommandCallback,
        client_data: *mut c_void,
    ) -> bool {
        self.call_command(self.api.push_command, request_json, callback, client_data)
    }

    fn process_command(
        &self,
        request_json: &CStr,
        callback: CommandCallback,
        client_data: *mut c_void,
    ) -> bool {
        self.call_command(self.api.process_command, request_json, callback, client_data)
    }

    fn add_listener(
        &self,
        stream: &CStr,
        callback: ListenerCallback,
        client_data: *mut c_void,
    ) -> bool {
        self.call_listener(self.api.add_listener, stream, callback, client_data)
    }

    fn remove_listener(
        &self,
        stream: &CStr,
        callback: ListenerCallback,
        client_data: *mut c_void,
    ) -> bool {
        self.call_listener(self.api.remove_listener, stream, callback, client_data)
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Drop for NativeLibraryEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}
