//! Dynamic-library plugin registry (feature `plugins`).
//!
//! `libloading` handles the actual `.so`/`.dylib`/`.dll` loading; the
//! feature is optional so a plaintext- or TLS-only embedder never has to
//! link against it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use libloading::Library;
use tracing::info;

use crate::error::{Error, Result};

/// A loaded plugin library and the version it was opened at.
pub struct LoadedLibrary {
    name: String,
    version: u32,
    library: Library,
}

impl std::fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl LoadedLibrary {
    /// The name this library was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version this library was opened at.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Looks up a symbol in the loaded library.
    ///
    /// # Safety
    ///
    /// Callers must ensure `S` matches the actual type of the symbol in the
    /// library; `libloading` cannot verify this.
    pub unsafe fn get<S>(&self, symbol: &[u8]) -> std::result::Result<libloading::Symbol<'_, S>, libloading::Error> {
        unsafe { self.library.get(symbol) }
    }
}

/// Registry of dynamically-loaded plugin libraries.
///
/// Mutated by [`get`](Self::get) whenever a not-yet-loaded name is
/// requested, and iterated by [`close_all`](Self::close_all) at shutdown.
/// Kept behind a mutex since nothing here guarantees callers only invoke
/// [`get`](Self::get) during startup.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    libraries: Mutex<HashMap<String, Arc<LoadedLibrary>>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the library registered under `name`, opening it from `path`
    /// at `version` if it is not already present. If a library with this
    /// name is already loaded, returns it only when its recorded version is
    /// at least `version`; otherwise returns `None` without touching the
    /// registry.
    ///
    /// # Safety
    ///
    /// Loading a dynamic library runs its initialization code; callers must
    /// trust `path`.
    pub unsafe fn get(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        version: u32,
    ) -> Result<Option<Arc<LoadedLibrary>>> {
        let mut libraries = self.libraries.lock().expect("plugin registry mutex poisoned");
        if let Some(existing) = libraries.get(name) {
            return Ok((existing.version >= version).then(|| Arc::clone(existing)));
        }

        let library = unsafe { Library::new(path.as_ref()) }.map_err(|source| Error::Plugin {
            name: name.to_owned(),
            source,
        })?;
        info!(plugin = name, version, "loaded plugin");
        let loaded = Arc::new(LoadedLibrary {
            name: name.to_owned(),
            version,
            library,
        });
        libraries.insert(name.to_owned(), Arc::clone(&loaded));
        Ok(Some(loaded))
    }

    /// Drops every loaded library, unloading it. Invoked only at shutdown.
    pub fn close_all(&self) {
        let mut libraries = self.libraries.lock().expect("plugin registry mutex poisoned");
        let count = libraries.len();
        libraries.clear();
        if count > 0 {
            info!(count, "closed all plugins");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_path_is_a_plugin_error() {
        let registry = PluginRegistry::new();
        let result = unsafe { registry.get("nope", "/does/not/exist.so", 1) };
        assert!(matches!(result, Err(Error::Plugin { .. })));
    }

    #[test]
    fn close_all_empties_the_registry() {
        let registry = PluginRegistry::new();
        registry.close_all();
        assert!(registry.libraries.lock().unwrap().is_empty());
    }
}
