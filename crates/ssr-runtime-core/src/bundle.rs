//! Render bundle compilation.
//!
//! A [`RenderBundle`] is the compiled form of the guest program. It is
//! compiled once at start-up and instantiated once per runtime, so every
//! runtime in the pool evaluates the same code.
//!
//! Bundles can be loaded from:
//! - `.wasm` binaries (JIT-compiled at load)
//! - `.wat` text (mainly tests and hand-written probes)
//! - `.cwasm` artifacts produced by `wasmtime compile` for fast cold start

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use ssr_runtime_common::RenderError;

/// A compiled render bundle.
///
/// Cheap to clone; the underlying [`Module`] is reference counted.
#[derive(Clone)]
pub struct RenderBundle {
    module: Module,
    content_hash: String,
    source: String,
}

impl RenderBundle {
    /// Load a bundle from disk, choosing the loader by file extension.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::RuntimeInit`] if the file is missing or does not compile.
    #[instrument(skip(engine, path), fields(path = %path.as_ref().display()))]
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let path = path.as_ref();
        let source = path.display().to_string();

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let bundle = match extension.as_deref() {
            Some("cwasm") => return Self::from_precompiled(engine, path),
            Some("wat") => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    RenderError::runtime_init(format!("Failed to read bundle {source}: {e}"))
                })?;
                Self::from_wat(engine, &text)?
            }
            _ => {
                let bytes = std::fs::read(path).map_err(|e| {
                    RenderError::runtime_init(format!("Failed to read bundle {source}: {e}"))
                })?;
                Self::from_bytes(engine, &bytes)?
            }
        };

        Ok(bundle.with_source(source))
    }

    /// Compile a bundle from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid module.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RenderError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            RenderError::runtime_init(format!("Bundle compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Render bundle compiled"
        );

        Ok(Self {
            module,
            content_hash,
            source: "<bytes>".to_string(),
        })
    }

    /// Compile a bundle from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or compile.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RenderError> {
        let start = Instant::now();

        let module = Module::new(engine, wat)
            .map_err(|e| RenderError::runtime_init(format!("WAT compilation failed: {e}")))?;

        let content_hash = compute_hash(wat.as_bytes());

        debug!(
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "WAT bundle compiled"
        );

        Ok(Self {
            module,
            content_hash,
            source: "<wat>".to_string(),
        })
    }

    /// Load a bundle precompiled with `wasmtime compile`.
    ///
    /// The artifact must come from the same Wasmtime version and engine settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be loaded or is incompatible.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, path))]
    pub fn from_precompiled(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let path = path.as_ref();
        let start = Instant::now();

        // SAFETY: precompiled bundles are produced by our own build and deployed
        // alongside the binary; they are never accepted from request input.
        let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
            RenderError::runtime_init(format!(
                "Failed to load precompiled bundle from {}: {e}",
                path.display()
            ))
        })?;

        let content_hash = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        debug!(
            path = %path.display(),
            duration_us = start.elapsed().as_micros(),
            "Precompiled bundle loaded"
        );

        Ok(Self {
            module,
            content_hash,
            source: path.display().to_string(),
        })
    }

    #[must_use]
    fn with_source(mut self, source: String) -> Self {
        self.source = source;
        self
    }

    /// The compiled module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Hash of the bundle's source bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Where the bundle was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }

    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RenderError> {
        if bytes.len() < 8 {
            return Err(RenderError::runtime_init("Invalid Wasm: file too small"));
        }

        if &bytes[0..4] != b"\0asm" {
            return Err(RenderError::runtime_init("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for RenderBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBundle")
            .field("content_hash", &self.content_hash)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RenderEngine;
    use ssr_runtime_common::EngineConfig;

    // Empty module: magic + version
    const MINIMAL_WASM: &[u8] = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    fn engine() -> RenderEngine {
        RenderEngine::new(&EngineConfig::default(), 1).unwrap()
    }

    #[test]
    fn test_validate_wasm_header() {
        assert!(RenderBundle::validate_wasm_header(MINIMAL_WASM).is_ok());
        assert!(RenderBundle::validate_wasm_header(&[0x00, 0x61]).is_err());
        assert!(RenderBundle::validate_wasm_header(&[0, 0, 0, 0, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_compute_hash() {
        assert_eq!(compute_hash(b"hello"), compute_hash(b"hello"));
        assert_ne!(compute_hash(b"hello"), compute_hash(b"world"));
        assert_eq!(compute_hash(b"hello").len(), 16);
    }

    #[test]
    fn test_bundle_from_bytes() {
        let engine = engine();
        let bundle = RenderBundle::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();
        assert!(!bundle.content_hash().is_empty());
        assert_eq!(bundle.source(), "<bytes>");
    }

    #[test]
    fn test_bundle_from_wat_error() {
        let engine = engine();
        let err = RenderBundle::from_wat(engine.inner(), "(module (func").unwrap_err();
        assert!(matches!(err, RenderError::RuntimeInit { .. }));
    }

    #[test]
    fn test_bundle_from_file_by_extension() {
        let engine = engine();
        let dir = std::env::temp_dir().join(format!("ssr-bundle-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let wat_path = dir.join("probe.wat");
        std::fs::write(&wat_path, "(module)").unwrap();
        let bundle = RenderBundle::from_file(engine.inner(), &wat_path).unwrap();
        assert!(bundle.source().ends_with("probe.wat"));

        let wasm_path = dir.join("probe.wasm");
        std::fs::write(&wasm_path, MINIMAL_WASM).unwrap();
        assert!(RenderBundle::from_file(engine.inner(), &wasm_path).is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bundle_missing_file() {
        let engine = engine();
        let err = RenderBundle::from_file(engine.inner(), "/nonexistent/ssr.wasm").unwrap_err();
        assert!(err.to_string().contains("Failed to read bundle"));
    }
}
