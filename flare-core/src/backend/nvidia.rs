//! Runtime probing of the NVIDIA driver libraries
//!
//! The driver ships its CUDA, NVENC and NvFBC entry points as shared
//! libraries. They are loaded dynamically so the crate builds and runs on
//! machines without an NVIDIA GPU; the hardware backend is only offered when
//! detection succeeds.

#![allow(non_camel_case_types)]

use std::ffi::c_int;
use std::sync::OnceLock;
use tracing::{debug, info};

/// CUDA driver API result code
pub type CUresult = c_int;

/// NVENC API status code
pub type NVENCSTATUS = c_int;

/// `CUDA_SUCCESS`
pub const CUDA_SUCCESS: CUresult = 0;

/// `NV_ENC_SUCCESS`
pub const NV_ENC_SUCCESS: NVENCSTATUS = 0;

pub type FnCuInit = unsafe extern "C" fn(flags: u32) -> CUresult;
pub type FnCuDeviceGetCount = unsafe extern "C" fn(count: *mut c_int) -> CUresult;
pub type FnNvEncodeApiGetMaxSupportedVersion = unsafe extern "C" fn(version: *mut u32) -> NVENCSTATUS;

/// Library names to try for the CUDA driver API
pub const CUDA_LIB_PATHS: &[&str] = &["libcuda.so.1", "libcuda.so"];

/// Library names to try for the NVENC runtime
pub const NVENC_LIB_PATHS: &[&str] = &["libnvidia-encode.so.1", "libnvidia-encode.so"];

/// Library names to try for NvFBC (framebuffer capture)
pub const NVFBC_LIB_PATHS: &[&str] = &["libnvidia-fbc.so.1", "libnvidia-fbc.so"];

/// Dynamically loaded CUDA driver entry points
pub struct CudaLib {
    _lib: libloading::Library,
    pub init: FnCuInit,
    pub device_get_count: FnCuDeviceGetCount,
}

impl CudaLib {
    /// Try to load libcuda from standard names
    pub fn load() -> Result<Self, String> {
        first_loadable(CUDA_LIB_PATHS, Self::load_from_path)
    }

    /// Load the library from a specific path
    pub fn load_from_path(path: &str) -> Result<Self, String> {
        // SAFETY: libcuda is the NVIDIA driver's CUDA library. The function
        // signatures match the CUDA driver API headers. Function pointers are
        // copied out while the library handle is kept alive in `_lib`.
        unsafe {
            let lib = libloading::Library::new(path)
                .map_err(|e| format!("Failed to load {}: {}", path, e))?;

            let init: FnCuInit = *lib
                .get::<FnCuInit>(b"cuInit")
                .map_err(|e| format!("Failed to get cuInit: {}", e))?;

            let device_get_count: FnCuDeviceGetCount = *lib
                .get::<FnCuDeviceGetCount>(b"cuDeviceGetCount")
                .map_err(|e| format!("Failed to get cuDeviceGetCount: {}", e))?;

            Ok(Self {
                _lib: lib,
                init,
                device_get_count,
            })
        }
    }

    /// Number of CUDA devices, initializing the driver first
    pub fn device_count(&self) -> Result<u32, String> {
        let mut count: c_int = 0;
        // SAFETY: cuInit takes flags by value (must be 0); cuDeviceGetCount
        // writes one int through a valid pointer.
        let status = unsafe { (self.init)(0) };
        if status != CUDA_SUCCESS {
            return Err(format!("cuInit failed with status {}", status));
        }
        let status = unsafe { (self.device_get_count)(&mut count) };
        if status != CUDA_SUCCESS {
            return Err(format!("cuDeviceGetCount failed with status {}", status));
        }
        Ok(count.max(0) as u32)
    }
}

/// Dynamically loaded NVENC runtime entry points
pub struct NvencLib {
    _lib: libloading::Library,
    pub get_max_supported_version: FnNvEncodeApiGetMaxSupportedVersion,
}

impl NvencLib {
    /// Try to load the NVENC runtime from standard names
    pub fn load() -> Result<Self, String> {
        first_loadable(NVENC_LIB_PATHS, Self::load_from_path)
    }

    /// Load the library from a specific path
    pub fn load_from_path(path: &str) -> Result<Self, String> {
        // SAFETY: libnvidia-encode is the NVIDIA driver's encoder library.
        // The signature matches nvEncodeAPI.h.
        unsafe {
            let lib = libloading::Library::new(path)
                .map_err(|e| format!("Failed to load {}: {}", path, e))?;

            let get_max_supported_version: FnNvEncodeApiGetMaxSupportedVersion = *lib
                .get::<FnNvEncodeApiGetMaxSupportedVersion>(b"NvEncodeAPIGetMaxSupportedVersion")
                .map_err(|e| format!("Failed to get NvEncodeAPIGetMaxSupportedVersion: {}", e))?;

            Ok(Self {
                _lib: lib,
                get_max_supported_version,
            })
        }
    }

    /// Highest NVENC API version the driver supports, as (major, minor)
    pub fn max_api_version(&self) -> Result<(u32, u32), String> {
        let mut version: u32 = 0;
        // SAFETY: writes one u32 through a valid pointer.
        let status = unsafe { (self.get_max_supported_version)(&mut version) };
        if status != NV_ENC_SUCCESS {
            return Err(format!(
                "NvEncodeAPIGetMaxSupportedVersion failed with status {}",
                status
            ));
        }
        Ok((version >> 4, version & 0xf))
    }
}

// SAFETY: both structs only hold function pointers into driver libraries that
// are documented as thread-safe, and the library handle outlives them.
unsafe impl Send for CudaLib {}
unsafe impl Sync for CudaLib {}
unsafe impl Send for NvencLib {}
unsafe impl Sync for NvencLib {}

fn first_loadable<T>(paths: &[&str], load: fn(&str) -> Result<T, String>) -> Result<T, String> {
    let mut last_error = String::from("no library paths");
    for path in paths {
        match load(path) {
            Ok(lib) => {
                debug!("Loaded NVIDIA library from: {}", path);
                return Ok(lib);
            }
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

/// Result of probing the NVIDIA driver
#[derive(Debug, Clone, Default)]
pub struct NvidiaRuntime {
    /// CUDA devices found (0 when libcuda is missing)
    pub cuda_devices: u32,
    /// Max NVENC API version, if the runtime loaded
    pub nvenc_api: Option<(u32, u32)>,
    /// Whether the NvFBC capture library is installed
    pub nvfbc_present: bool,
    /// Why probing stopped early, if it did
    pub error: Option<String>,
}

impl NvidiaRuntime {
    /// Whether hardware encoding can be attempted
    pub fn can_encode(&self) -> bool {
        self.cuda_devices > 0 && self.nvenc_api.is_some()
    }
}

fn detect() -> NvidiaRuntime {
    let mut runtime = NvidiaRuntime::default();

    match CudaLib::load().and_then(|cuda| cuda.device_count()) {
        Ok(count) => runtime.cuda_devices = count,
        Err(e) => runtime.error = Some(e),
    }
    match NvencLib::load().and_then(|nvenc| nvenc.max_api_version()) {
        Ok(version) => runtime.nvenc_api = Some(version),
        Err(e) => {
            runtime.error.get_or_insert(e);
        }
    }
    runtime.nvfbc_present = NVFBC_LIB_PATHS.iter().any(|path| {
        // SAFETY: only checks that the library can be mapped; no symbols are
        // called and the handle is dropped immediately.
        unsafe { libloading::Library::new(path) }.is_ok()
    });

    if runtime.can_encode() {
        info!(
            "NVIDIA runtime: {} CUDA device(s), NVENC API {:?}",
            runtime.cuda_devices, runtime.nvenc_api
        );
    } else {
        debug!("NVIDIA runtime unavailable: {:?}", runtime.error);
    }
    runtime
}

/// Detect once and cache the result
pub fn runtime() -> &'static NvidiaRuntime {
    static RUNTIME: OnceLock<NvidiaRuntime> = OnceLock::new();
    RUNTIME.get_or_init(detect)
}

/// Whether the CUDA and NVENC driver libraries are usable
pub fn is_nvenc_runtime_available() -> bool {
    runtime().can_encode()
}
