//! FFI bindings for the evasion risk engine
//!
//! This module provides C-compatible functions for calling the engine from other
//! languages. All functions use C strings (null-terminated) and return allocated
//! memory that must be freed by the caller using `evasion_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::estimator::LogisticModel;
use crate::pipeline::RiskEngine;
use crate::schema::RawRow;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a result across the boundary: the string on success, NULL plus the
/// last error otherwise
fn finish(result: Result<String, EngineError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn build_engine(model_json: &str, config_json: Option<&str>) -> Result<RiskEngine, EngineError> {
    let config = match config_json {
        Some(json) => EngineConfig::from_json(json)?,
        None => EngineConfig::default(),
    };
    RiskEngine::with_estimator(config, LogisticModel::from_json(model_json)?)
}

fn predict_with(engine: &RiskEngine, grid_json: &str) -> Result<String, EngineError> {
    let rows: Vec<RawRow> = serde_json::from_str(grid_json)?;
    let outcome = engine.predict_students(&rows)?;
    Ok(serde_json::to_string(&outcome)?)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Score a grid and return the batch outcome as JSON.
///
/// # Safety
/// - `grid_json` and `model_json` must be valid null-terminated C strings.
/// - `config_json` may be NULL to use the default configuration.
/// - Returns a newly allocated string that must be freed with `evasion_free_string`.
/// - Returns NULL on error; call `evasion_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn evasion_predict_json(
    grid_json: *const c_char,
    model_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let grid = match cstr_to_string(grid_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid grid string pointer");
            return ptr::null_mut();
        }
    };

    let model = match cstr_to_string(model_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid model string pointer");
            return ptr::null_mut();
        }
    };

    let config = if config_json.is_null() {
        None
    } else {
        match cstr_to_string(config_json) {
            Some(s) => Some(s),
            None => {
                set_last_error("Config string is not valid UTF-8");
                return ptr::null_mut();
            }
        }
    };

    finish(build_engine(&model, config.as_deref()).and_then(|engine| predict_with(&engine, &grid)))
}

/// Return the default engine configuration as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `evasion_free_string`.
#[no_mangle]
pub unsafe extern "C" fn evasion_default_config_json() -> *mut c_char {
    clear_last_error();
    finish(EngineConfig::default().to_json())
}

// ============================================================================
// Engine Handle API
// ============================================================================

/// Opaque handle to a RiskEngine
pub struct EvasionEngineHandle {
    engine: RiskEngine,
}

/// Create an engine that can score many grids with the same model.
///
/// # Safety
/// - `model_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL to use the default configuration.
/// - Must be freed with `evasion_engine_free`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn evasion_engine_new(
    model_json: *const c_char,
    config_json: *const c_char,
) -> *mut EvasionEngineHandle {
    clear_last_error();

    let model = match cstr_to_string(model_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid model string pointer");
            return ptr::null_mut();
        }
    };
    let config = if config_json.is_null() {
        None
    } else {
        match cstr_to_string(config_json) {
            Some(s) => Some(s),
            None => {
                set_last_error("Config string is not valid UTF-8");
                return ptr::null_mut();
            }
        }
    };

    match build_engine(&model, config.as_deref()) {
        Ok(engine) => Box::into_raw(Box::new(EvasionEngineHandle { engine })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `evasion_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn evasion_engine_free(handle: *mut EvasionEngineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Score a grid with an existing engine.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `evasion_engine_new`.
/// - `grid_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `evasion_free_string`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn evasion_engine_predict(
    handle: *const EvasionEngineHandle,
    grid_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*handle;

    let grid = match cstr_to_string(grid_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid grid string pointer");
            return ptr::null_mut();
        }
    };

    finish(predict_with(&handle.engine, &grid))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by engine functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an `evasion_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn evasion_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next engine call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn evasion_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn evasion_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_grid() -> CString {
        CString::new(
            r#"[
                ["Base de dados"],
                ["Matrícula", "Nome", "Curso", "Pend. Financ.", "Faltas Consecutivas"],
                ["2023001", "Ana", "Enfermagem", "S", 0],
                ["2023002", "Bruno", "Direito", "N", 2]
            ]"#,
        )
        .unwrap()
    }

    fn sample_model() -> CString {
        CString::new(LogisticModel::new(-2.0, [0.0; crate::types::FEATURE_COUNT]).to_json().unwrap())
            .unwrap()
    }

    #[test]
    fn test_ffi_predict_json() {
        let grid = sample_grid();
        let model = sample_model();

        unsafe {
            let result = evasion_predict_json(grid.as_ptr(), model.as_ptr(), ptr::null());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let parsed: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(parsed["predictions"].as_array().unwrap().len(), 2);
            assert_eq!(parsed["predictions"][0]["dominant_factor"], "financial_hold");

            evasion_free_string(result);
        }
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        let model = sample_model();
        let config = CString::new(r#"{"workers": 2}"#).unwrap();

        unsafe {
            let engine = evasion_engine_new(model.as_ptr(), config.as_ptr());
            assert!(!engine.is_null());

            let grid = sample_grid();
            let first = evasion_engine_predict(engine, grid.as_ptr());
            let second = evasion_engine_predict(engine, grid.as_ptr());
            assert!(!first.is_null());
            assert_eq!(CStr::from_ptr(first), CStr::from_ptr(second));

            evasion_free_string(first);
            evasion_free_string(second);
            evasion_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let grid = CString::new("not json").unwrap();
        let model = sample_model();

        unsafe {
            let result = evasion_predict_json(grid.as_ptr(), model.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = evasion_last_error();
            assert!(!error.is_null());
            assert!(!CStr::from_ptr(error).to_str().unwrap().is_empty());
        }
    }

    #[test]
    fn test_ffi_invalid_config_rejected() {
        let model = sample_model();
        let config = CString::new(r#"{"rules": {"absence_threshold": -1}}"#).unwrap();

        unsafe {
            let engine = evasion_engine_new(model.as_ptr(), config.as_ptr());
            assert!(engine.is_null());
            let error = CStr::from_ptr(evasion_last_error()).to_str().unwrap();
            assert!(error.contains("absence_threshold"));
        }
    }

    #[test]
    fn test_ffi_engine_rejects_non_utf8_config() {
        let model = sample_model();
        let config = CString::new(vec![0xff, 0xfe, b'{', b'}']).unwrap();

        unsafe {
            let engine = evasion_engine_new(model.as_ptr(), config.as_ptr());
            assert!(engine.is_null());
            let error = CStr::from_ptr(evasion_last_error()).to_str().unwrap();
            assert!(error.contains("UTF-8"));

            let engine = evasion_engine_new(model.as_ptr(), ptr::null());
            assert!(!engine.is_null());
            evasion_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_default_config() {
        unsafe {
            let json = evasion_default_config_json();
            assert!(!json.is_null());
            let parsed: EngineConfig =
                serde_json::from_str(CStr::from_ptr(json).to_str().unwrap()).unwrap();
            assert_eq!(parsed, EngineConfig::default());
            evasion_free_string(json);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = evasion_version();
            assert!(!version.is_null());
            assert!(!CStr::from_ptr(version).to_str().unwrap().is_empty());
        }
    }
}
