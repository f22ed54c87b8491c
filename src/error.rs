// Fatal error taxonomy
//
// Every failure the core detects is unrecoverable: there is no retry or
// degraded mode. Instead of aborting the process, failures surface as a
// `FatalError` at the root of an `anyhow::Error` so the embedding code
// (the demo binary, tests) decides how to die.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FatalError {
    /// A native call returned a non-success status
    #[error("{call} failed: {result:?}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no suitable physical device: {0}")]
    NoSuitableDevice(String),

    #[error("no memory type in bits {type_bits:#b} supports {required:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("failed to compile shader '{name}': {message}")]
    ShaderCompilation { name: String, message: String },

    #[error("failed to reflect shader '{name}': {message}")]
    ShaderReflection { name: String, message: String },

    #[error("set {set} binding {binding} is declared twice with different types ({first} vs {second})")]
    DescriptorConflict {
        set: u32,
        binding: u32,
        first: &'static str,
        second: &'static str,
    },

    #[error("set {set} binding {binding} is outside the supported range (sets < {max_sets}, bindings < {max_bindings})")]
    BindingOutOfRange {
        set: u32,
        binding: u32,
        max_sets: u32,
        max_bindings: u32,
    },

    #[error("malformed {what} '{path}': {message}")]
    Parse {
        what: &'static str,
        path: String,
        message: String,
    },

    #[error("unknown {what} '{value}'")]
    UnmappedEnum { what: &'static str, value: String },

    #[error("image layout mismatch: transition expects {expected:?} but the image is in {actual:?}")]
    LayoutMismatch {
        expected: vk::ImageLayout,
        actual: vk::ImageLayout,
    },

    #[error("{operation} is not valid while the frame is {phase}")]
    InvalidFrameState {
        operation: &'static str,
        phase: &'static str,
    },

    #[error("{0}")]
    MissingState(&'static str),

    /// Library, instance or window-system setup failed before any Vulkan call could
    #[error("platform setup failed: {0}")]
    Platform(String),

    #[error("failed to read '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image '{path}'")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Converts a raw `VkResult` into the fatal tier, naming the failed call.
pub trait VkCheck<T> {
    fn check(self, call: &'static str) -> anyhow::Result<T>;
}

impl<T> VkCheck<T> for Result<T, vk::Result> {
    fn check(self, call: &'static str) -> anyhow::Result<T> {
        self.map_err(|result| FatalError::Vulkan { call, result }.into())
    }
}

/// True when the root cause of `err` was raised by this crate.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<FatalError>())
}

pub(crate) fn read_file(path: &std::path::Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| {
        FatalError::Io {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

pub(crate) fn read_to_string(path: &std::path::Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).map_err(|source| {
        FatalError::Io {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn vk_check_wraps_result_as_fatal() {
        let failed: Result<u32, vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = failed.check("vkAllocateMemory").unwrap_err();

        match err.downcast_ref::<FatalError>() {
            Some(FatalError::Vulkan { call, result }) => {
                assert_eq!(*call, "vkAllocateMemory");
                assert_eq!(*result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn fatal_survives_added_context() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .check("vkQueueSubmit")
            .context("Failed to submit draw")
            .unwrap_err();

        assert!(is_fatal(&err));
        assert!(err.to_string().contains("Failed to submit draw"));
    }

    #[test]
    fn foreign_errors_are_not_fatal() {
        let err = anyhow::anyhow!("something else");
        assert!(!is_fatal(&err));
    }

    #[test]
    fn missing_file_is_fatal_io() {
        let err = read_file(std::path::Path::new("definitely/not/here.spv")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::Io { .. })
        ));
    }
}
