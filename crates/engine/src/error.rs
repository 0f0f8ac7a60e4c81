use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] winit::raw_window_handle::HandleError),

    #[error("Vulkan error in {what}: {result}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },

    #[error("no suitable physical device found")]
    NoSuitableDevice,

    #[error("failed to read shader {path}: {source}")]
    ShaderIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid SPIR-V in {path}: {reason}")]
    InvalidSpirv { path: PathBuf, reason: &'static str },

    #[error("ui renderer error: {0}")]
    Ui(#[from] egui_ash_renderer::RendererError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Checking helpers for raw Vulkan results.
///
/// `check` turns a failure into an [`EngineError::Vulkan`], `warn` logs it and keeps going,
/// `ignore` drops it.
pub trait VkResultExt<T> {
    fn check(self, what: &'static str) -> Result<T>;
    fn warn(self, what: &'static str) -> Option<T>;
    fn ignore(self) -> Option<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn check(self, what: &'static str) -> Result<T> {
        self.map_err(|result| EngineError::Vulkan { what, result })
    }

    fn warn(self, what: &'static str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(result) => {
                log::warn!("Vulkan warning in {what}: {result} (continuing execution)");
                None
            }
        }
    }

    fn ignore(self) -> Option<T> {
        self.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_values_through() {
        let res: VkResult<u32> = Ok(7);
        assert_eq!(res.check("test").unwrap(), 7);
    }

    #[test]
    fn check_keeps_call_site_and_result() {
        let res: VkResult<()> = Err(vk::Result::TIMEOUT);
        match res.check("vkWaitForFences") {
            Err(EngineError::Vulkan { what, result }) => {
                assert_eq!(what, "vkWaitForFences");
                assert_eq!(result, vk::Result::TIMEOUT);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn warn_and_ignore_swallow_failures() {
        let res: VkResult<u32> = Err(vk::Result::ERROR_DEVICE_LOST);
        assert!(res.warn("vkQueuePresentKHR").is_none());
        let res: VkResult<u32> = Err(vk::Result::ERROR_DEVICE_LOST);
        assert!(res.ignore().is_none());
        let res: VkResult<u32> = Ok(1);
        assert_eq!(res.warn("ok"), Some(1));
    }

    #[test]
    fn display_mentions_call_site() {
        let err = EngineError::Vulkan {
            what: "vkCreateFence",
            result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        };
        assert!(err.to_string().contains("vkCreateFence"));
    }
}
