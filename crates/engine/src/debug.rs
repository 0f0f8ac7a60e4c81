use crate::error::{Result, VkResultExt};
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    log::log!(target: "vulkan", level_for(severity), "{message_type:?} - {message}");
    vk::FALSE
}

fn level_for(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    }
}

/// Returns true if the Khronos validation layer is installed.
pub(crate) fn check_validation_layer_support(entry: &Entry) -> bool {
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(err) => {
            log::warn!("Could not enumerate instance layers: {err}");
            return false;
        }
    };

    let found = layers
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

    if !found {
        log::warn!("Validation layer {VALIDATION_LAYER:?} requested but not available");
    }
    found
}

pub(crate) fn get_layer_names_and_pointers() -> (Vec<&'static CStr>, Vec<*const c_char>) {
    let names = vec![VALIDATION_LAYER];
    let pointers = names.iter().map(|name| name.as_ptr()).collect();
    (names, pointers)
}

pub(crate) fn setup_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback));

    let debug_utils = debug_utils::Instance::new(entry, instance);
    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .check("vkCreateDebugUtilsMessengerEXT")?;

    log::debug!("Debug messenger installed");
    Ok((debug_utils, messenger))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_to_log_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(level_for(S::ERROR), log::Level::Error);
        assert_eq!(level_for(S::WARNING), log::Level::Warn);
        assert_eq!(level_for(S::INFO), log::Level::Debug);
        assert_eq!(level_for(S::VERBOSE), log::Level::Trace);
        assert_eq!(level_for(S::WARNING | S::ERROR), log::Level::Error);
    }

    #[test]
    fn layer_pointers_match_names() {
        let (names, pointers) = get_layer_names_and_pointers();
        assert_eq!(names.len(), pointers.len());
        assert_eq!(unsafe { CStr::from_ptr(pointers[0]) }, VALIDATION_LAYER);
    }
}
