use crate::context::VkContext;
use crate::error::{Result, VkResultExt};
use crate::image::subresource_range;
use ash::khr::surface;
use ash::{vk, Device};

pub(crate) struct Swapchain {
    pub(crate) properties: SwapchainProperties,
    preferred_present_mode: vk::PresentModeKHR,
    pub(crate) swapchain_fn: ash::khr::swapchain::Device,
    pub(crate) swapchain: vk::SwapchainKHR,

    pub(crate) images: Vec<vk::Image>,
    pub(crate) image_views: Vec<vk::ImageView>,
    /// Signalled when rendering to the image with the same index is done. Owned per image
    /// because presentation may still wait on it when the frame slot comes around again.
    pub(crate) render_semaphores: Vec<vk::Semaphore>,
}

impl Swapchain {
    pub(crate) fn create(
        vk_context: &VkContext,
        dimensions: [u32; 2],
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let swapchain_fn =
            ash::khr::swapchain::Device::new(&vk_context.instance, &vk_context.device);

        let mut swapchain = Self {
            properties: SwapchainProperties::default(),
            preferred_present_mode,
            swapchain_fn,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            render_semaphores: Vec::new(),
        };
        swapchain.build(vk_context, dimensions)?;
        Ok(swapchain)
    }

    /// Rebuilds the chain for a new window size. The GPU must be idle.
    pub(crate) fn recreate(&mut self, vk_context: &VkContext, dimensions: [u32; 2]) -> Result<()> {
        log::debug!("Recreating swapchain for {}x{}", dimensions[0], dimensions[1]);
        let old_swapchain = self.swapchain;
        let old_views = std::mem::take(&mut self.image_views);
        let old_semaphores = std::mem::take(&mut self.render_semaphores);

        let result = self.build(vk_context, dimensions);

        unsafe {
            old_views
                .iter()
                .for_each(|view| vk_context.device.destroy_image_view(*view, None));
            old_semaphores
                .iter()
                .for_each(|semaphore| vk_context.device.destroy_semaphore(*semaphore, None));
            self.swapchain_fn.destroy_swapchain(old_swapchain, None);
        }
        if self.swapchain == old_swapchain {
            self.swapchain = vk::SwapchainKHR::null();
        }
        result
    }

    fn build(&mut self, vk_context: &VkContext, dimensions: [u32; 2]) -> Result<()> {
        let details = SwapchainSupportDetails::query(
            vk_context.physical_device,
            &vk_context.surface_fn,
            vk_context.surface,
        )?;

        let properties =
            details.get_ideal_swapchain_properties(dimensions, self.preferred_present_mode);
        let image_count = choose_image_count(&details.capabilities);

        log::debug!(
            "Creating swapchain: {:?} {:?}, {:?}, {}x{}, {} images",
            properties.format.format,
            properties.format.color_space,
            properties.present_mode,
            properties.extent.width,
            properties.extent.height,
            image_count,
        );

        // Graphics and present share one queue family, so exclusive sharing is enough.
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(vk_context.surface)
            .min_image_count(image_count)
            .image_format(properties.format.format)
            .image_color_space(properties.format.color_space)
            .image_extent(properties.extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(details.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(properties.present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);

        let device = &vk_context.device;
        let swapchain = unsafe { self.swapchain_fn.create_swapchain(&create_info, None) }
            .check("vkCreateSwapchainKHR")?;
        self.swapchain = swapchain;
        self.properties = properties;

        let images = unsafe { self.swapchain_fn.get_swapchain_images(swapchain) }
            .check("vkGetSwapchainImagesKHR")?;

        let image_views = images
            .iter()
            .map(|image| {
                let create_info = vk::ImageViewCreateInfo::default()
                    .image(*image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(properties.format.format)
                    .subresource_range(
                        subresource_range(vk::ImageAspectFlags::COLOR)
                            .level_count(1)
                            .layer_count(1),
                    );

                unsafe { device.create_image_view(&create_info, None) }.check("vkCreateImageView")
            })
            .collect::<Result<Vec<_>>>()?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let render_semaphores = images
            .iter()
            .map(|_| {
                unsafe { device.create_semaphore(&semaphore_info, None) }.check("vkCreateSemaphore")
            })
            .collect::<Result<Vec<_>>>()?;

        self.images = images;
        self.image_views = image_views;
        self.render_semaphores = render_semaphores;
        Ok(())
    }

    pub(crate) fn extent(&self) -> vk::Extent2D {
        self.properties.extent
    }

    pub(crate) fn format(&self) -> vk::Format {
        self.properties.format.format
    }

    pub(crate) fn present_mode(&self) -> vk::PresentModeKHR {
        self.properties.present_mode
    }

    /// The caller guarantees the GPU is idle.
    pub(crate) unsafe fn destroy(&mut self, device: &Device) {
        log::debug!("Start: Destroying swapchain");
        unsafe {
            self.image_views
                .drain(..)
                .for_each(|image_view| device.destroy_image_view(image_view, None));
            self.render_semaphores
                .drain(..)
                .for_each(|semaphore| device.destroy_semaphore(semaphore, None));
            self.swapchain_fn.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
        log::debug!("End: Destroying swapchain");
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct SwapchainProperties {
    pub(crate) format: vk::SurfaceFormatKHR,
    pub(crate) present_mode: vk::PresentModeKHR,
    pub(crate) extent: vk::Extent2D,
}

pub(crate) struct SwapchainSupportDetails {
    pub(crate) capabilities: vk::SurfaceCapabilitiesKHR,
    pub(crate) formats: Vec<vk::SurfaceFormatKHR>,
    pub(crate) present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub(crate) fn query(
        device: vk::PhysicalDevice,
        surface_fn: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let capabilities =
            unsafe { surface_fn.get_physical_device_surface_capabilities(device, surface) }
                .check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

        let formats = unsafe { surface_fn.get_physical_device_surface_formats(device, surface) }
            .check("vkGetPhysicalDeviceSurfaceFormatsKHR")?;

        let present_modes =
            unsafe { surface_fn.get_physical_device_surface_present_modes(device, surface) }
                .check("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    fn get_ideal_swapchain_properties(
        &self,
        preferred_dimensions: [u32; 2],
        preferred_present_mode: vk::PresentModeKHR,
    ) -> SwapchainProperties {
        SwapchainProperties {
            format: choose_swapchain_surface_format(&self.formats),
            present_mode: choose_swapchain_present_mode(
                &self.present_modes,
                preferred_present_mode,
            ),
            extent: choose_swapchain_extent(self.capabilities, preferred_dimensions),
        }
    }
}

/// Choose the swapchain surface format.
///
/// Will choose B8G8R8A8_UNORM/SRGB_NONLINEAR if possible or
/// the first available otherwise.
fn choose_swapchain_surface_format(
    available_formats: &[vk::SurfaceFormatKHR],
) -> vk::SurfaceFormatKHR {
    let desired = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    match available_formats {
        [] => desired,
        [only] if only.format == vk::Format::UNDEFINED => desired,
        formats => formats
            .iter()
            .copied()
            .find(|f| f.format == desired.format && f.color_space == desired.color_space)
            .unwrap_or(formats[0]),
    }
}

/// Choose the swapchain present mode.
///
/// Uses `preferred` when the surface offers it, FIFO otherwise.
fn choose_swapchain_present_mode(
    available_present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available_present_modes.contains(&preferred) {
        preferred
    } else {
        if preferred != vk::PresentModeKHR::FIFO {
            log::warn!("Present mode {preferred:?} not supported, falling back to FIFO");
        }
        vk::PresentModeKHR::FIFO
    }
}

/// Choose the swapchain extent.
///
/// If a current extent is defined it will be returned.
/// Otherwise, the surface extent clamped between the min
/// and max image extent will be returned.
fn choose_swapchain_extent(
    capabilities: vk::SurfaceCapabilitiesKHR,
    preferred_dimensions: [u32; 2],
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    let width = preferred_dimensions[0].min(max.width).max(min.width);
    let height = preferred_dimensions[1].min(max.height).max(min.height);
    vk::Extent2D { width, height }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let max = capabilities.max_image_count;
    let preferred = capabilities.min_image_count + 1;
    if max > 0 && preferred > max {
        max
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra_unorm_srgb() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_swapchain_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_swapchain_surface_format(&formats).format,
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn undefined_format_means_anything_goes() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(
            choose_swapchain_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn present_mode_honours_preference_when_available() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_swapchain_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn unsupported_present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_swapchain_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn current_extent_wins() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_swapchain_extent(caps, [1700, 900]);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn window_size_is_clamped() {
        let extent = choose_swapchain_extent(capabilities(2, 3), [8000, 0]);
        assert_eq!((extent.width, extent.height), (4096, 1));

        let extent = choose_swapchain_extent(capabilities(2, 3), [1700, 900]);
        assert_eq!((extent.width, extent.height), (1700, 900));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }
}
