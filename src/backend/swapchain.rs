// Swapchain - window presentation
//
// Negotiates surface format, present mode, image count and extent against
// the adapter's reported capabilities, then owns the chain of presentable
// images and their views.

use ash::{khr, vk};
use std::sync::Arc;

use super::RenderDevice;
use crate::error::RenderError;

const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Surface capabilities reported by an adapter.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Usable both during adapter selection (before a logical device
    /// exists) and at swapchain creation.
    pub fn query(
        surface_loader: &khr::surface::Instance,
        surface: vk::SurfaceKHR,
        adapter: vk::PhysicalDevice,
    ) -> Result<Self, RenderError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(adapter, surface)
        }?;
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(adapter, surface) }?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(adapter, surface)
        }?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// First entry matching the preferred 32-bit sRGB pair, else entry 0.
/// The fallback is deterministic, not an error; device selection already
/// guarantees the list is non-empty.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .unwrap_or(formats[0])
}

/// The preferred mode if the driver lists it, else FIFO. FIFO support is
/// guaranteed by the API, so the fallback never needs to be in the list.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == preferred)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The capability's current extent, unless the window manager reports the
/// u32::MAX sentinel to let the application decide. In that case the actual
/// drawable size is clamped component-wise into the supported bounds.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable_width: u32,
    drawable_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: drawable_width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: drawable_height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the driver's minimum so the application is not forced to
/// wait on the driver, capped at the maximum when one exists (0 means
/// unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::swapchain::Device,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<RenderDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<RenderDevice>,
        drawable_width: u32,
        drawable_height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, RenderError> {
        let support =
            SwapchainSupport::query(&device.surface_loader, device.surface, device.physical_device)?;

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(&support.capabilities, drawable_width, drawable_height);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        // Images shared across queue families only when graphics and present
        // actually differ; a single family gets exclusive access and skips
        // ownership transfers.
        let all_families = [device.families.graphics, device.families.present];
        let (sharing_mode, family_indices): (vk::SharingMode, &[u32]) =
            if device.families.graphics != device.families.present {
                (vk::SharingMode::CONCURRENT, &all_families[..])
            } else {
                (vk::SharingMode::EXCLUSIVE, &[])
            };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain_loader = khr::swapchain::Device::new(&device.instance, &device.device);
        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RenderError::SwapchainCreation)?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;
        log::trace!("Swapchain holds {} images", images.len());

        let image_views = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.device.create_image_view(&create_info, None) }
                    .map_err(RenderError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Image views created");

        Ok(Self {
            swapchain,
            swapchain_loader,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Request the next presentable image, signalling `semaphore` once the
    /// image is actually available. A stale chain is fatal here; this
    /// renderer does not recreate.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> Result<u32, RenderError> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok(index),
            Ok((_, true)) => Err(RenderError::SwapchainStale),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => {
                Err(RenderError::SwapchainStale)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queue the image for display once `wait_semaphore` signals.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<(), RenderError> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SwapchainStale),
            Err(e) => Err(RenderError::Presentation(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
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

    fn capabilities(
        min_count: u32,
        max_count: u32,
        current: (u32, u32),
        min_extent: (u32, u32),
        max_extent: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min_extent.0,
                height: min_extent.1,
            },
            max_image_extent: vk::Extent2D {
                width: max_extent.0,
                height: max_extent.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn preferred_srgb_pair_is_selected_when_listed() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_entry_is_the_fallback_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn matching_format_with_wrong_color_space_is_skipped() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn preferred_present_mode_is_selected_when_listed() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn fifo_is_the_fallback_even_when_not_listed() {
        // FIFO support is guaranteed by the API, so the fallback does not
        // depend on the driver listing it.
        let modes = [vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[], vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_is_min_plus_one() {
        let caps = capabilities(2, 0, (800, 600), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn image_count_respects_nonzero_maximum() {
        let caps = capabilities(2, 3, (800, 600), (1, 1), (4096, 4096));
        let count = choose_image_count(&caps);
        assert!(count >= caps.min_image_count + 1 || count == caps.max_image_count);
        assert_eq!(count, 3);

        let tight = capabilities(4, 4, (800, 600), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&tight), 4);
    }

    #[test]
    fn reported_extent_is_used_directly() {
        let caps = capabilities(2, 0, (800, 600), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 123, 456);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_the_drawable_size() {
        let caps = capabilities(2, 0, (u32::MAX, u32::MAX), (32, 32), (2048, 2048));
        let extent = choose_extent(&caps, 5000, 4);
        assert_eq!((extent.width, extent.height), (2048, 32));
        assert!(extent.width >= caps.min_image_extent.width);
        assert!(extent.width <= caps.max_image_extent.width);
        assert!(extent.height >= caps.min_image_extent.height);
        assert!(extent.height <= caps.max_image_extent.height);
    }

    #[test]
    fn single_format_and_mode_are_chosen_exactly() {
        // One adapter exposing exactly one format and FIFO only: the
        // negotiation must settle on those entries and min+1 images.
        let formats = [format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let modes = [vk::PresentModeKHR::FIFO];
        let caps = capabilities(2, 0, (1000, 600), (1, 1), (4096, 4096));

        let chosen_format = choose_surface_format(&formats);
        assert_eq!(chosen_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen_format.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_image_count(&caps), caps.min_image_count + 1);
    }

    #[test]
    fn sentinel_extent_takes_the_drawable_size_when_in_bounds() {
        let caps = capabilities(2, 0, (u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 1000, 600);
        assert_eq!((extent.width, extent.height), (1000, 600));
    }
}
