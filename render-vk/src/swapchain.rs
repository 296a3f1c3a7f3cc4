//! Swap chain ownership: images, views, framebuffers, per-frame sync.

use ash::vk;

use ember_render::error::{ErrorKind, GraphicsError, Result};
use ember_render::swapchain::{SwapchainDesc, SwapchainState};

use crate::instance::VkContext;
use crate::map_vk_error;
use crate::resources::texture_format_vk;

pub(crate) struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub(crate) struct VkSwapchain {
    pub loader: ash::khr::swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    /// One framebuffer per image, compatible with `render_pass`.
    pub framebuffers: Vec<vk::Framebuffer>,
    /// Presentation-compatible pass: single color attachment, clear/store.
    pub render_pass: vk::RenderPass,
    pub sync: Vec<FrameSync>,
    pub current_frame: usize,
    /// Image acquired for the frame being recorded, if any.
    pub acquired: Option<u32>,
    /// Set while the acquire semaphore has not been consumed by a submit;
    /// only the first swap chain submission of a frame touches the frame's
    /// semaphores.
    pub semaphores_pending: bool,
    pub state: SwapchainState,
    pub desc: SwapchainDesc,
}

impl VkSwapchain {
    pub(crate) fn new(context: &VkContext, desc: &SwapchainDesc) -> Result<VkSwapchain> {
        let surface = context.surface.ok_or_else(|| {
            GraphicsError::new(
                ErrorKind::SwapChainCreationFailed,
                "device was created without a window surface",
            )
        })?;
        let surface_loader = context.surface_loader.as_ref().unwrap();

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(context.physical, surface)
        }
        .map_err(|e| map_vk_error(e, "query surface capabilities"))?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(context.physical, surface)
        }
        .map_err(|e| map_vk_error(e, "query surface formats"))?;
        let wanted = texture_format_vk(desc.format);
        let format = formats
            .iter()
            .find(|f| f.format == wanted)
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| {
                GraphicsError::new(ErrorKind::SwapChainCreationFailed, "surface has no formats")
            })?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(context.physical, surface)
        }
        .map_err(|e| map_vk_error(e, "query present modes"))?;
        let wanted_mode = if desc.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            vk::PresentModeKHR::IMMEDIATE
        };
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|m| *m == wanted_mode)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: desc.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: desc.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let mut image_count = desc.buffer_count.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let loader = ash::khr::swapchain::Device::new(&context.instance, &context.device);
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| map_vk_error(e, "create swapchain"))?;

        match Self::init_images(context, loader, swapchain, format.format, extent, desc) {
            Ok(result) => Ok(result),
            Err(e) => Err(e),
        }
    }

    fn init_images(
        context: &VkContext,
        loader: ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
        format: vk::Format,
        extent: vk::Extent2D,
        desc: &SwapchainDesc,
    ) -> Result<VkSwapchain> {
        let device = &context.device;
        let mut views = Vec::new();
        let mut framebuffers = Vec::new();
        let mut sync = Vec::new();
        let mut render_pass = vk::RenderPass::null();

        let cleanup = |device: &ash::Device,
                       loader: &ash::khr::swapchain::Device,
                       swapchain: vk::SwapchainKHR,
                       views: &[vk::ImageView],
                       framebuffers: &[vk::Framebuffer],
                       render_pass: vk::RenderPass,
                       sync: &[FrameSync]| unsafe {
            for s in sync {
                device.destroy_semaphore(s.image_available, None);
                device.destroy_semaphore(s.render_finished, None);
                device.destroy_fence(s.in_flight, None);
            }
            for &fb in framebuffers {
                device.destroy_framebuffer(fb, None);
            }
            if render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(render_pass, None);
            }
            for &view in views {
                device.destroy_image_view(view, None);
            }
            loader.destroy_swapchain(swapchain, None);
        };

        let result = (|| -> Result<(Vec<vk::Image>, ())> {
            let images = unsafe { loader.get_swapchain_images(swapchain) }
                .map_err(|e| map_vk_error(e, "get swapchain images"))?;

            // the presentation pass: one color attachment, cleared and stored
            let attachment = vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);
            let attachment_ref = vk::AttachmentReference::default()
                .attachment(0)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
            let color_refs = [attachment_ref];
            let subpass = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_refs);
            let dependency = vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
            let attachments = [attachment];
            let subpasses = [subpass];
            let dependencies = [dependency];
            let pass_info = vk::RenderPassCreateInfo::default()
                .attachments(&attachments)
                .subpasses(&subpasses)
                .dependencies(&dependencies);
            render_pass = unsafe { device.create_render_pass(&pass_info, None) }
                .map_err(|e| map_vk_error(e, "create presentation render pass"))?;

            for &image in &images {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );
                let view = unsafe { device.create_image_view(&view_info, None) }
                    .map_err(|e| map_vk_error(e, "create swapchain image view"))?;
                views.push(view);

                let view_list = [view];
                let fb_info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(&view_list)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                let framebuffer = unsafe { device.create_framebuffer(&fb_info, None) }
                    .map_err(|e| map_vk_error(e, "create swapchain framebuffer"))?;
                framebuffers.push(framebuffer);
            }

            for _ in 0..images.len() {
                let image_available = unsafe {
                    device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                }
                .map_err(|e| map_vk_error(e, "create semaphore"))?;
                let render_finished = unsafe {
                    device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                }
                .map_err(|e| map_vk_error(e, "create semaphore"))?;
                let in_flight = unsafe {
                    device.create_fence(
                        &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                        None,
                    )
                }
                .map_err(|e| map_vk_error(e, "create fence"))?;
                sync.push(FrameSync {
                    image_available,
                    render_finished,
                    in_flight,
                });
            }

            Ok((images, ()))
        })();

        match result {
            Ok((images, ())) => Ok(VkSwapchain {
                loader,
                swapchain,
                format,
                extent,
                images,
                views,
                framebuffers,
                render_pass,
                sync,
                current_frame: 0,
                acquired: None,
                semaphores_pending: false,
                state: SwapchainState::Ready,
                desc: desc.clone(),
            }),
            Err(e) => {
                cleanup(
                    device,
                    &loader,
                    swapchain,
                    &views,
                    &framebuffers,
                    render_pass,
                    &sync,
                );
                Err(e)
            }
        }
    }

    /// Acquires the next image for this frame, waiting out the frame that
    /// used this sync slot previously.
    pub(crate) fn acquire(&mut self, device: &ash::Device) -> Result<u32> {
        if let Some(index) = self.acquired {
            return Ok(index);
        }
        let frame = &self.sync[self.current_frame];
        unsafe {
            device
                .wait_for_fences(&[frame.in_flight], true, u64::MAX)
                .map_err(|e| map_vk_error(e, "wait frame fence"))?;
        }
        let (index, suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                frame.image_available,
                vk::Fence::null(),
            )
        }
        .map_err(|e| map_vk_error(e, "acquire swapchain image"))?;
        if suboptimal {
            log::debug!("swapchain is suboptimal; recreation advised");
        }
        unsafe {
            device
                .reset_fences(&[frame.in_flight])
                .map_err(|e| map_vk_error(e, "reset frame fence"))?;
        }
        self.acquired = Some(index);
        self.semaphores_pending = true;
        Ok(index)
    }

    pub(crate) fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for s in &self.sync {
                device.destroy_semaphore(s.image_available, None);
                device.destroy_semaphore(s.render_finished, None);
                device.destroy_fence(s.in_flight, None);
            }
            for &fb in &self.framebuffers {
                device.destroy_framebuffer(fb, None);
            }
            device.destroy_render_pass(self.render_pass, None);
            for &view in &self.views {
                device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        self.sync.clear();
        self.framebuffers.clear();
        self.views.clear();
        self.images.clear();
        self.state = SwapchainState::Destroyed;
    }
}
