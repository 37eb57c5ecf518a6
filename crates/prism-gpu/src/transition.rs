//! Image layout transitions through one-shot pipeline barriers.

use crate::capabilities::has_stencil_component;
use crate::command::{execute_single_time_commands, CommandPool};
use crate::error::{GpuError, Result};
use crate::memory::layer_count;
use ash::vk;

/// Access and stage masks for one barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

const DEPTH_ATTACHMENT_ACCESS: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
);

/// Every supported `(old, new)` pair.
const TRANSITIONS: [(vk::ImageLayout, vk::ImageLayout, BarrierMasks); 3] = [
    (
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
    ),
    (
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
    ),
    (
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: DEPTH_ATTACHMENT_ACCESS,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        },
    ),
];

/// Look up the masks for a layout pair.
pub fn barrier_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<BarrierMasks> {
    TRANSITIONS
        .iter()
        .find(|(from, to, _)| *from == old && *to == new)
        .map(|&(_, _, masks)| masks)
        .ok_or_else(|| {
            tracing::error!("Unsupported layout transition: {old:?} -> {new:?}");
            GpuError::UnsupportedLayoutTransition { old, new }
        })
}

/// Aspects touched when moving an image of `format` into `new_layout`.
pub fn aspect_mask(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Barrier over every mip and layer of `image`, without ownership transfer.
pub fn image_barrier(
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    masks: &BarrierMasks,
    cube: bool,
    mip_levels: u32,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask(format, new))
                .base_mip_level(0)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(layer_count(cube)),
        )
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
}

/// Move `image` from `old` to `new` layout and wait for it to finish.
///
/// Unsupported pairs fail before anything is allocated on the device.
///
/// # Safety
/// All handles must be valid and the image must currently be in `old`.
#[allow(clippy::too_many_arguments)]
pub unsafe fn transition_image_layout(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    cube: bool,
    mip_levels: u32,
) -> Result<()> {
    let masks = barrier_masks(old, new)?;
    let barrier = image_barrier(image, format, old, new, &masks, cube, mip_levels);

    tracing::debug!("Transitioning image {image:?}: {old:?} -> {new:?}");

    execute_single_time_commands(device, pool, queue, |cmd| {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions() {
        let to_dst = barrier_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert!(to_dst.src_access.is_empty());
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_read = barrier_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn depth_transition_reads_and_writes() {
        let masks = barrier_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert!(masks
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ));
        assert!(masks
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn unknown_pairs_are_rejected() {
        let pairs = [
            (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::UNDEFINED,
            ),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR),
        ];

        for (old, new) in pairs {
            let err = barrier_masks(old, new).unwrap_err();
            assert!(matches!(
                err,
                GpuError::UnsupportedLayoutTransition { old: o, new: n } if o == old && n == new
            ));
            assert!(err.is_defect());
        }
    }

    #[test]
    fn aspect_depends_on_target_layout_and_format() {
        let depth = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(
            aspect_mask(vk::Format::D32_SFLOAT, depth),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask(vk::Format::D24_UNORM_S8_UINT, depth),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask(
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            ),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn barrier_spans_all_mips_and_cube_faces() {
        let masks = barrier_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        let barrier = image_barrier(
            vk::Image::null(),
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &masks,
            true,
            7,
        );

        assert_eq!(barrier.subresource_range.level_count, 7);
        assert_eq!(barrier.subresource_range.layer_count, 6);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
    }
}
