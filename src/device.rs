//! Physical device selection and logical device creation.

use std::ffi::CStr;

use ash::vk;

use crate::error::{Error, Result};

/// Pick the best physical device that can render and present to `surface`.
///
/// Returns the device and the queue family used for both graphics and
/// present. Devices are scored (discrete > integrated, plus a bonus for
/// larger texture limits) and the highest-scoring usable one wins.
pub(crate) fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
    })?;

    if devices.is_empty() {
        return Err(Error::InitializationFailed(
            "No Vulkan-capable devices found".into(),
        ));
    }

    let mut best: Option<(vk::PhysicalDevice, u32, u32)> = None;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        // SAFETY: device_name is a fixed-size null-terminated array filled by
        // the driver.
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

        if properties.api_version < vk::API_VERSION_1_3 {
            log::info!("GPU '{}' skipped: no Vulkan 1.3 support", name);
            continue;
        }

        let family = match find_queue_family(instance, surface_loader, surface, device) {
            Some(family) => family,
            None => {
                log::info!("GPU '{}' skipped: no graphics+present queue", name);
                continue;
            }
        };

        let score = score_device(&properties);
        log::info!("GPU '{}' scored {}", name, score);

        let better = match best {
            Some((_, _, best_score)) => score > best_score,
            None => true,
        };
        if better {
            best = Some((device, family, score));
        }
    }

    let (device, family, _) = best.ok_or_else(|| {
        Error::InitializationFailed("No usable GPU with a graphics+present queue".into())
    })?;
    Ok((device, family))
}

fn score_device(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let mut score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 0,
    };
    score += properties.limits.max_image_dimension2_d / 1024;
    score
}

/// Find a queue family supporting graphics work and presentation to the
/// surface. Presentation happens on the graphics queue.
fn find_queue_family(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    for (index, family) in families.iter().enumerate() {
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }
        let present = unsafe {
            surface_loader.get_physical_device_surface_support(device, index as u32, surface)
        }
        .unwrap_or(false);
        if present {
            return Some(index as u32);
        }
    }
    None
}

/// Create the logical device with the features this layer depends on:
/// dynamic rendering and synchronization2 (1.3), and the descriptor-indexing
/// set backing the bindless table (1.2).
pub(crate) fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities)];

    let extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_buffer_update_after_bind(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .shader_storage_buffer_array_non_uniform_indexing(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .push_next(&mut features13)
        .push_next(&mut features12);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .map_err(|e| {
            Error::InitializationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

    log::info!("Logical device created (queue family {})", queue_family);
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discrete_outranks_integrated() {
        let mut discrete = vk::PhysicalDeviceProperties::default();
        discrete.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        discrete.limits.max_image_dimension2_d = 4096;

        let mut integrated = vk::PhysicalDeviceProperties::default();
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        integrated.limits.max_image_dimension2_d = 16384;

        assert!(score_device(&discrete) > score_device(&integrated));
    }

    #[test]
    fn test_texture_limit_breaks_ties() {
        let mut a = vk::PhysicalDeviceProperties::default();
        a.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        a.limits.max_image_dimension2_d = 16384;

        let mut b = vk::PhysicalDeviceProperties::default();
        b.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        b.limits.max_image_dimension2_d = 4096;

        assert!(score_device(&a) > score_device(&b));
    }
}
