//! Pooled buffer memory for staging uploads.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

fn not_initialized() -> GpuError {
    GpuError::InvalidState("Allocator already shut down".to_string())
}

/// Sub-allocating buffer allocator.
///
/// Images keep their dedicated allocations (see [`crate::memory`]); this pool
/// only hands out buffers.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: ash::Device,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid and must
    /// outlive the allocator.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            tracing::error!("Unable to create the buffer allocator: {e}");
            GpuError::MemoryAllocationFailed(e.to_string())
        })?;

        Ok(Self {
            allocator: Some(allocator),
            device: device.clone(),
        })
    }

    /// Create a buffer and bind it to pooled memory.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let allocator = self.allocator.as_mut().ok_or_else(not_initialized)?;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                tracing::error!("Unable to allocate memory for buffer {name}: {e}");
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(GpuError::MemoryAllocationFailed(e.to_string()));
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            tracing::error!("Unable to bind memory for buffer {name}: {e}");
            unsafe { self.device.destroy_buffer(buffer, None) };
            // The bind error is the one worth reporting.
            let _ = allocator.free(allocation);
            return Err(GpuError::MemoryAllocationFailed(e.to_string()));
        }

        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Destroy a buffer and return its memory to the pool.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.allocator
                .as_mut()
                .ok_or_else(not_initialized)?
                .free(allocation)
                .map_err(|e| GpuError::MemoryAllocationFailed(e.to_string()))?;
        }

        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
        }
        buffer.buffer = vk::Buffer::null();

        Ok(())
    }

    /// Release all pooled memory. Must happen before the device is destroyed.
    pub fn shutdown(&mut self) {
        // Dropping the inner allocator frees its memory blocks and logs leaks.
        self.allocator.take();
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A buffer with its pooled allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Host pointer of a mapped (CPU-visible) allocation.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Copy `data` to the start of the buffer.
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        check_fits(bytes.len() as u64, self.size)?;

        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        // SAFETY: the mapping covers `size` bytes and the length was checked.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        }

        Ok(())
    }
}

fn check_fits(len: u64, capacity: u64) -> Result<()> {
    if len > capacity {
        return Err(GpuError::InvalidState(format!(
            "{len} bytes do not fit in a {capacity} byte buffer"
        )));
    }
    Ok(())
}
