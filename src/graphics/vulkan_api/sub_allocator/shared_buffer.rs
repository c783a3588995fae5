use {
    super::{Range, SubAllocator},
    crate::graphics::{
        vulkan_api::{AllocatorError, RawBuffer},
        RenderContext,
    },
    ash::vk,
    std::{
        marker::PhantomData,
        sync::{Arc, Mutex, MutexGuard},
    },
};

/// A SubAllocator behind a mutex, shared by the typed ranges it hands out.
pub struct SharedBuffer {
    allocator: Mutex<SubAllocator>,
    context: Arc<RenderContext>,
}

impl SharedBuffer {
    /// Create a shared buffer with `capacity` bytes.
    pub fn new(
        context: Arc<RenderContext>,
        capacity: u32,
        memory_properties: vk::MemoryPropertyFlags,
        usage: vk::BufferUsageFlags,
    ) -> Result<Arc<Self>, AllocatorError> {
        let allocator = SubAllocator::new(
            &context,
            capacity,
            memory_properties,
            usage,
        )?;
        Ok(Arc::new(Self {
            allocator: Mutex::new(allocator),
            context,
        }))
    }

    /// Reserve room for `count` elements of T.
    ///
    /// The range is released when the returned handle is dropped.
    pub fn allocate<T: Copy>(
        self: &Arc<Self>,
        count: usize,
    ) -> Result<BufferRange<T>, AllocatorError> {
        let bytes = count.saturating_mul(std::mem::size_of::<T>());
        let capacity = self.lock().capacity();
        let size = u32::try_from(bytes).map_err(|_| {
            AllocatorError::OutOfBounds {
                offset: 0,
                size: u32::MAX,
                capacity,
            }
        })?;
        let range = if size == 0 {
            Range {
                offset: 0,
                size: 0,
                allocated: false,
            }
        } else {
            self.lock().allocate(&self.context, size)?
        };
        Ok(BufferRange {
            range,
            count,
            buffer: self.clone(),
            _phantom_data: PhantomData,
        })
    }

    /// The raw handles for the buffer's current backing.
    pub fn raw_buffer(&self) -> RawBuffer {
        self.lock().raw_buffer()
    }

    pub fn capacity(&self) -> u32 {
        self.lock().capacity()
    }

    /// Lock the underlying allocator.
    pub fn lock(&self) -> MutexGuard<'_, SubAllocator> {
        self.allocator
            .lock()
            .expect("the shared buffer lock was poisoned")
    }
}

/// A typed allocation inside a [SharedBuffer].
pub struct BufferRange<T> {
    range: Range,
    count: usize,
    buffer: Arc<SharedBuffer>,
    _phantom_data: PhantomData<T>,
}

impl<T: Copy> BufferRange<T> {
    /// Offset of the first element in bytes.
    pub fn offset(&self) -> u32 {
        self.range.offset
    }

    /// Size of the range in bytes.
    pub fn size_in_bytes(&self) -> u32 {
        self.range.size
    }

    /// How many elements of type T fit in the range.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn buffer(&self) -> &Arc<SharedBuffer> {
        &self.buffer
    }

    /// Write elements starting at the beginning of the range.
    pub fn write(&self, data: &[T]) -> Result<(), AllocatorError> {
        self.write_at(0, data)
    }

    /// Write elements starting at `first_element`.
    ///
    /// Use #[repr(C)] types without padding to control the layout the device
    /// sees.
    pub fn write_at(
        &self,
        first_element: usize,
        data: &[T],
    ) -> Result<(), AllocatorError> {
        let element_size = std::mem::size_of::<T>();
        let in_bounds = first_element
            .checked_add(data.len())
            .is_some_and(|end| end <= self.count);
        if !in_bounds {
            let clamp = |elements: usize| {
                elements
                    .checked_mul(element_size)
                    .and_then(|bytes| u32::try_from(bytes).ok())
                    .unwrap_or(u32::MAX)
            };
            return Err(AllocatorError::OutOfBounds {
                offset: self.range.offset.saturating_add(clamp(first_element)),
                size: clamp(data.len()),
                capacity: self.range.size,
            });
        }
        let bytes = unsafe {
            // SAFE because T is Copy and the slice covers exactly the
            // elements in data.
            std::slice::from_raw_parts(
                data.as_ptr() as *const u8,
                std::mem::size_of_val(data),
            )
        };
        let offset = self.range.offset + (first_element * element_size) as u32;
        self.buffer
            .lock()
            .update(&self.buffer.context, offset, bytes)
    }
}

impl<T> Drop for BufferRange<T> {
    fn drop(&mut self) {
        if self.range.size == 0 {
            return;
        }
        let result = self
            .buffer
            .lock()
            .free(self.range.offset, self.range.size);
        if let Err(err) = result {
            log::error!("Unable to release buffer range: {}", err);
        }
    }
}
