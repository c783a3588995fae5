mod range_set;
mod shared_buffer;

use {
    crate::{
        graphics::{
            vulkan_api::{AllocatorError, DeviceApi, RawBuffer},
            RenderContext,
        },
        logging::PrettyList,
    },
    ash::vk,
    std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, Mutex, MutexGuard, Weak,
        },
    },
};

pub use self::{
    range_set::{Range, RangeSet},
    shared_buffer::{BufferRange, SharedBuffer},
};

/// Destination regions of copies which were requested but not yet flushed,
/// keyed by request order.
type QueuedCopies = Arc<Mutex<BTreeMap<u64, (u32, u32)>>>;

fn lock_copies(
    copies: &QueuedCopies,
) -> MutexGuard<'_, BTreeMap<u64, (u32, u32)>> {
    copies.lock().expect("the queued copy lock was poisoned")
}

/// Hands out sub-ranges of a single Vulkan buffer.
///
/// Allocation is first-fit over a [RangeSet]. When no free range is large
/// enough the buffer grows: a new buffer replaces the old one in place and the
/// old contents are copied over. Replaced buffers, and the buffer itself when
/// the allocator is dropped, are destroyed from a flush callback so commands
/// which still reference them stay valid.
///
/// The range set is not synchronized. Calls to allocate, free, and grow must
/// come from one thread at a time (see [SharedBuffer] for a locked wrapper).
/// They may come from any thread: creating a buffer is the one native call
/// which does not need the owner thread, every command and every destroy is
/// deferred to it through a job.
pub struct SubAllocator {
    buffer: RawBuffer,
    usage: vk::BufferUsageFlags,
    requested_memory: vk::MemoryPropertyFlags,
    ranges: RangeSet,
    queued_copies: QueuedCopies,
    copy_sequence: AtomicU64,
    context: Weak<RenderContext>,
    device: Arc<dyn DeviceApi>,
}

impl SubAllocator {
    /// Create a buffer with `capacity` bytes of memory.
    ///
    /// TRANSFER_SRC and TRANSFER_DST are always added to `usage` because
    /// growing and staged updates copy through the buffer.
    pub fn new(
        context: &Arc<RenderContext>,
        capacity: u32,
        memory_properties: vk::MemoryPropertyFlags,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, AllocatorError> {
        Self::with_device(
            context.device().clone(),
            Arc::downgrade(context),
            capacity,
            memory_properties,
            usage,
        )
    }

    /// The current size of the buffer in bytes.
    pub fn capacity(&self) -> u32 {
        self.ranges.capacity()
    }

    /// The raw handles for the buffer's current backing.
    ///
    /// The handles change when the buffer grows.
    pub fn raw_buffer(&self) -> RawBuffer {
        self.buffer
    }

    pub fn ranges(&self) -> &RangeSet {
        &self.ranges
    }

    /// True when updates are written directly through a host mapping.
    pub fn is_host_visible(&self) -> bool {
        self.buffer.is_host_visible()
    }

    /// Reserve `size` bytes, growing the buffer when no free range fits.
    ///
    /// Growth doubles the larger of `size` and the current capacity, so a
    /// single growth always makes room for the request.
    pub fn allocate(
        &mut self,
        context: &Arc<RenderContext>,
        size: u32,
    ) -> Result<Range, AllocatorError> {
        debug_assert!(size > 0, "zero sized allocations are not supported");

        if let Some(range) = self.ranges.allocate(size) {
            return Ok(range);
        }

        let new_capacity = size.max(self.capacity()).checked_mul(2).ok_or(
            AllocatorError::OutOfBounds {
                offset: self.capacity(),
                size,
                capacity: self.capacity(),
            },
        )?;
        self.grow(context, new_capacity)?;

        self.ranges
            .allocate(size)
            .ok_or(AllocatorError::OutOfBounds {
                offset: 0,
                size,
                capacity: self.capacity(),
            })
    }

    /// Release a range returned by allocate.
    pub fn free(&mut self, offset: u32, size: u32) -> Result<(), AllocatorError> {
        self.ranges.free(offset, size)
    }

    /// Replace the buffer with a larger one, keeping every allocation.
    ///
    /// Device-local contents are copied by the staging pipeline during the
    /// owner thread's next pass. Host-visible contents are copied right away
    /// on the host, and regions targeted by copies which are still queued
    /// are copied again on the device after those copies land. In both cases
    /// the old buffer is destroyed only after the following submitting flush.
    ///
    /// When the new buffer cannot be created the allocator is left untouched.
    pub fn grow(
        &mut self,
        context: &Arc<RenderContext>,
        new_capacity: u32,
    ) -> Result<(), AllocatorError> {
        debug_assert!(new_capacity > self.capacity());
        let old_capacity = self.capacity();

        let new_buffer = unsafe {
            // SAFE because the new buffer replaces self.buffer and is owned by
            // this allocator from here on.
            self.device
                .create_buffer(
                    new_capacity as u64,
                    self.usage,
                    self.requested_memory,
                )
                .map_err(AllocatorError::AllocationFailed)?
        };

        let copy_on_host =
            new_buffer.is_host_visible() && self.buffer.is_host_visible();
        if copy_on_host {
            if let Err(err) = self.copy_on_host(&new_buffer) {
                unsafe { self.device.destroy_buffer(new_buffer) };
                return Err(err);
            }
        }
        let regions: Vec<(u32, u32)> = if copy_on_host {
            lock_copies(&self.queued_copies).values().copied().collect()
        } else {
            vec![(0, old_capacity)]
        };

        let old_buffer = std::mem::replace(&mut self.buffer, new_buffer);
        self.ranges.extend(new_capacity);

        log::debug!(
            "growing buffer {:?} from {} to {} bytes, now {:?}",
            old_buffer.buffer,
            old_capacity,
            new_capacity,
            new_buffer.buffer
        );

        let old_buffer = self.destroy_later(old_buffer);
        let weak_context = Arc::downgrade(context);
        context.post(move |_| {
            let Some(context) = weak_context.upgrade() else {
                return;
            };
            let mut staging = context.staging();
            for (offset, size) in regions {
                staging.record_copy(
                    old_buffer.buffer,
                    offset,
                    new_buffer.buffer,
                    offset,
                    size,
                );
            }
            staging.on_flushed(move || drop(old_buffer));
        });
        Ok(())
    }

    /// Write `data` at `offset`.
    ///
    /// Host-visible buffers are written immediately. Otherwise the data is
    /// copied into the staging scratch buffer now, and a device copy into
    /// this buffer is recorded during the owner thread's next pass and
    /// executed by the following flush.
    ///
    /// Updates never grow the buffer.
    ///
    /// Safe to call from any thread.
    pub fn update(
        &self,
        context: &Arc<RenderContext>,
        offset: u32,
        data: &[u8],
    ) -> Result<(), AllocatorError> {
        let out_of_bounds = AllocatorError::OutOfBounds {
            offset,
            size: data.len().min(u32::MAX as usize) as u32,
            capacity: self.capacity(),
        };
        let size = u32::try_from(data.len()).map_err(|_| out_of_bounds)?;
        if offset as u64 + size as u64 > self.capacity() as u64 {
            return Err(AllocatorError::OutOfBounds {
                offset,
                size,
                capacity: self.capacity(),
            });
        }
        if size == 0 {
            return Ok(());
        }

        if self.buffer.is_host_visible() {
            return unsafe {
                // SAFE because the range was bounds checked above.
                self.device
                    .write_memory(&self.buffer, offset as u64, data)
                    .map_err(AllocatorError::UnableToWriteMemory)
            };
        }

        // the upload job is posted while the staging lock is held so it is
        // queued ahead of any job which retires the scratch buffer it uses
        let mut staging = context.lock_staging_any_thread();
        let (scratch_buffer, scratch_offset) =
            staging.stage_upload(context, data)?;

        let dst = self.buffer.buffer;
        let weak_context = Arc::downgrade(context);
        context.post(move |_| {
            let Some(context) = weak_context.upgrade() else {
                return;
            };
            let mut staging = context.staging();
            staging.record_copy(scratch_buffer, scratch_offset, dst, offset, size);
            staging.finish_upload();
        });
        drop(staging);
        Ok(())
    }

    /// Copy `size` bytes from another buffer into this one.
    ///
    /// The copy is recorded during the owner thread's next pass and executed
    /// by the following flush. Safe to call from any thread. The source
    /// buffer must stay alive until that flush completes.
    pub fn copy_from(
        &self,
        context: &Arc<RenderContext>,
        src: vk::Buffer,
        src_offset: u32,
        dst_offset: u32,
        size: u32,
    ) -> Result<(), AllocatorError> {
        if dst_offset as u64 + size as u64 > self.capacity() as u64 {
            return Err(AllocatorError::OutOfBounds {
                offset: dst_offset,
                size,
                capacity: self.capacity(),
            });
        }

        let id = self.copy_sequence.fetch_add(1, Ordering::Relaxed);
        lock_copies(&self.queued_copies).insert(id, (dst_offset, size));

        let dst = self.buffer.buffer;
        let queued_copies = self.queued_copies.clone();
        let weak_context = Arc::downgrade(context);
        context.post(move |_| {
            let Some(context) = weak_context.upgrade() else {
                return;
            };
            let mut staging = context.staging();
            staging.record_copy(src, src_offset, dst, dst_offset, size);
            staging.on_flushed(move || {
                lock_copies(&queued_copies).remove(&id);
            });
        });
        Ok(())
    }

    /// Forget every allocation.
    pub fn reset(&mut self) {
        self.ranges.reset();
    }

    /// Dump the range set to the debug log.
    pub fn log_ranges(&self, name: &str) {
        log::debug!(
            "{} ({:?}, {} bytes) ranges:{}",
            name,
            self.buffer.buffer,
            self.capacity(),
            PrettyList(&self.ranges.to_vec())
        );
    }
}

// Crate API
// ---------

impl SubAllocator {
    /// Create an allocator which is not yet tied to a context.
    ///
    /// Used for the staging scratch buffer, which exists before its context.
    pub(crate) fn with_device(
        device: Arc<dyn DeviceApi>,
        context: Weak<RenderContext>,
        capacity: u32,
        memory_properties: vk::MemoryPropertyFlags,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, AllocatorError> {
        let usage = usage
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST;
        let buffer = unsafe {
            // SAFE because the buffer is destroyed when this allocator is
            // dropped or replaced by grow.
            device
                .create_buffer(capacity as u64, usage, memory_properties)
                .map_err(AllocatorError::AllocationFailed)?
        };
        log::trace!(
            "created {} byte buffer {:?} with {:?}",
            capacity,
            buffer.buffer,
            buffer.memory_properties
        );
        Ok(Self {
            buffer,
            usage,
            requested_memory: memory_properties,
            ranges: RangeSet::new(capacity),
            queued_copies: QueuedCopies::default(),
            copy_sequence: AtomicU64::new(0),
            context,
            device,
        })
    }

    /// Set the context used to defer destruction when dropped.
    pub(crate) fn attach_context(&mut self, context: Weak<RenderContext>) {
        self.context = context;
    }
}

// Private API
// -----------

impl SubAllocator {
    fn copy_on_host(&self, new_buffer: &RawBuffer) -> Result<(), AllocatorError> {
        let mut contents = vec![0u8; self.capacity() as usize];
        unsafe {
            // SAFE because both buffers are host visible and the new buffer is
            // larger than the old one.
            self.device
                .read_memory(&self.buffer, 0, &mut contents)
                .map_err(AllocatorError::UnableToWriteMemory)?;
            self.device
                .write_memory(new_buffer, 0, &contents)
                .map_err(AllocatorError::UnableToWriteMemory)
        }
    }

    /// Wrap the buffer so it is destroyed when the guard is dropped, either
    /// by a flush callback or along with a job which never ran.
    fn destroy_later(
        &self,
        buffer: RawBuffer,
    ) -> scopeguard::ScopeGuard<
        RawBuffer,
        impl FnOnce(RawBuffer) + Send + 'static,
    > {
        let device = self.device.clone();
        scopeguard::guard(buffer, move |buffer| {
            log::trace!("destroying retired buffer {:?}", buffer.buffer);
            unsafe {
                // SAFE because the guard is only dropped after the flush which
                // executed every command referencing the buffer, or when the
                // context is torn down with the device idle.
                device.destroy_buffer(buffer)
            }
        })
    }
}

impl Drop for SubAllocator {
    /// The buffer is destroyed after the flush which follows every job
    /// already queued, so copies which still target it stay valid. Without
    /// a live context it is destroyed immediately.
    fn drop(&mut self) {
        let buffer = self.destroy_later(self.buffer);
        if let Some(context) = self.context.upgrade() {
            let weak_context = self.context.clone();
            context.post(move |_| {
                if let Some(context) = weak_context.upgrade() {
                    context.staging().on_flushed(move || drop(buffer));
                }
            });
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::graphics::{
            vulkan_api::fake_device::{Command, FakeDevice},
            ContextConfig,
        },
    };

    const DEVICE_LOCAL: vk::MemoryPropertyFlags =
        vk::MemoryPropertyFlags::DEVICE_LOCAL;

    fn host_visible() -> vk::MemoryPropertyFlags {
        vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT
    }

    fn context_with(
        config: ContextConfig,
    ) -> (Arc<FakeDevice>, Arc<RenderContext>) {
        let device = Arc::new(FakeDevice::default());
        let context = RenderContext::new(device.clone(), config).unwrap();
        (device, context)
    }

    fn context() -> (Arc<FakeDevice>, Arc<RenderContext>) {
        context_with(ContextConfig::default())
    }

    fn allocator(
        context: &Arc<RenderContext>,
        capacity: u32,
        memory: vk::MemoryPropertyFlags,
    ) -> SubAllocator {
        SubAllocator::new(
            context,
            capacity,
            memory,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )
        .unwrap()
    }

    #[test]
    fn growth_doubles_the_capacity() {
        let (_device, context) = context();
        let mut buffer = allocator(&context, 64, DEVICE_LOCAL);

        buffer.allocate(&context, 64).unwrap();
        let range = buffer.allocate(&context, 1).unwrap();
        assert_eq!(buffer.capacity(), 128);
        assert_eq!(range.offset, 64);

        // requests larger than the capacity double the request instead, the
        // trailing free range absorbs the new space
        let range = buffer.allocate(&context, 300).unwrap();
        assert_eq!(buffer.capacity(), 600);
        assert_eq!(range.offset, 65);
    }

    #[test]
    fn failed_growth_keeps_existing_allocations() {
        let (device, context) = context();
        let mut buffer = allocator(&context, 32, DEVICE_LOCAL);
        buffer.allocate(&context, 16).unwrap();
        let before = buffer.ranges().to_vec();
        let raw = buffer.raw_buffer();

        device.fail_next_create();
        let result = buffer.allocate(&context, 64);

        assert!(matches!(result, Err(AllocatorError::AllocationFailed(_))));
        assert_eq!(buffer.capacity(), 32);
        assert_eq!(buffer.ranges().to_vec(), before);
        assert_eq!(buffer.raw_buffer(), raw);
        assert_eq!(context.jobs().pending_jobs(), 0);
    }

    #[test]
    fn replaced_buffer_lives_until_the_flush() {
        let (device, context) = context();
        let mut buffer = allocator(&context, 64, DEVICE_LOCAL);
        let old = buffer.raw_buffer();

        buffer.allocate(&context, 100).unwrap();
        let new = buffer.raw_buffer();
        assert_ne!(old, new);
        assert!(device.is_alive(old.buffer));

        context.jobs().tick();
        assert!(device.is_alive(old.buffer));
        assert_eq!(
            device.recorded(),
            vec![Command::CopyBuffer {
                src: old.buffer,
                src_offset: 0,
                dst: new.buffer,
                dst_offset: 0,
                size: 64,
            }]
        );

        context.flush().unwrap();
        assert!(!device.is_alive(old.buffer));
        assert!(device.is_alive(new.buffer));
        assert_eq!(device.destroyed_count(), 1);
    }

    #[test]
    fn host_visible_updates_land_immediately() {
        let (device, context) = context();
        let buffer = allocator(&context, 16, host_visible());

        buffer.update(&context, 4, &[1, 2, 3, 4]).unwrap();

        assert_eq!(
            &device.contents(buffer.raw_buffer().buffer)[..8],
            &[0, 0, 0, 0, 1, 2, 3, 4]
        );
        assert_eq!(context.jobs().pending_jobs(), 0);
    }

    #[test]
    fn device_local_updates_land_after_a_pass() {
        let (device, context) = context();
        let buffer = allocator(&context, 16, DEVICE_LOCAL);
        let dst = buffer.raw_buffer().buffer;

        buffer.update(&context, 8, &[5; 8]).unwrap();
        assert_eq!(device.contents(dst), vec![0u8; 16]);
        assert_eq!(context.staging().pending_uploads(), 1);

        assert_eq!(context.run_once().unwrap(), 1);

        assert_eq!(&device.contents(dst)[8..], &[5u8; 8]);
        let staging = context.staging();
        assert_eq!(staging.pending_uploads(), 0);
        assert!(!staging.is_dirty());
        assert_eq!(staging.scratch().ranges().len(), 1);
    }

    #[test]
    fn device_local_contents_survive_growth() {
        let (device, context) = context();
        let mut buffer = allocator(&context, 8, DEVICE_LOCAL);
        let range = buffer.allocate(&context, 8).unwrap();
        buffer.update(&context, range.offset, &[7; 8]).unwrap();

        buffer.allocate(&context, 8).unwrap();
        buffer.update(&context, 8, &[9; 8]).unwrap();
        context.run_once().unwrap();

        let contents = device.contents(buffer.raw_buffer().buffer);
        assert_eq!(&contents[..8], &[7u8; 8]);
        assert_eq!(&contents[8..16], &[9u8; 8]);
    }

    #[test]
    fn host_visible_contents_survive_growth() {
        let (device, context) = context();
        let mut buffer = allocator(&context, 4, host_visible());
        buffer.allocate(&context, 4).unwrap();
        buffer.update(&context, 0, &[1, 2, 3, 4]).unwrap();
        let old = buffer.raw_buffer();

        buffer.allocate(&context, 4).unwrap();
        buffer.update(&context, 4, &[5, 6, 7, 8]).unwrap();

        assert_eq!(
            device.contents(buffer.raw_buffer().buffer),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
        // nothing was submitted so the replaced buffer is still alive
        context.run_once().unwrap();
        assert_eq!(device.submissions(), 0);
        assert!(device.is_alive(old.buffer));

        let other = allocator(&context, 4, host_visible());
        other
            .copy_from(&context, buffer.raw_buffer().buffer, 4, 0, 4)
            .unwrap();
        context.run_once().unwrap();

        assert!(!device.is_alive(old.buffer));
        assert_eq!(
            device.contents(other.raw_buffer().buffer),
            vec![5, 6, 7, 8]
        );
    }

    #[test]
    fn host_visible_growth_keeps_queued_copies() {
        let (device, context) = context();
        let src = allocator(&context, 8, host_visible());
        src.update(&context, 0, &[9; 8]).unwrap();
        let mut dst = allocator(&context, 8, host_visible());
        dst.allocate(&context, 8).unwrap();

        dst.copy_from(&context, src.raw_buffer().buffer, 0, 0, 8)
            .unwrap();
        dst.allocate(&context, 8).unwrap();
        context.run_once().unwrap();

        assert_eq!(
            device.contents(dst.raw_buffer().buffer),
            [[9u8; 8], [0u8; 8]].concat()
        );
        assert!(lock_copies(&dst.queued_copies).is_empty());
    }

    #[test]
    fn dropped_buffers_outlive_queued_uploads() {
        let (device, context) = context();
        let buffer = allocator(&context, 16, DEVICE_LOCAL);
        let raw = buffer.raw_buffer();

        buffer.update(&context, 0, &[1; 16]).unwrap();
        drop(buffer);
        assert!(device.is_alive(raw.buffer));

        context.run_once().unwrap();
        assert!(!device.is_alive(raw.buffer));
    }

    #[test]
    fn dropped_buffers_are_released_with_the_context() {
        let (device, context) = context();
        let buffer = allocator(&context, 16, DEVICE_LOCAL);
        let raw = buffer.raw_buffer();

        drop(buffer);
        assert!(device.is_alive(raw.buffer));

        drop(context);
        assert!(!device.is_alive(raw.buffer));
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn updates_past_the_end_are_rejected() {
        let (_device, context) = context();
        let buffer = allocator(&context, 16, DEVICE_LOCAL);

        let result = buffer.update(&context, 12, &[0; 8]);

        assert!(matches!(
            result,
            Err(AllocatorError::OutOfBounds {
                offset: 12,
                size: 8,
                capacity: 16
            })
        ));
        assert_eq!(context.jobs().pending_jobs(), 0);
    }

    #[test]
    fn scratch_grows_for_large_uploads() {
        let (device, context) = context_with(ContextConfig {
            staging_capacity: 16,
            ..ContextConfig::default()
        });
        let old_scratch = context.staging().scratch().raw_buffer();
        let buffer = allocator(&context, 64, DEVICE_LOCAL);

        buffer.update(&context, 0, &[3; 40]).unwrap();
        assert_eq!(context.staging().scratch().capacity(), 80);

        context.run_once().unwrap();

        let contents = device.contents(buffer.raw_buffer().buffer);
        assert_eq!(&contents[..40], &[3u8; 40]);
        assert!(!device.is_alive(old_scratch.buffer));
    }

    #[test]
    fn freeing_twice_is_an_error() {
        let (_device, context) = context();
        let mut buffer = allocator(&context, 64, DEVICE_LOCAL);
        let range = buffer.allocate(&context, 16).unwrap();

        buffer.free(range.offset, range.size).unwrap();
        let result = buffer.free(range.offset, range.size);

        assert!(matches!(
            result,
            Err(AllocatorError::RangeNotFound { offset: 0, size: 16 })
        ));
    }

    #[test]
    fn freed_space_is_reused_before_growing() {
        let (_device, context) = context();
        let mut buffer = allocator(&context, 32, DEVICE_LOCAL);
        let first = buffer.allocate(&context, 16).unwrap();
        buffer.allocate(&context, 16).unwrap();

        buffer.free(first.offset, first.size).unwrap();
        let again = buffer.allocate(&context, 8).unwrap();

        assert_eq!(again.offset, 0);
        assert_eq!(buffer.capacity(), 32);
    }

    #[test]
    fn copy_from_is_recorded_by_the_next_pass() {
        let (device, context) = context();
        let src = allocator(&context, 16, host_visible());
        let dst = allocator(&context, 16, DEVICE_LOCAL);
        src.update(&context, 0, &[4; 16]).unwrap();

        dst.copy_from(&context, src.raw_buffer().buffer, 0, 8, 8)
            .unwrap();
        assert!(!context.staging().is_dirty());
        assert_eq!(context.jobs().pending_jobs(), 1);
        context.run_once().unwrap();

        assert_eq!(
            device.contents(dst.raw_buffer().buffer),
            [[0u8; 8], [4u8; 8]].concat()
        );
        assert!(dst
            .copy_from(&context, src.raw_buffer().buffer, 0, 12, 8)
            .is_err());
    }

    #[test]
    fn usage_always_includes_transfers() {
        let (_device, context) = context();
        let buffer = allocator(&context, 16, DEVICE_LOCAL);
        assert!(buffer.usage.contains(
            vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
        ));
    }
}
