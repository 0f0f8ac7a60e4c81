use crate::context::Gpu;
use crate::deletion::DeletionQueue;
use crate::error::{Result, VkResultExt};
use crate::{commands, context::QueueData};
use ash::{vk, Device};
use egui::TextureId;

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAME_OVERLAP: usize = 2;

/// Per-slot synchronisation and recording state.
///
/// A slot is reused every `FRAME_OVERLAP` frames. Waiting on `render_fence` is the point
/// where everything submitted from this slot has finished, so that is also where `pending`
/// is released.
pub(crate) struct FrameData {
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) main_command_buffer: vk::CommandBuffer,
    pub(crate) swapchain_semaphore: vk::Semaphore,
    pub(crate) render_fence: vk::Fence,
    pub(crate) pending: PendingRelease<Gpu>,
}

impl FrameData {
    pub(crate) fn create(device: &Device, graphics_queue: &QueueData) -> Result<Self> {
        let command_pool = commands::create_command_pool(device, graphics_queue.family_index)?;
        let mut frame = Self {
            command_pool,
            main_command_buffer: vk::CommandBuffer::null(),
            swapchain_semaphore: vk::Semaphore::null(),
            render_fence: vk::Fence::null(),
            pending: PendingRelease::new(),
        };

        if let Err(err) = frame.create_objects(device) {
            // null handles are ignored by vkDestroy*
            unsafe { frame.destroy_objects(device) };
            return Err(err);
        }
        Ok(frame)
    }

    fn create_objects(&mut self, device: &Device) -> Result<()> {
        self.main_command_buffer = commands::allocate_primary_buffer(device, self.command_pool)?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        self.swapchain_semaphore =
            unsafe { device.create_semaphore(&semaphore_info, None) }.check("vkCreateSemaphore")?;
        self.render_fence =
            unsafe { device.create_fence(&fence_info, None) }.check("vkCreateFence")?;
        Ok(())
    }

    pub(crate) fn create_all(device: &Device, graphics_queue: &QueueData) -> Result<Vec<Self>> {
        create_slots(
            FRAME_OVERLAP,
            || Self::create(device, graphics_queue),
            |frame| unsafe { frame.destroy_objects(device) },
        )
    }

    /// The caller guarantees the GPU is idle.
    pub(crate) fn destroy(&mut self, gpu: &Gpu) {
        let textures = self.pending.release(gpu);
        if !textures.is_empty() {
            log::debug!("{} UI textures left to the UI renderer", textures.len());
        }
        unsafe { self.destroy_objects(&gpu.device) }
    }

    unsafe fn destroy_objects(&self, device: &Device) {
        // the pool owns the command buffer
        unsafe {
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_semaphore(self.swapchain_semaphore, None);
            device.destroy_fence(self.render_fence, None);
        }
    }
}

/// Creates `count` slots. When one fails, the slots already created are handed to `destroy`.
fn create_slots<T, E>(
    count: usize,
    mut create: impl FnMut() -> std::result::Result<T, E>,
    mut destroy: impl FnMut(&T),
) -> std::result::Result<Vec<T>, E> {
    let mut slots = Vec::with_capacity(count);
    for _ in 0..count {
        match create() {
            Ok(slot) => slots.push(slot),
            Err(err) => {
                slots.iter().rev().for_each(&mut destroy);
                return Err(err);
            }
        }
    }
    Ok(slots)
}

/// Work that may only happen once the owning slot's fence has signalled.
pub(crate) struct PendingRelease<C> {
    deletion_queue: DeletionQueue<C>,
    ui_textures: Vec<TextureId>,
}

impl<C> PendingRelease<C> {
    pub(crate) fn new() -> Self {
        Self {
            deletion_queue: DeletionQueue::new(),
            ui_textures: Vec::new(),
        }
    }

    pub(crate) fn defer<F>(&mut self, deletor: F)
    where
        F: FnOnce(&C) + 'static,
    {
        self.deletion_queue.push(deletor);
    }

    pub(crate) fn defer_textures(&mut self, textures: &[TextureId]) {
        self.ui_textures.extend_from_slice(textures);
    }

    /// Runs the deferred deletions and hands back the UI textures to free.
    pub(crate) fn release(&mut self, ctx: &C) -> Vec<TextureId> {
        self.deletion_queue.flush(ctx);
        std::mem::take(&mut self.ui_textures)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deletion_queue.is_empty() && self.ui_textures.is_empty()
    }
}

/// Counts presented frames and maps them onto frame slots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    frame_number: u64,
}

impl FrameCounter {
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn slot(&self) -> usize {
        (self.frame_number % FRAME_OVERLAP as u64) as usize
    }

    pub fn advance(&mut self) {
        self.frame_number += 1;
    }
}

pub(crate) fn semaphore_submit_info(
    stage_mask: vk::PipelineStageFlags2,
    semaphore: vk::Semaphore,
) -> vk::SemaphoreSubmitInfo<'static> {
    vk::SemaphoreSubmitInfo::default()
        .semaphore(semaphore)
        .stage_mask(stage_mask)
        .device_index(0)
        .value(1)
}

pub(crate) fn command_buffer_submit_info(
    cmd: vk::CommandBuffer,
) -> vk::CommandBufferSubmitInfo<'static> {
    vk::CommandBufferSubmitInfo::default()
        .command_buffer(cmd)
        .device_mask(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};

    #[test]
    fn slots_alternate() {
        let mut counter = FrameCounter::default();
        let slots: Vec<usize> = (0..6)
            .map(|_| {
                let slot = counter.slot();
                counter.advance();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(counter.frame_number(), 6);
    }

    #[test]
    fn slot_is_always_in_range() {
        let mut counter = FrameCounter::default();
        for _ in 0..1000 {
            assert!(counter.slot() < FRAME_OVERLAP);
            counter.advance();
        }
    }

    #[test]
    fn frames_reusing_a_slot_are_overlap_apart() {
        let mut counter = FrameCounter::default();
        let first = counter.slot();
        for _ in 0..FRAME_OVERLAP {
            counter.advance();
        }
        assert_eq!(counter.slot(), first);
    }

    type Destroyed = RefCell<Vec<u64>>;

    /// Drives the slot protocol of one frame: wait on the slot, release it, then defer new work.
    fn run_frame(
        slots: &mut [PendingRelease<Destroyed>],
        counter: &mut FrameCounter,
        destroyed: &Destroyed,
        retire: Option<u64>,
        free: &[TextureId],
    ) -> Vec<TextureId> {
        let slot = &mut slots[counter.slot()];
        let released = slot.release(destroyed);
        if let Some(handle) = retire {
            slot.defer(move |destroyed: &Destroyed| destroyed.borrow_mut().push(handle));
        }
        slot.defer_textures(free);
        counter.advance();
        released
    }

    fn slots() -> Vec<PendingRelease<Destroyed>> {
        (0..FRAME_OVERLAP).map(|_| PendingRelease::new()).collect()
    }

    #[test]
    fn deferred_deletion_waits_for_the_same_slot() {
        let mut slots = slots();
        let mut counter = FrameCounter::default();
        let destroyed = Destroyed::default();

        // frame 0 retires handle 7 on slot 0
        run_frame(&mut slots, &mut counter, &destroyed, Some(7), &[]);
        assert!(destroyed.borrow().is_empty());

        // frame 1 waits on slot 1 only
        run_frame(&mut slots, &mut counter, &destroyed, None, &[]);
        assert!(destroyed.borrow().is_empty());
        assert!(!slots[0].is_empty());

        // frame 2 waits on slot 0 again
        run_frame(&mut slots, &mut counter, &destroyed, None, &[]);
        assert_eq!(*destroyed.borrow(), vec![7]);
        assert!(slots.iter().all(PendingRelease::is_empty));
    }

    #[test]
    fn each_slot_releases_only_its_own_work() {
        let mut slots = slots();
        let mut counter = FrameCounter::default();
        let destroyed = Destroyed::default();

        for handle in 0..6 {
            run_frame(&mut slots, &mut counter, &destroyed, Some(handle), &[]);
        }
        // frames 4 and 5 are still in flight
        assert_eq!(*destroyed.borrow(), vec![0, 1, 2, 3]);

        run_frame(&mut slots, &mut counter, &destroyed, None, &[]);
        assert_eq!(*destroyed.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn ui_textures_are_freed_a_full_overlap_later() {
        let mut slots = slots();
        let mut counter = FrameCounter::default();
        let destroyed = Destroyed::default();
        let font = TextureId::Managed(0);
        let image = TextureId::User(3);

        let freed = run_frame(&mut slots, &mut counter, &destroyed, None, &[font, image]);
        assert!(freed.is_empty());
        let freed = run_frame(&mut slots, &mut counter, &destroyed, None, &[]);
        assert!(freed.is_empty());
        let freed = run_frame(&mut slots, &mut counter, &destroyed, None, &[]);
        assert_eq!(freed, vec![font, image]);

        // released once only
        run_frame(&mut slots, &mut counter, &destroyed, None, &[]);
        let freed = run_frame(&mut slots, &mut counter, &destroyed, None, &[]);
        assert!(freed.is_empty());
    }

    #[test]
    fn failed_slot_creation_destroys_earlier_slots() {
        let created = Cell::new(0);
        let destroyed = RefCell::new(Vec::new());

        let result = create_slots(
            FRAME_OVERLAP,
            || {
                let n = created.get();
                created.set(n + 1);
                if n == FRAME_OVERLAP - 1 {
                    Err("out of memory")
                } else {
                    Ok(n)
                }
            },
            |slot: &usize| destroyed.borrow_mut().push(*slot),
        );

        assert_eq!(result, Err("out of memory"));
        let expected: Vec<usize> = (0..FRAME_OVERLAP - 1).rev().collect();
        assert_eq!(destroyed.into_inner(), expected);
    }

    #[test]
    fn successful_slot_creation_destroys_nothing() {
        let destroyed = Cell::new(0);
        let slots: std::result::Result<Vec<u32>, ()> =
            create_slots(FRAME_OVERLAP, || Ok(1), |_| destroyed.set(destroyed.get() + 1));
        assert_eq!(slots.map(|s| s.len()), Ok(FRAME_OVERLAP));
        assert_eq!(destroyed.get(), 0);
    }

    #[test]
    fn semaphore_info_targets_binary_semaphore() {
        let semaphore = vk::Semaphore::from_raw(42);
        let info = semaphore_submit_info(vk::PipelineStageFlags2::ALL_GRAPHICS, semaphore);
        assert_eq!(info.semaphore, semaphore);
        assert_eq!(info.stage_mask, vk::PipelineStageFlags2::ALL_GRAPHICS);
        assert_eq!(info.device_index, 0);
    }

    #[test]
    fn command_buffer_info_wraps_handle() {
        let cmd = vk::CommandBuffer::from_raw(7);
        let info = command_buffer_submit_info(cmd);
        assert_eq!(info.command_buffer, cmd);
        assert_eq!(info.device_mask, 0);
    }
}
