use std::sync::Arc;

use crate::command::CommandList;
use crate::device::{CommandQueue, Device};
use crate::hal::{Fence, FenceEvent, GpuError, GpuResult};
use crate::present::SwapChain;

/// How far the CPU may run ahead of the GPU.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum SyncMode {
    /// Wait for every frame to finish before recording the next one.
    #[default]
    FullStall,
    /// Track one fence value per back buffer; only wait before reusing a
    /// buffer whose previous frame is still in flight.
    PerBuffer,
}

/// Presentation requested as part of a submission.
#[derive(Debug, Copy, Clone)]
pub struct Present<'a> {
    pub swap_chain: &'a SwapChain,
    pub sync_interval: u32,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SyncStats {
    pub submissions: u64,
    pub presents: u64,
    /// Times the CPU actually blocked on the fence event.
    pub waits: u64,
    pub last_signaled: u64,
}

/// Fence, wait event and back-buffer index.
///
/// The local index is authoritative. After every present it is compared with
/// the index the swap chain reports and a mismatch is logged.
#[derive(Debug)]
pub struct FrameSynchronizer {
    mode: SyncMode,
    fence: Fence,
    event: FenceEvent,
    next_fence_value: u64,
    frame_index: u32,
    buffer_count: u32,
    /// Value signaled after the last frame that rendered into each back buffer.
    frame_values: Vec<u64>,
    stats: SyncStats,
}

impl FrameSynchronizer {
    pub fn new(device: &Arc<Device>, mode: SyncMode, buffer_count: u32, initial_index: u32) -> GpuResult<Self> {
        if buffer_count == 0 || initial_index >= buffer_count {
            return Err(GpuError::InvalidCall(format!(
                "back buffer index {initial_index} outside a chain of {buffer_count}"
            )));
        }
        let fence = device.create_fence(0)?;
        log::debug!("frame synchronizer: {mode:?}, {buffer_count} buffers, starting at {initial_index}");
        Ok(Self {
            mode,
            fence,
            event: FenceEvent::new(),
            next_fence_value: 1,
            frame_index: initial_index,
            buffer_count,
            frame_values: vec![0; buffer_count as usize],
            stats: SyncStats::default(),
        })
    }

    /// Submits `lists`, presents if asked, signals the fence and waits as the
    /// mode requires. Returns the signaled value.
    ///
    /// With a present the back-buffer index advances. Without one the call
    /// always waits for the signaled value.
    pub fn submit_and_wait(
        &mut self,
        queue: &CommandQueue,
        lists: &[&CommandList],
        present: Option<Present<'_>>,
    ) -> GpuResult<u64> {
        if !lists.is_empty() {
            queue.execute(lists)?;
        }
        if let Some(present) = present {
            present.swap_chain.present(present.sync_interval)?;
            self.stats.presents += 1;
        }

        let value = self.signal(queue)?;
        for list in lists {
            list.allocator().stamp(&self.fence, value);
        }
        self.stats.submissions += 1;

        let Some(present) = present else {
            self.wait_for(value);
            return Ok(value);
        };

        match self.mode {
            SyncMode::FullStall => {
                self.wait_for(value);
                self.advance();
            }
            SyncMode::PerBuffer => {
                self.frame_values[self.frame_index as usize] = value;
                self.advance();
                self.wait_for(self.frame_values[self.frame_index as usize]);
            }
        }

        let reported = present.swap_chain.current_back_buffer_index();
        if reported != self.frame_index {
            log::warn!(
                "back buffer index mismatch: tracking {}, swap chain reports {reported}",
                self.frame_index
            );
        }
        Ok(value)
    }

    /// Signals a fresh value behind all submitted work and waits for it.
    ///
    /// Safe to call repeatedly.
    pub fn drain(&mut self, queue: &CommandQueue) -> GpuResult<u64> {
        let value = self.signal(queue)?;
        self.wait_for(value);
        log::debug!("queue drained at fence value {value}");
        Ok(value)
    }

    /// Closes the wait handle. The queue must have been drained.
    pub fn close(self) -> SyncStats {
        if self.fence.completed_value() < self.stats.last_signaled {
            log::warn!(
                "closing synchronizer with fence at {} of {}",
                self.fence.completed_value(),
                self.stats.last_signaled
            );
        }
        self.stats
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Back buffer the next frame renders into.
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Command allocator the next frame records into.
    pub fn allocator_index(&self) -> usize {
        match self.mode {
            SyncMode::FullStall => 0,
            SyncMode::PerBuffer => self.frame_index as usize,
        }
    }

    /// Allocators the recorder needs for this mode.
    pub fn allocator_count(&self) -> usize {
        match self.mode {
            SyncMode::FullStall => 1,
            SyncMode::PerBuffer => self.buffer_count as usize,
        }
    }

    pub fn next_fence_value(&self) -> u64 {
        self.next_fence_value
    }

    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    fn signal(&mut self, queue: &CommandQueue) -> GpuResult<u64> {
        let value = self.next_fence_value;
        queue.signal(&self.fence, value)?;
        self.next_fence_value += 1;
        self.stats.last_signaled = value;
        Ok(value)
    }

    fn wait_for(&mut self, value: u64) {
        if self.fence.completed_value() >= value {
            return;
        }
        self.fence.drive();
        if self.fence.completed_value() >= value {
            return;
        }
        log::trace!("waiting for fence value {value}");
        self.fence.set_event_on_completion(value, &self.event);
        self.event.wait();
        self.stats.waits += 1;
    }

    fn advance(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.buffer_count;
    }
}
