//! Visibility state carried from one frame to the next
//!
//! One `u32` per (instance, meshlet) pair lives on the GPU. Only the main
//! pass of frame N writes it and only the prepass of frame N+1 reads it.
//! The main pass writes a second buffer that becomes current on submit.
//! That hand-over is explicit: the main pass publishes a
//! [`VisibilityHandoff`] carrying its submission fence, and the next
//! prepass takes it before trusting the bits.

use crate::error::EngineResult;
use crate::gpu::{create_buffer_init, read_pod, BufferUsage, FenceValue, GpuBuffer, GpuSurface};

/// Published by a completed main pass, consumed by the next prepass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityHandoff {
    pub produced_by_frame: u64,
    pub fence: FenceValue,
}

/// Visibility bits of one meshlet group
///
/// Two buffers: the prepass reads `current`, the main pass writes
/// `pending`, and [`VisibilityBits::commit`] swaps them once the frame has
/// been submitted. An abandoned frame never touches `current`.
#[derive(Debug)]
pub struct VisibilityBits {
    current: GpuBuffer,
    pending: GpuBuffer,
    meshlet_count: u32,
    instance_count: u32,
}

impl VisibilityBits {
    /// All bits start cleared: nothing was visible before the first frame
    pub fn new(surface: &mut dyn GpuSurface, meshlet_count: u32, instance_count: u32) -> EngineResult<Self> {
        let zeros = vec![0u32; (meshlet_count as usize) * (instance_count as usize)];
        let current = create_buffer_init(surface, "Visibility Bits", BufferUsage::Storage, &zeros)?;
        let pending = create_buffer_init(surface, "Visibility Bits Pending", BufferUsage::Storage, &zeros)?;
        Ok(Self {
            current,
            pending,
            meshlet_count,
            instance_count,
        })
    }

    /// Bits of the last completed frame
    pub fn current(&self) -> &GpuBuffer {
        &self.current
    }

    /// Bits being written by the frame in flight
    pub fn pending(&self) -> &GpuBuffer {
        &self.pending
    }

    pub fn meshlet_count(&self) -> u32 {
        self.meshlet_count
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn bit_index(&self, instance: u32, meshlet: u32) -> usize {
        instance as usize * self.meshlet_count as usize + meshlet as usize
    }

    /// Make the bits written by the submitted main pass the current ones
    pub fn commit(&mut self) {
        std::mem::swap(&mut self.current, &mut self.pending);
    }

    /// Host copy of the current bits. Blocks on outstanding GPU work.
    pub fn read(&self, surface: &mut dyn GpuSurface) -> EngineResult<Vec<u32>> {
        let mut bits: Vec<u32> = read_pod(surface, &self.current)?;
        bits.truncate(self.meshlet_count as usize * self.instance_count as usize);
        Ok(bits)
    }
}

/// Per-group visibility bits plus the single-slot frame handoff
#[derive(Debug)]
pub struct VisibilityStateStore {
    groups: Vec<VisibilityBits>,
    sender: flume::Sender<VisibilityHandoff>,
    receiver: flume::Receiver<VisibilityHandoff>,
}

impl Default for VisibilityStateStore {
    fn default() -> Self {
        let (sender, receiver) = flume::bounded(1);
        Self {
            groups: Vec::new(),
            sender,
            receiver,
        }
    }
}

impl VisibilityStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, bits: VisibilityBits) -> usize {
        self.groups.push(bits);
        self.groups.len() - 1
    }

    pub fn group(&self, index: usize) -> Option<&VisibilityBits> {
        self.groups.get(index)
    }

    pub fn group_mut(&mut self, index: usize) -> Option<&mut VisibilityBits> {
        self.groups.get_mut(index)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Swap in new bits for a group, returning the old ones
    pub fn replace_group(&mut self, index: usize, bits: VisibilityBits) -> Option<VisibilityBits> {
        self.groups
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, bits))
    }

    /// Commit the pending bits of every group
    pub fn commit_all(&mut self) {
        self.groups.iter_mut().for_each(VisibilityBits::commit);
    }

    /// Publish a finished main pass. An unconsumed older handoff is replaced.
    pub fn publish(&self, handoff: VisibilityHandoff) {
        if let Ok(stale) = self.receiver.try_recv() {
            log::debug!(
                "[VisibilityStateStore] Frame {} handoff superseded by frame {}",
                stale.produced_by_frame,
                handoff.produced_by_frame
            );
        }
        // Capacity 1 and just drained
        let _ = self.sender.try_send(handoff);
    }

    /// Take the pending handoff, if any. Each handoff is taken at most once.
    pub fn take_handoff(&self) -> Option<VisibilityHandoff> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareSurface;

    #[test]
    fn test_bits_start_cleared() {
        let mut surface = SoftwareSurface::new();
        let bits = VisibilityBits::new(&mut surface, 5, 3).expect("bits");
        assert_eq!(bits.bit_index(2, 4), 14);
        assert_eq!(bits.read(&mut surface).expect("read"), vec![0; 15]);
    }

    #[test]
    fn test_commit_swaps_pending_in() {
        let mut surface = SoftwareSurface::new();
        let mut bits = VisibilityBits::new(&mut surface, 2, 1).expect("bits");
        surface
            .upload(bits.pending(), 0, bytemuck::cast_slice(&[1u32, 0]))
            .expect("write pending");

        assert_eq!(bits.read(&mut surface).expect("read"), vec![0, 0]);
        bits.commit();
        assert_eq!(bits.read(&mut surface).expect("read"), vec![1, 0]);
    }

    #[test]
    fn test_replace_group_hands_back_old_bits() {
        let mut surface = SoftwareSurface::new();
        let mut store = VisibilityStateStore::new();
        let index = store.add_group(VisibilityBits::new(&mut surface, 2, 1).expect("bits"));

        let grown = VisibilityBits::new(&mut surface, 2, 3).expect("grown");
        let old = store.replace_group(index, grown).expect("old bits");
        assert_eq!(old.instance_count(), 1);
        assert_eq!(store.group(index).expect("group").instance_count(), 3);
        assert!(store
            .replace_group(7, VisibilityBits::new(&mut surface, 1, 1).expect("bits"))
            .is_none());
    }

    #[test]
    fn test_handoff_is_single_consumer() {
        let store = VisibilityStateStore::new();
        assert!(store.take_handoff().is_none());

        store.publish(VisibilityHandoff {
            produced_by_frame: 0,
            fence: FenceValue(1),
        });
        store.publish(VisibilityHandoff {
            produced_by_frame: 1,
            fence: FenceValue(2),
        });

        let handoff = store.take_handoff().expect("pending handoff");
        assert_eq!(handoff.produced_by_frame, 1);
        assert!(store.take_handoff().is_none());
    }
}
