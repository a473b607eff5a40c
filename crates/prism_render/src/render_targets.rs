//! Pooled render targets.
//!
//! Images are kept in an arena of slots keyed by (format, width, height).
//! A `RenderTarget` is a slot index plus the slot's lease generation, so a
//! handle kept past its lease (or past the frame) is detected instead of
//! silently aliasing a newer lease.

use std::collections::HashMap;

use prism_core::{PixelFormat, RenderError, RenderResult};

use crate::image::Image;

/// Frames a free image may sit unused before its memory is dropped.
pub const MAX_IDLE_FRAMES: u64 = 3;

/// Shape an image must match to be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl TargetKey {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_texel()
    }
}

/// Handle to a leased image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTarget {
    slot: u32,
    generation: u32,
}

impl RenderTarget {
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// Device-side image creation.
pub trait ImageAllocator {
    /// Create an image of the given shape; contents are unspecified.
    fn allocate(&mut self, key: TargetKey) -> RenderResult<Image>;

    /// Memory of an image has been dropped by the pool.
    fn free(&mut self, _key: TargetKey) {}
}

/// Host-memory allocator with an optional byte budget.
#[derive(Debug, Default)]
pub struct CpuAllocator {
    budget: Option<usize>,
    allocated: usize,
}

impl CpuAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail allocations once `budget` bytes are live.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget: Some(budget),
            allocated: 0,
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }
}

impl ImageAllocator for CpuAllocator {
    fn allocate(&mut self, key: TargetKey) -> RenderResult<Image> {
        let size = key.size_bytes();
        if let Some(budget) = self.budget {
            if self.allocated + size > budget {
                return Err(RenderError::Allocation {
                    format: key.format,
                    width: key.width,
                    height: key.height,
                    reason: format!(
                        "{} bytes requested with {} of {} bytes in use",
                        size, self.allocated, budget
                    ),
                });
            }
        }
        self.allocated += size;
        Ok(Image::new(key.format, key.width, key.height))
    }

    fn free(&mut self, key: TargetKey) {
        self.allocated = self.allocated.saturating_sub(key.size_bytes());
    }
}

struct Slot {
    key: TargetKey,
    /// `None` while checked out by a dispatch
    image: Option<Image>,
    generation: u32,
    leased: bool,
    last_used_frame: u64,
}

/// Leases and recycles render-target images across frames.
pub struct RenderTargetManager {
    slots: Vec<Option<Slot>>,
    free: HashMap<TargetKey, Vec<u32>>,
    /// Evicted slot indices with the last generation they handed out
    vacant: Vec<(u32, u32)>,
    allocator: Box<dyn ImageAllocator>,
    frame: u64,
    live: usize,
}

impl RenderTargetManager {
    pub fn new(allocator: Box<dyn ImageAllocator>) -> Self {
        Self {
            slots: Vec::new(),
            free: HashMap::new(),
            vacant: Vec::new(),
            allocator,
            frame: 0,
            live: 0,
        }
    }

    /// Lease an image of the given shape.
    ///
    /// A pooled image with the same key is reused when one is free; its
    /// contents are whatever the previous holder left behind.
    pub fn lease(&mut self, format: PixelFormat, width: u32, height: u32) -> RenderResult<RenderTarget> {
        let key = TargetKey::new(format, width, height);
        let frame = self.frame;

        let reused = self.free.get_mut(&key).and_then(|slots| slots.pop());
        let index = match reused {
            Some(index) => index,
            None => {
                let image = self.allocator.allocate(key)?;
                let (vacant, generation) = match self.vacant.pop() {
                    Some((index, generation)) => (Some(index), generation),
                    None => (None, 0),
                };
                let slot = Slot {
                    key,
                    image: Some(image),
                    generation,
                    leased: false,
                    last_used_frame: frame,
                };
                match vacant {
                    Some(index) => {
                        self.slots[index as usize] = Some(slot);
                        index
                    }
                    None => {
                        self.slots.push(Some(slot));
                        (self.slots.len() - 1) as u32
                    }
                }
            }
        };

        let slot = self.slots[index as usize]
            .as_mut()
            .ok_or(RenderError::StaleTarget { slot: index, generation: 0 })?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.leased = true;
        slot.last_used_frame = frame;
        self.live += 1;

        Ok(RenderTarget {
            slot: index,
            generation: slot.generation,
        })
    }

    /// Return a lease to the pool before the frame ends.
    pub fn release(&mut self, target: RenderTarget) -> RenderResult<()> {
        let slot = self.slot_mut(target)?;
        if slot.image.is_none() {
            return Err(RenderError::StaleTarget {
                slot: target.slot,
                generation: target.generation,
            });
        }
        slot.leased = false;
        let key = slot.key;
        self.free.entry(key).or_default().push(target.slot);
        self.live -= 1;
        Ok(())
    }

    /// Return every lease to the pool and drop images idle for too long.
    pub fn end_frame(&mut self) {
        self.frame += 1;
        self.free.clear();
        self.live = 0;

        for (index, entry) in self.slots.iter_mut().enumerate() {
            let Some(slot) = entry else { continue };
            if slot.image.is_none() {
                // A dispatch never returned its image; the slot is unusable.
                log::warn!("Render target slot {index} was not restored before frame end");
                self.vacant.push((index as u32, slot.generation));
                *entry = None;
                continue;
            }
            slot.leased = false;
            if self.frame - slot.last_used_frame > MAX_IDLE_FRAMES {
                self.allocator.free(slot.key);
                self.vacant.push((index as u32, slot.generation));
                *entry = None;
            } else {
                self.free.entry(slot.key).or_default().push(index as u32);
            }
        }
    }

    /// Read access to a leased image.
    pub fn image(&self, target: RenderTarget) -> RenderResult<&Image> {
        self.slot(target)?.image.as_ref().ok_or(RenderError::StaleTarget {
            slot: target.slot,
            generation: target.generation,
        })
    }

    /// Check an image out for writing; it must be `restore`d afterwards.
    pub fn take(&mut self, target: RenderTarget) -> RenderResult<Image> {
        self.slot_mut(target)?.image.take().ok_or(RenderError::StaleTarget {
            slot: target.slot,
            generation: target.generation,
        })
    }

    /// Put back an image checked out with `take`.
    pub fn restore(&mut self, target: RenderTarget, image: Image) -> RenderResult<()> {
        let slot = self.slot_mut(target)?;
        slot.image = Some(image);
        Ok(())
    }

    /// Number of images currently leased.
    pub fn live_leases(&self) -> usize {
        self.live
    }

    /// Number of images held by the pool, leased or free.
    pub fn pooled_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn slot(&self, target: RenderTarget) -> RenderResult<&Slot> {
        match self.slots.get(target.slot as usize) {
            Some(Some(slot)) if slot.leased && slot.generation == target.generation => Ok(slot),
            _ => Err(RenderError::StaleTarget {
                slot: target.slot,
                generation: target.generation,
            }),
        }
    }

    fn slot_mut(&mut self, target: RenderTarget) -> RenderResult<&mut Slot> {
        match self.slots.get_mut(target.slot as usize) {
            Some(Some(slot)) if slot.leased && slot.generation == target.generation => Ok(slot),
            _ => Err(RenderError::StaleTarget {
                slot: target.slot,
                generation: target.generation,
            }),
        }
    }
}

impl Default for RenderTargetManager {
    fn default() -> Self {
        Self::new(Box::new(CpuAllocator::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_live_leases_never_alias() {
        let mut targets = RenderTargetManager::default();
        let leases: Vec<_> = (0..64)
            .map(|_| targets.lease(PixelFormat::Rgba32Float, 8, 4).unwrap())
            .collect();

        let slots: HashSet<u32> = leases.iter().map(|t| t.slot()).collect();
        assert_eq!(slots.len(), leases.len());
        assert_eq!(targets.live_leases(), 64);
    }

    #[test]
    fn test_end_frame_recycles_matching_shape() {
        let mut targets = RenderTargetManager::default();
        let first = targets.lease(PixelFormat::R8Unorm, 4, 4).unwrap();
        targets.end_frame();

        let second = targets.lease(PixelFormat::R8Unorm, 4, 4).unwrap();
        assert_eq!(first.slot(), second.slot());
        assert_ne!(first, second);
        assert_eq!(targets.pooled_count(), 1);

        // A different shape never reuses the slot.
        let other = targets.lease(PixelFormat::R8Unorm, 4, 2).unwrap();
        assert_ne!(other.slot(), second.slot());
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut targets = RenderTargetManager::default();
        let target = targets.lease(PixelFormat::R32Float, 2, 2).unwrap();
        targets.end_frame();

        assert!(matches!(
            targets.image(target),
            Err(RenderError::StaleTarget { .. })
        ));
    }

    #[test]
    fn test_release_allows_reuse_within_frame() {
        let mut targets = RenderTargetManager::default();
        let a = targets.lease(PixelFormat::R32Float, 2, 2).unwrap();
        targets.release(a).unwrap();
        let b = targets.lease(PixelFormat::R32Float, 2, 2).unwrap();

        assert_eq!(a.slot(), b.slot());
        assert!(targets.image(a).is_err());
        assert!(targets.image(b).is_ok());
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let key = TargetKey::new(PixelFormat::Rgba32Float, 4, 4);
        let mut targets = RenderTargetManager::new(Box::new(CpuAllocator::with_budget(key.size_bytes())));

        assert!(targets.lease(PixelFormat::Rgba32Float, 4, 4).is_ok());
        let err = targets.lease(PixelFormat::Rgba32Float, 4, 4).unwrap_err();
        assert!(matches!(err, RenderError::Allocation { width: 4, .. }));
    }

    #[test]
    fn test_cpu_allocator_tracks_bytes() {
        let key = TargetKey::new(PixelFormat::R8Unorm, 8, 2);
        let mut allocator = CpuAllocator::new();
        allocator.allocate(key).unwrap();
        allocator.allocate(key).unwrap();
        assert_eq!(allocator.allocated_bytes(), 32);
        allocator.free(key);
        assert_eq!(allocator.allocated_bytes(), 16);
    }

    #[test]
    fn test_idle_images_are_dropped() {
        let mut targets = RenderTargetManager::default();
        targets.lease(PixelFormat::R8Unorm, 2, 2).unwrap();
        for _ in 0..=MAX_IDLE_FRAMES {
            targets.end_frame();
        }
        assert_eq!(targets.pooled_count(), 0);
    }

    #[test]
    fn test_handle_to_evicted_slot_stays_stale() {
        let mut targets = RenderTargetManager::default();
        let old = targets.lease(PixelFormat::R32Float, 2, 2).unwrap();
        for _ in 0..=MAX_IDLE_FRAMES {
            targets.end_frame();
        }
        let fresh = targets.lease(PixelFormat::R8Unorm, 3, 3).unwrap();

        assert_eq!(fresh.slot(), old.slot());
        assert_ne!(fresh, old);
        assert!(matches!(targets.image(old), Err(RenderError::StaleTarget { .. })));
        assert!(targets.release(old).is_err());
        assert_eq!(targets.image(fresh).unwrap().format, PixelFormat::R8Unorm);
    }

    #[test]
    fn test_take_and_restore() {
        let mut targets = RenderTargetManager::default();
        let target = targets.lease(PixelFormat::R32Float, 2, 2).unwrap();

        let image = targets.take(target).unwrap();
        assert!(targets.image(target).is_err());
        targets.restore(target, image).unwrap();
        assert!(targets.image(target).is_ok());
    }
}
