//! Planar views over per-channel sample blocks handed to the DSP callback.
//!
//! A plane pointer may be null: disabled channels, and output channels already
//! filled by pass-through, are presented to the processor as absent.

use std::slice;

#[derive(Clone, Copy)]
pub struct AudioView<'a> {
    planes: &'a [*const f32],
    frames: usize,
}

impl<'a> AudioView<'a> {
    #[inline]
    pub fn empty() -> Self {
        Self {
            planes: &[],
            frames: 0,
        }
    }

    /// # Safety
    ///
    /// Every non-null pointer in `planes` must be valid for reads of `frames`
    /// samples for `'a`, and nothing may write to that memory during `'a`.
    #[inline]
    pub unsafe fn from_planes(planes: &'a [*const f32], frames: usize) -> Self {
        Self { planes, frames }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples of channel `index`, or `None` when the channel is absent.
    #[inline]
    pub fn plane(&self, index: usize) -> Option<&'a [f32]> {
        let ptr = *self.planes.get(index)?;
        if ptr.is_null() {
            return None;
        }
        // SAFETY: guaranteed by the `from_planes` contract.
        Some(unsafe { slice::from_raw_parts(ptr, self.frames) })
    }
}

pub struct AudioViewMut<'a> {
    planes: &'a mut [*mut f32],
    frames: usize,
}

impl<'a> AudioViewMut<'a> {
    #[inline]
    pub fn empty() -> Self {
        Self {
            planes: &mut [],
            frames: 0,
        }
    }

    /// # Safety
    ///
    /// Every non-null pointer in `planes` must be valid for reads and writes of
    /// `frames` samples for `'a`, must not alias another plane, and nothing else
    /// may access that memory during `'a`.
    #[inline]
    pub unsafe fn from_planes(planes: &'a mut [*mut f32], frames: usize) -> Self {
        Self { planes, frames }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn plane(&self, index: usize) -> Option<&[f32]> {
        let ptr = *self.planes.get(index)?;
        if ptr.is_null() {
            return None;
        }
        // SAFETY: guaranteed by the `from_planes` contract.
        Some(unsafe { slice::from_raw_parts(ptr, self.frames) })
    }

    #[inline]
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        let ptr = *self.planes.get(index)?;
        if ptr.is_null() {
            return None;
        }
        // SAFETY: guaranteed by the `from_planes` contract; the returned borrow
        // is tied to `&mut self`, so two planes are never handed out at once.
        Some(unsafe { slice::from_raw_parts_mut(ptr, self.frames) })
    }

    /// Zeroes every present channel.
    pub fn silence(&mut self) {
        for index in 0..self.planes.len() {
            if let Some(plane) = self.plane_mut(index) {
                plane.fill(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn null_planes_are_absent() {
        let left = [1.0f32, 2.0, 3.0];
        let planes = [left.as_ptr(), ptr::null()];
        let view = unsafe { AudioView::from_planes(&planes, 3) };
        assert_eq!(view.channels(), 2);
        assert_eq!(view.plane(0), Some(&left[..]));
        assert!(view.plane(1).is_none());
        assert!(view.plane(2).is_none());
    }

    #[test]
    fn silence_touches_only_present_planes() {
        let mut left = [1.0f32; 4];
        let mut planes = [left.as_mut_ptr(), ptr::null_mut()];
        {
            let mut view = unsafe { AudioViewMut::from_planes(&mut planes, 4) };
            view.plane_mut(0).unwrap()[0] = 5.0;
            assert!(view.plane_mut(1).is_none());
            view.silence();
        }
        assert_eq!(left, [0.0; 4]);
    }
}
