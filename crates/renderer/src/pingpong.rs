//! Frame parity and double-buffered resources.
//!
//! Every pass reads the same [`FrameParity`] within a tick, so the image one
//! pass writes as "current" is the image the next frame reads as "previous".

/// Which element of a [`PingPong`] pair is written this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameParity {
    Even,
    Odd,
}

impl FrameParity {
    /// Parity of the frame with counter `frame`.
    pub fn from_frame(frame: u64) -> Self {
        if frame.is_multiple_of(2) {
            FrameParity::Even
        } else {
            FrameParity::Odd
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            FrameParity::Even => FrameParity::Odd,
            FrameParity::Odd => FrameParity::Even,
        }
    }

    /// Index of the element written this frame.
    #[inline]
    pub fn current_index(self) -> usize {
        match self {
            FrameParity::Even => 0,
            FrameParity::Odd => 1,
        }
    }

    /// Index of the element written last frame.
    #[inline]
    pub fn previous_index(self) -> usize {
        self.flipped().current_index()
    }
}

/// Two resources whose write and read roles swap every frame.
#[derive(Debug)]
pub struct PingPong<T> {
    items: [T; 2],
}

impl<T> PingPong<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            items: [first, second],
        }
    }

    /// Builds both elements from their index.
    pub fn try_from_fn<E>(mut f: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let first = f(0)?;
        let second = f(1)?;
        Ok(Self::new(first, second))
    }

    /// Write target for `parity`.
    #[inline]
    pub fn current(&self, parity: FrameParity) -> &T {
        &self.items[parity.current_index()]
    }

    /// Read source for `parity`; never the same element as `current`.
    #[inline]
    pub fn previous(&self, parity: FrameParity) -> &T {
        &self.items[parity.previous_index()]
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}
