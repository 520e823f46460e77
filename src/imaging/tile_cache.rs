//! Bounded strip cache over a sequential decoder.
//!
//! Decoders for compressed formats can only produce rows top to bottom.
//! The residual resample, on the other hand, is evaluated by many worker
//! threads at once, each wanting a different range of input rows. If each
//! worker drove the decoder itself, a worker waiting for row 900 could sit
//! on the decoder while the worker that needs row 100 waits for it.
//!
//! [`TileCache`] owns the decoder and a single decode cursor. Whichever
//! thread asks for a strip beyond the cursor advances it, one strip at a
//! time, and every strip it produces is published for all threads. Strips
//! are decoded strictly in index order and exactly once; the oldest strip is
//! evicted once `max_tiles` are held.
//!
//! The decoder runs without the lock held, so threads asking for strips
//! that are already cached are never blocked by a decode in progress.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// A producer of strips that can only go forward.
pub trait SequentialSource: Send {
    type Strip: Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    /// The next strip, or `None` once the source is exhausted.
    fn next_strip(&mut self) -> Result<Option<Self::Strip>, Self::Error>;
}

impl<S: SequentialSource + ?Sized> SequentialSource for Box<S> {
    type Strip = S::Strip;
    type Error = S::Error;

    fn next_strip(&mut self) -> Result<Option<Self::Strip>, Self::Error> {
        (**self).next_strip()
    }
}

#[derive(Error, Debug)]
pub enum TileCacheError<E: std::error::Error + 'static> {
    #[error("strip decode failed: {0}")]
    Source(#[source] E),
    #[error("strip {index} was evicted before it was read")]
    Evicted { index: u32 },
    #[error("strip {index} is past the end of the image ({strips} strips)")]
    OutOfRange { index: u32, strips: u32 },
    #[error("strip cache was aborted")]
    Aborted,
}

struct Window<S: SequentialSource> {
    /// `None` while a thread is decoding, and for good once the source is
    /// exhausted, failed or aborted.
    source: Option<S>,
    decoding: bool,
    /// Index of the next strip the source will produce.
    cursor: u32,
    strips: VecDeque<Arc<S::Strip>>,
    exhausted: bool,
    aborted: bool,
}

impl<S: SequentialSource> Window<S> {
    /// Index of `strips[0]`.
    fn first_index(&self) -> u32 {
        self.cursor - self.strips.len() as u32
    }

    fn lookup(&self, index: u32) -> Option<Arc<S::Strip>> {
        let first = self.first_index();
        if index >= first && index < self.cursor {
            self.strips.get((index - first) as usize).cloned()
        } else {
            None
        }
    }
}

/// Thread-safe window of at most `max_tiles` strips over a [`SequentialSource`].
pub struct TileCache<S: SequentialSource> {
    window: Mutex<Window<S>>,
    ready: Condvar,
    max_tiles: usize,
}

impl<S: SequentialSource> TileCache<S> {
    pub fn new(source: S, max_tiles: u32) -> Self {
        Self {
            window: Mutex::new(Window {
                source: Some(source),
                decoding: false,
                cursor: 0,
                strips: VecDeque::new(),
                exhausted: false,
                aborted: false,
            }),
            ready: Condvar::new(),
            max_tiles: max_tiles.max(1) as usize,
        }
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    /// Number of strips the source has produced so far.
    pub fn decoded(&self) -> u32 {
        self.window.lock().cursor
    }

    /// Strip `index`, decoding up to it if needed. Blocks while another
    /// thread is decoding.
    pub fn fetch_strip(&self, index: u32) -> Result<Arc<S::Strip>, TileCacheError<S::Error>> {
        let mut window = self.window.lock();
        loop {
            if window.aborted {
                return Err(TileCacheError::Aborted);
            }
            if let Some(strip) = window.lookup(index) {
                return Ok(strip);
            }
            if index < window.cursor {
                return Err(TileCacheError::Evicted { index });
            }
            if window.exhausted {
                return Err(TileCacheError::OutOfRange {
                    index,
                    strips: window.cursor,
                });
            }
            if window.decoding {
                self.ready.wait(&mut window);
                continue;
            }
            self.advance(&mut window)?;
        }
    }

    /// Decode one strip with the lock released, then publish it.
    fn advance(&self, window: &mut MutexGuard<'_, Window<S>>) -> Result<(), TileCacheError<S::Error>> {
        let Some(mut source) = window.source.take() else {
            return Err(TileCacheError::Aborted);
        };
        window.decoding = true;
        let produced = MutexGuard::unlocked(window, || source.next_strip());
        window.decoding = false;
        self.ready.notify_all();

        match produced {
            Ok(Some(strip)) => {
                if !window.aborted {
                    window.source = Some(source);
                }
                window.strips.push_back(Arc::new(strip));
                window.cursor += 1;
                while window.strips.len() > self.max_tiles {
                    window.strips.pop_front();
                }
                Ok(())
            }
            Ok(None) => {
                window.exhausted = true;
                Ok(())
            }
            Err(err) => {
                window.aborted = true;
                window.strips.clear();
                Err(TileCacheError::Source(err))
            }
        }
    }

    /// Release the source and every cached strip. Pending and later fetches
    /// fail with [`TileCacheError::Aborted`].
    pub fn abort(&self) {
        let mut window = self.window.lock();
        window.aborted = true;
        window.source = None;
        window.strips.clear();
        self.ready.notify_all();
    }
}
