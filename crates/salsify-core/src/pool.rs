//! Size-keyed raster pool.
//!
//! Hot-path allocation of megabyte rasters dominates frame pacing, so decoded
//! and scratch rasters come from a free list. A handle owns exactly one
//! raster and deposits it back on drop; if the pool is gone by then the
//! raster is simply freed.
//!
//! The pool is constructed once near the top of main (or the controller) and
//! passed to every consumer. Steady-state resizing is a bug, so requests for
//! a different size fail unless the pool was built with `allow_resize`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::raster::Raster;

struct PoolInner {
    free: Mutex<Vec<Raster>>,
    width: u16,
    height: u16,
    allow_resize: bool,
}

/// Shared handle to a raster free list.
#[derive(Clone)]
pub struct RasterPool {
    inner: Arc<PoolInner>,
}

impl RasterPool {
    pub fn new(width: u16, height: u16) -> Self {
        Self::with_options(width, height, false)
    }

    pub fn with_options(width: u16, height: u16, allow_resize: bool) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                width,
                height,
                allow_resize,
            }),
        }
    }

    pub fn width(&self) -> u16 {
        self.inner.width
    }

    pub fn height(&self) -> u16 {
        self.inner.height
    }

    /// Number of rasters currently parked on the free list.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Take a raster of the pool's size, allocating if the free list is dry.
    pub fn take(&self) -> Result<RasterHandle> {
        self.take_sized(self.inner.width, self.inner.height)
    }

    /// Take a raster of an explicit size. Sizes other than the pool's fail
    /// unless resizing was enabled at construction, in which case the raster
    /// is allocated outside the free list.
    pub fn take_sized(&self, width: u16, height: u16) -> Result<RasterHandle> {
        if width != self.inner.width || height != self.inner.height {
            if !self.inner.allow_resize {
                return Err(CoreError::PoolSizeMismatch {
                    pool_width: self.inner.width,
                    pool_height: self.inner.height,
                    width,
                    height,
                });
            }
            debug!(width, height, "pool miss: allocating off-size raster");
            return Ok(RasterHandle {
                raster: Some(Raster::new(width, height)?),
                pool: Weak::new(),
            });
        }

        let recycled = self.inner.free.lock().pop();
        let raster = match recycled {
            Some(raster) => raster,
            None => Raster::new(width, height)?,
        };
        Ok(RasterHandle {
            raster: Some(raster),
            pool: Arc::downgrade(&self.inner),
        })
    }
}

/// Owning handle over one pooled raster.
pub struct RasterHandle {
    raster: Option<Raster>,
    pool: Weak<PoolInner>,
}

impl RasterHandle {
    pub fn get(&self) -> &Raster {
        self.raster.as_ref().expect("raster present until drop")
    }

    pub fn get_mut(&mut self) -> &mut Raster {
        self.raster.as_mut().expect("raster present until drop")
    }

    /// Detach the raster from the pool, keeping it alive independently.
    pub fn into_raster(mut self) -> Raster {
        self.raster.take().expect("raster present until drop")
    }
}

impl Drop for RasterHandle {
    fn drop(&mut self) {
        if let Some(raster) = self.raster.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.free.lock().push(raster);
            }
            // pool destroyed first: the raster is freed outright
        }
    }
}

impl std::ops::Deref for RasterHandle {
    type Target = Raster;

    fn deref(&self) -> &Raster {
        self.get()
    }
}

impl std::ops::DerefMut for RasterHandle {
    fn deref_mut(&mut self) -> &mut Raster {
        self.get_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_deposits_back_on_drop() {
        let pool = RasterPool::new(64, 48);
        assert_eq!(pool.available(), 0);
        {
            let _handle = pool.take().unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);

        // the recycled raster is reused, not reallocated
        let _again = pool.take().unwrap();
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn off_size_request_fails_without_resize() {
        let pool = RasterPool::new(64, 48);
        assert!(pool.take_sized(128, 96).is_err());
    }

    #[test]
    fn off_size_request_allowed_with_resize() {
        let pool = RasterPool::with_options(64, 48, true);
        let handle = pool.take_sized(128, 96).unwrap();
        assert_eq!(handle.display_width(), 128);
        drop(handle);
        // off-size rasters never join the free list
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn raster_survives_pool_destruction() {
        let handle = {
            let pool = RasterPool::new(32, 32);
            pool.take().unwrap()
        };
        assert_eq!(handle.display_width(), 32);
        drop(handle); // freed outright, no panic
    }
}
