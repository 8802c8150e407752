//! Backing memory for an index: a private heap block or a named
//! shared-memory segment. Both hand out a zeroed, cache-line aligned base.

use crate::constants::{CACHE_LINE, PREFIX};
use crate::errors::Error;
use crate::helpers::fnv1a_64;
#[cfg(unix)]
use crate::platform::unix::{make_os_id, platform_drop};
#[cfg(target_os = "windows")]
use crate::platform::windows::{make_os_id, platform_drop};
use log::{debug, info};
use shared_memory::{Shmem, ShmemConf, ShmemError};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

pub enum MappedRegion {
    Heap {
        base: NonNull<u8>,
        layout: Layout,
    },
    Shared {
        shmem: Shmem,
        os_id: String,
        is_creator: bool,
    },
}

impl MappedRegion {
    /// Zeroed private allocation.
    pub fn heap(size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::InvalidGeometry("region size is zero"));
        }
        let layout = Layout::from_size_align(size, CACHE_LINE)
            .map_err(|_| Error::InvalidGeometry("region too large"))?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(Error::InvalidGeometry("allocation failed"))?;
        debug!("[REGION] heap block of {} bytes", size);
        Ok(MappedRegion::Heap { base, layout })
    }

    /// Create the segment behind `name`, or attach to it if it already exists.
    pub fn shared(name: &str, size: usize) -> Result<Self, Error> {
        let os_id = shared_os_id(name);
        let conf = || ShmemConf::new().os_id(&os_id).size(size);
        let (mut shmem, is_creator) = match conf().create() {
            Ok(m) => (m, true),
            Err(ShmemError::MappingIdExists) => (conf().open()?, false),
            Err(e) => return Err(e.into()),
        };
        if shmem.len() < size {
            return Err(Error::GeometryMismatch);
        }
        // Lifetime of the segment follows the header ref_count, not this mapping.
        shmem.set_owner(false);
        if (shmem.as_ptr() as usize) % CACHE_LINE != 0 {
            return Err(Error::Shmem("mapping is not cache-line aligned".into()));
        }
        info!(
            "[REGION] {} shared segment {} ({} bytes)",
            if is_creator { "created" } else { "attached" },
            os_id,
            shmem.len()
        );
        Ok(MappedRegion::Shared { shmem, os_id, is_creator })
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        match self {
            MappedRegion::Heap { base, .. } => *base,
            // A successful mapping is never null.
            MappedRegion::Shared { shmem, .. } => {
                NonNull::new(shmem.as_ptr()).unwrap_or(NonNull::dangling())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MappedRegion::Heap { layout, .. } => layout.size(),
            MappedRegion::Shared { shmem, .. } => shmem.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for heap blocks and for the handle that created a shared segment.
    pub fn is_creator(&self) -> bool {
        match self {
            MappedRegion::Heap { .. } => true,
            MappedRegion::Shared { is_creator, .. } => *is_creator,
        }
    }

    pub fn os_id(&self) -> Option<&str> {
        match self {
            MappedRegion::Heap { .. } => None,
            MappedRegion::Shared { os_id, .. } => Some(os_id),
        }
    }

    /// Remove the OS name of a shared segment. Live mappings stay valid.
    pub fn unlink(&self) {
        if let Some(os_id) = self.os_id() {
            debug!("[REGION] unlinking {}", os_id);
            platform_drop(os_id);
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let MappedRegion::Heap { base, layout } = self {
            // SAFETY: allocated in `heap` with exactly this layout.
            unsafe { alloc::dealloc(base.as_ptr(), *layout) };
        }
        // Shared mappings are unmapped by Shmem's own Drop.
    }
}

/// OS-level name of the segment for a user-facing index name.
pub fn shared_os_id(name: &str) -> String {
    make_os_id(PREFIX, fnv1a_64(name))
}

/// Unlink a named segment without attaching to it.
pub fn force_destroy(name: &str) {
    platform_drop(&shared_os_id(name));
}
