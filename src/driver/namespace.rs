//! Namespace handle shared by all workers on a controller

use super::{Controller, NamespaceGeometry};
use crate::integrity::IntegrityMap;
use crate::util::buffer::DmaBuffer;
use crate::Result;
use anyhow::Context;
use std::sync::Arc;

/// A namespace and the integrity records of its logical blocks
///
/// Cloning is cheap and clones share the same records, so workers on
/// different queues see each other's writes.
#[derive(Clone)]
pub struct Namespace {
    nsid: u32,
    geometry: NamespaceGeometry,
    controller: Arc<dyn Controller>,
    integrity: Arc<IntegrityMap>,
}

impl Namespace {
    pub fn open(controller: Arc<dyn Controller>, nsid: u32) -> Result<Self> {
        let geometry = controller
            .namespace_geometry(nsid)
            .with_context(|| format!("Failed to query namespace {}", nsid))?;

        if geometry.sector_size < crate::integrity::MIN_SECTOR_SIZE {
            anyhow::bail!(
                "namespace {} sector size {} is below the {} byte minimum",
                nsid,
                geometry.sector_size,
                crate::integrity::MIN_SECTOR_SIZE
            );
        }

        Ok(Self {
            nsid,
            geometry,
            controller,
            integrity: Arc::new(IntegrityMap::new(geometry.sector_size)),
        })
    }

    pub fn nsid(&self) -> u32 {
        self.nsid
    }

    pub fn sector_size(&self) -> usize {
        self.geometry.sector_size
    }

    pub fn num_sectors(&self) -> u64 {
        self.geometry.num_sectors
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn integrity(&self) -> &Arc<IntegrityMap> {
        &self.integrity
    }

    pub fn alloc_buffer(&self, bytes: usize) -> Result<DmaBuffer> {
        self.controller.alloc_buffer(bytes)
    }

    /// Forget expected content after a deallocate or sanitize
    ///
    /// `sanitize` drops every record of the namespace. Otherwise the range
    /// `[lba, lba + count)` becomes undefined; `uncorr` marks it as never
    /// expected to read back cleanly.
    pub fn clear_integrity(&self, lba: u64, count: u64, sanitize: bool, uncorr: bool) {
        if sanitize {
            self.integrity.sanitize();
        } else {
            self.integrity.deallocate(lba, count, uncorr);
        }
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("nsid", &self.nsid)
            .field("geometry", &self.geometry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimController;
    use crate::integrity::BlockRecord;

    #[test]
    fn test_open_reads_geometry() {
        let controller = Arc::new(SimController::new(512, 4096));
        let ns = Namespace::open(controller, 1).unwrap();
        assert_eq!(ns.nsid(), 1);
        assert_eq!(ns.sector_size(), 512);
        assert_eq!(ns.num_sectors(), 4096);
    }

    #[test]
    fn test_open_unknown_namespace() {
        let controller = Arc::new(SimController::new(512, 4096));
        let err = Namespace::open(controller, 7).unwrap_err();
        assert!(format!("{:#}", err).contains("namespace 7"));
    }

    #[test]
    fn test_clones_share_integrity_records() {
        let controller = Arc::new(SimController::new(512, 64));
        let ns = Namespace::open(controller, 1).unwrap();
        let other = ns.clone();

        ns.integrity().deallocate(0, 4, true);
        assert_eq!(other.integrity().record(2), Some(BlockRecord::Deallocated { uncorr: true }));

        other.clear_integrity(0, 0, true, false);
        assert_eq!(ns.integrity().record(2), None);
    }
}
