//! Processing element (a single CPU core equivalent).

use serde::Serialize;

/// Processing element with a nominal MIPS capacity.
#[derive(Debug, Clone, Serialize)]
pub struct Pe {
    pub id: u32,
    mips: f64,
    failed: bool,
}

impl Pe {
    pub fn new(id: u32, mips: f64) -> Self {
        Self { id, mips, failed: false }
    }

    /// Returns the nominal MIPS capacity of this PE.
    pub fn mips(&self) -> f64 {
        self.mips
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Marks the PE as failed, its capacity is excluded from the host capacity.
    pub fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
    }
}

/// Builds a list of homogeneous PEs.
pub fn make_pes(count: u32, mips: f64) -> Vec<Pe> {
    (0..count).map(|id| Pe::new(id, mips)).collect()
}
