//! Abstract persistent-dataset interface (spec §6). The core treats the
//! dataset as an opaque key/value array store and never defines its wire
//! format; `memory::InMemoryDataset` is the reference implementation used
//! by tests and by the CLI when no production format is wired in.

pub mod memory;

use crate::error::CoreResult;

/// Opaque handle to a variable inside an open dataset.
pub type VarHandle = usize;

/// Either read or write access to a dataset instance (spec §6's
/// `open_read`/`open_write` produce the same shape of handle; which
/// operations are valid depends on how it was opened).
pub trait Dataset {
    fn lookup_var(&mut self, name: &str) -> CoreResult<VarHandle>;
    fn inquire_dim_length(&self, name: &str) -> CoreResult<usize>;

    /// Declares `name` with `dims` if it doesn't already exist, otherwise
    /// returns its existing handle. Lets a caller that only holds a
    /// `&mut dyn Dataset` target a variable it creates on demand, e.g. one
    /// named after a snapshot index it didn't know ahead of time.
    fn ensure_var(&mut self, name: &str, dims: &[usize]) -> CoreResult<VarHandle>;

    fn read_var_slab(&self, var: VarHandle, start: &[usize], count: &[usize], buffer: &mut [f64]) -> CoreResult<()>;
    fn write_var_slab(&mut self, var: VarHandle, start: &[usize], count: &[usize], buffer: &[f64]) -> CoreResult<()>;

    fn put_attr_double(&mut self, name: &str, value: f64) -> CoreResult<()>;
    fn put_attr_int(&mut self, name: &str, value: i64) -> CoreResult<()>;
    fn put_attr_text(&mut self, name: &str, value: &str) -> CoreResult<()>;

    fn get_attr_double(&self, name: &str) -> CoreResult<Option<f64>>;
    fn get_attr_int(&self, name: &str) -> CoreResult<Option<i64>>;
    fn get_attr_text(&self, name: &str) -> CoreResult<Option<String>>;

    fn close(&mut self) -> CoreResult<()>;
}

/// Attribute names reserved at the dataset level (spec §6).
pub mod reserved_attrs {
    pub const L1: &str = "L1";
    pub const L2: &str = "L2";
    pub const L3: &str = "L3";
    pub const CALC_MODE: &str = "calc_mode";
    pub const DELTA: &str = "delta";
    pub const TAU: &str = "tau";
    pub const T: &str = "t";
    pub const FINAL_TIME: &str = "final_time";
    pub const SNAPSHOT: &str = "snapshot";
    pub const TOTAL_SNAPSHOTS: &str = "total_snapshots";
    pub const TITLE: &str = "title";
}

/// Reserved coordinate variable names (spec §6).
pub mod reserved_vars {
    pub const N1: &str = "n1";
    pub const N2: &str = "n2";
    pub const N3: &str = "n3";
}

pub use memory::InMemoryDataset;
