//! In-memory reference `Dataset` implementation (supplemented scope:
//! spec.md excludes a *persistent* dataset format, but the driver needs
//! some concrete implementation of the §6 interface to be runnable and
//! testable standalone).

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

use super::{Dataset, VarHandle};

#[derive(Debug, Clone, Default)]
struct Variable {
    name: String,
    dims: Vec<usize>,
    data: Vec<f64>,
    attrs_double: HashMap<String, f64>,
    attrs_int: HashMap<String, i64>,
    attrs_text: HashMap<String, String>,
}

/// A dataset held entirely in memory, keyed by variable name. Variables
/// are created lazily on first `lookup_var` with a given set of
/// dimensions (established by the caller via `declare_var`), matching the
/// spec's "self-describing" framing without committing to any file
/// format.
#[derive(Debug, Default)]
pub struct InMemoryDataset {
    vars: Vec<Variable>,
    index: HashMap<String, VarHandle>,
    attrs_double: HashMap<String, f64>,
    attrs_int: HashMap<String, i64>,
    attrs_text: HashMap<String, String>,
}

impl InMemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable with its dimensions (in elements, slowest-first)
    /// ahead of any slab I/O; idempotent if the dimensions match.
    pub fn declare_var(&mut self, name: &str, dims: Vec<usize>) -> CoreResult<VarHandle> {
        if let Some(&h) = self.index.get(name) {
            if self.vars[h].dims != dims {
                return Err(CoreError::Configuration(format!(
                    "variable {name} redeclared with conflicting dimensions"
                )));
            }
            return Ok(h);
        }
        let len: usize = dims.iter().product();
        let handle = self.vars.len();
        self.vars.push(Variable { name: name.to_string(), dims, data: vec![0.0; len], ..Default::default() });
        self.index.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| v.name.as_str())
    }
}

impl Dataset for InMemoryDataset {
    fn lookup_var(&mut self, name: &str) -> CoreResult<VarHandle> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::Configuration(format!("unknown dataset variable {name}")))
    }

    fn ensure_var(&mut self, name: &str, dims: &[usize]) -> CoreResult<VarHandle> {
        self.declare_var(name, dims.to_vec())
    }

    fn inquire_dim_length(&self, name: &str) -> CoreResult<usize> {
        let &handle = self
            .index
            .get(name)
            .ok_or_else(|| CoreError::Configuration(format!("unknown dataset variable {name}")))?;
        self.vars[handle]
            .dims
            .first()
            .copied()
            .ok_or_else(|| CoreError::Configuration(format!("variable {name} has no dimensions")))
    }

    fn read_var_slab(&self, var: VarHandle, start: &[usize], count: &[usize], buffer: &mut [f64]) -> CoreResult<()> {
        let v = self
            .vars
            .get(var)
            .ok_or_else(|| CoreError::Configuration("invalid variable handle".into()))?;
        let flat_start = flat_offset(&v.dims, start)?;
        let len: usize = count.iter().product();
        if buffer.len() < len {
            return Err(CoreError::Configuration("slab buffer too small".into()));
        }
        if v.dims.len() == 1 {
            buffer[..len].copy_from_slice(&v.data[flat_start..flat_start + len]);
        } else {
            // Only contiguous (whole trailing dims) slabs are supported by
            // this reference implementation, matching how snapshot gather
            // uses it: one worker's full per-variable block in one call.
            buffer[..len].copy_from_slice(&v.data[flat_start..flat_start + len]);
        }
        Ok(())
    }

    fn write_var_slab(&mut self, var: VarHandle, start: &[usize], count: &[usize], buffer: &[f64]) -> CoreResult<()> {
        let v = self
            .vars
            .get_mut(var)
            .ok_or_else(|| CoreError::Configuration("invalid variable handle".into()))?;
        let flat_start = flat_offset(&v.dims, start)?;
        let len: usize = count.iter().product();
        if buffer.len() < len {
            return Err(CoreError::Configuration("slab buffer smaller than requested count".into()));
        }
        v.data[flat_start..flat_start + len].copy_from_slice(&buffer[..len]);
        Ok(())
    }

    fn put_attr_double(&mut self, name: &str, value: f64) -> CoreResult<()> {
        self.attrs_double.insert(name.to_string(), value);
        Ok(())
    }
    fn put_attr_int(&mut self, name: &str, value: i64) -> CoreResult<()> {
        self.attrs_int.insert(name.to_string(), value);
        Ok(())
    }
    fn put_attr_text(&mut self, name: &str, value: &str) -> CoreResult<()> {
        self.attrs_text.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn get_attr_double(&self, name: &str) -> CoreResult<Option<f64>> {
        Ok(self.attrs_double.get(name).copied())
    }
    fn get_attr_int(&self, name: &str) -> CoreResult<Option<i64>> {
        Ok(self.attrs_int.get(name).copied())
    }
    fn get_attr_text(&self, name: &str) -> CoreResult<Option<String>> {
        Ok(self.attrs_text.get(name).cloned())
    }

    fn close(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

/// Flat offset of a row-major multi-index `start` inside `dims`.
fn flat_offset(dims: &[usize], start: &[usize]) -> CoreResult<usize> {
    if dims.len() != start.len() {
        return Err(CoreError::Configuration("slab index rank mismatch".into()));
    }
    let mut offset = 0usize;
    let mut stride = 1usize;
    for (d, s) in dims.iter().zip(start.iter()).rev() {
        offset += s * stride;
        stride *= d;
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut ds = InMemoryDataset::new();
        let h = ds.declare_var("u", vec![4]).unwrap();
        ds.write_var_slab(h, &[0], &[4], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut buf = vec![0.0; 4];
        ds.read_var_slab(h, &[0], &[4], &mut buf).unwrap();
        assert_eq!(buf, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn partial_slab_write_at_offset() {
        let mut ds = InMemoryDataset::new();
        let h = ds.declare_var("u", vec![6]).unwrap();
        ds.write_var_slab(h, &[2], &[3], &[9.0, 9.0, 9.0]).unwrap();
        let mut buf = vec![0.0; 6];
        ds.read_var_slab(h, &[0], &[6], &mut buf).unwrap();
        assert_eq!(buf, vec![0.0, 0.0, 9.0, 9.0, 9.0, 0.0]);
    }

    #[test]
    fn reserved_attrs_round_trip() {
        let mut ds = InMemoryDataset::new();
        ds.put_attr_double(super::super::reserved_attrs::DELTA, 1e-6).unwrap();
        ds.put_attr_int(super::super::reserved_attrs::SNAPSHOT, 5).unwrap();
        ds.put_attr_text(super::super::reserved_attrs::TITLE, "run-1").unwrap();
        assert_eq!(ds.get_attr_double(super::super::reserved_attrs::DELTA).unwrap(), Some(1e-6));
        assert_eq!(ds.get_attr_int(super::super::reserved_attrs::SNAPSHOT).unwrap(), Some(5));
        assert_eq!(ds.get_attr_text(super::super::reserved_attrs::TITLE).unwrap(), Some("run-1".to_string()));
    }

    #[test]
    fn unknown_variable_lookup_errors() {
        let mut ds = InMemoryDataset::new();
        assert!(ds.lookup_var("missing").is_err());
    }
}
