//! Command bytes and payload construction.
//!
//! Every request payload starts with a single command byte. Variable
//! read/write payloads additionally carry per-size-class counts, addresses
//! and (for writes) values, built here by [`VariableSet`].
//!
//! # Command bytes
//!
//! | Command | Byte |
//! |---------|------|
//! | ping | 0x10 |
//! | status | 0x11 |
//! | read code | 0x21 |
//! | write code | 0x22 |
//! | write data | 0x32 |
//! | read variables | 0x33 |
//! | write variables | 0x34 |
//! | PLC start | 0x40 |
//! | PLC stop | 0x41 |
//! | PLC pause | 0x45 |

use crate::error::{CybroError, Result};
use crate::variable::{Registry, Value, Variable};

/// Round-trip latency probe.
pub const CMD_PING: u8 = 0x10;
/// Run-state query.
pub const CMD_STATUS: u8 = 0x11;
/// Segmented code-memory read.
pub const CMD_READ_CODE: u8 = 0x21;
/// Code-memory write (declared for wire completeness; unused by this driver).
pub const CMD_WRITE_CODE: u8 = 0x22;
/// Raw data-memory write (declared for wire completeness; unused by this driver).
pub const CMD_WRITE_DATA: u8 = 0x32;
/// Typed variable read.
pub const CMD_READ: u8 = 0x33;
/// Typed variable write.
pub const CMD_WRITE: u8 = 0x34;
/// Switch the PLC to run mode.
pub const CMD_PLC_START: u8 = 0x40;
/// Stop the PLC.
pub const CMD_PLC_STOP: u8 = 0x41;
/// Pause the PLC.
pub const CMD_PLC_PAUSE: u8 = 0x45;

/// Code memory is addressable only in blocks of this many bytes.
pub const SEGMENT_SIZE: usize = 256;

/// Builds the payload of a single code-segment read (command 0x21).
pub(crate) fn read_code_request(segment: u16, segment_size: u16) -> [u8; 5] {
    let seg = segment.to_le_bytes();
    let size = segment_size.to_le_bytes();
    [CMD_READ_CODE, seg[0], seg[1], size[0], size[1]]
}

/// Computes the first segment index and block count covering
/// `[address, address + size)`.
pub(crate) fn segment_span(address: u32, size: usize) -> (u32, u32) {
    let first = address / SEGMENT_SIZE as u32;
    let last = (u64::from(address) + size as u64) / SEGMENT_SIZE as u64;
    (first, (last as u32 - first) + 1)
}

/// An ordered set of registry variables prepared for one read or write
/// exchange.
///
/// Construction filters out names absent from the registry (unknown
/// variables are silently ignored, not errors), stable-sorts the remainder
/// ascending by declared size, and counts each size class. The sorted order
/// is the wire order for addresses and values in both directions.
#[derive(Debug, Clone)]
pub(crate) struct VariableSet {
    vars: Vec<Variable>,
    count_byte: u16,
    count_short: u16,
    count_long: u16,
}

impl VariableSet {
    /// Resolves `names` against the registry for a read exchange.
    pub fn resolve(names: &[&str], registry: &Registry) -> Self {
        let vars = names
            .iter()
            .filter_map(|name| registry.get(name).cloned())
            .collect();
        Self::from_vars(vars)
    }

    /// Resolves `(name, value)` pairs against the registry for a write
    /// exchange. Unknown names are dropped; a value whose type does not
    /// match the registry entry is a caller error.
    ///
    /// # Errors
    ///
    /// Returns `CybroError::InvalidParameter` on a value/type mismatch.
    pub fn resolve_with_values(values: &[(&str, Value)], registry: &Registry) -> Result<Self> {
        let mut vars = Vec::with_capacity(values.len());
        for (name, value) in values {
            let Some(entry) = registry.get(name) else {
                continue;
            };
            if value.kind() != entry.var_type {
                return Err(CybroError::invalid_parameter(
                    *name,
                    format!(
                        "value type {} does not match declared type {}",
                        value.kind(),
                        entry.var_type
                    ),
                ));
            }
            let mut var = entry.clone();
            var.value = Some(*value);
            vars.push(var);
        }
        Ok(Self::from_vars(vars))
    }

    fn from_vars(mut vars: Vec<Variable>) -> Self {
        // Stable sort: relative order within a size class is preserved.
        vars.sort_by_key(|v| v.size);

        let mut count_byte = 0;
        let mut count_short = 0;
        let mut count_long = 0;
        for var in &vars {
            match var.size {
                1 => count_byte += 1,
                2 => count_short += 1,
                4 => count_long += 1,
                _ => {}
            }
        }

        Self {
            vars,
            count_byte,
            count_short,
            count_long,
        }
    }

    /// Whether no requested name resolved.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The resolved variables in wire order.
    pub fn vars(&self) -> &[Variable] {
        &self.vars
    }

    /// Consumes the set, yielding the variables in wire order.
    pub fn into_vars(self) -> Vec<Variable> {
        self.vars
    }

    /// Total bytes occupied by the value section of a read response or a
    /// write request: the running sum of declared sizes.
    fn value_bytes(&self) -> usize {
        self.vars.iter().map(|v| v.size as usize).sum()
    }

    fn write_counts(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.count_byte.to_le_bytes());
        buf[2..4].copy_from_slice(&self.count_short.to_le_bytes());
        buf[4..6].copy_from_slice(&self.count_long.to_le_bytes());
    }

    /// Builds the payload of a variable read (command 0x33):
    /// `[cmd][countByte][countShort][countLong]` followed by each address.
    pub fn read_request(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 7 + 2 * self.vars.len()];
        buf[0] = CMD_READ;
        self.write_counts(&mut buf[1..7]);

        let mut offset = 7;
        for var in &self.vars {
            buf[offset..offset + 2].copy_from_slice(&var.address.to_le_bytes());
            offset += 2;
        }
        buf
    }

    /// Builds the payload of a variable write (command 0x34): the read
    /// header and addresses, followed by each value at the running offset
    /// of declared sizes.
    ///
    /// The buffer is sized `7 + 2N + Σ declared sizes`, which is what the
    /// value section actually occupies.
    ///
    /// # Errors
    ///
    /// Returns `CybroError::InvalidParameter` if a resolved variable has no
    /// value to send.
    pub fn write_request(&self) -> Result<Vec<u8>> {
        let total = 7 + 2 * self.vars.len() + self.value_bytes();
        let mut buf = vec![0u8; total];
        buf[0] = CMD_WRITE;
        self.write_counts(&mut buf[1..7]);

        let mut offset = 7;
        for var in &self.vars {
            buf[offset..offset + 2].copy_from_slice(&var.address.to_le_bytes());
            offset += 2;
        }

        for var in &self.vars {
            let value = var.value.ok_or_else(|| {
                CybroError::invalid_parameter(var.name.clone(), "no value to write")
            })?;
            let mut scratch = [0u8; 4];
            value.encode_into(&mut scratch);
            let len = value.kind().width().min(buf.len() - offset);
            buf[offset..offset + len].copy_from_slice(&scratch[..len]);
            offset += var.size as usize;
        }
        Ok(buf)
    }

    /// Decodes a read-response payload into the variables, in wire order.
    /// Each value is decoded by its declared type and the running offset
    /// advances by the declared size.
    ///
    /// # Errors
    ///
    /// Returns `CybroError::InvalidResponse` if the payload is too short
    /// for the expected values.
    pub fn decode_values(&mut self, payload: &[u8]) -> Result<()> {
        let mut offset = 0;
        for var in &mut self.vars {
            var.value = Some(Value::decode(var.var_type, &payload[offset.min(payload.len())..])?);
            offset += var.size as usize;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VarType;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.insert(Variable::new("a", 0x0100, VarType::Bit, 1));
        registry.insert(Variable::new("b", 0x0200, VarType::Real, 4));
        registry.insert(Variable::new("c", 0x0300, VarType::Int, 2));
        registry
    }

    #[test]
    fn test_resolve_sorts_by_size_and_counts() {
        let set = VariableSet::resolve(&["a", "b", "c"], &registry());

        let order: Vec<&str> = set.vars().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
        assert_eq!(set.count_byte, 1);
        assert_eq!(set.count_short, 1);
        assert_eq!(set.count_long, 1);
    }

    #[test]
    fn test_resolve_drops_unknown_names() {
        let set = VariableSet::resolve(&["a", "nope", "c"], &registry());
        assert_eq!(set.vars().len(), 2);

        let none = VariableSet::resolve(&["nope"], &registry());
        assert!(none.is_empty());
    }

    #[test]
    fn test_resolve_is_stable_within_size_class() {
        let mut registry = Registry::new();
        registry.insert(Variable::new("x", 1, VarType::Int, 2));
        registry.insert(Variable::new("y", 2, VarType::Int, 2));
        registry.insert(Variable::new("z", 3, VarType::Int, 2));

        let set = VariableSet::resolve(&["z", "x", "y"], &registry);
        let order: Vec<&str> = set.vars().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(order, vec!["z", "x", "y"]);
    }

    #[test]
    fn test_read_request_layout() {
        let set = VariableSet::resolve(&["a", "b", "c"], &registry());
        let payload = set.read_request();

        assert_eq!(payload.len(), 7 + 3 * 2);
        assert_eq!(payload[0], CMD_READ);
        assert_eq!(&payload[1..7], &[1, 0, 1, 0, 1, 0]);
        // Addresses in sorted order: a (0x0100), c (0x0300), b (0x0200)
        assert_eq!(&payload[7..], &[0x00, 0x01, 0x00, 0x03, 0x00, 0x02]);
    }

    #[test]
    fn test_decode_values_advances_by_declared_size() {
        let mut set = VariableSet::resolve(&["a", "b", "c"], &registry());

        // Wire order a (bit, 1 byte), c (int, 2 bytes), b (real, 4 bytes)
        let mut payload = vec![0x01, 0xFE, 0xFF];
        payload.extend_from_slice(&1.5f32.to_le_bytes());
        set.decode_values(&payload).unwrap();

        let values: Vec<Value> = set.vars().iter().map(|v| v.value.unwrap()).collect();
        assert_eq!(values, vec![Value::Bit(1), Value::Int(-2), Value::Real(1.5)]);
    }

    #[test]
    fn test_decode_values_short_payload() {
        let mut set = VariableSet::resolve(&["a", "b", "c"], &registry());
        assert!(set.decode_values(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_write_request_sizes_long_and_real() {
        let mut registry = Registry::new();
        registry.insert(Variable::new("l", 0x0010, VarType::Long, 4));
        registry.insert(Variable::new("r", 0x0020, VarType::Real, 4));

        let set = VariableSet::resolve_with_values(
            &[("l", Value::Long(-5)), ("r", Value::Real(2.5))],
            &registry,
        )
        .unwrap();
        let payload = set.write_request().unwrap();

        // 7 header + 2 addresses * 2 + 4 + 4 value bytes
        assert_eq!(payload.len(), 19);
        assert_eq!(payload[0], CMD_WRITE);
        assert_eq!(&payload[1..7], &[0, 0, 0, 0, 2, 0]);
        assert_eq!(&payload[7..11], &[0x10, 0x00, 0x20, 0x00]);
        assert_eq!(&payload[11..15], &(-5i32).to_le_bytes());
        assert_eq!(&payload[15..19], &2.5f32.to_le_bytes());
    }

    #[test]
    fn test_write_request_mixed_sizes() {
        let set = VariableSet::resolve_with_values(
            &[
                ("b", Value::Real(1.0)),
                ("a", Value::Bit(1)),
                ("c", Value::Int(7)),
            ],
            &registry(),
        )
        .unwrap();
        let payload = set.write_request().unwrap();

        // 7 + 3 addresses * 2 + (1 + 2 + 4) value bytes
        assert_eq!(payload.len(), 20);
        assert_eq!(payload[13], 0x01); // bit value
        assert_eq!(&payload[14..16], &7i16.to_le_bytes());
        assert_eq!(&payload[16..20], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_write_rejects_type_mismatch() {
        let result =
            VariableSet::resolve_with_values(&[("a", Value::Real(1.0))], &registry());
        assert!(matches!(result, Err(CybroError::InvalidParameter { .. })));
    }

    #[test]
    fn test_segment_span() {
        assert_eq!(segment_span(300, 10), (1, 1));
        assert_eq!(segment_span(10, 10), (0, 1));
        assert_eq!(segment_span(250, 10), (0, 2));
        assert_eq!(segment_span(300, 220), (1, 2));
        assert_eq!(segment_span(0x0002_0040, 6), (512, 1));
    }

    #[test]
    fn test_read_code_request_layout() {
        assert_eq!(
            read_code_request(0x0102, 256),
            [CMD_READ_CODE, 0x02, 0x01, 0x00, 0x01]
        );
    }
}
