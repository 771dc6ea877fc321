//! Attribute element values
//!
//! An `AttrElemVal` holds one attribute's data. Registries keep one
//! prototype per element-type name and clone fresh, zero-valued instances
//! from it on demand.

use crate::error::{HostError, Result};
use cellhost_types::AttrSpec;
use std::any::Any;
use std::fmt::Debug;

/// Polymorphic attribute value
pub trait AttrElemVal: Send + Sync + Debug {
    /// Element-type name this value is registered under (e.g. `"text"`)
    fn elem_type(&self) -> &str;

    /// A fresh, zero-valued instance of the same element type
    fn new_instance(&self) -> Box<dyn AttrElemVal>;

    /// Appends this value's encoding to `buf`
    fn marshal_to(&self, buf: &mut Vec<u8>);

    /// Replaces this value with the one encoded in `data`
    fn unmarshal(&mut self, data: &[u8]) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// UTF-8 text value, element type `text`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextVal(pub String);

impl AttrElemVal for TextVal {
    fn elem_type(&self) -> &str {
        "text"
    }

    fn new_instance(&self) -> Box<dyn AttrElemVal> {
        Box::new(TextVal::default())
    }

    fn marshal_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.0.as_bytes());
    }

    fn unmarshal(&mut self, data: &[u8]) -> Result<()> {
        self.0 = std::str::from_utf8(data)
            .map_err(|e| HostError::InvalidRequest(format!("text value is not UTF-8: {e}")))?
            .to_string();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Raw octets, element type `bytes`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BytesVal(pub Vec<u8>);

impl AttrElemVal for BytesVal {
    fn elem_type(&self) -> &str {
        "bytes"
    }

    fn new_instance(&self) -> Box<dyn AttrElemVal> {
        Box::new(BytesVal::default())
    }

    fn marshal_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0);
    }

    fn unmarshal(&mut self, data: &[u8]) -> Result<()> {
        self.0 = data.to_vec();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Signed integer, element type `i64`, little-endian on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct I64Val(pub i64);

impl AttrElemVal for I64Val {
    fn elem_type(&self) -> &str {
        "i64"
    }

    fn new_instance(&self) -> Box<dyn AttrElemVal> {
        Box::new(I64Val::default())
    }

    fn marshal_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_le_bytes());
    }

    fn unmarshal(&mut self, data: &[u8]) -> Result<()> {
        let raw: [u8; 8] = data
            .try_into()
            .map_err(|_| HostError::InvalidRequest(format!("i64 value needs 8 bytes, got {}", data.len())))?;
        self.0 = i64::from_le_bytes(raw);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Checks a prototype's element-type name and returns it normalised
///
/// Only a bare type name (no series, no attribute name) can be matched by
/// an attr def's element type.
pub(crate) fn validate_elem_type(name: &str) -> Result<String> {
    let spec = AttrSpec::parse(name)?;
    if spec.series.is_some() || spec.name.is_some() {
        return Err(HostError::InvalidRequest(format!(
            "element type {name:?} must be a bare type name"
        )));
    }
    Ok(spec.elem_type)
}

/// Prototypes every host registers at startup
pub fn builtin_prototypes() -> Vec<Box<dyn AttrElemVal>> {
    vec![
        Box::new(TextVal::default()),
        Box::new(BytesVal::default()),
        Box::new(I64Val::default()),
    ]
}
