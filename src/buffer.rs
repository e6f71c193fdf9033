use crate::bitpack::StorageValue;
use crate::error::Converter;
use crate::prototype::StorageKind;
use crate::{Error, ErrorKind, Result};

/// Typed read-only view of caller memory holding the values of one field.
pub enum SourceValues<'a> {
    I8(&'a [i8]),
    U8(&'a [u8]),
    I16(&'a [i16]),
    U16(&'a [u16]),
    I32(&'a [i32]),
    U32(&'a [u32]),
    I64(&'a [i64]),
    F32(&'a [f32]),
    F64(&'a [f64]),
}

impl SourceValues<'_> {
    pub fn len(&self) -> usize {
        match self {
            SourceValues::I8(s) => s.len(),
            SourceValues::U8(s) => s.len(),
            SourceValues::I16(s) => s.len(),
            SourceValues::U16(s) => s.len(),
            SourceValues::I32(s) => s.len(),
            SourceValues::U32(s) => s.len(),
            SourceValues::I64(s) => s.len(),
            SourceValues::F32(s) => s.len(),
            SourceValues::F64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_float(&self) -> bool {
        matches!(self, SourceValues::F32(_) | SourceValues::F64(_))
    }

    fn get(&self, index: usize) -> Result<CallerValue> {
        let value = match self {
            SourceValues::I8(s) => CallerValue::Int(*s.get(index).internal_err(OUT_OF_RANGE)? as i64),
            SourceValues::U8(s) => CallerValue::Int(*s.get(index).internal_err(OUT_OF_RANGE)? as i64),
            SourceValues::I16(s) => CallerValue::Int(*s.get(index).internal_err(OUT_OF_RANGE)? as i64),
            SourceValues::U16(s) => CallerValue::Int(*s.get(index).internal_err(OUT_OF_RANGE)? as i64),
            SourceValues::I32(s) => CallerValue::Int(*s.get(index).internal_err(OUT_OF_RANGE)? as i64),
            SourceValues::U32(s) => CallerValue::Int(*s.get(index).internal_err(OUT_OF_RANGE)? as i64),
            SourceValues::I64(s) => CallerValue::Int(*s.get(index).internal_err(OUT_OF_RANGE)?),
            SourceValues::F32(s) => CallerValue::F32(*s.get(index).internal_err(OUT_OF_RANGE)?),
            SourceValues::F64(s) => CallerValue::F64(*s.get(index).internal_err(OUT_OF_RANGE)?),
        };
        Ok(value)
    }
}

/// Caller-provided buffer with the source values of one prototype field.
///
/// The path addresses the field relative to the prototype root.
/// `do_conversion` allows conversions between integer and floating point
/// representations, `do_scaling` applies the scale and offset of scaled
/// integer fields at this boundary.
pub struct SourceBuffer<'a> {
    pub path: String,
    pub values: SourceValues<'a>,
    pub do_conversion: bool,
    pub do_scaling: bool,
}

impl<'a> SourceBuffer<'a> {
    /// Creates a buffer without conversion or scaling.
    pub fn new(path: &str, values: SourceValues<'a>) -> Self {
        Self {
            path: path.to_owned(),
            values,
            do_conversion: false,
            do_scaling: false,
        }
    }

    /// Number of records the buffer holds.
    pub fn capacity(&self) -> usize {
        self.values.len()
    }
}

/// Typed mutable view of caller memory receiving the values of one field.
pub enum DestValues<'a> {
    I8(&'a mut [i8]),
    U8(&'a mut [u8]),
    I16(&'a mut [i16]),
    U16(&'a mut [u16]),
    I32(&'a mut [i32]),
    U32(&'a mut [u32]),
    I64(&'a mut [i64]),
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
}

impl DestValues<'_> {
    pub fn len(&self) -> usize {
        match self {
            DestValues::I8(s) => s.len(),
            DestValues::U8(s) => s.len(),
            DestValues::I16(s) => s.len(),
            DestValues::U16(s) => s.len(),
            DestValues::I32(s) => s.len(),
            DestValues::U32(s) => s.len(),
            DestValues::I64(s) => s.len(),
            DestValues::F32(s) => s.len(),
            DestValues::F64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_float(&self) -> bool {
        matches!(self, DestValues::F32(_) | DestValues::F64(_))
    }

    /// Stores an integer, failing with the supplied kind when it does
    /// not fit the memory representation of the buffer.
    fn store_int(&mut self, index: usize, value: i64, kind: ErrorKind) -> Result<()> {
        const CTX: &str = "Value does not fit the destination buffer type";
        match self {
            DestValues::I8(s) => {
                s[index] = i8::try_from(value).kind_err(kind, CTX)?;
            }
            DestValues::U8(s) => {
                s[index] = u8::try_from(value).kind_err(kind, CTX)?;
            }
            DestValues::I16(s) => {
                s[index] = i16::try_from(value).kind_err(kind, CTX)?;
            }
            DestValues::U16(s) => {
                s[index] = u16::try_from(value).kind_err(kind, CTX)?;
            }
            DestValues::I32(s) => {
                s[index] = i32::try_from(value).kind_err(kind, CTX)?;
            }
            DestValues::U32(s) => {
                s[index] = u32::try_from(value).kind_err(kind, CTX)?;
            }
            DestValues::I64(s) => s[index] = value,
            _ => Error::internal("Integer store into float buffer")?,
        }
        Ok(())
    }

    fn store_float(&mut self, index: usize, value: f64) -> Result<()> {
        match self {
            DestValues::F32(s) => {
                if value.is_finite() && value.abs() > f32::MAX as f64 {
                    Error::failed(
                        ErrorKind::Real64TooLarge,
                        "Value is too large for a single precision buffer",
                    )?
                }
                s[index] = value as f32;
            }
            DestValues::F64(s) => s[index] = value,
            _ => Error::internal("Float store into integer buffer")?,
        }
        Ok(())
    }
}

/// Caller-provided buffer receiving the destination values of one field.
pub struct DestBuffer<'a> {
    pub path: String,
    pub values: DestValues<'a>,
    pub do_conversion: bool,
    pub do_scaling: bool,
}

impl<'a> DestBuffer<'a> {
    /// Creates a buffer without conversion or scaling.
    pub fn new(path: &str, values: DestValues<'a>) -> Self {
        Self {
            path: path.to_owned(),
            values,
            do_conversion: false,
            do_scaling: false,
        }
    }

    /// Number of records the buffer can take.
    pub fn capacity(&self) -> usize {
        self.values.len()
    }
}

const OUT_OF_RANGE: &str = "Record index is outside of the buffer";

/// Common view of source and destination buffers used for validation.
pub(crate) trait RecordBuffer {
    fn path(&self) -> &str;
    fn is_float(&self) -> bool;
    fn do_conversion(&self) -> bool;
    fn do_scaling(&self) -> bool;
    fn capacity(&self) -> usize;
}

impl RecordBuffer for SourceBuffer<'_> {
    fn path(&self) -> &str {
        &self.path
    }
    fn is_float(&self) -> bool {
        self.values.is_float()
    }
    fn do_conversion(&self) -> bool {
        self.do_conversion
    }
    fn do_scaling(&self) -> bool {
        self.do_scaling
    }
    fn capacity(&self) -> usize {
        self.values.len()
    }
}

impl RecordBuffer for DestBuffer<'_> {
    fn path(&self) -> &str {
        &self.path
    }
    fn is_float(&self) -> bool {
        self.values.is_float()
    }
    fn do_conversion(&self) -> bool {
        self.do_conversion
    }
    fn do_scaling(&self) -> bool {
        self.do_scaling
    }
    fn capacity(&self) -> usize {
        self.values.len()
    }
}

/// Shape of a buffer remembered at reader/writer creation so later
/// calls can be checked for compatibility.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BufferShape {
    pub path: String,
    pub is_float: bool,
    pub do_conversion: bool,
    pub do_scaling: bool,
    pub capacity: usize,
}

impl BufferShape {
    pub fn of(buffer: &impl RecordBuffer) -> Self {
        Self {
            path: buffer.path().to_owned(),
            is_float: buffer.is_float(),
            do_conversion: buffer.do_conversion(),
            do_scaling: buffer.do_scaling(),
            capacity: buffer.capacity(),
        }
    }
}

/// Validates a buffer set against the field list of a prototype and
/// returns for each field the index of its buffer.
pub(crate) fn validate_buffers<B: RecordBuffer>(
    fields: &[crate::prototype::Field],
    buffers: &[B],
) -> Result<Vec<usize>> {
    for (i, a) in buffers.iter().enumerate() {
        for b in &buffers[i + 1..] {
            if a.path() == b.path() {
                Error::failed(
                    ErrorKind::BufferDuplicatePathname,
                    format!("Duplicate buffer for path '{}'", a.path()),
                )?
            }
        }
    }
    for buffer in buffers {
        if !fields.iter().any(|f| f.path == buffer.path()) {
            Error::failed(
                ErrorKind::PathUndefined,
                format!("Buffer path '{}' does not match any prototype field", buffer.path()),
            )?
        }
    }
    if let Some(first) = buffers.first() {
        for buffer in &buffers[1..] {
            if buffer.capacity() != first.capacity() {
                Error::failed(
                    ErrorKind::BufferSizeMismatch,
                    "All buffers must have the same capacity",
                )?
            }
        }
    }
    let mut bindings = Vec::with_capacity(fields.len());
    for field in fields {
        let index = buffers
            .iter()
            .position(|b| b.path() == field.path)
            .kind_err(
                ErrorKind::NoBufferForElement,
                format!("No buffer supplied for prototype field '{}'", field.path),
            )?;
        let buffer = &buffers[index];
        check_compatibility(
            &field.kind,
            buffer.is_float(),
            buffer.do_conversion(),
            buffer.do_scaling(),
            &field.path,
        )?;
        bindings.push(index);
    }
    Ok(bindings)
}

/// Checks that a buffer set matches the shapes recorded at creation.
pub(crate) fn check_same_shapes<B: RecordBuffer>(
    expected: &[BufferShape],
    buffers: &[B],
) -> Result<()> {
    if expected.len() != buffers.len() {
        Error::failed(
            ErrorKind::BuffersNotCompatible,
            "Number of buffers differs from the set given at creation",
        )?
    }
    for (shape, buffer) in expected.iter().zip(buffers.iter()) {
        if BufferShape::of(buffer) != *shape {
            Error::failed(
                ErrorKind::BuffersNotCompatible,
                format!("Buffer for '{}' differs from the one given at creation", shape.path),
            )?
        }
    }
    Ok(())
}

enum CallerValue {
    Int(i64),
    F32(f32),
    F64(f64),
}

impl CallerValue {
    fn as_f64(&self) -> f64 {
        match self {
            CallerValue::Int(v) => *v as f64,
            CallerValue::F32(v) => *v as f64,
            CallerValue::F64(v) => *v,
        }
    }
}

/// Checks once per buffer whether its memory representation can be
/// transferred to or from the storage kind of the field.
/// Crossing between integer and float representations needs `do_conversion`,
/// scaled integer fields accept float representations when `do_scaling` is set.
pub(crate) fn check_compatibility(
    kind: &StorageKind,
    is_float: bool,
    do_conversion: bool,
    do_scaling: bool,
    path: &str,
) -> Result<()> {
    let compatible = match kind {
        StorageKind::Integer { .. } => !is_float || do_conversion,
        StorageKind::ScaledInteger { .. } => !is_float || do_scaling || do_conversion,
        StorageKind::Single { .. } | StorageKind::Double { .. } => is_float || do_conversion,
    };
    if !compatible {
        Error::failed(
            ErrorKind::ConversionRequired,
            format!("Buffer for '{path}' needs a conversion that was not requested"),
        )?
    }
    Ok(())
}

/// Converts one source value into the storage representation of its field,
/// applying scaling, bounds checks and representability checks.
pub(crate) fn to_storage(
    kind: &StorageKind,
    buffer: &SourceBuffer,
    index: usize,
) -> Result<StorageValue> {
    let value = buffer.values.get(index)?;
    Ok(match kind {
        StorageKind::Integer { min, max } => {
            let raw = match value {
                CallerValue::Int(v) => v,
                other => float_to_int(other.as_f64(), ErrorKind::ValueNotRepresentable)?,
            };
            check_int_bounds(raw, *min, *max)?;
            StorageValue::Int(raw)
        }
        StorageKind::ScaledInteger {
            min,
            max,
            scale,
            offset,
        } => {
            let raw = if buffer.do_scaling {
                let scaled = value.as_f64();
                float_to_int(
                    (scaled - offset) / scale,
                    ErrorKind::ScaledValueNotRepresentable,
                )?
            } else {
                match value {
                    CallerValue::Int(v) => v,
                    other => float_to_int(other.as_f64(), ErrorKind::ValueNotRepresentable)?,
                }
            };
            check_int_bounds(raw, *min, *max)?;
            StorageValue::Int(raw)
        }
        StorageKind::Single { min, max } => {
            let v = value.as_f64();
            check_float_bounds(v, *min, *max)?;
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                Error::failed(
                    ErrorKind::Real64TooLarge,
                    "Value is too large for a single precision field",
                )?
            }
            StorageValue::Single(v as f32)
        }
        StorageKind::Double { min, max } => {
            let v = value.as_f64();
            check_float_bounds(v, *min, *max)?;
            StorageValue::Double(v)
        }
    })
}

/// Converts one decoded storage value into the destination representation
/// of the caller buffer.
pub(crate) fn from_storage(
    kind: &StorageKind,
    value: StorageValue,
    buffer: &mut DestBuffer,
    index: usize,
) -> Result<()> {
    match kind {
        StorageKind::Integer { .. } => {
            let StorageValue::Int(raw) = value else {
                return Error::internal("Integer field produced a float value");
            };
            if buffer.values.is_float() {
                buffer.values.store_float(index, raw as f64)
            } else {
                buffer
                    .values
                    .store_int(index, raw, ErrorKind::ValueNotRepresentable)
            }
        }
        StorageKind::ScaledInteger { scale, offset, .. } => {
            let StorageValue::Int(raw) = value else {
                return Error::internal("Scaled integer field produced a float value");
            };
            if buffer.do_scaling {
                let scaled = raw as f64 * scale + offset;
                if buffer.values.is_float() {
                    buffer.values.store_float(index, scaled)
                } else {
                    let rounded =
                        float_to_int(scaled, ErrorKind::ScaledValueNotRepresentable)?;
                    buffer
                        .values
                        .store_int(index, rounded, ErrorKind::ScaledValueNotRepresentable)
                }
            } else if buffer.values.is_float() {
                buffer.values.store_float(index, raw as f64)
            } else {
                buffer
                    .values
                    .store_int(index, raw, ErrorKind::ValueNotRepresentable)
            }
        }
        StorageKind::Single { .. } => {
            let StorageValue::Single(v) = value else {
                return Error::internal("Single field produced a non-single value");
            };
            if buffer.values.is_float() {
                buffer.values.store_float(index, v as f64)
            } else {
                let rounded = float_to_int(v as f64, ErrorKind::ValueNotRepresentable)?;
                buffer
                    .values
                    .store_int(index, rounded, ErrorKind::ValueNotRepresentable)
            }
        }
        StorageKind::Double { .. } => {
            let StorageValue::Double(v) = value else {
                return Error::internal("Double field produced a non-double value");
            };
            if buffer.values.is_float() {
                buffer.values.store_float(index, v)
            } else {
                let rounded = float_to_int(v, ErrorKind::ValueNotRepresentable)?;
                buffer
                    .values
                    .store_int(index, rounded, ErrorKind::ValueNotRepresentable)
            }
        }
    }
}

fn check_int_bounds(value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        Error::failed(
            ErrorKind::ValueOutOfBounds,
            format!("Value {value} is outside of [{min}, {max}]"),
        )?
    }
    Ok(())
}

fn check_float_bounds(value: f64, min: f64, max: f64) -> Result<()> {
    if value < min || value > max {
        Error::failed(
            ErrorKind::ValueOutOfBounds,
            format!("Value {value} is outside of [{min}, {max}]"),
        )?
    }
    Ok(())
}

/// Rounds a float to the nearest integer,
/// failing with the supplied kind when the result cannot be an i64.
fn float_to_int(value: f64, kind: ErrorKind) -> Result<i64> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        Error::failed(
            kind,
            format!("Value {value} cannot be represented as integer"),
        )?
    }
    Ok(rounded as i64)
}
