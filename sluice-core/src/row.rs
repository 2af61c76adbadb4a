//! Row values and their binary encoding.
//!
//! A row is encoded with bincode as a length-prefixed sequence of values, which
//! lets `decode_row_keys` stop once the requested key fields have been read.

use std::cmp::Ordering;
use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::instruction::{Order, OrderBy};

/// A single field in a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Opaque byte string, usually utf-8 text
    Bytes(Vec<u8>),
    /// Nested values, used for co-grouped buckets
    List(Vec<Value>),
}

/// An ordered sequence of values
pub type Row = Vec<Value>;

impl Value {
    // Cross-type ordering: Null < Bool < numbers < Bytes < List
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Bytes(_) => 3,
            Value::List(_) => 4,
        }
    }

    /// Returns the raw bytes of a `Bytes` value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the integer of an `Int` value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::List(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl<'a> From<&'a str> for Value {
    fn from(s: &'a str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(s.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(vs: Vec<Value>) -> Self {
        Value::List(vs)
    }
}

/// Serializes a row into one binary message.
pub fn encode_row(row: &[Value]) -> Result<Vec<u8>> {
    bincode::serialize(row).map_err(|e| Error::Encode(e.to_string()))
}

/// Decodes every field of an encoded row.
pub fn decode_row(data: &[u8]) -> Result<Row> {
    bincode::deserialize(data).map_err(|e| Error::decode(e, data))
}

/// Decodes only the fields at `indexes`, returned in the order requested.
/// Fields past the highest requested index are never decoded.
pub fn decode_row_keys(data: &[u8], indexes: &[usize]) -> Result<Vec<Value>> {
    let needed = match indexes.iter().max() {
        Some(max) => max + 1,
        None => return Ok(Vec::new()),
    };

    let mut cursor = data;
    let width: u64 = bincode::deserialize_from(&mut cursor).map_err(|e| Error::decode(e, data))?;
    if needed as u64 > width {
        return Err(Error::decode(
            format!("key index {} beyond row width {}", needed - 1, width),
            data,
        ));
    }

    let mut prefix = Vec::with_capacity(needed);
    for _ in 0..needed {
        let v: Value = bincode::deserialize_from(&mut cursor).map_err(|e| Error::decode(e, data))?;
        prefix.push(v);
    }

    Ok(indexes.iter().map(|&i| prefix[i].clone()).collect())
}

/// Total order over values.  Integers and floats compare numerically, so the
/// two may land in the same join group.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Int(x), Value::Float(y)) => compare_int_float(*x, *y),
        (Value::Float(x), Value::Int(y)) => compare_int_float(*y, *x).reverse(),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::List(x), Value::List(y)) => compare_all(x, y),
        _ => a.rank().cmp(&b.rank()),
    }
}

fn compare_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        // total_cmp puts -NaN below every number and +NaN above
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    match (i as f64).partial_cmp(&f) {
        Some(Ordering::Equal) if f == 0.0 && f.is_sign_negative() => Ordering::Greater,
        Some(Ordering::Equal) => (i as i128).cmp(&(f as i128)),
        Some(o) => o,
        None => Ordering::Less,
    }
}

/// Lexicographic comparison of two value sequences.
pub fn compare_all(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match compare(x, y) {
            Ordering::Equal => continue,
            o => return o,
        }
    }
    a.len().cmp(&b.len())
}

/// Compares rows by a list of order-bys.  Constructed per operator; holds no
/// shared state.
#[derive(Debug, Clone)]
pub struct Comparator {
    orders: Vec<Order>,
    indexes: Vec<usize>,
}

impl Comparator {
    /// Creates a comparator from order-bys, in priority order.
    pub fn new(order_bys: &[OrderBy]) -> Self {
        Comparator {
            orders: order_bys.iter().map(|o| o.order).collect(),
            indexes: order_bys.iter().map(|o| o.index).collect(),
        }
    }

    /// Creates a comparator sorting ascending on every index.
    pub fn ascending(indexes: &[usize]) -> Self {
        Comparator {
            orders: vec![Order::Ascending; indexes.len()],
            indexes: indexes.to_vec(),
        }
    }

    /// Field indexes making up the key
    pub fn indexes(&self) -> &[usize] {
        &self.indexes
    }

    /// Decodes the key fields of an encoded row.
    pub fn decode_keys(&self, data: &[u8]) -> Result<Vec<Value>> {
        decode_row_keys(data, &self.indexes)
    }

    /// Compares two decoded keys field by field, honoring each direction.
    pub fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((x, y), order) in a.iter().zip(b.iter()).zip(self.orders.iter()) {
            let o = match order {
                Order::Ascending => compare(x, y),
                Order::Descending => compare(y, x),
            };
            if o != Ordering::Equal {
                return o;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod test_row {
    use super::*;

    fn sample() -> Row {
        vec![
            Value::Int(-4),
            "hello".into(),
            Value::Float(2.5),
            Value::Null,
            Value::Bool(true),
            Value::List(vec![1.into(), "x".into()]),
        ]
    }

    #[test]
    fn test_round_trip() {
        let row = sample();
        let data = encode_row(&row).unwrap();
        assert_eq!(decode_row(&data).unwrap(), row);

        let empty: Row = Vec::new();
        assert_eq!(decode_row(&encode_row(&empty).unwrap()).unwrap(), empty);
    }

    #[test]
    fn test_decode_keys_matches_full_decode() {
        let row = sample();
        let data = encode_row(&row).unwrap();
        for idx in vec![vec![0], vec![1, 0], vec![5, 2, 2], vec![], vec![3, 4]] {
            let keys = decode_row_keys(&data, &idx).unwrap();
            let expected: Vec<_> = idx.iter().map(|&i| row[i].clone()).collect();
            assert_eq!(keys, expected);
        }
    }

    #[test]
    fn test_decode_keys_beyond_width() {
        let data = encode_row(&[1.into()]).unwrap();
        assert!(decode_row_keys(&data, &[1]).is_err());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_row(&[1, 2, 3]).is_err());
        assert!(decode_row_keys(&[0xff; 3], &[0]).is_err());
    }

    #[test]
    fn test_compare_across_types() {
        assert_eq!(compare(&Value::Null, &Value::Bool(false)), Ordering::Less);
        assert_eq!(compare(&Value::Int(3), &"a".into()), Ordering::Less);
        assert_eq!(compare(&Value::Int(2), &Value::Float(2.5)), Ordering::Less);
        assert_eq!(compare(&Value::Float(3.0), &Value::Int(3)), Ordering::Equal);
        assert_eq!(compare(&"b".into(), &"ab".into()), Ordering::Greater);
        assert_eq!(
            compare(&Value::Int(i64::MAX), &Value::Float(i64::MAX as f64)),
            Ordering::Less
        );
        assert_eq!(compare(&Value::Int(0), &Value::Float(-0.0)), Ordering::Greater);
        assert_eq!(compare(&Value::Int(7), &Value::Float(f64::NAN)), Ordering::Less);
    }

    #[test]
    fn test_comparator_directions() {
        let cmp = Comparator::new(&[OrderBy::asc(0), OrderBy::desc(1)]);
        let a = vec![Value::Int(1), Value::Int(5)];
        let b = vec![Value::Int(1), Value::Int(3)];
        let c = vec![Value::Int(0), Value::Int(9)];
        assert_eq!(cmp.compare_keys(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare_keys(&c, &a), Ordering::Less);
        assert_eq!(cmp.compare_keys(&a, &a), Ordering::Equal);
    }
}
