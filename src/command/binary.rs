//! Number and binary conversions for `pack`, `unpack` and `convert`
//!
//! Values are packed as arrays of one C type. Native layouts follow the
//! platform's sizes and byte order; `standard_size` keeps the native byte
//! order with fixed sizes; the explicit orders use fixed sizes too.

use crate::common::{decode_hex, parse_int, ProxyError, Result};

/// C type of packed values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Byte,
    Char,
    UChar,
    Bool,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    SSize,
    Size,
    Float,
    Double,
    VoidPtr,
}

impl DataType {
    /// Every type name accepted on the command line
    pub const NAMES: [&'static str; 17] = [
        "byte",
        "char",
        "uchar",
        "_Bool",
        "short",
        "ushort",
        "int",
        "uint",
        "long",
        "ulong",
        "long_long",
        "ulong_long",
        "ssize_t",
        "size_t",
        "float",
        "double",
        "void_ptr",
    ];

    const ALL: [DataType; 17] = [
        DataType::Byte,
        DataType::Char,
        DataType::UChar,
        DataType::Bool,
        DataType::Short,
        DataType::UShort,
        DataType::Int,
        DataType::UInt,
        DataType::Long,
        DataType::ULong,
        DataType::LongLong,
        DataType::ULongLong,
        DataType::SSize,
        DataType::Size,
        DataType::Float,
        DataType::Double,
        DataType::VoidPtr,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|idx| Self::ALL[idx])
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[Self::ALL.iter().position(|t| *t == self).unwrap_or(0)]
    }

    /// Platform sized types only exist in the native layout
    fn native_only(self) -> bool {
        matches!(self, DataType::SSize | DataType::Size | DataType::VoidPtr)
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            DataType::Char | DataType::Short | DataType::Int | DataType::Long | DataType::LongLong | DataType::SSize
        )
    }

    fn size(self, order: ByteOrder) -> usize {
        match self {
            DataType::Byte | DataType::Char | DataType::UChar | DataType::Bool => 1,
            DataType::Short | DataType::UShort => 2,
            DataType::Int | DataType::UInt | DataType::Float => 4,
            DataType::Long | DataType::ULong if order == ByteOrder::Native => std::mem::size_of::<std::ffi::c_long>(),
            DataType::Long | DataType::ULong => 4,
            DataType::LongLong | DataType::ULongLong | DataType::Double => 8,
            DataType::SSize | DataType::Size | DataType::VoidPtr => std::mem::size_of::<usize>(),
        }
    }
}

/// Byte order and size convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Native,
    StandardSize,
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Every order name accepted on the command line
    pub const NAMES: [&'static str; 5] = ["native", "standard_size", "little_endian", "big_endian", "network"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "native" => Some(ByteOrder::Native),
            "standard_size" => Some(ByteOrder::StandardSize),
            "little_endian" => Some(ByteOrder::LittleEndian),
            "big_endian" | "network" => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }

    fn is_little(self) -> bool {
        match self {
            ByteOrder::Native | ByteOrder::StandardSize => cfg!(target_endian = "little"),
            ByteOrder::LittleEndian => true,
            ByteOrder::BigEndian => false,
        }
    }
}

fn reject(command: &str, argument: &str, reason: String) -> ProxyError {
    ProxyError::Argument {
        command: command.to_string(),
        argument: argument.to_string(),
        reason,
    }
}

fn check_layout(command: &str, data_type: DataType, order: ByteOrder) -> Result<()> {
    if data_type.native_only() && order != ByteOrder::Native {
        return Err(reject(
            command,
            "byteOrder",
            format!("type {} only exists in the native layout", data_type.name()),
        ));
    }
    Ok(())
}

fn ordered(mut bytes: Vec<u8>, order: ByteOrder) -> Vec<u8> {
    if !order.is_little() {
        bytes.reverse();
    }
    bytes
}

fn pack_one(data_type: DataType, order: ByteOrder, token: &str) -> std::result::Result<Vec<u8>, String> {
    let size = data_type.size(order);
    match data_type {
        DataType::Byte => match decode_hex(token) {
            Ok(bytes) if bytes.len() == 1 => Ok(bytes),
            _ => Err(format!("'{}' is not one hex byte", token)),
        },
        DataType::Float => token
            .parse::<f32>()
            .map(|value| ordered(value.to_le_bytes().to_vec(), order))
            .map_err(|_| format!("'{}' is not a number", token)),
        DataType::Double => token
            .parse::<f64>()
            .map(|value| ordered(value.to_le_bytes().to_vec(), order))
            .map_err(|_| format!("'{}' is not a number", token)),
        DataType::Bool => {
            let value = parse_int(token).map_err(|e| e.to_string())?;
            Ok(vec![u8::from(value != 0)])
        }
        _ => {
            let value = parse_int(token).map_err(|e| e.to_string())?;
            let bits = 8 * size as u32;
            let (min, max) = if data_type.is_signed() {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            } else {
                (0, (1i128 << bits) - 1)
            };
            if !(min..=max).contains(&i128::from(value)) {
                return Err(format!("'{}' does not fit in {} ({}..={})", token, data_type.name(), min, max));
            }
            Ok(ordered(value.to_le_bytes()[..size].to_vec(), order))
        }
    }
}

/// Pack whitespace separated values
pub fn pack(data_type: DataType, order: ByteOrder, values: &str) -> Result<Vec<u8>> {
    check_layout("pack", data_type, order)?;
    let mut packed = Vec::new();
    for token in values.split_whitespace() {
        let bytes = pack_one(data_type, order, token).map_err(|reason| reject("pack", "values", reason))?;
        packed.extend_from_slice(&bytes);
    }
    Ok(packed)
}

fn unpack_one(data_type: DataType, order: ByteOrder, chunk: &[u8]) -> String {
    let mut le = chunk.to_vec();
    if !order.is_little() {
        le.reverse();
    }

    match data_type {
        DataType::Byte => format!("0x{:02X}", le[0]),
        DataType::Bool => (le[0] != 0).to_string(),
        DataType::Float => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&le);
            f32::from_le_bytes(raw).to_string()
        }
        DataType::Double => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&le);
            f64::from_le_bytes(raw).to_string()
        }
        _ => {
            let mut raw = [0u8; 8];
            raw[..le.len()].copy_from_slice(&le);
            let unsigned = u64::from_le_bytes(raw);
            if data_type.is_signed() {
                // Sign-extend from the type's width
                let shift = 64 - 8 * le.len() as u32;
                (((unsigned << shift) as i64) >> shift).to_string()
            } else {
                unsigned.to_string()
            }
        }
    }
}

/// Unpack `data` as an array of `data_type`
pub fn unpack(data_type: DataType, order: ByteOrder, data: &[u8]) -> Result<Vec<String>> {
    check_layout("unpack", data_type, order)?;
    let size = data_type.size(order);
    if data.is_empty() || data.len() % size != 0 {
        return Err(reject(
            "unpack",
            "hex",
            format!(
                "expected a multiple of {} bytes, the size of {}, got {}",
                size,
                data_type.name(),
                data.len()
            ),
        ));
    }
    Ok(data.chunks(size).map(|chunk| unpack_one(data_type, order, chunk)).collect())
}

/// Parse a number for `convert`, in an explicit base or by its prefix
pub fn parse_number(number: &str, base: Option<&str>) -> Result<i64> {
    let radix = match base {
        None => return parse_int(number).map_err(|e| reject("convert", "number", e.to_string())),
        Some("hex") => 16,
        Some("oct") => 8,
        Some("bin") => 2,
        Some(_) => 10,
    };
    if number.starts_with('+') {
        return Err(reject("convert", "number", format!("'{}' is not a base {} number", number, radix)));
    }
    i64::from_str_radix(number, radix)
        .map_err(|_| reject("convert", "number", format!("'{}' is not a base {} number", number, radix)))
}

/// Minimal big-endian two's complement bytes of a number
fn minimal_bytes(number: i64) -> Vec<u8> {
    let bytes = number.to_be_bytes();
    let filler = if number < 0 { 0xff } else { 0x00 };
    let mut start = 0;
    while start < bytes.len() - 1 && bytes[start] == filler && (bytes[start + 1] & 0x80 == filler & 0x80) {
        start += 1;
    }
    bytes[start..].to_vec()
}

/// A number in every notation
pub fn convert(number: i64) -> Vec<String> {
    let sign = if number < 0 { "-" } else { "" };
    let magnitude = number.unsigned_abs();
    vec![
        format!("DEC: {}", number),
        format!("HEX: {}0x{:X}", sign, magnitude),
        format!("OCT: {}0o{:o}", sign, magnitude),
        format!("BIN: {}0b{:b}", sign, magnitude),
        format!("Bytes: {}", hex::encode_upper(minimal_bytes(number))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_resolve() {
        for name in DataType::NAMES {
            assert_eq!(DataType::from_name(name).map(DataType::name), Some(name));
        }
        assert_eq!(ByteOrder::from_name("network"), Some(ByteOrder::BigEndian));
        assert!(DataType::from_name("quad").is_none());
    }

    #[test]
    fn test_pack_ints() {
        let packed = pack(DataType::Int, ByteOrder::LittleEndian, "255 0377 0xFF").unwrap();
        assert_eq!(packed, vec![0xff, 0, 0, 0, 0xff, 0, 0, 0, 0xff, 0, 0, 0]);

        let packed = pack(DataType::Short, ByteOrder::BigEndian, "-2").unwrap();
        assert_eq!(packed, vec![0xff, 0xfe]);

        assert_eq!(pack(DataType::Long, ByteOrder::BigEndian, "1").unwrap(), vec![0, 0, 0, 1]);
        assert_eq!(pack(DataType::Byte, ByteOrder::Native, "41 42").unwrap(), b"AB");
        assert_eq!(pack(DataType::Bool, ByteOrder::Native, "0 7").unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_pack_rejects_out_of_range() {
        let err = pack(DataType::UChar, ByteOrder::Native, "256").unwrap_err();
        assert!(err.to_string().contains("256"));
        assert!(pack(DataType::Char, ByteOrder::Native, "-129").is_err());
        assert!(pack(DataType::UShort, ByteOrder::Native, "-1").is_err());
        assert!(pack(DataType::Byte, ByteOrder::Native, "4142").is_err());
        assert!(pack(DataType::Size, ByteOrder::LittleEndian, "1").is_err());
    }

    #[test]
    fn test_pack_floats() {
        assert_eq!(pack(DataType::Float, ByteOrder::BigEndian, "1.5").unwrap(), vec![0x3f, 0xc0, 0, 0]);
        assert_eq!(
            pack(DataType::Double, ByteOrder::LittleEndian, "-2").unwrap(),
            vec![0, 0, 0, 0, 0, 0, 0, 0xc0]
        );
        assert!(pack(DataType::Double, ByteOrder::Native, "pi").is_err());
    }

    #[test]
    fn test_unpack() {
        let values = unpack(DataType::Int, ByteOrder::LittleEndian, &[1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]).unwrap();
        assert_eq!(values, vec!["1".to_string(), "-2".to_string()]);

        let values = unpack(DataType::UShort, ByteOrder::BigEndian, &[0xff, 0xfe]).unwrap();
        assert_eq!(values, vec!["65534".to_string()]);

        let values = unpack(DataType::Float, ByteOrder::BigEndian, &[0x3f, 0xc0, 0, 0]).unwrap();
        assert_eq!(values, vec!["1.5".to_string()]);

        let err = unpack(DataType::Int, ByteOrder::Native, &[1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("multiple of 4"));
    }

    #[test]
    fn test_convert() {
        assert_eq!(
            convert(65),
            vec!["DEC: 65", "HEX: 0x41", "OCT: 0o101", "BIN: 0b1000001", "Bytes: 41"]
        );
        assert_eq!(convert(255)[4], "Bytes: 00FF");
        assert_eq!(convert(-1)[1], "HEX: -0x1");
        assert_eq!(convert(-1)[4], "Bytes: FF");
        assert_eq!(convert(0)[4], "Bytes: 00");
    }

    #[test]
    fn test_parse_number_with_base() {
        assert_eq!(parse_number("0x41", None).unwrap(), 65);
        assert_eq!(parse_number("41", Some("hex")).unwrap(), 65);
        assert_eq!(parse_number("101", Some("oct")).unwrap(), 65);
        assert_eq!(parse_number("1000001", Some("bin")).unwrap(), 65);
        assert_eq!(parse_number("65", Some("dec")).unwrap(), 65);
        assert!(parse_number("12", Some("bin")).is_err());
        assert!(parse_number("0x-5", None).is_err());
    }
}
