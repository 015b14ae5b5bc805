use nom::{
    bytes::complete::{tag, take},
    combinator::{map, map_res},
    error::{Error, ErrorKind},
    multi::count,
    number::complete::{le_i32, le_u16, le_u8},
    Err as BaseErr,
};

use crate::attribute_info::types::{NativeTarget, NativeTypeAttribute};

// Using a type alias here evades a Clippy warning about complex types.
type Err<E> = BaseErr<Error<E>>;

/// Compressed unsigned integer (ECMA-335 II.23.2).
pub fn compressed_u32_parser(input: &[u8]) -> Result<(&[u8], u32), Err<&[u8]>> {
    let (input, first) = le_u8(input)?;
    if first & 0x80 == 0 {
        Ok((input, first as u32))
    } else if first & 0xc0 == 0x80 {
        let (input, second) = le_u8(input)?;
        Ok((input, (((first & 0x3f) as u32) << 8) | second as u32))
    } else if first & 0xe0 == 0xc0 {
        let (input, rest) = take(3usize)(input)?;
        Ok((
            input,
            (((first & 0x1f) as u32) << 24)
                | ((rest[0] as u32) << 16)
                | ((rest[1] as u32) << 8)
                | rest[2] as u32,
        ))
    } else {
        Result::Err(Err::Error(error_position!(input, ErrorKind::LengthValue)))
    }
}

/// SerString: compressed length then UTF-8 bytes. A single `0xFF` byte encodes null,
/// which is read as the empty string.
pub fn ser_string_parser(input: &[u8]) -> Result<(&[u8], String), Err<&[u8]>> {
    if input.first() == Some(&0xff) {
        return Ok((&input[1..], String::new()));
    }
    let (input, length) = compressed_u32_parser(input)?;
    map_res(take(length as usize), |bytes: &[u8]| {
        std::str::from_utf8(bytes).map(str::to_owned)
    })(input)
}

fn string_array_parser(input: &[u8]) -> Result<(&[u8], Vec<String>), Err<&[u8]>> {
    let (input, length) = le_i32(input)?;
    if length < 0 {
        return Ok((input, Vec::new()));
    }
    count(ser_string_parser, length as usize)(input)
}

/// Value blob of `NativeTypeAttribute(NativeTarget target, string nativeType, params string[] headers)`.
pub fn native_type_parser(input: &[u8]) -> Result<(&[u8], NativeTypeAttribute), Err<&[u8]>> {
    let (input, _) = tag(&[0x01u8, 0x00][..])(input)?;
    let (input, target) = map(le_i32, NativeTarget::from)(input)?;
    let (input, native_type) = ser_string_parser(input)?;
    let (input, headers) = string_array_parser(input)?;
    let (input, _named_args) = le_u16(input)?;
    Ok((
        input,
        NativeTypeAttribute {
            target,
            native_type,
            headers,
        },
    ))
}
