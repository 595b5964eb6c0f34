//! Decoder for the IIO scan-element type descriptor grammar, e.g.
//! `le:s16/32>>0`, as found in `scan_elements/<channel>_type`.

use std::path::Path;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::digit1;
use nom::combinator::{map, map_res, opt, recognize};
use nom::sequence::{pair, preceded, separated_pair};
use nom::IResult;

use crate::error::CoreError;

/// Byte order of the storage word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Decoded form of a channel's `_type` sysfs attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    pub endian: Endian,
    pub signed: bool,
    /// Storage size of the channel, in bytes.
    pub size: usize,
    pub realbits: u32,
    pub shift: i32,
}

fn endian(input: &str) -> IResult<&str, Endian> {
    alt((
        map(tag("le"), |_| Endian::Little),
        map(tag("be"), |_| Endian::Big),
    ))(input)
}

fn sign(input: &str) -> IResult<&str, bool> {
    alt((map(tag("s"), |_| true), map(tag("u"), |_| false)))(input)
}

fn signed_int(input: &str) -> IResult<&str, i32> {
    map_res(
        recognize(pair(opt(tag("-")), digit1)),
        |s: &str| s.parse::<i32>(),
    )(input)
}

fn unsigned_int(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

/// Storage bit width, rejected at parse time unless it's a whole number of
/// bytes; the planner has no use for bit-packed channels (see the
/// shared-index handling in `layout.rs`).
fn storagebits(input: &str) -> IResult<&str, u32> {
    map_res(unsigned_int, |bits| {
        if bits % 8 == 0 {
            Ok(bits)
        } else {
            Err("storage width must be a multiple of 8")
        }
    })(input)
}

fn type_spec(input: &str) -> IResult<&str, TypeInfo> {
    let (input, (endian, (signed, (storagebits, realbits)))) = separated_pair(
        endian,
        tag(":"),
        pair(sign, separated_pair(storagebits, tag("/"), unsigned_int)),
    )(input)?;
    let (input, shift) = preceded(tag(">>"), signed_int)(input)?;

    Ok((
        input,
        TypeInfo {
            endian,
            signed,
            size: (storagebits / 8) as usize,
            realbits,
            shift,
        },
    ))
}

/// Decode a `scan_elements/*_type` value such as `le:s16/32>>0`, read from
/// `path`. A malformed descriptor is reported as [CoreError::SysfsUnavailable]
/// rather than a dedicated error kind, so `refresh` can fold it into the same
/// per-channel error-localization policy it already applies to a missing or
/// unreadable attribute.
pub fn decode_type_spec(path: &Path, spec: &str) -> Result<TypeInfo, CoreError> {
    let trimmed = spec.trim();
    match type_spec(trimmed) {
        Ok((rest, info)) if rest.is_empty() => Ok(info),
        _ => Err(CoreError::SysfsUnavailable {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed type descriptor {:?}", trimmed),
            ),
        }),
    }
}
