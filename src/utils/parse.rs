use bgp_rs::{ASPath, Segment};

use crate::error::RdeError;

/// Convert an ASN string to a u32
/// E.g. "65000.100" -> 4259840100
pub fn asn_from_dotted(value: &str) -> Result<u32, RdeError> {
    // Parse to list of u32, since we should support 4 byte aSN as a single int
    // (E.g. "4259840100")
    let mut chunks = [0; 2];
    let check_for_overflow = value.contains('.');
    // Iterate through chunks in reverse, so if there's no dot (only one number),
    // it will be in the least significant position
    for (i, chunk) in value
        .splitn(2, '.')
        .collect::<Vec<&str>>()
        .into_iter()
        .rev()
        .enumerate()
    {
        let chunk: u32 = chunk
            .parse()
            .map_err(|err| RdeError::Parse(format!("{} '{}'", err, value)))?;
        if check_for_overflow && chunk > u32::from(std::u16::MAX) {
            return Err(RdeError::Parse(format!("Unsupported ASN '{}'", value)));
        }
        chunks[i] = chunk;
    }
    Ok((chunks[1] << 16) + chunks[0])
}

/// Parse an AS path like "65001 65002 {100 200}"
///
/// Braces delimit an AS_SET, everything else is AS_SEQUENCE.
pub fn as_path_from_str(value: &str) -> Result<ASPath, RdeError> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut sequence: Vec<u32> = Vec::new();
    let mut set: Option<Vec<u32>> = None;
    // Pad braces so they always split into their own words
    let spaced = value.replace('{', " { ").replace('}', " } ");
    for word in spaced.split_whitespace() {
        let unbalanced = || RdeError::Parse(format!("Unbalanced braces in '{}'", value));
        match word {
            "{" => {
                if set.is_some() {
                    return Err(unbalanced());
                }
                if !sequence.is_empty() {
                    segments.push(Segment::AS_SEQUENCE(std::mem::take(&mut sequence)));
                }
                set = Some(Vec::new());
            }
            "}" => {
                let asns = set.take().ok_or_else(unbalanced)?;
                if asns.is_empty() {
                    return Err(RdeError::Parse(format!("Empty AS_SET in '{}'", value)));
                }
                segments.push(Segment::AS_SET(asns));
            }
            asn => {
                let asn = asn_from_dotted(asn)?;
                match set.as_mut() {
                    Some(asns) => asns.push(asn),
                    None => sequence.push(asn),
                }
            }
        }
    }
    if set.is_some() {
        return Err(RdeError::Parse(format!("Unbalanced braces in '{}'", value)));
    }
    if !sequence.is_empty() {
        segments.push(Segment::AS_SEQUENCE(sequence));
    }
    Ok(ASPath { segments })
}
