//! H.265 Annex-B inspection.
//!
//! The vehicle sends one access unit per camera message, prefixed with
//! Annex-B start codes (`00 00 01` or `00 00 00 01`).  The decode worker uses
//! this module to find the first random-access point before it starts
//! feeding the decoder.

use bytes::Bytes;

/// NAL unit types (6 bits, RFC 7798 / H.265 table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Trailing, TSA, STSA, RADL or RASL picture slice (types 0–9)
    Slice(u8),
    /// Broken link access (16–18)
    Bla(u8),
    /// Instantaneous decoding refresh with RADL pictures
    IdrWRadl,
    /// Instantaneous decoding refresh without leading pictures
    IdrNLp,
    /// Clean random access
    Cra,
    /// Video parameter set
    Vps,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    Aud,
    /// Prefix or suffix SEI
    Sei,
    /// Unknown/reserved
    Other(u8),
}

impl NalUnitType {
    /// Classify from the first header byte.
    pub fn from_header(byte: u8) -> Self {
        match (byte >> 1) & 0x3F {
            n @ 0..=9 => NalUnitType::Slice(n),
            n @ 16..=18 => NalUnitType::Bla(n),
            19 => NalUnitType::IdrWRadl,
            20 => NalUnitType::IdrNLp,
            21 => NalUnitType::Cra,
            32 => NalUnitType::Vps,
            33 => NalUnitType::Sps,
            34 => NalUnitType::Pps,
            35 => NalUnitType::Aud,
            39 | 40 => NalUnitType::Sei,
            n => NalUnitType::Other(n),
        }
    }

    /// Intra random access point: decoding can start here.
    pub fn is_irap(&self) -> bool {
        matches!(
            self,
            NalUnitType::Bla(_) | NalUnitType::IdrWRadl | NalUnitType::IdrNLp | NalUnitType::Cra
        )
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NalUnitType::Vps | NalUnitType::Sps | NalUnitType::Pps)
    }
}

/// One NAL unit, header included, start code stripped.
#[derive(Debug, Clone)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    pub data: Bytes,
}

/// Split an Annex-B buffer into its NAL units.  Bytes before the first start
/// code are ignored; empty units are skipped.
pub fn split_annex_b(buf: &Bytes) -> Vec<NalUnit> {
    let mut units = Vec::new();
    let mut cursor = match find_start_code(buf, 0) {
        Some((pos, len)) => pos + len,
        None => return units,
    };

    loop {
        let (end, next) = match find_start_code(buf, cursor) {
            Some((pos, len)) => (pos, Some(pos + len)),
            None => (buf.len(), None),
        };
        if end > cursor {
            let data = buf.slice(cursor..end);
            units.push(NalUnit {
                nal_type: NalUnitType::from_header(data[0]),
                data,
            });
        }
        match next {
            Some(n) => cursor = n,
            None => break,
        }
    }
    units
}

/// `true` if `buf` carries parameter sets or an IRAP picture, i.e. a decoder
/// with no prior state can make sense of it.
pub fn starts_decodable(buf: &Bytes) -> bool {
    split_annex_b(buf)
        .iter()
        .any(|nal| nal.nal_type.is_irap() || nal.nal_type.is_parameter_set())
}

/// Position and length of the next start code at or after `offset`.
fn find_start_code(buf: &[u8], offset: usize) -> Option<(usize, usize)> {
    let mut i = offset;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 {
            if buf[i + 2] == 1 {
                return Some((i, 3));
            }
            if buf[i + 2] == 0 && i + 3 < buf.len() && buf[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // Header bytes: type << 1
    const VPS: u8 = 32 << 1;
    const SPS: u8 = 33 << 1;
    const IDR: u8 = 19 << 1;
    const TRAIL: u8 = 1 << 1;

    #[test]
    fn splits_mixed_start_codes() {
        let buf = Bytes::from(vec![
            0, 0, 0, 1, VPS, 1, 0xAA, //
            0, 0, 1, SPS, 1, 0xBB, 0xCC, //
            0, 0, 0, 1, IDR, 1, 0xDD,
        ]);
        let units = split_annex_b(&buf);
        let types: Vec<_> = units.iter().map(|u| u.nal_type).collect();
        assert_eq!(
            types,
            vec![NalUnitType::Vps, NalUnitType::Sps, NalUnitType::IdrWRadl]
        );
        assert_eq!(&units[1].data[..], &[SPS, 1, 0xBB, 0xCC]);
    }

    #[test]
    fn leading_garbage_and_empty_units_are_ignored() {
        let buf = Bytes::from(vec![9, 9, 0, 0, 1, 0, 0, 1, TRAIL, 1]);
        let units = split_annex_b(&buf);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].nal_type, NalUnitType::Slice(1));
    }

    #[test]
    fn no_start_code_means_no_units() {
        assert!(split_annex_b(&Bytes::from_static(&[1, 2, 3, 4])).is_empty());
    }

    #[test]
    fn decodable_only_from_irap_or_parameter_sets() {
        assert!(starts_decodable(&Bytes::from(vec![0, 0, 1, IDR, 1])));
        assert!(starts_decodable(&Bytes::from(vec![0, 0, 1, VPS, 1])));
        assert!(!starts_decodable(&Bytes::from(vec![0, 0, 1, TRAIL, 1])));
        assert!(NalUnitType::from_header(21 << 1).is_irap());
        assert!(NalUnitType::from_header(17 << 1).is_irap());
    }
}
