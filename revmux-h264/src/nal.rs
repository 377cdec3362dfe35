//! NAL (Network Abstraction Layer) units.
//!
//! In the Annex B byte stream a NAL unit is an ES unit whose start-code
//! byte is the NAL header: forbidden bit, nal_ref_idc, nal_unit_type.
//! The payload is subject to emulation prevention.

use crate::error::{H264Error, Result};
use revmux_core::bitstream::remove_emulation_prevention;
use revmux_es::{EsOffset, EsUnit};
use tracing::warn;

/// NAL unit types (ISO/IEC 14496-10 table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Unspecified.
    Unspecified,
    /// Coded slice of a non-IDR picture.
    NonIdrSlice,
    /// Slice data partition A.
    SliceDataA,
    /// Slice data partition B.
    SliceDataB,
    /// Slice data partition C.
    SliceDataC,
    /// Coded slice of an IDR picture.
    IdrSlice,
    /// Supplemental enhancement information.
    Sei,
    /// Sequence parameter set.
    Sps,
    /// Picture parameter set.
    Pps,
    /// Access unit delimiter.
    Aud,
    /// End of sequence.
    EndOfSequence,
    /// End of stream.
    EndOfStream,
    /// Filler data.
    Filler,
    /// Any other value.
    Unknown(u8),
}

impl NalUnitType {
    /// Create from the 5-bit type value.
    pub fn from_u8(value: u8) -> Self {
        match value & 0x1F {
            0 => Self::Unspecified,
            1 => Self::NonIdrSlice,
            2 => Self::SliceDataA,
            3 => Self::SliceDataB,
            4 => Self::SliceDataC,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            n => Self::Unknown(n),
        }
    }

    /// The raw type value.
    pub fn to_u8(&self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::NonIdrSlice => 1,
            Self::SliceDataA => 2,
            Self::SliceDataB => 3,
            Self::SliceDataC => 4,
            Self::IdrSlice => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::Filler => 12,
            Self::Unknown(n) => *n,
        }
    }

    /// Whether this is a Video Coding Layer unit.
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::NonIdrSlice
                | Self::SliceDataA
                | Self::SliceDataB
                | Self::SliceDataC
                | Self::IdrSlice
        )
    }
}

/// A parsed NAL unit, keeping the underlying ES unit bytes.
#[derive(Debug, Clone)]
pub struct NalUnit {
    /// nal_ref_idc from the header (0 means not a reference).
    pub nal_ref_idc: u8,
    /// The unit type.
    pub nal_type: NalUnitType,
    /// The raw ES unit (prefix, header byte, escaped payload).
    pub unit: EsUnit,
    /// Payload with emulation-prevention bytes removed.
    pub rbsp: Vec<u8>,
}

impl NalUnit {
    /// Interpret an ES unit as a NAL unit.
    ///
    /// The forbidden bit being set makes the unit invalid; emulation
    /// prevention violations in the body are reported but tolerated.
    pub fn from_unit(unit: EsUnit) -> Result<Self> {
        let header = unit.start_code;
        if header & 0x80 != 0 {
            return Err(H264Error::InvalidNal(format!(
                "forbidden bit set at {}",
                unit.start
            )));
        }

        let nal_ref_idc = (header >> 5) & 0x03;
        let nal_type = NalUnitType::from_u8(header & 0x1F);

        check_emulation(unit.body(), unit.start);
        let rbsp = remove_emulation_prevention(unit.body());

        Ok(Self {
            nal_ref_idc,
            nal_type,
            unit,
            rbsp,
        })
    }

    /// The unit's stream offset.
    pub fn start(&self) -> EsOffset {
        self.unit.start
    }

    /// Whether this is an IDR slice.
    pub fn is_idr(&self) -> bool {
        self.nal_type == NalUnitType::IdrSlice
    }

    /// Whether this is any coded slice.
    pub fn is_vcl(&self) -> bool {
        self.nal_type.is_vcl()
    }
}

/// Report raw `00 00 0x` runs that emulation prevention should have
/// escaped. Scanning continues regardless.
fn check_emulation(body: &[u8], at: EsOffset) {
    let mut zeros = 0u32;
    for &byte in body {
        if zeros >= 2 && byte <= 0x02 {
            warn!(
                offset = %at,
                byte,
                "emulation prevention violation inside NAL unit"
            );
            return;
        }
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(start_code: u8, body: &[u8]) -> EsUnit {
        let mut data = vec![0x00, 0x00, 0x01, start_code];
        data.extend_from_slice(body);
        EsUnit {
            start_code,
            start: EsOffset::START,
            linear_start: 0,
            data,
        }
    }

    #[test]
    fn test_header_split() {
        let nal = NalUnit::from_unit(unit(0x67, &[0x42, 0x00, 0x1E])).unwrap();
        assert_eq!(nal.nal_type, NalUnitType::Sps);
        assert_eq!(nal.nal_ref_idc, 3);
        assert!(!nal.is_vcl());

        let nal = NalUnit::from_unit(unit(0x65, &[0x88])).unwrap();
        assert_eq!(nal.nal_type, NalUnitType::IdrSlice);
        assert!(nal.is_idr());
        assert!(nal.is_vcl());

        let nal = NalUnit::from_unit(unit(0x41, &[0x9A])).unwrap();
        assert_eq!(nal.nal_type, NalUnitType::NonIdrSlice);
        assert_eq!(nal.nal_ref_idc, 2);
    }

    #[test]
    fn test_forbidden_bit_rejected() {
        assert!(NalUnit::from_unit(unit(0xE5, &[0x00])).is_err());
    }

    #[test]
    fn test_rbsp_strips_emulation_prevention() {
        let nal = NalUnit::from_unit(unit(0x67, &[0xAA, 0x00, 0x00, 0x03, 0x01, 0xBB])).unwrap();
        assert_eq!(nal.rbsp, vec![0xAA, 0x00, 0x00, 0x01, 0xBB]);
    }

    #[test]
    fn test_unknown_type() {
        let nal = NalUnit::from_unit(unit(0x1E, &[0x00])).unwrap();
        assert_eq!(nal.nal_type, NalUnitType::Unknown(30));
        assert_eq!(nal.nal_type.to_u8(), 30);
    }
}
