//! Slice header parsing, up to the picture order count fields.
//!
//! Access unit boundary detection needs frame_num, the PPS id, the
//! field flags and the POC fields; parsing stops once it has them.

use crate::error::{H264Error, Result};
use crate::nal::NalUnitType;
use crate::pps::PictureParameterSet;
use crate::sps::SequenceParameterSet;
use revmux_core::BitReader;

/// Slice type, reduced modulo 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// Predictive.
    P,
    /// Bidirectional.
    B,
    /// Intra.
    I,
    /// Switching P.
    Sp,
    /// Switching I.
    Si,
}

impl SliceType {
    /// Create from the slice_type syntax element (values 0..=9).
    pub fn from_value(value: u32) -> Option<Self> {
        match value % 5 {
            0 => Some(Self::P),
            1 => Some(Self::B),
            2 => Some(Self::I),
            3 => Some(Self::Sp),
            4 => Some(Self::Si),
            _ => None,
        }
    }

    /// Whether every macroblock in this slice type is intra coded.
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::I | Self::Si)
    }

    /// Whether this slice type is predictive-only (P or SP).
    pub fn is_predictive(&self) -> bool {
        matches!(self, Self::P | Self::Sp)
    }
}

/// The leading slice header fields.
#[derive(Debug, Clone)]
pub struct SliceHeader {
    /// first_mb_in_slice.
    pub first_mb_in_slice: u32,
    /// Slice type.
    pub slice_type: SliceType,
    /// pic_parameter_set_id.
    pub pps_id: u8,
    /// frame_num.
    pub frame_num: u32,
    /// field_pic_flag.
    pub field_pic_flag: bool,
    /// bottom_field_flag (meaningful when field_pic_flag is set).
    pub bottom_field_flag: bool,
    /// idr_pic_id, for IDR slices.
    pub idr_pic_id: Option<u32>,
    /// pic_order_cnt_lsb (POC type 0).
    pub pic_order_cnt_lsb: u32,
    /// delta_pic_order_cnt_bottom (POC type 0).
    pub delta_pic_order_cnt_bottom: i32,
    /// delta_pic_order_cnt (POC type 1).
    pub delta_pic_order_cnt: [i32; 2],
}

/// Read just the first three syntax elements of a slice header.
///
/// These come before anything that needs a parameter set, so the PPS id
/// (and the slice type) can always be recovered.
pub fn parse_slice_prefix(rbsp: &[u8]) -> Result<(u32, SliceType, u8)> {
    let mut reader = BitReader::new(rbsp);
    let first_mb_in_slice = reader.read_ue()?;
    let raw_type = reader.read_ue()?;
    let slice_type = SliceType::from_value(raw_type)
        .ok_or_else(|| H264Error::Slice(format!("slice_type {raw_type} out of range")))?;
    let pps_id = reader.read_ue()? as u8;
    Ok((first_mb_in_slice, slice_type, pps_id))
}

impl SliceHeader {
    /// Parse the slice header fields needed for access unit boundaries.
    pub fn parse(
        rbsp: &[u8],
        nal_type: NalUnitType,
        sps: &SequenceParameterSet,
        pps: &PictureParameterSet,
    ) -> Result<Self> {
        let mut reader = BitReader::new(rbsp);

        let first_mb_in_slice = reader.read_ue()?;
        let raw_type = reader.read_ue()?;
        let slice_type = SliceType::from_value(raw_type)
            .ok_or_else(|| H264Error::Slice(format!("slice_type {raw_type} out of range")))?;
        let pps_id = reader.read_ue()? as u8;

        if sps.separate_colour_plane_flag {
            let _colour_plane_id = reader.read_bits(2)?;
        }

        let frame_num = reader.read_bits(sps.log2_max_frame_num)?;

        let (field_pic_flag, bottom_field_flag) = if !sps.frame_mbs_only_flag {
            let field = reader.read_bit()?;
            let bottom = field && reader.read_bit()?;
            (field, bottom)
        } else {
            (false, false)
        };

        let idr_pic_id = if nal_type == NalUnitType::IdrSlice {
            Some(reader.read_ue()?)
        } else {
            None
        };

        let mut pic_order_cnt_lsb = 0;
        let mut delta_pic_order_cnt_bottom = 0;
        let mut delta_pic_order_cnt = [0i32; 2];
        match sps.pic_order_cnt_type {
            0 => {
                pic_order_cnt_lsb = reader.read_bits(sps.log2_max_pic_order_cnt_lsb)?;
                if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                    delta_pic_order_cnt_bottom = reader.read_se()?;
                }
            }
            1 if !sps.delta_pic_order_always_zero_flag => {
                delta_pic_order_cnt[0] = reader.read_se()?;
                if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                    delta_pic_order_cnt[1] = reader.read_se()?;
                }
            }
            _ => {}
        }

        Ok(Self {
            first_mb_in_slice,
            slice_type,
            pps_id,
            frame_num,
            field_pic_flag,
            bottom_field_flag,
            idr_pic_id,
            pic_order_cnt_lsb,
            delta_pic_order_cnt_bottom,
            delta_pic_order_cnt,
        })
    }
}

/// Assemble slice header bits for the test SPS/PPS shapes.
#[cfg(test)]
pub(crate) fn build_slice_rbsp(
    slice_type: u32,
    frame_num: u32,
    log2_max_frame_num: u8,
    idr: bool,
    poc_lsb: u32,
    log2_max_poc_lsb: u8,
) -> Vec<u8> {
    use revmux_core::BitWriter;

    let mut w = BitWriter::new();
    w.write_ue(0); // first_mb_in_slice
    w.write_ue(slice_type);
    w.write_ue(0); // pps_id
    w.write_bits(frame_num, log2_max_frame_num);
    if idr {
        w.write_ue(1); // idr_pic_id
    }
    w.write_bits(poc_lsb, log2_max_poc_lsb);
    w.write_bit(true); // pretend slice data
    w.align_to_byte();
    w.into_data()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sets() -> (SequenceParameterSet, PictureParameterSet) {
        let sps = SequenceParameterSet::parse(&crate::sps::build_sps_rbsp(0, 1)).unwrap();
        let pps = PictureParameterSet::parse(&crate::pps::build_pps_rbsp(0, 0)).unwrap();
        (sps, pps)
    }

    #[test]
    fn test_slice_type_reduction() {
        assert_eq!(SliceType::from_value(2), Some(SliceType::I));
        assert_eq!(SliceType::from_value(7), Some(SliceType::I));
        assert_eq!(SliceType::from_value(0), Some(SliceType::P));
        assert_eq!(SliceType::from_value(5), Some(SliceType::P));
        assert_eq!(SliceType::from_value(3), Some(SliceType::Sp));
        assert!(SliceType::I.is_intra());
        assert!(SliceType::Sp.is_predictive());
        assert!(!SliceType::B.is_predictive());
    }

    #[test]
    fn test_parse_prefix() {
        let rbsp = build_slice_rbsp(7, 3, 5, false, 6, 6);
        let (first_mb, slice_type, pps_id) = parse_slice_prefix(&rbsp).unwrap();
        assert_eq!(first_mb, 0);
        assert_eq!(slice_type, SliceType::I);
        assert_eq!(pps_id, 0);
    }

    #[test]
    fn test_parse_full_header() {
        let (sps, pps) = test_sets();
        let rbsp = build_slice_rbsp(5, 9, sps.log2_max_frame_num, false, 18, 6);
        let header =
            SliceHeader::parse(&rbsp, NalUnitType::NonIdrSlice, &sps, &pps).unwrap();
        assert_eq!(header.slice_type, SliceType::P);
        assert_eq!(header.frame_num, 9);
        assert!(!header.field_pic_flag);
        assert_eq!(header.idr_pic_id, None);
        assert_eq!(header.pic_order_cnt_lsb, 18);
    }

    #[test]
    fn test_parse_idr_header() {
        let (sps, pps) = test_sets();
        let rbsp = build_slice_rbsp(7, 0, sps.log2_max_frame_num, true, 0, 6);
        let header = SliceHeader::parse(&rbsp, NalUnitType::IdrSlice, &sps, &pps).unwrap();
        assert_eq!(header.slice_type, SliceType::I);
        assert_eq!(header.idr_pic_id, Some(1));
    }

    #[test]
    fn test_underflow_is_error() {
        let (sps, pps) = test_sets();
        assert!(SliceHeader::parse(&[0x80], NalUnitType::NonIdrSlice, &sps, &pps).is_err());
    }
}
