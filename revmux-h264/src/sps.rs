//! Sequence parameter set parsing.
//!
//! Parsing covers the fields access unit boundary detection and slice
//! header parsing depend on; VUI parameters are not decoded.

use crate::error::{H264Error, Result};
use revmux_core::BitReader;

/// A parsed sequence parameter set.
#[derive(Debug, Clone)]
pub struct SequenceParameterSet {
    /// profile_idc.
    pub profile_idc: u8,
    /// The six constraint_set flags plus reserved bits.
    pub constraint_flags: u8,
    /// level_idc.
    pub level_idc: u8,
    /// seq_parameter_set_id (0..=31).
    pub sps_id: u8,
    /// chroma_format_idc (1 when not transmitted).
    pub chroma_format_idc: u8,
    /// separate_colour_plane_flag.
    pub separate_colour_plane_flag: bool,
    /// log2 of the frame_num wrap, already offset by 4.
    pub log2_max_frame_num: u8,
    /// pic_order_cnt_type (0, 1 or 2).
    pub pic_order_cnt_type: u8,
    /// log2 of the POC LSB wrap, already offset by 4 (POC type 0).
    pub log2_max_pic_order_cnt_lsb: u8,
    /// delta_pic_order_always_zero_flag (POC type 1).
    pub delta_pic_order_always_zero_flag: bool,
    /// max_num_ref_frames.
    pub max_num_ref_frames: u8,
    /// Picture width in macroblocks, minus 1.
    pub pic_width_in_mbs_minus1: u32,
    /// Picture height in map units, minus 1.
    pub pic_height_in_map_units_minus1: u32,
    /// frame_mbs_only_flag.
    pub frame_mbs_only_flag: bool,
    /// mb_adaptive_frame_field_flag.
    pub mb_adaptive_frame_field_flag: bool,
}

/// Profiles that carry the chroma format block.
fn has_chroma_block(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    )
}

fn skip_scaling_list(reader: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = reader.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

impl SequenceParameterSet {
    /// Parse an SPS from its RBSP bytes.
    pub fn parse(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(rbsp);

        let profile_idc = reader.read_bits(8)? as u8;
        let constraint_flags = reader.read_bits(8)? as u8;
        let level_idc = reader.read_bits(8)? as u8;
        let sps_id = reader.read_ue()? as u8;
        if sps_id > 31 {
            return Err(H264Error::InvalidParameterSet(format!(
                "seq_parameter_set_id {sps_id} out of range"
            )));
        }

        let (chroma_format_idc, separate_colour_plane_flag) = if has_chroma_block(profile_idc) {
            let chroma_format_idc = reader.read_ue()? as u8;
            let separate = chroma_format_idc == 3 && reader.read_bit()?;
            let _bit_depth_luma_minus8 = reader.read_ue()?;
            let _bit_depth_chroma_minus8 = reader.read_ue()?;
            let _qpprime_y_zero_transform_bypass = reader.read_bit()?;
            if reader.read_bit()? {
                // seq_scaling_matrix_present
                let count = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..count {
                    if reader.read_bit()? {
                        skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
            (chroma_format_idc, separate)
        } else {
            (1, false)
        };

        let log2_max_frame_num = reader.read_ue()? as u8 + 4;
        let pic_order_cnt_type = reader.read_ue()? as u8;

        let (log2_max_pic_order_cnt_lsb, delta_pic_order_always_zero_flag) =
            match pic_order_cnt_type {
                0 => (reader.read_ue()? as u8 + 4, false),
                1 => {
                    let delta_always_zero = reader.read_bit()?;
                    let _offset_for_non_ref_pic = reader.read_se()?;
                    let _offset_for_top_to_bottom_field = reader.read_se()?;
                    let cycle = reader.read_ue()?;
                    if cycle > 255 {
                        return Err(H264Error::InvalidParameterSet(
                            "num_ref_frames_in_pic_order_cnt_cycle too large".to_string(),
                        ));
                    }
                    for _ in 0..cycle {
                        let _offset_for_ref_frame = reader.read_se()?;
                    }
                    (0, delta_always_zero)
                }
                2 => (0, false),
                other => {
                    return Err(H264Error::InvalidParameterSet(format!(
                        "pic_order_cnt_type {other}"
                    )))
                }
            };

        let max_num_ref_frames = reader.read_ue()? as u8;
        let _gaps_in_frame_num_value_allowed = reader.read_bit()?;
        let pic_width_in_mbs_minus1 = reader.read_ue()?;
        let pic_height_in_map_units_minus1 = reader.read_ue()?;
        let frame_mbs_only_flag = reader.read_bit()?;
        let mb_adaptive_frame_field_flag = !frame_mbs_only_flag && reader.read_bit()?;

        Ok(Self {
            profile_idc,
            constraint_flags,
            level_idc,
            sps_id,
            chroma_format_idc,
            separate_colour_plane_flag,
            log2_max_frame_num,
            pic_order_cnt_type,
            log2_max_pic_order_cnt_lsb,
            delta_pic_order_always_zero_flag,
            max_num_ref_frames,
            pic_width_in_mbs_minus1,
            pic_height_in_map_units_minus1,
            frame_mbs_only_flag,
            mb_adaptive_frame_field_flag,
        })
    }

    /// Coded width in luma samples (cropping not applied).
    pub fn width(&self) -> u32 {
        (self.pic_width_in_mbs_minus1 + 1) * 16
    }

    /// Coded height in luma samples (cropping not applied).
    pub fn height(&self) -> u32 {
        let map_units = self.pic_height_in_map_units_minus1 + 1;
        let frame_height = if self.frame_mbs_only_flag {
            map_units
        } else {
            map_units * 2
        };
        frame_height * 16
    }
}

/// Assemble a baseline-ish SPS RBSP from syntax element values.
#[cfg(test)]
pub(crate) fn build_sps_rbsp(sps_id: u32, log2_frame_num_minus4: u32) -> Vec<u8> {
    use revmux_core::BitWriter;

    let mut w = BitWriter::new();
    w.write_bits(66, 8); // profile_idc: baseline
    w.write_bits(0xC0, 8); // constraint flags
    w.write_bits(30, 8); // level 3.0
    w.write_ue(sps_id);
    w.write_ue(log2_frame_num_minus4);
    w.write_ue(0); // pic_order_cnt_type 0
    w.write_ue(2); // log2_max_pic_order_cnt_lsb_minus4
    w.write_ue(3); // max_num_ref_frames
    w.write_bit(false); // gaps_in_frame_num_value_allowed
    w.write_ue(21); // width: 22 mbs = 352
    w.write_ue(17); // height: 18 map units = 288
    w.write_bit(true); // frame_mbs_only
    w.write_bit(true); // direct_8x8_inference
    w.write_bit(false); // frame_cropping
    w.write_bit(false); // vui_parameters_present
    w.write_bit(true); // rbsp stop bit
    w.align_to_byte();
    w.into_data()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_baseline_sps() {
        let rbsp = build_sps_rbsp(0, 1);
        let sps = SequenceParameterSet::parse(&rbsp).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 30);
        assert_eq!(sps.sps_id, 0);
        assert_eq!(sps.log2_max_frame_num, 5);
        assert_eq!(sps.pic_order_cnt_type, 0);
        assert_eq!(sps.log2_max_pic_order_cnt_lsb, 6);
        assert!(sps.frame_mbs_only_flag);
        assert_eq!(sps.width(), 352);
        assert_eq!(sps.height(), 288);
    }

    #[test]
    fn test_truncated_sps_fails() {
        let rbsp = build_sps_rbsp(0, 1);
        assert!(SequenceParameterSet::parse(&rbsp[..3]).is_err());
    }
}
