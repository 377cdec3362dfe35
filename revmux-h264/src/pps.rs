//! Picture parameter set parsing.

use crate::error::{H264Error, Result};
use revmux_core::BitReader;

/// A parsed picture parameter set, trimmed to the fields slice header
/// parsing needs.
#[derive(Debug, Clone)]
pub struct PictureParameterSet {
    /// pic_parameter_set_id.
    pub pps_id: u8,
    /// The SPS this PPS refers to.
    pub sps_id: u8,
    /// entropy_coding_mode_flag (CABAC when set).
    pub entropy_coding_mode_flag: bool,
    /// bottom_field_pic_order_in_frame_present_flag.
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    /// num_slice_groups_minus1.
    pub num_slice_groups_minus1: u8,
    /// weighted_pred_flag.
    pub weighted_pred_flag: bool,
    /// weighted_bipred_idc.
    pub weighted_bipred_idc: u8,
    /// redundant_pic_cnt_present_flag.
    pub redundant_pic_cnt_present_flag: bool,
}

impl PictureParameterSet {
    /// Parse a PPS from its RBSP bytes.
    pub fn parse(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(rbsp);

        let pps_id = reader.read_ue()? as u8;
        let sps_id = reader.read_ue()? as u8;
        if sps_id > 31 {
            return Err(H264Error::InvalidParameterSet(format!(
                "seq_parameter_set_id {sps_id} out of range"
            )));
        }

        let entropy_coding_mode_flag = reader.read_bit()?;
        let bottom_field_pic_order_in_frame_present_flag = reader.read_bit()?;

        let num_slice_groups_minus1 = reader.read_ue()? as u8;
        if num_slice_groups_minus1 > 0 {
            let slice_group_map_type = reader.read_ue()?;
            match slice_group_map_type {
                0 => {
                    for _ in 0..=num_slice_groups_minus1 {
                        let _run_length_minus1 = reader.read_ue()?;
                    }
                }
                2 => {
                    for _ in 0..num_slice_groups_minus1 {
                        let _top_left = reader.read_ue()?;
                        let _bottom_right = reader.read_ue()?;
                    }
                }
                3..=5 => {
                    let _change_direction = reader.read_bit()?;
                    let _change_rate_minus1 = reader.read_ue()?;
                }
                6 => {
                    let map_units = reader.read_ue()? + 1;
                    let bits = 32 - (num_slice_groups_minus1 as u32).leading_zeros();
                    for _ in 0..map_units {
                        reader.read_bits(bits.max(1) as u8)?;
                    }
                }
                _ => {}
            }
        }

        let _num_ref_idx_l0_default_active_minus1 = reader.read_ue()?;
        let _num_ref_idx_l1_default_active_minus1 = reader.read_ue()?;
        let weighted_pred_flag = reader.read_bit()?;
        let weighted_bipred_idc = reader.read_bits(2)? as u8;
        let _pic_init_qp_minus26 = reader.read_se()?;
        let _pic_init_qs_minus26 = reader.read_se()?;
        let _chroma_qp_index_offset = reader.read_se()?;
        let _deblocking_filter_control_present = reader.read_bit()?;
        let _constrained_intra_pred = reader.read_bit()?;
        let redundant_pic_cnt_present_flag = reader.read_bit()?;

        Ok(Self {
            pps_id,
            sps_id,
            entropy_coding_mode_flag,
            bottom_field_pic_order_in_frame_present_flag,
            num_slice_groups_minus1,
            weighted_pred_flag,
            weighted_bipred_idc,
            redundant_pic_cnt_present_flag,
        })
    }
}

/// Assemble a minimal PPS RBSP.
#[cfg(test)]
pub(crate) fn build_pps_rbsp(pps_id: u32, sps_id: u32) -> Vec<u8> {
    use revmux_core::BitWriter;

    let mut w = BitWriter::new();
    w.write_ue(pps_id);
    w.write_ue(sps_id);
    w.write_bit(false); // entropy_coding_mode (CAVLC)
    w.write_bit(false); // bottom_field_pic_order_in_frame_present
    w.write_ue(0); // num_slice_groups_minus1
    w.write_ue(0); // num_ref_idx_l0_default_active_minus1
    w.write_ue(0); // num_ref_idx_l1_default_active_minus1
    w.write_bit(false); // weighted_pred
    w.write_bits(0, 2); // weighted_bipred_idc
    w.write_se(0); // pic_init_qp_minus26
    w.write_se(0); // pic_init_qs_minus26
    w.write_se(0); // chroma_qp_index_offset
    w.write_bit(false); // deblocking_filter_control_present
    w.write_bit(false); // constrained_intra_pred
    w.write_bit(false); // redundant_pic_cnt_present
    w.write_bit(true); // rbsp stop bit
    w.align_to_byte();
    w.into_data()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_pps() {
        let rbsp = build_pps_rbsp(2, 0);
        let pps = PictureParameterSet::parse(&rbsp).unwrap();
        assert_eq!(pps.pps_id, 2);
        assert_eq!(pps.sps_id, 0);
        assert!(!pps.entropy_coding_mode_flag);
        assert!(!pps.bottom_field_pic_order_in_frame_present_flag);
        assert_eq!(pps.num_slice_groups_minus1, 0);
    }

    #[test]
    fn test_empty_pps_fails() {
        assert!(PictureParameterSet::parse(&[]).is_err());
    }
}
