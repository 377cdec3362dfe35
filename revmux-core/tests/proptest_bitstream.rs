//! Property-based round-trip tests for the bit reader and writer.

use proptest::prelude::*;
use revmux_core::bitstream::{
    add_emulation_prevention, remove_emulation_prevention, BitReader, BitWriter,
};

proptest! {
    #[test]
    fn roundtrip_bits_variable_width(value in 0u32..=0xFFFF, width in 1u8..=16) {
        let masked = value & ((1u32 << width) - 1);

        let mut writer = BitWriter::new();
        writer.write_bits(masked, width);
        writer.align_to_byte();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        prop_assert_eq!(reader.read_bits(width).unwrap(), masked);
    }

    #[test]
    fn roundtrip_bits_u32(value in any::<u32>()) {
        let mut writer = BitWriter::new();
        writer.write_bits(value, 32);

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        prop_assert_eq!(reader.read_bits(32).unwrap(), value);
    }

    #[test]
    fn roundtrip_individual_bits(bits in prop::collection::vec(any::<bool>(), 1..100)) {
        let mut writer = BitWriter::new();
        for &bit in &bits {
            writer.write_bit(bit);
        }
        writer.align_to_byte();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        for (i, &expected) in bits.iter().enumerate() {
            prop_assert_eq!(reader.read_bit().unwrap(), expected, "mismatch at bit {}", i);
        }
    }

    #[test]
    fn roundtrip_exp_golomb_unsigned(value in 0u32..=65534) {
        let mut writer = BitWriter::new();
        writer.write_ue(value);
        writer.align_to_byte();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        prop_assert_eq!(reader.read_ue().unwrap(), value);
    }

    #[test]
    fn roundtrip_exp_golomb_signed(value in -32767i32..=32767) {
        let mut writer = BitWriter::new();
        writer.write_se(value);
        writer.align_to_byte();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        prop_assert_eq!(reader.read_se().unwrap(), value);
    }

    #[test]
    fn roundtrip_mixed_exp_golomb(
        ue_values in prop::collection::vec(0u32..1000, 1..10),
        se_values in prop::collection::vec(-500i32..500, 1..10)
    ) {
        let mut writer = BitWriter::new();
        for (&ue, &se) in ue_values.iter().zip(se_values.iter()) {
            writer.write_ue(ue);
            writer.write_se(se);
        }
        writer.align_to_byte();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        for (&ue, &se) in ue_values.iter().zip(se_values.iter()) {
            prop_assert_eq!(reader.read_ue().unwrap(), ue);
            prop_assert_eq!(reader.read_se().unwrap(), se);
        }
    }

    #[test]
    fn roundtrip_emulation_prevention(data in prop::collection::vec(any::<u8>(), 0..200)) {
        let escaped = add_emulation_prevention(&data);
        prop_assert_eq!(remove_emulation_prevention(&escaped), data);
    }

    #[test]
    fn emulation_prevention_no_start_codes(data in prop::collection::vec(any::<u8>(), 1..200)) {
        let escaped = add_emulation_prevention(&data);

        for i in 0..escaped.len().saturating_sub(2) {
            if escaped[i] == 0 && escaped[i + 1] == 0 {
                prop_assert!(
                    escaped[i + 2] != 0 && escaped[i + 2] != 1,
                    "start-code prefix at {}",
                    i
                );
            }
        }
    }

    #[test]
    fn bit_position_tracking(bits_to_read in 1usize..64, data_len in 8usize..32) {
        let data: Vec<u8> = (0..data_len as u8).collect();
        let mut reader = BitReader::new(&data);

        let total = data_len * 8;
        let n = bits_to_read.min(total);

        prop_assert_eq!(reader.position(), 0);
        prop_assert_eq!(reader.remaining_bits(), total);

        for _ in 0..n {
            reader.read_bit().unwrap();
        }

        prop_assert_eq!(reader.position(), n);
        prop_assert_eq!(reader.remaining_bits(), total - n);
    }
}
