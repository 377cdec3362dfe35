//! Grouping NAL units into access units.
//!
//! Boundaries follow ISO/IEC 14496-10 7.4.1.2.4: an access unit
//! delimiter opens a new access unit, and a coded slice whose header
//! differs from the previous slice in frame_num, PPS id, field flags,
//! reference-ness or picture order count starts a new primary picture.
//! SPS, PPS and SEI units arriving after a picture's slices belong to
//! the next access unit.

use crate::error::Result;
use crate::nal::{NalUnit, NalUnitType};
use crate::param::ParamDictionary;
use crate::pps::PictureParameterSet;
use crate::slice::{parse_slice_prefix, SliceHeader, SliceType};
use crate::sps::SequenceParameterSet;
use revmux_es::{EsByteSource, EsOffset, EsUnitReader};
use tracing::{debug, warn};

/// The slice header fields that decide picture boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VclKey {
    frame_num: u32,
    pps_id: u8,
    field_pic_flag: bool,
    bottom_field_flag: bool,
    is_reference: bool,
    idr_pic_id: Option<u32>,
    poc_type: u8,
    pic_order_cnt_lsb: u32,
    delta_pic_order_cnt_bottom: i32,
    delta_pic_order_cnt: [i32; 2],
}

impl VclKey {
    /// Whether a slice with key `next` begins a new primary picture.
    fn starts_new_picture(&self, next: &VclKey) -> bool {
        if self.frame_num != next.frame_num
            || self.pps_id != next.pps_id
            || self.field_pic_flag != next.field_pic_flag
            || self.is_reference != next.is_reference
            || self.idr_pic_id.is_some() != next.idr_pic_id.is_some()
            || self.idr_pic_id != next.idr_pic_id
        {
            return true;
        }
        if self.field_pic_flag && self.bottom_field_flag != next.bottom_field_flag {
            return true;
        }
        match (self.poc_type, next.poc_type) {
            (0, 0) => {
                self.pic_order_cnt_lsb != next.pic_order_cnt_lsb
                    || self.delta_pic_order_cnt_bottom != next.delta_pic_order_cnt_bottom
            }
            (1, 1) => self.delta_pic_order_cnt != next.delta_pic_order_cnt,
            (a, b) => a != b,
        }
    }
}

/// An aggregated access unit.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// The NAL units, in stream order.
    pub units: Vec<NalUnit>,
    /// Index of the primary picture's first slice within `units`.
    pub primary: Option<usize>,
    /// Slice types of every coded slice in the unit.
    pub slice_types: Vec<SliceType>,
    /// Access unit index in decode order.
    pub index: u32,
}

impl AccessUnit {
    /// The primary picture's first slice NAL, if there is one.
    pub fn primary_slice(&self) -> Option<&NalUnit> {
        self.primary.map(|i| &self.units[i])
    }

    /// Whether the primary picture is an IDR.
    pub fn is_idr(&self) -> bool {
        self.primary_slice().map(|n| n.is_idr()).unwrap_or(false)
    }

    /// Whether the primary picture is a reference picture.
    pub fn is_reference(&self) -> bool {
        self.primary_slice()
            .map(|n| n.nal_ref_idc != 0)
            .unwrap_or(false)
    }

    /// Whether every slice reduces to I (or SI).
    pub fn all_slices_i(&self) -> bool {
        !self.slice_types.is_empty() && self.slice_types.iter().all(|t| t.is_intra())
    }

    /// Whether every slice reduces to I, P or SP.
    pub fn all_slices_i_or_p(&self) -> bool {
        !self.slice_types.is_empty()
            && self
                .slice_types
                .iter()
                .all(|t| t.is_intra() || t.is_predictive())
    }

    /// Start offset and exact byte span of the unit's bytes.
    pub fn bounds(&self) -> Option<(EsOffset, u64, u32)> {
        let first = &self.units.first()?.unit;
        let last = &self.units.last()?.unit;
        Some((
            first.start,
            first.linear_start,
            (last.linear_end() - first.linear_start) as u32,
        ))
    }
}

/// Reads access units from an ES unit stream, caching SPS and PPS units
/// into parameter dictionaries as they pass by.
pub struct AccessUnitReader<S> {
    units: EsUnitReader<S>,
    pending: Option<NalUnit>,
    /// Sequence parameter sets by id.
    pub sps: ParamDictionary<SequenceParameterSet>,
    /// Picture parameter sets by id.
    pub pps: ParamDictionary<PictureParameterSet>,
    prev_vcl: Option<VclKey>,
    index: u32,
}

impl<S: EsByteSource> AccessUnitReader<S> {
    /// Create a reader over an ES unit stream.
    pub fn new(units: EsUnitReader<S>) -> Self {
        Self {
            units,
            pending: None,
            sps: ParamDictionary::new(),
            pps: ParamDictionary::new(),
            prev_vcl: None,
            index: 0,
        }
    }

    /// Access the underlying ES unit reader.
    pub fn units_mut(&mut self) -> &mut EsUnitReader<S> {
        &mut self.units
    }

    /// Consume the reader, returning the ES unit reader.
    pub fn into_units(self) -> EsUnitReader<S> {
        self.units
    }

    /// Fetch the next NAL unit, skipping units that fail to parse.
    fn next_nal(&mut self) -> Result<Option<NalUnit>> {
        if let Some(nal) = self.pending.take() {
            return Ok(Some(nal));
        }
        loop {
            let Some(unit) = self.units.next_unit()? else {
                return Ok(None);
            };
            match NalUnit::from_unit(unit) {
                Ok(nal) => return Ok(Some(nal)),
                Err(err) => {
                    warn!(%err, "skipping unparseable NAL unit");
                }
            }
        }
    }

    /// Remember parameter sets and compute the boundary key for slices.
    fn examine(&mut self, nal: &NalUnit) -> Option<(VclKey, SliceType)> {
        match nal.nal_type {
            NalUnitType::Sps => {
                match SequenceParameterSet::parse(&nal.rbsp) {
                    Ok(sps) => {
                        debug!(sps_id = sps.sps_id, "caching sequence parameter set");
                        self.sps
                            .insert(sps.sps_id, nal.start(), nal.unit.len() as u32, sps);
                    }
                    Err(err) => warn!(%err, "ignoring malformed SPS"),
                }
                None
            }
            NalUnitType::Pps => {
                match PictureParameterSet::parse(&nal.rbsp) {
                    Ok(pps) => {
                        debug!(pps_id = pps.pps_id, "caching picture parameter set");
                        self.pps
                            .insert(pps.pps_id, nal.start(), nal.unit.len() as u32, pps);
                    }
                    Err(err) => warn!(%err, "ignoring malformed PPS"),
                }
                None
            }
            t if t.is_vcl() => self.slice_key(nal),
            _ => None,
        }
    }

    /// Parse enough of a slice header for boundary detection.
    fn slice_key(&self, nal: &NalUnit) -> Option<(VclKey, SliceType)> {
        let (_, prefix_type, pps_id) = match parse_slice_prefix(&nal.rbsp) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(%err, offset = %nal.start(), "unparseable slice header prefix");
                return None;
            }
        };

        let full = self
            .pps
            .get(pps_id)
            .and_then(|pps| self.sps.get(pps.set.sps_id).map(|sps| (sps, pps)))
            .and_then(|(sps, pps)| {
                SliceHeader::parse(&nal.rbsp, nal.nal_type, &sps.set, &pps.set)
                    .map_err(|err| {
                        warn!(%err, offset = %nal.start(), "slice header parse failed");
                        err
                    })
                    .ok()
                    .map(|header| (header, sps.set.pic_order_cnt_type))
            });

        match full {
            Some((header, poc_type)) => Some((
                VclKey {
                    frame_num: header.frame_num,
                    pps_id: header.pps_id,
                    field_pic_flag: header.field_pic_flag,
                    bottom_field_flag: header.bottom_field_flag,
                    is_reference: nal.nal_ref_idc != 0,
                    idr_pic_id: header.idr_pic_id,
                    poc_type,
                    pic_order_cnt_lsb: header.pic_order_cnt_lsb,
                    delta_pic_order_cnt_bottom: header.delta_pic_order_cnt_bottom,
                    delta_pic_order_cnt: header.delta_pic_order_cnt,
                },
                header.slice_type,
            )),
            None => {
                // Without its parameter sets a slice still classifies,
                // but cannot refine the picture boundary
                warn!(
                    pps_id,
                    offset = %nal.start(),
                    "slice references unknown parameter sets"
                );
                Some((
                    VclKey {
                        frame_num: 0,
                        pps_id,
                        field_pic_flag: false,
                        bottom_field_flag: false,
                        is_reference: nal.nal_ref_idc != 0,
                        idr_pic_id: None,
                        poc_type: 2,
                        pic_order_cnt_lsb: 0,
                        delta_pic_order_cnt_bottom: 0,
                        delta_pic_order_cnt: [0; 2],
                    },
                    prefix_type,
                ))
            }
        }
    }

    /// Read the next access unit. `Ok(None)` at clean end of input.
    pub fn next_access_unit(&mut self) -> Result<Option<AccessUnit>> {
        let mut units: Vec<NalUnit> = Vec::new();
        let mut primary = None;
        let mut slice_types = Vec::new();
        let mut has_vcl = false;

        loop {
            let Some(nal) = self.next_nal()? else {
                break;
            };

            // An AUD always opens a new access unit; other non-VCL units
            // after a picture's slices belong to the next one
            let closes = match nal.nal_type {
                NalUnitType::Aud => !units.is_empty(),
                NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Sei => has_vcl,
                _ => false,
            };
            if closes {
                self.pending = Some(nal);
                break;
            }

            if nal.is_vcl() {
                if let Some((key, slice_type)) = self.examine(&nal) {
                    let new_picture = has_vcl
                        && self
                            .prev_vcl
                            .as_ref()
                            .map(|prev| prev.starts_new_picture(&key))
                            .unwrap_or(true);
                    if new_picture {
                        self.prev_vcl = Some(key);
                        self.pending = Some(nal);
                        break;
                    }
                    self.prev_vcl = Some(key);
                    if primary.is_none() {
                        primary = Some(units.len());
                    }
                    slice_types.push(slice_type);
                    has_vcl = true;
                }
                units.push(nal);
            } else {
                let _ = self.examine(&nal);
                units.push(nal);
            }
        }

        if units.is_empty() {
            return Ok(None);
        }

        let index = self.index;
        self.index += 1;
        Ok(Some(AccessUnit {
            units,
            primary,
            slice_types,
            index,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pps::build_pps_rbsp;
    use crate::slice::build_slice_rbsp;
    use crate::sps::build_sps_rbsp;
    use revmux_core::bitstream::add_emulation_prevention;
    use revmux_es::FileEsSource;
    use std::io::Cursor;

    fn annex_b_nal(header: u8, rbsp: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x01, header];
        bytes.extend(add_emulation_prevention(rbsp));
        bytes
    }

    fn slice_nal(idr: bool, ref_idc: u8, slice_type: u32, frame_num: u32, poc: u32) -> Vec<u8> {
        let header = (ref_idc << 5) | if idr { 5 } else { 1 };
        annex_b_nal(
            header,
            &build_slice_rbsp(slice_type, frame_num, 5, idr, poc, 6),
        )
    }

    fn reader_over(bytes: Vec<u8>) -> AccessUnitReader<FileEsSource<Cursor<Vec<u8>>>> {
        AccessUnitReader::new(EsUnitReader::new(FileEsSource::new(Cursor::new(bytes))))
    }

    fn stream_prelude() -> Vec<u8> {
        let mut bytes = annex_b_nal(0x67, &build_sps_rbsp(0, 1));
        bytes.extend(annex_b_nal(0x68, &build_pps_rbsp(0, 0)));
        bytes
    }

    #[test]
    fn test_aud_delimited_access_units() {
        let mut bytes = Vec::new();
        for frame_num in 0..3u32 {
            bytes.extend(annex_b_nal(0x09, &[0xF0])); // AUD
            if frame_num == 0 {
                bytes.extend(stream_prelude());
            }
            bytes.extend(slice_nal(frame_num == 0, 3, 7, frame_num % 32, frame_num * 2));
        }

        let mut reader = reader_over(bytes);
        let mut aus = Vec::new();
        while let Some(au) = reader.next_access_unit().unwrap() {
            aus.push(au);
        }

        assert_eq!(aus.len(), 3);
        assert_eq!(aus[0].units.len(), 4); // AUD, SPS, PPS, slice
        assert!(aus[0].is_idr());
        assert!(aus[0].all_slices_i());
        assert_eq!(aus[1].units.len(), 2); // AUD, slice
        assert!(!aus[1].is_idr());
        assert_eq!(aus[0].index, 0);
        assert_eq!(aus[2].index, 2);

        // Parameter sets were cached with their offsets
        assert_eq!(reader.sps.len(), 1);
        assert_eq!(reader.pps.len(), 1);
    }

    #[test]
    fn test_frame_num_change_starts_new_unit() {
        let mut bytes = stream_prelude();
        // Two slices of frame 0, then one of frame 1 - no AUDs at all
        bytes.extend(slice_nal(true, 3, 7, 0, 0));
        bytes.extend(slice_nal(true, 3, 7, 0, 0));
        bytes.extend(slice_nal(false, 2, 5, 1, 2));

        let mut reader = reader_over(bytes);
        let first = reader.next_access_unit().unwrap().unwrap();
        assert_eq!(first.slice_types.len(), 2);
        assert!(first.all_slices_i());

        let second = reader.next_access_unit().unwrap().unwrap();
        assert_eq!(second.slice_types.len(), 1);
        assert!(!second.all_slices_i());
        assert!(second.all_slices_i_or_p());
        assert!(reader.next_access_unit().unwrap().is_none());
    }

    #[test]
    fn test_poc_change_starts_new_unit() {
        let mut bytes = stream_prelude();
        // Same frame_num, differing pic_order_cnt_lsb: two pictures
        bytes.extend(slice_nal(false, 2, 5, 4, 8));
        bytes.extend(slice_nal(false, 2, 5, 4, 10));

        let mut reader = reader_over(bytes);
        assert!(reader.next_access_unit().unwrap().is_some());
        assert!(reader.next_access_unit().unwrap().is_some());
        assert!(reader.next_access_unit().unwrap().is_none());
    }

    #[test]
    fn test_sps_after_slices_belongs_to_next_unit() {
        let mut bytes = stream_prelude();
        bytes.extend(slice_nal(true, 3, 7, 0, 0));
        bytes.extend(annex_b_nal(0x67, &build_sps_rbsp(0, 1)));
        bytes.extend(slice_nal(false, 2, 5, 1, 2));

        let mut reader = reader_over(bytes);
        let first = reader.next_access_unit().unwrap().unwrap();
        assert_eq!(first.units.len(), 3); // SPS, PPS, IDR slice

        let second = reader.next_access_unit().unwrap().unwrap();
        assert_eq!(second.units.len(), 2); // SPS, slice
        assert_eq!(second.units[0].nal_type, NalUnitType::Sps);
    }

    #[test]
    fn test_bounds_cover_prefixed_units() {
        let mut bytes = stream_prelude();
        let au_start = 1u64; // four-byte start codes: first zero is not in the unit
        bytes.extend(slice_nal(true, 3, 7, 0, 0));

        let mut reader = reader_over(bytes);
        let au = reader.next_access_unit().unwrap().unwrap();
        let (start, linear, len) = au.bounds().unwrap();
        assert_eq!(start.file_pos, au_start);
        assert_eq!(linear, au_start);
        assert!(len > 0);
    }

    #[test]
    fn test_cached_parameter_sets_reread_identically() {
        use revmux_es::EsByteSource;

        let sps_unit = annex_b_nal(0x67, &build_sps_rbsp(0, 1));
        let pps_unit = annex_b_nal(0x68, &build_pps_rbsp(0, 0));
        let mut bytes = sps_unit.clone();
        bytes.extend(&pps_unit);
        bytes.extend(slice_nal(true, 3, 7, 0, 0));

        let mut reader = reader_over(bytes);
        while reader.next_access_unit().unwrap().is_some() {}

        let sps_entry = reader.sps.get(0).unwrap();
        let (offset, len) = (sps_entry.offset, sps_entry.data_len);
        let pps_entry = reader.pps.get(0).unwrap();
        let (pps_offset, pps_len) = (pps_entry.offset, pps_entry.data_len);

        let mut source = reader.into_units().into_source();
        // The stored offsets point past the leading zero of the 4-byte
        // start codes, at the 3-byte prefix itself
        let reread = source.read_at(offset, len as usize).unwrap();
        assert_eq!(reread, sps_unit[1..].to_vec());
        let reread = source.read_at(pps_offset, pps_len as usize).unwrap();
        assert_eq!(reread, pps_unit[1..].to_vec());
    }

    #[test]
    fn test_reference_classification() {
        let mut bytes = stream_prelude();
        bytes.extend(slice_nal(false, 0, 6, 7, 0)); // non-reference B
        let mut reader = reader_over(bytes);
        let au = reader.next_access_unit().unwrap().unwrap();
        assert!(!au.is_reference());
        assert!(!au.all_slices_i_or_p());
        assert_eq!(au.slice_types, vec![SliceType::B]);
    }
}
