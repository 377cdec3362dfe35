//! Aggregating ES units into H.262 pictures.
//!
//! A "picture" here is either a field or frame with its slices, a
//! sequence header with its extensions and user data, or a sequence end.
//! Adjacent field pictures sharing a temporal reference are joined into
//! one frame-level picture.

use crate::error::{H262Error, Result};
use crate::types::*;
use revmux_es::{EsByteSource, EsOffset, EsUnit, EsUnitReader};
use tracing::{debug, warn};

/// One classified ES unit.
#[derive(Debug, Clone)]
pub struct H262Item {
    /// The underlying unit.
    pub unit: EsUnit,
    /// Picture coding type, when the unit is a picture header.
    pub coding_type: Option<PictureCodingType>,
}

impl H262Item {
    fn new(unit: EsUnit) -> Self {
        let coding_type = if unit.start_code == PICTURE_START_CODE && unit.data.len() > 5 {
            PictureCodingType::from_code((unit.data[5] & 0x38) >> 3)
        } else {
            None
        };
        Self { unit, coding_type }
    }

    /// Whether this is a picture header.
    pub fn is_picture(&self) -> bool {
        self.unit.start_code == PICTURE_START_CODE
    }

    /// Whether this is a sequence header.
    pub fn is_sequence_header(&self) -> bool {
        self.unit.start_code == SEQUENCE_HEADER_CODE
    }

    /// Whether this is a sequence end.
    pub fn is_sequence_end(&self) -> bool {
        self.unit.start_code == SEQUENCE_END_CODE
    }

    /// Whether this is an extension start unit.
    pub fn is_extension(&self) -> bool {
        self.unit.start_code == EXTENSION_START_CODE
    }

    /// Whether this is a user data unit.
    pub fn is_user_data(&self) -> bool {
        self.unit.start_code == USER_DATA_START_CODE
    }

    /// Whether this is a slice.
    pub fn is_slice(&self) -> bool {
        is_slice_start_code(self.unit.start_code)
    }

    /// Whether this is user data carrying an Active Format Description
    /// (identifier "DTG1").
    pub fn is_afd_user_data(&self) -> bool {
        self.is_user_data()
            && self.unit.data.len() >= 9
            && self.unit.data[4..8] == [0x44, 0x54, 0x47, 0x31]
    }
}

/// What a picture aggregate represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureKind {
    /// A field or frame picture with its slices.
    Picture,
    /// A sequence header with its extensions and user data.
    SequenceHeader,
    /// A lone sequence end code.
    SequenceEnd,
}

/// An aggregated H.262 picture.
#[derive(Debug, Clone)]
pub struct H262Picture {
    /// What this aggregate is.
    pub kind: PictureKind,
    /// Coding type, for pictures.
    pub coding_type: Option<PictureCodingType>,
    /// Temporal reference from the picture header.
    pub temporal_reference: u16,
    /// Structure from the picture coding extension (frame until an
    /// extension says otherwise; MPEG-1 never says otherwise).
    pub picture_structure: PictureStructure,
    /// Whether this frame was merged from two field pictures.
    pub was_two_fields: bool,
    /// The AFD in force for this picture.
    pub afd: u8,
    /// Whether the AFD was carried in the stream rather than assumed.
    pub is_real_afd: bool,
    /// Aspect ratio information (sequence headers).
    pub aspect_ratio_info: u8,
    /// progressive_sequence from the sequence extension.
    pub progressive_sequence: bool,
    /// The units making up this picture, in stream order.
    pub units: Vec<EsUnit>,
}

impl H262Picture {
    /// Whether this is a coded picture (field or frame).
    pub fn is_picture(&self) -> bool {
        self.kind == PictureKind::Picture
    }

    /// Whether this is a sequence header aggregate.
    pub fn is_sequence_header(&self) -> bool {
        self.kind == PictureKind::SequenceHeader
    }

    /// Whether this picture is a lone field.
    pub fn is_field(&self) -> bool {
        self.is_picture() && self.picture_structure.is_field() && !self.was_two_fields
    }

    /// Whether this is an I picture.
    pub fn is_i_picture(&self) -> bool {
        self.is_picture() && self.coding_type == Some(PictureCodingType::I)
    }

    /// Start offset and exact byte span of this picture's units.
    pub fn bounds(&self) -> Option<(EsOffset, u64, u32)> {
        let first = self.units.first()?;
        let last = self.units.last()?;
        Some((
            first.start,
            first.linear_start,
            (last.linear_end() - first.linear_start) as u32,
        ))
    }

    /// Whether two aggregates carry identical unit data (start positions
    /// are not compared).
    pub fn same_data(&self, other: &H262Picture) -> bool {
        self.units.len() == other.units.len()
            && self
                .units
                .iter()
                .zip(other.units.iter())
                .all(|(a, b)| a.data == b.data)
    }

    /// Append an item, folding extension fields into the picture state.
    fn push_item(&mut self, item: H262Item) {
        if item.is_extension() && item.unit.data.len() > 4 {
            let data = &item.unit.data;
            match (data[4] & 0xF0) >> 4 {
                SEQUENCE_EXTENSION_ID => {
                    if data.len() > 5 {
                        self.progressive_sequence = data[5] & 0x08 != 0;
                    }
                }
                PICTURE_CODING_EXTENSION_ID => {
                    if data.len() > 6 {
                        if let Some(structure) = PictureStructure::from_code(data[6] & 0x03) {
                            self.picture_structure = structure;
                        }
                    }
                }
                _ => {}
            }
        }
        self.units.push(item.unit);
    }
}

/// Extract the AFD byte from a "DTG1" user data item.
///
/// The whole flag byte is returned, reserved bits included. A malformed
/// item is reported and the apparent value still returned.
fn extract_afd(item: &H262Item) -> u8 {
    let data = &item.unit.data;
    match data[8] {
        0x41 => {
            if data.len() < 10 {
                warn!(len = data.len(), "AFD user data too short");
                return UNSET_AFD;
            }
            if data[9] & 0xF0 != 0xF0 {
                warn!(afd = data[9], "AFD reserved bits not set");
            }
            data[9]
        }
        0x01 => UNSET_AFD,
        flag => {
            warn!(flag, "malformed AFD user data flag byte");
            if data.len() >= 10 {
                data[9]
            } else {
                UNSET_AFD
            }
        }
    }
}

/// Build a synthetic AFD user data unit carrying `afd`, placed at the
/// given stream position.
fn fake_afd_unit(afd: u8, start: EsOffset, linear_start: u64) -> EsUnit {
    EsUnit {
        start_code: USER_DATA_START_CODE,
        start,
        linear_start,
        data: vec![
            0x00, 0x00, 0x01, 0xB2, 0x44, 0x54, 0x47, 0x31, 0x41, afd,
        ],
    }
}

/// Reads H.262 pictures from an ES unit stream.
pub struct H262FrameReader<S> {
    units: EsUnitReader<S>,
    held: Option<H262Item>,
    /// Index of the next picture, counted over coded pictures only.
    pub picture_index: u32,
    last_afd: u8,
    last_aspect_ratio: u8,
    /// When set, I pictures lacking stream AFD get a synthesised one.
    pub synthesize_afd: bool,
}

impl<S: EsByteSource> H262FrameReader<S> {
    /// Create a reader over an ES unit stream.
    pub fn new(units: EsUnitReader<S>) -> Self {
        Self {
            units,
            held: None,
            picture_index: 0,
            last_afd: UNSET_AFD,
            last_aspect_ratio: 0,
            synthesize_afd: false,
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

    fn next_item(&mut self) -> Result<Option<H262Item>> {
        if let Some(item) = self.held.take() {
            return Ok(Some(item));
        }
        Ok(self.units.next_unit()?.map(H262Item::new))
    }

    /// Read the next single picture, sequence header or sequence end,
    /// without field joining. `Ok(None)` at end of input.
    pub fn next_single_picture(&mut self) -> Result<Option<H262Picture>> {
        // Find the first item that opens an aggregate
        let first = loop {
            match self.next_item()? {
                None => return Ok(None),
                Some(item)
                    if item.is_picture() || item.is_sequence_header() || item.is_sequence_end() =>
                {
                    break item
                }
                Some(item) => {
                    debug!(code = item.unit.start_code, "skipping item between pictures");
                }
            }
        };

        let mut picture = self.begin_picture(&first)?;
        picture.push_item(first);

        if picture.kind == PictureKind::SequenceEnd {
            return Ok(Some(picture));
        }

        let in_picture = picture.kind == PictureKind::Picture;
        let mut last_was_slice = false;
        let mut had_afd = false;

        loop {
            let Some(item) = self.next_item()? else {
                // End of input closes the open aggregate
                break;
            };

            let done = if in_picture {
                last_was_slice && !item.is_slice()
            } else {
                !item.is_extension() && !item.is_user_data()
            };
            if done {
                self.held = Some(item);
                break;
            }

            if in_picture {
                if item.is_afd_user_data() {
                    picture.afd = extract_afd(&item);
                    picture.is_real_afd = true;
                    self.last_afd = picture.afd;
                    had_afd = true;
                } else if self.synthesize_afd && !had_afd && item.is_slice() {
                    // Before the first slice is the place the stream would
                    // have carried its AFD
                    picture.units.push(fake_afd_unit(
                        self.last_afd,
                        item.unit.start,
                        item.unit.linear_start,
                    ));
                    picture.afd = self.last_afd;
                    picture.is_real_afd = false;
                    had_afd = true;
                }
                last_was_slice = item.is_slice();
            }

            picture.push_item(item);
        }

        if in_picture {
            self.picture_index += 1;
        } else if picture.kind == PictureKind::SequenceHeader {
            self.last_aspect_ratio = picture.aspect_ratio_info;
        }

        Ok(Some(picture))
    }

    /// Set up an aggregate from its opening item.
    fn begin_picture(&mut self, first: &H262Item) -> Result<H262Picture> {
        let data = &first.unit.data;

        if first.is_picture() {
            if data.len() < 6 {
                return Err(H262Error::Malformed(format!(
                    "picture header of {} bytes",
                    data.len()
                )));
            }
            Ok(H262Picture {
                kind: PictureKind::Picture,
                coding_type: first.coding_type,
                temporal_reference: ((data[4] as u16) << 2) | ((data[5] as u16 & 0xC0) >> 6),
                // A frame until the picture coding extension says otherwise
                picture_structure: PictureStructure::Frame,
                was_two_fields: false,
                afd: self.last_afd,
                is_real_afd: false,
                aspect_ratio_info: self.last_aspect_ratio,
                progressive_sequence: true,
                units: Vec::new(),
            })
        } else if first.is_sequence_header() {
            if data.len() < 8 {
                return Err(H262Error::Malformed(format!(
                    "sequence header of {} bytes",
                    data.len()
                )));
            }
            Ok(H262Picture {
                kind: PictureKind::SequenceHeader,
                coding_type: None,
                temporal_reference: 0,
                picture_structure: PictureStructure::Frame,
                was_two_fields: false,
                afd: UNSET_AFD,
                is_real_afd: false,
                aspect_ratio_info: (data[7] & 0xF0) >> 4,
                progressive_sequence: true,
                units: Vec::new(),
            })
        } else {
            Ok(H262Picture {
                kind: PictureKind::SequenceEnd,
                coding_type: None,
                temporal_reference: 0,
                picture_structure: PictureStructure::Frame,
                was_two_fields: false,
                afd: UNSET_AFD,
                is_real_afd: false,
                aspect_ratio_info: 0,
                progressive_sequence: true,
                units: Vec::new(),
            })
        }
    }

    /// Read the next frame-level picture, joining field pairs.
    ///
    /// A field whose successor shares its temporal reference with a
    /// complementary structure is merged with it. A mismatched successor
    /// (same structure twice, or a differing temporal reference) drops
    /// the first field and restarts from the second; a frame or sequence
    /// header in place of the second field replaces the lone field.
    pub fn next_frame(&mut self) -> Result<Option<H262Picture>> {
        let Some(mut picture) = self.next_single_picture()? else {
            return Ok(None);
        };

        let mut retried = false;
        while picture.is_field() {
            let Some(second) = self.next_single_picture()? else {
                warn!("input ended between two fields; delivering the lone field");
                return Ok(Some(picture));
            };

            if !second.is_field() {
                warn!(
                    temporal_reference = picture.temporal_reference,
                    "field followed by a non-field; dropping the field"
                );
                picture = second;
            } else if second.temporal_reference == picture.temporal_reference
                && second.picture_structure != picture.picture_structure
            {
                debug!(
                    temporal_reference = picture.temporal_reference,
                    "merging two fields into a frame"
                );
                picture.units.extend(second.units);
                picture.was_two_fields = true;
            } else if !retried {
                warn!(
                    first = picture.temporal_reference,
                    second = second.temporal_reference,
                    "mismatched field pair; dropping the first field"
                );
                picture = second;
                retried = true;
            } else {
                return Err(H262Error::Malformed(
                    "adjacent fields do not pair up".to_string(),
                ));
            }
        }

        Ok(Some(picture))
    }
}
