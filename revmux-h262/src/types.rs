//! H.262 start codes and header field types.

/// Picture start code.
pub const PICTURE_START_CODE: u8 = 0x00;
/// First slice start code.
pub const SLICE_START_CODE_MIN: u8 = 0x01;
/// Last slice start code.
pub const SLICE_START_CODE_MAX: u8 = 0xAF;
/// User data start code (AFD lives here).
pub const USER_DATA_START_CODE: u8 = 0xB2;
/// Sequence header start code.
pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;
/// Extension start code.
pub const EXTENSION_START_CODE: u8 = 0xB5;
/// Sequence end start code.
pub const SEQUENCE_END_CODE: u8 = 0xB7;
/// Group-of-pictures start code.
pub const GOP_START_CODE: u8 = 0xB8;

/// Extension start code identifier for a sequence extension.
pub const SEQUENCE_EXTENSION_ID: u8 = 1;
/// Extension start code identifier for a picture coding extension.
pub const PICTURE_CODING_EXTENSION_ID: u8 = 8;

/// AFD value meaning "no AFD seen yet": reserved bits set, active format
/// "same as the coded frame".
pub const UNSET_AFD: u8 = 0xF8;

/// Picture coding type from the picture header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PictureCodingType {
    /// Intra-coded.
    I = 1,
    /// Predictive-coded.
    P = 2,
    /// Bidirectionally predictive-coded.
    B = 3,
    /// DC intra-coded (MPEG-1 only).
    D = 4,
}

impl PictureCodingType {
    /// Create from the 3-bit header field.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PictureCodingType::I),
            2 => Some(PictureCodingType::P),
            3 => Some(PictureCodingType::B),
            4 => Some(PictureCodingType::D),
            _ => None,
        }
    }

    /// Short name for reporting.
    pub fn name(&self) -> &'static str {
        match self {
            PictureCodingType::I => "I",
            PictureCodingType::P => "P",
            PictureCodingType::B => "B",
            PictureCodingType::D => "D",
        }
    }
}

/// Picture structure from the picture coding extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PictureStructure {
    /// Top field.
    TopField = 1,
    /// Bottom field.
    BottomField = 2,
    /// Frame picture.
    Frame = 3,
}

impl PictureStructure {
    /// Create from the 2-bit extension field.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PictureStructure::TopField),
            2 => Some(PictureStructure::BottomField),
            3 => Some(PictureStructure::Frame),
            _ => None,
        }
    }

    /// Whether this is a field (not a frame) structure.
    pub fn is_field(&self) -> bool {
        !matches!(self, PictureStructure::Frame)
    }
}

/// Whether a start code is in the slice range.
pub fn is_slice_start_code(code: u8) -> bool {
    (SLICE_START_CODE_MIN..=SLICE_START_CODE_MAX).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_range() {
        assert!(is_slice_start_code(0x01));
        assert!(is_slice_start_code(0xAF));
        assert!(!is_slice_start_code(PICTURE_START_CODE));
        assert!(!is_slice_start_code(0xB0));
    }

    #[test]
    fn test_coding_type() {
        assert_eq!(PictureCodingType::from_code(1), Some(PictureCodingType::I));
        assert_eq!(PictureCodingType::from_code(0), None);
        assert_eq!(PictureCodingType::from_code(7), None);
        assert_eq!(PictureCodingType::P.name(), "P");
    }

    #[test]
    fn test_picture_structure() {
        assert!(PictureStructure::TopField.is_field());
        assert!(!PictureStructure::Frame.is_field());
        assert_eq!(PictureStructure::from_code(0), None);
    }
}
