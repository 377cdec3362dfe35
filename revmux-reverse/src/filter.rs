//! Forward filtering: fast-forward by keeping only decodable frames.
//!
//! Two modes per codec. *Strip* keeps every qualifying anchor frame.
//! *Rate select* aims for an apparent keep-every-Nth-frame output; when
//! a qualifying frame falls on a dropped slot, a repeat-last directive
//! keeps the output rate stable.

use crate::error::Result;
use revmux_es::EsByteSource;
use revmux_h262::{H262FrameReader, H262Picture, PictureCodingType};
use revmux_h264::{AccessUnit, AccessUnitReader};
use tracing::debug;

/// Filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Keep every qualifying frame.
    Strip {
        /// Also keep P / reference frames.
        allref: bool,
    },
    /// Keep roughly one frame in `freq`.
    Rate {
        /// Target spacing in frames.
        freq: u32,
    },
}

/// Outcome of a filter decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Output this frame.
    Keep,
    /// Discard this frame.
    Drop,
    /// Discard this frame but output the previous kept frame again.
    RepeatLast,
}

// ---------------------------------------------------------------------
// H.262
// ---------------------------------------------------------------------

/// Filter state for H.262 streams.
#[derive(Debug)]
pub struct H262Filter {
    mode: FilterMode,
    last_seq_hdr: Option<H262Picture>,
    new_seq_hdr: bool,
    had_previous: bool,
    count: u32,
    frames_seen: u32,
    frames_written: u32,
}

/// A filtered H.262 frame, or a repeat of the previous one.
#[derive(Debug)]
pub enum H262FilterEvent {
    /// Output this frame, preceded by the sequence header when present.
    Frame {
        /// Sequence header to re-emit first, when it changed.
        seq_hdr: Option<H262Picture>,
        /// The frame itself.
        frame: H262Picture,
    },
    /// Output the previously emitted frame again.
    RepeatLast,
}

impl H262Filter {
    /// A strip-mode filter.
    pub fn strip(allref: bool) -> Self {
        Self::new(FilterMode::Strip { allref })
    }

    /// A rate-select filter keeping about one frame in `freq`.
    pub fn rate(freq: u32) -> Self {
        Self::new(FilterMode::Rate { freq })
    }

    fn new(mode: FilterMode) -> Self {
        Self {
            mode,
            last_seq_hdr: None,
            new_seq_hdr: false,
            had_previous: false,
            count: 0,
            frames_seen: 0,
            frames_written: 0,
        }
    }

    /// Frames seen so far.
    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    /// Frames written (kept plus repeats).
    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    /// Decide one picture's fate. Separated from I/O so the policy is
    /// directly testable.
    pub fn decide(&mut self, coding_type: Option<PictureCodingType>) -> FilterDecision {
        self.frames_seen += 1;
        match self.mode {
            FilterMode::Strip { allref } => match coding_type {
                Some(PictureCodingType::I) => {
                    self.frames_written += 1;
                    FilterDecision::Keep
                }
                Some(PictureCodingType::P) if allref => {
                    self.frames_written += 1;
                    FilterDecision::Keep
                }
                _ => FilterDecision::Drop,
            },
            FilterMode::Rate { freq } => {
                self.count += 1;
                let keep =
                    coding_type == Some(PictureCodingType::I) && self.count >= freq.max(1);
                if keep {
                    self.count = 0;
                    self.had_previous = true;
                    self.frames_written += 1;
                    return FilterDecision::Keep;
                }
                self.maybe_repeat(freq)
            }
        }
    }

    fn maybe_repeat(&mut self, freq: u32) -> FilterDecision {
        if freq > 0 && self.had_previous {
            let wanted = self.frames_seen / freq;
            if wanted > self.frames_written {
                self.frames_written += 1;
                return FilterDecision::RepeatLast;
            }
        }
        FilterDecision::Drop
    }

    /// Read frames until one passes the filter.
    ///
    /// In rate mode, I pictures are given a synthesised AFD when the
    /// source omitted one.
    pub fn next_frame<S: EsByteSource>(
        &mut self,
        reader: &mut H262FrameReader<S>,
    ) -> Result<Option<H262FilterEvent>> {
        let rate_mode = matches!(self.mode, FilterMode::Rate { .. });
        reader.synthesize_afd = rate_mode;

        loop {
            let Some(picture) = reader.next_frame()? else {
                reader.synthesize_afd = false;
                return Ok(None);
            };

            if picture.is_sequence_header() {
                let changed = self
                    .last_seq_hdr
                    .as_ref()
                    .map(|last| !last.same_data(&picture))
                    .unwrap_or(true);
                if changed {
                    debug!("new sequence header");
                    self.last_seq_hdr = Some(picture);
                    self.new_seq_hdr = true;
                }
                continue;
            }
            if !picture.is_picture() {
                continue;
            }

            match self.decide(picture.coding_type) {
                FilterDecision::Keep => {
                    // Strip mode re-emits the header only when it changed;
                    // rate mode always pairs the frame with its header
                    let seq_hdr = if rate_mode {
                        self.last_seq_hdr.clone()
                    } else if self.new_seq_hdr {
                        self.new_seq_hdr = false;
                        self.last_seq_hdr.clone()
                    } else {
                        None
                    };
                    reader.synthesize_afd = false;
                    return Ok(Some(H262FilterEvent::Frame {
                        seq_hdr,
                        frame: picture,
                    }));
                }
                FilterDecision::RepeatLast => {
                    reader.synthesize_afd = false;
                    return Ok(Some(H262FilterEvent::RepeatLast));
                }
                FilterDecision::Drop => {}
            }
        }
    }
}

// ---------------------------------------------------------------------
// H.264
// ---------------------------------------------------------------------

/// The access unit facts the H.264 filter decides on.
#[derive(Debug, Clone, Copy)]
pub struct FrameClass {
    /// The unit has a primary coded picture.
    pub has_primary: bool,
    /// nal_ref_idc of the primary slice is non-zero.
    pub is_reference: bool,
    /// The primary picture is an IDR.
    pub is_idr: bool,
    /// Every slice is I.
    pub all_i: bool,
    /// Every slice is I or P.
    pub all_i_or_p: bool,
}

impl From<&AccessUnit> for FrameClass {
    fn from(au: &AccessUnit) -> Self {
        Self {
            has_primary: au.primary_slice().is_some(),
            is_reference: au.is_reference(),
            is_idr: au.is_idr(),
            all_i: au.all_slices_i(),
            all_i_or_p: au.all_slices_i_or_p(),
        }
    }
}

/// A filtered H.264 access unit, or a repeat of the previous one.
#[derive(Debug)]
pub enum H264FilterEvent {
    /// Output this access unit.
    Frame(AccessUnit),
    /// Output the previously emitted access unit again.
    RepeatLast,
}

/// Filter state for H.264 streams.
#[derive(Debug)]
pub struct H264Filter {
    mode: FilterMode,
    /// A reference picture has been dropped since the last IDR, so P
    /// frames would no longer decode.
    skipped_ref: bool,
    /// The last kept frame was not an IDR; the next IDR is kept
    /// unconditionally.
    last_kept_not_idr: bool,
    /// No IDR has been kept yet in this run.
    no_idr_yet: bool,
    had_previous: bool,
    count: u32,
    frames_seen: u32,
    frames_written: u32,
}

impl H264Filter {
    /// A strip-mode filter.
    pub fn strip(allref: bool) -> Self {
        Self::new(FilterMode::Strip { allref })
    }

    /// A rate-select filter keeping about one frame in `freq`.
    pub fn rate(freq: u32) -> Self {
        Self::new(FilterMode::Rate { freq })
    }

    fn new(mode: FilterMode) -> Self {
        Self {
            mode,
            skipped_ref: false,
            last_kept_not_idr: true,
            no_idr_yet: true,
            had_previous: false,
            count: 0,
            frames_seen: 0,
            frames_written: 0,
        }
    }

    /// Frames seen so far.
    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    /// Frames written (kept plus repeats).
    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    /// Decide one access unit's fate.
    pub fn decide(&mut self, class: &FrameClass) -> FilterDecision {
        self.frames_seen += 1;
        match self.mode {
            FilterMode::Strip { allref } => self.decide_strip(class, allref),
            FilterMode::Rate { freq } => self.decide_rate(class, freq),
        }
    }

    fn decide_strip(&mut self, class: &FrameClass, allref: bool) -> FilterDecision {
        let keep = if !class.has_primary || !class.is_reference {
            false
        } else if allref {
            true
        } else {
            class.is_idr || class.all_i
        };
        if keep {
            self.frames_written += 1;
            FilterDecision::Keep
        } else {
            FilterDecision::Drop
        }
    }

    fn decide_rate(&mut self, class: &FrameClass, freq: u32) -> FilterDecision {
        self.count += 1;

        let keep = if !class.has_primary || !class.is_reference {
            false
        } else if class.is_idr && (self.last_kept_not_idr || self.no_idr_yet) {
            // IDRs are the limit for backward references; keep this one
            // regardless of the count
            self.no_idr_yet = false;
            self.skipped_ref = false;
            self.last_kept_not_idr = false;
            true
        } else if self.count < freq {
            // Too soon - and a reference picture is being dropped
            self.skipped_ref = true;
            false
        } else if class.is_idr {
            self.skipped_ref = false;
            self.last_kept_not_idr = false;
            true
        } else if class.all_i {
            self.last_kept_not_idr = true;
            true
        } else if !self.skipped_ref && class.all_i_or_p {
            // Every reference since the last IDR was kept, so this P
            // still decodes
            self.last_kept_not_idr = true;
            true
        } else {
            self.skipped_ref = true;
            false
        };

        if keep {
            self.count = 0;
            self.had_previous = true;
            self.frames_written += 1;
            return FilterDecision::Keep;
        }

        if freq > 0 && self.had_previous {
            let wanted = self.frames_seen / freq;
            if wanted > self.frames_written {
                self.frames_written += 1;
                return FilterDecision::RepeatLast;
            }
        }
        FilterDecision::Drop
    }

    /// Read access units until one passes the filter.
    pub fn next_frame<S: EsByteSource>(
        &mut self,
        reader: &mut AccessUnitReader<S>,
    ) -> Result<Option<H264FilterEvent>> {
        loop {
            let Some(au) = reader.next_access_unit()? else {
                return Ok(None);
            };

            match self.decide(&FrameClass::from(&au)) {
                FilterDecision::Keep => return Ok(Some(H264FilterEvent::Frame(au))),
                FilterDecision::RepeatLast => return Ok(Some(H264FilterEvent::RepeatLast)),
                FilterDecision::Drop => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idr() -> FrameClass {
        FrameClass {
            has_primary: true,
            is_reference: true,
            is_idr: true,
            all_i: true,
            all_i_or_p: true,
        }
    }

    fn i_frame() -> FrameClass {
        FrameClass {
            has_primary: true,
            is_reference: true,
            is_idr: false,
            all_i: true,
            all_i_or_p: true,
        }
    }

    fn p_frame() -> FrameClass {
        FrameClass {
            has_primary: true,
            is_reference: true,
            is_idr: false,
            all_i: false,
            all_i_or_p: true,
        }
    }

    #[test]
    fn test_h264_rate_select_sequence() {
        // IDR P P P I P P P IDR P with freq 4: the first IDR, the I at
        // index 4, and the IDR at index 8 are kept
        let stream = [
            idr(),
            p_frame(),
            p_frame(),
            p_frame(),
            i_frame(),
            p_frame(),
            p_frame(),
            p_frame(),
            idr(),
            p_frame(),
        ];

        let mut filter = H264Filter::rate(4);
        let kept: Vec<usize> = stream
            .iter()
            .enumerate()
            .filter(|&(_, class)| filter.decide(class) == FilterDecision::Keep)
            .map(|(index, _)| index)
            .collect();

        assert_eq!(kept, vec![0, 4, 8]);
    }

    #[test]
    fn test_h264_rate_drops_p_after_skipped_reference() {
        // Once a reference frame is dropped, later P frames cannot be
        // kept until an IDR resets the chain
        let mut filter = H264Filter::rate(2);
        assert_eq!(filter.decide(&idr()), FilterDecision::Keep);
        assert_ne!(filter.decide(&p_frame()), FilterDecision::Keep); // too soon
        assert_ne!(filter.decide(&p_frame()), FilterDecision::Keep); // skipped ref
        assert_ne!(filter.decide(&p_frame()), FilterDecision::Keep);
        assert_eq!(filter.decide(&idr()), FilterDecision::Keep);
    }

    #[test]
    fn test_h264_rate_keeps_p_when_chain_unbroken() {
        let mut filter = H264Filter::rate(1);
        assert_eq!(filter.decide(&idr()), FilterDecision::Keep);
        // freq 1: nothing is ever "too soon", P chain stays intact
        assert_eq!(filter.decide(&p_frame()), FilterDecision::Keep);
        assert_eq!(filter.decide(&p_frame()), FilterDecision::Keep);
    }

    #[test]
    fn test_h264_strip_modes() {
        let mut strip = H264Filter::strip(false);
        assert_eq!(strip.decide(&idr()), FilterDecision::Keep);
        assert_eq!(strip.decide(&p_frame()), FilterDecision::Drop);
        assert_eq!(strip.decide(&i_frame()), FilterDecision::Keep);

        let mut strip_ref = H264Filter::strip(true);
        assert_eq!(strip_ref.decide(&idr()), FilterDecision::Keep);
        assert_eq!(strip_ref.decide(&p_frame()), FilterDecision::Keep);

        let non_ref = FrameClass {
            has_primary: true,
            is_reference: false,
            is_idr: false,
            all_i: false,
            all_i_or_p: false,
        };
        assert_eq!(strip_ref.decide(&non_ref), FilterDecision::Drop);
    }

    #[test]
    fn test_h264_rate_repeats_to_hold_rate() {
        let mut filter = H264Filter::rate(2);
        assert_eq!(filter.decide(&idr()), FilterDecision::Keep); // written 1, seen 1
        assert_eq!(filter.decide(&p_frame()), FilterDecision::Drop); // seen 2, wanted 1
        assert_eq!(filter.decide(&p_frame()), FilterDecision::Drop); // seen 3, wanted 1
        assert_eq!(filter.decide(&p_frame()), FilterDecision::RepeatLast); // seen 4, wanted 2
    }

    #[test]
    fn test_h262_strip() {
        let mut filter = H262Filter::strip(false);
        assert_eq!(
            filter.decide(Some(PictureCodingType::I)),
            FilterDecision::Keep
        );
        assert_eq!(
            filter.decide(Some(PictureCodingType::P)),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.decide(Some(PictureCodingType::B)),
            FilterDecision::Drop
        );

        let mut allref = H262Filter::strip(true);
        assert_eq!(
            allref.decide(Some(PictureCodingType::P)),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_h262_rate_counts_all_pictures() {
        let mut filter = H262Filter::rate(3);
        // I B B I B B: second I lands on the third slot and is kept
        assert_eq!(
            filter.decide(Some(PictureCodingType::I)),
            FilterDecision::Drop
        ); // count 1: too soon
        assert_eq!(
            filter.decide(Some(PictureCodingType::B)),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.decide(Some(PictureCodingType::I)),
            FilterDecision::Keep
        ); // count 3
        assert_eq!(
            filter.decide(Some(PictureCodingType::B)),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.decide(Some(PictureCodingType::B)),
            FilterDecision::Drop
        );
        // Rate deficit: seen 6, freq 3, wanted 2, written 1 -> repeat
        assert_eq!(
            filter.decide(Some(PictureCodingType::B)),
            FilterDecision::RepeatLast
        );
    }

    #[test]
    fn test_strip_is_idempotent() {
        // Stripping an already-stripped sequence changes nothing
        let stream = [idr(), p_frame(), i_frame(), p_frame(), idr()];

        let mut first = H264Filter::strip(false);
        let kept: Vec<FrameClass> = stream
            .iter()
            .filter(|&c| first.decide(c) == FilterDecision::Keep)
            .cloned()
            .collect();

        let mut second = H264Filter::strip(false);
        let kept_again: Vec<FrameClass> = kept
            .iter()
            .filter(|&c| second.decide(c) == FilterDecision::Keep)
            .cloned()
            .collect();

        assert_eq!(kept.len(), kept_again.len());
    }
}
