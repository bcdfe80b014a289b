//! `Label`: an indexed out-of-band annotation carried alongside a stream (§4.E).

use crate::message::Message;

/// An annotation tagged with a position in the stream.
///
/// A block posts labels with indices relative to elements produced so far in
/// the current `work()` call; the owning actor converts these to absolute
/// indices (cumulative elements produced on that port) before they reach any
/// subscriber. On the receiving side, indices are presented relative to the
/// currently visible input buffer (absolute minus elements already consumed).
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// Stream-relative index this label annotates.
    pub index: u64,
    /// Optional width, for labels that mark a frame rather than a point
    /// (e.g. a frame-start label carrying its frame's length).
    pub width: Option<u64>,
    /// Arbitrary payload carried by the label.
    pub key: String,
    /// The label's value.
    pub value: Message,
}

impl Label {
    /// Constructs a point label (no width) at `index`.
    pub fn new(index: u64, key: impl Into<String>, value: Message) -> Self {
        Label { index, width: None, key: key.into(), value }
    }

    /// Constructs a frame label spanning `[index, index + width)`.
    pub fn framed(index: u64, width: u64, key: impl Into<String>, value: Message) -> Self {
        Label { index, width: Some(width), key: key.into(), value }
    }

    /// Returns a copy of this label with its index and (if present) width
    /// scaled by the resampling ratio `(l, m)`: `index' = index * l / m`.
    /// Used by the default `propagateLabels` policy for interpolation /
    /// decimation blocks.
    pub fn resample(&self, l: u64, m: u64) -> Label {
        Label {
            index: self.index.saturating_mul(l) / m.max(1),
            width: self.width.map(|w| w.saturating_mul(l) / m.max(1)),
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }

    /// Rebases this label's index from absolute stream position to an
    /// offset into a buffer whose first visible element is `consumed`.
    pub fn relative_to(&self, consumed: u64) -> Label {
        Label { index: self.index.saturating_sub(consumed), ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_scales_index_and_width() {
        let l = Label::framed(10, 4, "frame", Message::Unit);
        let r = l.resample(1, 2); // decimation by 2
        assert_eq!(r.index, 5);
        assert_eq!(r.width, Some(2));
    }

    #[test]
    fn relative_to_offsets_index() {
        let l = Label::new(100, "x", Message::Unit);
        assert_eq!(l.relative_to(40).index, 60);
    }
}
