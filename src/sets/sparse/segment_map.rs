use std::{fmt, sync::OnceLock};

use crate::sets::sparse::Segment;

/// One slot of the segment map: empty until a segment is installed, then
/// holding that same segment for the rest of the bit set's life.
#[derive(Default)]
pub struct SegmentMapEntry {
    segment: OnceLock<Box<Segment>>,
}

impl SegmentMapEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The installed segment, if any. Never blocks.
    #[inline]
    pub fn get(&self) -> Option<&Segment> {
        self.segment.get().map(Box::as_ref)
    }

    /// Installs `segment` and returns a reference to it.
    ///
    /// Installation happens once: when the slot is already occupied the
    /// passed segment is dropped and the segment that was there first comes
    /// back as the error. Callers hold the bit set's creation lock so that
    /// only one segment is ever built per slot.
    pub fn set(&self, segment: Box<Segment>) -> Result<&Segment, &Segment> {
        let mut installed = false;
        let held: &Segment = self.segment.get_or_init(|| {
            installed = true;
            segment
        });
        if installed { Ok(held) } else { Err(held) }
    }

    pub fn is_empty(&self) -> bool {
        self.segment.get().is_none()
    }
}

/// `-` when empty, the segment's rendering otherwise.
impl fmt::Display for SegmentMapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(segment) => write!(f, "{segment}"),
            None => f.write_str("-"),
        }
    }
}

impl fmt::Debug for SegmentMapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SegmentMapEntry").field(&self.get()).finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::statistics::Metrics;
    use std::sync::Arc;

    fn new_segment() -> Box<Segment> {
        Box::new(Segment::new(13, Arc::new(Metrics::new())))
    }

    #[test]
    fn new_entry_is_empty() {
        let entry = SegmentMapEntry::new();
        assert!(entry.is_empty());
        assert!(entry.get().is_none());
        assert_eq!(entry.to_string(), "-");
    }

    #[test]
    fn set_installs_and_exposes_the_segment() {
        let entry = SegmentMapEntry::new();
        let installed = entry.set(new_segment()).unwrap();
        installed.set(3, true);

        assert!(!entry.is_empty());
        assert!(entry.get().unwrap().get(3));
        assert!(std::ptr::eq(installed, entry.get().unwrap()));
    }

    #[test]
    fn second_set_is_rejected_and_first_segment_kept() {
        let entry = SegmentMapEntry::new();
        entry.set(new_segment()).unwrap().set(1, true);

        let existing = entry.set(new_segment()).unwrap_err();
        assert!(existing.get(1));
        assert!(std::ptr::eq(existing, entry.get().unwrap()));
    }

    #[test]
    fn renders_held_segment() {
        let entry = SegmentMapEntry::new();
        entry.set(new_segment()).unwrap().set(0, true);
        assert_eq!(entry.to_string(), "[[10000000],-]");
    }
}
