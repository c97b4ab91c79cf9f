use moqt_wire::full_sequence::FullSequence;
use moqt_wire::messages::control_messages::subscribe::FilterType;

/// Admission predicate on `(group, object)` for one subscription.
///
/// The end, when present, is inclusive; an end with `object == u64::MAX`
/// runs to the end of its group. Subgroups do not participate in the
/// comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeWindow {
    start: FullSequence,
    end: Option<FullSequence>,
}

impl SubscribeWindow {
    pub fn new(start: FullSequence) -> Self {
        Self { start, end: None }
    }

    pub fn bounded(start: FullSequence, end: FullSequence) -> Self {
        debug_assert!((start.group, start.object) <= (end.group, end.object));
        Self {
            start,
            end: Some(end),
        }
    }

    /// Resolves a SUBSCRIBE filter against the publisher's largest
    /// sequence, `(0, 0)` when the publisher has no data yet.
    pub fn from_filter(
        filter_type: FilterType,
        start_group: Option<u64>,
        start_object: Option<u64>,
        end_group: Option<u64>,
        end_object: Option<u64>,
        largest: FullSequence,
    ) -> Self {
        match filter_type {
            FilterType::LatestGroup => Self::new(FullSequence::new(largest.group, 0)),
            FilterType::LatestObject => Self::new(FullSequence::new(largest.group, largest.object)),
            FilterType::AbsoluteStart => Self::new(FullSequence::new(
                start_group.unwrap_or(0),
                start_object.unwrap_or(0),
            )),
            FilterType::AbsoluteRange => Self::bounded(
                FullSequence::new(start_group.unwrap_or(0), start_object.unwrap_or(0)),
                FullSequence::new(end_group.unwrap_or(0), end_object.unwrap_or(u64::MAX)),
            ),
        }
    }

    pub fn in_window(&self, sequence: FullSequence) -> bool {
        if (sequence.group, sequence.object) < (self.start.group, self.start.object) {
            return false;
        }
        match &self.end {
            None => true,
            Some(end) => (sequence.group, sequence.object) <= (end.group, end.object),
        }
    }

    /// Updates are additive in protocol terms; narrowing may strand
    /// streams outside the window, which their next write detects.
    pub fn update_start_end(&mut self, start: FullSequence, end: Option<FullSequence>) {
        self.start = start;
        self.end = end;
    }

    pub fn start(&self) -> FullSequence {
        self.start
    }

    pub fn end(&self) -> Option<FullSequence> {
        self.end
    }
}

#[cfg(test)]
mod success {
    use super::*;

    #[test]
    fn unbounded_window() {
        let window = SubscribeWindow::new(FullSequence::new(4, 0));

        assert!(!window.in_window(FullSequence::new(3, 12)));
        assert!(window.in_window(FullSequence::new(4, 0)));
        assert!(window.in_window(FullSequence::new(1000, 0)));
    }

    #[test]
    fn bounded_window() {
        let window =
            SubscribeWindow::bounded(FullSequence::new(4, 0), FullSequence::new(6, u64::MAX));

        assert!(window.in_window(FullSequence::new(6, 9999)));
        assert!(!window.in_window(FullSequence::new(7, 0)));
    }

    #[test]
    fn subgroup_is_ignored() {
        let window = SubscribeWindow::bounded(FullSequence::new(5, 0), FullSequence::new(5, 3));

        assert!(window.in_window(FullSequence::with_subgroup(5, 9, 2)));
        assert!(!window.in_window(FullSequence::with_subgroup(5, 0, 4)));
    }

    #[test]
    fn filter_resolution() {
        let largest = FullSequence::new(5, 3);

        let window = SubscribeWindow::from_filter(
            FilterType::LatestGroup,
            None,
            None,
            None,
            None,
            largest,
        );
        assert_eq!(window.start(), FullSequence::new(5, 0));
        assert_eq!(window.end(), None);

        let window = SubscribeWindow::from_filter(
            FilterType::LatestObject,
            None,
            None,
            None,
            None,
            largest,
        );
        assert_eq!(window.start(), FullSequence::new(5, 3));

        let window = SubscribeWindow::from_filter(
            FilterType::AbsoluteRange,
            Some(5),
            Some(0),
            Some(8),
            None,
            largest,
        );
        assert!(window.in_window(FullSequence::new(8, 100)));
        assert!(!window.in_window(FullSequence::new(9, 0)));
    }

    #[test]
    fn narrowing_update() {
        let mut window = SubscribeWindow::new(FullSequence::new(0, 0));
        window.update_start_end(FullSequence::new(4, 0), Some(FullSequence::new(5, u64::MAX)));

        assert!(!window.in_window(FullSequence::new(3, 0)));
        assert!(window.in_window(FullSequence::new(5, 7)));
        assert!(!window.in_window(FullSequence::new(6, 0)));
    }
}
