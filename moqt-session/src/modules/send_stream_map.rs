use std::collections::HashMap;

use moqt_wire::full_sequence::FullSequence;

use crate::modules::publisher::ForwardingPreference;
use crate::modules::transport::StreamId;

/// The coordinate subset that indexes a single carrier stream, derived
/// from the track's forwarding preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReducedSequenceIndex {
    group: u64,
    subgroup: u64,
}

impl ReducedSequenceIndex {
    pub fn new(sequence: FullSequence, preference: ForwardingPreference) -> Self {
        match preference {
            ForwardingPreference::Track => ReducedSequenceIndex {
                group: 0,
                subgroup: 0,
            },
            ForwardingPreference::Subgroup => ReducedSequenceIndex {
                group: sequence.group,
                subgroup: sequence.subgroup,
            },
            ForwardingPreference::Datagram => {
                debug_assert!(false, "datagram tracks have no stream mapping");
                ReducedSequenceIndex {
                    group: sequence.group,
                    subgroup: sequence.object,
                }
            }
        }
    }

    pub fn group(&self) -> u64 {
        self.group
    }
}

/// Maps object coordinates to the outgoing stream carrying them, for one
/// subscription.
#[derive(Debug)]
pub struct SendStreamMap {
    preference: ForwardingPreference,
    streams: HashMap<ReducedSequenceIndex, StreamId>,
}

impl SendStreamMap {
    pub fn new(preference: ForwardingPreference) -> Self {
        SendStreamMap {
            preference,
            streams: HashMap::new(),
        }
    }

    pub fn add_stream(&mut self, first_sequence: FullSequence, stream_id: StreamId) {
        let index = ReducedSequenceIndex::new(first_sequence, self.preference);
        let replaced = self.streams.insert(index, stream_id);
        debug_assert!(replaced.is_none(), "two streams for one mapping unit");
    }

    pub fn remove_stream(&mut self, end_sequence: FullSequence, stream_id: StreamId) {
        let index = ReducedSequenceIndex::new(end_sequence, self.preference);
        if let Some(existing) = self.streams.get(&index) {
            if *existing == stream_id {
                self.streams.remove(&index);
            }
        }
    }

    pub fn get_stream_for_sequence(&self, sequence: FullSequence) -> Option<StreamId> {
        let index = ReducedSequenceIndex::new(sequence, self.preference);
        self.streams.get(&index).copied()
    }

    pub fn get_streams_for_group(&self, group_id: u64) -> Vec<StreamId> {
        self.streams
            .iter()
            .filter(|(index, _)| index.group == group_id)
            .map(|(_, stream_id)| *stream_id)
            .collect()
    }

    pub fn all_streams(&self) -> Vec<StreamId> {
        self.streams.values().copied().collect()
    }
}

#[cfg(test)]
mod success {
    use super::*;

    #[test]
    fn subgroup_preference_maps_per_subgroup() {
        let mut map = SendStreamMap::new(ForwardingPreference::Subgroup);
        map.add_stream(FullSequence::with_subgroup(5, 0, 0), 2);
        map.add_stream(FullSequence::with_subgroup(5, 1, 0), 6);
        map.add_stream(FullSequence::with_subgroup(6, 0, 0), 10);

        assert_eq!(
            map.get_stream_for_sequence(FullSequence::with_subgroup(5, 1, 4)),
            Some(6)
        );
        assert_eq!(
            map.get_stream_for_sequence(FullSequence::with_subgroup(7, 0, 0)),
            None
        );

        let mut group_streams = map.get_streams_for_group(5);
        group_streams.sort_unstable();
        assert_eq!(group_streams, vec![2, 6]);
        assert_eq!(map.all_streams().len(), 3);
    }

    #[test]
    fn track_preference_maps_whole_track() {
        let mut map = SendStreamMap::new(ForwardingPreference::Track);
        map.add_stream(FullSequence::new(0, 0), 2);

        assert_eq!(
            map.get_stream_for_sequence(FullSequence::new(17, 99)),
            Some(2)
        );
    }

    #[test]
    fn remove_stream_checks_identity() {
        let mut map = SendStreamMap::new(ForwardingPreference::Subgroup);
        map.add_stream(FullSequence::with_subgroup(5, 0, 0), 2);

        map.remove_stream(FullSequence::with_subgroup(5, 0, 9), 3);
        assert_eq!(
            map.get_stream_for_sequence(FullSequence::with_subgroup(5, 0, 0)),
            Some(2)
        );

        map.remove_stream(FullSequence::with_subgroup(5, 0, 9), 2);
        assert_eq!(
            map.get_stream_for_sequence(FullSequence::with_subgroup(5, 0, 0)),
            None
        );
    }
}
