use crate::modules::publisher::FetchTask;
use crate::modules::transport::StreamId;

/// One accepted incoming FETCH: the task that yields its objects and,
/// once opened, the single stream that drains it. Keyed in the session
/// by its subscribe id.
pub(crate) struct PublishedFetch {
    fetch_task: Box<dyn FetchTask>,
    stream_id: Option<StreamId>,
}

impl PublishedFetch {
    pub(crate) fn new(fetch_task: Box<dyn FetchTask>) -> Self {
        Self {
            fetch_task,
            stream_id: None,
        }
    }

    pub(crate) fn fetch_task(&mut self) -> &mut dyn FetchTask {
        self.fetch_task.as_mut()
    }

    pub(crate) fn set_stream_id(&mut self, stream_id: StreamId) {
        self.stream_id = Some(stream_id);
    }

    pub(crate) fn stream_id(&self) -> Option<StreamId> {
        self.stream_id
    }
}

/// Write-side state of a fetch's output stream.
pub(crate) struct FetchStream {
    pub(crate) stream_id: StreamId,
    pub(crate) fetch_id: u64,
    pub(crate) stream_header_written: bool,
}

impl FetchStream {
    pub(crate) fn new(stream_id: StreamId, fetch_id: u64) -> Self {
        Self {
            stream_id,
            fetch_id,
            stream_header_written: false,
        }
    }
}
