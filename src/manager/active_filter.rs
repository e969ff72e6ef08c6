//! Per-filter wrapper and the data frame handed through a chain.

use std::collections::VecDeque;

use bytes::BytesMut;

use crate::buffer::WatermarkBuffer;
use crate::http::MetadataMap;

use super::state::IterationState;

/// One configured filter plus the bookkeeping the stream keeps for it.
pub(crate) struct ActiveFilter<F: ?Sized> {
    /// `None` while the filter is executing a callback.
    pub(crate) handle: Option<Box<F>>,
    pub(crate) name: &'static str,
    pub(crate) iteration_state: IterationState,
    pub(crate) iterate_from_current_filter: bool,
    pub(crate) headers_continued: bool,
    /// Encoder only: this filter let `100 Continue` through.
    pub(crate) continue_headers_continued: bool,
    /// The headers callback has returned for this filter.
    pub(crate) headers_called: bool,
    /// This filter has seen its direction's final frame.
    pub(crate) end_stream: bool,
    pub(crate) saved_metadata: VecDeque<MetadataMap>,
}

impl<F: ?Sized> ActiveFilter<F> {
    pub(crate) fn new(handle: Box<F>, name: &'static str) -> Self {
        Self {
            handle: Some(handle),
            name,
            iteration_state: IterationState::Continue,
            iterate_from_current_filter: false,
            headers_continued: false,
            continue_headers_continued: false,
            headers_called: false,
            end_stream: false,
            saved_metadata: VecDeque::new(),
        }
    }

    pub(crate) fn can_iterate(&self) -> bool {
        self.iteration_state.can_iterate()
    }

    pub(crate) fn stopped_all(&self) -> bool {
        self.iteration_state.stopped_all()
    }

    pub(crate) fn allow_iteration(&mut self) {
        self.iteration_state = IterationState::Continue;
    }
}

/// The payload of a data dispatch.
///
/// A fresh frame comes from the codec, a filter injection, or an inline
/// add; a buffered frame is the stream's own body buffer, lifted out of its
/// slot for the length of the dispatch and put back afterwards.
#[derive(Debug)]
pub(crate) enum DataFrame {
    Fresh(BytesMut),
    Buffered(WatermarkBuffer),
}

impl DataFrame {
    pub(crate) fn bytes_mut(&mut self) -> &mut BytesMut {
        match self {
            DataFrame::Fresh(bytes) => bytes,
            DataFrame::Buffered(buffer) => buffer.bytes_mut(),
        }
    }

    pub(crate) fn is_buffered(&self) -> bool {
        matches!(self, DataFrame::Buffered(_))
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            DataFrame::Fresh(bytes) => bytes.len(),
            DataFrame::Buffered(buffer) => buffer.len(),
        }
    }
}
