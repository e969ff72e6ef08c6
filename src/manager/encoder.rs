//! Response-path dispatch. Mirrors the request path and adds informational
//! `100 Continue` headers, which run ahead of everything else.

use bytes::BytesMut;

use crate::filter::{FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus};
use crate::http::{MetadataMap, TrailerMap};

use super::active_filter::DataFrame;
use super::state::{record_latest_data_filter, FilterCall, FilterIterationStartState, IterationState};
use super::FilterManager;

impl FilterManager {
    fn encode_start(&self, filter: Option<usize>, start: FilterIterationStartState) -> usize {
        match filter {
            None => 0,
            Some(index)
                if start == FilterIterationStartState::CanStartFromCurrent
                    && self.encoder_filters[index].iterate_from_current_filter =>
            {
                index
            }
            Some(index) => index + 1,
        }
    }

    /// Entry point shared by the response frame dispatches. A dispatch that
    /// does not come from a filter is a new frame from upstream and records
    /// whether it ends the response.
    fn encode_prefix(
        &mut self,
        filter: Option<usize>,
        end_stream: bool,
        start: FilterIterationStartState,
    ) -> usize {
        if filter.is_none() {
            if self.state.local_complete {
                self.contract_violation("response frame dispatched after the response completed");
            }
            self.state.local_complete = end_stream;
        }
        self.encode_start(filter, start)
    }

    pub(super) fn encode_100_continue_internal(&mut self, filter: Option<usize>) {
        self.state.has_continue_headers = true;
        let first = self.encode_prefix(filter, false, FilterIterationStartState::AlwaysStartFromNext);
        for index in first..self.encoder_filters.len() {
            self.enter_call(FilterCall::Encode100ContinueHeaders);
            let status =
                self.with_encoder_filter(index, |filter, cb| filter.encode_100_continue_headers(cb));
            self.exit_call(FilterCall::Encode100ContinueHeaders);
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.encoder_filters[index].name,
                ?status,
                "encode 100 continue headers called"
            );
            if !self.after_encoder_100_continue(index, status) {
                return;
            }
        }

        if !self.state.continue_headers_emitted {
            self.state.continue_headers_emitted = true;
            if let Some(headers) = self.informational_headers.as_ref() {
                self.callbacks.encode_filtered_100_continue_headers(headers);
            }
        }
    }

    /// Final headers are entering the chain while a filter still holds
    /// `100 Continue`. The informational response can no longer go out
    /// first, so it is dropped and the holding filter released.
    pub(super) fn supersede_held_100_continue(&mut self) {
        if !self.state.has_continue_headers || self.state.continue_headers_emitted {
            return;
        }
        tracing::debug!(stream_id = %self.stream_id, "final headers supersede held 100-continue");
        self.state.continue_headers_emitted = true;
        for filter in self.encoder_filters.iter_mut() {
            if !filter.continue_headers_continued {
                filter.continue_headers_continued = true;
                if !filter.headers_called {
                    filter.allow_iteration();
                }
            }
        }
    }

    fn after_encoder_100_continue(&mut self, index: usize, status: FilterHeadersStatus) -> bool {
        match status {
            FilterHeadersStatus::Continue => {
                self.encoder_filters[index].continue_headers_continued = true;
                true
            }
            FilterHeadersStatus::StopIteration => {
                self.encoder_filters[index].iteration_state = IterationState::StopSingleIteration;
                false
            }
            other => self.contract_violation(&format!(
                "{other:?} is not a valid status for 100-continue headers"
            )),
        }
    }

    pub(super) fn encode_headers_internal(&mut self, filter: Option<usize>, end_stream: bool) {
        let first = self.encode_prefix(filter, end_stream, FilterIterationStartState::AlwaysStartFromNext);
        let mut continue_data_entry: Option<usize> = None;

        for index in first..self.encoder_filters.len() {
            self.enter_call(FilterCall::EncodeHeaders);
            let filter_end_stream =
                self.state.encoding_headers_only || (end_stream && continue_data_entry.is_none());
            self.encoder_filters[index].end_stream = filter_end_stream;
            let status =
                self.with_encoder_filter(index, |filter, cb| filter.encode_headers(cb, filter_end_stream));
            if status == FilterHeadersStatus::ContinueAndEndStream && filter_end_stream {
                self.contract_violation("ContinueAndEndStream returned for headers that already end the stream");
            }
            if filter_end_stream {
                self.with_encoder_filter(index, |filter, cb| filter.encode_complete(cb));
            }
            self.exit_call(FilterCall::EncodeHeaders);
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.encoder_filters[index].name,
                ?status,
                end_stream = filter_end_stream,
                "encode headers called"
            );

            let new_metadata_added = self.process_staged_response_metadata(index);
            if filter_end_stream && new_metadata_added && self.buffered_response_data.is_none() {
                self.add_encoded_data(index, BytesMut::new(), true);
            }

            self.encoder_filters[index].headers_called = true;
            let continue_iteration = self.after_encoder_headers(index, status);
            // The response ends with these headers whatever follows.
            if self.state.encoding_headers_only {
                self.state.local_complete = true;
            }
            if self.encoding_aborted() {
                return;
            }
            if !continue_iteration {
                if !self.encoder_filters[index].end_stream {
                    self.maybe_continue_encoding(continue_data_entry);
                }
                return;
            }

            if end_stream && self.buffered_response_data.is_some() && continue_data_entry.is_none() {
                continue_data_entry = Some(index);
            }
        }

        let modified_end_stream =
            self.state.encoding_headers_only || (end_stream && continue_data_entry.is_none());
        if let Some(headers) = self.response_headers.as_ref() {
            self.stream_info.response_code = Some(headers.status());
        }
        self.emit_response_headers(modified_end_stream);
        if self.encoding_aborted() {
            return;
        }
        if !modified_end_stream {
            self.maybe_continue_encoding(continue_data_entry);
        }
    }

    fn maybe_continue_encoding(&mut self, continue_data_entry: Option<usize>) {
        if let Some(index) = continue_data_entry {
            self.encoder_filters[index].iteration_state = IterationState::StopSingleIteration;
            self.continue_encoding(index);
        }
    }

    fn after_encoder_headers(&mut self, index: usize, status: FilterHeadersStatus) -> bool {
        if let Some(state) = IterationState::from_headers_status(status) {
            self.encoder_filters[index].iteration_state = state;
        }
        if status == FilterHeadersStatus::ContinueAndEndStream {
            self.state.encoding_headers_only = true;
            tracing::debug!(stream_id = %self.stream_id, "converting response to headers only");
        }

        let filter = &mut self.encoder_filters[index];
        let saved = filter.iterate_from_current_filter;
        filter.iterate_from_current_filter = true;
        if !filter.stopped_all() {
            self.drain_saved_response_metadata(index);
        }
        self.encoder_filters[index].iterate_from_current_filter = saved;

        let filter = &mut self.encoder_filters[index];
        if filter.stopped_all() || status == FilterHeadersStatus::StopIteration {
            return false;
        }
        filter.headers_continued = true;
        true
    }

    pub(super) fn encode_data_internal(
        &mut self,
        filter: Option<usize>,
        frame: DataFrame,
        end_stream: bool,
        start: FilterIterationStartState,
    ) {
        if self.state.encoding_headers_only || self.state.reset || self.state.destroyed {
            tracing::trace!(stream_id = %self.stream_id, len = frame.len(), "dropping response data");
            self.restore_response_frame(frame);
            return;
        }

        let trailers_existed = self.response_trailers.is_some();
        let mut trailers_added_entry: Option<usize> = None;
        let count = self.encoder_filters.len();
        let mut index = self.encode_prefix(filter, end_stream, start);
        let mut frame = frame;

        let remaining = loop {
            if index >= count {
                break Some(frame);
            }
            if self.encoder_filters[index].stopped_all() {
                self.state.encoder_filters_streaming =
                    self.encoder_filters[index].iteration_state == IterationState::StopAllWatermark;
                tracing::trace!(
                    stream_id = %self.stream_id,
                    filter = self.encoder_filters[index].name,
                    "filter stopped all iteration, buffering response data"
                );
                self.buffer_response_frame(index, frame);
                return;
            }
            if self.encoder_filters[index].end_stream {
                self.restore_response_frame(frame);
                return;
            }

            self.enter_call(FilterCall::EncodeData);
            if end_stream {
                self.state.filter_call_state.last_encode_data_frame = true;
            }
            self.state.latest_data_encoding_filter =
                record_latest_data_filter(self.state.latest_data_encoding_filter, index);
            let filter_end_stream = end_stream && self.response_trailers.is_none();
            self.encoder_filters[index].end_stream = filter_end_stream;
            let status = self.with_encoder_filter(index, |filter, cb| {
                filter.encode_data(frame.bytes_mut(), filter_end_stream, cb)
            });
            if filter_end_stream {
                self.with_encoder_filter(index, |filter, cb| filter.encode_complete(cb));
            }
            self.exit_call(FilterCall::EncodeData);
            self.state.filter_call_state.last_encode_data_frame = false;
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.encoder_filters[index].name,
                ?status,
                len = frame.len(),
                end_stream = filter_end_stream,
                "encode data called"
            );

            if let DataFrame::Buffered(buffer) = &mut frame {
                if let Some(event) = buffer.check_watermarks() {
                    self.on_response_watermark(event);
                }
            }
            self.process_staged_response_metadata(index);
            if !trailers_existed && self.response_trailers.is_some() && trailers_added_entry.is_none() {
                trailers_added_entry = Some(index);
            }
            if self.encoding_aborted() {
                self.restore_response_frame(frame);
                return;
            }

            match self.after_encoder_data(index, status, frame) {
                Some(next) => frame = next,
                None if index + 1 < count => return,
                None => break None,
            }
            index += 1;
        };

        if let Some(frame) = remaining {
            self.emit_encoded_data(frame, end_stream && trailers_added_entry.is_none());
        }
        if self.encoding_aborted() {
            return;
        }
        if let Some(entry) = trailers_added_entry {
            self.encode_trailers_internal(Some(entry));
        }
    }

    fn after_encoder_data(
        &mut self,
        index: usize,
        status: FilterDataStatus,
        frame: DataFrame,
    ) -> Option<DataFrame> {
        if status == FilterDataStatus::Continue {
            if self.encoder_filters[index].iteration_state == IterationState::StopSingleIteration {
                self.buffer_response_frame(index, frame);
                self.continue_encoding(index);
                return None;
            }
            return Some(frame);
        }

        self.encoder_filters[index].iteration_state = IterationState::StopSingleIteration;
        match status {
            FilterDataStatus::StopIterationAndBuffer | FilterDataStatus::StopIterationAndWatermark => {
                self.state.encoder_filters_streaming =
                    status == FilterDataStatus::StopIterationAndWatermark;
                self.buffer_response_frame(index, frame);
            }
            _ => {
                if self.state.local_complete
                    && self.response_trailers.is_none()
                    && self.buffered_response_data.is_none()
                    && !frame.is_buffered()
                    && !self.state.destroyed
                {
                    self.create_empty_response_buffer(index);
                }
                self.restore_response_frame(frame);
            }
        }
        None
    }

    pub(super) fn encode_trailers_internal(&mut self, filter: Option<usize>) {
        if self.state.encoding_headers_only || self.state.reset || self.state.destroyed {
            return;
        }

        let first = self.encode_prefix(filter, true, FilterIterationStartState::CanStartFromCurrent);
        for index in first..self.encoder_filters.len() {
            if self.encoder_filters[index].stopped_all() {
                return;
            }
            self.enter_call(FilterCall::EncodeTrailers);
            let status = self.with_encoder_filter(index, |filter, cb| filter.encode_trailers(cb));
            self.encoder_filters[index].end_stream = true;
            self.with_encoder_filter(index, |filter, cb| filter.encode_complete(cb));
            self.exit_call(FilterCall::EncodeTrailers);
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.encoder_filters[index].name,
                ?status,
                "encode trailers called"
            );

            self.process_staged_response_metadata(index);
            if self.encoding_aborted() {
                return;
            }
            if !self.after_encoder_trailers(index, status) {
                return;
            }
        }

        if let Some(trailers) = self.response_trailers.as_ref() {
            self.callbacks.encode_filtered_trailers(trailers);
        }
        self.maybe_end_encode(true);
    }

    fn after_encoder_trailers(&mut self, index: usize, status: FilterTrailersStatus) -> bool {
        match status {
            FilterTrailersStatus::Continue => {
                if self.encoder_filters[index].iteration_state == IterationState::StopSingleIteration {
                    self.continue_encoding(index);
                    return false;
                }
                true
            }
            FilterTrailersStatus::StopIteration => {
                self.encoder_filters[index].iteration_state = IterationState::StopSingleIteration;
                false
            }
        }
    }

    pub(super) fn encode_metadata_internal(
        &mut self,
        filter: Option<usize>,
        mut metadata: MetadataMap,
        start: FilterIterationStartState,
    ) {
        let first = self.encode_start(filter, start);
        for index in first..self.encoder_filters.len() {
            let active = &mut self.encoder_filters[index];
            if !active.headers_called || active.stopped_all() {
                tracing::trace!(
                    stream_id = %self.stream_id,
                    filter = active.name,
                    "filter not ready for metadata, saving"
                );
                active.saved_metadata.push_back(metadata);
                return;
            }
            let status =
                self.with_encoder_filter(index, |filter, cb| filter.encode_metadata(&mut metadata, cb));
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.encoder_filters[index].name,
                ?status,
                "encode metadata called"
            );
        }
        self.emit_encoded_metadata(metadata);
    }

    fn drain_saved_response_metadata(&mut self, index: usize) {
        while let Some(metadata) = self.encoder_filters[index].saved_metadata.pop_front() {
            self.encode_metadata_internal(
                Some(index),
                metadata,
                FilterIterationStartState::CanStartFromCurrent,
            );
        }
    }

    fn process_staged_response_metadata(&mut self, index: usize) -> bool {
        if self.staged_response_metadata.is_empty() {
            return false;
        }
        for metadata in std::mem::take(&mut self.staged_response_metadata) {
            self.encode_metadata_internal(
                Some(index),
                metadata,
                FilterIterationStartState::AlwaysStartFromNext,
            );
        }
        true
    }

    /// Resume response iteration at encoder filter `index`.
    ///
    /// A held `100 Continue` goes first. If no response headers exist yet,
    /// that is all; otherwise headers, saved metadata, the buffered body and
    /// trailers follow as on the request path.
    pub fn continue_encoding(&mut self, index: usize) {
        if index >= self.encoder_filters.len() {
            tracing::warn!(stream_id = %self.stream_id, index, "continue for unknown encoder filter");
            return;
        }
        if self.state.reset || self.state.destroyed || self.state.encode_complete {
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.encoder_filters[index].name,
                "cannot continue encoder filter chain"
            );
            return;
        }

        let filter = &mut self.encoder_filters[index];
        if filter.can_iterate() {
            tracing::trace!(stream_id = %self.stream_id, filter = filter.name, "encoder filter already continued");
            return;
        }
        if filter.stopped_all() {
            filter.iterate_from_current_filter = true;
        }
        filter.allow_iteration();
        tracing::trace!(stream_id = %self.stream_id, filter = filter.name, "continuing encoder filter chain");

        if self.state.has_continue_headers && !self.encoder_filters[index].continue_headers_continued {
            self.encoder_filters[index].continue_headers_continued = true;
            self.encode_100_continue_internal(Some(index));
            if self.response_headers.is_none() {
                self.encoder_filters[index].iterate_from_current_filter = false;
                return;
            }
        }

        if !self.encoder_filters[index].headers_continued {
            self.encoder_filters[index].headers_continued = true;
            if self.response_headers.is_some() {
                let end_stream = self.state.local_complete
                    && self.buffered_response_data.is_none()
                    && self.response_trailers.is_none();
                self.encode_headers_internal(Some(index), end_stream);
            }
        }

        self.drain_saved_response_metadata(index);

        let had_trailers = self.response_trailers.is_some();
        if let Some(buffer) = self.buffered_response_data.take() {
            let end_stream = self.state.local_complete && !had_trailers;
            self.encode_data_internal(
                Some(index),
                DataFrame::Buffered(buffer),
                end_stream,
                FilterIterationStartState::CanStartFromCurrent,
            );
        }
        if had_trailers {
            self.encode_trailers_internal(Some(index));
        }

        if let Some(filter) = self.encoder_filters.get_mut(index) {
            filter.iterate_from_current_filter = false;
        }
    }

    // --- encoder callback operations -------------------------------------------

    pub(super) fn add_encoded_data(&mut self, index: usize, data: BytesMut, streaming: bool) {
        let calls = self.state.filter_call_state;
        if calls.is_idle()
            || calls.encode_headers
            || calls.encode_data
            || (calls.encode_trailers && !self.encoder_filters[index].can_iterate())
        {
            self.state.encoder_filters_streaming = streaming;
            self.buffer_response_frame(index, DataFrame::Fresh(data));
        } else if calls.encode_trailers {
            self.encode_data_internal(
                Some(index),
                DataFrame::Fresh(data),
                false,
                FilterIterationStartState::AlwaysStartFromNext,
            );
        } else {
            self.contract_violation("response data added while no response callback can take it");
        }
    }

    /// Dispatch body bytes on behalf of encoder filter `index`, starting
    /// after it. Usable from outside any callback.
    pub fn inject_encoded_data(&mut self, index: usize, data: BytesMut, end_stream: bool) {
        if index >= self.encoder_filters.len() {
            tracing::warn!(stream_id = %self.stream_id, index, "injection for unknown encoder filter");
            return;
        }
        if self.encoding_aborted() {
            tracing::trace!(stream_id = %self.stream_id, len = data.len(), "stream gone, dropping injected response data");
            return;
        }
        if !self.encoder_filters[index].headers_continued {
            self.encoder_filters[index].headers_continued = true;
            if self.response_headers.is_some() {
                self.encode_headers_internal(Some(index), false);
            }
        }
        self.encode_data_internal(
            Some(index),
            DataFrame::Fresh(data),
            end_stream,
            FilterIterationStartState::CanStartFromCurrent,
        );
    }

    pub(super) fn add_encoded_trailers(&mut self) -> &mut TrailerMap {
        if !self.state.filter_call_state.last_encode_data_frame {
            self.contract_violation("response trailers added outside the last data frame");
        }
        if self.response_trailers.is_some() {
            self.contract_violation("response trailers added twice");
        }
        self.response_trailers.insert(TrailerMap::new())
    }

    pub(super) fn add_encoded_metadata(&mut self, index: usize, metadata: MetadataMap) {
        if self.state.filter_call_state.in_encode() {
            self.staged_response_metadata.push(metadata);
        } else {
            self.encode_metadata_internal(
                Some(index),
                metadata,
                FilterIterationStartState::AlwaysStartFromNext,
            );
        }
    }

    pub(super) fn modify_encoding_buffer(&mut self, index: usize, modify: impl FnOnce(&mut BytesMut)) {
        if self.state.latest_data_encoding_filter != Some(index) {
            self.contract_violation("response buffer modified by a filter that does not own it");
        }
        let Some(buffer) = self.buffered_response_data.as_mut() else {
            return;
        };
        modify(buffer.bytes_mut());
        if let Some(event) = buffer.check_watermarks() {
            self.on_response_watermark(event);
        }
    }
}
