//! Request-path dispatch.
//!
//! # Data Flow
//! ```text
//! decode_headers_internal ──▶ after_decoder_headers ──▶ (stop | next filter | wire)
//! decode_data_internal    ──▶ after_decoder_data    ──▶ (buffer | continue | next | wire)
//! decode_trailers_internal ─▶ after_decoder_trailers ─▶ (stop | next | wire)
//! continue_decoding: headers → saved metadata → buffered data → trailers
//! ```

use bytes::BytesMut;

use crate::filter::{FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus};
use crate::http::{MetadataMap, TrailerMap};

use super::active_filter::DataFrame;
use super::state::{record_latest_data_filter, FilterCall, FilterIterationStartState, IterationState};
use super::FilterManager;

impl FilterManager {
    /// First decoder index a dispatch visits after `filter`.
    fn decode_start(&self, filter: Option<usize>, start: FilterIterationStartState) -> usize {
        match filter {
            None => 0,
            Some(index)
                if start == FilterIterationStartState::CanStartFromCurrent
                    && self.decoder_filters[index].iterate_from_current_filter =>
            {
                index
            }
            Some(index) => index + 1,
        }
    }

    pub(super) fn decode_headers_internal(&mut self, filter: Option<usize>, end_stream: bool) {
        let first = self.decode_start(filter, FilterIterationStartState::AlwaysStartFromNext);
        let count = self.decoder_filters.len();
        // First filter that saw headers while a body was buffered behind them.
        // Later filters must not see end of stream on the headers.
        let mut continue_data_entry: Option<usize> = None;
        let mut stopped = false;

        for index in first..count {
            self.enter_call(FilterCall::DecodeHeaders);
            let filter_end_stream =
                self.state.decoding_headers_only || (end_stream && continue_data_entry.is_none());
            self.decoder_filters[index].end_stream = filter_end_stream;
            let status =
                self.with_decoder_filter(index, |filter, cb| filter.decode_headers(cb, filter_end_stream));
            if status == FilterHeadersStatus::ContinueAndEndStream && filter_end_stream {
                self.contract_violation("ContinueAndEndStream returned for headers that already end the stream");
            }
            if filter_end_stream {
                self.with_decoder_filter(index, |filter, cb| filter.decode_complete(cb));
            }
            self.exit_call(FilterCall::DecodeHeaders);
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.decoder_filters[index].name,
                ?status,
                end_stream = filter_end_stream,
                "decode headers called"
            );

            let new_metadata_added = self.process_staged_request_metadata(index);
            // Metadata cannot carry end of stream, so an empty body follows it.
            if filter_end_stream && new_metadata_added && self.buffered_request_data.is_none() {
                self.add_decoded_data(index, BytesMut::new(), true);
            }

            self.decoder_filters[index].headers_called = true;
            let continue_iteration = self.after_decoder_headers(index, status);
            if self.decoding_aborted() {
                return;
            }

            if !continue_iteration {
                if index + 1 < count {
                    self.maybe_continue_decoding(continue_data_entry);
                    return;
                }
                stopped = true;
            }

            if end_stream && self.buffered_request_data.is_some() && continue_data_entry.is_none() {
                continue_data_entry = Some(index);
            }
        }

        let modified_end_stream =
            self.state.decoding_headers_only || (end_stream && continue_data_entry.is_none());
        if !stopped {
            self.emit_request_headers(modified_end_stream);
        }
        self.maybe_continue_decoding(continue_data_entry);
    }

    /// Resume from the filter whose headers pass buffered a body, so the body
    /// follows the headers through the rest of the chain.
    fn maybe_continue_decoding(&mut self, continue_data_entry: Option<usize>) {
        if let Some(index) = continue_data_entry {
            self.decoder_filters[index].iteration_state = IterationState::StopSingleIteration;
            self.continue_decoding(index);
        }
    }

    fn after_decoder_headers(&mut self, index: usize, status: FilterHeadersStatus) -> bool {
        if let Some(state) = IterationState::from_headers_status(status) {
            self.decoder_filters[index].iteration_state = state;
        }
        if status == FilterHeadersStatus::ContinueAndEndStream {
            self.state.decoding_headers_only = true;
            tracing::debug!(stream_id = %self.stream_id, "converting request to headers only");
        }

        let filter = &mut self.decoder_filters[index];
        let saved = filter.iterate_from_current_filter;
        filter.iterate_from_current_filter = true;
        if !filter.stopped_all() {
            self.drain_saved_request_metadata(index);
        }
        self.decoder_filters[index].iterate_from_current_filter = saved;

        let filter = &mut self.decoder_filters[index];
        if filter.stopped_all() || status == FilterHeadersStatus::StopIteration {
            return false;
        }
        filter.headers_continued = true;
        true
    }

    pub(super) fn decode_data_internal(
        &mut self,
        filter: Option<usize>,
        frame: DataFrame,
        end_stream: bool,
        start: FilterIterationStartState,
    ) {
        if self.state.decoding_headers_only
            || self.state.local_complete
            || self.state.reset
            || self.state.destroyed
        {
            tracing::trace!(stream_id = %self.stream_id, len = frame.len(), "dropping request data");
            self.restore_request_frame(frame);
            return;
        }

        let trailers_existed = self.request_trailers.is_some();
        let mut trailers_added_entry: Option<usize> = None;
        let count = self.decoder_filters.len();
        let mut index = self.decode_start(filter, start);
        let mut frame = frame;

        let remaining = loop {
            if index >= count {
                break Some(frame);
            }
            if self.decoder_filters[index].stopped_all() {
                self.state.decoder_filters_streaming =
                    self.decoder_filters[index].iteration_state == IterationState::StopAllWatermark;
                tracing::trace!(
                    stream_id = %self.stream_id,
                    filter = self.decoder_filters[index].name,
                    "filter stopped all iteration, buffering request data"
                );
                self.buffer_request_frame(frame);
                return;
            }
            if self.decoder_filters[index].end_stream {
                self.restore_request_frame(frame);
                return;
            }

            self.enter_call(FilterCall::DecodeData);
            if end_stream {
                self.state.filter_call_state.last_decode_data_frame = true;
            }
            self.state.latest_data_decoding_filter =
                record_latest_data_filter(self.state.latest_data_decoding_filter, index);
            let filter_end_stream = end_stream && self.request_trailers.is_none();
            self.decoder_filters[index].end_stream = filter_end_stream;
            let status = self.with_decoder_filter(index, |filter, cb| {
                filter.decode_data(frame.bytes_mut(), filter_end_stream, cb)
            });
            if filter_end_stream {
                self.with_decoder_filter(index, |filter, cb| filter.decode_complete(cb));
            }
            self.exit_call(FilterCall::DecodeData);
            self.state.filter_call_state.last_decode_data_frame = false;
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.decoder_filters[index].name,
                ?status,
                len = frame.len(),
                end_stream = filter_end_stream,
                "decode data called"
            );

            if let DataFrame::Buffered(buffer) = &mut frame {
                if let Some(event) = buffer.check_watermarks() {
                    self.on_request_watermark(event);
                }
            }
            self.process_staged_request_metadata(index);
            if !trailers_existed && self.request_trailers.is_some() && trailers_added_entry.is_none() {
                trailers_added_entry = Some(index);
            }
            if self.decoding_aborted() {
                self.restore_request_frame(frame);
                return;
            }

            match self.after_decoder_data(index, status, frame) {
                Some(next) => frame = next,
                None if index + 1 < count => return,
                None => break None,
            }
            index += 1;
        };

        if let Some(frame) = remaining {
            self.emit_decoded_data(frame, end_stream && trailers_added_entry.is_none());
        }
        if let Some(entry) = trailers_added_entry {
            self.decode_trailers_internal(Some(entry));
        }
    }

    /// Returns the frame if it should go on to the next filter.
    fn after_decoder_data(
        &mut self,
        index: usize,
        status: FilterDataStatus,
        frame: DataFrame,
    ) -> Option<DataFrame> {
        if status == FilterDataStatus::Continue {
            if self.decoder_filters[index].iteration_state == IterationState::StopSingleIteration {
                // Held headers must go first; the continuation replays both.
                self.buffer_request_frame(frame);
                self.continue_decoding(index);
                return None;
            }
            return Some(frame);
        }

        self.decoder_filters[index].iteration_state = IterationState::StopSingleIteration;
        match status {
            FilterDataStatus::StopIterationAndBuffer | FilterDataStatus::StopIterationAndWatermark => {
                self.state.decoder_filters_streaming =
                    status == FilterDataStatus::StopIterationAndWatermark;
                self.buffer_request_frame(frame);
            }
            _ => {
                if self.state.remote_complete
                    && self.request_trailers.is_none()
                    && self.buffered_request_data.is_none()
                    && !frame.is_buffered()
                    && !self.state.destroyed
                {
                    // Leaves a zero-length body so a later continue still ends
                    // the stream with a data frame.
                    self.create_empty_request_buffer();
                }
                self.restore_request_frame(frame);
            }
        }
        None
    }

    pub(super) fn decode_trailers_internal(&mut self, filter: Option<usize>) {
        if self.state.decoding_headers_only
            || self.state.local_complete
            || self.state.reset
            || self.state.destroyed
        {
            return;
        }

        let first = self.decode_start(filter, FilterIterationStartState::CanStartFromCurrent);
        for index in first..self.decoder_filters.len() {
            if self.decoder_filters[index].stopped_all() {
                return;
            }
            self.enter_call(FilterCall::DecodeTrailers);
            let status = self.with_decoder_filter(index, |filter, cb| filter.decode_trailers(cb));
            self.decoder_filters[index].end_stream = true;
            self.with_decoder_filter(index, |filter, cb| filter.decode_complete(cb));
            self.exit_call(FilterCall::DecodeTrailers);
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.decoder_filters[index].name,
                ?status,
                "decode trailers called"
            );

            self.process_staged_request_metadata(index);
            if self.decoding_aborted() {
                return;
            }
            if !self.after_decoder_trailers(index, status) {
                return;
            }
        }

        if let Some(trailers) = self.request_trailers.as_ref() {
            self.callbacks.decode_filtered_trailers(trailers);
        }
    }

    fn after_decoder_trailers(&mut self, index: usize, status: FilterTrailersStatus) -> bool {
        match status {
            FilterTrailersStatus::Continue => {
                if self.decoder_filters[index].iteration_state == IterationState::StopSingleIteration {
                    self.continue_decoding(index);
                    return false;
                }
                true
            }
            FilterTrailersStatus::StopIteration => {
                self.decoder_filters[index].iteration_state = IterationState::StopSingleIteration;
                false
            }
        }
    }

    pub(super) fn decode_metadata_internal(
        &mut self,
        filter: Option<usize>,
        mut metadata: MetadataMap,
        start: FilterIterationStartState,
    ) {
        let first = self.decode_start(filter, start);
        for index in first..self.decoder_filters.len() {
            let active = &mut self.decoder_filters[index];
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
                self.with_decoder_filter(index, |filter, cb| filter.decode_metadata(&mut metadata, cb));
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.decoder_filters[index].name,
                ?status,
                "decode metadata called"
            );
        }
        self.emit_decoded_metadata(metadata);
    }

    fn drain_saved_request_metadata(&mut self, index: usize) {
        while let Some(metadata) = self.decoder_filters[index].saved_metadata.pop_front() {
            self.decode_metadata_internal(
                Some(index),
                metadata,
                FilterIterationStartState::CanStartFromCurrent,
            );
        }
    }

    /// Dispatch metadata a filter added during its own callback, starting
    /// after that filter. Returns whether there was any.
    fn process_staged_request_metadata(&mut self, index: usize) -> bool {
        if self.staged_request_metadata.is_empty() {
            return false;
        }
        for metadata in std::mem::take(&mut self.staged_request_metadata) {
            self.decode_metadata_internal(
                Some(index),
                metadata,
                FilterIterationStartState::AlwaysStartFromNext,
            );
        }
        true
    }

    /// Resume request iteration at decoder filter `index`.
    ///
    /// Replays, in order, held headers, saved metadata, the buffered body
    /// and trailers. Calling it for a filter that is not stopped does
    /// nothing.
    pub fn continue_decoding(&mut self, index: usize) {
        if index >= self.decoder_filters.len() {
            tracing::warn!(stream_id = %self.stream_id, index, "continue for unknown decoder filter");
            return;
        }
        if self.state.local_complete || self.state.reset || self.state.destroyed {
            tracing::trace!(
                stream_id = %self.stream_id,
                filter = self.decoder_filters[index].name,
                "cannot continue decoder filter chain"
            );
            return;
        }

        let filter = &mut self.decoder_filters[index];
        if filter.can_iterate() {
            tracing::trace!(stream_id = %self.stream_id, filter = filter.name, "decoder filter already continued");
            return;
        }
        // Frames that arrived during a stop-all were never seen by this filter.
        if filter.stopped_all() {
            filter.iterate_from_current_filter = true;
        }
        filter.allow_iteration();
        tracing::trace!(stream_id = %self.stream_id, filter = filter.name, "continuing decoder filter chain");

        if !self.decoder_filters[index].headers_continued {
            self.decoder_filters[index].headers_continued = true;
            if self.request_headers.is_some() {
                let end_stream = self.state.remote_complete
                    && self.buffered_request_data.is_none()
                    && self.request_trailers.is_none();
                self.decode_headers_internal(Some(index), end_stream);
            }
        }

        self.drain_saved_request_metadata(index);

        // Trailers added while the body replays are dispatched by the data pass.
        let had_trailers = self.request_trailers.is_some();
        if let Some(buffer) = self.buffered_request_data.take() {
            let end_stream = self.state.remote_complete && !had_trailers;
            self.decode_data_internal(
                Some(index),
                DataFrame::Buffered(buffer),
                end_stream,
                FilterIterationStartState::CanStartFromCurrent,
            );
        }
        if had_trailers {
            self.decode_trailers_internal(Some(index));
        }

        if let Some(filter) = self.decoder_filters.get_mut(index) {
            filter.iterate_from_current_filter = false;
        }
    }

    // --- decoder callback operations -------------------------------------------

    pub(super) fn add_decoded_data(&mut self, index: usize, data: BytesMut, streaming: bool) {
        let calls = self.state.filter_call_state;
        if calls.is_idle()
            || calls.decode_headers
            || calls.decode_data
            || (calls.decode_trailers && !self.decoder_filters[index].can_iterate())
        {
            self.state.decoder_filters_streaming = streaming;
            self.buffer_request_frame(DataFrame::Fresh(data));
        } else if calls.decode_trailers {
            self.decode_data_internal(
                Some(index),
                DataFrame::Fresh(data),
                false,
                FilterIterationStartState::AlwaysStartFromNext,
            );
        } else {
            self.contract_violation("request data added from a response callback");
        }
    }

    /// Dispatch body bytes on behalf of decoder filter `index`, starting
    /// after it. Held headers are released first. Usable from outside any
    /// callback, e.g. when an asynchronous operation of the filter finishes.
    pub fn inject_decoded_data(&mut self, index: usize, data: BytesMut, end_stream: bool) {
        if index >= self.decoder_filters.len() {
            tracing::warn!(stream_id = %self.stream_id, index, "injection for unknown decoder filter");
            return;
        }
        if self.decoding_aborted() {
            tracing::trace!(stream_id = %self.stream_id, len = data.len(), "stream gone, dropping injected request data");
            return;
        }
        if !self.decoder_filters[index].headers_continued {
            self.decoder_filters[index].headers_continued = true;
            if self.request_headers.is_some() {
                self.decode_headers_internal(Some(index), false);
            }
        }
        self.decode_data_internal(
            Some(index),
            DataFrame::Fresh(data),
            end_stream,
            FilterIterationStartState::CanStartFromCurrent,
        );
    }

    pub(super) fn add_decoded_trailers(&mut self) -> &mut TrailerMap {
        if !self.state.filter_call_state.last_decode_data_frame {
            self.contract_violation("request trailers added outside the last data frame");
        }
        if self.request_trailers.is_some() {
            self.contract_violation("request trailers added twice");
        }
        self.request_trailers.insert(TrailerMap::new())
    }

    pub(super) fn add_decoded_metadata(&mut self, index: usize, metadata: MetadataMap) {
        if self.state.filter_call_state.in_decode() {
            self.staged_request_metadata.push(metadata);
        } else {
            self.decode_metadata_internal(
                Some(index),
                metadata,
                FilterIterationStartState::AlwaysStartFromNext,
            );
        }
    }

    pub(super) fn modify_decoding_buffer(&mut self, index: usize, modify: impl FnOnce(&mut BytesMut)) {
        if self.state.latest_data_decoding_filter != Some(index) {
            self.contract_violation("request buffer modified by a filter that does not own it");
        }
        let Some(buffer) = self.buffered_request_data.as_mut() else {
            return;
        };
        modify(buffer.bytes_mut());
        if let Some(event) = buffer.check_watermarks() {
            self.on_request_watermark(event);
        }
    }

    pub(super) fn recreate_stream(&mut self) -> bool {
        if !self.state.remote_complete || self.stream_info.bytes_received != 0 {
            tracing::debug!(stream_id = %self.stream_id, "stream cannot be recreated with a body");
            return false;
        }
        let Some(headers) = self.request_headers.take() else {
            return false;
        };
        match self.callbacks.new_stream(headers) {
            Ok(()) => {
                tracing::debug!(stream_id = %self.stream_id, "request handed to a new stream");
                self.state.recreated = true;
                true
            }
            Err(headers) => {
                self.request_headers = Some(headers);
                false
            }
        }
    }
}
