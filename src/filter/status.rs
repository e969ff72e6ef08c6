//! Values a filter returns to steer iteration.

/// Result of a headers callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterHeadersStatus {
    /// Hand the headers to the next filter.
    Continue,
    /// Hold the headers. Data and trailers still reach this filter.
    StopIteration,
    /// Continue, but treat this direction as headers-only from here on.
    /// Body and trailers that follow are dropped.
    ContinueAndEndStream,
    /// Hold every frame type; later frames are buffered without backpressure.
    StopAllIterationAndBuffer,
    /// Hold every frame type; later frames are buffered and count toward the
    /// watermark.
    StopAllIterationAndWatermark,
}

/// Result of a data callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDataStatus {
    Continue,
    /// Keep the data in the stream buffer. Exceeding the limit is an error.
    StopIterationAndBuffer,
    /// Keep the data in the stream buffer and apply backpressure at the limit.
    StopIterationAndWatermark,
    /// Drop the data. The filter is expected to have consumed it.
    StopIterationNoBuffer,
}

/// Result of a trailers callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTrailersStatus {
    Continue,
    StopIteration,
}

/// Result of a metadata callback. Metadata never stops iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMetadataStatus {
    Continue,
}
