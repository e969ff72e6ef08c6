//! Property tests for iteration and backpressure bookkeeping.

mod common;

use bytes::BytesMut;
use proptest::prelude::*;

use common::*;
use stream_filter_chain::buffer::{WatermarkBuffer, WatermarkEvent};
use stream_filter_chain::filter::{DecoderFilterCallbacks, FilterDataStatus, FilterHeadersStatus};
use stream_filter_chain::manager::record_latest_data_filter;
use stream_filter_chain::stream::Direction;

/// How a generated decoder treats the request.
#[derive(Debug, Clone, Copy)]
enum Behavior {
    Pass,
    /// Buffers the body and releases it on the last frame.
    Buffer,
    /// Holds the headers as well as the body until the last frame.
    HoldHeaders,
}

const LABELS: [&str; 4] = ["f0", "f1", "f2", "f3"];

fn behavior() -> impl Strategy<Value = Behavior> {
    prop_oneof![Just(Behavior::Pass), Just(Behavior::Buffer), Just(Behavior::HoldHeaders)]
}

fn release_on_end(
    _data: &mut BytesMut,
    end_stream: bool,
    _cb: &mut DecoderFilterCallbacks<'_>,
) -> FilterDataStatus {
    if end_stream {
        FilterDataStatus::Continue
    } else {
        FilterDataStatus::StopIterationAndBuffer
    }
}

fn decoder(label: &'static str, behavior: Behavior, log: &Log) -> TestDecoder {
    match behavior {
        Behavior::Pass => TestDecoder::new(label, log),
        Behavior::Buffer => TestDecoder::new(label, log).on_data(release_on_end),
        Behavior::HoldHeaders => TestDecoder::new(label, log)
            .on_headers(|_cb, _end| FilterHeadersStatus::StopIteration)
            .on_data(release_on_end),
    }
}

#[derive(Debug, Clone)]
enum BufferOp {
    Add(usize),
    Truncate(usize),
    DrainAll,
}

fn buffer_op() -> impl Strategy<Value = BufferOp> {
    prop_oneof![
        (1usize..80).prop_map(BufferOp::Add),
        (0usize..80).prop_map(BufferOp::Truncate),
        Just(BufferOp::DrainAll),
    ]
}

proptest! {
    #[test]
    fn prop_request_ends_exactly_once(
        behaviors in prop::collection::vec(behavior(), 1..=4),
        chunks in prop::collection::vec("[a-z]{1,64}", 1..=5),
    ) {
        let log = new_log();
        let recorder = Recorder::new();
        let mut chain = Chain::new();
        for (label, behavior) in LABELS.iter().copied().zip(&behaviors) {
            chain = chain.decoder(decoder(label, *behavior, &log));
        }
        let mut manager = stream_with(chain, &recorder, limited(0));

        manager.decode_headers(post("/"), false);
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            manager.decode_data(body(chunk), i == last);
        }

        let frames = request_frames(&recorder.events());
        prop_assert_eq!(&frames[0], &Wire::RequestHeaders { end_stream: false });
        prop_assert_eq!(
            frames.iter().filter(|f| matches!(f, Wire::RequestHeaders { .. })).count(),
            1
        );
        prop_assert_eq!(frames.iter().filter(|f| f.ends_stream()).count(), 1);
        prop_assert!(frames.last().map_or(false, Wire::ends_stream));

        let forwarded: String = frames
            .iter()
            .filter_map(|f| match f {
                Wire::RequestData { data, .. } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        prop_assert_eq!(forwarded, chunks.concat());

        for label in LABELS.iter().take(behaviors.len()) {
            prop_assert_eq!(count_entries(&log, &format!("{}:complete", label)), 1);
        }
    }

    #[test]
    fn prop_latest_data_filter_only_moves_forward_by_one(
        latest in prop::option::of(0usize..8),
        current in 0usize..8,
    ) {
        let next = record_latest_data_filter(latest, current);
        prop_assert!(next == latest || next == Some(current));
        if let (Some(before), Some(after)) = (latest, next) {
            if after != before {
                prop_assert_eq!(after, before + 1);
            }
        }
        if latest.is_none() {
            prop_assert_eq!(next, Some(current));
        }
    }

    #[test]
    fn prop_watermark_events_alternate(
        limit in 1u32..200,
        ops in prop::collection::vec(buffer_op(), 0..40),
    ) {
        let mut buffer = WatermarkBuffer::new(limit);
        let mut above = false;
        for op in ops {
            let event = match op {
                BufferOp::Add(n) => buffer.add(&vec![b'x'; n]),
                BufferOp::Truncate(n) => {
                    buffer.bytes_mut().truncate(n);
                    buffer.check_watermarks()
                }
                BufferOp::DrainAll => buffer.drain_all().1,
            };
            match event {
                Some(WatermarkEvent::AboveHighWatermark) => {
                    prop_assert!(!above);
                    above = true;
                }
                Some(WatermarkEvent::BelowLowWatermark) => {
                    prop_assert!(above);
                    above = false;
                }
                None => {}
            }
            prop_assert_eq!(buffer.above_high_watermark(), above);
        }
    }

    #[test]
    fn prop_downstream_watermark_count_never_underflows(
        ops in prop::collection::vec(any::<bool>(), 0..50),
    ) {
        let recorder = Recorder::new();
        let mut manager = stream(Chain::new(), &recorder);
        let observer = CountingObserver::default();
        manager.add_downstream_watermark_callbacks(Box::new(observer.clone()));

        let mut expected: u32 = 0;
        for is_above in ops {
            if is_above {
                manager.on_above_write_buffer_high_watermark();
                expected += 1;
            } else {
                manager.on_below_write_buffer_low_watermark();
                expected = expected.saturating_sub(1);
            }
            prop_assert_eq!(manager.high_watermark_count(Direction::Encode), expected);
            prop_assert_eq!((observer.above() - observer.below()) as u32, expected);
        }
    }
}
