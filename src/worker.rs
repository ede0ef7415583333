// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Work queue and worker pool.
//!
//! Workers pull sub-rectangles off one FIFO, analyze and encode them, and
//! deliver output buffers the owner drains in submission order. Every
//! item carries a sequence number; the owner emits outputs strictly in
//! sequence, so the wire order always equals the submission order.
//!
//! Codecs holding cross-rectangle compression state additionally need
//! their *encode* order to match the wire order. Their prepared items go
//! through a per-codec ordered queue whose head may only be encoded once
//! no earlier-submitted item is still being analyzed (an earlier item
//! could yet pick the same codec). One worker at a time owns a queue's
//! drain and gives the role up when the queue runs dry or the head stops
//! being eligible.
//!
//! One mutex guards all queues and counters; `consumer` wakes workers,
//! `producer` wakes the owner in `flush`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use bytes::BytesMut;

use crate::analyze::{analyse_rect, classify};
use crate::caps::PeerCaps;
use crate::encoding::{new_codec_set, CodecId, ContentClass, Encoder, EncoderFlags, RectPixels};
use crate::error::{EncodeError, Result};
use crate::palette::{Palette, MAX_PALETTE_SIZE};
use crate::protocol::PixelFormat;
use crate::region::Rect;
use crate::surface::{pack_rect, PixelSurface};
use crate::translate::{translate_pixel, translate_pixels};

/// Upper bound on worker threads; more of them just fight over the lock.
const MAX_WORKERS: usize = 4;

/// The codec chosen for each content class, plus the per-codec metadata
/// workers need without touching the codec instances.
#[derive(Debug, Clone)]
pub(crate) struct Selection {
    active: [CodecId; 6],
    flags: [EncoderFlags; 6],
    max_palette: [usize; 6],
    encodings: [i32; 6],
}

impl Selection {
    pub(crate) fn new(
        active: [CodecId; 6],
        flags: [EncoderFlags; 6],
        max_palette: [usize; 6],
        encodings: [i32; 6],
    ) -> Self {
        Self {
            active,
            flags,
            max_palette,
            encodings,
        }
    }

    pub(crate) fn codec_for(&self, class: ContentClass) -> CodecId {
        self.active[class.index()]
    }

    pub(crate) fn flags_of(&self, codec: CodecId) -> EncoderFlags {
        self.flags[codec.index()]
    }

    pub(crate) fn max_palette_of(&self, codec: CodecId) -> usize {
        self.max_palette[codec.index()]
    }

    pub(crate) fn encoding_of(&self, codec: CodecId) -> i32 {
        self.encodings[codec.index()]
    }
}

/// A queued sub-rectangle, owned by the queue until a worker claims it.
pub(crate) struct WorkItem {
    pub rect: Rect,
    pub surface: Arc<dyn PixelSurface>,
    pub caps: Arc<PeerCaps>,
    pub selection: Arc<Selection>,
}

/// An analyzed rectangle waiting for its (possibly ordered) codec.
struct PreparedItem {
    rect: Rect,
    class: ContentClass,
    codec: CodecId,
    format: PixelFormat,
    pixels: Vec<u8>,
    palette: Palette,
    caps: Arc<PeerCaps>,
}

/// An encoded rectangle, or the codec failure that took its place.
pub(crate) struct OutputItem {
    pub rect: Rect,
    pub class: ContentClass,
    pub codec: CodecId,
    pub result: Result<BytesMut>,
}

struct Queues {
    work: VecDeque<(u64, WorkItem)>,
    /// Next sequence number to hand out.
    next_seq: u64,
    /// Next sequence number the owner will emit.
    next_emit: u64,
    /// Sequence numbers popped from `work` but still being analyzed.
    in_prepare: BTreeSet<u64>,
    ordered: [BTreeMap<u64, PreparedItem>; 6],
    /// True while some worker is draining that codec's ordered queue.
    draining: [bool; 6],
    /// Reorder buffer, keyed by sequence number.
    output: BTreeMap<u64, OutputItem>,
    rect_count: usize,
    stop: bool,
}

impl Queues {
    fn new() -> Self {
        Self {
            work: VecDeque::new(),
            next_seq: 0,
            next_emit: 0,
            in_prepare: BTreeSet::new(),
            ordered: Default::default(),
            draining: [false; 6],
            output: BTreeMap::new(),
            rect_count: 0,
            stop: false,
        }
    }

    /// Whether the given ordered-queue entry may be encoded: no item
    /// still in analysis was submitted before it. Sequence numbers enter
    /// `in_prepare` in increasing order, so eligibility never reverts.
    fn eligible(&self, seq: u64) -> bool {
        self.in_prepare.first().is_none_or(|&min| seq < min)
    }
}

/// Queue state shared between the manager and its workers.
pub(crate) struct ManagerState {
    queues: Mutex<Queues>,
    consumer: Condvar,
    producer: Condvar,
    encoders: [Mutex<Box<dyn Encoder>>; 6],
}

impl ManagerState {
    pub(crate) fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::new()),
            consumer: Condvar::new(),
            producer: Condvar::new(),
            encoders: new_codec_set().map(Mutex::new),
        }
    }

    /// Runs `f` against one codec instance. An ordered codec's mutex is
    /// uncontended by construction; unordered codecs are stateless.
    pub(crate) fn with_encoder<R>(
        &self,
        codec: CodecId,
        f: impl FnOnce(&mut dyn Encoder) -> R,
    ) -> R {
        let mut guard = self.encoders[codec.index()]
            .lock()
            .expect("encoder mutex poisoned");
        f(guard.as_mut())
    }

    /// Appends a work item and wakes one worker.
    pub(crate) fn queue_sub_rect(&self, item: WorkItem) {
        let mut guard = self.lock();
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.work.push_back((seq, item));
        guard.rect_count += 1;
        self.consumer.notify_one();
    }

    /// Drains output in submission order, handing each item to `emit`,
    /// until every queued rectangle has been accounted for. Errors (codec
    /// failures or emit failures) abort the update but never the drain:
    /// all queues are empty when this returns.
    pub(crate) fn flush(&self, mut emit: impl FnMut(OutputItem) -> Result<()>) -> Result<()> {
        let mut first_err: Option<EncodeError> = None;
        let mut guard = self.lock();
        while guard.rect_count > 0 {
            let next = guard.next_emit;
            let Some(output) = guard.output.remove(&next) else {
                guard = self.producer.wait(guard).expect("queue mutex poisoned");
                continue;
            };
            guard.next_emit += 1;
            drop(guard);

            let outcome = match output.result {
                Ok(_) => emit(output),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }

            guard = self.lock();
            guard.rect_count = guard
                .rect_count
                .checked_sub(1)
                .expect("rect count underflow");
        }
        assert!(guard.work.is_empty(), "work left after flush");
        assert!(guard.in_prepare.is_empty(), "analysis left after flush");
        assert!(
            guard.ordered.iter().all(BTreeMap::is_empty),
            "ordered queue left after flush"
        );
        assert!(guard.output.is_empty(), "output left after flush");
        drop(guard);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().expect("queue mutex poisoned")
    }

    fn encode(&self, prep: PreparedItem) -> OutputItem {
        let pixels = RectPixels {
            rect: prep.rect,
            format: &prep.format,
            data: &prep.pixels,
        };
        let mut out = BytesMut::new();
        let result = self
            .with_encoder(prep.codec, |enc| {
                enc.write_rect(&pixels, &prep.palette, &prep.caps, &mut out)
            })
            .map(|()| out);
        OutputItem {
            rect: prep.rect,
            class: prep.class,
            codec: prep.codec,
            result,
        }
    }

    fn worker_loop(&self) {
        let mut guard = self.lock();
        loop {
            if guard.stop {
                break;
            }
            let Some((seq, item)) = guard.work.pop_front() else {
                guard = self.consumer.wait(guard).expect("queue mutex poisoned");
                continue;
            };
            guard.in_prepare.insert(seq);
            drop(guard);

            let selection = Arc::clone(&item.selection);
            let prep = prepare_rect(item);
            let codec = prep.codec;

            guard = self.lock();
            guard.in_prepare.remove(&seq);

            if selection.flags_of(codec).ordered {
                guard.ordered[codec.index()].insert(seq, prep);
            } else {
                drop(guard);
                let output = self.encode(prep);
                guard = self.lock();
                guard.output.insert(seq, output);
                self.producer.notify_one();
            }

            // This item leaving analysis may have unblocked an ordered
            // queue head (this codec's or another's).
            guard = self.drain_eligible(guard);
        }
    }

    /// Encodes every ordered-queue head that has become eligible. At most
    /// one worker drains a given codec at a time; the drainer keeps going
    /// until the queue is empty or its head must wait again.
    fn drain_eligible<'a>(&'a self, mut guard: MutexGuard<'a, Queues>) -> MutexGuard<'a, Queues> {
        loop {
            let mut found = None;
            for idx in 0..guard.ordered.len() {
                if guard.draining[idx] {
                    continue;
                }
                if let Some((&seq, _)) = guard.ordered[idx].first_key_value() {
                    if guard.eligible(seq) {
                        found = Some(idx);
                        break;
                    }
                }
            }
            let Some(idx) = found else {
                return guard;
            };

            guard.draining[idx] = true;
            loop {
                let Some((&seq, _)) = guard.ordered[idx].first_key_value() else {
                    break;
                };
                if !guard.eligible(seq) {
                    break;
                }
                let (seq, prep) = guard.ordered[idx]
                    .pop_first()
                    .expect("ordered queue head vanished");
                drop(guard);
                let output = self.encode(prep);
                guard = self.lock();
                guard.output.insert(seq, output);
                self.producer.notify_one();
            }
            guard.draining[idx] = false;
        }
    }
}

/// Analysis and pixel preparation for one work item.
fn prepare_rect(item: WorkItem) -> PreparedItem {
    let caps = item.caps;
    let selection = item.selection;
    let rect = item.rect;
    let area = rect.area();

    let max_colours = colour_budget(&caps, &selection, area);

    let native_pf = item.surface.pixel_format().clone();
    let native_bpp = native_pf.bytes_per_pixel();
    let (buffer, stride) = item.surface.get_buffer(rect);

    let analysis = analyse_rect(
        buffer,
        stride,
        rect.width() as usize,
        rect.height() as usize,
        &native_pf,
        max_colours,
    );

    let use_rle = analysis.rle_runs as i64 <= 2 * area;
    let class = classify(analysis.palette.size(), use_rle);
    let codec = selection.codec_for(class);

    let packed = pack_rect(buffer, stride, rect, native_bpp);

    let (pixels, format, palette) =
        if selection.flags_of(codec).native_pf || native_pf == caps.pixel_format {
            (packed, native_pf, analysis.palette)
        } else {
            let converted = translate_pixels(&packed, &native_pf, &caps.pixel_format).to_vec();
            let mut converted_palette = Palette::new();
            for &colour in analysis.palette.colours() {
                converted_palette.insert(translate_pixel(colour, &native_pf, &caps.pixel_format));
            }
            (converted, caps.pixel_format.clone(), converted_palette)
        };

    PreparedItem {
        rect,
        class,
        codec,
        format,
        pixels,
        palette,
        caps,
    }
}

/// The analyzer's colour budget for one rectangle.
fn colour_budget(caps: &PeerCaps, selection: &Selection, area: i64) -> usize {
    // Higher compression levels spend less effort building a palette;
    // inherited behavior from the Tight encoder.
    let divisor = if caps.compress_level >= 0 {
        i64::from(caps.compress_level) * 8
    } else {
        2 * 8
    }
    .max(4);

    let mut max_colours = (area / divisor) as usize;

    // Exception for JPEG full colour, also inherited from Tight.
    if selection.codec_for(ContentClass::FullColour) == CodecId::TightJpeg {
        max_colours = if caps.compress_level >= 0 && caps.compress_level < 2 {
            24
        } else {
            96
        };
    }

    max_colours = max_colours.clamp(2, MAX_PALETTE_SIZE);

    for class in [ContentClass::IndexedRle, ContentClass::Indexed] {
        let limit = selection.max_palette_of(selection.codec_for(class));
        if limit != 0 {
            max_colours = max_colours.min(limit);
        }
    }

    max_colours
}

/// The worker threads. Spawned at construction, joined on drop.
pub(crate) struct WorkerPool {
    state: Arc<ManagerState>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(state: Arc<ManagerState>) -> Self {
        let cores = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let count = cores.min(MAX_WORKERS).max(1);
        log::info!("Creating {count} encoder thread(s) ({cores} CPU core(s) detected)");

        let threads = (0..count)
            .map(|i| {
                let state = Arc::clone(&state);
                thread::Builder::new()
                    .name(format!("encode-worker-{i}"))
                    .spawn(move || state.worker_loop())
                    .expect("failed to spawn encoder thread")
            })
            .collect();

        Self { state, threads }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut guard = self.state.lock();
            guard.stop = true;
        }
        self.state.consumer.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
