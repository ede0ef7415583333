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

//! # rfb-encode
//!
//! Server-side framebuffer encoding pipeline for the RFB (VNC) protocol.
//!
//! Given a dirty region of a pixel surface and a snapshot of a peer's
//! capabilities, the pipeline partitions the region into sub-rectangles,
//! classifies each by pixel content, selects the best wire encoding,
//! compresses the pixels in parallel across worker threads, and
//! serializes the results as a single `FramebufferUpdate` message in a
//! deterministic order.
//!
//! ## Features
//!
//! - **6 codecs**: Raw, RRE, Hextile, Tight, Tight-JPEG, ZRLE, each
//!   selected per content class (solid / bitmap / indexed / full colour,
//!   with and without RLE)
//! - **Solid-region search**: large monochromatic blocks are carved out
//!   and sent as one-colour rectangles before general encoding
//! - **Parallel encoding**: a bounded worker pool analyzes and encodes
//!   sub-rectangles while stream-compressed codecs keep strict
//!   submission order on the wire
//! - **All pixel formats**: 8/16/32-bit true colour, either endianness,
//!   translated to whatever the peer asked for
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::BytesMut;
//! use rfb_encode::{
//!     EncodeManager, OwnedSurface, PeerCaps, PixelFormat, PixelSurface, Rect, UpdateInfo,
//! };
//!
//! let surface: Arc<dyn PixelSurface> =
//!     Arc::new(OwnedSurface::blank(PixelFormat::rgb888(), 1920, 1080));
//! let caps = Arc::new(PeerCaps::default());
//!
//! let mut ui = UpdateInfo::default();
//! ui.changed.add_rect(Rect::from_xywh(0, 0, 1920, 1080));
//!
//! let mut manager = EncodeManager::new();
//! let mut out = BytesMut::new();
//! manager.write_update(&ui, &surface, None, &caps, &mut out)?;
//! // `out` now holds one complete FramebufferUpdate message.
//! # Ok::<(), rfb_encode::EncodeError>(())
//! ```
//!
//! Out of scope: the transport socket and handshake, authentication, and
//! client-side decoding. The pixel source is anything implementing
//! [`PixelSurface`]; the peer connection appears only as a [`PeerCaps`]
//! snapshot and an output byte buffer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analyze;
pub mod caps;
pub mod config;
pub mod encoding;
pub mod error;
pub mod manager;
pub mod messages;
pub mod palette;
pub mod protocol;
pub mod region;
pub mod stats;
pub mod surface;
pub mod translate;

// Internal modules
pub mod jpeg;
mod worker;

// Re-exports
pub use caps::{PeerCaps, Subsampling};
pub use config::Config;
pub use encoding::{CodecId, ContentClass, Encoder, EncoderFlags};
pub use error::{EncodeError, Result};
pub use manager::{EncodeManager, UpdateInfo};
pub use messages::{
    write_cut_text, write_extended_clipboard_request, write_fence, ClipboardEvent, MsgReader,
    UpdateWriter,
};
pub use palette::Palette;
pub use protocol::PixelFormat;
pub use region::{Point, Rect, Region};
pub use stats::Stats;
pub use surface::{OwnedSurface, PixelSurface};
