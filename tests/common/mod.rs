//! Minimal decoders for round-trip validation of the pipeline output.
//!
//! These are test-only implementations, just complete enough to walk a
//! FramebufferUpdate message and reconstruct the lossless codecs' pixels.
//! Protocol headers are big-endian; pixel data follows the pixel format's
//! endianness flag.

use bytes::{Buf, BytesMut};
use flate2::{Decompress, FlushDecompress};
use rfb_encode::{PixelFormat, Rect};

const ENCODING_RAW: i32 = 0;
const ENCODING_COPYRECT: i32 = 1;
const ENCODING_RRE: i32 = 2;
const ENCODING_HEXTILE: i32 = 5;
const ENCODING_TIGHT: i32 = 7;
const ENCODING_ZRLE: i32 = 16;
const ENCODING_LAST_RECT: i32 = -224;

/// One decoded rectangle header.
#[derive(Debug, Clone, Copy)]
pub struct RectHeader {
    pub rect: Rect,
    pub encoding: i32,
}

/// A test client: applies updates onto a pixel-value framebuffer.
pub struct Client {
    pub pf: PixelFormat,
    pub width: i32,
    pub height: i32,
    /// Decoded pixel values, row-major.
    pub fb: Vec<u32>,
    zrle_stream: Decompress,
    tight_streams: [Decompress; 4],
}

impl Client {
    pub fn new(pf: PixelFormat, width: i32, height: i32) -> Self {
        Self {
            pf,
            width,
            height,
            fb: vec![0; (width * height) as usize],
            zrle_stream: Decompress::new(true),
            tight_streams: [
                Decompress::new(true),
                Decompress::new(true),
                Decompress::new(true),
                Decompress::new(true),
            ],
        }
    }

    pub fn pixel(&self, x: i32, y: i32) -> u32 {
        debug_assert!(x < self.width && y < self.height, "pixel out of bounds");
        self.fb[(y * self.width + x) as usize]
    }

    /// Parses one FramebufferUpdate message and applies every rectangle.
    /// Returns the headers of the applied rectangles (LastRect terminator
    /// excluded).
    pub fn apply_update(&mut self, buf: &mut BytesMut) -> Vec<RectHeader> {
        assert_eq!(buf.get_u8(), 0, "not a FramebufferUpdate");
        buf.advance(1); // padding
        let num_rects = buf.get_u16();

        let mut headers = Vec::new();
        let mut remaining = num_rects as usize;
        loop {
            if num_rects != 0xFFFF && remaining == 0 {
                break;
            }
            let rect = Rect::from_xywh(
                i32::from(buf.get_u16()),
                i32::from(buf.get_u16()),
                i32::from(buf.get_u16()),
                i32::from(buf.get_u16()),
            );
            let encoding = buf.get_i32();
            if encoding == ENCODING_LAST_RECT {
                assert_eq!(num_rects, 0xFFFF, "terminator without sentinel");
                break;
            }
            self.decode_rect(rect, encoding, buf);
            headers.push(RectHeader { rect, encoding });
            remaining = remaining.saturating_sub(1);
        }
        headers
    }

    fn put(&mut self, x: i32, y: i32, pixel: u32) {
        self.fb[(y * self.width + x) as usize] = pixel;
    }

    fn fill(&mut self, rect: Rect, pixel: u32) {
        for y in rect.tl.y..rect.br.y {
            for x in rect.tl.x..rect.br.x {
                self.put(x, y, pixel);
            }
        }
    }

    fn read_pixel(&self, buf: &mut BytesMut) -> u32 {
        let bpp = self.pf.bytes_per_pixel();
        let pixel = self.pf.read_pixel(&buf[..bpp]);
        buf.advance(bpp);
        pixel
    }

    fn decode_rect(&mut self, rect: Rect, encoding: i32, buf: &mut BytesMut) {
        match encoding {
            ENCODING_RAW => self.decode_raw(rect, buf),
            ENCODING_COPYRECT => self.decode_copyrect(rect, buf),
            ENCODING_RRE => self.decode_rre(rect, buf),
            ENCODING_HEXTILE => self.decode_hextile(rect, buf),
            ENCODING_ZRLE => self.decode_zrle(rect, buf),
            ENCODING_TIGHT => self.decode_tight(rect, buf),
            other => panic!("unexpected encoding {other}"),
        }
    }

    fn decode_raw(&mut self, rect: Rect, buf: &mut BytesMut) {
        for y in rect.tl.y..rect.br.y {
            for x in rect.tl.x..rect.br.x {
                let pixel = self.read_pixel(buf);
                self.put(x, y, pixel);
            }
        }
    }

    fn decode_copyrect(&mut self, rect: Rect, buf: &mut BytesMut) {
        let src_x = i32::from(buf.get_u16());
        let src_y = i32::from(buf.get_u16());
        let snapshot = self.fb.clone();
        for dy in 0..rect.height() {
            for dx in 0..rect.width() {
                let src = ((src_y + dy) * self.width + src_x + dx) as usize;
                self.put(rect.tl.x + dx, rect.tl.y + dy, snapshot[src]);
            }
        }
    }

    fn decode_rre(&mut self, rect: Rect, buf: &mut BytesMut) {
        let count = buf.get_u32();
        let bg = self.read_pixel(buf);
        self.fill(rect, bg);
        for _ in 0..count {
            let colour = self.read_pixel(buf);
            let x = i32::from(buf.get_u16());
            let y = i32::from(buf.get_u16());
            let w = i32::from(buf.get_u16());
            let h = i32::from(buf.get_u16());
            self.fill(
                Rect::from_xywh(rect.tl.x + x, rect.tl.y + y, w, h),
                colour,
            );
        }
    }

    fn decode_hextile(&mut self, rect: Rect, buf: &mut BytesMut) {
        const RAW: u8 = 1;
        const BACKGROUND: u8 = 2;
        const FOREGROUND: u8 = 4;
        const ANY_SUBRECTS: u8 = 8;
        const COLOURED: u8 = 16;

        let mut bg = 0u32;
        let mut fg = 0u32;

        let mut ty = rect.tl.y;
        while ty < rect.br.y {
            let th = 16.min(rect.br.y - ty);
            let mut tx = rect.tl.x;
            while tx < rect.br.x {
                let tw = 16.min(rect.br.x - tx);
                let tile = Rect::from_xywh(tx, ty, tw, th);
                let sub = buf.get_u8();

                if sub & RAW != 0 {
                    self.decode_raw(tile, buf);
                } else {
                    if sub & BACKGROUND != 0 {
                        bg = self.read_pixel(buf);
                    }
                    if sub & FOREGROUND != 0 {
                        fg = self.read_pixel(buf);
                    }
                    self.fill(tile, bg);
                    if sub & ANY_SUBRECTS != 0 {
                        let count = buf.get_u8();
                        for _ in 0..count {
                            let colour = if sub & COLOURED != 0 {
                                self.read_pixel(buf)
                            } else {
                                fg
                            };
                            let xy = buf.get_u8();
                            let wh = buf.get_u8();
                            let sr = Rect::from_xywh(
                                tx + i32::from(xy >> 4),
                                ty + i32::from(xy & 0xF),
                                i32::from(wh >> 4) + 1,
                                i32::from(wh & 0xF) + 1,
                            );
                            self.fill(sr, colour);
                        }
                    }
                }
                tx += tw;
            }
            ty += th;
        }
    }

    // ZRLE

    fn bytes_per_cpixel(&self) -> usize {
        let pf = &self.pf;
        if pf.true_colour_flag != 0 && pf.bits_per_pixel == 32 && pf.depth <= 24 {
            let lower = (u32::from(pf.red_max) << pf.red_shift) < (1 << 24)
                && (u32::from(pf.green_max) << pf.green_shift) < (1 << 24)
                && (u32::from(pf.blue_max) << pf.blue_shift) < (1 << 24);
            let upper = pf.red_shift > 7 && pf.green_shift > 7 && pf.blue_shift > 7;
            if lower || upper {
                return 3;
            }
        }
        pf.bytes_per_pixel()
    }

    fn read_cpixel(&self, data: &mut BytesMut) -> u32 {
        let pf = &self.pf;
        let size = self.bytes_per_cpixel();
        let big_endian = pf.big_endian_flag != 0;
        let pixel = match size {
            1 => u32::from(data[0]),
            2 => {
                if big_endian {
                    u32::from(u16::from_be_bytes([data[0], data[1]]))
                } else {
                    u32::from(u16::from_le_bytes([data[0], data[1]]))
                }
            }
            3 => {
                let lower = (u32::from(pf.red_max) << pf.red_shift) < (1 << 24)
                    && (u32::from(pf.green_max) << pf.green_shift) < (1 << 24)
                    && (u32::from(pf.blue_max) << pf.blue_shift) < (1 << 24);
                let keep_low = (lower && !big_endian)
                    || (pf.red_shift > 7 && pf.green_shift > 7 && pf.blue_shift > 7 && big_endian);
                let mut bytes = [0u8; 4];
                if keep_low {
                    bytes[..3].copy_from_slice(&data[..3]);
                } else {
                    bytes[1..].copy_from_slice(&data[..3]);
                }
                if big_endian {
                    u32::from_be_bytes(bytes)
                } else {
                    u32::from_le_bytes(bytes)
                }
            }
            _ => {
                if big_endian {
                    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
                } else {
                    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
                }
            }
        };
        data.advance(size);
        pixel
    }

    fn inflate(stream: &mut Decompress, input: &[u8]) -> BytesMut {
        let mut out = Vec::new();
        let mut buf = vec![0u8; input.len() * 16 + 4096];
        let mut consumed = 0usize;
        loop {
            let before_in = stream.total_in();
            let before_out = stream.total_out();
            stream
                .decompress(&input[consumed..], &mut buf, FlushDecompress::Sync)
                .expect("inflate failed");
            consumed += (stream.total_in() - before_in) as usize;
            let produced = (stream.total_out() - before_out) as usize;
            out.extend_from_slice(&buf[..produced]);
            if consumed >= input.len() && produced < buf.len() {
                break;
            }
            if produced == 0 && consumed >= input.len() {
                break;
            }
        }
        BytesMut::from(&out[..])
    }

    fn decode_zrle(&mut self, rect: Rect, buf: &mut BytesMut) {
        let len = buf.get_u32() as usize;
        let compressed = buf.split_to(len);
        let mut data = Self::inflate(&mut self.zrle_stream, &compressed);

        let mut ty = rect.tl.y;
        while ty < rect.br.y {
            let th = 64.min(rect.br.y - ty);
            let mut tx = rect.tl.x;
            while tx < rect.br.x {
                let tw = 64.min(rect.br.x - tx);
                self.decode_zrle_tile(Rect::from_xywh(tx, ty, tw, th), &mut data);
                tx += tw;
            }
            ty += th;
        }
        assert!(data.is_empty(), "trailing ZRLE tile data");
    }

    fn decode_zrle_tile(&mut self, tile: Rect, data: &mut BytesMut) {
        let sub = data.get_u8();
        let w = tile.width() as usize;
        let h = tile.height() as usize;

        match sub {
            0 => {
                // Raw
                for y in 0..h {
                    for x in 0..w {
                        let pixel = self.read_cpixel(data);
                        self.put(tile.tl.x + x as i32, tile.tl.y + y as i32, pixel);
                    }
                }
            }
            1 => {
                let pixel = self.read_cpixel(data);
                self.fill(tile, pixel);
            }
            2..=127 => {
                // Packed palette, row-aligned
                let palette: Vec<u32> =
                    (0..sub).map(|_| self.read_cpixel(data)).collect();
                let bits = match palette.len() {
                    0..=2 => 1,
                    3..=4 => 2,
                    _ => 4,
                };
                for y in 0..h {
                    let mut byte = 0u8;
                    let mut nbits = 0;
                    for x in 0..w {
                        if nbits == 0 {
                            byte = data.get_u8();
                            nbits = 8;
                        }
                        let index = (byte >> (8 - bits)) & ((1 << bits) - 1);
                        byte <<= bits;
                        nbits -= bits;
                        self.put(
                            tile.tl.x + x as i32,
                            tile.tl.y + y as i32,
                            palette[index as usize],
                        );
                    }
                }
            }
            128 => {
                // Plain RLE
                let mut i = 0;
                while i < w * h {
                    let pixel = self.read_cpixel(data);
                    let mut run = 1usize;
                    loop {
                        let byte = data.get_u8();
                        run += byte as usize;
                        if byte != 255 {
                            break;
                        }
                    }
                    for _ in 0..run {
                        self.put(
                            tile.tl.x + (i % w) as i32,
                            tile.tl.y + (i / w) as i32,
                            pixel,
                        );
                        i += 1;
                    }
                }
            }
            _ => {
                // Palette RLE
                let size = sub & 127;
                let palette: Vec<u32> =
                    (0..size).map(|_| self.read_cpixel(data)).collect();
                let mut i = 0;
                while i < w * h {
                    let byte = data.get_u8();
                    let index = byte & 127;
                    let mut run = 1usize;
                    if byte & 128 != 0 {
                        loop {
                            let b = data.get_u8();
                            run += b as usize;
                            if b != 255 {
                                break;
                            }
                        }
                    }
                    for _ in 0..run {
                        self.put(
                            tile.tl.x + (i % w) as i32,
                            tile.tl.y + (i / w) as i32,
                            palette[index as usize],
                        );
                        i += 1;
                    }
                }
            }
        }
    }

    // Tight

    fn tight_pack24(&self) -> bool {
        self.pf.bits_per_pixel == 32
            && self.pf.depth <= 24
            && self.pf.red_max == 255
            && self.pf.green_max == 255
            && self.pf.blue_max == 255
    }

    fn read_tpixel(&self, data: &mut BytesMut) -> u32 {
        if self.tight_pack24() {
            let r = u32::from(data[0]);
            let g = u32::from(data[1]);
            let b = u32::from(data[2]);
            data.advance(3);
            (r << self.pf.red_shift) | (g << self.pf.green_shift) | (b << self.pf.blue_shift)
        } else {
            let bpp = self.pf.bytes_per_pixel();
            let pixel = self.pf.read_pixel(&data[..bpp]);
            data.advance(bpp);
            pixel
        }
    }

    fn tpixel_size(&self) -> usize {
        if self.tight_pack24() {
            3
        } else {
            self.pf.bytes_per_pixel()
        }
    }

    fn read_compact_length(buf: &mut BytesMut) -> usize {
        let mut len = usize::from(buf.get_u8());
        if len & 0x80 != 0 {
            len &= 0x7F;
            let b = usize::from(buf.get_u8());
            len |= (b & 0x7F) << 7;
            if b & 0x80 != 0 {
                len |= usize::from(buf.get_u8()) << 14;
            }
        }
        len
    }

    /// Reads a basic-compression data block whose uncompressed size is
    /// `raw_len`: raw when under the 12-byte threshold, else a
    /// compact-length-framed zlib block on `stream_id`.
    fn read_tight_data(&mut self, raw_len: usize, stream_id: usize, buf: &mut BytesMut) -> BytesMut {
        if raw_len < 12 {
            buf.split_to(raw_len)
        } else {
            let len = Self::read_compact_length(buf);
            let compressed = buf.split_to(len);
            Self::inflate(&mut self.tight_streams[stream_id], &compressed)
        }
    }

    fn decode_tight(&mut self, rect: Rect, buf: &mut BytesMut) {
        let control = buf.get_u8();
        let op = control >> 4;
        let w = rect.width() as usize;
        let h = rect.height() as usize;

        if op == 0x08 {
            // Fill
            let pixel = self.read_tpixel(buf);
            self.fill(rect, pixel);
            return;
        }
        if op == 0x09 {
            // JPEG: structural validity only
            let len = Self::read_compact_length(buf);
            let jpeg = buf.split_to(len);
            assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "not a JPEG payload");
            return;
        }

        // Basic compression
        let stream_id = usize::from(op & 0x03);
        if op & 0x04 != 0 {
            let filter = buf.get_u8();
            assert_eq!(filter, 1, "unexpected tight filter");
            let size = usize::from(buf.get_u8()) + 1;
            let palette: Vec<u32> = (0..size).map(|_| self.read_tpixel(buf)).collect();

            if size == 2 {
                let row_bytes = w.div_ceil(8);
                let mut data = self.read_tight_data(row_bytes * h, stream_id, buf);
                for y in 0..h {
                    for x in 0..w {
                        let byte = data[y * row_bytes + x / 8];
                        let bit = byte >> (7 - x % 8) & 1;
                        self.put(
                            rect.tl.x + x as i32,
                            rect.tl.y + y as i32,
                            palette[bit as usize],
                        );
                    }
                }
                data.advance(row_bytes * h);
            } else {
                let mut data = self.read_tight_data(w * h, stream_id, buf);
                for i in 0..w * h {
                    let index = data[i] as usize;
                    self.put(
                        rect.tl.x + (i % w) as i32,
                        rect.tl.y + (i / w) as i32,
                        palette[index],
                    );
                }
                data.advance(w * h);
            }
        } else {
            // Full colour
            let mut data = self.read_tight_data(w * h * self.tpixel_size(), stream_id, buf);
            for i in 0..w * h {
                let pixel = self.read_tpixel(&mut data);
                self.put(
                    rect.tl.x + (i % w) as i32,
                    rect.tl.y + (i / w) as i32,
                    pixel,
                );
            }
        }
    }
}
