//! Per-message deflate codec (RFC 7692)
//!
//! Two mirror handlers carrying streaming DEFLATE state across frames and
//! fragments. The encoder compresses outbound data frames, sets RSV1 and
//! strips the 4-byte tail from the final fragment of each message; the
//! decoder re-appends the tail and inflates through a raw stream whose
//! LZ77 window survives across fragments (and across messages unless
//! `no_context` resets it).
//!
//! Both handlers rely on the pipeline's single-thread-per-channel
//! discipline for their own state and keep every buffer they touch
//! correctly counted.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::alloc::BufAllocator;
use crate::buffer::ByteBuf;
use crate::error::{Error, Result};
use crate::frame::{Frame, OpCode, RSV1};
use crate::pipeline::{HandlerContext, InboundHandler, OutboundHandler};
use crate::DEFLATE_CHUNK_SIZE;

/// Tail bytes stripped from the last fragment after compression and
/// re-appended before decompression
pub const FRAME_TAIL: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Canonical empty DEFLATE block: one final empty non-compressed block
pub const EMPTY_DEFLATE_BLOCK: [u8; 1] = [0x00];

/// Minimum LZ77 window size (512 bytes = 2^9)
pub const MIN_WINDOW_BITS: u8 = 9;

/// Maximum LZ77 window size (32KB = 2^15)
pub const MAX_WINDOW_BITS: u8 = 15;

/// Runaway guard for the stream drain loops
const MAX_STREAM_ITERATIONS: u32 = 100_000;

/// Configuration shared by the encoder and decoder handlers
#[derive(Debug, Clone)]
pub struct DeflateConfig {
    /// Compression level (0-9, where 0 is no compression, 9 is max)
    pub compression_level: u32,
    /// LZ77 sliding window size in bits (9-15)
    pub window_bits: u8,
    /// If true, the sliding window is reset at the end of every message
    pub no_context: bool,
    /// Upper bound on a decompressed message; guards against
    /// decompression bombs
    pub max_message_size: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            window_bits: MAX_WINDOW_BITS,
            no_context: false,
            max_message_size: 64 * 1024 * 1024,
        }
    }
}

impl DeflateConfig {
    /// Config optimized for low memory usage
    pub fn low_memory() -> Self {
        Self {
            compression_level: 1,
            window_bits: MIN_WINDOW_BITS,
            no_context: true,
            ..Default::default()
        }
    }

    /// Config optimized for best compression ratio
    pub fn best_compression() -> Self {
        Self {
            compression_level: 9,
            window_bits: MAX_WINDOW_BITS,
            no_context: false,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(Error::Codec("compression level out of range (0-9)"));
        }
        if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&self.window_bits) {
            return Err(Error::Codec("window bits out of range (9-15)"));
        }
        Ok(())
    }
}

/// Decides per frame whether the encoder leaves it untouched
pub trait SkipFilter {
    fn must_skip(&self, frame: &Frame) -> bool;
}

/// Compress everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSkip;

impl SkipFilter for NeverSkip {
    fn must_skip(&self, _frame: &Frame) -> bool {
        false
    }
}

/// Skip frames whose payload is below a size threshold; tiny payloads
/// rarely benefit from compression
#[derive(Debug, Clone, Copy)]
pub struct MinSizeSkipFilter {
    threshold: usize,
}

impl MinSizeSkipFilter {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl SkipFilter for MinSizeSkipFilter {
    fn must_skip(&self, frame: &Frame) -> bool {
        frame.payload.readable_bytes() < self.threshold
    }
}

/// Streaming raw-deflate compressor draining into pooled chunks
struct Deflater {
    raw: Compress,
}

impl Deflater {
    fn new(level: u32, window_bits: u8) -> Self {
        // Raw deflate: no zlib header, negotiated window bits.
        let raw = Compress::new_with_window_bits(Compression::new(level), false, window_bits);
        Self { raw }
    }

    /// Feed `input` through the stream with a sync flush, appending every
    /// produced chunk to the composite `out`
    fn compress_into(
        &mut self,
        input: &[u8],
        alloc: &dyn BufAllocator,
        out: &mut ByteBuf,
    ) -> Result<()> {
        let mut total_in = 0usize;
        let mut iterations = 0u32;
        loop {
            iterations += 1;
            if iterations > MAX_STREAM_ITERATIONS {
                return Err(Error::Compression(
                    "compression took too many iterations".into(),
                ));
            }

            let mut chunk = alloc.buffer(DEFLATE_CHUNK_SIZE);
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let space;
            let outcome = {
                let dst = chunk.writable_slice()?;
                space = dst.len();
                self.raw.compress(&input[total_in..], dst, FlushCompress::Sync)
            };
            let status = match outcome {
                Ok(status) => status,
                Err(e) => {
                    let _ = chunk.release();
                    return Err(Error::Compression(format!("deflate error: {}", e)));
                }
            };

            total_in += (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;
            if produced > 0 {
                chunk.set_writer_index(produced)?;
                out.add_component(true, chunk)?;
            } else {
                let _ = chunk.release();
            }

            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError => {
                    // flush is fully drained once input is gone and the
                    // last chunk was not filled to the brim
                    if total_in >= input.len() && produced < space {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Streaming raw inflater draining into pooled chunks
struct Inflater {
    raw: Decompress,
}

impl Inflater {
    fn new(window_bits: u8) -> Self {
        let raw = Decompress::new_with_window_bits(false, window_bits);
        Self { raw }
    }

    /// Inflate `input`, appending produced chunks to `out` and failing with
    /// [`Error::MessageTooLarge`] once `max_size` is exceeded
    fn inflate_into(
        &mut self,
        input: &[u8],
        alloc: &dyn BufAllocator,
        out: &mut ByteBuf,
        max_size: usize,
    ) -> Result<()> {
        let mut total_in = 0usize;
        let mut iterations = 0u32;
        loop {
            iterations += 1;
            if iterations > MAX_STREAM_ITERATIONS {
                return Err(Error::Compression(
                    "decompression took too many iterations".into(),
                ));
            }
            if out.readable_bytes() > max_size {
                return Err(Error::MessageTooLarge);
            }

            let mut chunk = alloc.buffer(DEFLATE_CHUNK_SIZE);
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let space;
            let outcome = {
                let dst = chunk.writable_slice()?;
                space = dst.len();
                self.raw
                    .decompress(&input[total_in..], dst, FlushDecompress::Sync)
            };
            let status = match outcome {
                Ok(status) => status,
                Err(e) => {
                    let _ = chunk.release();
                    return Err(Error::Compression(format!("inflate error: {}", e)));
                }
            };

            total_in += (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;
            if produced > 0 {
                chunk.set_writer_index(produced)?;
                out.add_component(true, chunk)?;
            } else {
                let _ = chunk.release();
            }

            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError => {
                    if total_in >= input.len() && produced < space {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Per-message encoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageState {
    /// Between messages
    Idle,
    /// A fragmented message is in flight; only continuations may follow
    MidMessage,
    /// The final fragment is being emitted
    Finalizing,
}

/// Outbound handler compressing data frames per RFC 7692
pub struct DeflateEncoder {
    config: DeflateConfig,
    filter: Box<dyn SkipFilter + Send>,
    deflater: Option<Deflater>,
    state: MessageState,
}

impl DeflateEncoder {
    /// Encoder that compresses every eligible frame
    pub fn new(config: DeflateConfig) -> Result<Self> {
        Self::with_filter(config, Box::new(NeverSkip))
    }

    /// Encoder with a per-frame skip policy
    pub fn with_filter(config: DeflateConfig, filter: Box<dyn SkipFilter + Send>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            filter,
            deflater: None,
            state: MessageState::Idle,
        })
    }

    fn finish_message(&mut self) {
        if self.config.no_context {
            // the next message recreates the stream with a fresh window
            self.deflater = None;
        }
        self.state = MessageState::Idle;
    }
}

impl OutboundHandler for DeflateEncoder {
    fn encode(
        &mut self,
        ctx: &dyn HandlerContext,
        frame: Frame,
        out: &mut Vec<Frame>,
    ) -> Result<()> {
        if self.filter.must_skip(&frame) {
            out.push(frame);
            return Ok(());
        }
        // already compressed upstream
        if frame.rsv1() {
            out.push(frame);
            return Ok(());
        }
        if !frame.opcode.is_data() {
            let _ = frame.release();
            return Err(Error::Codec("unexpected frame type"));
        }
        if self.state == MessageState::MidMessage && frame.opcode != OpCode::Continuation {
            let _ = frame.release();
            return Err(Error::Codec("expected a continuation frame"));
        }

        if frame.payload.readable_bytes() == 0 {
            if !frame.fin {
                let _ = frame.release();
                return Err(Error::Codec("cannot compress an empty non-final frame"));
            }
            self.state = MessageState::Finalizing;
            let mut content = ctx.alloc().buffer(EMPTY_DEFLATE_BLOCK.len());
            content.write_bytes(&EMPTY_DEFLATE_BLOCK)?;
            let emitted = Frame {
                opcode: frame.opcode,
                fin: frame.fin,
                rsv: frame.rsv | RSV1,
                payload: content,
            };
            frame.release()?;
            self.finish_message();
            out.push(emitted);
            return Ok(());
        }

        let level = self.config.compression_level;
        let window_bits = self.config.window_bits;
        let deflater = self
            .deflater
            .get_or_insert_with(|| Deflater::new(level, window_bits));

        let mut compressed = ctx.alloc().composite_buffer();
        let fed = frame
            .payload
            .with_readable(|input| deflater.compress_into(input, ctx.alloc(), &mut compressed))
            .and_then(|inner| inner);
        if let Err(e) = fed {
            let _ = compressed.release();
            let _ = frame.release();
            return Err(e);
        }
        if compressed.readable_bytes() == 0 {
            let _ = compressed.release();
            let _ = frame.release();
            return Err(Error::Codec("compression produced no output"));
        }

        if frame.fin {
            self.state = MessageState::Finalizing;
            // drop the trailing {0x00, 0x00, 0xFF, 0xFF}
            if compressed.readable_bytes() < FRAME_TAIL.len() {
                let _ = compressed.release();
                let _ = frame.release();
                return Err(Error::Codec("compressed output shorter than the frame tail"));
            }
            let writer = compressed.writer_index();
            compressed.set_writer_index(writer - FRAME_TAIL.len())?;
        }

        let emitted = Frame {
            opcode: frame.opcode,
            fin: frame.fin,
            // a continuation keeps its RSV bits; the message-starting frame
            // gains RSV1 on top of whatever extensions already set
            rsv: match frame.opcode {
                OpCode::Continuation => frame.rsv,
                _ => frame.rsv | RSV1,
            },
            payload: compressed,
        };
        frame.release()?;
        if frame.fin {
            self.finish_message();
        } else {
            self.state = MessageState::MidMessage;
        }
        out.push(emitted);
        Ok(())
    }

    fn handler_removed(&mut self, _ctx: &dyn HandlerContext) -> Result<()> {
        self.deflater = None;
        self.state = MessageState::Idle;
        Ok(())
    }
}

/// Inbound handler inflating compressed frames per RFC 7692
pub struct DeflateDecoder {
    config: DeflateConfig,
    inflater: Option<Inflater>,
    /// A fragmented compressed message is in progress
    decompressing: bool,
}

impl DeflateDecoder {
    pub fn new(config: DeflateConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inflater: None,
            decompressing: false,
        })
    }
}

impl InboundHandler for DeflateDecoder {
    fn decode(
        &mut self,
        ctx: &dyn HandlerContext,
        frame: Frame,
        out: &mut Vec<Frame>,
    ) -> Result<()> {
        // control frames may interleave with a fragmented message
        if frame.is_control() {
            out.push(frame);
            return Ok(());
        }

        if self.decompressing {
            if frame.opcode != OpCode::Continuation {
                let _ = frame.release();
                return Err(Error::Protocol(
                    "data frame while a fragmented message is in progress",
                ));
            }
        } else {
            if frame.opcode == OpCode::Continuation {
                if frame.rsv1() {
                    let _ = frame.release();
                    return Err(Error::Protocol(
                        "continuation with RSV1 outside a compressed message",
                    ));
                }
                out.push(frame);
                return Ok(());
            }
            if !frame.rsv1() {
                out.push(frame);
                return Ok(());
            }
            self.decompressing = true;
        }

        let window_bits = self.config.window_bits;
        let max_size = self.config.max_message_size;
        let inflater = self
            .inflater
            .get_or_insert_with(|| Inflater::new(window_bits));

        let mut output = ctx.alloc().composite_buffer();
        let mut fed = frame
            .payload
            .with_readable(|input| inflater.inflate_into(input, ctx.alloc(), &mut output, max_size))
            .and_then(|inner| inner);
        if fed.is_ok() && frame.fin {
            // the tail the peer stripped comes back before the last block
            fed = inflater.inflate_into(&FRAME_TAIL, ctx.alloc(), &mut output, max_size);
        }
        if let Err(e) = fed {
            let _ = output.release();
            let _ = frame.release();
            self.inflater = None;
            self.decompressing = false;
            return Err(e);
        }

        let emitted = Frame {
            opcode: frame.opcode,
            fin: frame.fin,
            rsv: frame.rsv & !RSV1,
            payload: output,
        };
        frame.release()?;
        self.decompressing = !frame.fin;
        if frame.fin && self.config.no_context {
            self.inflater = None;
        }
        out.push(emitted);
        Ok(())
    }

    fn handler_removed(&mut self, _ctx: &dyn HandlerContext) -> Result<()> {
        self.inflater = None;
        self.decompressing = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::PooledAllocator;
    use crate::frame::{RSV2, RSV3};

    struct TestContext {
        alloc: PooledAllocator,
    }

    impl TestContext {
        fn new() -> Self {
            Self {
                alloc: PooledAllocator,
            }
        }
    }

    impl HandlerContext for TestContext {
        fn alloc(&self) -> &dyn BufAllocator {
            &self.alloc
        }

        fn fire_channel_read(&self, frame: Frame) {
            let _ = frame.release();
        }

        fn write(&self, frame: Frame) -> Result<()> {
            let _ = frame.release();
            Ok(())
        }

        fn fire_exception_caught(&self, _error: Error) {}
    }

    fn payload(data: &[u8]) -> ByteBuf {
        let mut b = PooledAllocator.buffer(data.len().max(1));
        b.write_bytes(data).unwrap();
        b
    }

    fn drain(buf: &ByteBuf) -> Vec<u8> {
        let mut v = vec![0u8; buf.readable_bytes()];
        buf.get_bytes(buf.reader_index(), &mut v).unwrap();
        v
    }

    /// Reference raw inflater for verifying encoder output
    fn inflate_all(data: &[u8], window_bits: u8) -> Vec<u8> {
        let mut d = Decompress::new_with_window_bits(false, window_bits);
        let mut out = Vec::new();
        let mut scratch = [0u8; 4096];
        let mut total_in = 0usize;
        loop {
            let before_in = d.total_in();
            let before_out = d.total_out();
            let status = d
                .decompress(&data[total_in..], &mut scratch, FlushDecompress::Sync)
                .unwrap();
            total_in += (d.total_in() - before_in) as usize;
            let produced = (d.total_out() - before_out) as usize;
            out.extend_from_slice(&scratch[..produced]);
            match status {
                Status::StreamEnd => break,
                _ => {
                    if total_in >= data.len() && produced < scratch.len() {
                        break;
                    }
                }
            }
        }
        out
    }

    fn pseudo_random(len: usize) -> Vec<u8> {
        let mut state = 0x2545F4914F6CDD1Du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 32) as u8
            })
            .collect()
    }

    fn encode_one(encoder: &mut DeflateEncoder, ctx: &TestContext, frame: Frame) -> Frame {
        let mut out = Vec::new();
        encoder.encode(ctx, frame, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        out.pop().unwrap()
    }

    fn decode_one(decoder: &mut DeflateDecoder, ctx: &TestContext, frame: Frame) -> Frame {
        let mut out = Vec::new();
        decoder.decode(ctx, frame, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        out.pop().unwrap()
    }

    #[test]
    fn test_compressed_binary_frame() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let original = pseudo_random(300);
        let frame = Frame::binary(payload(&original)).with_rsv(RSV3);
        let emitted = encode_one(&mut encoder, &ctx, frame);

        assert_eq!(emitted.rsv, RSV1 | RSV3);
        assert!(emitted.fin);

        let mut wire = drain(&emitted.payload);
        wire.extend_from_slice(&FRAME_TAIL);
        assert_eq!(inflate_all(&wire, MAX_WINDOW_BITS), original);
        emitted.release().unwrap();
    }

    #[test]
    fn test_already_compressed_passthrough() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let content = pseudo_random(300);
        let frame = Frame::binary(payload(&content)).with_rsv(RSV1 | RSV3);
        let emitted = encode_one(&mut encoder, &ctx, frame);

        assert_eq!(emitted.rsv, RSV1 | RSV3);
        assert_eq!(drain(&emitted.payload), content);
        emitted.release().unwrap();
    }

    #[test]
    fn test_fragmented_three_frame_message() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let original = pseudo_random(300);
        let frames = vec![
            Frame::binary(payload(&original[..100]))
                .with_fin(false)
                .with_rsv(RSV3),
            Frame::continuation(payload(&original[100..200]), false).with_rsv(RSV3),
            Frame::continuation(payload(&original[200..]), true).with_rsv(RSV3),
        ];

        let mut wire = Vec::new();
        for (i, frame) in frames.into_iter().enumerate() {
            let emitted = encode_one(&mut encoder, &ctx, frame);
            if i == 0 {
                assert_eq!(emitted.rsv, RSV1 | RSV3);
            } else {
                assert_eq!(emitted.rsv, RSV3);
            }
            wire.extend_from_slice(&drain(&emitted.payload));
            emitted.release().unwrap();
        }

        // all three fragments flow through one stream
        wire.extend_from_slice(&FRAME_TAIL);
        assert_eq!(inflate_all(&wire, MAX_WINDOW_BITS), original);
    }

    #[test]
    fn test_empty_final_text_frame() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let frame = Frame::text(payload(b""));
        let emitted = encode_one(&mut encoder, &ctx, frame);
        assert_eq!(emitted.rsv, RSV1);
        assert_eq!(drain(&emitted.payload), EMPTY_DEFLATE_BLOCK);
        emitted.release().unwrap();
    }

    #[test]
    fn test_empty_non_final_frame_fails() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let frame = Frame::text(payload(b"")).with_fin(false);
        let mut out = Vec::new();
        match encoder.encode(&ctx, frame, &mut out) {
            Err(Error::Codec(_)) => {}
            other => panic!("expected codec error, got {:?}", other),
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_control_frame_rejected_by_encoder() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let frame = Frame::ping(payload(b"ping"));
        let mut out = Vec::new();
        match encoder.encode(&ctx, frame, &mut out) {
            Err(Error::Codec(_)) => {}
            other => panic!("expected codec error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_continuation_mid_message_fails() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let first = Frame::binary(payload(b"part one")).with_fin(false);
        encode_one(&mut encoder, &ctx, first).release().unwrap();

        let rogue = Frame::binary(payload(b"a new message"));
        let mut out = Vec::new();
        match encoder.encode(&ctx, rogue, &mut out) {
            Err(Error::Codec(_)) => {}
            other => panic!("expected codec error, got {:?}", other),
        }
    }

    #[test]
    fn test_selective_skip_filter() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::with_filter(
            DeflateConfig::default(),
            Box::new(MinSizeSkipFilter::new(100)),
        )
        .unwrap();

        let small = Frame::text(payload(b"hi"));
        let emitted = encode_one(&mut encoder, &ctx, small);
        assert_eq!(emitted.rsv, 0);
        assert_eq!(drain(&emitted.payload), b"hi");
        emitted.release().unwrap();

        let big = pseudo_random(300);
        let frame = Frame::binary(payload(&big));
        let emitted = encode_one(&mut encoder, &ctx, frame);
        assert_eq!(emitted.rsv, RSV1);
        let mut wire = drain(&emitted.payload);
        wire.extend_from_slice(&FRAME_TAIL);
        assert_eq!(inflate_all(&wire, MAX_WINDOW_BITS), big);
        emitted.release().unwrap();
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();
        let mut decoder = DeflateDecoder::new(DeflateConfig::default()).unwrap();

        let original = b"a reasonably compressible message, repeated: abcabcabcabcabc";
        let frame = Frame::text(payload(original)).with_rsv(RSV2);
        let compressed = encode_one(&mut encoder, &ctx, frame);
        assert_eq!(compressed.rsv, RSV1 | RSV2);

        let decoded = decode_one(&mut decoder, &ctx, compressed);
        assert_eq!(decoded.rsv, RSV2);
        assert_eq!(decoded.opcode, OpCode::Text);
        assert!(decoded.fin);
        assert_eq!(drain(&decoded.payload), original);
        decoded.release().unwrap();
    }

    #[test]
    fn test_fragmented_roundtrip_with_context_takeover() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();
        let mut decoder = DeflateDecoder::new(DeflateConfig::default()).unwrap();

        // a large sequence fragmented across many frames must decompress
        // to the concatenation of its parts, window state included
        let message: Vec<u8> = (0..16 * 1024u32).map(|i| (i % 251) as u8).collect();
        let mut reassembled = Vec::new();
        let chunks: Vec<&[u8]> = message.chunks(1000).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let fin = i == chunks.len() - 1;
            let frame = if i == 0 {
                Frame::binary(payload(chunk)).with_fin(fin)
            } else {
                Frame::continuation(payload(chunk), fin)
            };
            let compressed = encode_one(&mut encoder, &ctx, frame);
            let decoded = decode_one(&mut decoder, &ctx, compressed);
            assert_eq!(decoded.fin, fin);
            reassembled.extend_from_slice(&drain(&decoded.payload));
            decoded.release().unwrap();
        }
        assert_eq!(reassembled, message);

        // the retained window must keep working for the next message
        let frame = Frame::binary(payload(&message[..2000]));
        let compressed = encode_one(&mut encoder, &ctx, frame);
        let decoded = decode_one(&mut decoder, &ctx, compressed);
        assert_eq!(drain(&decoded.payload), &message[..2000]);
        decoded.release().unwrap();
    }

    #[test]
    fn test_no_context_output_is_order_independent() {
        let message = b"Hello, World! Hello, World! Hello, World!";
        let config = DeflateConfig {
            no_context: true,
            ..Default::default()
        };
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(config).unwrap();

        let first = encode_one(&mut encoder, &ctx, Frame::text(payload(message)));
        let second = encode_one(&mut encoder, &ctx, Frame::text(payload(message)));
        // with the window reset between messages, identical inputs produce
        // identical outputs regardless of what came before
        assert_eq!(drain(&first.payload), drain(&second.payload));
        first.release().unwrap();
        second.release().unwrap();
    }

    #[test]
    fn test_context_takeover_shrinks_repeats() {
        let message = b"Hello, World! Hello, World! Hello, World!";
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let first = encode_one(&mut encoder, &ctx, Frame::text(payload(message)));
        let second = encode_one(&mut encoder, &ctx, Frame::text(payload(message)));
        // the second message references the first through the shared window
        assert!(second.payload.readable_bytes() <= first.payload.readable_bytes());
        first.release().unwrap();
        second.release().unwrap();
    }

    #[test]
    fn test_uncompressed_passthrough_decoder() {
        let ctx = TestContext::new();
        let mut decoder = DeflateDecoder::new(DeflateConfig::default()).unwrap();

        let frame = Frame::text(payload(b"plain"));
        let emitted = decode_one(&mut decoder, &ctx, frame);
        assert_eq!(emitted.rsv, 0);
        assert_eq!(drain(&emitted.payload), b"plain");
        emitted.release().unwrap();
    }

    #[test]
    fn test_control_frames_interleave_mid_message() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();
        let mut decoder = DeflateDecoder::new(DeflateConfig::default()).unwrap();

        let first = Frame::binary(payload(b"fragment one ")).with_fin(false);
        let compressed_first = encode_one(&mut encoder, &ctx, first);
        let decoded_first = decode_one(&mut decoder, &ctx, compressed_first);
        assert!(!decoded_first.fin);

        // a ping in the middle passes through untouched
        let ping = Frame::ping(payload(b"keepalive"));
        let emitted = decode_one(&mut decoder, &ctx, ping);
        assert_eq!(emitted.opcode, OpCode::Ping);
        assert_eq!(drain(&emitted.payload), b"keepalive");
        emitted.release().unwrap();

        let last = Frame::continuation(payload(b"fragment two"), true);
        let compressed_last = encode_one(&mut encoder, &ctx, last);
        let decoded_last = decode_one(&mut decoder, &ctx, compressed_last);
        assert!(decoded_last.fin);

        let mut whole = drain(&decoded_first.payload);
        whole.extend_from_slice(&drain(&decoded_last.payload));
        assert_eq!(whole, b"fragment one fragment two");
        decoded_first.release().unwrap();
        decoded_last.release().unwrap();
    }

    #[test]
    fn test_continuation_with_rsv1_without_message_fails() {
        let ctx = TestContext::new();
        let mut decoder = DeflateDecoder::new(DeflateConfig::default()).unwrap();

        let frame = Frame::continuation(payload(b"bogus"), true).with_rsv(RSV1);
        let mut out = Vec::new();
        match decoder.decode(&ctx, frame, &mut out) {
            Err(Error::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_stream_fails() {
        let ctx = TestContext::new();
        let mut decoder = DeflateDecoder::new(DeflateConfig::default()).unwrap();

        // 0xFF opens a block with the reserved BTYPE, which every inflater
        // rejects immediately
        let garbage = vec![0xFFu8; 16];
        let frame = Frame::binary(payload(&garbage)).with_rsv(RSV1);
        let mut out = Vec::new();
        match decoder.decode(&ctx, frame, &mut out) {
            Err(Error::Compression(_)) => {}
            other => panic!("expected compression error, got {:?}", other),
        }
    }

    #[test]
    fn test_decompression_bound() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();
        let mut decoder = DeflateDecoder::new(DeflateConfig {
            max_message_size: 1024,
            ..Default::default()
        })
        .unwrap();

        // highly compressible 64KB blows past a 1KB bound on inflate
        let bomb = vec![0u8; 64 * 1024];
        let compressed = encode_one(&mut encoder, &ctx, Frame::binary(payload(&bomb)));
        let mut out = Vec::new();
        match decoder.decode(&ctx, compressed, &mut out) {
            Err(Error::MessageTooLarge) => {}
            other => panic!("expected message-too-large, got {:?}", other),
        }
    }

    #[test]
    fn test_handler_removed_resets_state() {
        let ctx = TestContext::new();
        let mut encoder = DeflateEncoder::new(DeflateConfig::default()).unwrap();

        let first = Frame::binary(payload(b"unfinished")).with_fin(false);
        encode_one(&mut encoder, &ctx, first).release().unwrap();
        OutboundHandler::handler_removed(&mut encoder, &ctx).unwrap();

        // a fresh message is accepted after removal re-adds the handler
        let frame = Frame::binary(payload(b"new message"));
        let emitted = encode_one(&mut encoder, &ctx, frame);
        assert_eq!(emitted.rsv, RSV1);
        emitted.release().unwrap();
    }

    #[test]
    fn test_config_validation() {
        assert!(DeflateEncoder::new(DeflateConfig {
            compression_level: 12,
            ..Default::default()
        })
        .is_err());
        assert!(DeflateDecoder::new(DeflateConfig {
            window_bits: 8,
            ..Default::default()
        })
        .is_err());
        assert!(DeflateEncoder::new(DeflateConfig::low_memory()).is_ok());
        assert!(DeflateEncoder::new(DeflateConfig::best_compression()).is_ok());
    }
}
