//! # Rivulet: pooled buffers and permessage-deflate for WebSocket pipelines
//!
//! The core of a high-performance asynchronous networking toolkit: the
//! reference-counted buffer system everything flows through, and the
//! stateful frame compression codec built on top of it.
//!
//! ## Design
//!
//! - **Deterministic buffer lifecycle**: every [`ByteBuf`] carries an atomic
//!   reference count; the release that reaches zero returns the backing
//!   array to a process-global size-class pool and the storage node to a
//!   thread-local recycler. Zero allocations in the steady state.
//! - **Zero-copy composition**: slices, duplicates and composite buffers
//!   share storage instead of copying it; retained views pin their parent
//!   alive through the count.
//! - **Streaming compression**: the permessage-deflate handlers carry raw
//!   DEFLATE window state across frames and fragments (RFC 7692), with
//!   per-frame skip policies and optional per-message context reset.
//! - **Text fast paths**: UTF-16 to UTF-8/ASCII encoding straight into
//!   buffer storage, `simdutf8`-validated decoding out of it.
//!
//! Transports, handshakes and wire framing live elsewhere; this crate sees
//! parsed frames through the [`pipeline`] handler contract and hands back
//! frames to emit.
//!
//! ## Example
//!
//! ```
//! use rivulet::{BufAllocator, PooledAllocator};
//!
//! let alloc = PooledAllocator;
//! let mut buf = alloc.buffer(64);
//! buf.write_u32(0xDEADBEEF)?;
//! assert_eq!(buf.read_u32()?, 0xDEADBEEF);
//! buf.release()?;
//! # Ok::<(), rivulet::Error>(())
//! ```

pub mod alloc;
pub mod buffer;
mod composite;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod refcount;
pub mod text;

#[cfg(feature = "permessage-deflate")]
pub mod deflate;

pub use alloc::{ArrayPool, BufAllocator, PooledAllocator};
pub use buffer::ByteBuf;
pub use error::{Error, Result};
pub use frame::{Frame, OpCode, RSV1, RSV2, RSV3};
pub use pipeline::{HandlerContext, InboundHandler, OutboundHandler};
pub use refcount::RefCount;

#[cfg(feature = "permessage-deflate")]
pub use deflate::{DeflateConfig, DeflateDecoder, DeflateEncoder, SkipFilter};

/// Smallest pooled array size class (bytes)
pub const MIN_ARRAY_CLASS: usize = 64;

/// Largest pooled array size class (4MB); bigger rents are exact and
/// unpooled
pub const MAX_POOLED_ARRAY: usize = 4 * 1024 * 1024;

/// Default hard bound on buffer growth when the caller names none
pub const DEFAULT_MAX_CAPACITY: usize = i32::MAX as usize;

/// Chunk size the codec drains compressed/decompressed output in
pub const DEFLATE_CHUNK_SIZE: usize = 4 * 1024;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::alloc::{BufAllocator, PooledAllocator};
    pub use crate::buffer::ByteBuf;
    pub use crate::error::{Error, Result};
    pub use crate::frame::{Frame, OpCode};
    pub use crate::pipeline::{HandlerContext, InboundHandler, OutboundHandler};

    #[cfg(feature = "permessage-deflate")]
    pub use crate::deflate::{DeflateConfig, DeflateDecoder, DeflateEncoder};
}
