//! The handler contract the codec plugs into
//!
//! A channel's pipeline invokes inbound and outbound handlers serially on
//! that channel's event-loop thread; handlers therefore take `&mut self`
//! and may keep per-connection state without locking. Buffers crossing the
//! contract stay reference-counted because other threads may hold views.
//!
//! Outbound writes complete immediately at this layer; propagating
//! completion of the actual socket write is the transport's concern.

use crate::alloc::BufAllocator;
use crate::error::{Error, Result};
use crate::frame::Frame;

/// Capabilities a handler can reach while processing an event
pub trait HandlerContext {
    /// The channel's buffer allocator
    fn alloc(&self) -> &dyn BufAllocator;

    /// Propagate a frame to the next inbound handler
    fn fire_channel_read(&self, frame: Frame);

    /// Write a frame toward the transport
    fn write(&self, frame: Frame) -> Result<()>;

    /// Raise an error on the pipeline's exception path
    fn fire_exception_caught(&self, error: Error);
}

/// Transforms frames flowing from the transport to the application
pub trait InboundHandler {
    /// Decode one inbound frame, pushing results into `out`
    ///
    /// On error the handler must have released any buffers it retained for
    /// the frame before returning.
    fn decode(&mut self, ctx: &dyn HandlerContext, frame: Frame, out: &mut Vec<Frame>)
        -> Result<()>;

    /// Cleanup hook: the handler is leaving the pipeline and must release
    /// everything it holds
    fn handler_removed(&mut self, _ctx: &dyn HandlerContext) -> Result<()> {
        Ok(())
    }
}

/// Transforms frames flowing from the application to the transport
pub trait OutboundHandler {
    /// Encode one outbound frame, pushing results into `out`
    fn encode(&mut self, ctx: &dyn HandlerContext, frame: Frame, out: &mut Vec<Frame>)
        -> Result<()>;

    /// Cleanup hook, as for [`InboundHandler::handler_removed`]
    fn handler_removed(&mut self, _ctx: &dyn HandlerContext) -> Result<()> {
        Ok(())
    }
}
