//! Context propagation across process boundaries.
//!
//! [`LoopPropagator`] is the propagator used by CozeLoop services. The carrier
//! traits live in [`cozeloop::propagation`].
mod loop_propagator;

pub use loop_propagator::{
    LoopPropagator, LOOP_TRACEPARENT_HEADER, LOOP_TRACESTATE_HEADER, TRACEPARENT_HEADER,
    TRACESTATE_HEADER,
};
