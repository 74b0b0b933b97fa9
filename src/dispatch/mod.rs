//! # Dispatch
//!
//! The dispatcher core: pending queue, session registry, wire protocol and the
//! per-connection dispatch loop, tied together by [`DispatcherContext`].

pub mod context;
pub mod pending_queue;
pub mod protocol;
pub mod registry;
pub mod session;

pub use context::{DispatcherContext, Reassignment};
pub use pending_queue::PendingQueue;
pub use protocol::{
    decode_master_message, decode_reply, encode_task, Assignment, MasterMessage, WorkerReply,
    ERROR_REPLY, MASTER_RECEIVE_BUFFER, NO_TASK, WORKER_RECEIVE_BUFFER,
};
pub use registry::{StatusEntry, WorkerRegistry, WorkerStatusReport};
pub use session::{DispatchSession, SessionState, TerminationReason};
