//! Coordination patterns built on top of the mesh

pub mod request_reply;

pub use request_reply::{
    PendingReply, ReplyHandler, ReplyOutcome, RequestReplyChannel, RequestReplyConfig, failure,
    inform, inform_result, reply_to,
};
