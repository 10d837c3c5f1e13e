//! Worker tasks driven by bounded message queues
//!
//! Every subsystem that owns hardware runs as one [`WorkerTask`]: it performs
//! its one-time init on its own thread, then pops messages until it sees
//! [`Envelope::Exit`], tears down and returns. Nothing outside the worker
//! thread ever frees the worker's queue.
//!
//! Producers reach a worker through the [`Deliver`] trait, implemented both by
//! the in-process [`LocalQueue`] and by the cross-core [`MailboxChannel`].

mod mailbox;
mod queue;
mod worker;

pub use mailbox::{MailboxChannel, MailboxCodec, MailboxFrame, MAILBOX_CMD_EXIT};
pub use queue::{queue_pair, Deliver, Envelope, Inbox, LocalQueue};
pub use worker::{call, Actor, WorkerTask};
