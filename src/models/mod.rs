mod event;
mod order;
mod refund;
mod session;
mod ticket;

pub use event::*;
pub use order::*;
pub use refund::*;
pub use session::*;
pub use ticket::*;
