pub mod command;
pub mod date;
pub mod duration;
pub mod handlers;

pub use command::{parse, Command, SlaKind};
pub use handlers::{dispatch, Context};
