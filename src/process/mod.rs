pub mod supervisor;

pub use supervisor::{drain_lines, Capture, Handle, PollResult, ProcessSupervisor};
