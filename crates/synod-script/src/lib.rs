pub mod mapper;
pub mod runner;
pub mod scripts;

pub use mapper::{JoinAllMapper, ParallelMapper, SequentialMapper};
pub use runner::{ScriptArg, ScriptExecutor, ScriptRunner, SlotOutcome};
pub use scripts::ScriptName;
