// rndflow-sdk: Foundation layer for the RnDflow job agent.
// This crate has ZERO dependencies on other rndflow crates and provides
// core utilities, traits, and the script-side job data helpers.

pub mod build_constants;
pub mod file_readers;
pub mod io_util;
pub mod job_data;
pub mod process_invoker;
pub mod string_util;
pub mod trace;

// Re-export commonly used items at crate root
pub use build_constants::AgentPackage;
pub use file_readers::{FileReader, FileReaderRegistry};
pub use io_util::IOUtil;
pub use job_data::{
    FileWriter, ImageRenderer, InputPackage, JobData, OutputPackage, OutputWriter,
};
pub use process_invoker::{ProcessDataReceivedEventArgs, ProcessInvoker};
pub use string_util::StringUtil;
pub use trace::TraceWriter;
