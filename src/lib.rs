// src/lib.rs

//! Supervised execution of external build commands.
//!
//! [`run_command`] runs a shell command in a given directory, drains stdout
//! and stderr on separate tasks, kills the whole process group once output
//! has been silent for longer than the configured budget, and returns a
//! [`CommandResult`] with size-bounded transcripts.
//!
//! Only a command that cannot be started is an error. A non-zero exit, an
//! inactivity kill or a read error all come back inside the result.
//!
//! ```no_run
//! use std::time::Duration;
//! use cmd_supervisor::{run_command, CommandSpec};
//!
//! # async fn demo() -> Result<(), cmd_supervisor::SupervisorError> {
//! let spec = CommandSpec::new("./configure && make", "/tmp/zlib-1.3")
//!     .with_job_label("zlib")
//!     .with_no_output_timeout(Duration::from_secs(600));
//! let result = run_command(spec).await?;
//! if !result.success() {
//!     eprintln!("{}\n{}", result.summary(), result.stderr);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod drainer;
pub mod error;
pub mod line_log;
pub mod sink;
pub mod supervisor;
pub mod truncate;

pub use config::SupervisorConfig;
pub use drainer::{DrainOutcome, StreamDrainer};
pub use error::{ConfigError, SupervisorError, TruncateError};
pub use line_log::{ActivityClock, LineLog};
pub use sink::{FanoutSink, FileSink, NullSink, Stream, TracingSink, TranscriptSink};
pub use supervisor::{run_command, CommandResult, CommandSpec, ProcessSupervisor};
pub use truncate::{shrink_by_size, ShrinkOptions, Side, SizeErrorPolicy};
pub use tokio_util::sync::CancellationToken;
