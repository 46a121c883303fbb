//! Domain model (ids, task record, status, thresholds, civil time, errors).

pub mod civil_time;
pub mod errors;
pub mod ids;
pub mod status;
pub mod task;
pub mod threshold;

pub use self::civil_time::{
    Period, civil_zone, format_civil, now_in_civil_zone, remaining_minutes, resolve_due_instant,
};
pub use self::errors::{ErrorKind, NudgeError};
pub use self::ids::{ParseIdError, TaskId};
pub use self::status::{TaskStatus, UnknownStatus};
pub use self::task::{NewTask, ONLINE_MEETING, SHARED_OWNER, Task, TaskValidationError};
pub use self::threshold::{RemindersSent, Threshold, UnknownThreshold, firing_thresholds};
